//! Instruction encoding.
//!
//! Each opcode's format fixes its byte layout; branch targets are encoded as
//! signed PC-relative offsets patched in once every label is bound.

use crate::isa::{Format, Opcode};
use crate::program::Imm;

/// Encoder failure, reported through `last_error` with its numeric status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum EmitStatus {
    UnboundLabel = 1,
    RegisterOverflow = 2,
    BranchOutOfRange = 3,
    MissingOperand = 4,
}

impl EmitStatus {
    pub fn code(&self) -> i32 {
        *self as i32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BcLabel(usize);

struct Fixup {
    /// byte position of the offset field inside the stream
    pos: usize,
    width: usize,
    label: BcLabel,
    /// PC of the instruction the offset is relative to
    insn_pc: u32,
}

/// Serializes one method's instruction list.
#[derive(Default)]
pub struct BytecodeEmitter {
    bytes: Vec<u8>,
    labels: Vec<Option<u32>>,
    fixups: Vec<Fixup>,
}

impl BytecodeEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_label(&mut self) -> BcLabel {
        self.labels.push(None);
        BcLabel(self.labels.len() - 1)
    }

    pub fn bind(&mut self, label: BcLabel) {
        self.labels[label.0] = Some(self.pc());
    }

    pub fn pc(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Encodes one instruction. `ids16` carry resolved 16-bit scope indexes,
    /// `ids32` resolved 32-bit file offsets, in operand order.
    pub fn encode(
        &mut self,
        opcode: Opcode,
        regs: &[u16],
        imms: &[Imm],
        ids16: &[u16],
        ids32: &[u32],
        label: Option<BcLabel>,
    ) -> Result<(), EmitStatus> {
        let format = opcode.format();

        let width = format.reg_width();
        if width > 0 && width < 16 {
            let limit = 1u32 << width;
            if regs.iter().any(|&r| (r as u32) >= limit) {
                return Err(EmitStatus::RegisterOverflow);
            }
        }

        let insn_pc = self.pc();
        self.bytes.push(opcode as u8);

        match format {
            Format::None => {}
            Format::Imm8 => self.push_int(imms, 0, 1)?,
            Format::Imm16 => self.push_int(imms, 0, 2)?,
            Format::Imm32 => self.push_imm(imms, 0, 4)?,
            Format::Imm64 => self.push_imm(imms, 0, 8)?,
            Format::V4V4 => self.push_nibbles(regs, 2)?,
            Format::V4V4V4V4 => self.push_nibbles(regs, 4)?,
            Format::V8 => self.push_reg8(regs, 0)?,
            Format::V8V8 => {
                self.push_reg8(regs, 0)?;
                self.push_reg8(regs, 1)?;
            }
            Format::V16V16 => {
                self.push_reg16(regs, 0)?;
                self.push_reg16(regs, 1)?;
            }
            Format::V8Imm32 => {
                self.push_reg8(regs, 0)?;
                self.push_imm(imms, 0, 4)?;
            }
            Format::V8Imm64 => {
                self.push_reg8(regs, 0)?;
                self.push_imm(imms, 0, 8)?;
            }
            Format::Imm8V8 => {
                self.push_int(imms, 0, 1)?;
                self.push_reg8(regs, 0)?;
            }
            Format::Id16 => self.push_id16(ids16, 0)?,
            Format::Id16V4V4 => {
                self.push_id16(ids16, 0)?;
                self.push_nibbles(regs, 2)?;
            }
            Format::Id16V4V4V4V4 => {
                self.push_id16(ids16, 0)?;
                self.push_nibbles(regs, 4)?;
            }
            Format::Id16V8 => {
                self.push_id16(ids16, 0)?;
                self.push_reg8(regs, 0)?;
            }
            Format::Id32 => {
                let id = ids32.first().ok_or(EmitStatus::MissingOperand)?;
                self.bytes.extend_from_slice(&id.to_le_bytes());
            }
            Format::Jmp8 => self.push_branch(label, insn_pc, 1)?,
            Format::Jmp16 => self.push_branch(label, insn_pc, 2)?,
            Format::Jmp32 => self.push_branch(label, insn_pc, 4)?,
            Format::V8Jmp16 => {
                self.push_reg8(regs, 0)?;
                self.push_branch(label, insn_pc, 2)?;
            }
        }

        Ok(())
    }

    /// Resolves every branch and hands out the byte stream.
    pub fn build(mut self, out: &mut Vec<u8>) -> Result<(), EmitStatus> {
        for fixup in &self.fixups {
            let target = self.labels[fixup.label.0].ok_or(EmitStatus::UnboundLabel)?;
            let offset = target as i64 - fixup.insn_pc as i64;

            let in_range = match fixup.width {
                1 => i8::try_from(offset).is_ok(),
                2 => i16::try_from(offset).is_ok(),
                _ => i32::try_from(offset).is_ok(),
            };
            if !in_range {
                return Err(EmitStatus::BranchOutOfRange);
            }

            let le = offset.to_le_bytes();
            self.bytes[fixup.pos..fixup.pos + fixup.width].copy_from_slice(&le[..fixup.width]);
        }

        out.clear();
        out.append(&mut self.bytes);
        Ok(())
    }

    fn push_reg8(&mut self, regs: &[u16], idx: usize) -> Result<(), EmitStatus> {
        let reg = regs.get(idx).copied().unwrap_or(0);
        self.bytes.push(reg as u8);
        Ok(())
    }

    fn push_reg16(&mut self, regs: &[u16], idx: usize) -> Result<(), EmitStatus> {
        let reg = regs.get(idx).copied().unwrap_or(0);
        self.bytes.extend_from_slice(&reg.to_le_bytes());
        Ok(())
    }

    /// Packs register nibbles two per byte, low nibble first; absent
    /// registers encode as zero.
    fn push_nibbles(&mut self, regs: &[u16], count: usize) -> Result<(), EmitStatus> {
        let mut i = 0;
        while i < count {
            let lo = regs.get(i).copied().unwrap_or(0) as u8 & 0x0F;
            let hi = regs.get(i + 1).copied().unwrap_or(0) as u8 & 0x0F;
            self.bytes.push(lo | (hi << 4));
            i += 2;
        }
        Ok(())
    }

    fn push_id16(&mut self, ids16: &[u16], idx: usize) -> Result<(), EmitStatus> {
        let id = ids16.get(idx).copied().ok_or(EmitStatus::MissingOperand)?;
        self.bytes.extend_from_slice(&id.to_le_bytes());
        Ok(())
    }

    fn push_int(&mut self, imms: &[Imm], idx: usize, width: usize) -> Result<(), EmitStatus> {
        let v = match imms.get(idx) {
            Some(imm) => imm.as_i64(),
            None => return Err(EmitStatus::MissingOperand),
        };
        self.bytes.extend_from_slice(&v.to_le_bytes()[..width]);
        Ok(())
    }

    /// Integer immediates truncate to the format width; float immediates
    /// store their IEEE bit pattern at the format width.
    fn push_imm(&mut self, imms: &[Imm], idx: usize, width: usize) -> Result<(), EmitStatus> {
        let v: u64 = match imms.get(idx) {
            Some(Imm::Int(v)) => *v as u64,
            Some(Imm::Double(v)) if width == 4 => (*v as f32).to_bits() as u64,
            Some(Imm::Double(v)) => v.to_bits(),
            None => return Err(EmitStatus::MissingOperand),
        };
        self.bytes.extend_from_slice(&v.to_le_bytes()[..width]);
        Ok(())
    }

    fn push_branch(
        &mut self,
        label: Option<BcLabel>,
        insn_pc: u32,
        width: usize,
    ) -> Result<(), EmitStatus> {
        let label = label.ok_or(EmitStatus::MissingOperand)?;
        self.fixups.push(Fixup {
            pos: self.bytes.len(),
            width,
            label,
            insn_pc,
        });
        self.bytes.extend(std::iter::repeat(0).take(width));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_encodings() {
        let mut emitter = BytecodeEmitter::new();
        emitter.encode(Opcode::ReturnVoid, &[], &[], &[], &[], None).unwrap();
        emitter.encode(Opcode::Lda, &[5], &[], &[], &[], None).unwrap();
        emitter.encode(Opcode::Mov, &[1, 2], &[], &[], &[], None).unwrap();

        let mut out = Vec::new();
        emitter.build(&mut out).unwrap();
        assert_eq!(
            out,
            vec![
                Opcode::ReturnVoid as u8,
                Opcode::Lda as u8,
                5,
                Opcode::Mov as u8,
                0x21
            ]
        );
    }

    #[test]
    fn test_immediate_encoding() {
        let mut emitter = BytecodeEmitter::new();
        emitter
            .encode(Opcode::Ldai, &[], &[Imm::Int(-2)], &[], &[], None)
            .unwrap();

        let mut out = Vec::new();
        emitter.build(&mut out).unwrap();
        assert_eq!(out[0], Opcode::Ldai as u8);
        assert_eq!(&out[1..5], &(-2i32).to_le_bytes());
    }

    #[test]
    fn test_float_immediate_bit_pattern() {
        let mut emitter = BytecodeEmitter::new();
        emitter
            .encode(Opcode::FldaiWide, &[], &[Imm::Double(1.5)], &[], &[], None)
            .unwrap();

        let mut out = Vec::new();
        emitter.build(&mut out).unwrap();
        assert_eq!(&out[1..9], &1.5f64.to_bits().to_le_bytes());
    }

    #[test]
    fn test_register_overflow() {
        let mut emitter = BytecodeEmitter::new();
        let err = emitter
            .encode(Opcode::Mov, &[16, 0], &[], &[], &[], None)
            .unwrap_err();
        assert_eq!(err, EmitStatus::RegisterOverflow);
    }

    #[test]
    fn test_backward_branch() {
        let mut emitter = BytecodeEmitter::new();
        let target = emitter.create_label();
        emitter.bind(target);
        emitter.encode(Opcode::Nop, &[], &[], &[], &[], None).unwrap();
        emitter
            .encode(Opcode::Jmp, &[], &[], &[], &[], Some(target))
            .unwrap();

        let mut out = Vec::new();
        emitter.build(&mut out).unwrap();
        // jmp sits at pc 1, target at pc 0 -> offset -1
        assert_eq!(&out[2..6], &(-1i32).to_le_bytes());
    }

    #[test]
    fn test_forward_branch() {
        let mut emitter = BytecodeEmitter::new();
        let target = emitter.create_label();
        emitter
            .encode(Opcode::Jeqz, &[], &[], &[], &[], Some(target))
            .unwrap();
        emitter.encode(Opcode::Nop, &[], &[], &[], &[], None).unwrap();
        emitter.bind(target);
        emitter.encode(Opcode::ReturnVoid, &[], &[], &[], &[], None).unwrap();

        let mut out = Vec::new();
        emitter.build(&mut out).unwrap();
        // jeqz at pc 0 (3 bytes), nop at 3, target at 4
        assert_eq!(&out[1..3], &4i16.to_le_bytes());
    }

    #[test]
    fn test_unbound_label() {
        let mut emitter = BytecodeEmitter::new();
        let dangling = emitter.create_label();
        emitter
            .encode(Opcode::Jmp, &[], &[], &[], &[], Some(dangling))
            .unwrap();

        let mut out = Vec::new();
        assert_eq!(emitter.build(&mut out).unwrap_err(), EmitStatus::UnboundLabel);
    }

    #[test]
    fn test_call_encoding() {
        let mut emitter = BytecodeEmitter::new();
        emitter
            .encode(Opcode::CallShort, &[1, 2], &[], &[7], &[], None)
            .unwrap();

        let mut out = Vec::new();
        emitter.build(&mut out).unwrap();
        assert_eq!(out, vec![Opcode::CallShort as u8, 7, 0, 0x21]);
    }

    #[test]
    fn test_string_id_encoding() {
        let mut emitter = BytecodeEmitter::new();
        emitter
            .encode(Opcode::LdaStr, &[], &[], &[], &[0x1234], None)
            .unwrap();

        let mut out = Vec::new();
        emitter.build(&mut out).unwrap();
        assert_eq!(&out[1..5], &0x1234u32.to_le_bytes());
    }
}
