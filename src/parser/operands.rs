//! Per-kind operand productions for instruction lines.

use crate::error::ErrorKind;
use crate::isa::{Format, OperandKind};
use crate::lexer::TokenKind;
use crate::parser::number::{integer_number, to_number, validate_float, validate_integer};
use crate::parser::Parser;
use crate::program::{Field, Imm, Ins};

/// Shape expectation of a `type` operand.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum VerificationKind {
    Object,
    Array,
    Any,
}

impl Parser {
    fn curr_ins(&mut self) -> &mut Ins {
        self.curr_func()
            .expect("instruction outside of function")
            .ins
            .last_mut()
            .expect("no current instruction")
    }

    pub(crate) fn parse_operands(&mut self) -> bool {
        let opcode = match self.curr_ins().opcode {
            Some(op) => op,
            None => return true,
        };
        let info = opcode.info();

        let mut first = true;
        for kind in info.operands {
            if *kind == OperandKind::CallArgs {
                return self.parse_call_args(first, info.format.reg_capacity());
            }

            if !first && !self.parse_operand_comma() {
                return false;
            }

            let is_wide = matches!(info.format, Format::Imm64 | Format::V8Imm64);
            let ok = match kind {
                OperandKind::Reg => self.parse_operand_vreg(),
                OperandKind::Imm => self.parse_operand_integer(),
                OperandKind::FloatImm => self.parse_operand_float(is_wide),
                OperandKind::Label => self.parse_operand_label(),
                OperandKind::Callee => self.parse_operand_call(),
                OperandKind::Field => self.parse_operand_field(),
                OperandKind::TypeObj => self.parse_operand_type(VerificationKind::Object),
                OperandKind::TypeArr => self.parse_operand_type(VerificationKind::Array),
                OperandKind::TypeAny => self.parse_operand_type(VerificationKind::Any),
                OperandKind::String => self.parse_operand_string(),
                OperandKind::LiteralArray => self.parse_operand_literal_array(),
                OperandKind::Id => self.parse_operand_id(),
                OperandKind::CallArgs => unreachable!(),
            };
            if !ok {
                return false;
            }
            first = false;
        }

        true
    }

    fn parse_operand_comma(&mut self) -> bool {
        if self.context.has_err() {
            return false;
        }

        if self.context.mask() || self.context.cur() != TokenKind::DelComma {
            let err = self.get_error("Expected comma.", ErrorKind::BadNumberOperands);
            self.context.set_err(err);
            return false;
        }

        self.context.advance();
        true
    }

    /// `vN` pushes the register and raises the running register maximum;
    /// `aN` pushes `N` and defers the renumbering to the post-loop pass.
    fn parse_operand_vreg(&mut self) -> bool {
        if self.context.has_err() {
            return false;
        }

        if self.context.mask() || self.context.cur() != TokenKind::Id {
            let err = self.get_error_after("Expected register.", ErrorKind::BadOperand);
            self.context.set_err(err);
            return false;
        }

        let params_num = self.curr_func().map(|f| f.params_num()).unwrap_or(0);
        let token = self.context.token().to_string();

        if token.starts_with('v') && self.context.validate_register_name('v', 0) {
            let number = to_number(&token[1..]);
            let func = self.curr_func().unwrap();
            if number as i64 > func.value_of_first_param {
                func.value_of_first_param = number as i64;
            }
            func.ins.last_mut().unwrap().regs.push(number as u16);
        } else if token.starts_with('a')
            && params_num > 0
            && self.context.validate_register_name('a', params_num - 1)
        {
            let number = to_number(&token[1..]);
            let ins_number = self.context.ins_number;
            let reg_idx = {
                let ins = self.curr_ins();
                ins.regs.push(number as u16);
                ins.regs.len() - 1
            };
            if let Some(key) = self.curr_func_key() {
                self.function_arguments_lists
                    .entry(key)
                    .or_default()
                    .push((ins_number, reg_idx));
            }
        } else {
            let err = self.get_error("Expected register.", ErrorKind::BadOperand);
            self.context.set_err(err);
            return false;
        }

        self.context.advance();
        true
    }

    fn curr_func_key(&self) -> Option<String> {
        self.curr_func.clone()
    }

    /// Register list of a call: `(',' vreg)*` after the callee, or a plain
    /// `vreg (',' vreg)*` when the call has no method operand.
    fn parse_call_args(&mut self, mut first: bool, capacity: usize) -> bool {
        let mut count = 0;

        loop {
            if self.context.has_err() {
                return false;
            }
            if self.context.mask() {
                break;
            }

            if first {
                if self.context.cur() != TokenKind::Id {
                    break;
                }
            } else {
                if self.context.cur() != TokenKind::DelComma {
                    break;
                }
                self.context.advance();
            }

            if !self.parse_operand_vreg() {
                return false;
            }
            count += 1;
            first = false;
        }

        if count > capacity {
            let err = self.get_error("Invalid number of operands.", ErrorKind::BadNumberOperands);
            self.context.set_err(err);
            return false;
        }

        true
    }

    fn parse_operand_call(&mut self) -> bool {
        if self.context.has_err() {
            return false;
        }

        if self.context.mask() || !self.function_valid_name() {
            let err = self.get_error("Invalid name of function.", ErrorKind::BadNameReg);
            self.context.set_err(err);
            return false;
        }

        let name = self.context.token().to_string();
        self.curr_ins().ids.push(name);

        self.context.advance();
        true
    }

    fn parse_operand_integer(&mut self) -> bool {
        if self.context.has_err() {
            return false;
        }

        if self.context.mask() || self.context.cur() != TokenKind::Id {
            let err = self.get_error_after("Expected immediate.", ErrorKind::BadOperand);
            self.context.set_err(err);
            return false;
        }

        let token = self.context.token();
        if !validate_integer(token) {
            let err = self.get_error("Expected integer.", ErrorKind::BadIntegerName);
            self.context.set_err(err);
            return false;
        }

        let n = match integer_number(token) {
            Some(n) => n,
            None => {
                let err = self.get_error(
                    "Too large immediate (length is more than 64 bit).",
                    ErrorKind::BadIntegerWidth,
                );
                self.context.set_err(err);
                return false;
            }
        };

        self.curr_ins().imms.push(Imm::Int(n));
        self.context.advance();
        true
    }

    fn parse_operand_float(&mut self, is_64bit: bool) -> bool {
        if self.context.has_err() {
            return false;
        }

        if self.context.mask() || self.context.cur() != TokenKind::Id {
            let err = self.get_error_after("Expected immediate.", ErrorKind::BadOperand);
            self.context.set_err(err);
            return false;
        }

        let token = self.context.token();
        if !validate_float(token) {
            let err = self.get_error("Expected float.", ErrorKind::BadFloatName);
            self.context.set_err(err);
            return false;
        }

        let hex = token.starts_with("0x") || token.starts_with("-0x");
        let n = if hex {
            match integer_number(token) {
                Some(bits) if is_64bit => Some(f64::from_bits(bits as u64)),
                Some(bits) => Some(f32::from_bits(bits as u32) as f64),
                None => None,
            }
        } else {
            token.parse::<f64>().ok()
        };

        let n = match n {
            Some(n) => n,
            None => {
                let err = self.get_error(
                    "Too large immediate (length is more than 64 bit).",
                    ErrorKind::BadFloatWidth,
                );
                self.context.set_err(err);
                return false;
            }
        };

        self.curr_ins().imms.push(Imm::Double(n));
        self.context.advance();
        true
    }

    fn parse_operand_label(&mut self) -> bool {
        if self.context.has_err() {
            return false;
        }

        if self.context.mask() || !self.label_valid_name() {
            let err = self.get_error("Invalid name of label.", ErrorKind::BadNameId);
            self.context.set_err(err);
            return false;
        }

        let name = self.context.token().to_string();
        self.curr_ins().ids.push(name.clone());
        self.add_label_to_table(&name, false);

        self.context.advance();
        true
    }

    fn parse_operand_id(&mut self) -> bool {
        if self.context.has_err() {
            return false;
        }

        if self.context.mask() || self.context.cur() != TokenKind::Id {
            let err = self.get_error_after("Expected label.", ErrorKind::BadOperand);
            self.context.set_err(err);
            return false;
        }

        self.parse_operand_label()
    }

    fn parse_operand_type(&mut self, ver_kind: VerificationKind) -> bool {
        if self.context.has_err() {
            return false;
        }

        if self.context.mask() || self.context.cur() != TokenKind::Id {
            let err = self.get_error_after("Expected type.", ErrorKind::BadOperand);
            self.context.set_err(err);
            return false;
        }

        if !self.type_valid_name() {
            let err = self.get_error("Invalid name of type.", ErrorKind::BadNameId);
            self.context.set_err(err);
            return false;
        }

        let type_ = match self.parse_type() {
            Some(t) => t,
            None => return false,
        };

        if !type_.is_array() {
            self.add_record_to_table(type_.name(), false);

            if ver_kind == VerificationKind::Array {
                self.get_warning(
                    "Unexpected type_id received! Expected array, but object given",
                    ErrorKind::WarUnexpectedTypeId,
                );
            }
        } else {
            if !type_.is_array_of_primitives()
                && !self.program.record_table.contains_key(type_.component_name())
            {
                let component = type_.component_name().to_string();
                self.add_record_to_table(&component, false);
            }

            if ver_kind == VerificationKind::Object {
                self.get_warning(
                    "Unexpected type_id received! Expected object, but array given",
                    ErrorKind::WarUnexpectedTypeId,
                );
            }
        }

        self.curr_ins().ids.push(type_.name().to_string());
        true
    }

    /// `<record>.<field>`, split at the last dot; both halves are
    /// forward-declared when unseen.
    fn parse_operand_field(&mut self) -> bool {
        if self.context.has_err() {
            return false;
        }

        if self.context.mask() || self.context.cur() != TokenKind::Id {
            let err = self.get_error_after("Expected field.", ErrorKind::BadOperand);
            self.context.set_err(err);
            return false;
        }

        if !self.prefixed_valid_name() {
            let err = self.get_error("Invalid field name.", ErrorKind::BadNameId);
            self.context.set_err(err);
            return false;
        }

        let full_name = self.context.token().to_string();
        let (record_name, field_name) = match full_name.rfind('.') {
            Some(pos) => (full_name[..pos].to_string(), full_name[pos + 1..].to_string()),
            None => (full_name.clone(), full_name.clone()),
        };

        self.add_record_to_table(&record_name, false);

        let token = self.context.cur_token();
        let whole_line = token.whole_line.to_string();
        let bound_left = token.bound_left + record_name.len() + 1;
        let bound_right = token.bound_right;
        let line_of_def = self.line_stric;
        let lang = self.program.lang;

        if let Some(rec) = self.program.record_table.get_mut(&record_name) {
            let missing = !field_name.is_empty()
                && !rec.field_list.iter().any(|f| f.name == field_name);
            if missing {
                let mut field = Field::new(lang);
                field.name = field_name;
                field.line_of_def = line_of_def;
                field.whole_line = whole_line;
                field.bound_left = bound_left;
                field.bound_right = bound_right;
                field.is_defined = false;
                rec.field_list.push(field);
            }
        }

        self.curr_ins().ids.push(full_name);
        self.context.advance();
        true
    }

    fn parse_operand_string(&mut self) -> bool {
        if self.context.has_err() {
            return false;
        }

        let s = match self.parse_string_literal() {
            Some(s) => s,
            None => return false,
        };

        self.curr_ins().ids.push(s);
        self.context.advance();
        true
    }

    fn parse_operand_literal_array(&mut self) -> bool {
        if self.context.has_err() {
            return false;
        }

        if self.context.mask() || self.context.cur() != TokenKind::Id {
            let err = self.get_error_after("Expected literal array id.", ErrorKind::BadOperand);
            self.context.set_err(err);
            return false;
        }

        let id = self.context.token().to_string();
        self.curr_ins().ids.push(id);
        self.context.advance();
        true
    }

    // ------------------------------------------------------------------
    // string literals
    // ------------------------------------------------------------------

    /// Unquotes and unescapes the current string-literal token, interning
    /// the result in the program's string set.
    pub(crate) fn parse_string_literal(&mut self) -> Option<String> {
        if self.context.mask() || self.context.cur() != TokenKind::IdString {
            let err = self.get_error("Expected string literal", ErrorKind::BadOperand);
            self.context.set_err(err);
            return None;
        }

        let token = self.context.token().to_string();
        let inner: Vec<char> = token[1..token.len() - 1].chars().collect();

        let mut s = String::new();
        let mut i = 0;
        while i < inner.len() {
            let c = inner[i];
            i += 1;
            if c != '\\' {
                s.push(c);
                continue;
            }

            match self.parse_escape_sequence(&inner, &mut i) {
                Some(c) => s.push(c),
                None => return None,
            }
        }

        self.program.strings.insert(s.clone());
        Some(s)
    }

    fn parse_escape_sequence(&mut self, s: &[char], i: &mut usize) -> Option<char> {
        let c = s[*i];

        if ('0'..='7').contains(&c) {
            return self.parse_octal_escape_sequence(s, i);
        }

        *i += 1;

        match c {
            '\'' | '"' | '\\' => Some(c),
            'a' => Some('\x07'),
            'b' => Some('\x08'),
            'f' => Some('\x0C'),
            'n' => Some('\n'),
            'r' => Some('\r'),
            't' => Some('\t'),
            'v' => Some('\x0B'),
            'x' => self.parse_hex_escape_sequence(s, i),
            _ => {
                let err = self.get_error(
                    "Unknown escape sequence",
                    ErrorKind::BadStringUnknownEscapeSequence,
                );
                self.context.set_err(err);
                None
            }
        }
    }

    fn parse_octal_escape_sequence(&mut self, s: &[char], i: &mut usize) -> Option<char> {
        let mut r: u32 = 0;
        let mut n = 0;
        while *i < s.len() && ('0'..='7').contains(&s[*i]) && n < 3 {
            r = (r << 3) | s[*i].to_digit(8).unwrap();
            *i += 1;
            n += 1;
        }
        Some(char::from(r as u8))
    }

    fn parse_hex_escape_sequence(&mut self, s: &[char], i: &mut usize) -> Option<char> {
        let mut r: u32 = 0;
        for _ in 0..2 {
            if *i >= s.len() || !s[*i].is_ascii_hexdigit() {
                let err = self.get_error(
                    "Invalid hexadecimal escape sequence",
                    ErrorKind::BadStringInvalidHexEscapeSequence,
                );
                self.context.set_err(err);
                return None;
            }
            r = (r << 4) | s[*i].to_digit(16).unwrap();
            *i += 1;
        }
        Some(char::from(r as u8))
    }
}
