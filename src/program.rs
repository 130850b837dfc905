//! The in-memory program graph produced by the parser and consumed by the
//! emitter.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::isa::{Format, InstFlags, Opcode};
use crate::lang::Language;
use crate::meta::{FieldMetadata, FunctionMetadata, ParamMetadata, RecordMetadata};
use crate::types::Type;

pub const ACCUMULATOR: u16 = u16::MAX;

/// Position inside the source text, 1-based line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourcePosition {
    pub line: usize,
    pub column: usize,
}

/// Byte span of a body (`{ … }`) for scope dumps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    pub begin: SourcePosition,
    pub end: SourcePosition,
}

/// Where an entity was declared (or first referenced, while it is still a
/// forward reference).
#[derive(Debug, Clone, Default)]
pub struct FileLocation {
    pub whole_line: String,
    pub bound_left: usize,
    pub bound_right: usize,
    pub line_number: usize,
    pub is_defined: bool,
}

pub mod debuginfo {
    /// Source position an instruction was parsed from.
    #[derive(Debug, Clone, Default)]
    pub struct InsDebug {
        pub line_number: usize,
        pub bound_left: usize,
        pub bound_right: usize,
        pub whole_line: String,
    }

    /// One local-variable lifetime record.
    #[derive(Debug, Clone)]
    pub struct LocalVariable {
        pub name: String,
        pub signature: String,
        pub signature_type: String,
        pub reg: u32,
        pub start: usize,
        pub length: usize,
    }
}

/// Immediate operand, tagged by how the literal was spelled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Imm {
    Int(i64),
    Double(f64),
}

impl Imm {
    pub fn as_i64(&self) -> i64 {
        match self {
            Imm::Int(v) => *v,
            Imm::Double(v) => v.to_bits() as i64,
        }
    }
}

/// One parsed instruction.
#[derive(Debug, Clone, Default)]
pub struct Ins {
    pub opcode: Option<Opcode>,
    pub regs: Vec<u16>,
    pub ids: Vec<String>,
    pub imms: Vec<Imm>,
    pub label: Option<String>,
    pub set_label: bool,
    pub ins_debug: debuginfo::InsDebug,
}

impl Ins {
    pub fn operand_list_length(&self) -> usize {
        self.regs.len() + self.ids.len() + self.imms.len()
    }

    pub fn has_flag(&self, flag: InstFlags) -> bool {
        match self.opcode {
            Some(op) => op.flags().contains(flag),
            None => false,
        }
    }

    pub fn can_throw(&self) -> bool {
        self.has_flag(InstFlags::THROWING)
            || self.has_flag(InstFlags::METHOD_ID)
            || self.has_flag(InstFlags::FIELD_ID)
            || self.has_flag(InstFlags::TYPE_ID)
            || self.has_flag(InstFlags::STRING_ID)
    }

    pub fn is_jump(&self) -> bool {
        self.has_flag(InstFlags::JUMP)
    }

    pub fn is_conditional_jump(&self) -> bool {
        self.is_jump() && self.has_flag(InstFlags::COND)
    }

    pub fn is_call(&self) -> bool {
        self.has_flag(InstFlags::CALL)
    }

    pub fn is_pseudo_call(&self) -> bool {
        self.has_flag(InstFlags::PSEUDO) && self.has_flag(InstFlags::CALL)
    }

    pub fn is_return(&self) -> bool {
        self.has_flag(InstFlags::RETURN)
    }

    pub fn format(&self) -> Format {
        match self.opcode {
            Some(op) => op.format(),
            None => Format::None,
        }
    }

    pub fn max_reg_encoding_width(&self) -> usize {
        self.format().reg_width()
    }

    /// Registers read by this instruction, with the accumulator slot
    /// interleaved the way the def/use tables describe.
    pub fn uses(&self) -> Vec<u16> {
        if self.is_pseudo_call() {
            return self.regs.clone();
        }

        let op = match self.opcode {
            Some(op) => op,
            None => return vec![],
        };

        let mut res = Vec::new();
        if self.has_flag(InstFlags::ACC_READ) {
            res.push(ACCUMULATOR);
        }
        for &idx in op.info().uses {
            if idx < self.regs.len() {
                res.push(self.regs[idx]);
            }
        }
        res
    }

    pub fn def(&self) -> Option<u16> {
        let op = self.opcode?;
        if let Some(def_idx) = op.info().def_index {
            return self.regs.get(def_idx).copied();
        }
        if self.has_flag(InstFlags::ACC_WRITE) {
            return Some(ACCUMULATOR);
        }
        None
    }

    pub fn is_valid_to_emit(&self) -> bool {
        let width = self.max_reg_encoding_width();
        if width == 0 {
            return self.regs.is_empty();
        }
        let invalid = 1u32 << width;
        self.regs.iter().all(|&reg| (reg as u32) < invalid)
    }

    pub fn has_debug_info(&self) -> bool {
        self.ins_debug.line_number != 0
    }
}

/// One field of a record.
#[derive(Debug)]
pub struct Field {
    pub type_: Type,
    pub name: String,
    pub metadata: FieldMetadata,
    pub line_of_def: usize,
    pub whole_line: String,
    pub bound_left: usize,
    pub bound_right: usize,
    pub is_defined: bool,
}

impl Field {
    pub fn new(lang: Language) -> Self {
        Self {
            type_: Type::default(),
            name: String::new(),
            metadata: FieldMetadata::new(lang),
            line_of_def: 0,
            whole_line: String::new(),
            bound_left: 0,
            bound_right: 0,
            is_defined: true,
        }
    }
}

/// A class declaration.
#[derive(Debug)]
pub struct Record {
    pub name: String,
    /// Name collides with a primitive keyword; descriptor emission keeps the
    /// `L…;` form in that case.
    pub conflict: bool,
    pub language: Language,
    pub metadata: RecordMetadata,
    pub field_list: Vec<Field>,
    pub params_num: usize,
    pub body_presence: bool,
    pub body_location: SourceLocation,
    pub source_file: String,
    pub file_location: Option<FileLocation>,
}

impl Record {
    pub fn new(name: impl Into<String>, lang: Language) -> Self {
        let name = name.into();
        let conflict = Type::is_primitive_keyword(&name);
        Self {
            name,
            conflict,
            language: lang,
            metadata: RecordMetadata::new(lang),
            field_list: Vec::new(),
            params_num: 0,
            body_presence: false,
            body_location: SourceLocation::default(),
            source_file: String::new(),
            file_location: None,
        }
    }

    pub fn with_location(name: impl Into<String>, lang: Language, loc: FileLocation) -> Self {
        Self {
            file_location: Some(loc),
            ..Self::new(name, lang)
        }
    }

    pub fn has_implementation(&self) -> bool {
        !self.metadata.is_foreign()
    }
}

#[derive(Debug)]
pub struct Parameter {
    pub type_: Type,
    pub metadata: ParamMetadata,
}

impl Parameter {
    pub fn new(type_: Type, lang: Language) -> Self {
        Self {
            type_,
            metadata: ParamMetadata::new(lang),
        }
    }
}

/// `.catch` / `.catchall` directive payload. The exception record name is
/// empty for `.catchall`.
#[derive(Debug, Clone, Default)]
pub struct CatchBlock {
    pub whole_line: String,
    pub exception_record: String,
    pub try_begin_label: String,
    pub try_end_label: String,
    pub catch_begin_label: String,
    pub catch_end_label: String,
}

#[derive(Debug, Clone)]
pub struct Label {
    pub name: String,
    pub file_location: Option<FileLocation>,
}

#[derive(Debug)]
pub struct Function {
    /// Pre-mangling name; the function table key is the mangled form.
    pub name: String,
    pub language: Language,
    pub metadata: FunctionMetadata,
    pub label_table: HashMap<String, Label>,
    pub ins: Vec<Ins>,
    pub local_variable_debug: Vec<debuginfo::LocalVariable>,
    pub source_file: String,
    pub source_code: String,
    pub catch_blocks: Vec<CatchBlock>,
    pub value_of_first_param: i64,
    pub regs_num: usize,
    pub params: Vec<Parameter>,
    pub body_presence: bool,
    pub return_type: Type,
    pub body_location: SourceLocation,
    pub file_location: Option<FileLocation>,
}

impl Function {
    pub fn new(name: impl Into<String>, lang: Language) -> Self {
        Self {
            name: name.into(),
            language: lang,
            metadata: FunctionMetadata::new(lang),
            label_table: HashMap::new(),
            ins: Vec::new(),
            local_variable_debug: Vec::new(),
            source_file: String::new(),
            source_code: String::new(),
            catch_blocks: Vec::new(),
            value_of_first_param: -1,
            regs_num: 0,
            params: Vec::new(),
            body_presence: false,
            return_type: Type::default(),
            body_location: SourceLocation::default(),
            file_location: None,
        }
    }

    pub fn with_location(name: impl Into<String>, lang: Language, loc: FileLocation) -> Self {
        Self {
            file_location: Some(loc),
            ..Self::new(name, lang)
        }
    }

    pub fn params_num(&self) -> usize {
        self.params.len()
    }

    pub fn is_static(&self) -> bool {
        (self.metadata.access_flags() & crate::meta::ACC_STATIC) != 0
    }

    pub fn has_implementation(&self) -> bool {
        !self.metadata.is_foreign() && self.metadata.has_implementation()
    }

    /// Registers at or above `regs_num` hold the formal parameters.
    pub fn is_parameter(&self, reg_number: u32) -> bool {
        reg_number as usize >= self.regs_num
    }

    pub fn can_throw(&self) -> bool {
        self.ins.iter().any(|insn| insn.can_throw())
    }

    pub fn has_debug_info(&self) -> bool {
        self.ins.iter().any(|insn| insn.has_debug_info())
    }

    pub fn line_number_of(&self, i: usize) -> i32 {
        self.ins[i].ins_debug.line_number as i32
    }
}

/// Kind of a method handle; field-access kinds target fields, invoke kinds
/// target methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MethodHandleKind {
    PutStatic = 0x00,
    GetStatic = 0x01,
    PutInstance = 0x02,
    GetInstance = 0x03,
    InvokeStatic = 0x04,
    InvokeInstance = 0x05,
    InvokeConstructor = 0x06,
    InvokeDirect = 0x07,
    InvokeInterface = 0x08,
}

#[derive(Debug, Clone)]
pub struct MethodHandle {
    pub item_name: String,
    pub kind: MethodHandleKind,
}

impl MethodHandle {
    pub fn new(item_name: impl Into<String>, kind: MethodHandleKind) -> Self {
        Self {
            item_name: item_name.into(),
            kind,
        }
    }
}

/// Tag of one literal inside a literal array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LiteralTag {
    TagValue = 0x00,
    Bool = 0x01,
    ArrayI8 = 0x02,
    ArrayI16 = 0x03,
    ArrayI32 = 0x04,
    ArrayI64 = 0x05,
    ArrayF32 = 0x06,
    ArrayF64 = 0x07,
    Integer = 0x08,
    Float = 0x09,
    Double = 0x0A,
    String = 0x0B,
    ArrayString = 0x0C,
    Method = 0x0D,
    GeneratorMethod = 0x0E,
    Accessor = 0x0F,
    NullValue = 0x10,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    String(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    pub tag: LiteralTag,
    pub value: LiteralValue,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiteralArray {
    pub literals: Vec<Literal>,
}

/// Root of the parsed unit.
///
/// Ordered containers keep every downstream walk deterministic: two
/// assemblies of the same source produce byte-identical output.
#[derive(Debug)]
pub struct Program {
    pub lang: Language,
    pub record_table: BTreeMap<String, Record>,
    pub function_table: BTreeMap<String, Function>,
    pub literalarray_table: BTreeMap<String, LiteralArray>,
    pub strings: BTreeSet<String>,
    pub array_types: BTreeSet<Type>,
}

impl Default for Program {
    fn default() -> Self {
        Self {
            lang: Language::PandaAssembly,
            record_table: BTreeMap::new(),
            function_table: BTreeMap::new(),
            literalarray_table: BTreeMap::new(),
            strings: BTreeSet::new(),
            array_types: BTreeSet::new(),
        }
    }
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ins_flags_default_to_invalid() {
        let ins = Ins::default();
        assert!(!ins.is_jump());
        assert!(!ins.can_throw());
        assert_eq!(ins.def(), None);
        assert!(ins.uses().is_empty());
        assert_eq!(ins.max_reg_encoding_width(), 0);
    }

    #[test]
    fn test_ins_def_and_uses() {
        let mov = Ins {
            opcode: Some(Opcode::Mov),
            regs: vec![0, 1],
            ..Default::default()
        };
        assert_eq!(mov.def(), Some(0));
        assert_eq!(mov.uses(), vec![1]);

        let lda = Ins {
            opcode: Some(Opcode::Lda),
            regs: vec![3],
            ..Default::default()
        };
        assert_eq!(lda.def(), Some(ACCUMULATOR));
        assert_eq!(lda.uses(), vec![3]);

        let add2 = Ins {
            opcode: Some(Opcode::Add2),
            regs: vec![5],
            ..Default::default()
        };
        assert_eq!(add2.uses(), vec![ACCUMULATOR, 5]);
    }

    #[test]
    fn test_ins_register_width_check() {
        let mut mov = Ins {
            opcode: Some(Opcode::Mov),
            regs: vec![15, 15],
            ..Default::default()
        };
        assert!(mov.is_valid_to_emit());
        mov.regs[1] = 16;
        assert!(!mov.is_valid_to_emit());
    }

    #[test]
    fn test_record_name_conflict() {
        let rec = Record::new("i32", Language::PandaAssembly);
        assert!(rec.conflict);
        let rec = Record::new("MyRecord", Language::PandaAssembly);
        assert!(!rec.conflict);
    }

    #[test]
    fn test_function_parameter_registers() {
        let mut func = Function::new("f", Language::PandaAssembly);
        func.regs_num = 2;
        assert!(!func.is_parameter(1));
        assert!(func.is_parameter(2));
        assert!(func.is_parameter(3));
    }
}
