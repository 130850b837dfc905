//! Typed items of the binary container.
//!
//! Items live in one arena owned by the container; cross-references are
//! arena indices. Each item carries the bookkeeping the layout and index
//! passes need: its final offset, an emission flag, a serial order index, a
//! reference count (line-number programs) and the per-scope 16-bit index
//! assignments handed out by the index section.

use crate::types::TypeId;

/// Arena index of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub u32);

impl ItemId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Pool a referenceable item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    None,
    Class,
    Method,
    Field,
    Proto,
    LineNumberProg,
}

impl IndexType {
    /// Position of the 16-bit pools inside an index header.
    pub fn slot(&self) -> Option<usize> {
        match self {
            IndexType::Class => Some(0),
            IndexType::Method => Some(1),
            IndexType::Field => Some(2),
            IndexType::Proto => Some(3),
            _ => None,
        }
    }
}

/// One `(scope, index)` pair: the item is addressed by `index` from any item
/// whose offset falls inside `[start, end)`.
#[derive(Debug, Clone)]
pub struct IndexAssignment {
    pub start: ItemId,
    pub end: ItemId,
    pub index: u16,
}

// Tags of the optional tagged blocks inside class, field and method items.
pub const TAG_NOTHING: u8 = 0;
pub const TAG_SOURCE_LANG: u8 = 1;
pub const TAG_SOURCE_FILE: u8 = 2;
pub const TAG_INTERFACE: u8 = 3;
pub const TAG_RUNTIME_ANNOTATION: u8 = 4;
pub const TAG_ANNOTATION: u8 = 5;
pub const TAG_RUNTIME_TYPE_ANNOTATION: u8 = 6;
pub const TAG_TYPE_ANNOTATION: u8 = 7;
pub const TAG_VALUE: u8 = 1;
pub const TAG_CODE: u8 = 1;
pub const TAG_METHOD_SOURCE_LANG: u8 = 2;
pub const TAG_DEBUG_INFO: u8 = 3;
pub const TAG_RUNTIME_PARAM_ANNOTATION: u8 = 8;
pub const TAG_PARAM_ANNOTATION: u8 = 9;

/// Annotation lists shared by classes, fields, methods and parameters.
#[derive(Debug, Default, Clone)]
pub struct AnnotationLists {
    pub runtime_annotations: Vec<ItemId>,
    pub annotations: Vec<ItemId>,
    pub runtime_type_annotations: Vec<ItemId>,
    pub type_annotations: Vec<ItemId>,
}

#[derive(Debug)]
pub struct ClassData {
    pub name_item: ItemId,
    pub access_flags: u32,
    pub super_class: Option<ItemId>,
    pub interfaces: Vec<ItemId>,
    pub source_lang: Option<u8>,
    pub source_file: Option<ItemId>,
    pub ann: AnnotationLists,
    /// Owned fields and methods, written inline after the class header.
    pub fields: Vec<ItemId>,
    pub methods: Vec<ItemId>,
}

#[derive(Debug)]
pub struct FieldData {
    pub class: ItemId,
    pub name_item: ItemId,
    pub type_item: ItemId,
    pub access_flags: u32,
    pub value: Option<ItemId>,
    pub ann: AnnotationLists,
}

/// One formal parameter of a method, carrying its per-parameter annotation
/// lists.
#[derive(Debug)]
pub struct MethodParam {
    pub type_item: ItemId,
    pub ann: AnnotationLists,
}

impl MethodParam {
    pub fn new(type_item: ItemId) -> Self {
        Self {
            type_item,
            ann: AnnotationLists::default(),
        }
    }
}

#[derive(Debug)]
pub struct MethodData {
    pub class: ItemId,
    pub name_item: ItemId,
    pub proto: ItemId,
    pub access_flags: u32,
    pub params: Vec<MethodParam>,
    pub source_lang: Option<u8>,
    pub code: Option<ItemId>,
    pub debug_info: Option<ItemId>,
    pub ann: AnnotationLists,
    pub runtime_param_annotations: Option<ItemId>,
    pub param_annotations: Option<ItemId>,
    /// Items the bytecode references through 16-bit scope indexes.
    pub index_deps: Vec<ItemId>,
}

#[derive(Debug)]
pub struct ProtoData {
    pub ret_type: ItemId,
    pub params: Vec<ItemId>,
}

#[derive(Debug, Clone)]
pub struct CatchBlockEntry {
    pub method: ItemId,
    /// `None` encodes a catch-all handler.
    pub class: Option<ItemId>,
    pub handler_pc: u32,
    pub code_size: u32,
}

#[derive(Debug, Clone)]
pub struct TryBlock {
    pub start_pc: u32,
    pub length: u32,
    pub catch_blocks: Vec<CatchBlockEntry>,
}

#[derive(Debug, Default)]
pub struct CodeData {
    pub num_vregs: u32,
    pub num_args: u32,
    pub num_instructions: u32,
    pub instructions: Vec<u8>,
    pub try_blocks: Vec<TryBlock>,
}

#[derive(Debug)]
pub struct DebugInfoData {
    pub line_number_program: ItemId,
    pub line_start: u32,
    /// One slot per proto parameter; `None` writes a zero name reference.
    pub parameters: Vec<Option<ItemId>>,
    pub constant_pool: Vec<u8>,
}

#[derive(Debug)]
pub struct AnnotationElem {
    pub name_item: ItemId,
    pub value: ItemId,
}

#[derive(Debug)]
pub struct AnnotationItemData {
    pub class: ItemId,
    pub elements: Vec<AnnotationElem>,
    pub tags: Vec<u8>,
}

/// Payload of a scalar value item. Floats keep their bit patterns so the
/// interner can distinguish `+0.0`, `-0.0` and NaN payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValuePayload {
    Integer(u32),
    Long(u64),
    Float(u32),
    Double(u64),
    Id(ItemId),
}

impl ValuePayload {
    pub fn width(&self) -> usize {
        match self {
            ValuePayload::Integer(_) | ValuePayload::Float(_) | ValuePayload::Id(_) => 4,
            ValuePayload::Long(_) | ValuePayload::Double(_) => 8,
        }
    }
}

#[derive(Debug)]
pub struct ArrayValueData {
    pub component_width: usize,
    pub values: Vec<ValuePayload>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralPayload {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    StringRef(ItemId),
    MethodRef(ItemId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiteralEntry {
    pub tag: u8,
    pub payload: LiteralPayload,
}

#[derive(Debug, Default)]
pub struct LiteralArrayData {
    pub literals: Vec<LiteralEntry>,
}

#[derive(Debug)]
pub enum ItemKind {
    /// Not emitted; type references encode the primitive id directly.
    PrimitiveType(TypeId),
    String(String),
    Class(ClassData),
    ForeignClass { name_item: ItemId },
    Field(FieldData),
    ForeignField { class: ItemId, name_item: ItemId, type_item: ItemId },
    Method(MethodData),
    ForeignMethod { class: ItemId, name_item: ItemId, proto: ItemId, access_flags: u32 },
    Proto(ProtoData),
    Code(CodeData),
    DebugInfo(DebugInfoData),
    LineNumberProgram(Vec<u8>),
    Annotation(AnnotationItemData),
    ScalarValue(ValuePayload),
    ArrayValue(ArrayValueData),
    LiteralArray(LiteralArrayData),
    MethodHandle { kind: u8, target: ItemId },
    /// Per-parameter annotation table of one method (runtime or not).
    ParamAnnotations { method: ItemId, runtime: bool },
    /// Sentinel closing the last index scope; its offset is the file size.
    End,
}

#[derive(Debug)]
pub struct Item {
    pub kind: ItemKind,
    pub offset: u32,
    pub needs_emit: bool,
    pub order_index: u32,
    pub ref_count: u32,
    pub indexes: Vec<IndexAssignment>,
}

impl Item {
    pub fn new(kind: ItemKind) -> Self {
        let needs_emit = !matches!(kind, ItemKind::PrimitiveType(_) | ItemKind::End);
        Self {
            kind,
            offset: 0,
            needs_emit,
            order_index: 0,
            ref_count: 1,
            indexes: Vec::new(),
        }
    }

    pub fn alignment(&self) -> usize {
        match &self.kind {
            ItemKind::String(_)
            | ItemKind::DebugInfo(_)
            | ItemKind::LineNumberProgram(_)
            | ItemKind::PrimitiveType(_)
            | ItemKind::End => 1,
            ItemKind::Proto(_) => 2,
            _ => 4,
        }
    }

    pub fn is_foreign(&self) -> bool {
        matches!(
            self.kind,
            ItemKind::ForeignClass { .. }
                | ItemKind::ForeignField { .. }
                | ItemKind::ForeignMethod { .. }
        )
    }

    pub fn index_type(&self) -> IndexType {
        match &self.kind {
            ItemKind::Class(_) | ItemKind::ForeignClass { .. } => IndexType::Class,
            ItemKind::Method(_) | ItemKind::ForeignMethod { .. } => IndexType::Method,
            ItemKind::Field(_) | ItemKind::ForeignField { .. } => IndexType::Field,
            ItemKind::Proto(_) => IndexType::Proto,
            ItemKind::LineNumberProgram(_) => IndexType::LineNumberProg,
            _ => IndexType::None,
        }
    }

    /// Stat-map key; doubles as a display name in logs.
    pub fn name(&self) -> &'static str {
        match &self.kind {
            ItemKind::PrimitiveType(_) => "primitive_type_item",
            ItemKind::String(_) => "string_item",
            ItemKind::Class(_) => "class_item",
            ItemKind::ForeignClass { .. } => "foreign_class_item",
            ItemKind::Field(_) => "field_item",
            ItemKind::ForeignField { .. } => "foreign_field_item",
            ItemKind::Method(_) => "method_item",
            ItemKind::ForeignMethod { .. } => "foreign_method_item",
            ItemKind::Proto(_) => "proto_item",
            ItemKind::Code(_) => "code_item",
            ItemKind::DebugInfo(_) => "debug_info_item",
            ItemKind::LineNumberProgram(_) => "line_number_program_item",
            ItemKind::Annotation(_) => "annotation_item",
            ItemKind::ScalarValue(_) => "value_item",
            ItemKind::ArrayValue(_) => "value_item",
            ItemKind::LiteralArray(_) => "literal_array_item",
            ItemKind::MethodHandle { .. } => "method_handle_item",
            ItemKind::ParamAnnotations { .. } => "param_annotations_item",
            ItemKind::End => "end_item",
        }
    }

    /// Finds the 16-bit index this item is addressed by from an item placed
    /// at `from_offset`. Scope bounds are resolved lazily through the arena.
    pub fn index_for_offset(
        &self,
        from_offset: u32,
        offset_of: impl Fn(ItemId) -> u32,
    ) -> Option<u16> {
        self.indexes
            .iter()
            .find(|a| offset_of(a.start) <= from_offset && from_offset < offset_of(a.end))
            .map(|a| a.index)
    }

    pub fn clear_indexes(&mut self) {
        self.indexes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_emit_defaults() {
        assert!(!Item::new(ItemKind::PrimitiveType(TypeId::I32)).needs_emit);
        assert!(!Item::new(ItemKind::End).needs_emit);
        assert!(Item::new(ItemKind::String("s".into())).needs_emit);
    }

    #[test]
    fn test_index_types() {
        assert_eq!(
            Item::new(ItemKind::ForeignClass { name_item: ItemId(0) }).index_type(),
            IndexType::Class
        );
        assert_eq!(
            Item::new(ItemKind::LineNumberProgram(vec![])).index_type(),
            IndexType::LineNumberProg
        );
        assert_eq!(Item::new(ItemKind::String("x".into())).index_type(), IndexType::None);
    }

    #[test]
    fn test_index_lookup_by_scope() {
        let mut item = Item::new(ItemKind::String("s".into()));
        item.indexes.push(IndexAssignment {
            start: ItemId(1),
            end: ItemId(2),
            index: 7,
        });
        let offsets = |id: ItemId| match id {
            ItemId(1) => 100,
            ItemId(2) => 200,
            _ => 0,
        };
        assert_eq!(item.index_for_offset(150, offsets), Some(7));
        assert_eq!(item.index_for_offset(200, offsets), None);
        assert_eq!(item.index_for_offset(50, offsets), None);
    }

    #[test]
    fn test_value_payload_width() {
        assert_eq!(ValuePayload::Integer(1).width(), 4);
        assert_eq!(ValuePayload::Double(0).width(), 8);
        assert_eq!(ValuePayload::Id(ItemId(3)).width(), 4);
    }
}
