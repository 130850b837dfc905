//! Materializes a parsed [`Program`] as binary items and emits bytecode.
//!
//! The phases run in a fixed order: primitive types, strings, array types,
//! records, functions, literal arrays, record annotations, method
//! debug-info/annotations, layout, maps, then per-method bytecode. Strings
//! and every item bytecode bakes a 32-bit offset to are created before the
//! variable-sized tail (annotations, code, debug info), so the re-layout
//! after deduplication never invalidates encoded offsets.

pub mod bytecode;

use std::collections::{BTreeMap, HashMap};

use log::{debug, info};

use crate::annotation::{AnnotationData, ScalarValue, Value, ValueKind};
use crate::error::Error;
use crate::file::debug::LineNumberProgramWriter;
use crate::file::*;
use crate::mangling::demangle_name;
use crate::meta::{ACC_ENUM, ACC_PUBLIC, ACC_STATIC};
use crate::program::{Function, Ins, LiteralValue, MethodHandleKind, Program, Record};
use crate::types::{Type, TypeId};
use crate::Result;

use bytecode::{BcLabel, BytecodeEmitter};

/// Reverse maps from emitted file offsets back to assembly names, for
/// debugging tools.
#[derive(Debug, Default)]
pub struct PandaFileToAsmMaps {
    pub methods: HashMap<u32, String>,
    pub fields: HashMap<u32, String>,
    pub classes: HashMap<u32, String>,
    pub strings: HashMap<u32, String>,
    pub literalarrays: HashMap<u32, String>,
}

/// Name-to-item maps accumulated while walking the program.
#[derive(Debug, Default)]
struct AsmEntityCollections {
    method_items: HashMap<String, ItemId>,
    field_items: HashMap<String, ItemId>,
    class_items: HashMap<String, ItemId>,
    string_items: HashMap<String, ItemId>,
    literalarray_items: HashMap<String, ItemId>,
}

type PrimitiveMap = HashMap<TypeId, ItemId>;

pub struct AsmEmitter;

impl AsmEmitter {
    /// Walks the program and fills the container; on success the container
    /// is ready to be written.
    pub fn emit(
        container: &mut ItemContainer,
        program: &Program,
        maps: Option<&mut PandaFileToAsmMaps>,
        emit_debug_info: bool,
    ) -> Result<()> {
        let primitive_types = create_primitive_types(container);
        let mut entities = AsmEntityCollections::default();

        make_string_items(container, program, &mut entities);
        make_array_type_items(container, program, &mut entities);
        make_record_items(container, program, &mut entities, &primitive_types)?;
        make_function_items(container, program, &mut entities, &primitive_types, emit_debug_info)?;
        make_literal_items(container, program, &mut entities)?;
        make_record_annotations(container, program, &entities)?;
        make_function_debug_info_and_annotations(container, program, &entities, emit_debug_info)?;

        container.compute_layout();

        if let Some(maps) = maps {
            fill_maps(container, maps, &entities);
        }

        emit_functions(container, program, &entities, emit_debug_info)?;

        Ok(())
    }

    /// Emits through an arbitrary writer; `stat` receives the per-section
    /// size map when requested.
    pub fn emit_to_writer(
        writer: &mut dyn Writer,
        program: &Program,
        stat: Option<&mut BTreeMap<String, usize>>,
        maps: Option<&mut PandaFileToAsmMaps>,
        emit_debug_info: bool,
    ) -> Result<()> {
        let mut container = ItemContainer::new();
        Self::emit(&mut container, program, maps, emit_debug_info)?;

        if let Some(stat) = stat {
            *stat = container.stat();
        }

        container.write(writer)
    }

    pub fn emit_to_file(
        filename: &str,
        program: &Program,
        stat: Option<&mut BTreeMap<String, usize>>,
        maps: Option<&mut PandaFileToAsmMaps>,
        emit_debug_info: bool,
    ) -> Result<()> {
        let mut writer = FileWriter::new(filename)
            .map_err(|e| Error::emitter(format!("Unable to open {} for writing: {}", filename, e)))?;
        Self::emit_to_writer(&mut writer, program, stat, maps, emit_debug_info)
    }

    /// In-memory emission, mostly for tests and tooling.
    pub fn emit_to_memory(
        program: &Program,
        maps: Option<&mut PandaFileToAsmMaps>,
    ) -> Result<Vec<u8>> {
        let mut writer = MemoryWriter::new();
        Self::emit_to_writer(&mut writer, program, None, maps, true)?;
        Ok(writer.into_data())
    }
}

pub fn get_owner_name(name: &str) -> &str {
    match name.rfind('.') {
        Some(pos) => &name[..pos],
        None => "",
    }
}

pub fn get_item_name(name: &str) -> &str {
    match name.rfind('.') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

// ----------------------------------------------------------------------
// phase 1-3: primitives, strings, array types
// ----------------------------------------------------------------------

fn create_primitive_types(container: &mut ItemContainer) -> PrimitiveMap {
    TypeId::PRIMITIVES
        .iter()
        .map(|&id| (id, container.create_item(ItemKind::PrimitiveType(id))))
        .collect()
}

fn make_string_items(
    container: &mut ItemContainer,
    program: &Program,
    entities: &mut AsmEntityCollections,
) {
    for s in &program.strings {
        let item = container.get_or_create_string(s);
        entities.string_items.insert(s.clone(), item);
    }
}

fn make_array_type_items(
    container: &mut ItemContainer,
    program: &Program,
    entities: &mut AsmEntityCollections,
) {
    for t in &program.array_types {
        let item = container.get_or_create_foreign_class(&t.descriptor(false));
        entities.class_items.insert(t.name().to_string(), item);
    }
}

fn get_type_item(
    container: &mut ItemContainer,
    primitive_types: &PrimitiveMap,
    type_: &Type,
    program: &Program,
) -> Option<ItemId> {
    if !type_.is_object() {
        return primitive_types.get(&type_.id()).copied();
    }

    if type_.is_array() {
        return Some(container.get_or_create_foreign_class(&type_.descriptor(false)));
    }

    let rec = program.record_table.get(type_.name())?;
    let descriptor = Type::from_name(type_.name()).descriptor(rec.conflict);
    if rec.metadata.is_foreign() {
        Some(container.get_or_create_foreign_class(&descriptor))
    } else {
        Some(container.get_or_create_class(&descriptor))
    }
}

// ----------------------------------------------------------------------
// phase 4: records
// ----------------------------------------------------------------------

fn make_record_items(
    container: &mut ItemContainer,
    program: &Program,
    entities: &mut AsmEntityCollections,
    primitive_types: &PrimitiveMap,
) -> Result<()> {
    for (name, rec) in &program.record_table {
        if rec.metadata.is_foreign() {
            handle_record_as_foreign(container, program, entities, primitive_types, name, rec)?;
        } else {
            handle_record(container, program, entities, primitive_types, name, rec)?;
        }
    }
    Ok(())
}

fn handle_record_as_foreign(
    container: &mut ItemContainer,
    program: &Program,
    entities: &mut AsmEntityCollections,
    primitive_types: &PrimitiveMap,
    name: &str,
    rec: &Record,
) -> Result<()> {
    let record_type = Type::from_name(name);
    let foreign_record = container.get_or_create_foreign_class(&record_type.descriptor(rec.conflict));
    entities.class_items.insert(name.to_string(), foreign_record);

    for f in &rec.field_list {
        if !f.metadata.is_foreign() {
            return Err(Error::emitter(format!(
                "External record {} has a non-external field {}",
                name, f.name
            )));
        }
        let field_name = container.get_or_create_string(demangle_name(&f.name));
        let full_field_name = format!("{}.{}", name, f.name);
        let type_item = get_type_item(container, primitive_types, &f.type_, program)
            .ok_or_else(|| Error::emitter(format!("Field {} has undefined type", full_field_name)))?;
        let field = container.create_item(ItemKind::ForeignField {
            class: foreign_record,
            name_item: field_name,
            type_item,
        });
        entities.field_items.insert(full_field_name, field);
    }
    Ok(())
}

fn handle_record(
    container: &mut ItemContainer,
    program: &Program,
    entities: &mut AsmEntityCollections,
    primitive_types: &PrimitiveMap,
    name: &str,
    rec: &Record,
) -> Result<()> {
    let record_type = Type::from_name(name);
    let record = container.get_or_create_class(&record_type.descriptor(rec.conflict));
    entities.class_items.insert(name.to_string(), record);

    let source_file = if rec.source_file.is_empty() {
        None
    } else {
        Some(container.get_or_create_string(&rec.source_file))
    };

    if let ItemKind::Class(data) = &mut container.item_mut(record).kind {
        data.access_flags = rec.metadata.access_flags();
        data.source_lang = Some(rec.language.value());
        data.source_file = source_file;
    }

    handle_base_record(container, program, name, rec, record)?;
    handle_interfaces(container, program, name, rec, record)?;
    handle_fields(container, program, entities, primitive_types, name, rec, record)?;

    Ok(())
}

fn class_item_for_record(
    container: &mut ItemContainer,
    program: &Program,
    name: &str,
) -> Option<ItemId> {
    let rec = program.record_table.get(name)?;
    let base_type = Type::from_name(name);
    let descriptor = base_type.descriptor(rec.conflict);
    if rec.metadata.is_foreign() {
        Some(container.get_or_create_foreign_class(&descriptor))
    } else {
        Some(container.get_or_create_class(&descriptor))
    }
}

fn handle_base_record(
    container: &mut ItemContainer,
    program: &Program,
    name: &str,
    rec: &Record,
    record: ItemId,
) -> Result<()> {
    let base_name = match rec.metadata.base() {
        Some(base) if !base.is_empty() => base.to_string(),
        _ => return Ok(()),
    };

    let base = class_item_for_record(container, program, &base_name).ok_or_else(|| {
        Error::emitter(format!("Base record {} is not defined for record {}", base_name, name))
    })?;

    if let ItemKind::Class(data) = &mut container.item_mut(record).kind {
        data.super_class = Some(base);
    }
    Ok(())
}

fn handle_interfaces(
    container: &mut ItemContainer,
    program: &Program,
    name: &str,
    rec: &Record,
    record: ItemId,
) -> Result<()> {
    let ifaces: Vec<String> = rec.metadata.interfaces().to_vec();
    for iface_name in ifaces {
        let iface = class_item_for_record(container, program, &iface_name).ok_or_else(|| {
            Error::emitter(format!(
                "Interface record {} is not defined for record {}",
                iface_name, name
            ))
        })?;
        if let ItemKind::Class(data) = &mut container.item_mut(record).kind {
            data.interfaces.push(iface);
        }
    }
    Ok(())
}

fn handle_fields(
    container: &mut ItemContainer,
    program: &Program,
    entities: &mut AsmEntityCollections,
    primitive_types: &PrimitiveMap,
    name: &str,
    rec: &Record,
    record: ItemId,
) -> Result<()> {
    for f in &rec.field_list {
        let field_name = container.get_or_create_string(demangle_name(&f.name));
        let full_field_name = format!("{}.{}", name, f.name);
        let type_item = get_type_item(container, primitive_types, &f.type_, program)
            .ok_or_else(|| Error::emitter(format!("Field {} has undefined type", full_field_name)))?;

        let field = if f.metadata.is_foreign() {
            container.create_item(ItemKind::ForeignField {
                class: record,
                name_item: field_name,
                type_item,
            })
        } else {
            container.add_field(
                record,
                FieldData {
                    class: record,
                    name_item: field_name,
                    type_item,
                    access_flags: f.metadata.access_flags(),
                    value: None,
                    ann: AnnotationLists::default(),
                },
            )
        };
        entities.field_items.insert(full_field_name, field);
    }
    Ok(())
}

// ----------------------------------------------------------------------
// phase 5: functions
// ----------------------------------------------------------------------

fn get_method_name(container: &mut ItemContainer, func: &Function, name: &str) -> ItemId {
    if func.metadata.is_ctor() {
        return container.get_or_create_string(func.language.ctor_name());
    }
    if func.metadata.is_cctor() {
        return container.get_or_create_string(func.language.cctor_name());
    }
    container.get_or_create_string(get_item_name(name))
}

/// Resolves the class (or foreign class) a function is bound to.
fn handle_record_owner(
    container: &mut ItemContainer,
    program: &Program,
    name: &str,
    record_owner_name: &str,
) -> Result<(Option<ItemId>, Option<ItemId>)> {
    if record_owner_name.is_empty() {
        let area = container.get_or_create_global_class();
        if let ItemKind::Class(data) = &mut container.item_mut(area).kind {
            data.access_flags = ACC_PUBLIC;
            data.source_lang = Some(program.lang.value());
        }
        return Ok((Some(area), None));
    }

    let rec = program.record_table.get(record_owner_name).ok_or_else(|| {
        Error::emitter(format!(
            "Function {} is bound to undefined record {}",
            name, record_owner_name
        ))
    })?;

    let owner_type = Type::from_name(record_owner_name);
    let descriptor = owner_type.descriptor(rec.conflict);
    if rec.metadata.is_foreign() {
        Ok((None, Some(container.get_or_create_foreign_class(&descriptor))))
    } else {
        let area = container.get_or_create_class(&descriptor);
        if let ItemKind::Class(data) = &mut container.item_mut(area).kind {
            data.access_flags = rec.metadata.access_flags();
        }
        Ok((Some(area), None))
    }
}

fn handle_function_local_variables(
    container: &mut ItemContainer,
    func: &Function,
    name: &str,
) -> Result<()> {
    for v in &func.local_variable_debug {
        if v.name.is_empty() {
            return Err(Error::emitter(format!(
                "Function '{}' has an empty local variable name",
                name
            )));
        }
        if v.signature.is_empty() {
            return Err(Error::emitter(format!(
                "Function '{}' has an empty local variable signature",
                name
            )));
        }
        container.get_or_create_string(&v.name);
        // signature strings are only needed for true locals
        if func.is_parameter(v.reg) {
            continue;
        }
        container.get_or_create_string(&v.signature);
        if !v.signature_type.is_empty() {
            container.get_or_create_string(&v.signature_type);
        }
    }
    Ok(())
}

fn make_function_items(
    container: &mut ItemContainer,
    program: &Program,
    entities: &mut AsmEntityCollections,
    primitive_types: &PrimitiveMap,
    emit_debug_info: bool,
) -> Result<()> {
    for (mangled_name, func) in &program.function_table {
        let name = demangle_name(mangled_name);
        let method_name = get_method_name(container, func, name);

        let record_owner_name = get_owner_name(name).to_string();
        let (area, foreign_area) =
            handle_record_owner(container, program, name, &record_owner_name)?;

        let mut access_flags = func.metadata.access_flags();
        if func.params.is_empty() || func.params[0].type_.name() != record_owner_name {
            access_flags |= ACC_STATIC;
        }
        let is_static = (access_flags & ACC_STATIC) != 0;
        let skip = if is_static { 0 } else { 1 };

        let mut param_types = Vec::new();
        for (i, p) in func.params.iter().enumerate().skip(skip) {
            let type_item = get_type_item(container, primitive_types, &p.type_, program)
                .ok_or_else(|| {
                    Error::emitter(format!(
                        "Argument {} of function {} has undefined type",
                        i, name
                    ))
                })?;
            param_types.push(type_item);
        }

        if emit_debug_info {
            handle_function_local_variables(container, func, name)?;
        }

        let type_item = get_type_item(container, primitive_types, &func.return_type, program)
            .ok_or_else(|| Error::emitter(format!("Function {} has undefined return type", name)))?;

        let proto = container.get_or_create_proto(type_item, &param_types);
        let params: Vec<MethodParam> = param_types.iter().map(|&t| MethodParam::new(t)).collect();

        let method = match (area, foreign_area) {
            (Some(area), None) => {
                if func.metadata.is_foreign() {
                    container.create_item(ItemKind::ForeignMethod {
                        class: area,
                        name_item: method_name,
                        proto,
                        access_flags,
                    })
                } else {
                    container.add_method(
                        area,
                        MethodData {
                            class: area,
                            name_item: method_name,
                            proto,
                            access_flags,
                            params,
                            source_lang: None,
                            code: None,
                            debug_info: None,
                            ann: AnnotationLists::default(),
                            runtime_param_annotations: None,
                            param_annotations: None,
                            index_deps: Vec::new(),
                        },
                    )
                }
            }
            (None, Some(foreign_area)) => {
                if !func.metadata.is_foreign() {
                    return Err(Error::emitter(format!(
                        "Non-external function {} is bound to external record",
                        name
                    )));
                }
                container.create_item(ItemKind::ForeignMethod {
                    class: foreign_area,
                    name_item: method_name,
                    proto,
                    access_flags,
                })
            }
            _ => unreachable!(),
        };
        entities.method_items.insert(mangled_name.clone(), method);

        if !func.metadata.is_foreign() && func.metadata.has_implementation() {
            if !func.source_file.is_empty() {
                container.get_or_create_string(&func.source_file);
            }
            if !func.source_code.is_empty() {
                container.get_or_create_string(&func.source_code);
            }
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------
// phase 6: literal arrays
// ----------------------------------------------------------------------

fn make_literal_items(
    container: &mut ItemContainer,
    program: &Program,
    entities: &mut AsmEntityCollections,
) -> Result<()> {
    for (id, array) in &program.literalarray_table {
        let item = container.get_or_create_literal_array(id);
        let mut literals = Vec::new();

        for literal in &array.literals {
            let tag = literal.tag as u8;
            let payload = match &literal.value {
                LiteralValue::Bool(v) => LiteralPayload::U8(*v as u8),
                LiteralValue::U8(v) => LiteralPayload::U8(*v),
                LiteralValue::U16(v) => LiteralPayload::U16(*v),
                LiteralValue::U32(v) => LiteralPayload::U32(*v),
                LiteralValue::U64(v) => LiteralPayload::U64(*v),
                LiteralValue::F32(v) => LiteralPayload::U32(v.to_bits()),
                LiteralValue::F64(v) => LiteralPayload::U64(v.to_bits()),
                LiteralValue::String(s) => {
                    if literal.tag == crate::program::LiteralTag::Method
                        || literal.tag == crate::program::LiteralTag::GeneratorMethod
                    {
                        let method = entities
                            .method_items
                            .get(s)
                            .copied()
                            .or_else(|| {
                                // method literals may carry the unmangled name
                                entities
                                    .method_items
                                    .iter()
                                    .filter(|(key, _)| demangle_name(key) == s.as_str())
                                    .min_by(|a, b| a.0.cmp(b.0))
                                    .map(|(_, &item)| item)
                            })
                            .ok_or_else(|| {
                                Error::emitter(format!("Incorrect value: function {} not found", s))
                            })?;
                        LiteralPayload::MethodRef(method)
                    } else {
                        let string_item = container.get_or_create_string(s);
                        LiteralPayload::StringRef(string_item)
                    }
                }
            };
            literals.push(LiteralEntry { tag, payload });
        }

        if let ItemKind::LiteralArray(data) = &mut container.item_mut(item).kind {
            data.literals = literals;
        }
        entities.literalarray_items.insert(id.clone(), item);
    }
    Ok(())
}

// ----------------------------------------------------------------------
// value and annotation items
// ----------------------------------------------------------------------

fn check_value_type(value_kind: ValueKind, type_: &Type, program: &Program) -> Result<()> {
    let value_type_id = match value_kind {
        ValueKind::U1 => TypeId::U1,
        ValueKind::I8 => TypeId::I8,
        ValueKind::U8 => TypeId::U8,
        ValueKind::I16 => TypeId::I16,
        ValueKind::U16 => TypeId::U16,
        ValueKind::I32 => TypeId::I32,
        ValueKind::U32 => TypeId::U32,
        ValueKind::I64 => TypeId::I64,
        ValueKind::U64 => TypeId::U64,
        ValueKind::F32 => TypeId::F32,
        ValueKind::F64 => TypeId::F64,
        ValueKind::Void => TypeId::Void,
        _ => TypeId::Reference,
    };

    if value_type_id != type_.id() {
        return Err(Error::emitter(format!(
            "Inconsistent element ({}) and function's return type ({})",
            value_kind.keyword(),
            type_.name()
        )));
    }

    match value_kind {
        ValueKind::String | ValueKind::Record | ValueKind::Annotation | ValueKind::Enum => {
            let record = program.record_table.get(type_.name()).ok_or_else(|| {
                Error::emitter(format!("Record {} not found", type_.name()))
            })?;

            if value_kind == ValueKind::Annotation
                && !record.metadata.is_annotation()
                && !record.metadata.is_runtime_annotation()
                && !record.metadata.is_runtime_type_annotation()
                && !record.metadata.is_type_annotation()
            {
                return Err(Error::emitter(format!(
                    "Record {} isn't annotation",
                    type_.name()
                )));
            }

            if value_kind == ValueKind::Enum && (record.metadata.access_flags() & ACC_ENUM) == 0 {
                return Err(Error::emitter(format!("Record {} isn't enum", type_.name())));
            }
        }
        ValueKind::Array => {
            if !type_.is_array() {
                return Err(Error::emitter(format!(
                    "Inconsistent element ({}) and function's return type ({})",
                    value_kind.keyword(),
                    type_.name()
                )));
            }
        }
        _ => {}
    }

    Ok(())
}

fn check_value_record_case(value: &ScalarValue, program: &Program) -> Result<()> {
    let t = match value {
        ScalarValue::Record(t) => t,
        _ => return Ok(()),
    };
    if !t.is_object() {
        return Ok(());
    }

    let found = if t.is_array() {
        program.array_types.contains(t)
    } else {
        program.record_table.contains_key(t.name())
    };

    if !found {
        return Err(Error::emitter(format!(
            "Incorrect value: record {} not found",
            t.name()
        )));
    }
    Ok(())
}

fn lookup_function<'a>(program: &'a Program, name: &str) -> Option<(&'a String, &'a Function)> {
    if let Some((key, func)) = program.function_table.get_key_value(name) {
        return Some((key, func));
    }
    program
        .function_table
        .iter()
        .find(|(key, _)| demangle_name(key) == name)
}

fn check_value_method_case(value: &ScalarValue, program: &Program) -> Result<()> {
    let name = match value.as_str() {
        Some(name) => name,
        None => return Ok(()),
    };
    if lookup_function(program, name).is_none() {
        return Err(Error::emitter(format!(
            "Incorrect value: function {} not found",
            name
        )));
    }
    Ok(())
}

fn check_value_enum_case(value: &ScalarValue, type_: &Type, program: &Program) -> Result<()> {
    let enum_value = match value.as_str() {
        Some(v) => v,
        None => return Ok(()),
    };
    let record_name = get_owner_name(enum_value);
    let field_name = get_item_name(enum_value);

    if record_name != type_.name() {
        return Err(Error::emitter(format!(
            "Incorrect value: Expected {} enum record",
            type_.name()
        )));
    }

    let record = &program.record_table[record_name];
    let field = record
        .field_list
        .iter()
        .find(|f| f.name == field_name)
        .ok_or_else(|| Error::emitter(format!("Incorrect value: Enum field {} not found", enum_value)))?;

    if (field.metadata.access_flags() & ACC_ENUM) == 0 {
        return Err(Error::emitter(format!(
            "Incorrect value: Field {} isn't enum",
            enum_value
        )));
    }
    Ok(())
}

fn check_value(value: &Value, type_: &Type, program: &Program) -> Result<()> {
    check_value_type(value.kind(), type_, program)
        .map_err(|e| Error::emitter(format!("Incorrect type: {}", e.message)))?;

    match value {
        Value::Scalar(scalar) => match scalar.kind() {
            ValueKind::Record => check_value_record_case(scalar, program),
            ValueKind::Method => check_value_method_case(scalar, program),
            ValueKind::Enum => check_value_enum_case(scalar, type_, program),
            _ => Ok(()),
        },
        Value::Array(array) => {
            let component_type = type_.component_type();
            if array.component_kind == ValueKind::Void && array.values.is_empty() {
                return Ok(());
            }
            check_value_type(array.component_kind, &component_type, program)
                .map_err(|e| Error::emitter(format!("Incorrect array's component type: {}", e.message)))?;
            for elem in &array.values {
                check_value(&Value::Scalar(elem.clone()), &component_type, program)
                    .map_err(|e| Error::emitter(format!("Incorrect array's element: {}", e.message)))?;
            }
            Ok(())
        }
    }
}

/// Item target of a reference-kind scalar (string, class, method, enum
/// field, nested annotation).
fn scalar_id_target(
    container: &mut ItemContainer,
    value: &ScalarValue,
    program: &Program,
    entities: &AsmEntityCollections,
) -> Result<ItemId> {
    match value {
        ScalarValue::String(s) => Ok(container.get_or_create_string(s)),
        ScalarValue::Record(t) => {
            if t.is_object() && !t.is_array() {
                entities
                    .class_items
                    .get(t.name())
                    .copied()
                    .ok_or_else(|| Error::emitter(format!("Record {} not found", t.name())))
            } else {
                Ok(container.get_or_create_foreign_class(&t.descriptor(false)))
            }
        }
        ScalarValue::Method(name) => {
            let (key, _) = lookup_function(program, name)
                .ok_or_else(|| Error::emitter(format!("Function {} not found", name)))?;
            entities
                .method_items
                .get(key)
                .copied()
                .ok_or_else(|| Error::emitter(format!("Function {} not found", name)))
        }
        ScalarValue::Enum(name) => entities
            .field_items
            .get(name.as_str())
            .copied()
            .ok_or_else(|| Error::emitter(format!("Enum field {} not found", name))),
        ScalarValue::Annotation(data) => create_annotation_item(container, data, program, entities),
        _ => Err(Error::emitter("Value has no item target")),
    }
}

fn scalar_payload(
    container: &mut ItemContainer,
    value: &ScalarValue,
    program: &Program,
    entities: &AsmEntityCollections,
) -> Result<ValuePayload> {
    Ok(match value {
        ScalarValue::U1(_)
        | ScalarValue::I8(_)
        | ScalarValue::U8(_)
        | ScalarValue::I16(_)
        | ScalarValue::U16(_)
        | ScalarValue::I32(_)
        | ScalarValue::U32(_)
        | ScalarValue::StringNullptr(_) => ValuePayload::Integer(value.bits_32()),
        ScalarValue::I64(_) | ScalarValue::U64(_) => ValuePayload::Long(value.bits_64()),
        ScalarValue::F32(v) => ValuePayload::Float(v.to_bits()),
        ScalarValue::F64(v) => ValuePayload::Double(v.to_bits()),
        _ => ValuePayload::Id(scalar_id_target(container, value, program, entities)?),
    })
}

fn create_scalar_value_item(
    container: &mut ItemContainer,
    value: &ScalarValue,
    program: &Program,
    entities: &AsmEntityCollections,
) -> Result<ItemId> {
    Ok(match scalar_payload(container, value, program, entities)? {
        ValuePayload::Integer(v) => container.get_or_create_integer_value(v),
        ValuePayload::Long(v) => container.get_or_create_long_value(v),
        ValuePayload::Float(bits) => container.get_or_create_float_value(f32::from_bits(bits)),
        ValuePayload::Double(bits) => container.get_or_create_double_value(f64::from_bits(bits)),
        ValuePayload::Id(target) => container.get_or_create_id_value(target),
    })
}

fn component_width(kind: ValueKind) -> usize {
    match kind {
        ValueKind::U1 | ValueKind::I8 | ValueKind::U8 => 1,
        ValueKind::I16 | ValueKind::U16 => 2,
        ValueKind::I64 | ValueKind::U64 | ValueKind::F64 => 8,
        _ => 4,
    }
}

fn create_value_item(
    container: &mut ItemContainer,
    value: &Value,
    program: &Program,
    entities: &AsmEntityCollections,
) -> Result<ItemId> {
    match value {
        Value::Array(array) => {
            let mut payloads = Vec::new();
            for elem in &array.values {
                payloads.push(scalar_payload(container, elem, program, entities)?);
            }
            Ok(container.create_item(ItemKind::ArrayValue(ArrayValueData {
                component_width: component_width(array.component_kind),
                values: payloads,
            })))
        }
        Value::Scalar(scalar) => create_scalar_value_item(container, scalar, program, entities),
    }
}

fn create_annotation_item(
    container: &mut ItemContainer,
    annotation: &AnnotationData,
    program: &Program,
    entities: &AsmEntityCollections,
) -> Result<ItemId> {
    let record_name = &annotation.record_name;
    let record = program
        .record_table
        .get(record_name)
        .ok_or_else(|| Error::emitter(format!("Record {} not found", record_name)))?;

    if !record.metadata.is_annotation() {
        return Err(Error::emitter(format!("Record {} isn't annotation", record_name)));
    }

    let mut elements = Vec::new();
    let mut tags = Vec::new();

    for element in &annotation.elements {
        let tag = element.value.tag_char();
        let function_name = format!("{}.{}", record.name, element.name);

        if record.has_implementation() {
            match lookup_function(program, &function_name) {
                None => {
                    // annotation schemas without element functions occur in
                    // the standard library definitions
                    info!("Function {} not found", function_name);
                }
                Some((_, function)) => {
                    check_value(&element.value, &function.return_type, program).map_err(|e| {
                        Error::emitter(format!(
                            "Incorrect annotation element {}: {}",
                            function_name, e.message
                        ))
                    })?;
                }
            }
        }

        let item = create_value_item(container, &element.value, program, entities).map_err(|e| {
            Error::emitter(format!(
                "Cannot create value item for annotation element {}: {}",
                function_name, e.message
            ))
        })?;

        let name_item = container.get_or_create_string(&element.name);
        elements.push(AnnotationElem {
            name_item,
            value: item,
        });
        tags.push(tag as u8);
    }

    let class = entities.class_items[record_name];
    Ok(container.create_item(ItemKind::Annotation(AnnotationItemData {
        class,
        elements,
        tags,
    })))
}

/// Creates a method-handle item targeting a field or a method, depending on
/// the handle kind.
pub fn create_method_handle_item(
    container: &mut ItemContainer,
    handle: &crate::program::MethodHandle,
    fields: &HashMap<String, ItemId>,
    methods: &HashMap<String, ItemId>,
) -> Result<ItemId> {
    let target = match handle.kind {
        MethodHandleKind::PutStatic
        | MethodHandleKind::GetStatic
        | MethodHandleKind::PutInstance
        | MethodHandleKind::GetInstance => fields.get(&handle.item_name),
        MethodHandleKind::InvokeStatic
        | MethodHandleKind::InvokeInstance
        | MethodHandleKind::InvokeConstructor
        | MethodHandleKind::InvokeDirect
        | MethodHandleKind::InvokeInterface => methods.get(&handle.item_name),
    }
    .copied()
    .ok_or_else(|| Error::emitter(format!("Method handle target {} not found", handle.item_name)))?;

    Ok(container.create_item(ItemKind::MethodHandle {
        kind: handle.kind as u8,
        target,
    }))
}

// ----------------------------------------------------------------------
// phase 7: record and field annotations
// ----------------------------------------------------------------------

/// Classifies each annotation by its record's metadata and appends it to
/// the right list of the owner.
fn build_annotation_lists(
    container: &mut ItemContainer,
    annotations: &[AnnotationData],
    program: &Program,
    entities: &AsmEntityCollections,
) -> Result<AnnotationLists> {
    let mut lists = AnnotationLists::default();

    for annotation in annotations {
        let item = create_annotation_item(container, annotation, program, entities)?;
        let record = &program.record_table[&annotation.record_name];
        if record.metadata.is_runtime_annotation() {
            lists.runtime_annotations.push(item);
        } else if record.metadata.is_annotation() {
            lists.annotations.push(item);
        } else if record.metadata.is_runtime_type_annotation() {
            lists.runtime_type_annotations.push(item);
        } else if record.metadata.is_type_annotation() {
            lists.type_annotations.push(item);
        }
    }

    Ok(lists)
}

fn append_lists(target: &mut AnnotationLists, extra: AnnotationLists) {
    target.runtime_annotations.extend(extra.runtime_annotations);
    target.annotations.extend(extra.annotations);
    target
        .runtime_type_annotations
        .extend(extra.runtime_type_annotations);
    target.type_annotations.extend(extra.type_annotations);
}

fn make_record_annotations(
    container: &mut ItemContainer,
    program: &Program,
    entities: &AsmEntityCollections,
) -> Result<()> {
    for (name, record) in &program.record_table {
        if record.metadata.is_foreign() {
            continue;
        }

        let class_item = entities.class_items[name];
        let lists =
            build_annotation_lists(container, record.metadata.annotations(), program, entities)
                .map_err(|e| {
                    Error::emitter(format!(
                        "Cannot emit annotations for record {}: {}",
                        record.name, e.message
                    ))
                })?;
        if let ItemKind::Class(data) = &mut container.item_mut(class_item).kind {
            append_lists(&mut data.ann, lists);
        }

        for field in &record.field_list {
            let field_name = format!("{}.{}", record.name, field.name);
            let field_item = entities.field_items[&field_name];
            let lists =
                build_annotation_lists(container, field.metadata.annotations(), program, entities)
                    .map_err(|e| {
                        Error::emitter(format!(
                            "Cannot emit annotations for field {}: {}",
                            field_name, e.message
                        ))
                    })?;

            let value_item = match field.metadata.value() {
                Some(value) => Some(create_value_item(
                    container,
                    &Value::Scalar(value.clone()),
                    program,
                    entities,
                )?),
                None => None,
            };

            if let ItemKind::Field(data) = &mut container.item_mut(field_item).kind {
                append_lists(&mut data.ann, lists);
                data.value = value_item;
            }
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------
// phase 8: method debug info and annotations
// ----------------------------------------------------------------------

fn set_code_and_debug_info(
    container: &mut ItemContainer,
    method: ItemId,
    func: &Function,
    emit_debug_info: bool,
) {
    let code = container.create_item(ItemKind::Code(CodeData::default()));
    if let ItemKind::Method(data) = &mut container.item_mut(method).kind {
        data.code = Some(code);
    }

    if !emit_debug_info && !func.can_throw() {
        return;
    }

    let line_number_program = container.create_line_number_program();

    let parameters = if emit_debug_info {
        func.local_variable_debug
            .iter()
            .filter(|v| func.is_parameter(v.reg))
            .map(|v| Some(container.get_or_create_string(&v.name)))
            .collect()
    } else {
        let nparams = match &container.item(method).kind {
            ItemKind::Method(data) => data.params.len(),
            _ => 0,
        };
        vec![None; nparams]
    };

    let debug_info = container.create_item(ItemKind::DebugInfo(DebugInfoData {
        line_number_program,
        line_start: 0,
        parameters,
        constant_pool: Vec::new(),
    }));
    if let ItemKind::Method(data) = &mut container.item_mut(method).kind {
        data.debug_info = Some(debug_info);
    }
}

fn add_bytecode_index_dependencies(
    container: &mut ItemContainer,
    method: ItemId,
    func: &Function,
    entities: &AsmEntityCollections,
) {
    let mut deps = Vec::new();

    for ins in &func.ins {
        if ins.opcode.is_none() {
            continue;
        }

        let table = if ins.has_flag(crate::isa::InstFlags::METHOD_ID) {
            &entities.method_items
        } else if ins.has_flag(crate::isa::InstFlags::FIELD_ID) {
            &entities.field_items
        } else if ins.has_flag(crate::isa::InstFlags::TYPE_ID) {
            &entities.class_items
        } else {
            continue;
        };

        for id in &ins.ids {
            if let Some(&item) = table.get(id) {
                deps.push(item);
            }
        }
    }

    for catch_block in &func.catch_blocks {
        if catch_block.exception_record.is_empty() {
            continue;
        }
        if let Some(&item) = entities.class_items.get(&catch_block.exception_record) {
            deps.push(item);
        }
    }

    if let ItemKind::Method(data) = &mut container.item_mut(method).kind {
        data.index_deps.extend(deps);
    }
}

fn set_method_source_lang(
    container: &mut ItemContainer,
    program: &Program,
    method: ItemId,
    func: &Function,
    name: &str,
) {
    let record_name = get_owner_name(name);
    let set = if record_name.is_empty() {
        true
    } else {
        program.record_table[record_name].language != func.language
    };

    if set {
        if let ItemKind::Method(data) = &mut container.item_mut(method).kind {
            data.source_lang = Some(func.language.value());
        }
    }
}

fn add_method_and_params_annotations(
    container: &mut ItemContainer,
    program: &Program,
    entities: &AsmEntityCollections,
    method: ItemId,
    func: &Function,
) -> Result<()> {
    let lists = build_annotation_lists(container, func.metadata.annotations(), program, entities)
        .map_err(|e| {
            Error::emitter(format!(
                "Cannot emit annotations for function {}: {}",
                func.name, e.message
            ))
        })?;
    if let ItemKind::Method(data) = &mut container.item_mut(method).kind {
        append_lists(&mut data.ann, lists);
    }

    let (num_proto_params, is_static) = match &container.item(method).kind {
        ItemKind::Method(data) => (data.params.len(), (data.access_flags & ACC_STATIC) != 0),
        _ => (0, true),
    };

    let mut has_runtime = false;
    let mut has_plain = false;
    for proto_idx in 0..num_proto_params {
        let param_idx = if is_static { proto_idx } else { proto_idx + 1 };
        let param = &func.params[param_idx];
        let lists =
            build_annotation_lists(container, param.metadata.annotations(), program, entities)
                .map_err(|e| {
                    Error::emitter(format!(
                        "Cannot emit annotations for parameter a{} of function {}: {}",
                        param_idx, func.name, e.message
                    ))
                })?;

        has_runtime |= !lists.runtime_annotations.is_empty();
        has_plain |= !lists.annotations.is_empty()
            || !lists.runtime_type_annotations.is_empty()
            || !lists.type_annotations.is_empty();

        if let ItemKind::Method(data) = &mut container.item_mut(method).kind {
            append_lists(&mut data.params[proto_idx].ann, lists);
        }
    }

    if has_runtime {
        let item = container.create_item(ItemKind::ParamAnnotations {
            method,
            runtime: true,
        });
        if let ItemKind::Method(data) = &mut container.item_mut(method).kind {
            data.runtime_param_annotations = Some(item);
        }
    }

    if has_plain {
        let item = container.create_item(ItemKind::ParamAnnotations {
            method,
            runtime: false,
        });
        if let ItemKind::Method(data) = &mut container.item_mut(method).kind {
            data.param_annotations = Some(item);
        }
    }

    Ok(())
}

fn make_function_debug_info_and_annotations(
    container: &mut ItemContainer,
    program: &Program,
    entities: &AsmEntityCollections,
    emit_debug_info: bool,
) -> Result<()> {
    for (name, func) in &program.function_table {
        if func.metadata.is_foreign() {
            continue;
        }
        let method = entities.method_items[name];

        if func.metadata.has_implementation() {
            set_code_and_debug_info(container, method, func, emit_debug_info);
            add_bytecode_index_dependencies(container, method, func, entities);
        }

        set_method_source_lang(container, program, method, func, name);
        add_method_and_params_annotations(container, program, entities, method, func)?;
    }
    Ok(())
}

// ----------------------------------------------------------------------
// phase 11: maps
// ----------------------------------------------------------------------

fn fill_maps(
    container: &ItemContainer,
    maps: &mut PandaFileToAsmMaps,
    entities: &AsmEntityCollections,
) {
    for (name, &item) in &entities.method_items {
        maps.methods.insert(container.offset_of(item), name.clone());
    }
    for (name, &item) in &entities.field_items {
        maps.fields.insert(container.offset_of(item), name.clone());
    }
    for (name, &item) in &entities.class_items {
        maps.classes.insert(container.offset_of(item), name.clone());
    }
    for (name, &item) in &entities.string_items {
        maps.strings.insert(container.offset_of(item), name.clone());
    }
    for (name, &item) in &entities.literalarray_items {
        maps.literalarrays
            .insert(container.offset_of(item), name.clone());
    }
}

// ----------------------------------------------------------------------
// phase 12: bytecode
// ----------------------------------------------------------------------

fn resolve_instruction_ids(
    container: &ItemContainer,
    ins: &Ins,
    method_offset: u32,
    entities: &AsmEntityCollections,
) -> Result<(Vec<u16>, Vec<u32>)> {
    use crate::isa::InstFlags;

    let mut ids16 = Vec::new();
    let mut ids32 = Vec::new();

    let table16 = if ins.has_flag(InstFlags::METHOD_ID) {
        Some(&entities.method_items)
    } else if ins.has_flag(InstFlags::FIELD_ID) {
        Some(&entities.field_items)
    } else if ins.has_flag(InstFlags::TYPE_ID) {
        Some(&entities.class_items)
    } else {
        None
    };

    if let Some(table) = table16 {
        for id in &ins.ids {
            let item = table
                .get(id)
                .copied()
                .ok_or_else(|| Error::emitter(format!("Unresolved id {}", id)))?;
            let idx = container
                .scope_index(item, method_offset)
                .ok_or_else(|| Error::emitter(format!("Id {} has no index in scope", id)))?;
            ids16.push(idx);
        }
    } else if ins.has_flag(InstFlags::STRING_ID) {
        for id in &ins.ids {
            let item = entities
                .string_items
                .get(id)
                .copied()
                .ok_or_else(|| Error::emitter(format!("Unresolved string {:?}", id)))?;
            ids32.push(container.offset_of(item));
        }
    } else if ins.has_flag(InstFlags::LITERALARRAY_ID) {
        for id in &ins.ids {
            let item = entities
                .literalarray_items
                .get(id)
                .copied()
                .ok_or_else(|| Error::emitter(format!("Unresolved literal array {}", id)))?;
            ids32.push(container.offset_of(item));
        }
    }

    Ok((ids16, ids32))
}

fn emit_function_bytecode(
    container: &ItemContainer,
    func: &Function,
    method: ItemId,
    entities: &AsmEntityCollections,
) -> Result<Vec<u8>> {
    let mut emitter = BytecodeEmitter::new();
    let method_offset = container.offset_of(method);

    let mut labels: HashMap<&str, BcLabel> = HashMap::new();
    for ins in &func.ins {
        if ins.set_label {
            let name = ins.label.as_deref().unwrap_or("");
            labels.insert(name, emitter.create_label());
        }
    }

    for ins in &func.ins {
        if ins.set_label {
            let name = ins.label.as_deref().unwrap_or("");
            emitter.bind(labels[name]);
        }

        let opcode = match ins.opcode {
            Some(op) => op,
            None => continue,
        };

        let (ids16, ids32) = resolve_instruction_ids(container, ins, method_offset, entities)?;
        let label = if ins.is_jump() {
            let target = ins
                .ids
                .first()
                .and_then(|id| labels.get(id.as_str()))
                .copied()
                .ok_or_else(|| Error::emitter(format!("Unbound jump target in {}", func.name)))?;
            Some(target)
        } else {
            None
        };

        emitter
            .encode(opcode, &ins.regs, &ins.imms, &ids16, &ids32, label)
            .map_err(|status| {
                Error::emitter(format!(
                    "Internal error during emitting binary code, status={}",
                    status.code()
                ))
            })?;
    }

    let mut bytes = Vec::new();
    emitter.build(&mut bytes).map_err(|status| {
        Error::emitter(format!(
            "Internal error during emitting binary code, status={}",
            status.code()
        ))
    })?;
    Ok(bytes)
}

/// PC of every label that a catch directive references, computed by walking
/// the instruction list next to the encoded sizes.
fn try_catch_label_offsets(func: &Function) -> HashMap<String, u32> {
    let mut wanted: HashMap<String, u32> = HashMap::new();
    for catch_block in &func.catch_blocks {
        for label in [
            &catch_block.try_begin_label,
            &catch_block.try_end_label,
            &catch_block.catch_begin_label,
            &catch_block.catch_end_label,
        ] {
            wanted.insert(label.clone(), 0);
        }
    }

    let mut pc: u32 = 0;
    for ins in &func.ins {
        if ins.set_label {
            if let Some(label) = &ins.label {
                if let Some(slot) = wanted.get_mut(label) {
                    *slot = pc;
                }
            }
        }
        if let Some(op) = ins.opcode {
            pc += op.format().size() as u32;
        }
    }

    wanted
}

fn build_try_blocks(
    func: &Function,
    method: ItemId,
    entities: &AsmEntityCollections,
) -> Result<Vec<TryBlock>> {
    if func.ins.is_empty() {
        return Ok(Vec::new());
    }

    let offsets = try_catch_label_offsets(func);

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&crate::program::CatchBlock>> = HashMap::new();
    for catch_block in &func.catch_blocks {
        let key = format!("{}:{}", catch_block.try_begin_label, catch_block.try_end_label);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(catch_block);
    }

    let mut try_blocks = Vec::new();
    for key in order {
        let blocks = &groups[&key];

        let mut catch_entries = Vec::new();
        for catch_block in blocks {
            let class = if catch_block.exception_record.is_empty() {
                None
            } else {
                let class = entities
                    .class_items
                    .get(&catch_block.exception_record)
                    .copied()
                    .ok_or_else(|| {
                        Error::emitter(format!(
                            "Catch exception record {} not found",
                            catch_block.exception_record
                        ))
                    })?;
                Some(class)
            };
            let handler_pc = offsets[&catch_block.catch_begin_label];
            let handler_end = offsets[&catch_block.catch_end_label];
            catch_entries.push(CatchBlockEntry {
                method,
                class,
                handler_pc,
                code_size: handler_end.saturating_sub(handler_pc),
            });
        }

        let start = offsets[&blocks[0].try_begin_label];
        let end = offsets[&blocks[0].try_end_label];
        try_blocks.push(TryBlock {
            start_pc: start,
            length: end.saturating_sub(start),
            catch_blocks: catch_entries,
        });
    }

    Ok(try_blocks)
}

fn emit_line_number(
    writer: &mut LineNumberProgramWriter<'_>,
    pc_inc: &mut u32,
    prev_line: &mut i32,
    line: i32,
) {
    let line_inc = line - *prev_line;
    if line_inc == 0 {
        return;
    }
    *prev_line = line;

    if writer.emit_special_opcode(*pc_inc, line_inc) {
        *pc_inc = 0;
        return;
    }

    if *pc_inc != 0 {
        writer.emit_advance_pc(*pc_inc);
        if writer.emit_special_opcode(0, line_inc) {
            *pc_inc = 0;
            return;
        }
    }
    writer.emit_advance_line(line_inc);
    writer.emit_special_opcode(0, 0);
    *pc_inc = 0;
}

fn emit_local_variables(
    container: &mut ItemContainer,
    writer: &mut LineNumberProgramWriter<'_>,
    func: &Function,
    pc_inc: &mut u32,
    instruction_number: usize,
) {
    for v in &func.local_variable_debug {
        if func.is_parameter(v.reg) {
            continue;
        }

        if instruction_number == v.start {
            if *pc_inc != 0 {
                writer.emit_advance_pc(*pc_inc);
                *pc_inc = 0;
            }
            let name = container.get_or_create_string(&v.name);
            let signature = container.get_or_create_string(&v.signature);
            let name_offset = container.offset_of(name);
            let signature_offset = container.offset_of(signature);
            if v.signature_type.is_empty() {
                writer.emit_start_local(v.reg, name_offset, signature_offset);
            } else {
                let sig_type = container.get_or_create_string(&v.signature_type);
                let sig_type_offset = container.offset_of(sig_type);
                writer.emit_start_local_extended(v.reg, name_offset, signature_offset, sig_type_offset);
            }
        }

        if instruction_number == v.start + v.length {
            if *pc_inc != 0 {
                writer.emit_advance_pc(*pc_inc);
                *pc_inc = 0;
            }
            writer.emit_end_local(v.reg);
        }
    }
}

fn emit_debug_info_for(
    container: &mut ItemContainer,
    program: &Program,
    func: &Function,
    method: ItemId,
    name: &str,
    emit_debug_info: bool,
) {
    let debug_info = match &container.item(method).kind {
        ItemKind::Method(data) => match data.debug_info {
            Some(d) => d,
            None => return,
        },
        _ => return,
    };
    let lnp = match &container.item(debug_info).kind {
        ItemKind::DebugInfo(data) => data.line_number_program,
        _ => return,
    };

    let mut program_bytes = Vec::new();
    let mut constant_pool = Vec::new();
    let mut writer = LineNumberProgramWriter::new(&mut program_bytes, &mut constant_pool);

    // SET_SOURCE_CODE / SET_FILE only when the function's source file
    // differs from its record's
    let record_name = get_owner_name(name);
    let record_source_file = match program.record_table.get(record_name) {
        Some(rec) => rec.source_file.as_str(),
        None => "",
    };

    let mut pending_strings: Vec<(bool, String)> = Vec::new();
    if !func.source_file.is_empty() && func.source_file != record_source_file {
        if !func.source_code.is_empty() {
            pending_strings.push((true, func.source_code.clone()));
        }
        pending_strings.push((false, func.source_file.clone()));
    }
    for (is_source_code, s) in pending_strings {
        let item = container.get_or_create_string(&s);
        let offset = container.offset_of(item);
        debug_assert!(offset != 0);
        if is_source_code {
            writer.emit_set_source_code(offset);
        } else {
            writer.emit_set_file(offset);
        }
    }

    let mut line_start = 0u32;
    if func.ins.is_empty() {
        writer.emit_end();
    } else {
        let mut pc_inc: u32 = 0;
        let mut prev_line = func.line_number_of(0);
        line_start = prev_line as u32;

        for (i, ins) in func.ins.iter().enumerate() {
            if emit_debug_info {
                emit_local_variables(container, &mut writer, func, &mut pc_inc, i);
            }

            let opcode = match ins.opcode {
                Some(op) => op,
                None => continue,
            };

            if emit_debug_info || ins.can_throw() {
                emit_line_number(&mut writer, &mut pc_inc, &mut prev_line, func.line_number_of(i));
            }

            pc_inc += opcode.format().size() as u32;
        }

        writer.emit_end();
    }

    if let ItemKind::DebugInfo(data) = &mut container.item_mut(debug_info).kind {
        data.line_start = line_start;
        data.constant_pool = constant_pool;
    }
    if let ItemKind::LineNumberProgram(bytes) = &mut container.item_mut(lnp).kind {
        *bytes = program_bytes;
    }
}

fn emit_functions(
    container: &mut ItemContainer,
    program: &Program,
    entities: &AsmEntityCollections,
    emit_debug_info: bool,
) -> Result<()> {
    for (name, func) in &program.function_table {
        if func.metadata.is_foreign() || !func.metadata.has_implementation() {
            continue;
        }

        debug!("emitting function {}", name);
        let method = entities.method_items[name];
        let bytes = emit_function_bytecode(container, func, method, entities)
            .map_err(|e| match e.kind {
                crate::error::ErrorKind::Emit if e.message.starts_with("Internal error") => e,
                _ => Error::emitter(format!("Internal error during emitting function: {}", func.name)),
            })?;

        let num_ins = func.ins.iter().filter(|i| i.opcode.is_some()).count() as u32;
        let try_blocks = build_try_blocks(func, method, entities)?;

        let code = match &container.item(method).kind {
            ItemKind::Method(data) => data.code,
            _ => None,
        };
        if let Some(code) = code {
            if let ItemKind::Code(data) = &mut container.item_mut(code).kind {
                data.num_vregs = func.regs_num as u32;
                data.num_args = func.params_num() as u32;
                data.num_instructions = num_ins;
                data.instructions = bytes;
                data.try_blocks = try_blocks;
            }
        }

        emit_debug_info_for(container, program, func, method, name, emit_debug_info);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::writer::MemoryWriter;
    use crate::parser::Parser;

    fn emit_source(source: &str) -> (ItemContainer, Program) {
        emit_source_with(source, true)
    }

    fn emit_source_with(source: &str, emit_debug_info: bool) -> (ItemContainer, Program) {
        let (program, warnings) = Parser::parse_source(source, "test.pa").unwrap();
        assert!(warnings.is_empty());
        let mut container = ItemContainer::new();
        AsmEmitter::emit(&mut container, &program, None, emit_debug_info).unwrap();
        (container, program)
    }

    fn count_kind(container: &ItemContainer, pred: impl Fn(&ItemKind) -> bool) -> usize {
        container
            .arena
            .iter()
            .filter(|item| item.needs_emit && pred(&item.kind))
            .count()
    }

    fn find_method<'a>(container: &'a ItemContainer, name: &str) -> &'a MethodData {
        for item in &container.arena {
            if let ItemKind::Method(data) = &item.kind {
                if let ItemKind::String(s) = &container.item(data.name_item).kind {
                    if s == name {
                        return data;
                    }
                }
            }
        }
        panic!("method {} not found", name);
    }

    #[test]
    fn test_minimal_record_and_method() {
        let (container, _) = emit_source(
            ".record R { i32 x }\n\
             .function i32 R.get(R a0) { lda.obj a0 ldobj R.x return }",
        );

        assert_eq!(count_kind(&container, |k| matches!(k, ItemKind::Class(_))), 1);
        assert_eq!(count_kind(&container, |k| matches!(k, ItemKind::Proto(_))), 1);
        assert_eq!(count_kind(&container, |k| matches!(k, ItemKind::Code(_))), 1);
        assert_eq!(container.num_classes(), 1);

        let class_id = container.arena.iter().position(|i| matches!(i.kind, ItemKind::Class(_)));
        let class = &container.arena[class_id.unwrap()];
        if let ItemKind::Class(data) = &class.kind {
            assert_eq!(data.fields.len(), 1);
            assert_eq!(data.methods.len(), 1);
        }

        let method = find_method(&container, "get");
        // object receiver is the first parameter, so the method is not static
        assert_eq!(method.access_flags & ACC_STATIC, 0);
        assert_eq!(method.params.len(), 0);

        let code = method.code.unwrap();
        if let ItemKind::Code(data) = &container.item(code).kind {
            assert_eq!(data.num_instructions, 3);
            assert_eq!(data.num_args, 1);
            // lda.obj (2 bytes) + ldobj (3) + return (1)
            assert_eq!(data.instructions.len(), 6);
        }

        // exactly one string item for the field name
        assert_eq!(
            count_kind(&container, |k| matches!(k, ItemKind::String(s) if s == "x")),
            1
        );
    }

    #[test]
    fn test_string_items_are_interned() {
        let (container, _) =
            emit_source(".function void f() { lda.str \"hi\" lda.str \"hi\" return }");
        assert_eq!(
            count_kind(&container, |k| matches!(k, ItemKind::String(s) if s == "hi")),
            1
        );
    }

    #[test]
    fn test_try_catch_blocks() {
        let (container, _) = emit_source(
            ".record E {}\n\
             .function void f() {\n\
               begin: return\n\
               end:\n\
               handler: return\n\
               handler_end:\n\
             }\n\
             .catch E, begin, end, handler, handler_end",
        );

        let method = find_method(&container, "f");
        let code = method.code.unwrap();
        let data = match &container.item(code).kind {
            ItemKind::Code(data) => data,
            _ => unreachable!(),
        };

        assert_eq!(data.try_blocks.len(), 1);
        let try_block = &data.try_blocks[0];
        assert_eq!(try_block.start_pc, 0);
        assert_eq!(try_block.length, 1);
        assert_eq!(try_block.catch_blocks.len(), 1);

        let catch = &try_block.catch_blocks[0];
        assert_eq!(catch.handler_pc, 1);
        assert_eq!(catch.code_size, 1);

        let class_e = catch.class.unwrap();
        if let ItemKind::Class(class_data) = &container.item(class_e).kind {
            if let ItemKind::String(s) = &container.item(class_data.name_item).kind {
                assert_eq!(s, "LE;");
            }
        } else {
            panic!("catch class must be the class item for E");
        }
    }

    #[test]
    fn test_catchall_without_end_label() {
        let (container, _) = emit_source(
            ".function void f() {\n  b: return e: h: return\n}\n.catchall b, e, h",
        );

        let method = find_method(&container, "f");
        let code = method.code.unwrap();
        if let ItemKind::Code(data) = &container.item(code).kind {
            let catch = &data.try_blocks[0].catch_blocks[0];
            assert!(catch.class.is_none());
            assert_eq!(catch.handler_pc, 1);
            assert_eq!(catch.code_size, 0);
        }
    }

    #[test]
    fn test_code_items_deduplicate() {
        let (mut container, _) = emit_source(
            ".function void f() {\n  return\n}\n.function void g() {\n  return\n}",
        );

        container.deduplicate_items();

        let f = find_method(&container, "f").code.unwrap();
        let g = find_method(&container, "g").code.unwrap();
        // both methods point at the surviving twin
        assert_eq!(f, g);
        assert!(container.item(f).needs_emit);
        assert_eq!(
            count_kind(&container, |k| matches!(k, ItemKind::Code(_))),
            1
        );
    }

    #[test]
    fn test_no_two_emitted_items_share_bytes_after_dedup() {
        let (mut container, _) = emit_source(
            ".record R { i32 x }\n\
             .function void f() {\n  l: jmp l\n}\n\
             .function void g() {\n  l: jmp l\n}\n\
             .function i32 h() {\n  ldai 1\n  return\n}",
        );
        container.deduplicate_items();
        container.compute_layout();

        let mut seen: std::collections::HashMap<(&'static str, Vec<u8>), ItemId> =
            std::collections::HashMap::new();
        for (i, item) in container.arena.iter().enumerate() {
            let id = ItemId(i as u32);
            if !item.needs_emit {
                continue;
            }
            let relevant = matches!(
                item.kind,
                ItemKind::Code(_)
                    | ItemKind::DebugInfo(_)
                    | ItemKind::LineNumberProgram(_)
                    | ItemKind::Annotation(_)
            );
            if !relevant {
                continue;
            }
            let mut w = MemoryWriter::with_start_offset(container.offset_of(id) as usize);
            assert!(container.write_item(id, &mut w));
            let key = (item.name(), w.into_data());
            if let Some(prev) = seen.insert(key, id) {
                panic!("items {:?} and {:?} serialize identically", prev, id);
            }
        }
    }

    #[test]
    fn test_debug_info_presence_rules() {
        // cannot throw, debug info off: no debug item
        let (container, _) = emit_source_with(".function void f() {\n  return\n}", false);
        assert!(find_method(&container, "f").debug_info.is_none());

        // can throw (ldobj), debug info off: debug item with one placeholder
        // slot per parameter
        let (container, _) = emit_source_with(
            ".record R { i32 x }\n\
             .function void f(i32 a0) {\n  ldobj R.x\n  return\n}",
            false,
        );
        let method = find_method(&container, "f");
        let debug_info = method.debug_info.expect("throwing method keeps debug info");
        if let ItemKind::DebugInfo(data) = &container.item(debug_info).kind {
            assert_eq!(data.parameters.len(), 1);
            assert!(data.parameters.iter().all(|p| p.is_none()));
        }

        // debug info on: line number program carries the end opcode at least
        let (container, _) = emit_source_with(".function void f() {\n  return\n}", true);
        let method = find_method(&container, "f");
        assert!(method.debug_info.is_some());
    }

    #[test]
    fn test_emitted_file_checksum_and_size() {
        let (program, _) = Parser::parse_source(
            ".record R { i32 x }\n\
             .function i32 R.get(R a0) { lda.obj a0 ldobj R.x return }",
            "test.pa",
        )
        .unwrap();

        let bytes = AsmEmitter::emit_to_memory(&program, None).unwrap();
        assert_eq!(&bytes[..5], b"PANDA");

        let file_size = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
        assert_eq!(file_size as usize, bytes.len());

        let stored = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let computed = adler32::adler32(&bytes[12..]).unwrap();
        assert_eq!(stored, computed);

        // one class in the class index, right after the header
        let num_classes = u32::from_le_bytes(bytes[28..32].try_into().unwrap());
        assert_eq!(num_classes, 1);
        let class_idx_off = u32::from_le_bytes(bytes[32..36].try_into().unwrap());
        assert_eq!(class_idx_off, crate::file::HEADER_SIZE);
    }

    #[test]
    fn test_emission_is_deterministic() {
        let source = ".record R { i32 x }\n\
             .function void f(i32 a0) {\n  start:\n  mov v0, a0\n  jmp start\n}\n\
             .function i32 R.get(R a0) { lda.obj a0 ldobj R.x return }";

        let (program1, _) = Parser::parse_source(source, "test.pa").unwrap();
        let (program2, _) = Parser::parse_source(source, "test.pa").unwrap();

        let bytes1 = AsmEmitter::emit_to_memory(&program1, None).unwrap();
        let bytes2 = AsmEmitter::emit_to_memory(&program2, None).unwrap();
        assert_eq!(bytes1, bytes2);
    }

    #[test]
    fn test_maps_are_filled() {
        let (program, _) = Parser::parse_source(
            ".record R { i32 x }\n\
             .function void f() {\n  lda.str \"s\"\n  return\n}",
            "test.pa",
        )
        .unwrap();

        let mut maps = PandaFileToAsmMaps::default();
        let mut container = ItemContainer::new();
        AsmEmitter::emit(&mut container, &program, Some(&mut maps), true).unwrap();

        assert!(maps.methods.values().any(|v| v == "f:void;"));
        assert!(maps.classes.values().any(|v| v == "R"));
        assert!(maps.fields.values().any(|v| v == "R.x"));
        assert!(maps.strings.values().any(|v| v == "s"));
    }

    #[test]
    fn test_annotations_attach_to_class() {
        let (container, _) = emit_source(
            ".record A <annotation> {}\n\
             .record R <panda.annotation.class=A, panda.annotation.element.name=x, \
             panda.annotation.element.type=i32, panda.annotation.element.value=3> {}",
        );

        let mut found = false;
        for item in &container.arena {
            if let ItemKind::Class(data) = &item.kind {
                if let ItemKind::String(s) = &container.item(data.name_item).kind {
                    if s == "LR;" {
                        assert_eq!(data.ann.annotations.len(), 1);
                        let ann = data.ann.annotations[0];
                        if let ItemKind::Annotation(ann_data) = &container.item(ann).kind {
                            assert_eq!(ann_data.elements.len(), 1);
                            assert_eq!(ann_data.tags, vec![b'6']);
                        }
                        found = true;
                    }
                }
            }
        }
        assert!(found);
    }

    #[test]
    fn test_annotation_value_check_rejects_mismatch() {
        // A.x declares an i32 element; an f64 value must be rejected
        let source = ".record A <annotation> {}\n\
             .function i32 A.x() {\n  ldai 0\n  return\n}\n\
             .record R <panda.annotation.class=A, panda.annotation.element.name=x, \
             panda.annotation.element.type=f64, panda.annotation.element.value=1.5> {}";
        let (program, _) = Parser::parse_source(source, "test.pa").unwrap();
        let mut container = ItemContainer::new();
        let err = AsmEmitter::emit(&mut container, &program, None, true).unwrap_err();
        assert!(err.message.contains("Incorrect annotation element"));
    }

    #[test]
    fn test_foreign_record_with_local_field_is_rejected() {
        let source = ".record Ext <external> {\n  i32 x\n}";
        // body on an external record contradicts the metadata
        assert!(Parser::parse_source(source, "test.pa").is_err());
    }

    #[test]
    fn test_external_function_emits_foreign_method() {
        let (container, _) = emit_source(
            ".record Ext <external>\n\
             .function void Ext.f(Ext a0) <external>\n\
             .function void main() {\n  return\n}",
        );

        assert_eq!(
            count_kind(&container, |k| matches!(k, ItemKind::ForeignMethod { .. })),
            1
        );
        assert_eq!(
            count_kind(&container, |k| matches!(k, ItemKind::ForeignClass { .. })),
            1
        );
    }

    #[test]
    fn test_field_value_item() {
        let (container, _) = emit_source(".record R {\n  i32 x <value=7>\n}");

        let mut found = false;
        for item in &container.arena {
            if let ItemKind::Field(data) = &item.kind {
                let value = data.value.expect("field value must be materialized");
                assert!(matches!(
                    container.item(value).kind,
                    ItemKind::ScalarValue(ValuePayload::Integer(7))
                ));
                found = true;
            }
        }
        assert!(found);
    }

    #[test]
    fn test_method_source_lang_set_for_global_functions() {
        let (container, _) = emit_source(".function void f() {\n  return\n}");
        let method = find_method(&container, "f");
        assert!(method.source_lang.is_some());
    }
}
