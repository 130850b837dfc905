//! Owning container of binary items.
//!
//! The container interns strings, classes, protos, values and literal
//! arrays, assigns final offsets, runs the deduplication passes and writes
//! the file. Items are stored in one arena; two ordered lists (foreign
//! first, then implemented) fix the emission order. Every map that reaches
//! the output path is ordered, so repeated runs produce identical bytes.

use std::collections::{BTreeMap, HashMap};

use crate::error::Error;
use crate::types::TypeId;
use crate::utf;
use crate::Result;

use super::dedup::ItemDeduper;
use super::index::IndexSection;
use super::items::*;
use super::writer::{MemoryWriter, Writer};
use super::{HEADER_SIZE, ID_SIZE, MAGIC, VERSION};

/// Literal-array map ordering: ascending id length, then lexicographic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LenLexKey(pub String);

impl Ord for LenLexKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for LenLexKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Interning key of a proto: the shorty nibble string plus the reference
/// types of the signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProtoKey {
    shorty: Vec<u8>,
    ref_types: Vec<ItemId>,
}

pub struct ItemContainer {
    pub(crate) arena: Vec<Item>,
    pub(crate) items: Vec<ItemId>,
    pub(crate) foreign_items: Vec<ItemId>,

    string_map: HashMap<String, ItemId>,
    class_map: BTreeMap<String, ItemId>,
    literalarray_map: BTreeMap<LenLexKey, ItemId>,

    int_value_map: HashMap<u32, ItemId>,
    long_value_map: HashMap<u64, ItemId>,
    float_value_map: HashMap<u32, ItemId>,
    double_value_map: HashMap<u64, ItemId>,
    id_value_map: HashMap<ItemId, ItemId>,
    proto_map: HashMap<ProtoKey, ItemId>,

    index_section: IndexSection,

    lnp_items: Vec<ItemId>,
    lnp_order: Vec<ItemId>,
    lnp_index_map: HashMap<ItemId, u32>,
    lnp_index_offset: u32,

    end_item: ItemId,
}

impl Default for ItemContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemContainer {
    pub fn new() -> Self {
        let mut container = Self {
            arena: Vec::new(),
            items: Vec::new(),
            foreign_items: Vec::new(),
            string_map: HashMap::new(),
            class_map: BTreeMap::new(),
            literalarray_map: BTreeMap::new(),
            int_value_map: HashMap::new(),
            long_value_map: HashMap::new(),
            float_value_map: HashMap::new(),
            double_value_map: HashMap::new(),
            id_value_map: HashMap::new(),
            proto_map: HashMap::new(),
            index_section: IndexSection::default(),
            lnp_items: Vec::new(),
            lnp_order: Vec::new(),
            lnp_index_map: HashMap::new(),
            lnp_index_offset: 0,
            end_item: ItemId(0),
        };
        container.end_item = container.alloc(ItemKind::End);
        container
    }

    fn alloc(&mut self, kind: ItemKind) -> ItemId {
        let id = ItemId(self.arena.len() as u32);
        self.arena.push(Item::new(kind));
        id
    }

    pub fn item(&self, id: ItemId) -> &Item {
        &self.arena[id.index()]
    }

    pub fn item_mut(&mut self, id: ItemId) -> &mut Item {
        &mut self.arena[id.index()]
    }

    pub fn offset_of(&self, id: ItemId) -> u32 {
        self.arena[id.index()].offset
    }

    pub fn end_item(&self) -> ItemId {
        self.end_item
    }

    /// Registers a standalone item on the appropriate emission list.
    pub fn create_item(&mut self, kind: ItemKind) -> ItemId {
        let id = self.alloc(kind);
        if self.arena[id.index()].is_foreign() {
            self.foreign_items.push(id);
        } else {
            self.items.push(id);
        }
        id
    }

    // ------------------------------------------------------------------
    // interning
    // ------------------------------------------------------------------

    /// Strings are globally interned. A name that is already registered as
    /// a class resolves to the class's name item.
    pub fn get_or_create_string(&mut self, s: &str) -> ItemId {
        if let Some(&class_id) = self.class_map.get(s) {
            return match &self.arena[class_id.index()].kind {
                ItemKind::Class(data) => data.name_item,
                ItemKind::ForeignClass { name_item } => *name_item,
                _ => unreachable!(),
            };
        }

        if let Some(&id) = self.string_map.get(s) {
            return id;
        }

        let id = self.create_item(ItemKind::String(s.to_string()));
        self.string_map.insert(s.to_string(), id);
        id
    }

    pub fn get_or_create_class(&mut self, descriptor: &str) -> ItemId {
        if let Some(&id) = self.class_map.get(descriptor) {
            debug_assert!(!self.arena[id.index()].is_foreign());
            return id;
        }

        let name_item = self.get_or_create_string(descriptor);
        let id = self.create_item(ItemKind::Class(ClassData {
            name_item,
            access_flags: 0,
            super_class: None,
            interfaces: Vec::new(),
            source_lang: None,
            source_file: None,
            ann: AnnotationLists::default(),
            fields: Vec::new(),
            methods: Vec::new(),
        }));
        self.class_map.insert(descriptor.to_string(), id);
        id
    }

    pub fn get_or_create_foreign_class(&mut self, descriptor: &str) -> ItemId {
        if let Some(&id) = self.class_map.get(descriptor) {
            debug_assert!(self.arena[id.index()].is_foreign());
            return id;
        }

        let name_item = self.get_or_create_string(descriptor);
        let id = self.create_item(ItemKind::ForeignClass { name_item });
        self.class_map.insert(descriptor.to_string(), id);
        id
    }

    /// Functions with no owner record live on the implicit global class.
    pub fn get_or_create_global_class(&mut self) -> ItemId {
        self.get_or_create_class("L_GLOBAL;")
    }

    pub fn is_foreign_class(&self, descriptor: &str) -> Option<bool> {
        self.class_map
            .get(descriptor)
            .map(|id| self.arena[id.index()].is_foreign())
    }

    pub fn get_or_create_integer_value(&mut self, v: u32) -> ItemId {
        if let Some(&id) = self.int_value_map.get(&v) {
            return id;
        }
        let id = self.create_item(ItemKind::ScalarValue(ValuePayload::Integer(v)));
        self.int_value_map.insert(v, id);
        id
    }

    pub fn get_or_create_long_value(&mut self, v: u64) -> ItemId {
        if let Some(&id) = self.long_value_map.get(&v) {
            return id;
        }
        let id = self.create_item(ItemKind::ScalarValue(ValuePayload::Long(v)));
        self.long_value_map.insert(v, id);
        id
    }

    /// Floats intern by bit pattern so `+0.0`, `-0.0` and NaN payloads stay
    /// distinct.
    pub fn get_or_create_float_value(&mut self, v: f32) -> ItemId {
        let bits = v.to_bits();
        if let Some(&id) = self.float_value_map.get(&bits) {
            return id;
        }
        let id = self.create_item(ItemKind::ScalarValue(ValuePayload::Float(bits)));
        self.float_value_map.insert(bits, id);
        id
    }

    pub fn get_or_create_double_value(&mut self, v: f64) -> ItemId {
        let bits = v.to_bits();
        if let Some(&id) = self.double_value_map.get(&bits) {
            return id;
        }
        let id = self.create_item(ItemKind::ScalarValue(ValuePayload::Double(bits)));
        self.double_value_map.insert(bits, id);
        id
    }

    pub fn get_or_create_id_value(&mut self, target: ItemId) -> ItemId {
        if let Some(&id) = self.id_value_map.get(&target) {
            return id;
        }
        let id = self.create_item(ItemKind::ScalarValue(ValuePayload::Id(target)));
        self.id_value_map.insert(target, id);
        id
    }

    pub fn get_or_create_proto(&mut self, ret_type: ItemId, params: &[ItemId]) -> ItemId {
        let key = ProtoKey {
            shorty: self.shorty_nibbles(ret_type, params),
            ref_types: self.proto_ref_types(ret_type, params),
        };
        if let Some(&id) = self.proto_map.get(&key) {
            return id;
        }
        let id = self.create_item(ItemKind::Proto(ProtoData {
            ret_type,
            params: params.to_vec(),
        }));
        self.proto_map.insert(key, id);
        id
    }

    pub fn get_or_create_literal_array(&mut self, array_id: &str) -> ItemId {
        let key = LenLexKey(array_id.to_string());
        if let Some(&id) = self.literalarray_map.get(&key) {
            return id;
        }
        let id = self.create_item(ItemKind::LiteralArray(LiteralArrayData::default()));
        self.literalarray_map.insert(key, id);
        id
    }

    pub fn create_line_number_program(&mut self) -> ItemId {
        let id = self.create_item(ItemKind::LineNumberProgram(Vec::new()));
        self.lnp_items.push(id);
        id
    }

    /// Attaches an owned field to a class; the item is written inline.
    pub fn add_field(&mut self, class: ItemId, data: FieldData) -> ItemId {
        let id = self.alloc(ItemKind::Field(data));
        match &mut self.arena[class.index()].kind {
            ItemKind::Class(c) => c.fields.push(id),
            _ => unreachable!("fields attach to class items"),
        }
        id
    }

    /// Attaches an owned method to a class; the item is written inline.
    pub fn add_method(&mut self, class: ItemId, data: MethodData) -> ItemId {
        let id = self.alloc(ItemKind::Method(data));
        match &mut self.arena[class.index()].kind {
            ItemKind::Class(c) => c.methods.push(id),
            _ => unreachable!("methods attach to class items"),
        }
        id
    }

    fn type_code(&self, id: ItemId) -> TypeId {
        match &self.arena[id.index()].kind {
            ItemKind::PrimitiveType(t) => *t,
            _ => TypeId::Reference,
        }
    }

    fn shorty_nibbles(&self, ret_type: ItemId, params: &[ItemId]) -> Vec<u8> {
        let mut nibbles = vec![self.type_code(ret_type).shorty_code()];
        for &p in params {
            nibbles.push(self.type_code(p).shorty_code());
        }
        nibbles.push(0);
        nibbles
    }

    fn proto_ref_types(&self, ret_type: ItemId, params: &[ItemId]) -> Vec<ItemId> {
        let mut refs = Vec::new();
        if self.type_code(ret_type).is_reference() {
            refs.push(ret_type);
        }
        for &p in params {
            if self.type_code(p).is_reference() {
                refs.push(p);
            }
        }
        refs
    }

    /// A type reference: primitive ids encode directly (they are always
    /// below the header size), reference types by class item offset.
    pub fn type_ref(&self, id: ItemId) -> u32 {
        match &self.arena[id.index()].kind {
            ItemKind::PrimitiveType(t) => *t as u32,
            _ => self.arena[id.index()].offset,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_map.len()
    }

    pub fn num_literal_arrays(&self) -> usize {
        self.literalarray_map.len()
    }

    pub fn line_number_program_index(&self, id: ItemId) -> u32 {
        self.lnp_index_map[&id]
    }

    /// 16-bit index of `target` as seen from the item placed at
    /// `from_offset`.
    pub fn scope_index(&self, target: ItemId, from_offset: u32) -> Option<u16> {
        self.arena[target.index()].index_for_offset(from_offset, |id| self.offset_of(id))
    }

    // ------------------------------------------------------------------
    // layout
    // ------------------------------------------------------------------

    pub fn compute_layout(&mut self) -> u32 {
        let num_classes = self.class_map.len() as u32;
        let num_literalarrays = self.literalarray_map.len() as u32;
        let class_idx_offset = HEADER_SIZE;
        let mut cur = class_idx_offset + (num_classes + num_literalarrays) * ID_SIZE;

        self.update_order_indexes();
        self.rebuild_index_section();
        self.rebuild_line_number_program_index();

        cur += self.index_section.compute_layout(cur);

        for i in 0..self.foreign_items.len() {
            let id = self.foreign_items[i];
            cur = self.place_item(id, cur);
        }

        for i in 0..self.items.len() {
            let id = self.items[i];
            if !self.arena[id.index()].needs_emit {
                continue;
            }
            cur = self.place_item(id, cur);
        }

        // the line-number-program index is placed last: program sizes are
        // only known after deduplication
        cur = cur.next_multiple_of(ID_SIZE);
        self.lnp_index_offset = cur;
        cur += self.lnp_order.len() as u32 * ID_SIZE;

        self.arena[self.end_item.index()].offset = cur;

        cur
    }

    fn place_item(&mut self, id: ItemId, cur: u32) -> u32 {
        let alignment = self.arena[id.index()].alignment() as u32;
        let offset = cur.next_multiple_of(alignment);
        self.arena[id.index()].offset = offset;
        self.layout_children(id, offset);
        offset + self.item_size(id) as u32
    }

    /// Owned fields and methods of a class follow its header bytes with no
    /// padding.
    fn layout_children(&mut self, id: ItemId, offset: u32) {
        let (fields, methods) = match &self.arena[id.index()].kind {
            ItemKind::Class(data) => (data.fields.clone(), data.methods.clone()),
            _ => return,
        };

        let mut cur = offset + self.class_header_size(id) as u32;
        for field in fields {
            self.arena[field.index()].offset = cur;
            cur += self.item_size(field) as u32;
        }
        for method in methods {
            self.arena[method.index()].offset = cur;
            cur += self.item_size(method) as u32;
        }
    }

    fn update_order_indexes(&mut self) {
        let mut idx: u32 = 0;
        let mut bump = |item: &mut Item| {
            item.order_index = idx;
            idx += 1;
        };

        for i in 0..self.foreign_items.len() {
            let id = self.foreign_items[i];
            bump(&mut self.arena[id.index()]);
        }

        for i in 0..self.items.len() {
            let id = self.items[i];
            if !self.arena[id.index()].needs_emit {
                continue;
            }
            bump(&mut self.arena[id.index()]);

            let children: Vec<ItemId> = match &self.arena[id.index()].kind {
                ItemKind::Class(data) => {
                    data.fields.iter().chain(data.methods.iter()).copied().collect()
                }
                _ => Vec::new(),
            };
            for child in children {
                bump(&mut self.arena[child.index()]);
            }
        }

        bump(&mut self.arena[self.end_item.index()]);
    }

    fn rebuild_index_section(&mut self) {
        self.index_section.reset(&mut self.arena);

        for i in 0..self.foreign_items.len() {
            let id = self.foreign_items[i];
            self.process_index_dependencies(id);
        }
        for i in 0..self.items.len() {
            let id = self.items[i];
            if !self.arena[id.index()].needs_emit {
                continue;
            }
            self.process_index_dependencies(id);
        }

        if !self.index_section.is_empty() {
            self.index_section.close(self.end_item);
        }

        self.index_section.update_items(&mut self.arena);
    }

    fn collect_index_dependencies(&self, id: ItemId, deps: &mut Vec<ItemId>) {
        match &self.arena[id.index()].kind {
            ItemKind::Method(data) => {
                deps.push(data.proto);
                deps.extend_from_slice(&data.index_deps);
            }
            ItemKind::ForeignMethod { proto, .. } => deps.push(*proto),
            ItemKind::Class(data) => {
                for &method in &data.methods {
                    self.collect_index_dependencies(method, deps);
                }
            }
            _ => {}
        }
    }

    fn process_index_dependencies(&mut self, id: ItemId) {
        let mut deps = Vec::new();
        self.collect_index_dependencies(id, &mut deps);
        self.index_section
            .add_item_dependencies(id, &deps, self.end_item, &self.arena);
    }

    fn rebuild_line_number_program_index(&mut self) {
        let mut order = self.lnp_items.clone();
        order.sort_by_key(|id| {
            let item = &self.arena[id.index()];
            (std::cmp::Reverse(item.ref_count), item.order_index)
        });
        self.lnp_index_map = order
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i as u32))
            .collect();
        self.lnp_order = order;
    }

    // ------------------------------------------------------------------
    // deduplication
    // ------------------------------------------------------------------

    pub fn deduplicate_items(&mut self) {
        self.compute_layout();
        self.deduplicate_code_and_debug_info();
        self.deduplicate_annotations();
    }

    fn serialize_item(&self, id: ItemId) -> Vec<u8> {
        let mut writer = MemoryWriter::with_start_offset(self.offset_of(id) as usize);
        let ok = self.write_item(id, &mut writer);
        debug_assert!(ok);
        writer.into_data()
    }

    fn deduplicate_code_and_debug_info(&mut self) {
        let mut lnp_deduper = ItemDeduper::new();
        let mut debug_deduper = ItemDeduper::new();
        let mut code_deduper = ItemDeduper::new();

        let classes: Vec<ItemId> = self.class_map.values().copied().collect();
        for class in classes {
            if self.arena[class.index()].is_foreign() {
                continue;
            }
            let methods = match &self.arena[class.index()].kind {
                ItemKind::Class(data) => data.methods.clone(),
                _ => continue,
            };

            for method in methods {
                self.deduplicate_debug_info(method, &mut debug_deduper, &mut lnp_deduper);
                self.deduplicate_code(method, &mut code_deduper);
            }
        }
    }

    fn deduplicate_line_number_program(&mut self, debug_info: ItemId, deduper: &mut ItemDeduper) {
        let lnp = match &self.arena[debug_info.index()].kind {
            ItemKind::DebugInfo(data) => data.line_number_program,
            _ => return,
        };

        let bytes = self.serialize_item(lnp);
        let survivor = deduper.deduplicate(lnp, bytes);
        if survivor != lnp {
            if let ItemKind::DebugInfo(data) = &mut self.arena[debug_info.index()].kind {
                data.line_number_program = survivor;
            }
            self.arena[lnp.index()].needs_emit = false;
            self.lnp_items.retain(|&id| id != lnp);
            self.arena[survivor.index()].ref_count += 1;
        }
    }

    fn deduplicate_debug_info(
        &mut self,
        method: ItemId,
        debug_deduper: &mut ItemDeduper,
        lnp_deduper: &mut ItemDeduper,
    ) {
        let debug_info = match &self.arena[method.index()].kind {
            ItemKind::Method(data) => match data.debug_info {
                Some(d) => d,
                None => return,
            },
            _ => return,
        };

        self.deduplicate_line_number_program(debug_info, lnp_deduper);

        let bytes = self.serialize_item(debug_info);
        let survivor = debug_deduper.deduplicate(debug_info, bytes);
        if survivor != debug_info {
            if let ItemKind::Method(data) = &mut self.arena[method.index()].kind {
                data.debug_info = Some(survivor);
            }
            self.arena[debug_info.index()].needs_emit = false;
            let lnp = match &self.arena[debug_info.index()].kind {
                ItemKind::DebugInfo(data) => data.line_number_program,
                _ => unreachable!(),
            };
            self.arena[lnp.index()].ref_count -= 1;
        }
    }

    fn deduplicate_code(&mut self, method: ItemId, deduper: &mut ItemDeduper) {
        let code = match &self.arena[method.index()].kind {
            ItemKind::Method(data) => match data.code {
                Some(c) => c,
                None => return,
            },
            _ => return,
        };

        let bytes = self.serialize_item(code);
        let survivor = deduper.deduplicate(code, bytes);
        if survivor != code {
            if let ItemKind::Method(data) = &mut self.arena[method.index()].kind {
                data.code = Some(survivor);
            }
            self.arena[code.index()].needs_emit = false;
        }
    }

    /// Array-valued elements are leaves of the reference graph; deduping
    /// them first lets annotation-item bytes converge.
    fn deduplicate_annotations(&mut self) {
        let mut value_deduper = ItemDeduper::new();
        let mut annotation_deduper = ItemDeduper::new();

        let classes: Vec<ItemId> = self.class_map.values().copied().collect();
        for class in classes {
            if self.arena[class.index()].is_foreign() {
                continue;
            }

            self.deduplicate_annotation_lists_of(class, &mut annotation_deduper, &mut value_deduper);

            let (fields, methods) = match &self.arena[class.index()].kind {
                ItemKind::Class(data) => (data.fields.clone(), data.methods.clone()),
                _ => continue,
            };
            for field in fields {
                self.deduplicate_annotation_lists_of(field, &mut annotation_deduper, &mut value_deduper);
            }
            for method in methods {
                self.deduplicate_annotation_lists_of(method, &mut annotation_deduper, &mut value_deduper);
            }
        }
    }

    fn annotation_lists_of(&mut self, id: ItemId) -> Option<&mut AnnotationLists> {
        match &mut self.arena[id.index()].kind {
            ItemKind::Class(data) => Some(&mut data.ann),
            ItemKind::Field(data) => Some(&mut data.ann),
            ItemKind::Method(data) => Some(&mut data.ann),
            _ => None,
        }
    }

    fn deduplicate_annotation_lists_of(
        &mut self,
        id: ItemId,
        annotation_deduper: &mut ItemDeduper,
        value_deduper: &mut ItemDeduper,
    ) {
        let lists = match self.annotation_lists_of(id) {
            Some(lists) => [
                lists.runtime_annotations.clone(),
                lists.annotations.clone(),
                lists.runtime_type_annotations.clone(),
                lists.type_annotations.clone(),
            ],
            None => return,
        };

        let mut deduped = lists.clone();
        for list in deduped.iter_mut() {
            for slot in list.iter_mut() {
                self.deduplicate_annotation_values(*slot, value_deduper);

                let bytes = self.serialize_item(*slot);
                let survivor = annotation_deduper.deduplicate(*slot, bytes);
                if survivor != *slot {
                    self.arena[slot.index()].needs_emit = false;
                    *slot = survivor;
                }
            }
        }

        if let Some(lists) = self.annotation_lists_of(id) {
            lists.runtime_annotations = deduped[0].clone();
            lists.annotations = deduped[1].clone();
            lists.runtime_type_annotations = deduped[2].clone();
            lists.type_annotations = deduped[3].clone();
        }
    }

    fn deduplicate_annotation_values(&mut self, annotation: ItemId, deduper: &mut ItemDeduper) {
        let elements: Vec<(usize, ItemId)> = match &self.arena[annotation.index()].kind {
            ItemKind::Annotation(data) => data
                .elements
                .iter()
                .enumerate()
                .zip(data.tags.iter())
                .filter(|((_, _), &tag)| matches!(tag, b'K'..=b'Z' | b'@'))
                .map(|((i, elem), _)| (i, elem.value))
                .collect(),
            _ => return,
        };

        for (i, value) in elements {
            if !matches!(self.arena[value.index()].kind, ItemKind::ArrayValue(_)) {
                continue;
            }
            let bytes = self.serialize_item(value);
            let survivor = deduper.deduplicate(value, bytes);
            if survivor != value {
                self.arena[value.index()].needs_emit = false;
                if let ItemKind::Annotation(data) = &mut self.arena[annotation.index()].kind {
                    data.elements[i].value = survivor;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // writing
    // ------------------------------------------------------------------

    pub fn write(&mut self, writer: &mut dyn Writer) -> Result<()> {
        self.deduplicate_items();

        let file_size = self.compute_layout();

        if !self.write_header(writer, file_size) {
            return Err(Error::emitter("Unable to write the file header"));
        }
        let checksum_offset = super::CHECKSUM_OFFSET;

        for &id in self.class_map.values() {
            if !writer.write_u32(self.offset_of(id)) {
                return Err(Error::emitter("Unable to write the class index"));
            }
        }

        for &id in self.literalarray_map.values() {
            if !writer.write_u32(self.offset_of(id)) {
                return Err(Error::emitter("Unable to write the literal-array index"));
            }
        }

        if !self.index_section.write(writer, |id| self.offset_of(id)) {
            return Err(Error::emitter("Unable to write the index section"));
        }

        for i in 0..self.foreign_items.len() {
            let id = self.foreign_items[i];
            if !self.emit_one(id, writer) {
                return Err(Error::emitter("Unable to write a foreign item"));
            }
        }

        for i in 0..self.items.len() {
            let id = self.items[i];
            if !self.arena[id.index()].needs_emit {
                continue;
            }
            if !self.emit_one(id, writer) {
                return Err(Error::emitter("Unable to write an item"));
            }
        }

        if !writer.align(ID_SIZE as usize) {
            return Err(Error::emitter("Unable to pad the line-number-program index"));
        }
        for i in 0..self.lnp_order.len() {
            let id = self.lnp_order[i];
            if !writer.write_u32(self.offset_of(id)) {
                return Err(Error::emitter("Unable to write the line-number-program index"));
            }
        }

        writer.count_checksum(false);
        if !writer.write_checksum(checksum_offset) {
            return Err(Error::emitter("Unable to back-patch the checksum"));
        }

        Ok(())
    }

    fn emit_one(&self, id: ItemId, writer: &mut dyn Writer) -> bool {
        if !writer.align(self.arena[id.index()].alignment()) {
            return false;
        }
        debug_assert_eq!(writer.offset() as u32, self.offset_of(id));
        self.write_item(id, writer)
    }

    fn write_header(&self, writer: &mut dyn Writer, file_size: u32) -> bool {
        if !writer.write_bytes(&MAGIC) {
            return false;
        }
        if !writer.write_u32(0) {
            return false;
        }
        writer.count_checksum(true);
        if !writer.write_bytes(&VERSION) {
            return false;
        }
        if !writer.write_u32(file_size) {
            return false;
        }

        let foreign_offset = self.foreign_offset();
        let foreign_size = self.foreign_size();
        if !writer.write_u32(foreign_offset) || !writer.write_u32(foreign_size) {
            return false;
        }

        let num_classes = self.class_map.len() as u32;
        if !writer.write_u32(num_classes) || !writer.write_u32(HEADER_SIZE) {
            return false;
        }

        if !writer.write_u32(self.lnp_order.len() as u32) || !writer.write_u32(self.lnp_index_offset)
        {
            return false;
        }

        let num_literalarrays = self.literalarray_map.len() as u32;
        let literalarray_idx_offset = HEADER_SIZE + num_classes * ID_SIZE;
        if !writer.write_u32(num_literalarrays) || !writer.write_u32(literalarray_idx_offset) {
            return false;
        }

        let index_section_offset = literalarray_idx_offset + num_literalarrays * ID_SIZE;
        if !writer.write_u32(self.index_section.num_headers() as u32)
            || !writer.write_u32(index_section_offset)
        {
            return false;
        }

        true
    }

    pub fn foreign_offset(&self) -> u32 {
        match self.foreign_items.first() {
            Some(&id) => self.offset_of(id),
            None => 0,
        }
    }

    pub fn foreign_size(&self) -> u32 {
        match (self.foreign_items.first(), self.foreign_items.last()) {
            (Some(&first), Some(&last)) => {
                self.offset_of(last) + self.item_size(last) as u32 - self.offset_of(first)
            }
            _ => 0,
        }
    }

    // ------------------------------------------------------------------
    // per-item serialization
    // ------------------------------------------------------------------

    fn string_payload(s: &str) -> (u64, Vec<u8>) {
        let utf16_len = utf::utf16_length(s) as u64;
        let is_ascii = utf::is_ascii_payload(s) as u64;
        ((utf16_len << 1) | is_ascii, utf::str_to_mutf8(s))
    }

    pub fn item_size(&self, id: ItemId) -> usize {
        use crate::leb128::uleb128_size;

        match &self.arena[id.index()].kind {
            ItemKind::PrimitiveType(_) | ItemKind::End => 0,
            ItemKind::String(s) => {
                let (header, payload) = Self::string_payload(s);
                uleb128_size(header) + payload.len() + 1
            }
            ItemKind::ForeignClass { .. } => 4,
            ItemKind::Class(data) => {
                let mut size = self.class_header_size(id);
                for &field in &data.fields {
                    size += self.item_size(field);
                }
                for &method in &data.methods {
                    size += self.item_size(method);
                }
                size
            }
            ItemKind::Field(data) => {
                let mut size = 4 + 4 + uleb128_size(data.access_flags as u64);
                if data.value.is_some() {
                    size += 1 + 4;
                }
                for (_, list) in annotation_list_tags(&data.ann) {
                    size += list.len() * 5;
                }
                size + 1
            }
            ItemKind::ForeignField { .. } => 12,
            ItemKind::Method(data) => {
                let mut size = 2 + 2 + 4 + uleb128_size(data.access_flags as u64);
                if data.code.is_some() {
                    size += 1 + 4;
                }
                if data.source_lang.is_some() {
                    size += 1 + 1;
                }
                if data.debug_info.is_some() {
                    size += 1 + 4;
                }
                for (_, list) in annotation_list_tags(&data.ann) {
                    size += list.len() * 5;
                }
                if data.runtime_param_annotations.is_some() {
                    size += 1 + 4;
                }
                if data.param_annotations.is_some() {
                    size += 1 + 4;
                }
                size + 1
            }
            ItemKind::ForeignMethod { access_flags, .. } => {
                4 + 2 + 2 + 4 + uleb128_size(*access_flags as u64)
            }
            ItemKind::Proto(data) => {
                let nibbles = self.shorty_nibbles(data.ret_type, &data.params);
                let units = nibbles.len().div_ceil(4);
                units * 2 + self.proto_ref_types(data.ret_type, &data.params).len() * 4
            }
            ItemKind::Code(data) => {
                let mut size = uleb128_size(data.num_vregs as u64)
                    + uleb128_size(data.num_args as u64)
                    + uleb128_size(data.instructions.len() as u64)
                    + uleb128_size(data.try_blocks.len() as u64)
                    + data.instructions.len();
                for try_block in &data.try_blocks {
                    size += uleb128_size(try_block.start_pc as u64)
                        + uleb128_size(try_block.length as u64)
                        + uleb128_size(try_block.catch_blocks.len() as u64);
                    for catch in &try_block.catch_blocks {
                        size += uleb128_size(self.catch_type_value(catch) as u64)
                            + uleb128_size(catch.handler_pc as u64)
                            + uleb128_size(catch.code_size as u64);
                    }
                }
                size
            }
            ItemKind::DebugInfo(data) => {
                uleb128_size(data.line_start as u64)
                    + uleb128_size(data.parameters.len() as u64)
                    + data.parameters.len() * 4
                    + uleb128_size(data.constant_pool.len() as u64)
                    + data.constant_pool.len()
                    + uleb128_size(self.lnp_index_map.get(&data.line_number_program).copied().unwrap_or(0) as u64)
            }
            ItemKind::LineNumberProgram(bytes) => bytes.len(),
            ItemKind::Annotation(data) => 4 + 2 + data.elements.len() * 9,
            ItemKind::ScalarValue(payload) => payload.width(),
            ItemKind::ArrayValue(data) => {
                uleb128_size(data.values.len() as u64) + data.values.len() * data.component_width
            }
            ItemKind::LiteralArray(data) => {
                let mut size = 4;
                for entry in &data.literals {
                    size += 1 + match &entry.payload {
                        LiteralPayload::U8(_) => 1,
                        LiteralPayload::U16(_) => 2,
                        LiteralPayload::U32(_) => 4,
                        LiteralPayload::U64(_) => 8,
                        LiteralPayload::StringRef(_) | LiteralPayload::MethodRef(_) => 4,
                    };
                }
                size
            }
            ItemKind::MethodHandle { .. } => 1 + 4,
            ItemKind::ParamAnnotations { method, runtime } => {
                let lists = self.param_annotation_lists(*method, *runtime);
                let mut size = uleb128_size(lists.len() as u64);
                for list in lists {
                    size += uleb128_size(list.len() as u64) + list.len() * 4;
                }
                size
            }
        }
    }

    /// Per-parameter annotation lists of a method, runtime or source class.
    fn param_annotation_lists(&self, method: ItemId, runtime: bool) -> Vec<Vec<ItemId>> {
        match &self.arena[method.index()].kind {
            ItemKind::Method(data) => data
                .params
                .iter()
                .map(|p| {
                    if runtime {
                        p.ann.runtime_annotations.clone()
                    } else {
                        let mut list = p.ann.annotations.clone();
                        list.extend_from_slice(&p.ann.runtime_type_annotations);
                        list.extend_from_slice(&p.ann.type_annotations);
                        list
                    }
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn class_header_size(&self, id: ItemId) -> usize {
        use crate::leb128::uleb128_size;

        let data = match &self.arena[id.index()].kind {
            ItemKind::Class(data) => data,
            _ => return 0,
        };

        let mut size = 4 + 4;
        size += uleb128_size(data.access_flags as u64);
        size += uleb128_size(data.fields.len() as u64);
        size += uleb128_size(data.methods.len() as u64);
        if data.source_lang.is_some() {
            size += 1 + 1;
        }
        size += data.interfaces.len() * 5;
        if data.source_file.is_some() {
            size += 1 + 4;
        }
        for (_, list) in annotation_list_tags(&data.ann) {
            size += list.len() * 5;
        }
        size + 1
    }

    fn catch_type_value(&self, catch: &CatchBlockEntry) -> u32 {
        match catch.class {
            None => 0,
            Some(class) => {
                let from = self.offset_of(catch.method);
                let idx = self.scope_index(class, from).unwrap_or(0);
                idx as u32 + 1
            }
        }
    }

    fn write_annotation_lists(&self, ann: &AnnotationLists, writer: &mut dyn Writer) -> bool {
        for (tag, list) in annotation_list_tags(ann) {
            for &annotation in list {
                if !writer.write_byte(tag) || !writer.write_u32(self.offset_of(annotation)) {
                    return false;
                }
            }
        }
        true
    }

    pub fn write_item(&self, id: ItemId, writer: &mut dyn Writer) -> bool {
        match &self.arena[id.index()].kind {
            ItemKind::PrimitiveType(_) | ItemKind::End => true,
            ItemKind::String(s) => {
                let (header, payload) = Self::string_payload(s);
                writer.write_uleb128(header) && writer.write_bytes(&payload) && writer.write_byte(0)
            }
            ItemKind::ForeignClass { name_item } => writer.write_u32(self.offset_of(*name_item)),
            ItemKind::Class(data) => {
                if !writer.write_u32(self.offset_of(data.name_item)) {
                    return false;
                }
                let super_ref = data.super_class.map(|s| self.type_ref(s)).unwrap_or(0);
                if !writer.write_u32(super_ref) {
                    return false;
                }
                if !writer.write_uleb128(data.access_flags as u64)
                    || !writer.write_uleb128(data.fields.len() as u64)
                    || !writer.write_uleb128(data.methods.len() as u64)
                {
                    return false;
                }

                if let Some(lang) = data.source_lang {
                    if !writer.write_byte(TAG_SOURCE_LANG) || !writer.write_byte(lang) {
                        return false;
                    }
                }
                for &iface in &data.interfaces {
                    if !writer.write_byte(TAG_INTERFACE) || !writer.write_u32(self.type_ref(iface)) {
                        return false;
                    }
                }
                if let Some(source_file) = data.source_file {
                    if !writer.write_byte(TAG_SOURCE_FILE)
                        || !writer.write_u32(self.offset_of(source_file))
                    {
                        return false;
                    }
                }
                if !self.write_annotation_lists(&data.ann, writer) {
                    return false;
                }
                if !writer.write_byte(TAG_NOTHING) {
                    return false;
                }

                for &field in &data.fields {
                    if !self.write_item(field, writer) {
                        return false;
                    }
                }
                for &method in &data.methods {
                    if !self.write_item(method, writer) {
                        return false;
                    }
                }
                true
            }
            ItemKind::Field(data) => {
                if !writer.write_u32(self.offset_of(data.name_item))
                    || !writer.write_u32(self.type_ref(data.type_item))
                    || !writer.write_uleb128(data.access_flags as u64)
                {
                    return false;
                }
                if let Some(value) = data.value {
                    if !writer.write_byte(TAG_VALUE) || !writer.write_u32(self.offset_of(value)) {
                        return false;
                    }
                }
                if !self.write_annotation_lists(&data.ann, writer) {
                    return false;
                }
                writer.write_byte(TAG_NOTHING)
            }
            ItemKind::ForeignField {
                class,
                name_item,
                type_item,
            } => {
                writer.write_u32(self.offset_of(*class))
                    && writer.write_u32(self.offset_of(*name_item))
                    && writer.write_u32(self.type_ref(*type_item))
            }
            ItemKind::Method(data) => {
                let from = self.offset_of(id);
                let proto_idx = self.scope_index(data.proto, from).unwrap_or(0);
                if !writer.write_u16(proto_idx)
                    || !writer.write_u16(0)
                    || !writer.write_u32(self.offset_of(data.name_item))
                    || !writer.write_uleb128(data.access_flags as u64)
                {
                    return false;
                }
                if let Some(code) = data.code {
                    if !writer.write_byte(TAG_CODE) || !writer.write_u32(self.offset_of(code)) {
                        return false;
                    }
                }
                if let Some(lang) = data.source_lang {
                    if !writer.write_byte(TAG_METHOD_SOURCE_LANG) || !writer.write_byte(lang) {
                        return false;
                    }
                }
                if let Some(debug_info) = data.debug_info {
                    if !writer.write_byte(TAG_DEBUG_INFO)
                        || !writer.write_u32(self.offset_of(debug_info))
                    {
                        return false;
                    }
                }
                if !self.write_annotation_lists(&data.ann, writer) {
                    return false;
                }
                if let Some(rpa) = data.runtime_param_annotations {
                    if !writer.write_byte(TAG_RUNTIME_PARAM_ANNOTATION)
                        || !writer.write_u32(self.offset_of(rpa))
                    {
                        return false;
                    }
                }
                if let Some(pa) = data.param_annotations {
                    if !writer.write_byte(TAG_PARAM_ANNOTATION) || !writer.write_u32(self.offset_of(pa))
                    {
                        return false;
                    }
                }
                writer.write_byte(TAG_NOTHING)
            }
            ItemKind::ForeignMethod {
                class,
                name_item,
                proto,
                access_flags,
            } => {
                let from = self.offset_of(id);
                let proto_idx = self.scope_index(*proto, from).unwrap_or(0);
                writer.write_u32(self.offset_of(*class))
                    && writer.write_u16(proto_idx)
                    && writer.write_u16(0)
                    && writer.write_u32(self.offset_of(*name_item))
                    && writer.write_uleb128(*access_flags as u64)
            }
            ItemKind::Proto(data) => {
                let nibbles = self.shorty_nibbles(data.ret_type, &data.params);
                for chunk in nibbles.chunks(4) {
                    let mut unit: u16 = 0;
                    for (i, &n) in chunk.iter().enumerate() {
                        unit |= (n as u16) << (4 * i);
                    }
                    if !writer.write_u16(unit) {
                        return false;
                    }
                }
                for ref_type in self.proto_ref_types(data.ret_type, &data.params) {
                    if !writer.write_u32(self.offset_of(ref_type)) {
                        return false;
                    }
                }
                true
            }
            ItemKind::Code(data) => {
                if !writer.write_uleb128(data.num_vregs as u64)
                    || !writer.write_uleb128(data.num_args as u64)
                    || !writer.write_uleb128(data.instructions.len() as u64)
                    || !writer.write_uleb128(data.try_blocks.len() as u64)
                    || !writer.write_bytes(&data.instructions)
                {
                    return false;
                }
                for try_block in &data.try_blocks {
                    if !writer.write_uleb128(try_block.start_pc as u64)
                        || !writer.write_uleb128(try_block.length as u64)
                        || !writer.write_uleb128(try_block.catch_blocks.len() as u64)
                    {
                        return false;
                    }
                    for catch in &try_block.catch_blocks {
                        if !writer.write_uleb128(self.catch_type_value(catch) as u64)
                            || !writer.write_uleb128(catch.handler_pc as u64)
                            || !writer.write_uleb128(catch.code_size as u64)
                        {
                            return false;
                        }
                    }
                }
                true
            }
            ItemKind::DebugInfo(data) => {
                if !writer.write_uleb128(data.line_start as u64)
                    || !writer.write_uleb128(data.parameters.len() as u64)
                {
                    return false;
                }
                for param in &data.parameters {
                    let name_offset = param.map(|p| self.offset_of(p)).unwrap_or(0);
                    if !writer.write_u32(name_offset) {
                        return false;
                    }
                }
                if !writer.write_uleb128(data.constant_pool.len() as u64)
                    || !writer.write_bytes(&data.constant_pool)
                {
                    return false;
                }
                let lnp_index = self
                    .lnp_index_map
                    .get(&data.line_number_program)
                    .copied()
                    .unwrap_or(0);
                writer.write_uleb128(lnp_index as u64)
            }
            ItemKind::LineNumberProgram(bytes) => writer.write_bytes(bytes),
            ItemKind::Annotation(data) => {
                if !writer.write_u32(self.offset_of(data.class))
                    || !writer.write_u16(data.elements.len() as u16)
                {
                    return false;
                }
                for elem in &data.elements {
                    if !writer.write_u32(self.offset_of(elem.name_item))
                        || !writer.write_u32(self.offset_of(elem.value))
                    {
                        return false;
                    }
                }
                for &tag in &data.tags {
                    if !writer.write_byte(tag) {
                        return false;
                    }
                }
                true
            }
            ItemKind::ScalarValue(payload) => self.write_value_payload(*payload, payload.width(), writer),
            ItemKind::ArrayValue(data) => {
                if !writer.write_uleb128(data.values.len() as u64) {
                    return false;
                }
                for &value in &data.values {
                    if !self.write_value_payload(value, data.component_width, writer) {
                        return false;
                    }
                }
                true
            }
            ItemKind::LiteralArray(data) => {
                if !writer.write_u32(data.literals.len() as u32) {
                    return false;
                }
                for entry in &data.literals {
                    if !writer.write_byte(entry.tag) {
                        return false;
                    }
                    let ok = match &entry.payload {
                        LiteralPayload::U8(v) => writer.write_byte(*v),
                        LiteralPayload::U16(v) => writer.write_u16(*v),
                        LiteralPayload::U32(v) => writer.write_u32(*v),
                        LiteralPayload::U64(v) => writer.write_u64(*v),
                        LiteralPayload::StringRef(id) => writer.write_u32(self.offset_of(*id)),
                        LiteralPayload::MethodRef(id) => writer.write_u32(self.offset_of(*id)),
                    };
                    if !ok {
                        return false;
                    }
                }
                true
            }
            ItemKind::MethodHandle { kind, target } => {
                writer.write_byte(*kind) && writer.write_u32(self.offset_of(*target))
            }
            ItemKind::ParamAnnotations { method, runtime } => {
                let lists = self.param_annotation_lists(*method, *runtime);
                if !writer.write_uleb128(lists.len() as u64) {
                    return false;
                }
                for list in lists {
                    if !writer.write_uleb128(list.len() as u64) {
                        return false;
                    }
                    for annotation in list {
                        if !writer.write_u32(self.offset_of(annotation)) {
                            return false;
                        }
                    }
                }
                true
            }
        }
    }

    fn write_value_payload(&self, payload: ValuePayload, width: usize, writer: &mut dyn Writer) -> bool {
        let bits: u64 = match payload {
            ValuePayload::Integer(v) => v as u64,
            ValuePayload::Long(v) => v,
            ValuePayload::Float(v) => v as u64,
            ValuePayload::Double(v) => v,
            ValuePayload::Id(id) => self.offset_of(id) as u64,
        };
        writer.write_bytes(&bits.to_le_bytes()[..width])
    }

    // ------------------------------------------------------------------
    // statistics
    // ------------------------------------------------------------------

    /// Per-section byte totals, as surfaced by `--size-stat`.
    pub fn stat(&mut self) -> BTreeMap<String, usize> {
        self.deduplicate_items();
        self.compute_layout();

        let mut stat: BTreeMap<String, usize> = BTreeMap::new();
        stat.insert("header_item".into(), HEADER_SIZE as usize);
        stat.insert("class_idx_item".into(), self.class_map.len() * ID_SIZE as usize);
        stat.insert(
            "line_number_program_idx_item".into(),
            self.lnp_order.len() * ID_SIZE as usize,
        );
        stat.insert(
            "literalarray_idx".into(),
            self.literalarray_map.len() * ID_SIZE as usize,
        );
        stat.insert("index_section_item".into(), self.index_section.size() as usize);
        stat.insert("foreign_item".into(), self.foreign_size() as usize);

        let mut num_ins = 0usize;
        let mut codesize = 0usize;
        for &id in &self.items {
            let item = &self.arena[id.index()];
            if !item.needs_emit {
                continue;
            }
            let size = self.item_size(id);
            if size != 0 {
                *stat.entry(item.name().to_string()).or_insert(0) += size;
            }
            if let ItemKind::Code(data) = &item.kind {
                num_ins += data.num_instructions as usize;
                codesize += data.instructions.len();
            }
        }
        stat.insert("instructions_number".into(), num_ins);
        stat.insert("codesize".into(), codesize);

        stat
    }
}

fn annotation_list_tags(ann: &AnnotationLists) -> [(u8, &Vec<ItemId>); 4] {
    [
        (TAG_RUNTIME_ANNOTATION, &ann.runtime_annotations),
        (TAG_ANNOTATION, &ann.annotations),
        (TAG_RUNTIME_TYPE_ANNOTATION, &ann.runtime_type_annotations),
        (TAG_TYPE_ANNOTATION, &ann.type_annotations),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_interning_returns_same_item() {
        let mut container = ItemContainer::new();
        let a = container.get_or_create_string("hello");
        let b = container.get_or_create_string("hello");
        let c = container.get_or_create_string("other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_class_name_aliases_string() {
        let mut container = ItemContainer::new();
        let class = container.get_or_create_class("LR;");
        let name = match &container.item(class).kind {
            ItemKind::Class(data) => data.name_item,
            _ => unreachable!(),
        };
        assert_eq!(container.get_or_create_string("LR;"), name);
    }

    #[test]
    fn test_proto_interning() {
        let mut container = ItemContainer::new();
        let i32_item = container.create_item(ItemKind::PrimitiveType(TypeId::I32));
        let void_item = container.create_item(ItemKind::PrimitiveType(TypeId::Void));
        let class = container.get_or_create_class("LR;");

        let p1 = container.get_or_create_proto(void_item, &[i32_item, class]);
        let p2 = container.get_or_create_proto(void_item, &[i32_item, class]);
        let p3 = container.get_or_create_proto(i32_item, &[i32_item, class]);
        assert_eq!(p1, p2);
        assert_ne!(p1, p3);
    }

    #[test]
    fn test_float_values_intern_by_bit_pattern() {
        let mut container = ItemContainer::new();
        let pos = container.get_or_create_double_value(0.0);
        let neg = container.get_or_create_double_value(-0.0);
        let again = container.get_or_create_double_value(0.0);
        assert_ne!(pos, neg);
        assert_eq!(pos, again);
    }

    #[test]
    fn test_literal_array_map_orders_by_length_then_lex() {
        let mut container = ItemContainer::new();
        container.get_or_create_literal_array("bb");
        container.get_or_create_literal_array("a");
        container.get_or_create_literal_array("ab");

        let keys: Vec<&str> = container
            .literalarray_map
            .keys()
            .map(|k| k.0.as_str())
            .collect();
        assert_eq!(keys, vec!["a", "ab", "bb"]);
    }

    #[test]
    fn test_type_ref_encoding() {
        let mut container = ItemContainer::new();
        let prim = container.create_item(ItemKind::PrimitiveType(TypeId::F64));
        assert_eq!(container.type_ref(prim), TypeId::F64 as u32);
        assert!(container.type_ref(prim) < HEADER_SIZE);
    }

    #[test]
    fn test_empty_container_layout_and_write() {
        let mut container = ItemContainer::new();
        let size = container.compute_layout();
        assert_eq!(size, HEADER_SIZE);

        let mut writer = MemoryWriter::new();
        container.write(&mut writer).unwrap();
        let data = writer.data();
        assert_eq!(&data[..5], b"PANDA");
        assert_eq!(data.len(), HEADER_SIZE as usize);

        // file size field sits after magic+checksum+version
        let size_field = u32::from_le_bytes(data[16..20].try_into().unwrap());
        assert_eq!(size_field, HEADER_SIZE);
    }

    #[test]
    fn test_checksum_covers_post_slot_bytes() {
        let mut container = ItemContainer::new();
        container.get_or_create_string("payload");

        let mut writer = MemoryWriter::new();
        container.write(&mut writer).unwrap();
        let data = writer.data();

        let stored = u32::from_le_bytes(data[8..12].try_into().unwrap());
        let computed = adler32::adler32(&data[12..]).unwrap();
        assert_eq!(stored, computed);
    }

    #[test]
    fn test_layout_offsets_are_monotonic() {
        let mut container = ItemContainer::new();
        container.get_or_create_string("one");
        container.get_or_create_string("two");
        container.get_or_create_class("LA;");
        let size = container.compute_layout();

        let mut last_end = 0u32;
        for &id in container.foreign_items.iter().chain(container.items.iter()) {
            let item = container.item(id);
            if !item.needs_emit {
                continue;
            }
            assert!(item.offset >= last_end, "offset overlap at {:?}", id);
            last_end = item.offset + container.item_size(id) as u32;
        }
        assert!(last_end <= size);
    }

    #[test]
    fn test_written_size_matches_computed_size() {
        let mut container = ItemContainer::new();
        container.get_or_create_string("hello");
        container.get_or_create_class("LA;");
        container.get_or_create_integer_value(42);
        let total = container.compute_layout();

        let mut writer = MemoryWriter::new();
        container.write(&mut writer).unwrap();
        assert_eq!(writer.data().len() as u32, total);

        for &id in &container.items {
            if !container.item(id).needs_emit {
                continue;
            }
            let mut w = MemoryWriter::with_start_offset(container.offset_of(id) as usize);
            assert!(container.write_item(id, &mut w));
            assert_eq!(
                w.data().len(),
                container.item_size(id),
                "size mismatch for {}",
                container.item(id).name()
            );
        }
    }
}
