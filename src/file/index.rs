//! The index section: per-scope 16-bit pools of classes, methods, fields and
//! protos.
//!
//! A header covers a contiguous run of items `[start, end)` and exposes up
//! to four sorted pools; every indexed item referenced from inside the run
//! receives a 16-bit index in the pool of its kind. A pool holds at most
//! 65 536 entries; when a bulk insertion would overflow, the current header
//! is closed at the inserting item and a fresh one is opened.

use std::collections::HashSet;

use super::items::{IndexAssignment, Item, ItemId, ItemKind};
use super::writer::Writer;
use super::{ID_SIZE, INDEX_COUNT_16, MAX_INDEX_16};

#[derive(Debug, Default)]
pub struct IndexBucket {
    pub items: Vec<ItemId>,
    present: HashSet<ItemId>,
    pub offset: u32,
}

impl IndexBucket {
    fn has(&self, id: ItemId) -> bool {
        self.present.contains(&id)
    }

    fn add(&mut self, id: ItemId) {
        if self.present.insert(id) {
            self.items.push(id);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug)]
pub struct IndexHeader {
    pub start: ItemId,
    pub end: ItemId,
    pub buckets: [IndexBucket; INDEX_COUNT_16],
    pub offset: u32,
}

impl IndexHeader {
    fn new(start: ItemId, end: ItemId) -> Self {
        Self {
            start,
            end,
            buckets: Default::default(),
            offset: 0,
        }
    }

    /// Either every dependency fits, or nothing is inserted.
    fn try_add(&mut self, deps: &[ItemId], arena: &[Item]) -> bool {
        let mut additions: [Vec<ItemId>; INDEX_COUNT_16] = Default::default();

        for &dep in deps {
            let slot = arena[dep.index()]
                .index_type()
                .slot()
                .expect("index dependency without a 16-bit pool");
            if self.buckets[slot].has(dep) || additions[slot].contains(&dep) {
                continue;
            }
            additions[slot].push(dep);
        }

        for (slot, new_items) in additions.iter().enumerate() {
            if self.buckets[slot].len() + new_items.len() > MAX_INDEX_16 {
                return false;
            }
        }

        for (slot, new_items) in additions.iter().enumerate() {
            for &id in new_items {
                self.buckets[slot].add(id);
            }
        }

        true
    }
}

#[derive(Debug, Default)]
pub struct IndexSection {
    pub headers: Vec<IndexHeader>,
    pub offset: u32,
}

/// Bytes one header occupies: start, end, four (count, offset) pairs.
pub const INDEX_HEADER_SIZE: u32 = (2 + 2 * INDEX_COUNT_16 as u32) * ID_SIZE;

impl IndexSection {
    pub fn reset(&mut self, arena: &mut [Item]) {
        for header in &self.headers {
            for bucket in &header.buckets {
                for &id in &bucket.items {
                    arena[id.index()].clear_indexes();
                }
            }
        }
        self.headers.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn num_headers(&self) -> usize {
        self.headers.len()
    }

    /// Routes one item's dependency set into the current header, rolling
    /// over to a new scope when the pools cannot take the whole set.
    pub fn add_item_dependencies(
        &mut self,
        item: ItemId,
        deps: &[ItemId],
        end_sentinel: ItemId,
        arena: &[Item],
    ) {
        if self.headers.is_empty() {
            self.headers.push(IndexHeader::new(item, end_sentinel));
        }

        if self.headers.last_mut().unwrap().try_add(deps, arena) {
            return;
        }

        self.headers.last_mut().unwrap().end = item;
        self.headers.push(IndexHeader::new(item, end_sentinel));

        if !self.headers.last_mut().unwrap().try_add(deps, arena) {
            panic!("cannot add {} dependencies to a fresh index scope", deps.len());
        }
    }

    pub fn close(&mut self, end_sentinel: ItemId) {
        if let Some(header) = self.headers.last_mut() {
            header.end = end_sentinel;
        }
    }

    /// Sorts every pool and hands out the 16-bit indexes.
    pub fn update_items(&mut self, arena: &mut [Item]) {
        for header in &mut self.headers {
            for bucket in &mut header.buckets {
                bucket.items.sort_by_key(|id| sort_key(&arena[id.index()]));
                for (i, &id) in bucket.items.iter().enumerate() {
                    arena[id.index()].indexes.push(IndexAssignment {
                        start: header.start,
                        end: header.end,
                        index: i as u16,
                    });
                }
            }
        }
    }

    /// Places headers first, then every pool, at `offset`; returns the total
    /// section size.
    pub fn compute_layout(&mut self, offset: u32) -> u32 {
        self.offset = offset;
        let mut cur = offset + self.headers.len() as u32 * INDEX_HEADER_SIZE;

        for header in &mut self.headers {
            for bucket in &mut header.buckets {
                bucket.offset = cur;
                cur += bucket.len() as u32 * ID_SIZE;
            }
        }
        for (i, header) in self.headers.iter_mut().enumerate() {
            header.offset = self.offset + i as u32 * INDEX_HEADER_SIZE;
        }

        cur - offset
    }

    pub fn size(&self) -> u32 {
        let entries: usize = self
            .headers
            .iter()
            .flat_map(|h| h.buckets.iter())
            .map(|b| b.len())
            .sum();
        self.headers.len() as u32 * INDEX_HEADER_SIZE + entries as u32 * ID_SIZE
    }

    pub fn write(&self, writer: &mut dyn Writer, offset_of: impl Fn(ItemId) -> u32) -> bool {
        for header in &self.headers {
            if !writer.write_u32(offset_of(header.start)) {
                return false;
            }
            if !writer.write_u32(offset_of(header.end)) {
                return false;
            }
            for bucket in &header.buckets {
                if !writer.write_u32(bucket.len() as u32) {
                    return false;
                }
                if !writer.write_u32(bucket.offset) {
                    return false;
                }
            }
        }

        for header in &self.headers {
            for bucket in &header.buckets {
                for &id in &bucket.items {
                    if !writer.write_u32(offset_of(id)) {
                        return false;
                    }
                }
            }
        }

        true
    }
}

/// Pool ordering: classes sort primitives-before-references first, then
/// everything falls back to creation order.
fn sort_key(item: &Item) -> (u8, u32) {
    let type_rank = match &item.kind {
        ItemKind::PrimitiveType(id) => *id as u8,
        _ => u8::MAX,
    };
    (type_rank, item.order_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena_with(kinds: Vec<ItemKind>) -> Vec<Item> {
        kinds
            .into_iter()
            .enumerate()
            .map(|(i, kind)| {
                let mut item = Item::new(kind);
                item.order_index = i as u32;
                item
            })
            .collect()
    }

    fn foreign_class(i: u32) -> ItemKind {
        ItemKind::ForeignClass { name_item: ItemId(i) }
    }

    #[test]
    fn test_single_scope() {
        let mut arena = arena_with(vec![ItemKind::End, foreign_class(0), foreign_class(0)]);
        let end = ItemId(0);

        let mut section = IndexSection::default();
        section.add_item_dependencies(ItemId(1), &[ItemId(1), ItemId(2)], end, &arena);
        section.close(end);
        section.update_items(&mut arena);

        assert_eq!(section.num_headers(), 1);
        assert_eq!(section.headers[0].buckets[0].len(), 2);
        assert_eq!(arena[1].indexes[0].index, 0);
        assert_eq!(arena[2].indexes[0].index, 1);
    }

    #[test]
    fn test_duplicate_deps_are_inserted_once() {
        let mut arena = arena_with(vec![ItemKind::End, foreign_class(0)]);
        let end = ItemId(0);

        let mut section = IndexSection::default();
        section.add_item_dependencies(ItemId(1), &[ItemId(1), ItemId(1), ItemId(1)], end, &arena);
        section.close(end);
        section.update_items(&mut arena);

        assert_eq!(section.headers[0].buckets[0].len(), 1);
    }

    #[test]
    fn test_scope_splits_when_a_pool_would_overflow() {
        let mut arena = vec![Item::new(ItemKind::End)];
        for i in 0..=MAX_INDEX_16 {
            let mut item = Item::new(foreign_class(0));
            item.order_index = i as u32 + 1;
            arena.push(item);
        }
        let end = ItemId(0);

        let mut section = IndexSection::default();
        let full_pool: Vec<ItemId> = (1..=MAX_INDEX_16 as u32).map(ItemId).collect();
        section.add_item_dependencies(ItemId(1), &full_pool, end, &arena);
        assert_eq!(section.num_headers(), 1);

        // one more class reference cannot fit; the current scope closes at
        // the inserting item and a fresh one opens there
        let extra = ItemId(MAX_INDEX_16 as u32 + 1);
        section.add_item_dependencies(ItemId(2), &[extra], end, &arena);
        assert_eq!(section.num_headers(), 2);
        assert_eq!(section.headers[0].end, ItemId(2));
        assert_eq!(section.headers[1].start, ItemId(2));

        section.close(end);
        assert_eq!(section.headers[1].end, end);
    }

    #[test]
    fn test_layout_places_headers_then_pools() {
        let mut arena = arena_with(vec![ItemKind::End, foreign_class(0), foreign_class(0)]);
        let end = ItemId(0);

        let mut section = IndexSection::default();
        section.add_item_dependencies(ItemId(1), &[ItemId(1), ItemId(2)], end, &arena);
        section.close(end);
        section.update_items(&mut arena);

        let size = section.compute_layout(100);
        assert_eq!(size, INDEX_HEADER_SIZE + 2 * ID_SIZE);
        assert_eq!(section.size(), size);
        assert_eq!(section.headers[0].offset, 100);
        assert_eq!(section.headers[0].buckets[0].offset, 100 + INDEX_HEADER_SIZE);
    }
}
