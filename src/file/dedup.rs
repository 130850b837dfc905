//! Content-hash deduplication of serialized items.

use std::collections::HashMap;

use adler32::RollingAdler32;

use super::items::ItemId;

/// Serialized form of one item, keyed by hash with byte-equality confirm.
struct ItemData {
    item: ItemId,
    bytes: Vec<u8>,
}

/// Merges items whose serialized bytes are identical. The first item seen
/// with a given byte sequence survives; later duplicates are reported back
/// so the caller can redirect references and clear their emission flag.
#[derive(Default)]
pub struct ItemDeduper {
    items: HashMap<u32, Vec<ItemData>>,
    unique: usize,
}

impl ItemDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the surviving item for `item` with the given serialization:
    /// `item` itself when it is the first of its kind, the earlier twin
    /// otherwise.
    pub fn deduplicate(&mut self, item: ItemId, bytes: Vec<u8>) -> ItemId {
        let hash = {
            let mut adler = RollingAdler32::new();
            adler.update_buffer(&bytes);
            adler.hash()
        };

        let entries = self.items.entry(hash).or_default();
        for entry in entries.iter() {
            if entry.bytes == bytes {
                return entry.item;
            }
        }

        entries.push(ItemData { item, bytes });
        self.unique += 1;
        item
    }

    pub fn unique_count(&self) -> usize {
        self.unique
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_bytes_merge() {
        let mut deduper = ItemDeduper::new();
        assert_eq!(deduper.deduplicate(ItemId(1), vec![1, 2, 3]), ItemId(1));
        assert_eq!(deduper.deduplicate(ItemId(2), vec![1, 2, 3]), ItemId(1));
        assert_eq!(deduper.unique_count(), 1);
    }

    #[test]
    fn test_distinct_bytes_survive() {
        let mut deduper = ItemDeduper::new();
        assert_eq!(deduper.deduplicate(ItemId(1), vec![1]), ItemId(1));
        assert_eq!(deduper.deduplicate(ItemId(2), vec![2]), ItemId(2));
        assert_eq!(deduper.unique_count(), 2);
    }
}
