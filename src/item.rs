//! Row instances and their cross-table links.
//!
//! Every row a table yields is a [`WrappedItem`] stored in the model's
//! [`ItemArena`]. Links are symmetric: connecting `a` to `b` records `b`
//! under `b`'s table in `a` and vice versa. Keys are never reused, so a
//! stale key simply stops resolving once its table resets.

use std::collections::BTreeMap;
use std::fmt;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{class::ClassId, table::TableId};

/// Arena handle of a wrapped item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemKey(u64);

impl ItemKey {
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Row key of an item within its table.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemIndex(String);

impl ItemIndex {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemIndex {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ItemIndex {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<usize> for ItemIndex {
    fn from(value: usize) -> Self {
        Self(value.to_string())
    }
}

/// Identity of an item as an instance of a class, stable across rebuilds.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId {
    #[serde(rename = "classId")]
    pub class_id: ClassId,
    pub index: ItemIndex,
}

impl InstanceId {
    /// `<classId>_<index>`, used as element id by renderers.
    pub fn export_id(&self) -> String {
        format!("{}_{}", self.class_id, self.index)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{\"classId\":\"{}\",\"index\":\"{}\"}}",
            self.class_id, self.index
        )
    }
}

/// One row of a table plus its links to rows of other tables.
#[derive(Clone, Debug)]
pub struct WrappedItem {
    key: ItemKey,
    table_id: TableId,
    pub index: ItemIndex,
    pub row: Map<String, Value>,
    connected: BTreeMap<TableId, Vec<ItemKey>>,
    parent_index: Option<ItemIndex>,
    duplicates: Vec<ItemKey>,
    duplicate_of: Option<ItemKey>,
}

impl WrappedItem {
    pub fn key(&self) -> ItemKey {
        self.key
    }

    pub fn table_id(&self) -> &TableId {
        &self.table_id
    }

    pub fn parent_index(&self) -> Option<&ItemIndex> {
        self.parent_index.as_ref()
    }

    /// Items linked from the given table, in link order.
    pub fn connected_in(&self, table_id: &TableId) -> &[ItemKey] {
        self.connected.get(table_id).map_or(&[], Vec::as_slice)
    }

    pub fn connected_tables(&self) -> impl Iterator<Item = &TableId> {
        self.connected.keys()
    }

    /// Every linked item, grouped by table id order.
    pub fn all_connected(&self) -> Vec<ItemKey> {
        self.connected.values().flatten().copied().collect()
    }

    pub fn duplicates(&self) -> &[ItemKey] {
        &self.duplicates
    }
}

/// Owner of every live item of a model.
#[derive(Debug, Default)]
pub struct ItemArena {
    items: AHashMap<ItemKey, WrappedItem>,
    next_key: u64,
}

impl ItemArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(
        &mut self,
        table_id: TableId,
        index: ItemIndex,
        row: Map<String, Value>,
        parent_index: Option<ItemIndex>,
    ) -> ItemKey {
        let key = ItemKey(self.next_key);
        self.next_key += 1;
        self.items.insert(
            key,
            WrappedItem {
                key,
                table_id,
                index,
                row,
                connected: BTreeMap::new(),
                parent_index,
                duplicates: Vec::new(),
                duplicate_of: None,
            },
        );
        key
    }

    pub fn get(&self, key: ItemKey) -> Option<&WrappedItem> {
        self.items.get(&key)
    }

    pub(crate) fn get_mut(&mut self, key: ItemKey) -> Option<&mut WrappedItem> {
        self.items.get_mut(&key)
    }

    pub fn contains(&self, key: ItemKey) -> bool {
        self.items.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Links two items in both directions, including every duplicate
    /// registered on either side.
    pub(crate) fn connect(&mut self, a: ItemKey, b: ItemKey) {
        self.link_one_way(a, b);
        self.link_one_way(b, a);
        let a_dups = self.items.get(&a).map(|i| i.duplicates.clone()).unwrap_or_default();
        for dup in a_dups {
            self.link_one_way(b, dup);
            self.link_one_way(dup, b);
        }
        let b_dups = self.items.get(&b).map(|i| i.duplicates.clone()).unwrap_or_default();
        for dup in b_dups {
            self.link_one_way(a, dup);
            self.link_one_way(dup, a);
        }
    }

    fn link_one_way(&mut self, from: ItemKey, to: ItemKey) {
        let Some(to_table) = self.items.get(&to).map(|i| i.table_id.clone()) else {
            return;
        };
        if let Some(item) = self.items.get_mut(&from) {
            let list = item.connected.entry(to_table).or_default();
            if !list.contains(&to) {
                list.push(to);
            }
        }
    }

    pub(crate) fn register_duplicate(&mut self, original: ItemKey, duplicate: ItemKey) {
        if let Some(item) = self.items.get_mut(&original) {
            if !item.duplicates.contains(&duplicate) {
                item.duplicates.push(duplicate);
            }
        }
        if let Some(item) = self.items.get_mut(&duplicate) {
            item.duplicate_of = Some(original);
        }
    }

    /// Severs every link of `key`, leaving the item itself in place.
    pub(crate) fn disconnect(&mut self, key: ItemKey) {
        let Some(item) = self.items.get_mut(&key) else {
            return;
        };
        let table_id = item.table_id.clone();
        let links = std::mem::take(&mut item.connected);
        for other in links.into_values().flatten() {
            if let Some(other_item) = self.items.get_mut(&other) {
                if let Some(list) = other_item.connected.get_mut(&table_id) {
                    list.retain(|k| *k != key);
                    if list.is_empty() {
                        other_item.connected.remove(&table_id);
                    }
                }
            }
        }
    }

    /// Disconnects and removes the item. An evicted duplicate is also
    /// dropped from its original's duplicate list.
    pub(crate) fn evict(&mut self, key: ItemKey) {
        self.disconnect(key);
        let Some(item) = self.items.remove(&key) else {
            return;
        };
        if let Some(original) = item.duplicate_of.and_then(|k| self.items.get_mut(&k)) {
            original.duplicates.retain(|dup| *dup != key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_connect_is_bidirectional() {
        let mut arena = ItemArena::new();
        let a = arena.insert(TableId::from("t1"), "0".into(), row(json!({})), None);
        let b = arena.insert(TableId::from("t2"), "0".into(), row(json!({})), None);
        arena.connect(a, b);
        arena.connect(a, b);
        assert_eq!(arena.get(a).unwrap().connected_in(&TableId::from("t2")), &[b]);
        assert_eq!(arena.get(b).unwrap().connected_in(&TableId::from("t1")), &[a]);
    }

    #[test]
    fn test_evict_removes_reverse_links() {
        let mut arena = ItemArena::new();
        let a = arena.insert(TableId::from("t1"), "0".into(), row(json!({})), None);
        let b = arena.insert(TableId::from("t2"), "0".into(), row(json!({})), None);
        arena.connect(a, b);
        arena.evict(b);
        assert!(!arena.contains(b));
        assert!(arena.get(a).unwrap().connected_in(&TableId::from("t2")).is_empty());
        assert_eq!(arena.get(a).unwrap().connected_tables().count(), 0);
    }

    #[test]
    fn test_duplicates_receive_later_links() {
        let mut arena = ItemArena::new();
        let original = arena.insert(TableId::from("t1"), "0".into(), row(json!({"x": 1})), None);
        let dup = arena.insert(TableId::from("t1dup"), "0".into(), row(json!({"x": 1})), None);
        arena.register_duplicate(original, dup);
        let other = arena.insert(TableId::from("t2"), "0".into(), row(json!({})), None);
        arena.connect(original, other);
        assert_eq!(arena.get(dup).unwrap().connected_in(&TableId::from("t2")), &[other]);
        assert_eq!(
            arena.get(other).unwrap().connected_in(&TableId::from("t1dup")),
            &[dup]
        );
    }

    #[test]
    fn test_evicted_duplicate_leaves_the_original_list() {
        let mut arena = ItemArena::new();
        let original = arena.insert(TableId::from("t1"), "0".into(), row(json!({})), None);
        let dup = arena.insert(TableId::from("t1dup"), "0".into(), row(json!({})), None);
        arena.register_duplicate(original, dup);
        arena.evict(dup);
        assert!(arena.get(original).unwrap().duplicates().is_empty());

        let other = arena.insert(TableId::from("t2"), "0".into(), row(json!({})), None);
        arena.connect(original, other);
        assert_eq!(arena.get(other).unwrap().connected_tables().count(), 1);
    }

    #[test]
    fn test_instance_id_formats() {
        let id = InstanceId {
            class_id: ClassId::from("class1"),
            index: ItemIndex::from(3usize),
        };
        assert_eq!(id.to_string(), r#"{"classId":"class1","index":"3"}"#);
        assert_eq!(id.export_id(), "class1_3");
    }
}
