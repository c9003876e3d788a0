mod btree;

use std::collections::HashMap;

use btree::BPlusTree;

use crate::record::{Record, Rid};

/// B+-tree order used for every column tree, matching the source's
/// `BPlusTree(order=75)`.
const TREE_ORDER: usize = 75;

/// Number of pending (key, rid) pairs an insert cache accumulates
/// before it is sorted and flushed into its column's B+-tree via
/// `batch_insert`. Mirrors `Index.insert_cache_size`.
const INSERT_CACHE_SIZE: usize = 50_000;

struct ColumnIndex {
    tree: BPlusTree<i64, Vec<Rid>>,
    /// Sorted, not yet flushed into `tree`.
    insert_cache: Vec<(i64, Rid)>,
    /// Appended in arrival order; sorted once at flush time. Grounded
    /// in `index.py`'s split of `unsorted_cache` (cheap append) from
    /// `insert_cache` (sorted, batch-inserted).
    unsorted_cache: Vec<(i64, Rid)>,
}

impl ColumnIndex {
    fn new() -> Self {
        ColumnIndex {
            tree: BPlusTree::new(TREE_ORDER),
            insert_cache: Vec::new(),
            unsorted_cache: Vec::new(),
        }
    }

    fn add(&mut self, key: i64, rid: Rid) {
        self.unsorted_cache.push((key, rid));
        if self.unsorted_cache.len() >= INSERT_CACHE_SIZE {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if !self.unsorted_cache.is_empty() {
            let mut pending = std::mem::take(&mut self.unsorted_cache);
            pending.sort_by_key(|(k, _)| *k);
            self.insert_cache = merge_sorted(std::mem::take(&mut self.insert_cache), pending);
        }
        if self.insert_cache.is_empty() {
            return;
        }
        let grouped = group_consecutive_keys(&self.insert_cache);
        if self.tree.batch_insert(&grouped).is_err() {
            for (key, rids) in grouped {
                for rid in rids {
                    append_rid(&mut self.tree, key, rid);
                }
            }
        }
        self.insert_cache.clear();
    }

    fn locate(&mut self, key: i64) -> Option<Vec<Rid>> {
        self.flush();
        self.tree.get(&key).cloned()
    }

    fn locate_range(&mut self, begin: i64, end: i64) -> Vec<(i64, Vec<Rid>)> {
        self.flush();
        self.tree.range(&begin, &end)
    }
}

fn append_rid(tree: &mut BPlusTree<i64, Vec<Rid>>, key: i64, rid: Rid) {
    let mut rids = tree.get(&key).cloned().unwrap_or_default();
    rids.push(rid);
    tree.insert(key, rids);
}

/// Merge two key-sorted `(key, rid)` lists, used to fold a freshly
/// sorted `unsorted_cache` batch onto whatever was left in
/// `insert_cache` from a prior flush that hit the batch-insert
/// fallback path.
fn merge_sorted(a: Vec<(i64, Rid)>, b: Vec<(i64, Rid)>) -> Vec<(i64, Rid)> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i].0 <= b[j].0 {
            out.push(a[i].clone());
            i += 1;
        } else {
            out.push(b[j].clone());
            j += 1;
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

/// Collapse a sorted `(key, rid)` list into `(key, rids)` groups so the
/// tree's batch insert sees one entry per distinct key.
fn group_consecutive_keys(pairs: &[(i64, Rid)]) -> Vec<(i64, Vec<Rid>)> {
    let mut out: Vec<(i64, Vec<Rid>)> = Vec::new();
    for &(key, rid) in pairs {
        match out.last_mut() {
            Some((last_key, rids)) if *last_key == key => rids.push(rid),
            _ => out.push((key, vec![rid])),
        }
    }
    out
}

/// One B+-tree per column, plus a primary-key fast path.
///
/// Grounded in `lstore/index.py`'s `Index`. Holds only the table's
/// column count, not the table itself, so ownership stays acyclic —
/// the index is rebuilt from the page directory on table load rather
/// than kept in lockstep via a back-reference.
pub struct Index {
    key_column: usize,
    columns: Vec<ColumnIndex>,
    /// O(1) point lookup for the primary-key column.
    primary_key_cache: HashMap<i64, Rid>,
    /// O(log n) + scan range reads for the primary-key column.
    sorted_records: Vec<(i64, Rid)>,
}

impl Index {
    pub fn new(num_columns: usize, key_column: usize) -> Self {
        Index {
            key_column,
            columns: (0..num_columns).map(|_| ColumnIndex::new()).collect(),
            primary_key_cache: HashMap::new(),
            sorted_records: Vec::new(),
        }
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Index a newly inserted (or freshly loaded) base record across
    /// every non-null column.
    pub fn add_record(&mut self, record: &Record) {
        if let Some(Some(key)) = record.columns.get(self.key_column) {
            self.primary_key_cache.insert(*key, record.rid);
            let pos = self
                .sorted_records
                .binary_search_by_key(key, |(k, _)| *k)
                .unwrap_or_else(|e| e);
            self.sorted_records.insert(pos, (*key, record.rid));
        }
        for (col, value) in record.columns.iter().enumerate() {
            if let Some(v) = value {
                self.columns[col].add(*v, record.rid);
            }
        }
    }

    /// Reset every column tree and the primary-key side structures;
    /// used before a full `refresh` rebuild.
    pub fn clear(&mut self) {
        for col in self.columns.iter_mut() {
            *col = ColumnIndex::new();
        }
        self.primary_key_cache.clear();
        self.sorted_records.clear();
    }

    pub fn locate(&mut self, column: usize, value: i64) -> Option<Vec<Rid>> {
        if column == self.key_column {
            if let Some(rid) = self.primary_key_cache.get(&value) {
                return Some(vec![*rid]);
            }
        }
        self.columns[column].locate(value)
    }

    pub fn locate_range(&mut self, begin: i64, end: i64, column: usize) -> Vec<(i64, Rid)> {
        if column == self.key_column {
            let lo = self
                .sorted_records
                .binary_search_by_key(&begin, |(k, _)| *k)
                .unwrap_or_else(|e| e);
            let hi = self
                .sorted_records
                .binary_search_by_key(&(end + 1), |(k, _)| *k)
                .unwrap_or_else(|e| e);
            return self.sorted_records[lo..hi].to_vec();
        }
        self.columns[column]
            .locate_range(begin, end)
            .into_iter()
            .flat_map(|(key, rids)| rids.into_iter().map(move |rid| (key, rid)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;

    #[test]
    fn locate_finds_inserted_primary_key() {
        let mut index = Index::new(3, 0);
        index.add_record(&Record::new_base(Rid::base(0), 0, vec![10, 1, 2]));
        index.add_record(&Record::new_base(Rid::base(1), 0, vec![20, 3, 4]));
        assert_eq!(index.locate(0, 10), Some(vec![Rid::base(0)]));
        assert_eq!(index.locate(0, 99), None);
    }

    #[test]
    fn locate_range_on_primary_key_uses_sorted_records() {
        let mut index = Index::new(2, 0);
        for i in 0..10i64 {
            index.add_record(&Record::new_base(Rid::base(i as u64), 0, vec![i, i * 2]));
        }
        let hits = index.locate_range(3, 6, 0);
        let mut keys: Vec<i64> = hits.iter().map(|(k, _)| *k).collect();
        keys.sort();
        assert_eq!(keys, vec![3, 4, 5, 6]);
    }

    #[test]
    fn secondary_column_accumulates_multiple_rids_per_key() {
        let mut index = Index::new(2, 0);
        index.add_record(&Record::new_base(Rid::base(0), 0, vec![1, 100]));
        index.add_record(&Record::new_base(Rid::base(1), 0, vec![2, 100]));
        let rids = index.locate(1, 100).unwrap();
        assert_eq!(rids.len(), 2);
    }
}
