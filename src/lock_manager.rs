use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use log::debug;

/// Type of lock held on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Granularity a lock is held at. Locks must be requested in
/// hierarchical order: TABLE ⊃ PAGE_RANGE ⊃ PAGE ⊃ RECORD.
///
/// The source's `two_phase_lock.py` only has TABLE/PAGE/RECORD; this
/// adds PAGE_RANGE between TABLE and PAGE so a merge can take an
/// exclusive lock on one page range without blocking concurrent
/// transactions in sibling page ranges of the same table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockGranularity {
    Table,
    PageRange,
    Page,
    Record,
}

#[derive(Default)]
struct LockEntry {
    readers: HashSet<u64>,
    writer: Option<u64>,
}

struct TxnState {
    shrinking_phase: bool,
}

/// A hierarchical two-phase lock manager.
///
/// Grounded in `lstore/two_phase_lock.py`'s `TwoPhaseLock`: one lock
/// dictionary per granularity, growing/shrinking phase tracked per
/// transaction, and non-blocking `acquire` (a denied request aborts
/// the caller's transaction rather than queueing — `spec.md`'s "no
/// wait queue, no deadlock detection" design).
pub struct LockManager {
    inner: Mutex<Inner>,
}

struct Inner {
    transactions: HashMap<u64, TxnState>,
    table_locks: HashMap<String, LockEntry>,
    page_range_locks: HashMap<String, LockEntry>,
    page_locks: HashMap<String, LockEntry>,
    record_locks: HashMap<String, LockEntry>,
}

impl LockManager {
    pub fn new() -> Self {
        LockManager {
            inner: Mutex::new(Inner {
                transactions: HashMap::new(),
                table_locks: HashMap::new(),
                page_range_locks: HashMap::new(),
                page_locks: HashMap::new(),
                record_locks: HashMap::new(),
            }),
        }
    }

    /// Attempt to acquire `mode` at `granularity` on the path-structured
    /// identifier `item_id` (e.g. `"orders/pr_2/page_5/b17"`; a parent's
    /// identifier is always a path prefix of its children's).
    ///
    /// Returns `false` without blocking if the transaction is already
    /// in its shrinking phase, or if the request conflicts with an
    /// existing lock at this or a parent granularity.
    pub fn acquire(
        &self,
        transaction_id: u64,
        item_id: &str,
        mode: LockMode,
        granularity: LockGranularity,
    ) -> bool {
        let mut inner = self.inner.lock().unwrap();
        debug!(
            "T{} requesting {:?} lock on {:?} {}",
            transaction_id, mode, granularity, item_id
        );

        inner
            .transactions
            .entry(transaction_id)
            .or_insert(TxnState {
                shrinking_phase: false,
            });
        if inner.transactions[&transaction_id].shrinking_phase {
            debug!("denied: T{} is in its shrinking phase", transaction_id);
            return false;
        }

        let lock_dict = inner.dict_for_mut(granularity);
        if has_lock(lock_dict, transaction_id, item_id) {
            return true;
        }

        if !inner.parent_locks_compatible(transaction_id, item_id, granularity) {
            return false;
        }

        let lock_dict = inner.dict_for_mut(granularity);
        let entry = lock_dict.entry(item_id.to_string()).or_default();
        match mode {
            LockMode::Shared => {
                if entry.writer.is_none() || entry.writer == Some(transaction_id) {
                    entry.readers.insert(transaction_id);
                    true
                } else {
                    false
                }
            }
            LockMode::Exclusive => {
                let only_self_reads =
                    entry.readers.is_empty() || entry.readers == HashSet::from([transaction_id]);
                let writer_ok = entry.writer.is_none() || entry.writer == Some(transaction_id);
                if only_self_reads && writer_ok {
                    entry.writer = Some(transaction_id);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Release every lock `transaction_id` holds on `item_id`, at every
    /// granularity level, and enter its shrinking phase.
    pub fn release(&self, transaction_id: u64, item_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(txn) = inner.transactions.get_mut(&transaction_id) {
            txn.shrinking_phase = true;
        } else {
            return;
        }
        for granularity in [
            LockGranularity::Record,
            LockGranularity::Page,
            LockGranularity::PageRange,
            LockGranularity::Table,
        ] {
            if let Some(entry) = inner.dict_for_mut(granularity).get_mut(item_id) {
                entry.readers.remove(&transaction_id);
                if entry.writer == Some(transaction_id) {
                    entry.writer = None;
                }
            }
        }
    }

    /// Forget a finished transaction's bookkeeping entirely (it holds
    /// no locks after `release` has been called for everything it
    /// touched).
    pub fn forget(&self, transaction_id: u64) {
        self.inner.lock().unwrap().transactions.remove(&transaction_id);
    }
}

impl Inner {
    fn dict_for_mut(&mut self, granularity: LockGranularity) -> &mut HashMap<String, LockEntry> {
        match granularity {
            LockGranularity::Table => &mut self.table_locks,
            LockGranularity::PageRange => &mut self.page_range_locks,
            LockGranularity::Page => &mut self.page_locks,
            LockGranularity::Record => &mut self.record_locks,
        }
    }

    /// Check that no *ancestor* of `item_id` is exclusively held by a
    /// different transaction. Ancestors are obtained by path prefix:
    /// `"t/pr_0/page_1/b2"` has ancestors `"t"`, `"t/pr_0"`, `"t/pr_0/page_1"`.
    fn parent_locks_compatible(
        &self,
        transaction_id: u64,
        item_id: &str,
        granularity: LockGranularity,
    ) -> bool {
        let segments: Vec<&str> = item_id.split('/').collect();
        let ancestor_granularities: &[LockGranularity] = match granularity {
            LockGranularity::Table => &[],
            LockGranularity::PageRange => &[LockGranularity::Table],
            LockGranularity::Page => &[LockGranularity::Table, LockGranularity::PageRange],
            LockGranularity::Record => &[
                LockGranularity::Table,
                LockGranularity::PageRange,
                LockGranularity::Page,
            ],
        };
        for (depth, &ancestor_granularity) in ancestor_granularities.iter().enumerate() {
            let ancestor_id = segments[..=depth].join("/");
            let dict = match ancestor_granularity {
                LockGranularity::Table => &self.table_locks,
                LockGranularity::PageRange => &self.page_range_locks,
                LockGranularity::Page => &self.page_locks,
                LockGranularity::Record => &self.record_locks,
            };
            if let Some(entry) = dict.get(&ancestor_id) {
                if let Some(writer) = entry.writer {
                    if writer != transaction_id {
                        debug!(
                            "denied: ancestor {:?} {} exclusively held by T{}",
                            ancestor_granularity, ancestor_id, writer
                        );
                        return false;
                    }
                }
            }
        }
        true
    }
}

fn has_lock(dict: &HashMap<String, LockEntry>, transaction_id: u64, item_id: &str) -> bool {
    dict.get(item_id)
        .map(|entry| entry.readers.contains(&transaction_id) || entry.writer == Some(transaction_id))
        .unwrap_or(false)
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
