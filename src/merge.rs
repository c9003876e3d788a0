//! Background merge worker (`spec.md` §4.5): reconciles committed tail
//! updates into base pages so `select`'s single-hop read stays cheap
//! and tail pages don't grow without bound.
//!
//! Grounded in `lstore/table.py`'s `__merge` plus the background-thread
//! shape of the teacher's own worker threads (`src/concurrent_status.rs`
//! spawns a long-lived thread reading off a channel); here the channel
//! carries merge requests instead of lock-wait wakeups.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{Receiver, Sender};
use log::{debug, error, info, warn};

use crate::error::EngineResult;
use crate::page::Page;
use crate::record::{Record, Rid};
use crate::table::TableInner;

pub(crate) enum MergeMsg {
    Merge(usize),
    /// Sent by `Table::wait_for_merge`: acks on `Sender<()>` once every
    /// message enqueued ahead of it has been processed. Relies on the
    /// channel being single-consumer/FIFO, so an ack here implies every
    /// prior `Merge` has already run to completion — unlike locking
    /// `merge_lock` directly, which races with a `Merge` message still
    /// sitting unprocessed in the channel.
    Barrier(Sender<()>),
    Shutdown,
}

/// Spawn the merge thread for one table. It blocks on `rx` and runs
/// one page range's merge per `Merge` message; `Shutdown` ends the
/// loop so `Table::close` can join it.
pub(crate) fn spawn(inner: Arc<TableInner>, rx: Receiver<MergeMsg>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for msg in rx {
            match msg {
                MergeMsg::Merge(pr_index) => {
                    if let Err(e) = run_merge(&inner, pr_index) {
                        error!(
                            "merge of table {} page range {} failed: {}",
                            inner.name, pr_index, e
                        );
                    }
                }
                MergeMsg::Barrier(ack) => {
                    let _ = ack.send(());
                }
                MergeMsg::Shutdown => break,
            }
        }
        debug!("merge thread for table {} exiting", inner.name);
    })
}

/// Run one merge pass over `pr_index`.
///
/// Protocol (`spec.md` §4.5):
///   1. Take the table's merge lock (mutual exclusion among merges)
///      and the write-vs-merge lock, so no concurrent writer can
///      observe a half-installed base page. Holding the write lock
///      for the whole pass — rather than only around the install step
///      — trades the spec's aspiration of fully lock-free merges for a
///      simpler, unambiguously-correct implementation; see `DESIGN.md`
///      for why this was the chosen resolution of the "merge logic
///      varies across drafts" open question (`spec.md` §9c).
///   2. Snapshot each base page under a shadow path so the original
///      stays resident if anything still references it.
///   3. Collect tail records with `entry_tps < rid <
///      commit_boundary`, newest first.
///   4. Fold the newest update per `base_rid` into its base page's
///      slot, preserving `rid`/`base_rid`/`start_time`.
///   5. Install the working pages and advance the TPS.
fn run_merge(inner: &Arc<TableInner>, pr_index: usize) -> EngineResult<()> {
    let _merge_guard = inner.merge_lock.lock().unwrap();
    let _write_guard = inner.write_merge_lock.write().unwrap();
    let mut state = inner.state.lock().unwrap();

    let meta = state.page_ranges[pr_index].clone();
    let entry_tps = meta.tps;
    let commit_boundary = state.next_tail_rid;

    let mut candidates: Vec<Record> = Vec::new();
    for k in 0..meta.tail_page_count {
        let path = inner.tail_page_path(pr_index, k);
        let page = state.buffer_pool.get(&path)?;
        for record in page.read_all() {
            if record.rid.number > entry_tps && record.rid.number < commit_boundary {
                candidates.push(record.clone());
            }
        }
        state.buffer_pool.unpin(&path);
    }

    if candidates.is_empty() {
        debug!(
            "table {} page range {}: nothing to merge (tps={})",
            inner.name, pr_index, entry_tps
        );
        return Ok(());
    }
    candidates.sort_by(|a, b| b.rid.number.cmp(&a.rid.number));

    let mut updated_base_rids: HashSet<Rid> = HashSet::new();
    let mut shadow_paths: Vec<PathBuf> = Vec::new();
    let mut working_pages: HashMap<usize, Page> = HashMap::new();
    let mut max_merged = entry_tps;

    for candidate in &candidates {
        if !updated_base_rids.insert(candidate.base_rid) {
            continue;
        }
        let (path, offset) = match state.page_directory.get(&candidate.base_rid) {
            Some(v) => v.clone(),
            None => {
                warn!(
                    "merge: base_rid {} in tail but missing from page directory",
                    candidate.base_rid
                );
                continue;
            }
        };
        let page_idx = match crate::table::parse_page_index(&path) {
            Ok(i) => i,
            Err(e) => {
                warn!("merge: {}", e);
                continue;
            }
        };

        if !working_pages.contains_key(&page_idx) {
            let shadow_path = inner.base_page_path(pr_index, page_idx).with_extension("merging");
            let canonical = inner.base_page_path(pr_index, page_idx);
            let original = state.buffer_pool.get(&canonical)?.clone();
            state.buffer_pool.unpin(&canonical);
            let _ = state.buffer_pool.rename(&canonical, &shadow_path);
            shadow_paths.push(shadow_path);
            working_pages.insert(page_idx, original);
        }

        let working = working_pages.get_mut(&page_idx).unwrap();
        let base_record = working.read_at(offset)?.clone();
        let merged = Record {
            base_rid: base_record.base_rid,
            rid: base_record.rid,
            indirection: base_record.indirection,
            start_time: base_record.start_time,
            schema_encoding: candidate.schema_encoding.clone(),
            columns: candidate.columns.clone(),
        };
        working.overwrite_at(offset, merged)?;
        if candidate.rid.number > max_merged {
            max_merged = candidate.rid.number;
        }
    }

    for (page_idx, page) in working_pages {
        let canonical = inner.base_page_path(pr_index, page_idx);
        state.buffer_pool.add_new(&canonical, page)?;
        state.buffer_pool.write_to_disk(&canonical)?;
        state.buffer_pool.unpin(&canonical);
    }
    for shadow_path in shadow_paths {
        state.buffer_pool.discard(&shadow_path);
    }

    state.page_ranges[pr_index].tps = max_merged;
    state.page_ranges[pr_index].unmerged_updates = 0;
    info!(
        "table {} page range {}: merged up to tps={}",
        inner.name, pr_index, max_merged
    );
    Ok(())
}
