use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use crossbeam::channel::{unbounded, Sender};
use log::info;

use crate::buffer_pool::BufferPool;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::index::Index;
use crate::io::{Decodeable, Encodeable, SmallWriter};
use crate::merge::{self, MergeMsg};
use crate::page::Page;
use crate::record::{Record, Rid, SchemaEncoding};

/// Per-page-range bookkeeping kept alongside the pages themselves: how
/// many base/tail pages exist, how full the last one of each is, the
/// TPS watermark, and the unmerged-update counter that triggers the
/// next merge. Grounded in `lstore/page_range.py`.
#[derive(Debug, Clone)]
pub(crate) struct PageRangeMeta {
    pub(crate) base_page_count: usize,
    pub(crate) last_base_slot_count: usize,
    pub(crate) tail_page_count: usize,
    pub(crate) last_tail_slot_count: usize,
    pub(crate) tps: u64,
    pub(crate) unmerged_updates: usize,
}

impl PageRangeMeta {
    fn fresh() -> Self {
        PageRangeMeta {
            base_page_count: 1,
            last_base_slot_count: 0,
            tail_page_count: 1,
            last_tail_slot_count: 0,
            tps: 0,
            unmerged_updates: 0,
        }
    }
}

/// Everything a table mutates on every operation, behind one mutex.
/// Grounded in `lstore/table.py`'s `Table`, which keeps the page
/// directory, RID counters, and buffer pool as plain instance fields
/// guarded informally by Python's GIL; here a single `Mutex` makes the
/// same "one table, one writer at a time for bookkeeping" discipline
/// explicit.
pub(crate) struct TableState {
    pub(crate) page_directory: HashMap<Rid, (PathBuf, usize)>,
    pub(crate) page_ranges: Vec<PageRangeMeta>,
    pub(crate) buffer_pool: BufferPool,
    pub(crate) index: Index,
    pub(crate) next_base_rid: u64,
    pub(crate) next_tail_rid: u64,
}

/// Shared table state, reference-counted so `Table` is cheaply
/// `Clone`-able into `Query`, `Transaction`, and the merge thread.
pub(crate) struct TableInner {
    pub(crate) name: String,
    pub(crate) root: PathBuf,
    pub(crate) num_columns: usize,
    pub(crate) key_column: usize,
    pub(crate) config: EngineConfig,
    pub(crate) state: Mutex<TableState>,
    /// Mutual exclusion among merges on this table (`spec.md` §4.5 step 1).
    pub(crate) merge_lock: Mutex<()>,
    /// Readers/writers take the read side; a merge takes the write
    /// side around its structural buffer-pool mutations. See
    /// `spec.md` §5, "the buffer pool ... is protected by the table's
    /// write-vs-merge mutex whenever a structural operation ... is in
    /// flight." Holding it for a merge's full duration is a deliberate
    /// simplification recorded in `DESIGN.md`.
    pub(crate) write_merge_lock: RwLock<()>,
    pub(crate) merge_tx: Sender<MergeMsg>,
    pub(crate) merge_thread: Mutex<Option<JoinHandle<()>>>,
}

/// A disk-backed relation: owns its page directory, buffer pool,
/// index, and background merge worker. Cloning a `Table` clones a
/// handle (`Arc`), not the underlying storage.
#[derive(Clone)]
pub struct Table(pub(crate) Arc<TableInner>);

impl TableInner {
    fn page_range_dir(&self, idx: usize) -> PathBuf {
        self.root.join(format!("pagerange_{}", idx))
    }

    fn base_dir(&self, idx: usize) -> PathBuf {
        self.page_range_dir(idx).join("base")
    }

    fn tail_dir(&self, idx: usize) -> PathBuf {
        self.page_range_dir(idx).join("tail")
    }

    pub(crate) fn base_page_path(&self, pr: usize, page: usize) -> PathBuf {
        self.base_dir(pr).join(format!("page_{}", page))
    }

    pub(crate) fn tail_page_path(&self, pr: usize, page: usize) -> PathBuf {
        self.tail_dir(pr).join(format!("page_{}", page))
    }

    fn metadata_path(&self) -> PathBuf {
        self.root.join(format!("{}_metadata.bin", self.name))
    }
}

/// Parse the trailing integer out of a `page_<n>` filename.
pub(crate) fn parse_page_index(path: &Path) -> EngineResult<usize> {
    let stem = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| EngineError::Corrupt(format!("bad page path {:?}", path)))?;
    stem.strip_prefix("page_")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| EngineError::Corrupt(format!("bad page filename {:?}", path)))
}

/// Parse the page-range index out of any path under
/// `.../pagerange_<n>/{base,tail}/page_<m>`.
fn parse_page_range_index(path: &Path) -> EngineResult<usize> {
    for component in path.components() {
        if let std::path::Component::Normal(os) = component {
            if let Some(s) = os.to_str() {
                if let Some(n) = s.strip_prefix("pagerange_") {
                    if let Ok(idx) = n.parse() {
                        return Ok(idx);
                    }
                }
            }
        }
    }
    Err(EngineError::Corrupt(format!(
        "path {:?} has no pagerange_<n> component",
        path
    )))
}

impl Table {
    /// Create a brand-new table rooted at `root`, with `pagerange_0`
    /// and its empty `base/page_0`/`tail/page_0` pre-created, per
    /// `spec.md` §3's Table lifecycle.
    pub fn create(
        name: &str,
        root: PathBuf,
        num_columns: usize,
        key_column: usize,
        config: EngineConfig,
    ) -> EngineResult<Table> {
        fs::create_dir_all(root.join("pagerange_0").join("base"))?;
        fs::create_dir_all(root.join("pagerange_0").join("tail"))?;

        let mut buffer_pool = BufferPool::new(&config);
        let base_path = root.join("pagerange_0").join("base").join("page_0");
        let tail_path = root.join("pagerange_0").join("tail").join("page_0");
        buffer_pool.add_new(&base_path, Page::with_config(&config))?;
        buffer_pool.write_to_disk(&base_path)?;
        buffer_pool.unpin(&base_path);
        buffer_pool.add_new(&tail_path, Page::with_config(&config))?;
        buffer_pool.write_to_disk(&tail_path)?;
        buffer_pool.unpin(&tail_path);

        let state = TableState {
            page_directory: HashMap::new(),
            page_ranges: vec![PageRangeMeta::fresh()],
            buffer_pool,
            index: Index::new(num_columns, key_column),
            next_base_rid: 0,
            next_tail_rid: 0,
        };

        let (tx, rx) = unbounded();
        let inner = Arc::new(TableInner {
            name: name.to_string(),
            root,
            num_columns,
            key_column,
            config,
            state: Mutex::new(state),
            merge_lock: Mutex::new(()),
            write_merge_lock: RwLock::new(()),
            merge_tx: tx,
            merge_thread: Mutex::new(None),
        });
        let handle = merge::spawn(Arc::clone(&inner), rx);
        *inner.merge_thread.lock().unwrap() = Some(handle);

        info!("created table {} with {} columns", name, num_columns);
        Ok(Table(inner))
    }

    /// Reopen a table previously created and cleanly closed: restores
    /// the page directory/RID counters/page-range metadata from its
    /// metadata file and rebuilds the index from scratch by scanning
    /// the page directory's base records, per `spec.md` §3's "index is
    /// rebuilt from scratch when a table is loaded" rule.
    pub fn load(name: &str, root: PathBuf, config: EngineConfig) -> EngineResult<Table> {
        let inner_path = root.join(format!("{}_metadata.bin", name));
        let bytes = fs::read(&inner_path)?;
        let metadata = TableMetadata::decode_from(&mut Cursor::new(bytes))?;

        let mut page_directory = HashMap::new();
        for (rid, rel, offset) in metadata.page_directory {
            page_directory.insert(rid, (root.join(rel), offset));
        }

        let state = TableState {
            page_directory,
            page_ranges: metadata.page_ranges,
            buffer_pool: BufferPool::new(&config),
            index: Index::new(metadata.num_columns, metadata.key_column),
            next_base_rid: metadata.next_base_rid,
            next_tail_rid: metadata.next_tail_rid,
        };

        let (tx, rx) = unbounded();
        let inner = Arc::new(TableInner {
            name: name.to_string(),
            root,
            num_columns: metadata.num_columns,
            key_column: metadata.key_column,
            config,
            state: Mutex::new(state),
            merge_lock: Mutex::new(()),
            write_merge_lock: RwLock::new(()),
            merge_tx: tx,
            merge_thread: Mutex::new(None),
        });
        let handle = merge::spawn(Arc::clone(&inner), rx);
        *inner.merge_thread.lock().unwrap() = Some(handle);

        let table = Table(inner);
        table.rebuild_index()?;
        info!("loaded table {} from disk", name);
        Ok(table)
    }

    fn rebuild_index(&self) -> EngineResult<()> {
        let base_rids: Vec<Rid> = {
            let state = self.0.state.lock().unwrap();
            state
                .page_directory
                .keys()
                .filter(|r| r.is_base)
                .cloned()
                .collect()
        };
        for rid in base_rids {
            let record = self.read_record(rid)?;
            let mut state = self.0.state.lock().unwrap();
            state.index.add_record(&record);
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn num_columns(&self) -> usize {
        self.0.num_columns
    }

    pub fn key_column(&self) -> usize {
        self.0.key_column
    }

    /// Append a freshly inserted base record to the table's current
    /// last base page, allocating a new base page or page range first
    /// if it is full. Returns the new record's `rid`.
    pub fn insert_record(&self, columns: Vec<i64>) -> EngineResult<Rid> {
        let _read_guard = self.0.write_merge_lock.read().unwrap();
        let mut state = self.0.state.lock().unwrap();

        let rid = Rid::base(state.next_base_rid);
        state.next_base_rid += 1;

        self.ensure_base_capacity(&mut state)?;
        let pr_index = state.page_ranges.len() - 1;
        let page_idx = state.page_ranges[pr_index].base_page_count - 1;
        let path = self.0.base_page_path(pr_index, page_idx);

        let record = Record::new_base(rid, crate::util::now_millis(), columns);
        let offset = {
            let page = state.buffer_pool.get_mut(&path)?;
            page.append(record.clone())
        };
        state.buffer_pool.mark_dirty(&path);
        state.buffer_pool.unpin(&path);

        state.page_directory.insert(rid, (path, offset));
        state.page_ranges[pr_index].last_base_slot_count += 1;
        state.index.add_record(&record);
        Ok(rid)
    }

    fn ensure_base_capacity(&self, state: &mut TableState) -> EngineResult<()> {
        let config = &self.0.config;
        let pr_index = state.page_ranges.len() - 1;
        if state.page_ranges[pr_index].last_base_slot_count < config.page_record_size {
            return Ok(());
        }
        if state.page_ranges[pr_index].base_page_count < config.page_range_size {
            let page_idx = state.page_ranges[pr_index].base_page_count;
            let path = self.0.base_page_path(pr_index, page_idx);
            state.buffer_pool.add_new(&path, Page::with_config(config))?;
            state.buffer_pool.write_to_disk(&path)?;
            state.buffer_pool.unpin(&path);
            state.page_ranges[pr_index].base_page_count += 1;
            state.page_ranges[pr_index].last_base_slot_count = 0;
        } else {
            self.create_page_range(state)?;
        }
        Ok(())
    }

    fn create_page_range(&self, state: &mut TableState) -> EngineResult<()> {
        let config = &self.0.config;
        let new_index = state.page_ranges.len();
        fs::create_dir_all(self.0.base_dir(new_index))?;
        fs::create_dir_all(self.0.tail_dir(new_index))?;

        let base_path = self.0.base_page_path(new_index, 0);
        let tail_path = self.0.tail_page_path(new_index, 0);
        state.buffer_pool.add_new(&base_path, Page::with_config(config))?;
        state.buffer_pool.write_to_disk(&base_path)?;
        state.buffer_pool.unpin(&base_path);
        state.buffer_pool.add_new(&tail_path, Page::with_config(config))?;
        state.buffer_pool.write_to_disk(&tail_path)?;
        state.buffer_pool.unpin(&tail_path);

        state.page_ranges.push(PageRangeMeta::fresh());
        info!("table {} grew to {} page ranges", self.0.name, state.page_ranges.len());
        Ok(())
    }

    /// Append a tail record (update or delete image) into the given
    /// page range, creating a new tail page if the current one is
    /// full. Increments the page range's unmerged-update counter and
    /// signals the merge worker if `MERGE_THRESH` is crossed.
    pub(crate) fn append_tail_record(
        &self,
        pr_index: usize,
        base_rid: Rid,
        indirection: Rid,
        start_time: i64,
        schema_encoding: SchemaEncoding,
        columns: Vec<Option<i64>>,
    ) -> EngineResult<Rid> {
        let _read_guard = self.0.write_merge_lock.read().unwrap();
        let mut state = self.0.state.lock().unwrap();

        let rid = Rid::tail(state.next_tail_rid);
        state.next_tail_rid += 1;

        self.ensure_tail_capacity(&mut state, pr_index)?;
        let page_idx = state.page_ranges[pr_index].tail_page_count - 1;
        let path = self.0.tail_page_path(pr_index, page_idx);

        let record = Record {
            base_rid,
            rid,
            indirection,
            start_time,
            schema_encoding,
            columns,
        };
        let offset = {
            let page = state.buffer_pool.get_mut(&path)?;
            page.append(record)
        };
        state.buffer_pool.mark_dirty(&path);
        state.buffer_pool.unpin(&path);

        state.page_directory.insert(rid, (path, offset));
        state.page_ranges[pr_index].last_tail_slot_count += 1;
        state.page_ranges[pr_index].unmerged_updates += 1;
        let crossed =
            state.page_ranges[pr_index].unmerged_updates >= self.0.config.merge_thresh;
        drop(state);

        if crossed {
            let _ = self.0.merge_tx.send(MergeMsg::Merge(pr_index));
        }
        Ok(rid)
    }

    fn ensure_tail_capacity(&self, state: &mut TableState, pr_index: usize) -> EngineResult<()> {
        let config = &self.0.config;
        if state.page_ranges[pr_index].last_tail_slot_count < config.page_record_size {
            return Ok(());
        }
        let page_idx = state.page_ranges[pr_index].tail_page_count;
        let path = self.0.tail_page_path(pr_index, page_idx);
        state.buffer_pool.add_new(&path, Page::with_config(config))?;
        state.buffer_pool.write_to_disk(&path)?;
        state.buffer_pool.unpin(&path);
        state.page_ranges[pr_index].tail_page_count += 1;
        state.page_ranges[pr_index].last_tail_slot_count = 0;
        Ok(())
    }

    /// Read the raw stored record (base or tail) at `rid`, with its full
    /// version-chain metadata — `schema_encoding`, `indirection`, etc. —
    /// rather than a materialized/projected view. `Query`'s operations
    /// use this internally; exposed publicly too since some invariants
    /// (`spec.md` §8 property 2's per-column schema-encoding bits) are
    /// only observable at this level, not through `Query::select`'s
    /// projection.
    pub fn read_record(&self, rid: Rid) -> EngineResult<Record> {
        let _read_guard = self.0.write_merge_lock.read().unwrap();
        let mut state = self.0.state.lock().unwrap();
        let (path, offset) = state
            .page_directory
            .get(&rid)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(rid.to_string()))?;
        let record = state.buffer_pool.get(&path)?.read_at(offset)?.clone();
        state.buffer_pool.unpin(&path);
        Ok(record)
    }

    pub(crate) fn overwrite_record(&self, rid: Rid, record: Record) -> EngineResult<()> {
        let _read_guard = self.0.write_merge_lock.read().unwrap();
        let mut state = self.0.state.lock().unwrap();
        let (path, offset) = state
            .page_directory
            .get(&rid)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(rid.to_string()))?;
        state.buffer_pool.get_mut(&path)?.overwrite_at(offset, record)?;
        state.buffer_pool.mark_dirty(&path);
        state.buffer_pool.unpin(&path);
        Ok(())
    }

    pub(crate) fn page_range_of(&self, rid: Rid) -> EngineResult<usize> {
        let state = self.0.state.lock().unwrap();
        let (path, _) = state
            .page_directory
            .get(&rid)
            .ok_or_else(|| EngineError::NotFound(rid.to_string()))?;
        parse_page_range_index(path)
    }

    /// Location (page path, page index, slot offset) of `rid`, used by
    /// the lock manager to build a hierarchical lock identifier.
    pub(crate) fn locate_path(&self, rid: Rid) -> EngineResult<(PathBuf, usize, usize)> {
        let state = self.0.state.lock().unwrap();
        let (path, offset) = state
            .page_directory
            .get(&rid)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(rid.to_string()))?;
        let page_idx = parse_page_index(&path)?;
        Ok((path, page_idx, offset))
    }

    /// The page directory's current (page path, slot offset) for `rid`.
    /// Exposed publicly so callers can confirm `spec.md` §4.3's
    /// invariant that a merge never changes a rid's page-directory
    /// entry — only the content of the base page underneath it.
    pub fn record_location(&self, rid: Rid) -> EngineResult<(PathBuf, usize)> {
        let state = self.0.state.lock().unwrap();
        state
            .page_directory
            .get(&rid)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(rid.to_string()))
    }

    pub(crate) fn locate(&self, column: usize, value: i64) -> Option<Vec<Rid>> {
        let mut state = self.0.state.lock().unwrap();
        state.index.locate(column, value)
    }

    pub(crate) fn locate_range(&self, begin: i64, end: i64, column: usize) -> Vec<(i64, Rid)> {
        let mut state = self.0.state.lock().unwrap();
        state.index.locate_range(begin, end, column)
    }

    /// The current TPS (tail-page-sequence) watermark for one page
    /// range: the largest tail-rid suffix already folded into base
    /// pages (`spec.md` §3, §4.5). Exposed publicly so callers — and
    /// this crate's own tests covering `spec.md` §8 properties 6/7 and
    /// scenario E — can observe merge progress.
    pub fn tps(&self, pr_index: usize) -> u64 {
        self.0.state.lock().unwrap().page_ranges[pr_index].tps
    }

    /// Number of page ranges currently materialized for this table.
    pub fn page_range_count(&self) -> usize {
        self.0.state.lock().unwrap().page_ranges.len()
    }

    /// Trigger a merge of `pr_index` without waiting for the
    /// unmerged-update counter to cross `MERGE_THRESH`; mainly useful
    /// for tests that want a deterministic merge point.
    pub fn trigger_merge(&self, pr_index: usize) {
        let _ = self.0.merge_tx.send(MergeMsg::Merge(pr_index));
    }

    /// Block until every merge request queued so far has run. Used by
    /// tests (`spec.md` §8 property 6/7) that need a synchronization
    /// point; production callers never need this since the engine's
    /// consistency does not depend on merge timing.
    ///
    /// Sends a `Barrier` message down the same channel merge requests
    /// travel on rather than locking `merge_lock` directly: the merge
    /// thread is a single FIFO consumer, so an acked barrier guarantees
    /// every `Merge` enqueued before it — including one sent moments
    /// earlier by an `append_tail_record` crossing `MERGE_THRESH` — has
    /// already finished, which a bare lock/unlock cannot guarantee if
    /// that `Merge` message is still sitting unprocessed in the channel.
    pub fn wait_for_merge(&self) {
        let (tx, rx) = crossbeam::channel::bounded(1);
        if self.0.merge_tx.send(MergeMsg::Barrier(tx)).is_ok() {
            let _ = rx.recv();
        }
    }

    /// Flush the buffer pool and persist metadata, then join the
    /// merge thread. After `close`, the table should not be used
    /// again; a fresh handle should be obtained via `Table::load`.
    pub fn close(&self) -> EngineResult<()> {
        let _ = self.0.merge_tx.send(MergeMsg::Shutdown);
        if let Some(handle) = self.0.merge_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        let mut state = self.0.state.lock().unwrap();
        state.buffer_pool.flush_all()?;
        self.save_metadata(&state)?;
        info!("closed table {}", self.0.name);
        Ok(())
    }

    fn save_metadata(&self, state: &TableState) -> EngineResult<()> {
        let page_directory = state
            .page_directory
            .iter()
            .map(|(rid, (path, offset))| {
                let rel = path
                    .strip_prefix(&self.0.root)
                    .unwrap_or(path)
                    .to_string_lossy()
                    .into_owned();
                (*rid, rel, *offset)
            })
            .collect();
        let metadata = TableMetadata {
            num_columns: self.0.num_columns,
            key_column: self.0.key_column,
            next_base_rid: state.next_base_rid,
            next_tail_rid: state.next_tail_rid,
            page_ranges: state.page_ranges.clone(),
            page_directory,
        };
        fs::write(self.0.metadata_path(), metadata.encode())?;
        Ok(())
    }
}

/// On-disk form of everything needed to reopen a table: RID counters,
/// per-page-range metadata, and the page directory. See `spec.md` §6's
/// `<table>_metadata.<serialized>`.
struct TableMetadata {
    num_columns: usize,
    key_column: usize,
    next_base_rid: u64,
    next_tail_rid: u64,
    page_ranges: Vec<PageRangeMeta>,
    page_directory: Vec<(Rid, String, usize)>,
}

impl Encodeable for TableMetadata {
    fn encode(&self) -> Vec<u8> {
        let mut w = SmallWriter::new();
        w.write(&(self.num_columns as u32));
        w.write(&(self.key_column as u32));
        w.write(&self.next_base_rid);
        w.write(&self.next_tail_rid);
        w.write(&(self.page_ranges.len() as u32));
        for pr in &self.page_ranges {
            w.write(&(pr.base_page_count as u32));
            w.write(&(pr.last_base_slot_count as u32));
            w.write(&(pr.tail_page_count as u32));
            w.write(&(pr.last_tail_slot_count as u32));
            w.write(&pr.tps);
            w.write(&(pr.unmerged_updates as u32));
        }
        w.write(&(self.page_directory.len() as u32));
        for (rid, rel, offset) in &self.page_directory {
            w.write(rid);
            w.write(rel);
            w.write(&(*offset as u32));
        }
        w.into_bytes()
    }
}

impl Decodeable for TableMetadata {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> EngineResult<Self> {
        let num_columns = u32::decode_from(reader)? as usize;
        let key_column = u32::decode_from(reader)? as usize;
        let next_base_rid = u64::decode_from(reader)?;
        let next_tail_rid = u64::decode_from(reader)?;

        let pr_count = u32::decode_from(reader)? as usize;
        let mut page_ranges = Vec::with_capacity(pr_count);
        for _ in 0..pr_count {
            page_ranges.push(PageRangeMeta {
                base_page_count: u32::decode_from(reader)? as usize,
                last_base_slot_count: u32::decode_from(reader)? as usize,
                tail_page_count: u32::decode_from(reader)? as usize,
                last_tail_slot_count: u32::decode_from(reader)? as usize,
                tps: u64::decode_from(reader)?,
                unmerged_updates: u32::decode_from(reader)? as usize,
            });
        }

        let dir_count = u32::decode_from(reader)? as usize;
        let mut page_directory = Vec::with_capacity(dir_count);
        for _ in 0..dir_count {
            let rid = Rid::decode_from(reader)?;
            let rel = String::decode_from(reader)?;
            let offset = u32::decode_from(reader)? as usize;
            page_directory.push((rid, rel, offset));
        }

        Ok(TableMetadata {
            num_columns,
            key_column,
            next_base_rid,
            next_tail_rid,
            page_ranges,
            page_directory,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_table(dir: &tempfile::TempDir) -> Table {
        Table::create("t", dir.path().join("t"), 3, 0, EngineConfig::small()).unwrap()
    }

    #[test]
    fn insert_record_is_retrievable_and_indexed() {
        let dir = tempfile::tempdir().unwrap();
        let table = new_table(&dir);
        let rid = table.insert_record(vec![50, 2, 3]).unwrap();
        let record = table.read_record(rid).unwrap();
        assert_eq!(record.columns, vec![Some(50), Some(2), Some(3)]);
        assert_eq!(table.locate(0, 50), Some(vec![rid]));
    }

    #[test]
    fn inserting_past_one_page_allocates_a_new_base_page() {
        let dir = tempfile::tempdir().unwrap();
        let table = new_table(&dir);
        let config = EngineConfig::small();
        for i in 0..(config.page_record_size as i64 + 1) {
            table.insert_record(vec![i, 0, 0]).unwrap();
        }
        let state = table.0.state.lock().unwrap();
        assert_eq!(state.page_ranges[0].base_page_count, 2);
    }

    #[test]
    fn inserting_past_one_page_range_allocates_a_new_page_range() {
        let dir = tempfile::tempdir().unwrap();
        let table = new_table(&dir);
        let config = EngineConfig::small();
        assert_eq!(table.page_range_count(), 1);

        let rows_per_range = config.page_record_size * config.page_range_size;
        for i in 0..(rows_per_range as i64 + 1) {
            table.insert_record(vec![i, 0, 0]).unwrap();
        }
        assert_eq!(table.page_range_count(), 2);
    }

    #[test]
    fn table_reloads_page_directory_and_index_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let table_root = dir.path().join("t");
        let table = Table::create("t", table_root.clone(), 2, 0, EngineConfig::small()).unwrap();
        let rid = table.insert_record(vec![7, 9]).unwrap();
        table.close().unwrap();

        let reloaded = Table::load("t", table_root, EngineConfig::small()).unwrap();
        assert_eq!(reloaded.locate(0, 7), Some(vec![rid]));
        let record = reloaded.read_record(rid).unwrap();
        assert_eq!(record.columns, vec![Some(7), Some(9)]);
    }
}
