use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::io::{Decodeable, Encodeable};
use crate::page::Page;

/// One cached page plus its pin/dirty bookkeeping.
///
/// Grounded in `lstore/bufferpool.py`'s `Frame`: a pin count (readers
/// and writers currently holding the page) and a dirty bit (written
/// since it was last flushed).
struct Frame {
    page: Page,
    pin_count: u32,
    dirty: bool,
}

/// A fixed-capacity cache of on-disk pages, keyed by path, with
/// pin-aware LRU eviction.
///
/// Grounded in `lstore/bufferpool.py`. The Python version keeps LRU
/// order via an `OrderedDict`; here a `VecDeque<PathBuf>` tracks
/// recency order alongside the `HashMap` that owns the frames, since
/// no LRU crate in the pack's dependency stacks gives pin-aware,
/// clean-before-dirty eviction for free.
pub struct BufferPool {
    capacity: usize,
    frames: HashMap<PathBuf, Frame>,
    lru: VecDeque<PathBuf>,
    pub io_count: u64,
}

impl BufferPool {
    pub fn new(config: &EngineConfig) -> Self {
        BufferPool {
            capacity: config.pool_size,
            frames: HashMap::new(),
            lru: VecDeque::new(),
            io_count: 0,
        }
    }

    fn touch(&mut self, path: &Path) {
        if let Some(pos) = self.lru.iter().position(|p| p == path) {
            self.lru.remove(pos);
        }
        self.lru.push_back(path.to_path_buf());
    }

    /// Evict one unpinned frame, preferring a clean one over a dirty
    /// one (a dirty eviction costs a write-back). Returns an error if
    /// every resident frame is pinned.
    fn evict_one(&mut self) -> EngineResult<()> {
        let mut dirty_candidate: Option<PathBuf> = None;
        for path in self.lru.iter() {
            let frame = self.frames.get(path).expect("lru/frames out of sync");
            if frame.pin_count == 0 {
                if !frame.dirty {
                    let path = path.clone();
                    self.drop_frame(&path);
                    return Ok(());
                } else if dirty_candidate.is_none() {
                    dirty_candidate = Some(path.clone());
                }
            }
        }
        if let Some(path) = dirty_candidate {
            self.write_to_disk(&path)?;
            self.drop_frame(&path);
            return Ok(());
        }
        warn!("buffer pool full and every frame is pinned");
        Err(EngineError::PoolExhausted)
    }

    fn drop_frame(&mut self, path: &Path) {
        self.frames.remove(path);
        if let Some(pos) = self.lru.iter().position(|p| p == path) {
            self.lru.remove(pos);
        }
    }

    /// Fetch the page at `path`, loading it from disk on a miss, and
    /// pin it. Callers must call `unpin` when done reading/writing it.
    pub fn get(&mut self, path: &Path) -> EngineResult<&Page> {
        if !self.frames.contains_key(path) {
            if self.frames.len() >= self.capacity {
                self.evict_one()?;
            }
            let page = self.read_from_disk(path)?;
            self.frames.insert(
                path.to_path_buf(),
                Frame {
                    page,
                    pin_count: 0,
                    dirty: false,
                },
            );
        }
        self.touch(path);
        let frame = self.frames.get_mut(path).expect("just inserted");
        frame.pin_count += 1;
        Ok(&self.frames.get(path).unwrap().page)
    }

    /// Insert a brand-new page (not yet on disk) under `path`, pinned
    /// and marked dirty so the next flush or eviction persists it.
    pub fn add_new(&mut self, path: &Path, page: Page) -> EngineResult<()> {
        if self.frames.len() >= self.capacity {
            self.evict_one()?;
        }
        self.frames.insert(
            path.to_path_buf(),
            Frame {
                page,
                pin_count: 1,
                dirty: true,
            },
        );
        self.touch(path);
        Ok(())
    }

    pub fn get_mut(&mut self, path: &Path) -> EngineResult<&mut Page> {
        self.get(path)?;
        let frame = self
            .frames
            .get_mut(path)
            .ok_or_else(|| EngineError::Corrupt(format!("frame vanished for {:?}", path)))?;
        Ok(&mut frame.page)
    }

    pub fn mark_dirty(&mut self, path: &Path) {
        if let Some(frame) = self.frames.get_mut(path) {
            frame.dirty = true;
        }
    }

    /// Drop a resident frame unconditionally, without writing it back.
    /// Used by the merge worker to discard the shadow copy of a base
    /// page once its working replacement has been installed and
    /// flushed, so a merge doesn't leave stale pages occupying pool
    /// capacity until they age out via normal LRU eviction.
    pub fn discard(&mut self, path: &Path) {
        self.drop_frame(path);
    }

    pub fn unpin(&mut self, path: &Path) {
        if let Some(frame) = self.frames.get_mut(path) {
            if frame.pin_count > 0 {
                frame.pin_count -= 1;
            }
        }
    }

    /// Rename a resident frame's key, used by the merge worker's
    /// shadow-copy-then-rename protocol so a page it just wrote under a
    /// temporary path takes over the real path without a disk round
    /// trip.
    pub fn rename(&mut self, old_path: &Path, new_path: &Path) -> bool {
        let frame = match self.frames.remove(old_path) {
            Some(f) => f,
            None => return false,
        };
        if let Some(pos) = self.lru.iter().position(|p| p == old_path) {
            self.lru.remove(pos);
        }
        self.frames.insert(new_path.to_path_buf(), frame);
        self.lru.push_back(new_path.to_path_buf());
        true
    }

    pub fn write_to_disk(&mut self, path: &Path) -> EngineResult<()> {
        let frame = match self.frames.get_mut(path) {
            Some(f) => f,
            None => return Ok(()),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, frame.page.encode())?;
        frame.dirty = false;
        self.io_count += 1;
        debug!("wrote page to {:?}", path);
        Ok(())
    }

    /// Flush every dirty resident frame, used on clean table/database
    /// shutdown.
    pub fn flush_all(&mut self) -> EngineResult<()> {
        let dirty_paths: Vec<PathBuf> = self
            .frames
            .iter()
            .filter(|(_, f)| f.dirty)
            .map(|(p, _)| p.clone())
            .collect();
        for path in dirty_paths {
            self.write_to_disk(&path)?;
        }
        Ok(())
    }

    fn read_from_disk(&mut self, path: &Path) -> EngineResult<Page> {
        self.io_count += 1;
        let bytes = fs::read(path)?;
        Page::decode_from(&mut Cursor::new(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Record, Rid};

    fn small_pool() -> BufferPool {
        BufferPool::new(&EngineConfig::small())
    }

    #[test]
    fn add_new_then_get_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p0");
        let mut pool = small_pool();
        let mut page = Page::new(8);
        page.append(Record::new_base(Rid::base(0), 1, vec![1, 2]));
        pool.add_new(&path, page).unwrap();
        pool.unpin(&path);
        pool.write_to_disk(&path).unwrap();

        let mut pool2 = small_pool();
        let fetched = pool2.get(&path).unwrap();
        assert_eq!(fetched.num_records(), 1);
    }

    #[test]
    fn eviction_prefers_clean_pages_over_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = BufferPool::new(&EngineConfig {
            pool_size: 1,
            ..EngineConfig::small()
        });
        let clean_path = dir.path().join("clean");
        pool.add_new(&clean_path, Page::new(8)).unwrap();
        pool.unpin(&clean_path);
        pool.write_to_disk(&clean_path).unwrap();

        let other_path = dir.path().join("other");
        fs::write(&other_path, Page::new(8).encode()).unwrap();

        pool.get(&other_path).unwrap();
        pool.unpin(&other_path);

        assert!(!pool.frames.contains_key(&clean_path));
        assert!(pool.frames.contains_key(&other_path));
    }

    #[test]
    fn fully_pinned_pool_refuses_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = BufferPool::new(&EngineConfig {
            pool_size: 1,
            ..EngineConfig::small()
        });
        let pinned_path = dir.path().join("pinned");
        pool.add_new(&pinned_path, Page::new(8)).unwrap();

        let other_path = dir.path().join("other");
        fs::write(&other_path, Page::new(8).encode()).unwrap();
        assert!(matches!(
            pool.get(&other_path),
            Err(EngineError::PoolExhausted)
        ));
    }

    /// Property 8 (`spec.md` §8): with `POOL_SIZE = N` and `N+k` distinct
    /// pages touched where `k` stay pinned, exactly `k` remain pinned and
    /// the cache holds exactly `N` pages; pinned pages are never the
    /// ones evicted.
    #[test]
    fn pool_holds_capacity_pages_with_k_left_pinned() {
        let dir = tempfile::tempdir().unwrap();
        const N: usize = 3;
        const K: usize = 2;
        let mut pool = BufferPool::new(&EngineConfig {
            pool_size: N,
            ..EngineConfig::small()
        });

        let mut pinned_paths = Vec::new();
        for i in 0..K {
            let path = dir.path().join(format!("pinned_{}", i));
            pool.add_new(&path, Page::new(8)).unwrap(); // stays pinned (pin_count 1)
            pinned_paths.push(path);
        }

        for i in 0..(N + K) {
            let path = dir.path().join(format!("touched_{}", i));
            pool.add_new(&path, Page::new(8)).unwrap();
            pool.unpin(&path);
        }

        assert_eq!(pool.frames.len(), N);
        for path in &pinned_paths {
            assert!(
                pool.frames.contains_key(path),
                "a pinned page must never be evicted"
            );
        }
    }
}
