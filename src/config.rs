/// Tunable constants for one engine instance.
///
/// Grounded in `lstore/config.py`, which hard-codes these as module
/// globals; here they are a passable struct so tests can run with a
/// tiny pool/threshold instead of mutating process-global state.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Bytes per serialized page (informational; the codec is
    /// length-prefixed and does not pad to this size).
    pub page_size: usize,
    /// Record slots per page.
    pub page_record_size: usize,
    /// Base pages per page range.
    pub page_range_size: usize,
    /// Unmerged-update count that triggers a background merge.
    pub merge_thresh: usize,
    /// Frames per buffer pool.
    pub pool_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let page_record_size = 512;
        let page_range_size = 16;
        EngineConfig {
            page_size: 4096,
            page_record_size,
            page_range_size,
            merge_thresh: page_record_size * page_range_size * 4,
            pool_size: 1024,
        }
    }
}

impl EngineConfig {
    /// A configuration with small pools/thresholds, for tests that want
    /// to exercise eviction or merge triggering without allocating
    /// thousands of records.
    pub fn small() -> Self {
        EngineConfig {
            page_size: 4096,
            page_record_size: 8,
            page_range_size: 2,
            merge_thresh: 16,
            pool_size: 4,
        }
    }
}

/// Metadata-column positions, informational per `spec.md` §6.
pub const INDIRECTION_COLUMN: usize = 0;
pub const RID_COLUMN: usize = 1;
pub const TIMESTAMP_COLUMN: usize = 2;
pub const SCHEMA_ENCODING_COLUMN: usize = 3;
