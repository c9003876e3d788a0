use thiserror::Error;

/// Crate-wide error type.
///
/// Internal code threads this through `?`; the public Query/Transaction
/// API converts every variant to `false`/`None`/an error tag at the
/// boundary, per the engine's "no exception crosses a transaction
/// boundary alive" policy.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("lock denied on {0}")]
    LockDenied(String),

    #[error("buffer pool exhausted")]
    PoolExhausted,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transaction {0} is in the shrinking phase and may not acquire new locks")]
    ShrinkingPhaseViolation(u64),

    #[error("bad input: {0}")]
    BadInput(String),

    #[error("corrupt page data: {0}")]
    Corrupt(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Distinguished error tags surfaced to `Transaction::run` callers, per
/// `spec.md` §6's `(bool, error-tag?)` contract. Coarser than
/// `EngineError`: a worker only needs to know whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorTag {
    DuplicateKey,
    NotFound,
    LockDenied,
    Other,
}

impl From<&EngineError> for ErrorTag {
    fn from(e: &EngineError) -> Self {
        match e {
            EngineError::DuplicateKey(_) => ErrorTag::DuplicateKey,
            EngineError::NotFound(_) => ErrorTag::NotFound,
            EngineError::LockDenied(_) | EngineError::ShrinkingPhaseViolation(_) => {
                ErrorTag::LockDenied
            }
            _ => ErrorTag::Other,
        }
    }
}
