//! Error types for the filter-stack engine.
//!
//! Fatal errors (dependency resolution, stack construction, filter
//! execution, cache connectivity at startup) flow through [`EngineError`]
//! and are meant to be propagated with `?` up to the caller that owns the
//! search. The internal drop signal described by the specification is
//! deliberately *not* a variant here: it is control flow local to one
//! object's evaluation (see [`crate::processor::EvalOutcome`]), never an
//! error surfaced to the client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("dependency error: {0}")]
    Dependency(String),

    #[error("unsupported source scheme: {0}")]
    UnsupportedSource(String),

    #[error("unsupported filter mode: {0}")]
    UnsupportedMode(String),

    #[error("filter execution error: {0}")]
    FilterExecution(String),

    #[error("cache store failure: {0}")]
    CacheStore(String),

    #[error("object accessed after invalidation")]
    ObjectInvalidated,

    #[error("attempted to omit absent attribute {0:?}")]
    OmitMissingAttribute(Vec<u8>),

    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    #[error("object load failed: {0}")]
    Load(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
