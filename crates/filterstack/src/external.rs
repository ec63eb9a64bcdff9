//! Traits for the engine's external collaborators.
//!
//! The engine treats all of these as out of scope for its own
//! implementation (spec §1's "external collaborators, referenced only
//! through their interfaces"); they're modeled as traits so the engine can
//! be exercised without real infrastructure. See [`crate::testutil`] for
//! in-memory reference implementations used by the test suite.

use std::path::PathBuf;

use crate::error::EngineError;
use crate::object::Object;

/// A content-addressed byte store keyed by lowercased SHA-256 hex digest.
/// Holds filter code and blob arguments.
pub trait BlobCache: Send + Sync {
    /// Raw bytes for `digest`, or `None` if absent.
    fn get(&self, digest: &str) -> Option<Vec<u8>>;

    /// A readable, executable file path for `digest`'s content, or `None`
    /// if absent.
    fn executable_path(&self, digest: &str) -> Option<PathBuf>;

    fn contains(&self, digest: &str) -> bool;

    /// Adds `data` to the cache, returning its lowercase hex SHA-256
    /// digest.
    fn add(&self, data: &[u8]) -> String;
}

/// Populates an [`Object`]'s attributes from a data-retriever. Out of
/// scope for this engine; only the interface is defined here.
pub trait ObjectLoader: Send + Sync {
    fn load(&self, obj: &mut Object) -> Result<(), EngineError>;
}

/// The server-to-client delivery channel for accepted objects.
pub trait BlastChannel: Send + Sync {
    /// Sends `obj` to the client. Implementations should return
    /// [`EngineError::ConnectionFailure`] when the client has disconnected,
    /// which the stack runner treats as a shutdown signal rather than a
    /// per-object failure.
    fn send(&self, obj: &Object) -> Result<(), EngineError>;

    fn close(&self);
}

/// The stream of candidate objects the stack consumes. Required to be safe
/// for concurrent polling; the engine additionally wraps it in a mutex
/// (see [`crate::stack`]) so that multiple worker threads can share one
/// instance without requiring the implementation to provide its own
/// internal synchronization.
pub type ScopeList = Box<dyn Iterator<Item = Object> + Send>;
