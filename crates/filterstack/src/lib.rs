//! Filter-stack evaluation engine for an interactive visual-search server.
//!
//! For every candidate object drawn from a scope list, a [`stack::StackRunner`]
//! runs an ordered stack of user-supplied filters (subprocesses or
//! container-hosted TCP services) and decides whether the object should be
//! forwarded to the [`external::BlastChannel`]. A content-addressed
//! two-tier cache ([`cache`]) lets the engine skip filter executions across
//! searches without weakening correctness; see [`cache::resolve_cached_drop`]
//! for the invariant that makes reuse safe.
//!
//! The engine is thread-per-object: [`stack::FilterStack::start_threads`]
//! spawns a handful of OS threads, each blocking on I/O at every
//! suspension point (worker reads/writes, cache round-trips, object loads,
//! blast sends). There is no async runtime in this crate.

pub mod cache;
pub mod codec;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod external;
pub mod hash;
pub mod object;
pub mod processor;
pub mod runner;
pub mod session;
pub mod stack;
pub mod stats;
pub mod worker;

#[cfg(any(test, feature = "testing"))]
pub mod testutil;

pub use error::{EngineError, Result};
pub use object::Object;
pub use stack::FilterStack;
