//! Hashing primitives used throughout the engine.
//!
//! Two distinct hash functions are in play, for different reasons:
//!
//! - [`sha256_hex`] content-addresses filter code and blob arguments in the
//!   blob cache. It is slow but collision-resistant, which is what an
//!   external content store wants.
//! - [`fast128`] produces attribute signatures and filter cache digests. It
//!   runs on every attribute read/write during evaluation, so it favors
//!   speed over cryptographic strength.

use sha2::{Digest, Sha256};
use xxhash_rust::xxh3::xxh3_128;

/// Lowercase hex SHA-256 digest of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Lowercase hex 128-bit fast hash of `data`, used for attribute signatures
/// and cache digests. Not suitable for content addressing.
pub fn fast128(data: &[u8]) -> String {
    hex::encode(xxh3_128(data).to_be_bytes())
}

/// Join `parts` with a single space, matching the digest construction in
/// §3 of the cache-key scheme (`join_space`).
pub fn join_space<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for (i, part) in parts.into_iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(part.as_ref());
    }
    out
}
