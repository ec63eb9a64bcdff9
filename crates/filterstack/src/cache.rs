//! Result cache and attribute cache: schemas, key construction, and the
//! dependency-chain resolver that lets a cached drop be reused safely.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::hash::fast128;

/// A key/value service with byte-string keys and values. The engine treats
/// it as advisory: `mset` failures are logged and swallowed, never
/// propagated.
pub trait CacheStore: Send + Sync {
    fn ping(&self) -> Result<()>;
    fn mget(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>>;
    fn mset(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<()>;
}

/// One filter runner's (or the fetcher's) recorded result for one object.
#[derive(Debug, Clone)]
pub struct CachedResult {
    /// Attribute name -> signature observed while reading, or `None` if the
    /// filter asked for an attribute that was absent.
    pub input_attrs: HashMap<Vec<u8>, Option<String>>,
    /// Attribute name -> signature of the value this runner wrote.
    pub output_attrs: HashMap<Vec<u8>, String>,
    pub omit_attrs: HashSet<Vec<u8>>,
    pub score: f64,
    /// Write-policy only: never read back from the cache, so it never
    /// survives a round trip through [`Self::encode`]/[`Self::decode`].
    pub cache_output: bool,
}

/// On-the-wire shape of [`CachedResult`]. JSON object keys must be strings,
/// so byte-string attribute names travel as arrays of key/value pairs
/// instead of map keys.
#[derive(Serialize, Deserialize)]
struct CachedResultWire {
    input_attrs: Vec<(Vec<u8>, Option<String>)>,
    output_attrs: Vec<(Vec<u8>, String)>,
    omit_attrs: Vec<Vec<u8>>,
    score: f64,
}

impl CachedResult {
    pub fn new(score: f64) -> Self {
        Self {
            input_attrs: HashMap::new(),
            output_attrs: HashMap::new(),
            omit_attrs: HashSet::new(),
            score,
            cache_output: false,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let wire = CachedResultWire {
            input_attrs: self.input_attrs.clone().into_iter().collect(),
            output_attrs: self.output_attrs.clone().into_iter().collect(),
            omit_attrs: self.omit_attrs.iter().cloned().collect(),
            score: self.score,
        };
        serde_json::to_vec(&wire).expect("CachedResult serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let wire: CachedResultWire = serde_json::from_slice(bytes)
            .map_err(|e| EngineError::CacheStore(format!("malformed cached result: {e}")))?;
        Ok(Self {
            input_attrs: wire.input_attrs.into_iter().collect(),
            output_attrs: wire.output_attrs.into_iter().collect(),
            omit_attrs: wire.omit_attrs.into_iter().collect(),
            score: wire.score,
            cache_output: false,
        })
    }
}

/// `"result:" + fast128(digest + " " + object_id)` for filter runners.
pub fn result_cache_key(digest: &str, object_id: &[u8]) -> Vec<u8> {
    let mut joined = digest.as_bytes().to_vec();
    joined.push(b' ');
    joined.extend_from_slice(object_id);
    format!("result:{}", fast128(&joined)).into_bytes()
}

/// `"result:" + fast128("dataretriever " + object_id)` for the fetcher.
pub fn fetcher_cache_key(object_id: &[u8]) -> Vec<u8> {
    let mut joined = b"dataretriever ".to_vec();
    joined.extend_from_slice(object_id);
    format!("result:{}", fast128(&joined)).into_bytes()
}

pub fn attribute_cache_key(signature: &str) -> Vec<u8> {
    format!("attribute:{signature}").into_bytes()
}

/// Attempts to resolve a cached drop for `runner_name` against `results`
/// (every runner's cached result, keyed by name) and `output_index` (for
/// each attribute name, the runners whose cached output wrote it). Returns
/// the full set of runners whose cached results may be relied upon, or
/// `None` if `runner_name` cannot be proven consistent.
pub fn resolve_cached_drop(
    runner_name: &str,
    results: &HashMap<String, CachedResult>,
    output_index: &HashMap<Vec<u8>, Vec<String>>,
) -> Option<HashSet<String>> {
    let mut in_progress = HashSet::new();
    let mut unresolvable = HashSet::new();
    let mut resolved = HashMap::new();
    resolve_node(runner_name, results, output_index, &mut in_progress, &mut unresolvable, &mut resolved)
}

/// Resolves one node, memoizing both outcomes so repeated visits (the same
/// attribute produced along two different branches) are cheap and so a
/// node already proven unresolvable earlier in this call isn't retried.
///
/// For each of the node's input attributes, every cached producer whose
/// output signature matches is tried in turn (`Self::candidate producers`
/// below): a producer whose own chain fails to resolve is skipped rather
/// than dooming the whole node, so a result-cache collision (two producers
/// having written the same attribute name with the same signature) only
/// blocks resolution if *every* matching producer turns out unresolvable.
fn resolve_node(
    name: &str,
    results: &HashMap<String, CachedResult>,
    output_index: &HashMap<Vec<u8>, Vec<String>>,
    in_progress: &mut HashSet<String>,
    unresolvable: &mut HashSet<String>,
    resolved: &mut HashMap<String, HashSet<String>>,
) -> Option<HashSet<String>> {
    if let Some(acc) = resolved.get(name) {
        return Some(acc.clone());
    }
    if unresolvable.contains(name) {
        return None;
    }
    if in_progress.contains(name) {
        tracing::warn!("dependency cycle detected during resolution");
        return None;
    }
    in_progress.insert(name.to_string());

    let outcome = (|| -> Option<HashSet<String>> {
        let result = results.get(name)?;
        let mut acc = HashSet::new();
        acc.insert(name.to_string());

        for (key, expected_sig) in &result.input_attrs {
            let expected_sig = expected_sig.as_ref()?;
            let candidates = output_index.get(key).cloned().unwrap_or_default();
            let mut dep = None;
            for candidate in &candidates {
                let Some(candidate_result) = results.get(candidate) else {
                    continue;
                };
                if candidate_result.output_attrs.get(key) != Some(expected_sig) {
                    tracing::warn!(
                        runner = %candidate,
                        attribute = ?String::from_utf8_lossy(key),
                        "result cache collision: cached output signature does not match"
                    );
                    continue;
                }
                if let Some(sub) = resolve_node(candidate, results, output_index, in_progress, unresolvable, resolved) {
                    dep = Some(sub);
                    break;
                }
            }
            acc.extend(dep?);
        }
        Some(acc)
    })();

    in_progress.remove(name);
    match &outcome {
        Some(acc) => {
            resolved.insert(name.to_string(), acc.clone());
        }
        None => {
            unresolvable.insert(name.to_string());
        }
    }
    outcome
}

/// Builds the attribute-name -> producing-runner-names index used by
/// [`resolve_cached_drop`].
pub fn build_output_index(results: &HashMap<String, CachedResult>) -> HashMap<Vec<u8>, Vec<String>> {
    let mut index: HashMap<Vec<u8>, Vec<String>> = HashMap::new();
    for (name, result) in results {
        for key in result.output_attrs.keys() {
            index.entry(key.clone()).or_default().push(name.clone());
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(input: &[(&[u8], Option<&str>)], output: &[(&[u8], &str)]) -> CachedResult {
        let mut r = CachedResult::new(0.5);
        for (k, v) in input {
            r.input_attrs.insert(k.to_vec(), v.map(|s| s.to_string()));
        }
        for (k, v) in output {
            r.output_attrs.insert(k.to_vec(), v.to_string());
        }
        r
    }

    #[test]
    fn test_result_cache_key_stable() {
        let a = result_cache_key("digest1", b"obj1");
        let b = result_cache_key("digest1", b"obj1");
        assert_eq!(a, b);
        assert!(String::from_utf8(a).unwrap().starts_with("result:"));
    }

    #[test]
    fn test_fetcher_cache_key_matches_runner_key_for_dataretriever_digest() {
        // Same formula, different name: fetcher_cache_key exists for call-site
        // clarity, but it collapses to result_cache_key("dataretriever", ..).
        assert_eq!(fetcher_cache_key(b"obj1"), result_cache_key("dataretriever", b"obj1"));
    }

    #[test]
    fn test_encode_decode_round_trips() {
        let mut r = CachedResult::new(0.5);
        r.input_attrs.insert(b"x".to_vec(), Some("sigx".to_string()));
        r.input_attrs.insert(b"z".to_vec(), None);
        r.output_attrs.insert(b"y".to_vec(), "sigy".to_string());
        r.omit_attrs.insert(b"y".to_vec());
        let decoded = CachedResult::decode(&r.encode()).unwrap();
        assert_eq!(decoded.input_attrs, r.input_attrs);
        assert_eq!(decoded.output_attrs, r.output_attrs);
        assert_eq!(decoded.omit_attrs, r.omit_attrs);
        assert_eq!(decoded.score, r.score);
    }

    #[test]
    fn test_resolve_no_cached_result_is_unresolvable() {
        let results = HashMap::new();
        let index = HashMap::new();
        assert!(resolve_cached_drop("a", &results, &index).is_none());
    }

    #[test]
    fn test_resolve_null_input_forces_rerun() {
        // Scenario S6: a null input signature is never resolvable.
        let mut results = HashMap::new();
        results.insert("a".to_string(), result_with(&[(b"z", None)], &[]));
        let index = build_output_index(&results);
        assert!(resolve_cached_drop("a", &results, &index).is_none());
    }

    #[test]
    fn test_resolve_dependency_chain_succeeds() {
        // Scenario: B depends on A's output "y"; both cached consistently.
        let mut results = HashMap::new();
        results.insert("a".to_string(), result_with(&[], &[(b"y", "sigy")]));
        results.insert("b".to_string(), result_with(&[(b"y", Some("sigy"))], &[]));
        let index = build_output_index(&results);
        let resolved = resolve_cached_drop("b", &results, &index).unwrap();
        assert!(resolved.contains("a"));
        assert!(resolved.contains("b"));
    }

    #[test]
    fn test_resolve_dependency_signature_mismatch_fails() {
        // Scenario S3: A's digest changed, producing a different signature
        // than B's cached input expects.
        let mut results = HashMap::new();
        results.insert("a".to_string(), result_with(&[], &[(b"y", "newsig")]));
        results.insert("b".to_string(), result_with(&[(b"y", Some("oldsig"))], &[]));
        let index = build_output_index(&results);
        assert!(resolve_cached_drop("b", &results, &index).is_none());
    }

    #[test]
    fn test_resolve_falls_through_to_next_producer_on_signature_collision() {
        // Two producers both wrote "y" with the same signature "sigy" (a
        // result-cache collision), but "bad" itself depends on an
        // attribute nothing produces, so it can never resolve. "c" must
        // still resolve by falling through to "good" instead of being
        // declared unresolvable because "bad" was tried (and failed) first.
        let mut results = HashMap::new();
        results.insert("bad".to_string(), result_with(&[(b"unobtainable", Some("sig"))], &[(b"y", "sigy")]));
        results.insert("good".to_string(), result_with(&[], &[(b"y", "sigy")]));
        results.insert("c".to_string(), result_with(&[(b"y", Some("sigy"))], &[]));

        // Built by hand, not via `build_output_index`, so the unresolvable
        // candidate is deterministically tried before the resolvable one
        // regardless of HashMap iteration order.
        let mut index: HashMap<Vec<u8>, Vec<String>> = HashMap::new();
        index.insert(b"y".to_vec(), vec!["bad".to_string(), "good".to_string()]);

        let resolved = resolve_cached_drop("c", &results, &index).expect("must fall through to the resolvable producer");
        assert!(resolved.contains("good"));
        assert!(resolved.contains("c"));
        assert!(!resolved.contains("bad"));
    }

    #[test]
    fn test_resolve_detects_cycle() {
        let mut results = HashMap::new();
        results.insert("a".to_string(), result_with(&[(b"y", Some("sigy"))], &[(b"x", "sigx")]));
        results.insert("b".to_string(), result_with(&[(b"x", Some("sigx"))], &[(b"y", "sigy")]));
        let index = build_output_index(&results);
        assert!(resolve_cached_drop("a", &results, &index).is_none());
    }
}
