//! The stack runner: a worker thread's per-object evaluation loop.
//!
//! Consults the result cache for a reusable cached drop before running
//! anything; failing that, drives the fetcher and filter runners in stack
//! order, reusing the attribute cache wherever a runner's recorded inputs
//! are still valid; and finally commits whatever results were produced,
//! on every exit path, including an internal drop.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{attribute_cache_key, build_output_index, resolve_cached_drop, CacheStore, CachedResult};
use crate::error::Result;
use crate::external::BlastChannel;
use crate::object::Object;
use crate::processor::{EvalOutcome, ObjectProcessor};
use crate::stats::Statistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Drop,
}

/// Owns one object at a time; consults caches, drives the object-processor
/// chain, updates statistics, and forwards accepted objects to the blast
/// channel.
pub struct StackRunner {
    processors: Vec<Box<dyn ObjectProcessor>>,
    cache: Arc<dyn CacheStore>,
    blast: Arc<dyn BlastChannel>,
    stats: Arc<Statistics>,
}

impl StackRunner {
    pub fn new(
        processors: Vec<Box<dyn ObjectProcessor>>,
        cache: Arc<dyn CacheStore>,
        blast: Arc<dyn BlastChannel>,
        stats: Arc<Statistics>,
    ) -> Self {
        Self {
            processors,
            cache,
            blast,
            stats,
        }
    }

    /// Evaluates one object to completion, invalidating it before
    /// returning regardless of outcome.
    pub fn run_one(&mut self, mut object: Object) -> Result<Decision> {
        let result = self.run_inner(&mut object);
        object.invalidate();
        result
    }

    fn run_inner(&mut self, object: &mut Object) -> Result<Decision> {
        self.stats.record_processed();

        let names: Vec<String> = self.processors.iter().map(|p| p.name().to_string()).collect();
        let keys_by_name: HashMap<String, Vec<u8>> = names
            .iter()
            .map(|n| (n.clone(), self.processor(n).cache_key(object.id())))
            .collect();
        let keys: Vec<Vec<u8>> = names.iter().map(|n| keys_by_name[n].clone()).collect();
        let cache_results = self.load_cache_results(&names, &keys);

        if self.try_cached_drop(&cache_results) {
            self.stats.record_dropped();
            return Ok(Decision::Drop);
        }

        let mut new_results: HashMap<String, CachedResult> = HashMap::new();
        let outcome = self.execute_processors(object, &cache_results, &mut new_results);
        self.commit_cache(object, &new_results, &keys_by_name);

        match outcome? {
            Decision::Accept => {
                self.blast.send(object)?;
                self.stats.record_passed();
                Ok(Decision::Accept)
            }
            Decision::Drop => {
                self.stats.record_dropped();
                Ok(Decision::Drop)
            }
        }
    }

    fn processor(&self, name: &str) -> &dyn ObjectProcessor {
        self.processors
            .iter()
            .find(|p| p.name() == name)
            .expect("name drawn from self.processors")
            .as_ref()
    }

    fn load_cache_results(&self, names: &[String], keys: &[Vec<u8>]) -> HashMap<String, CachedResult> {
        let mut out = HashMap::new();
        match self.cache.mget(keys) {
            Ok(values) => {
                for (name, value) in names.iter().zip(values) {
                    if let Some(bytes) = value {
                        match CachedResult::decode(&bytes) {
                            Ok(result) => {
                                out.insert(name.clone(), result);
                            }
                            Err(e) => {
                                tracing::warn!(runner = %name, error = %e, "malformed cached result");
                            }
                        }
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "result cache mget failed"),
        }
        out
    }

    /// Attempts to reuse a cached *drop* decision: finds some runner whose
    /// cached result fails threshold and whose dependency chain is
    /// provably consistent with `cache_results`. On success, every runner
    /// in the resolved chain is notified via `cache_hit`.
    fn try_cached_drop(&self, cache_results: &HashMap<String, CachedResult>) -> bool {
        let output_index = build_output_index(cache_results);
        for processor in &self.processors {
            let Some(cached) = cache_results.get(processor.name()) else {
                continue;
            };
            if processor.threshold(cached) {
                continue;
            }
            if let Some(resolved) = resolve_cached_drop(processor.name(), cache_results, &output_index) {
                for name in &resolved {
                    self.processor(name).cache_hit(&cache_results[name]);
                }
                return true;
            }
        }
        false
    }

    fn execute_processors(
        &mut self,
        object: &mut Object,
        cache_results: &HashMap<String, CachedResult>,
        new_results: &mut HashMap<String, CachedResult>,
    ) -> Result<Decision> {
        for processor in self.processors.iter_mut() {
            let name = processor.name().to_string();

            if let Some(cached) = cache_results.get(&name) {
                if Self::try_attribute_reuse(cached, object, self.cache.as_ref())? {
                    processor.cache_hit(cached);
                    if !processor.threshold(cached) {
                        return Ok(Decision::Drop);
                    }
                    if processor.send_score() {
                        Self::write_score_attr(object, &name, cached.score)?;
                    }
                    continue;
                }
            }

            match processor.evaluate(object)? {
                EvalOutcome::Completed(result) => {
                    let accepted = processor.threshold(&result);
                    if accepted && processor.send_score() {
                        Self::write_score_attr(object, &name, result.score)?;
                    }
                    new_results.insert(name, result);
                    if !accepted {
                        return Ok(Decision::Drop);
                    }
                }
                EvalOutcome::Drop => return Ok(Decision::Drop),
            }
        }
        Ok(Decision::Accept)
    }

    /// Tries to restore a runner's recorded outputs from the attribute
    /// cache without re-executing it. Returns `true` if the object was
    /// mutated to reflect the cached run.
    fn try_attribute_reuse(cached: &CachedResult, object: &mut Object, cache: &dyn CacheStore) -> Result<bool> {
        for (key, expected_sig) in &cached.input_attrs {
            match expected_sig {
                None => {
                    if object.contains(key)? {
                        return Ok(false);
                    }
                }
                Some(expected) => match object.signature(key)? {
                    Some(current) if &current == expected => {}
                    _ => return Ok(false),
                },
            }
        }

        let entries: Vec<(&Vec<u8>, &String)> = cached.output_attrs.iter().collect();
        let keys: Vec<Vec<u8>> = entries.iter().map(|(_, sig)| attribute_cache_key(sig)).collect();
        let values = cache.mget(&keys)?;
        if values.iter().any(Option::is_none) {
            return Ok(false);
        }

        for ((key, _sig), value) in entries.into_iter().zip(values) {
            object.set((*key).clone(), value.expect("checked above"))?;
        }
        for key in &cached.omit_attrs {
            if let Err(e) = object.omit(key) {
                tracing::warn!(error = %e, "attribute-cache omit target missing");
            }
        }
        Ok(true)
    }

    fn write_score_attr(object: &mut Object, name: &str, score: f64) -> Result<()> {
        object.set(format!("_filter.{name}_score"), format!("{score}\0"))
    }

    /// Commits every fresh result to the result cache and, for results
    /// whose output was cheap enough to re-derive, mirrors still-current
    /// attribute values into the attribute cache. Runs on every exit path.
    fn commit_cache(
        &self,
        object: &Object,
        new_results: &HashMap<String, CachedResult>,
        keys_by_name: &HashMap<String, Vec<u8>>,
    ) {
        let mut entries: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        for (name, result) in new_results {
            if let Some(key) = keys_by_name.get(name) {
                entries.push((key.clone(), result.encode()));
            }
            if !result.cache_output {
                continue;
            }
            for (attr_key, sig) in &result.output_attrs {
                if object.signature(attr_key).ok().flatten().as_ref() == Some(sig) {
                    if let Ok(Some(value)) = object.get(attr_key) {
                        entries.push((attribute_cache_key(sig), value.to_vec()));
                    }
                }
            }
        }
        if entries.is_empty() {
            return;
        }
        if let Err(e) = self.cache.mset(&entries) {
            tracing::warn!(error = %e, "result/attribute cache write failed");
        }
    }
}
