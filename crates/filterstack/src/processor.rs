//! The uniform interface over anything that transforms an object: the
//! fetcher (loads attributes from the retriever) and the filter runner
//! (evaluates one resolved filter descriptor).

use std::io::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::{result_cache_key, CachedResult};
use crate::config::config;
use crate::descriptor::FilterDescriptor;
use crate::error::{EngineError, Result};
use crate::external::ObjectLoader;
use crate::hash::fast128;
use crate::object::Object;
use crate::session::{SessionContext, SessionVars};
use crate::stats::Statistics;
use crate::worker::FilterWorker;

/// What a single `evaluate` call produced: a completed result, or the
/// internal drop signal (fetcher load failure, or worker death after
/// `init-success`). This is deliberately not part of [`EngineError`] — it
/// is control flow local to one object's evaluation, never surfaced past
/// the stack runner.
pub enum EvalOutcome {
    Completed(CachedResult),
    Drop,
}

/// The capability set every object processor exposes: fetcher and filter
/// runner are two variants over it.
pub trait ObjectProcessor: Send {
    fn name(&self) -> &str;
    fn cache_digest(&self) -> &str;
    fn send_score(&self) -> bool;
    fn stats(&self) -> &Statistics;
    fn threshold(&self, result: &CachedResult) -> bool;
    fn evaluate(&mut self, object: &mut Object) -> Result<EvalOutcome>;

    fn cache_key(&self, object_id: &[u8]) -> Vec<u8> {
        result_cache_key(self.cache_digest(), object_id)
    }

    /// Notifies this processor that a cached result was reused instead of
    /// re-evaluating, so statistics reflect the reuse.
    fn cache_hit(&self, result: &CachedResult) {
        if self.threshold(result) {
            self.stats().record_cache_passed();
        } else {
            self.stats().record_cache_dropped();
        }
    }
}

/// Loads object attributes from the retriever.
pub struct Fetcher {
    loader: Arc<dyn ObjectLoader>,
    stats: Statistics,
}

impl Fetcher {
    pub fn new(loader: Arc<dyn ObjectLoader>) -> Self {
        Self {
            loader,
            stats: Statistics::new(),
        }
    }
}

impl ObjectProcessor for Fetcher {
    fn name(&self) -> &str {
        "dataretriever"
    }

    fn cache_digest(&self) -> &str {
        "dataretriever"
    }

    fn send_score(&self) -> bool {
        false
    }

    fn stats(&self) -> &Statistics {
        &self.stats
    }

    fn threshold(&self, _result: &CachedResult) -> bool {
        true
    }

    fn evaluate(&mut self, object: &mut Object) -> Result<EvalOutcome> {
        if let Err(e) = self.loader.load(object) {
            self.stats.record_unloadable();
            tracing::warn!(error = %e, "object load failed");
            return Ok(EvalOutcome::Drop);
        }
        let mut result = CachedResult::new(0.0);
        for key in object.attribute_names()? {
            if let Some(sig) = object.signature(&key)? {
                result.output_attrs.insert(key, sig);
            }
        }
        Ok(EvalOutcome::Completed(result))
    }
}

/// Evaluates one resolved filter descriptor against one object.
pub struct FilterRunner {
    descriptor: Arc<FilterDescriptor>,
    session: Arc<dyn SessionContext>,
    session_vars: Arc<SessionVars>,
    worker: Option<Box<dyn FilterWorker>>,
    initialized: bool,
    stats: Statistics,
}

impl FilterRunner {
    pub fn new(
        descriptor: Arc<FilterDescriptor>,
        session: Arc<dyn SessionContext>,
        session_vars: Arc<SessionVars>,
    ) -> Self {
        Self {
            descriptor,
            session,
            session_vars,
            worker: None,
            initialized: false,
            stats: Statistics::new(),
        }
    }

    fn ensure_worker(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let t0 = Instant::now();
        let worker = self.descriptor.connect(self.session.as_ref())?;
        self.stats.record_startup_time(t0.elapsed());
        self.worker = Some(worker);
        self.initialized = false;
        Ok(())
    }

    fn require_item(worker: &mut dyn FilterWorker, what: &str) -> Result<Vec<u8>> {
        worker
            .get_item()
            .map_err(EngineError::Io)?
            .ok_or_else(|| EngineError::FilterExecution(format!("missing {what} item")))
    }

    /// Handles worker death or EOF observed at `next_tag`, distinguishing
    /// pre-init (fatal) from post-init (drop) per the protocol's EOF rule.
    fn handle_eof(&mut self) -> Result<EvalOutcome> {
        if !self.initialized {
            Err(EngineError::FilterExecution(format!(
                "filter {} died before init-success",
                self.descriptor.name
            )))
        } else {
            self.stats.record_terminate();
            self.worker = None;
            Ok(EvalOutcome::Drop)
        }
    }
}

impl ObjectProcessor for FilterRunner {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn cache_digest(&self) -> &str {
        &self
            .descriptor
            .resolved()
            .expect("descriptor must be resolved before binding")
            .cache_digest
    }

    fn send_score(&self) -> bool {
        true
    }

    fn stats(&self) -> &Statistics {
        &self.stats
    }

    fn threshold(&self, result: &CachedResult) -> bool {
        let desc = &self.descriptor;
        desc.min_score <= result.score && result.score <= desc.max_score
    }

    fn evaluate(&mut self, object: &mut Object) -> Result<EvalOutcome> {
        let start = Instant::now();
        self.ensure_worker()?;

        let mut result = CachedResult::new(0.0);
        loop {
            let tag = match self.worker.as_mut().unwrap().next_tag() {
                Ok(tag) => tag,
                Err(_) => return self.handle_eof(),
            };
            let worker = self.worker.as_deref_mut().unwrap();
            match tag.as_str() {
                "" => return self.handle_eof(),
                "init-success" => {
                    self.initialized = true;
                }
                "get-attribute" => {
                    let key = Self::require_item(worker, "get-attribute key")?;
                    let value = object.get(&key)?.map(|v| v.to_vec());
                    match value {
                        Some(v) => {
                            let sig = fast128(&v);
                            worker.send_item(Some(&v)).map_err(EngineError::Io)?;
                            result.input_attrs.insert(key, Some(sig));
                        }
                        None => {
                            worker.send_item(None).map_err(EngineError::Io)?;
                            result.input_attrs.insert(key, None);
                        }
                    }
                }
                "set-attribute" => {
                    let key = Self::require_item(worker, "set-attribute key")?;
                    let value = Self::require_item(worker, "set-attribute value")?;
                    let sig = fast128(&value);
                    object.set(key.clone(), value)?;
                    result.output_attrs.insert(key, sig);
                }
                "omit-attribute" => {
                    let key = Self::require_item(worker, "omit-attribute key")?;
                    match object.omit(&key) {
                        Ok(()) => {
                            worker.send_bool(true).map_err(EngineError::Io)?;
                            result.omit_attrs.insert(key);
                        }
                        Err(_) => {
                            worker.send_bool(false).map_err(EngineError::Io)?;
                        }
                    }
                }
                "get-session-variables" => {
                    let keys = worker.get_array().map_err(EngineError::Io)?;
                    let names: Vec<String> = keys
                        .iter()
                        .map(|k| String::from_utf8_lossy(k).into_owned())
                        .collect();
                    let values = self.session_vars.get_many(&names);
                    let items: Vec<Vec<u8>> =
                        values.iter().map(|v| v.to_string().into_bytes()).collect();
                    worker.send_array(&items).map_err(EngineError::Io)?;
                }
                "update-session-variables" => {
                    let keys = worker.get_array().map_err(EngineError::Io)?;
                    let values = worker.get_array().map_err(EngineError::Io)?;
                    if keys.len() != values.len() {
                        return Err(EngineError::FilterExecution(
                            "session variable update length mismatch".to_string(),
                        ));
                    }
                    let mut deltas = Vec::with_capacity(keys.len());
                    for (k, v) in keys.iter().zip(values.iter()) {
                        let name = String::from_utf8_lossy(k).into_owned();
                        let delta: f64 = std::str::from_utf8(v)
                            .ok()
                            .and_then(|s| s.parse().ok())
                            .ok_or_else(|| {
                                EngineError::FilterExecution(format!(
                                    "non-numeric session variable value for {name}"
                                ))
                            })?;
                        deltas.push((name, delta));
                    }
                    self.session_vars.update_many(&deltas);
                }
                "log" => {
                    let level = Self::require_item(worker, "log level")?;
                    let message = Self::require_item(worker, "log message")?;
                    let level_num: u32 = std::str::from_utf8(&level)
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0);
                    let msg = String::from_utf8_lossy(&message);
                    let name = &self.descriptor.name;
                    match level_num {
                        0x01 => tracing::error!(filter = %name, critical = true, "{msg}"),
                        0x02 => tracing::error!(filter = %name, "{msg}"),
                        0x04 => tracing::info!(filter = %name, "{msg}"),
                        0x08 => {} // trace: suppressed
                        _ => tracing::debug!(filter = %name, "{msg}"),
                    }
                }
                "stdout" => {
                    let text = Self::require_item(worker, "stdout text")?;
                    std::io::stdout().write_all(&text).map_err(EngineError::Io)?;
                }
                "ensure-resource" => {
                    let scope = Self::require_item(worker, "ensure-resource scope")?;
                    if scope != b"session" {
                        return Err(EngineError::FilterExecution(format!(
                            "unsupported ensure-resource scope {:?}",
                            String::from_utf8_lossy(&scope)
                        )));
                    }
                    let rtype = Self::require_item(worker, "ensure-resource type")?;
                    let args = worker.get_array().map_err(EngineError::Io)?;
                    let rtype_str = String::from_utf8_lossy(&rtype).into_owned();
                    let resources = self.session.ensure_resource(&rtype_str, &args)?;
                    let entries: Vec<(Vec<u8>, Vec<u8>)> = resources
                        .into_iter()
                        .map(|(k, v)| (k.into_bytes(), v.into_bytes()))
                        .collect();
                    worker.send_dict(&entries).map_err(EngineError::Io)?;
                    // Continue the loop rather than breaking: a `result`
                    // tag is still expected after resource provisioning.
                }
                "result" => {
                    let score_bytes = Self::require_item(worker, "result score")?;
                    result.score = std::str::from_utf8(&score_bytes)
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| {
                            EngineError::FilterExecution("non-numeric result score".to_string())
                        })?;
                    break;
                }
                other => {
                    return Err(EngineError::FilterExecution(format!(
                        "unexpected tag from filter {}: {other}",
                        self.descriptor.name
                    )));
                }
            }
        }

        let elapsed = start.elapsed();
        let total_bytes: usize = result
            .output_attrs
            .keys()
            .filter_map(|k| object.get(k).ok().flatten())
            .map(|v| v.len())
            .sum();
        result.cache_output = should_cache_output(total_bytes, elapsed, config().cache_output_threshold_bytes_per_sec);
        self.stats.record_execution_time(elapsed);
        Ok(EvalOutcome::Completed(result))
    }
}

/// Whether a run producing `total_bytes` of output attributes over
/// `elapsed` is cheap enough to skip re-deriving next time: throughput
/// strictly below `threshold_bytes_per_sec` is cached, throughput at or
/// above it is not.
fn should_cache_output(total_bytes: usize, elapsed: Duration, threshold_bytes_per_sec: f64) -> bool {
    let elapsed_secs = elapsed.as_secs_f64().max(f64::MIN_POSITIVE);
    let throughput = total_bytes as f64 / elapsed_secs;
    throughput < threshold_bytes_per_sec
}
