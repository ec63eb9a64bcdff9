//! The filter stack: the static, dependency-ordered list of descriptors
//! and the factory that produces stack runners.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::cache::CacheStore;
use crate::descriptor::FilterDescriptor;
use crate::error::{EngineError, Result};
use crate::external::{BlastChannel, BlobCache, ObjectLoader, ScopeList};
use crate::processor::{Fetcher, FilterRunner, ObjectProcessor};
use crate::runner::StackRunner;
use crate::session::{SessionContext, SessionVars};
use crate::stats::Statistics;

/// The resolved, dependency-ordered set of filters for one search.
pub struct FilterStack {
    order: Vec<Arc<FilterDescriptor>>,
    session: Arc<dyn SessionContext>,
    session_vars: Arc<SessionVars>,
    cache: Arc<dyn CacheStore>,
    loader: Arc<dyn ObjectLoader>,
}

impl FilterStack {
    /// Resolves every descriptor against `blobs`, then orders them so that
    /// dependencies precede dependents. Fails at construction on an
    /// unknown dependency name or a cycle.
    pub fn build(
        mut descriptors: Vec<FilterDescriptor>,
        blobs: &dyn BlobCache,
        session: Arc<dyn SessionContext>,
        cache: Arc<dyn CacheStore>,
        loader: Arc<dyn ObjectLoader>,
    ) -> Result<Self> {
        for descriptor in &mut descriptors {
            descriptor.resolve(blobs)?;
        }

        // Last-write-wins on the name index; each descriptor is still
        // visited (and ordered) exactly once, by index.
        let mut index: HashMap<String, usize> = HashMap::new();
        for (i, d) in descriptors.iter().enumerate() {
            index.insert(d.name.clone(), i);
        }

        let mut order_idx: Vec<usize> = Vec::with_capacity(descriptors.len());
        let mut visited: HashSet<usize> = HashSet::new();
        let mut in_progress: HashSet<usize> = HashSet::new();
        for i in 0..descriptors.len() {
            visit(i, &descriptors, &index, &mut visited, &mut in_progress, &mut order_idx)?;
        }

        let descriptors: Vec<Arc<FilterDescriptor>> = descriptors.into_iter().map(Arc::new).collect();
        let order = order_idx.into_iter().map(|i| descriptors[i].clone()).collect();

        Ok(Self {
            order,
            session,
            session_vars: Arc::new(SessionVars::new()),
            cache,
            loader,
        })
    }

    /// Produces a stack runner whose processor chain is the fetcher
    /// followed by one filter runner per descriptor in resolved order.
    pub fn bind(&self, blast: Arc<dyn BlastChannel>, stats: Arc<Statistics>) -> StackRunner {
        let mut processors: Vec<Box<dyn ObjectProcessor>> = Vec::with_capacity(self.order.len() + 1);
        processors.push(Box::new(Fetcher::new(self.loader.clone())));
        for descriptor in &self.order {
            processors.push(Box::new(FilterRunner::new(
                descriptor.clone(),
                self.session.clone(),
                self.session_vars.clone(),
            )));
        }
        StackRunner::new(processors, self.cache.clone(), blast, stats)
    }

    /// Spawns `count` worker threads sharing one scope list and one
    /// cleanup reference; the blast channel is closed exactly once, when
    /// the last thread exits.
    pub fn start_threads(
        self: Arc<Self>,
        count: usize,
        scope: Arc<std::sync::Mutex<ScopeList>>,
        blast: Arc<dyn BlastChannel>,
        stats: Arc<Statistics>,
    ) -> Vec<std::thread::JoinHandle<()>> {
        let cleanup = Arc::new(Cleanup::new(blast.clone()));
        (0..count)
            .map(|_| {
                let stack = self.clone();
                let scope = scope.clone();
                let blast = blast.clone();
                let stats = stats.clone();
                let cleanup = cleanup.clone();
                std::thread::spawn(move || {
                    let _cleanup = cleanup;
                    let mut runner = stack.bind(blast, stats);
                    loop {
                        let next = {
                            let mut scope = scope.lock().unwrap();
                            scope.next()
                        };
                        let Some(object) = next else {
                            break;
                        };
                        if let Err(e) = runner.run_one(object) {
                            tracing::error!(error = %e, "stack runner thread exiting after fatal error");
                            break;
                        }
                    }
                })
            })
            .collect()
    }
}

/// Closes the blast channel exactly once, when the last runner thread
/// sharing this reference is dropped.
struct Cleanup {
    blast: Arc<dyn BlastChannel>,
}

impl Cleanup {
    fn new(blast: Arc<dyn BlastChannel>) -> Self {
        Self { blast }
    }
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        self.blast.close();
    }
}

#[allow(clippy::too_many_arguments)]
fn visit(
    i: usize,
    descriptors: &[FilterDescriptor],
    index: &HashMap<String, usize>,
    visited: &mut HashSet<usize>,
    in_progress: &mut HashSet<usize>,
    order: &mut Vec<usize>,
) -> Result<()> {
    if visited.contains(&i) {
        return Ok(());
    }
    if in_progress.contains(&i) {
        return Err(EngineError::Dependency(format!(
            "dependency cycle detected at filter {}",
            descriptors[i].name
        )));
    }
    in_progress.insert(i);
    for dep_name in &descriptors[i].dependencies {
        let dep_idx = *index
            .get(dep_name)
            .ok_or_else(|| EngineError::Dependency(format!("unknown dependency: {dep_name}")))?;
        visit(dep_idx, descriptors, index, visited, in_progress, order)?;
    }
    in_progress.remove(&i);
    visited.insert(i);
    order.push(i);
    Ok(())
}
