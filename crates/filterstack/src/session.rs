//! Session-scoped collaborators: resource provisioning and shared session
//! variables.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::EngineError;

/// Provisions resources (e.g. docker containers) on behalf of docker-mode
/// filters.
///
/// Per the resolved ambiguity over whether a filter's declared scope should
/// be forwarded to resource provisioning: it is not. `ensure_resource` only
/// ever sees `rtype` and `args`; scope stays local to the session-level
/// check that precedes the call.
pub trait SessionContext: Send + Sync {
    fn ensure_resource(
        &self,
        rtype: &str,
        args: &[Vec<u8>],
    ) -> Result<HashMap<String, String>, EngineError>;
}

/// Shared floating-point state visible to every filter in a session,
/// read and updated atomically as whole batches.
pub struct SessionVars {
    vars: Mutex<HashMap<String, f64>>,
}

impl SessionVars {
    pub fn new() -> Self {
        Self {
            vars: Mutex::new(HashMap::new()),
        }
    }

    /// Reads `names` atomically; absent names yield 0.0, matching the
    /// filter protocol's "uninitialized session variable reads as zero"
    /// convention.
    pub fn get_many(&self, names: &[String]) -> Vec<f64> {
        let vars = self.vars.lock().unwrap();
        names.iter().map(|n| *vars.get(n).unwrap_or(&0.0)).collect()
    }

    /// Applies `deltas` (name, increment) as one atomic batch and returns
    /// the post-update values in the same order.
    pub fn update_many(&self, deltas: &[(String, f64)]) -> Vec<f64> {
        let mut vars = self.vars.lock().unwrap();
        deltas
            .iter()
            .map(|(name, delta)| {
                let entry = vars.entry(name.clone()).or_insert(0.0);
                *entry += delta;
                *entry
            })
            .collect()
    }
}

impl Default for SessionVars {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_many_defaults_to_zero() {
        let vars = SessionVars::new();
        assert_eq!(vars.get_many(&["x".to_string()]), vec![0.0]);
    }

    #[test]
    fn test_update_many_accumulates() {
        let vars = SessionVars::new();
        vars.update_many(&[("x".to_string(), 1.0)]);
        let result = vars.update_many(&[("x".to_string(), 2.5)]);
        assert_eq!(result, vec![3.5]);
    }

    #[test]
    fn test_update_many_is_batch_atomic_across_names() {
        let vars = SessionVars::new();
        let result = vars.update_many(&[("a".to_string(), 1.0), ("b".to_string(), 2.0)]);
        assert_eq!(result, vec![1.0, 2.0]);
        assert_eq!(vars.get_many(&["a".to_string(), "b".to_string()]), vec![1.0, 2.0]);
    }
}
