//! The mutable object a filter stack evaluates.
//!
//! An [`Object`] is owned by exactly one stack-runner thread for its entire
//! lifetime (see the concurrency model in the crate root docs). Once
//! [`Object::invalidate`] has been called, every accessor returns
//! [`EngineError::ObjectInvalidated`] — this catches use-after-drop bugs at
//! the call site instead of silently operating on stale data.

use std::collections::{HashMap, HashSet};

use crate::error::{EngineError, Result};
use crate::hash::fast128;

/// A candidate object drawn from the scope list.
pub struct Object {
    id: Vec<u8>,
    attrs: HashMap<Vec<u8>, Vec<u8>>,
    omitted: HashSet<Vec<u8>>,
    valid: bool,
}

impl Object {
    pub fn new(id: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            attrs: HashMap::new(),
            omitted: HashSet::new(),
            valid: true,
        }
    }

    pub fn id(&self) -> &[u8] {
        &self.id
    }

    fn check_valid(&self) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(EngineError::ObjectInvalidated)
        }
    }

    /// Returns the attribute value for `key`, or `None` if absent.
    pub fn get(&self, key: &[u8]) -> Result<Option<&[u8]>> {
        self.check_valid()?;
        Ok(self.attrs.get(key).map(|v| v.as_slice()))
    }

    /// Sets (or overwrites) the attribute value for `key`.
    pub fn set(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        self.check_valid()?;
        self.attrs.insert(key.into(), value.into());
        Ok(())
    }

    /// Returns `true` if `key` is present.
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        self.check_valid()?;
        Ok(self.attrs.contains_key(key))
    }

    /// Marks `key` as omitted from the client's default attribute
    /// projection. Fails if `key` is not present.
    pub fn omit(&mut self, key: &[u8]) -> Result<()> {
        self.check_valid()?;
        if !self.attrs.contains_key(key) {
            return Err(EngineError::OmitMissingAttribute(key.to_vec()));
        }
        self.omitted.insert(key.to_vec());
        Ok(())
    }

    pub fn is_omitted(&self, key: &[u8]) -> Result<bool> {
        self.check_valid()?;
        Ok(self.omitted.contains(key))
    }

    /// Returns the fast128 signature of the current value of `key`, or
    /// `None` if absent.
    pub fn signature(&self, key: &[u8]) -> Result<Option<String>> {
        self.check_valid()?;
        Ok(self.attrs.get(key).map(|v| fast128(v)))
    }

    /// Every attribute name currently present, in arbitrary order.
    pub fn attribute_names(&self) -> Result<Vec<Vec<u8>>> {
        self.check_valid()?;
        Ok(self.attrs.keys().cloned().collect())
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}
