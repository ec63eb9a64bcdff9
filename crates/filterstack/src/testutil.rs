//! In-memory reference implementations of every external collaborator
//! trait, used by this crate's own tests and available to the CLI binary
//! for local-file-backed demos.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::cache::CacheStore;
use crate::error::{EngineError, Result};
use crate::external::{BlastChannel, BlobCache, ObjectLoader};
use crate::hash::sha256_hex;
use crate::object::Object;
use crate::session::SessionContext;

/// Content-addressed in-memory blob store. Materializes "executable" code
/// blobs to real temp files so [`crate::worker::SubprocessWorker`] can
/// spawn them.
pub struct InMemoryBlobCache {
    dir: tempfile::TempDir,
    entries: Mutex<HashMap<String, (Vec<u8>, PathBuf)>>,
}

impl InMemoryBlobCache {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir for blob cache"),
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryBlobCache {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobCache for InMemoryBlobCache {
    fn get(&self, digest: &str) -> Option<Vec<u8>> {
        self.entries.lock().unwrap().get(digest).map(|(d, _)| d.clone())
    }

    fn executable_path(&self, digest: &str) -> Option<PathBuf> {
        self.entries.lock().unwrap().get(digest).map(|(_, p)| p.clone())
    }

    fn contains(&self, digest: &str) -> bool {
        self.entries.lock().unwrap().contains_key(digest)
    }

    fn add(&self, data: &[u8]) -> String {
        let digest = sha256_hex(data);
        let path = self.dir.path().join(&digest);
        std::fs::write(&path, data).expect("write blob to temp file");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
        }
        self.entries
            .lock()
            .unwrap()
            .insert(digest.clone(), (data.to_vec(), path));
        digest
    }
}

/// A plain key/value map standing in for the result/attribute cache
/// service.
pub struct InMemoryCacheStore {
    entries: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for InMemoryCacheStore {
    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn mget(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        let entries = self.entries.lock().unwrap();
        Ok(keys.iter().map(|k| entries.get(k).cloned()).collect())
    }

    fn mset(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        let mut store = self.entries.lock().unwrap();
        for (k, v) in entries {
            store.insert(k.clone(), v.clone());
        }
        Ok(())
    }
}

/// Records every object it is sent, never fails.
pub struct RecordingBlastChannel {
    sent: Mutex<Vec<Vec<u8>>>,
}

impl RecordingBlastChannel {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent_ids(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

impl Default for RecordingBlastChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl BlastChannel for RecordingBlastChannel {
    fn send(&self, obj: &Object) -> Result<()> {
        self.sent.lock().unwrap().push(obj.id().to_vec());
        Ok(())
    }

    fn close(&self) {}
}

/// A blast channel that always reports the client as disconnected, for
/// exercising the cancellation path.
pub struct NullBlastChannel;

impl BlastChannel for NullBlastChannel {
    fn send(&self, _obj: &Object) -> Result<()> {
        Err(EngineError::ConnectionFailure("client disconnected".to_string()))
    }

    fn close(&self) {}
}

/// An object loader that leaves the object untouched (it already carries
/// whatever attributes the test set up).
pub struct NullObjectLoader;

impl ObjectLoader for NullObjectLoader {
    fn load(&self, _obj: &mut Object) -> Result<()> {
        Ok(())
    }
}

/// An object loader that always fails, for exercising `objs_unloadable`.
pub struct FailingObjectLoader;

impl ObjectLoader for FailingObjectLoader {
    fn load(&self, _obj: &mut Object) -> Result<()> {
        Err(EngineError::Load("simulated load failure".to_string()))
    }
}

/// A session context with no provisionable resources.
pub struct NullSessionContext;

impl SessionContext for NullSessionContext {
    fn ensure_resource(&self, rtype: &str, _args: &[Vec<u8>]) -> Result<HashMap<String, String>> {
        Err(EngineError::Dependency(format!("no resource provisioner for {rtype}")))
    }
}
