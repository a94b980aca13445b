//! In-memory transport with content-addressed revisions, for tests and
//! offline experiments. Revisions chain like commits: each publish hashes
//! the previous revision together with the new content.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use sha2::{Digest, Sha256};

use super::transport::{RemoteHead, Transport};
use crate::config::Settings;
use crate::error::TransportError;

#[derive(Default)]
struct Inner {
    /// branch -> (revision, files at that revision)
    branches: HashMap<String, (String, HashMap<String, Vec<u8>>)>,
    publish_count: u64,
    fail_next: Option<TransportError>,
}

#[derive(Default)]
pub struct MemoryTransport {
    inner: Mutex<Inner>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        MemoryTransport::default()
    }

    /// Make the next transport call fail with the given error.
    pub fn fail_next(&self, err: TransportError) {
        self.lock().fail_next = Some(err);
    }

    /// Seed a branch with a data file, as if some other replica pushed.
    pub fn seed(&self, branch: &str, path: &str, content: &[u8]) -> String {
        let mut inner = self.lock();
        let entry = inner.branches.entry(branch.to_string()).or_default();
        entry.1.insert(path.to_string(), content.to_vec());
        entry.0 = revision_for(&entry.0, content);
        entry.0.clone()
    }

    /// Create a branch with no data file at all.
    pub fn seed_empty_branch(&self, branch: &str) -> String {
        let mut inner = self.lock();
        let entry = inner.branches.entry(branch.to_string()).or_default();
        entry.0 = revision_for(&entry.0, b"");
        entry.0.clone()
    }

    pub fn publish_count(&self) -> u64 {
        self.lock().publish_count
    }

    pub fn head_revision(&self, branch: &str) -> Option<String> {
        self.lock().branches.get(branch).map(|(rev, _)| rev.clone())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_failure(&self) -> Result<(), TransportError> {
        match self.lock().fail_next.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn revision_for(prev: &str, content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev.as_bytes());
    hasher.update(content);
    hex::encode(hasher.finalize())
}

impl Transport for MemoryTransport {
    fn probe(&self, _settings: &Settings) -> Result<(), TransportError> {
        self.take_failure()
    }

    fn fetch(&self, settings: &Settings) -> Result<Option<RemoteHead>, TransportError> {
        self.take_failure()?;
        let inner = self.lock();
        Ok(inner.branches.get(&settings.branch).map(|(rev, files)| {
            RemoteHead {
                revision: rev.clone(),
                file: files.get(&settings.file_path).cloned(),
            }
        }))
    }

    fn publish(
        &self,
        settings: &Settings,
        content: &[u8],
        _message: &str,
    ) -> Result<String, TransportError> {
        self.take_failure()?;
        let mut inner = self.lock();
        inner.publish_count += 1;
        let entry = inner.branches.entry(settings.branch.clone()).or_default();
        entry.1.insert(settings.file_path.clone(), content.to_vec());
        entry.0 = revision_for(&entry.0, content);
        Ok(entry.0.clone())
    }

    fn list_branches(&self, _settings: &Settings) -> Result<Vec<String>, TransportError> {
        self.take_failure()?;
        let mut names: Vec<String> = self.lock().branches.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
