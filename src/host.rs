//! Snapshot source adapter: the host platform's extension-management
//! capability behind a trait, with a profile-file production implementation
//! and an in-memory one for tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::record::{ExtensionRecord, Snapshot};

/// Fire-and-forget lifecycle notification from the host.
///
/// These are an optional accelerant for the completion watcher; absence of a
/// notification must never stall convergence, which stays polling-driven.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Installed(String),
    Uninstalled(String),
}

/// The host platform's extension-management capability.
pub trait ExtensionHost: Send + Sync {
    /// Enumerate installed items. Raw records; theme exclusion happens at
    /// snapshot construction, the single filtering boundary.
    fn list_installed(&self) -> Result<Vec<ExtensionRecord>>;

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<()>;

    fn uninstall(&self, id: &str) -> Result<()>;

    /// Lifecycle event stream, when the host provides one.
    fn subscribe(&self) -> Option<Receiver<HostEvent>> {
        None
    }

    /// Enumerate and capture as a reconciliation-ready snapshot.
    fn snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot::from_records(self.list_installed()?))
    }
}

impl<H: ExtensionHost + ?Sized> ExtensionHost for Arc<H> {
    fn list_installed(&self) -> Result<Vec<ExtensionRecord>> {
        (**self).list_installed()
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        (**self).set_enabled(id, enabled)
    }

    fn uninstall(&self, id: &str) -> Result<()> {
        (**self).uninstall(id)
    }

    fn subscribe(&self) -> Option<Receiver<HostEvent>> {
        (**self).subscribe()
    }
}

/// Production adapter backed by the host profile's inventory file: a JSON
/// array of extension records maintained by the platform.
pub struct ProfileHost {
    inventory_path: PathBuf,
}

impl ProfileHost {
    pub fn new<P: AsRef<Path>>(inventory_path: P) -> Self {
        ProfileHost {
            inventory_path: inventory_path.as_ref().to_path_buf(),
        }
    }

    fn read_inventory(&self) -> Result<Vec<ExtensionRecord>> {
        if !self.inventory_path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.inventory_path)
            .with_context(|| format!("failed to read inventory {:?}", self.inventory_path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse inventory {:?}", self.inventory_path))
    }

    fn write_inventory(&self, records: &[ExtensionRecord]) -> Result<()> {
        let parent = self.inventory_path.parent();
        if let Some(parent) = parent {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create inventory directory {parent:?}"))?;
        }
        let temp_path = self.inventory_path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(records)?;
        fs::write(&temp_path, json)
            .with_context(|| format!("failed to write {temp_path:?}"))?;
        fs::rename(&temp_path, &self.inventory_path)
            .with_context(|| format!("failed to move {temp_path:?} into place"))?;
        Ok(())
    }
}

impl ExtensionHost for ProfileHost {
    fn list_installed(&self) -> Result<Vec<ExtensionRecord>> {
        self.read_inventory()
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut records = self.read_inventory()?;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .with_context(|| format!("no installed extension with id {id}"))?;
        record.enabled = enabled;
        self.write_inventory(&records)
    }

    fn uninstall(&self, id: &str) -> Result<()> {
        let mut records = self.read_inventory()?;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            anyhow::bail!("no installed extension with id {id}");
        }
        self.write_inventory(&records)
    }
}

/// In-memory host for tests: mutate the installed set directly to simulate
/// the user acting at the browser level.
#[derive(Default)]
pub struct MemoryHost {
    inner: Mutex<Vec<ExtensionRecord>>,
    listeners: Mutex<Vec<Sender<HostEvent>>>,
}

impl MemoryHost {
    pub fn new(records: Vec<ExtensionRecord>) -> Self {
        MemoryHost {
            inner: Mutex::new(records),
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<ExtensionRecord>>> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("host lock poisoned"))
    }

    /// Simulate an install happening outside the sync tool.
    pub fn install(&self, record: ExtensionRecord) -> Result<()> {
        let id = record.id.clone();
        let mut records = self.lock()?;
        records.retain(|r| r.id != id);
        records.push(record);
        drop(records);
        self.emit(HostEvent::Installed(id));
        Ok(())
    }

    /// Simulate a direct browser-level uninstall.
    pub fn remove(&self, id: &str) -> Result<()> {
        self.lock()?.retain(|r| r.id != id);
        self.emit(HostEvent::Uninstalled(id.to_string()));
        Ok(())
    }

    fn emit(&self, event: HostEvent) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

impl ExtensionHost for MemoryHost {
    fn list_installed(&self) -> Result<Vec<ExtensionRecord>> {
        Ok(self.lock()?.clone())
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut records = self.lock()?;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .with_context(|| format!("no installed extension with id {id}"))?;
        record.enabled = enabled;
        Ok(())
    }

    fn uninstall(&self, id: &str) -> Result<()> {
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            anyhow::bail!("no installed extension with id {id}");
        }
        drop(records);
        self.emit(HostEvent::Uninstalled(id.to_string()));
        Ok(())
    }

    fn subscribe(&self) -> Option<Receiver<HostEvent>> {
        let (tx, rx) = unbounded();
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(tx);
        }
        Some(rx)
    }
}
