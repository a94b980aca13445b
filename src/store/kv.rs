use anyhow::Result;
use serde_json::Value;

/// Which durable tier a store instance is bound to.
///
/// The local tier is device-scoped with room for the pending set and cached
/// snapshots; the roaming tier is account-scoped and small, used only for
/// settings synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreTier {
    Local,
    Roaming,
}

impl StoreTier {
    pub fn dir_name(self) -> &'static str {
        match self {
            StoreTier::Local => "local",
            StoreTier::Roaming => "roaming",
        }
    }
}

/// Keyed durable storage capability.
///
/// A single `set` is atomic per key, but there is no cross-call
/// compare-and-swap: concurrent read-modify-write sequences are last-write-
/// wins on the whole value.
pub trait KeyValueStore: Send + Sync {
    /// Read a value. `None` when the key was never set or was removed.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Atomically write a value for a key.
    fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Remove a key entirely. Ok even if the key was absent.
    fn remove(&self, key: &str) -> Result<()>;
}
