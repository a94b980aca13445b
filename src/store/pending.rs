//! Durable home of the pending-action set, with change fan-out.
//!
//! The store is the single source of truth: observers that miss a transient
//! notification read current state on their next load. Persistence always
//! completes before the broadcast, so a subscriber reacting to an event can
//! immediately re-read consistent state.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use crossbeam::channel::{unbounded, Receiver, Sender};

use super::kv::KeyValueStore;
use crate::record::PendingAction;

/// Storage key for the pending-action set in the local tier.
pub const PENDING_KEY: &str = "pending_actions";

/// Broadcast to every live subscriber after a persisted mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingEvent {
    /// The set was replaced; carries the new set (possibly empty).
    Updated(Vec<PendingAction>),
    /// The stored key was removed entirely.
    Cleared,
}

/// Persists the pending-action list and notifies observers of every change.
pub struct PendingStore<S> {
    store: Arc<S>,
    subscribers: Arc<Mutex<Vec<Sender<PendingEvent>>>>,
}

impl<S> Clone for PendingStore<S> {
    fn clone(&self) -> Self {
        PendingStore {
            store: Arc::clone(&self.store),
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<S: KeyValueStore> PendingStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        PendingStore {
            store,
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Persist the full set, then broadcast it. Last write wins; there is no
    /// per-item locking.
    pub fn save(&self, actions: &[PendingAction]) -> Result<()> {
        let value = serde_json::to_value(actions).context("failed to serialize pending actions")?;
        self.store.set(PENDING_KEY, value)?;
        tracing::debug!(count = actions.len(), "pending set saved");
        self.broadcast(PendingEvent::Updated(actions.to_vec()));
        Ok(())
    }

    /// Read the stored set; absent or null storage reads as empty.
    pub fn load(&self) -> Result<Vec<PendingAction>> {
        match self.store.get(PENDING_KEY)? {
            None => Ok(Vec::new()),
            Some(serde_json::Value::Null) => Ok(Vec::new()),
            Some(value) => {
                serde_json::from_value(value).context("failed to parse stored pending actions")
            }
        }
    }

    /// Remove the stored key entirely, then broadcast the absence.
    pub fn clear(&self) -> Result<()> {
        self.store.remove(PENDING_KEY)?;
        tracing::debug!("pending set cleared");
        self.broadcast(PendingEvent::Cleared);
        Ok(())
    }

    /// Subscribe to change notifications. Disconnected subscribers are
    /// dropped on the next broadcast.
    pub fn subscribe(&self) -> Receiver<PendingEvent> {
        let (tx, rx) = unbounded();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    fn broadcast(&self, event: PendingEvent) {
        let Ok(mut subs) = self.subscribers.lock() else {
            tracing::warn!("subscriber lock poisoned, notification dropped");
            return;
        };
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
