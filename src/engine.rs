//! Reconciliation engine: computes the pending-action set from a pair of
//! snapshots and is the sole authority over mutations of that set.

use anyhow::Result;

use crate::record::{Action, DiffSummary, PendingAction, Snapshot};
use crate::store::{KeyValueStore, PendingStore};

/// Compute the ordered, deduplicated pending-action list for two snapshots.
///
/// Divergence policy: the remote is canonical. Ids present only locally get
/// a `Remove` action (resolve by uninstalling), ids present only remotely
/// get an `Add`. Ids on both sides produce nothing, whatever their other
/// fields look like; the diff is whole-item and keyed by id.
///
/// Output order is deterministic: removes in local-snapshot order, then adds
/// in remote-snapshot order. No side effects; persistence is the caller's.
pub fn diff(local: &Snapshot, remote: &Snapshot) -> Vec<PendingAction> {
    let local_ids = local.ids();
    let remote_ids = remote.ids();

    let removes = local
        .records()
        .iter()
        .filter(|r| !remote_ids.contains(r.id.as_str()))
        .map(|r| PendingAction {
            record: r.clone(),
            action: Action::Remove,
        });

    let adds = remote
        .records()
        .iter()
        .filter(|r| !local_ids.contains(r.id.as_str()))
        .map(|r| PendingAction {
            record: r.clone(),
            action: Action::Add,
        });

    removes.chain(adds).collect()
}

/// Count pending actions by kind for the "N added / M removed" badge.
pub fn summary(actions: &[PendingAction]) -> DiffSummary {
    let added = actions.iter().filter(|a| a.action == Action::Add).count();
    DiffSummary {
        added,
        removed: actions.len() - added,
    }
}

/// Owns pending-action state on top of a [`PendingStore`].
///
/// Nothing else should cache the authoritative list in memory; every query
/// re-reads the store so all contexts converge on the same truth.
pub struct Engine<S> {
    pending: PendingStore<S>,
}

impl<S> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Engine {
            pending: self.pending.clone(),
        }
    }
}

impl<S: KeyValueStore> Engine<S> {
    pub fn new(pending: PendingStore<S>) -> Self {
        Engine { pending }
    }

    pub fn pending_store(&self) -> &PendingStore<S> {
        &self.pending
    }

    /// Diff the two snapshots and replace the entire stored pending set with
    /// the result. An empty diff clears the store outright.
    pub fn reconcile(&self, local: &Snapshot, remote: &Snapshot) -> Result<Vec<PendingAction>> {
        let actions = diff(local, remote);
        if actions.is_empty() {
            self.pending.clear()?;
        } else {
            self.pending.save(&actions)?;
        }
        Ok(actions)
    }

    /// Current pending set, straight from the store.
    pub fn pending(&self) -> Result<Vec<PendingAction>> {
        self.pending.load()
    }

    /// Replace the stored set wholesale, deduplicating by id (first wins).
    pub fn set_pending(&self, actions: Vec<PendingAction>) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        let actions: Vec<PendingAction> = actions
            .into_iter()
            .filter(|a| seen.insert(a.id().to_string()))
            .collect();
        self.pending.save(&actions)
    }

    /// Drop the action for one id without touching the live system.
    ///
    /// Returns false when no action existed for the id. Emptying the set
    /// fires the whole-set-cleared event.
    pub fn revert_one(&self, id: &str) -> Result<bool> {
        let mut actions = self.pending.load()?;
        let before = actions.len();
        actions.retain(|a| a.id() != id);
        if actions.len() == before {
            return Ok(false);
        }
        if actions.is_empty() {
            self.pending.clear()?;
        } else {
            self.pending.save(&actions)?;
        }
        Ok(true)
    }

    /// Clear the entire set unconditionally.
    pub fn revert_all(&self) -> Result<()> {
        self.pending.clear()
    }
}
