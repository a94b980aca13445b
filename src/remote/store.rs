//! Remote snapshot store: the last-fetched remote state, the revision
//! pointer that short-circuits redundant pulls, and the publish guard.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;

use super::transport::{RemoteHead, Transport};
use crate::config::Settings;
use crate::error::{SyncError, TransportError};
use crate::record::{RevisionPointer, Snapshot, SyncDocument};
use crate::store::{KeyValueStore, PendingStore};

/// Storage key for the revision pointer in the local tier.
pub const REVISION_POINTER_KEY: &str = "revision_pointer";

/// Result of a head fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// No remote URL configured; surfaced to the user, never retried.
    NotConfigured,
    /// The remote has not advanced past the stored revision pointer (or has
    /// no sync branch yet); nothing to reconcile.
    NoNewRevision,
    /// The remote advanced; carries the new revision and its snapshot.
    New {
        revision: String,
        snapshot: Snapshot,
    },
}

/// Connection-test verdict, used purely for user feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    Reachable,
    AuthFailed,
    NotFound,
    Forbidden,
    MalformedUrl,
    NetworkError,
}

impl ConnectionOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, ConnectionOutcome::Reachable)
    }

    pub fn message(self) -> &'static str {
        match self {
            ConnectionOutcome::Reachable => {
                "Connection successful! You have access to the repository."
            }
            ConnectionOutcome::AuthFailed => {
                "Authentication failed. Please check your username and password or token."
            }
            ConnectionOutcome::NotFound => "Repository not found. Please check the repository URL.",
            ConnectionOutcome::Forbidden => {
                "Access denied. You may not have the required permissions."
            }
            ConnectionOutcome::MalformedUrl => {
                "Invalid repository URL. Please check the URL format."
            }
            ConnectionOutcome::NetworkError => "Connection test failed: network error.",
        }
    }
}

impl From<&TransportError> for ConnectionOutcome {
    fn from(err: &TransportError) -> Self {
        match err {
            TransportError::AuthFailed => ConnectionOutcome::AuthFailed,
            TransportError::Forbidden => ConnectionOutcome::Forbidden,
            TransportError::NotFound => ConnectionOutcome::NotFound,
            TransportError::MalformedUrl => ConnectionOutcome::MalformedUrl,
            TransportError::Network(_) | TransportError::Git(_) => ConnectionOutcome::NetworkError,
        }
    }
}

/// Wraps the transport with revision tracking and the pending-work guard.
pub struct RemoteStore<T, S> {
    transport: T,
    state: Arc<S>,
    pending: PendingStore<S>,
}

impl<T: Transport, S: KeyValueStore> RemoteStore<T, S> {
    pub fn new(transport: T, state: Arc<S>, pending: PendingStore<S>) -> Self {
        RemoteStore {
            transport,
            state,
            pending,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The last revision this side synchronized against, if any.
    pub fn last_synced(&self) -> Result<Option<RevisionPointer>, SyncError> {
        match self.state.get(REVISION_POINTER_KEY).map_err(SyncError::Other)? {
            None => Ok(None),
            Some(value) => Ok(Some(
                serde_json::from_value(value)
                    .context("failed to parse stored revision pointer")
                    .map_err(SyncError::Other)?,
            )),
        }
    }

    /// Record a successful sync against `revision`. Callers invoke this only
    /// after a successful publish or a pull that actually advanced state.
    pub fn record_synced(&self, revision: &str) -> Result<(), SyncError> {
        let pointer = RevisionPointer {
            revision: revision.to_string(),
            last_sync: Utc::now(),
        };
        let value = serde_json::to_value(&pointer)
            .context("failed to serialize revision pointer")
            .map_err(SyncError::Other)?;
        self.state
            .set(REVISION_POINTER_KEY, value)
            .map_err(SyncError::Other)?;
        Ok(())
    }

    /// Fetch the remote head and decide whether reconciliation is needed.
    ///
    /// A revision equal to the stored pointer short-circuits before any
    /// deserialization. A present branch whose data file is missing or
    /// unreadable yields an empty snapshot rather than a failure. Transport
    /// failures leave the pointer and pending set untouched.
    pub fn fetch_head(&self, settings: &Settings) -> Result<FetchOutcome, SyncError> {
        if !settings.is_configured() {
            return Ok(FetchOutcome::NotConfigured);
        }

        let Some(RemoteHead { revision, file }) = self.transport.fetch(settings)? else {
            return Ok(FetchOutcome::NoNewRevision);
        };

        if let Some(pointer) = self.last_synced()? {
            if pointer.revision == revision {
                tracing::debug!(%revision, "remote unchanged since last sync");
                return Ok(FetchOutcome::NoNewRevision);
            }
        }

        let document = match file {
            Some(bytes) => SyncDocument::parse_or_empty(&bytes),
            None => {
                tracing::debug!("data file absent in remote tree, treating as empty snapshot");
                SyncDocument::empty()
            }
        };

        Ok(FetchOutcome::New {
            revision,
            snapshot: document.to_snapshot(),
        })
    }

    /// Commit and push a snapshot document.
    ///
    /// Re-validates the pending-work guard even though callers check it too:
    /// the remote must not be overwritten while local/remote divergence is
    /// unresolved.
    pub fn publish(
        &self,
        settings: &Settings,
        document: &SyncDocument,
        message: &str,
    ) -> Result<String, SyncError> {
        if !settings.is_configured() {
            return Err(SyncError::NotConfigured);
        }
        let pending = self.pending.load().map_err(SyncError::Other)?;
        if !pending.is_empty() {
            return Err(SyncError::PendingWork(pending.len()));
        }

        let content = document.to_json_pretty()?;
        let revision = self.transport.publish(settings, &content, message)?;
        Ok(revision)
    }

    /// Probe the remote and classify the result for user feedback. Never
    /// touches reconciliation state.
    pub fn test_connection(&self, settings: &Settings) -> ConnectionOutcome {
        if !settings.is_configured() {
            return ConnectionOutcome::MalformedUrl;
        }
        match self.transport.probe(settings) {
            Ok(()) => ConnectionOutcome::Reachable,
            Err(err) => {
                tracing::debug!(%err, "connection test failed");
                ConnectionOutcome::from(&err)
            }
        }
    }

    pub fn list_branches(&self, settings: &Settings) -> Result<Vec<String>, SyncError> {
        if !settings.is_configured() {
            return Err(SyncError::NotConfigured);
        }
        Ok(self.transport.list_branches(settings)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Action, ExtensionRecord, PendingAction};
    use crate::remote::MemoryTransport;
    use crate::store::MemoryStore;

    fn fixture() -> (RemoteStore<MemoryTransport, MemoryStore>, Settings) {
        let state = Arc::new(MemoryStore::new());
        let pending = PendingStore::new(Arc::clone(&state));
        let store = RemoteStore::new(MemoryTransport::new(), state, pending);
        let settings = Settings {
            repo_url: "https://example.com/repo.git".to_string(),
            ..Settings::default()
        };
        (store, settings)
    }

    fn document(ids: &[&str]) -> SyncDocument {
        let records = ids
            .iter()
            .map(|id| ExtensionRecord::new(*id, id.to_uppercase()))
            .collect();
        SyncDocument {
            version: crate::record::DOCUMENT_VERSION.to_string(),
            extensions: records,
            export_time: None,
        }
    }

    #[test]
    fn unconfigured_remote_reports_not_configured() {
        let (store, _) = fixture();
        let outcome = store.fetch_head(&Settings::default()).unwrap();
        assert_eq!(outcome, FetchOutcome::NotConfigured);
    }

    #[test]
    fn missing_branch_is_no_new_revision() {
        let (store, settings) = fixture();
        assert_eq!(
            store.fetch_head(&settings).unwrap(),
            FetchOutcome::NoNewRevision
        );
    }

    #[test]
    fn unchanged_revision_short_circuits() {
        let (store, settings) = fixture();
        let bytes = document(&["a"]).to_json_pretty().unwrap();
        let revision = store
            .transport
            .seed(&settings.branch, &settings.file_path, &bytes);
        store.record_synced(&revision).unwrap();

        assert_eq!(
            store.fetch_head(&settings).unwrap(),
            FetchOutcome::NoNewRevision
        );
    }

    #[test]
    fn advanced_revision_yields_snapshot() {
        let (store, settings) = fixture();
        let bytes = document(&["a", "b"]).to_json_pretty().unwrap();
        let revision = store
            .transport
            .seed(&settings.branch, &settings.file_path, &bytes);

        match store.fetch_head(&settings).unwrap() {
            FetchOutcome::New {
                revision: got,
                snapshot,
            } => {
                assert_eq!(got, revision);
                assert_eq!(snapshot.len(), 2);
            }
            other => panic!("expected New, got {other:?}"),
        }
    }

    #[test]
    fn branch_without_data_file_is_empty_snapshot() {
        let (store, settings) = fixture();
        store.transport.seed_empty_branch(&settings.branch);

        match store.fetch_head(&settings).unwrap() {
            FetchOutcome::New { snapshot, .. } => assert!(snapshot.is_empty()),
            other => panic!("expected New, got {other:?}"),
        }
    }

    #[test]
    fn malformed_remote_file_degrades_to_empty_snapshot() {
        let (store, settings) = fixture();
        store
            .transport
            .seed(&settings.branch, &settings.file_path, b"{not json");

        match store.fetch_head(&settings).unwrap() {
            FetchOutcome::New { snapshot, .. } => assert!(snapshot.is_empty()),
            other => panic!("expected New, got {other:?}"),
        }
    }

    #[test]
    fn failed_fetch_leaves_pointer_untouched() {
        let (store, settings) = fixture();
        store.record_synced("rev-1").unwrap();
        store.transport.fail_next(TransportError::Network("down".into()));

        assert!(store.fetch_head(&settings).is_err());
        assert_eq!(store.last_synced().unwrap().unwrap().revision, "rev-1");
    }

    #[test]
    fn publish_rejects_while_pending_work_exists() {
        let (store, settings) = fixture();
        store
            .pending
            .save(&[PendingAction {
                record: ExtensionRecord::new("x", "X"),
                action: Action::Remove,
            }])
            .unwrap();

        let err = store
            .publish(&settings, &document(&["x"]), "msg")
            .unwrap_err();
        assert!(matches!(err, SyncError::PendingWork(1)));
        // Guard fires before any network write.
        assert_eq!(store.transport.publish_count(), 0);
    }

    #[test]
    fn publish_returns_new_revision() {
        let (store, settings) = fixture();
        let revision = store
            .publish(&settings, &document(&["a"]), "update")
            .unwrap();
        assert_eq!(store.transport.head_revision(&settings.branch), Some(revision));
    }

    #[test]
    fn connection_outcomes_map_transport_errors() {
        let (store, settings) = fixture();
        assert_eq!(store.test_connection(&settings), ConnectionOutcome::Reachable);

        for (err, expected) in [
            (TransportError::AuthFailed, ConnectionOutcome::AuthFailed),
            (TransportError::Forbidden, ConnectionOutcome::Forbidden),
            (TransportError::NotFound, ConnectionOutcome::NotFound),
            (TransportError::MalformedUrl, ConnectionOutcome::MalformedUrl),
            (
                TransportError::Network("x".into()),
                ConnectionOutcome::NetworkError,
            ),
        ] {
            store.transport.fail_next(err);
            assert_eq!(store.test_connection(&settings), expected);
        }

        assert_eq!(
            store.test_connection(&Settings::default()),
            ConnectionOutcome::MalformedUrl
        );
    }
}
