//! The background service: owns the engine, the remote store, and the
//! watcher, and exposes every operation through one tagged command surface
//! with exhaustive matching.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::config::Settings;
use crate::engine::{self, Engine};
use crate::error::SyncError;
use crate::host::ExtensionHost;
use crate::record::{PendingAction, SyncDocument};
use crate::remote::{FetchOutcome, RemoteStore, Transport};
use crate::store::{KeyValueStore, PendingStore};
use crate::watcher::{Cadence, CompletionWatcher};

/// Everything a view context can ask the background service to do.
#[derive(Debug)]
pub enum Command {
    /// Reconcile the live inventory against a supplied remote document
    /// (the restore/import path).
    Reconcile { document: SyncDocument },
    Pull,
    Push { message: Option<String> },
    TestConnection,
    ListBranches,
    /// Export the current local snapshot as a sync document.
    Export,
    GetPending,
    SetPending { actions: Vec<PendingAction> },
    ClearPending,
    RevertOne { id: String },
    RevertAll,
    Uninstall { id: String },
    SetEnabled { id: String, enabled: bool },
}

/// Terminal status for a command: exactly one per user-initiated action.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum Outcome {
    Success {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        todo_count: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    Error { message: String },
}

impl Outcome {
    fn success(message: impl Into<String>) -> Self {
        Outcome::Success {
            message: message.into(),
            todo_count: None,
            data: None,
        }
    }

    fn with_todo_count(message: impl Into<String>, count: usize) -> Self {
        Outcome::Success {
            message: message.into(),
            todo_count: Some(count),
            data: None,
        }
    }

    fn with_data(message: impl Into<String>, data: Value) -> Self {
        Outcome::Success {
            message: message.into(),
            todo_count: None,
            data: Some(data),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Outcome::Success { message, .. } | Outcome::Error { message } => message,
        }
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            Outcome::Success { data, .. } => data.as_ref(),
            Outcome::Error { .. } => None,
        }
    }

    pub fn todo_count(&self) -> Option<usize> {
        match self {
            Outcome::Success { todo_count, .. } => *todo_count,
            Outcome::Error { .. } => None,
        }
    }
}

impl From<SyncError> for Outcome {
    fn from(err: SyncError) -> Self {
        Outcome::Error {
            message: err.to_string(),
        }
    }
}

/// Owned once per process lifetime; the authoritative pending list lives in
/// the store, never in service fields.
pub struct SyncService<H, T, S> {
    host: Arc<H>,
    engine: Engine<S>,
    remote: RemoteStore<T, S>,
    settings: Settings,
    watcher: Option<CompletionWatcher>,
}

impl<H, T, S> SyncService<H, T, S>
where
    H: ExtensionHost + 'static,
    T: Transport,
    S: KeyValueStore + 'static,
{
    pub fn new(host: Arc<H>, transport: T, store: Arc<S>, settings: Settings) -> Self {
        let pending = PendingStore::new(Arc::clone(&store));
        let engine = Engine::new(pending.clone());
        let remote = RemoteStore::new(transport, store, pending);
        SyncService {
            host,
            engine,
            remote,
            settings,
            watcher: None,
        }
    }

    pub fn engine(&self) -> &Engine<S> {
        &self.engine
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn remote(&self) -> &RemoteStore<T, S> {
        &self.remote
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Start the completion watcher for this process. Idempotent.
    pub fn start_watcher(&mut self) {
        if self.watcher.is_none() {
            let cadence = Cadence {
                active: self.settings.poll_interval(),
            };
            self.watcher = Some(CompletionWatcher::spawn(
                self.engine.clone(),
                Arc::clone(&self.host),
                cadence,
            ));
        }
    }

    /// Handle one command to its single terminal status. Errors never
    /// escape as panics or hang in a perpetually-pending state.
    pub fn handle(&self, command: Command) -> Outcome {
        let result = match command {
            Command::Reconcile { document } => self.reconcile(document),
            Command::Pull => self.pull(),
            Command::Push { message } => self.push(message),
            Command::TestConnection => Ok(self.test_connection()),
            Command::ListBranches => self.list_branches(),
            Command::Export => self.export(),
            Command::GetPending => self.get_pending(),
            Command::SetPending { actions } => self.set_pending(actions),
            Command::ClearPending => self.clear_pending(),
            Command::RevertOne { id } => self.revert_one(&id),
            Command::RevertAll => self.revert_all(),
            Command::Uninstall { id } => self.uninstall(&id),
            Command::SetEnabled { id, enabled } => self.set_enabled(&id, enabled),
        };
        result.unwrap_or_else(Outcome::from)
    }

    fn reconcile(&self, document: SyncDocument) -> Result<Outcome, SyncError> {
        let local = self.host.snapshot().map_err(host_err)?;
        let actions = self
            .engine
            .reconcile(&local, &document.to_snapshot())
            .map_err(SyncError::Other)?;
        if actions.is_empty() {
            Ok(Outcome::with_todo_count("Processed with no conflicts", 0))
        } else {
            Ok(Outcome::with_todo_count(
                "Todo list generated",
                actions.len(),
            ))
        }
    }

    fn pull(&self) -> Result<Outcome, SyncError> {
        match self.remote.fetch_head(&self.settings)? {
            FetchOutcome::NotConfigured => Err(SyncError::NotConfigured),
            FetchOutcome::NoNewRevision => Ok(Outcome::with_todo_count("Already up to date", 0)),
            FetchOutcome::New { revision, snapshot } => {
                let local = self.host.snapshot().map_err(host_err)?;
                let actions = self
                    .engine
                    .reconcile(&local, &snapshot)
                    .map_err(SyncError::Other)?;
                self.remote.record_synced(&revision)?;
                tracing::info!(%revision, todo = actions.len(), "pull reconciled");
                Ok(Outcome::with_todo_count(
                    "Pull completed successfully",
                    actions.len(),
                ))
            }
        }
    }

    fn push(&self, message: Option<String>) -> Result<Outcome, SyncError> {
        // Verified here and re-validated inside the remote store.
        let pending = self.engine.pending().map_err(SyncError::Other)?;
        if !pending.is_empty() {
            return Err(SyncError::PendingWork(pending.len()));
        }

        let now = Utc::now();
        let local = self.host.snapshot().map_err(host_err)?;
        let document = SyncDocument::capture(&local, now);
        let message =
            message.unwrap_or_else(|| format!("Update extensions data {}", now.to_rfc3339()));

        let revision = self.remote.publish(&self.settings, &document, &message)?;
        self.remote.record_synced(&revision)?;
        Ok(Outcome::success("Push completed successfully"))
    }

    fn test_connection(&self) -> Outcome {
        let outcome = self.remote.test_connection(&self.settings);
        if outcome.is_success() {
            Outcome::success(outcome.message())
        } else {
            Outcome::Error {
                message: outcome.message().to_string(),
            }
        }
    }

    fn list_branches(&self) -> Result<Outcome, SyncError> {
        let branches = self.remote.list_branches(&self.settings)?;
        let data = serde_json::to_value(&branches).map_err(json_err)?;
        Ok(Outcome::with_data("Branches listed", data))
    }

    fn export(&self) -> Result<Outcome, SyncError> {
        let local = self.host.snapshot().map_err(host_err)?;
        let document = SyncDocument::capture(&local, Utc::now());
        let data = serde_json::to_value(&document).map_err(json_err)?;
        Ok(Outcome::with_data("Extensions exported", data))
    }

    fn get_pending(&self) -> Result<Outcome, SyncError> {
        let pending = self.engine.pending().map_err(SyncError::Other)?;
        let summary = engine::summary(&pending);
        let data = serde_json::json!({
            "todoExtensions": pending,
            "summary": summary,
        });
        Ok(Outcome::with_data("Pending actions", data))
    }

    fn set_pending(&self, actions: Vec<PendingAction>) -> Result<Outcome, SyncError> {
        let count = actions.len();
        self.engine.set_pending(actions).map_err(SyncError::Other)?;
        Ok(Outcome::with_todo_count("Pending actions saved", count))
    }

    fn clear_pending(&self) -> Result<Outcome, SyncError> {
        self.engine.revert_all().map_err(SyncError::Other)?;
        Ok(Outcome::success("Pending actions cleared"))
    }

    fn revert_one(&self, id: &str) -> Result<Outcome, SyncError> {
        if self.engine.revert_one(id).map_err(SyncError::Other)? {
            Ok(Outcome::success(format!("Reverted pending action for {id}")))
        } else {
            Ok(Outcome::Error {
                message: format!("No pending action for {id}"),
            })
        }
    }

    fn revert_all(&self) -> Result<Outcome, SyncError> {
        self.engine.revert_all().map_err(SyncError::Other)?;
        Ok(Outcome::success("All pending actions reverted"))
    }

    fn uninstall(&self, id: &str) -> Result<Outcome, SyncError> {
        self.host.uninstall(id).map_err(host_err)?;
        // Let the watcher observe the effect out of cadence.
        if let Some(ref watcher) = self.watcher {
            watcher.poke();
        }
        Ok(Outcome::success(format!("Uninstalled {id}")))
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<Outcome, SyncError> {
        self.host.set_enabled(id, enabled).map_err(host_err)?;
        let state = if enabled { "enabled" } else { "disabled" };
        Ok(Outcome::success(format!("{id} {state}")))
    }
}

fn host_err(err: anyhow::Error) -> SyncError {
    SyncError::Host(err.to_string())
}

fn json_err(err: serde_json::Error) -> SyncError {
    SyncError::Other(anyhow::Error::from(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;
    use crate::record::{Action, ExtensionRecord, DOCUMENT_VERSION};
    use crate::remote::MemoryTransport;
    use crate::store::MemoryStore;

    type TestService = SyncService<MemoryHost, MemoryTransport, MemoryStore>;

    fn rec(id: &str) -> ExtensionRecord {
        ExtensionRecord::new(id, id.to_uppercase())
    }

    fn service(installed: Vec<ExtensionRecord>) -> TestService {
        let settings = Settings {
            repo_url: "https://example.com/repo.git".to_string(),
            ..Settings::default()
        };
        SyncService::new(
            Arc::new(MemoryHost::new(installed)),
            MemoryTransport::new(),
            Arc::new(MemoryStore::new()),
            settings,
        )
    }

    fn document(ids: &[&str]) -> SyncDocument {
        SyncDocument {
            version: DOCUMENT_VERSION.to_string(),
            extensions: ids.iter().map(|id| rec(id)).collect(),
            export_time: None,
        }
    }

    #[test]
    fn reconcile_reports_todo_count() {
        let service = service(vec![rec("a")]);
        let outcome = service.handle(Command::Reconcile {
            document: document(&["b"]),
        });
        assert!(outcome.is_success());
        assert_eq!(outcome.todo_count(), Some(2));
    }

    #[test]
    fn reconcile_without_divergence_reports_no_conflicts() {
        let service = service(vec![rec("a")]);
        let outcome = service.handle(Command::Reconcile {
            document: document(&["a"]),
        });
        assert!(outcome.is_success());
        assert_eq!(outcome.todo_count(), Some(0));
    }

    #[test]
    fn pull_against_unconfigured_remote_errors() {
        let mut service = service(vec![]);
        service.settings.repo_url.clear();
        let outcome = service.handle(Command::Pull);
        assert!(!outcome.is_success());
        assert!(outcome.message().contains("not configured"));
    }

    #[test]
    fn pull_reconciles_and_records_revision() {
        let service = service(vec![rec("a")]);
        let bytes = document(&["b"]).to_json_pretty().unwrap();
        service
            .remote_transport()
            .seed(&service.settings.branch, &service.settings.file_path, &bytes);

        let outcome = service.handle(Command::Pull);
        assert!(outcome.is_success());
        assert_eq!(outcome.todo_count(), Some(2));

        // Second pull short-circuits on the recorded revision.
        let outcome = service.handle(Command::Pull);
        assert_eq!(outcome.message(), "Already up to date");
    }

    #[test]
    fn push_blocked_by_pending_work() {
        let service = service(vec![rec("a")]);
        service
            .engine()
            .set_pending(vec![PendingAction {
                record: rec("a"),
                action: Action::Remove,
            }])
            .unwrap();

        let outcome = service.handle(Command::Push { message: None });
        assert!(!outcome.is_success());
        assert!(outcome.message().contains("pending"));
    }

    #[test]
    fn push_publishes_local_snapshot() {
        let service = service(vec![rec("a"), rec("b")]);
        let outcome = service.handle(Command::Push {
            message: Some("sync".into()),
        });
        assert!(outcome.is_success(), "{}", outcome.message());

        let head = service
            .remote_transport()
            .fetch(&service.settings)
            .unwrap()
            .unwrap();
        let doc = SyncDocument::parse(&head.file.unwrap()).unwrap();
        assert_eq!(doc.extensions.len(), 2);
    }

    #[test]
    fn export_returns_document_payload() {
        let service = service(vec![rec("a")]);
        let outcome = service.handle(Command::Export);
        let data = outcome.data().unwrap();
        assert_eq!(data.get("version").unwrap(), DOCUMENT_VERSION);
        assert_eq!(data.get("extensions").unwrap().as_array().unwrap().len(), 1);
        assert!(data.get("exportTime").is_some());
    }

    #[test]
    fn revert_one_unknown_id_is_an_error_status() {
        let service = service(vec![]);
        let outcome = service.handle(Command::RevertOne { id: "nope".into() });
        assert!(!outcome.is_success());
    }

    #[test]
    fn uninstall_flows_through_host() {
        let service = service(vec![rec("a")]);
        let outcome = service.handle(Command::Uninstall { id: "a".into() });
        assert!(outcome.is_success());
        assert!(service.host.list_installed().unwrap().is_empty());
    }

    #[test]
    fn every_command_yields_exactly_one_terminal_status() {
        let service = service(vec![rec("a")]);
        let commands = vec![
            Command::TestConnection,
            Command::Export,
            Command::GetPending,
            Command::ClearPending,
            Command::RevertAll,
            Command::SetEnabled {
                id: "a".into(),
                enabled: true,
            },
        ];
        for command in commands {
            let outcome = service.handle(command);
            assert!(!outcome.message().is_empty());
        }
    }

    impl TestService {
        fn remote_transport(&self) -> &MemoryTransport {
            self.remote.transport()
        }
    }
}
