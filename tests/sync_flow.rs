//! End-to-end reconciliation flows over the in-memory host, transport, and
//! store implementations.

use std::sync::Arc;
use std::time::Duration;

use git_exten_sync::config::Settings;
use git_exten_sync::host::{ExtensionHost, MemoryHost};
use git_exten_sync::record::{
    Action, ExtensionKind, ExtensionRecord, SyncDocument, DOCUMENT_VERSION,
};
use git_exten_sync::remote::MemoryTransport;
use git_exten_sync::service::{Command, SyncService};
use git_exten_sync::store::{MemoryStore, PendingEvent};
use git_exten_sync::TransportError;

type TestService = SyncService<MemoryHost, MemoryTransport, MemoryStore>;

fn rec(id: &str) -> ExtensionRecord {
    ExtensionRecord::new(id, id.to_uppercase())
}

fn settings() -> Settings {
    Settings {
        repo_url: "https://example.com/me/extensions.git".to_string(),
        poll_interval_ms: 10,
        ..Settings::default()
    }
}

fn service(installed: Vec<ExtensionRecord>) -> (TestService, Arc<MemoryHost>) {
    let host = Arc::new(MemoryHost::new(installed));
    let service = SyncService::new(
        Arc::clone(&host),
        MemoryTransport::new(),
        Arc::new(MemoryStore::new()),
        settings(),
    );
    (service, host)
}

fn document(ids: &[&str]) -> SyncDocument {
    SyncDocument {
        version: DOCUMENT_VERSION.to_string(),
        extensions: ids.iter().map(|id| rec(id)).collect(),
        export_time: None,
    }
}

fn seed_remote(service: &TestService, ids: &[&str]) {
    let bytes = document(ids).to_json_pretty().unwrap();
    let settings = service.settings();
    service
        .remote()
        .transport()
        .seed(&settings.branch, &settings.file_path, &bytes);
}

#[test]
fn local_extra_pends_a_remove() {
    // local = [x enabled], remote = []
    let mut enabled_x = rec("x");
    enabled_x.enabled = true;
    let (service, _) = service(vec![enabled_x]);
    seed_remote(&service, &[]);

    let outcome = service.handle(Command::Pull);
    assert!(outcome.is_success(), "{}", outcome.message());

    let pending = service.engine().pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id(), "x");
    assert_eq!(pending[0].action, Action::Remove);
}

#[test]
fn remote_extra_pends_an_add() {
    // local = [], remote = [y]
    let (service, _) = service(vec![]);
    seed_remote(&service, &["y"]);

    service.handle(Command::Pull);

    let pending = service.engine().pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id(), "y");
    assert_eq!(pending[0].action, Action::Add);
}

#[test]
fn matched_inventories_pend_nothing() {
    // local = [x], remote = [x]
    let (service, _) = service(vec![rec("x")]);
    seed_remote(&service, &["x"]);

    let outcome = service.handle(Command::Pull);
    assert_eq!(outcome.todo_count(), Some(0));
    assert!(service.engine().pending().unwrap().is_empty());
}

#[test]
fn watcher_clears_remove_once_reality_catches_up() {
    // pending = [x remove]; the user uninstalls at the browser level; the
    // watcher notices and fires a clear notification.
    let (mut service, host) = service(vec![rec("x")]);
    seed_remote(&service, &[]);
    service.start_watcher();

    let rx = service.engine().pending_store().subscribe();
    service.handle(Command::Pull);
    host.remove("x").unwrap();

    let deadline = Duration::from_secs(5);
    loop {
        match rx.recv_timeout(deadline).expect("watcher should clear") {
            PendingEvent::Cleared => break,
            PendingEvent::Updated(_) => continue,
        }
    }
    assert!(service.engine().pending().unwrap().is_empty());
}

#[test]
fn second_pull_short_circuits_on_revision_pointer() {
    let (service, _) = service(vec![rec("a")]);
    seed_remote(&service, &["a", "b"]);

    let first = service.handle(Command::Pull);
    assert_eq!(first.message(), "Pull completed successfully");

    // Same remote revision: no diff, no notification.
    let rx = service.engine().pending_store().subscribe();
    let second = service.handle(Command::Pull);
    assert_eq!(second.message(), "Already up to date");
    assert!(rx.try_recv().is_err());
}

#[test]
fn push_then_pull_converges() {
    let (service, _) = service(vec![rec("a"), rec("b")]);

    let push = service.handle(Command::Push { message: None });
    assert!(push.is_success(), "{}", push.message());

    // Our own push advanced the pointer, so the next pull is a no-op.
    let pull = service.handle(Command::Pull);
    assert_eq!(pull.message(), "Already up to date");
    assert!(service.engine().pending().unwrap().is_empty());
}

#[test]
fn push_is_blocked_until_pending_work_resolves() {
    let (mut service, host) = service(vec![rec("a"), rec("extra")]);
    seed_remote(&service, &["a"]);
    service.handle(Command::Pull);

    let blocked = service.handle(Command::Push { message: None });
    assert!(!blocked.is_success());
    assert!(blocked.message().contains("pending"));
    assert_eq!(service.remote().transport().publish_count(), 0);

    // Resolve by uninstalling the extra, then push goes through.
    service.start_watcher();
    let rx = service.engine().pending_store().subscribe();
    host.remove("extra").unwrap();
    let deadline = Duration::from_secs(5);
    loop {
        match rx.recv_timeout(deadline).expect("watcher should clear") {
            PendingEvent::Cleared => break,
            PendingEvent::Updated(_) => continue,
        }
    }

    let push = service.handle(Command::Push { message: None });
    assert!(push.is_success(), "{}", push.message());
}

#[test]
fn revert_leaves_live_system_untouched() {
    let (service, host) = service(vec![rec("a"), rec("extra")]);
    seed_remote(&service, &["a"]);
    service.handle(Command::Pull);

    let outcome = service.handle(Command::RevertOne { id: "extra".into() });
    assert!(outcome.is_success());
    assert!(service.engine().pending().unwrap().is_empty());
    // Reverting never uninstalls anything.
    assert_eq!(host.list_installed().unwrap().len(), 2);
}

#[test]
fn failed_pull_leaves_state_untouched() {
    let (service, _) = service(vec![rec("a")]);
    seed_remote(&service, &["a", "b"]);
    service.handle(Command::Pull);
    let pending_before = service.engine().pending().unwrap();

    service
        .remote()
        .transport()
        .fail_next(TransportError::Network("offline".into()));
    let outcome = service.handle(Command::Pull);
    assert!(!outcome.is_success());

    assert_eq!(service.engine().pending().unwrap(), pending_before);
    let pointer = service.remote().last_synced().unwrap();
    assert!(pointer.is_some());
}

#[test]
fn themes_are_invisible_end_to_end() {
    let mut local_theme = rec("local-theme");
    local_theme.kind = ExtensionKind::Theme;
    let (service, _) = service(vec![rec("a"), local_theme]);

    // Remote document contains a theme too; neither side's theme may
    // surface in pending actions or the exported document.
    let mut remote_records = vec![rec("a"), rec("new")];
    let mut remote_theme = rec("remote-theme");
    remote_theme.kind = ExtensionKind::Theme;
    remote_records.push(remote_theme);
    let doc = SyncDocument {
        version: DOCUMENT_VERSION.to_string(),
        extensions: remote_records,
        export_time: None,
    };
    let settings = service.settings();
    service.remote().transport().seed(
        &settings.branch,
        &settings.file_path,
        &doc.to_json_pretty().unwrap(),
    );

    service.handle(Command::Pull);
    let pending = service.engine().pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id(), "new");

    let export = service.handle(Command::Export);
    let exported: SyncDocument =
        serde_json::from_value(export.data().unwrap().clone()).unwrap();
    assert!(exported.extensions.iter().all(|r| !r.kind.is_theme()));
}

#[test]
fn restore_document_drives_reconciliation() {
    let (service, _) = service(vec![rec("a")]);
    let outcome = service.handle(Command::Reconcile {
        document: document(&["a", "b"]),
    });
    assert!(outcome.is_success());
    assert_eq!(outcome.todo_count(), Some(1));

    let pending = service.engine().pending().unwrap();
    assert_eq!(pending[0].id(), "b");
    assert_eq!(pending[0].action, Action::Add);
}
