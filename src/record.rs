//! Data model shared across the sync pipeline: extension records, snapshots,
//! the persisted sync document, pending actions, and the revision pointer.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Version tag written into every exported sync document.
pub const DOCUMENT_VERSION: &str = "0.1";

/// Category of an installed item, as reported by the host.
///
/// Theme-typed items are excluded from reconciliation and display
/// system-wide; `Snapshot` construction is the enforcement point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionKind {
    #[default]
    Extension,
    HostedApp,
    PackagedApp,
    LegacyPackagedApp,
    Theme,
    #[serde(other)]
    Unknown,
}

impl ExtensionKind {
    pub fn is_theme(self) -> bool {
        matches!(self, ExtensionKind::Theme)
    }
}

/// One installed or remotely-recorded extension.
///
/// Immutable once captured in a snapshot; a changed extension is represented
/// by replacing the whole record, never by mutating fields in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionRecord {
    /// Opaque stable identifier, the unique key for all reconciliation math.
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_type: Option<String>,
    /// Only meaningful for locally-installed records.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, rename = "type")]
    pub kind: ExtensionKind,
}

impl ExtensionRecord {
    /// Minimal record, useful in tests and fixtures.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        ExtensionRecord {
            id: id.into(),
            name: name.into(),
            version: None,
            description: None,
            homepage_url: None,
            install_type: None,
            enabled: false,
            kind: ExtensionKind::Extension,
        }
    }
}

/// A point-in-time collection of extension records from one side.
///
/// Construction filters theme-typed records and deduplicates by id (first
/// occurrence wins), so every consumer downstream of a `Snapshot` sees the
/// reconciliation-relevant set only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    records: Vec<ExtensionRecord>,
}

impl Snapshot {
    pub fn from_records(records: Vec<ExtensionRecord>) -> Self {
        let mut seen = HashSet::new();
        let records = records
            .into_iter()
            .filter(|r| !r.kind.is_theme())
            .filter(|r| seen.insert(r.id.clone()))
            .collect();
        Snapshot { records }
    }

    pub fn empty() -> Self {
        Snapshot::default()
    }

    pub fn records(&self) -> &[ExtensionRecord] {
        &self.records
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.iter().any(|r| r.id == id)
    }

    pub fn ids(&self) -> HashSet<&str> {
        self.records.iter().map(|r| r.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The JSON document committed to the remote repository and written by the
/// backup/export paths: `{version, extensions, exportTime}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDocument {
    #[serde(default = "default_document_version")]
    pub version: String,
    #[serde(default)]
    pub extensions: Vec<ExtensionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_time: Option<DateTime<Utc>>,
}

fn default_document_version() -> String {
    DOCUMENT_VERSION.to_string()
}

impl SyncDocument {
    /// Capture the given snapshot as an exportable document.
    pub fn capture(snapshot: &Snapshot, now: DateTime<Utc>) -> Self {
        SyncDocument {
            version: DOCUMENT_VERSION.to_string(),
            extensions: snapshot.records().to_vec(),
            export_time: Some(now),
        }
    }

    /// Strict parse for user-supplied documents: malformed JSON or a missing
    /// `extensions` array is rejected, never silently defaulted.
    pub fn parse(bytes: &[u8]) -> Result<Self, SyncError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| SyncError::MalformedDocument(e.to_string()))?;
        if !value.get("extensions").is_some_and(|v| v.is_array()) {
            return Err(SyncError::MalformedDocument(
                "missing extensions array".to_string(),
            ));
        }
        serde_json::from_value(value).map_err(|e| SyncError::MalformedDocument(e.to_string()))
    }

    /// Document with no extensions recorded.
    pub fn empty() -> Self {
        SyncDocument {
            version: DOCUMENT_VERSION.to_string(),
            extensions: Vec::new(),
            export_time: None,
        }
    }

    /// Lenient parse for the remote data file: a repository with no data yet
    /// (or a corrupt file) reconciles as an empty snapshot.
    pub fn parse_or_empty(bytes: &[u8]) -> Self {
        match Self::parse(bytes) {
            Ok(doc) => doc,
            Err(err) => {
                tracing::warn!("remote data file unreadable, treating as empty: {err}");
                Self::empty()
            }
        }
    }

    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot::from_records(self.extensions.clone())
    }

    pub fn to_json_pretty(&self) -> Result<Vec<u8>, SyncError> {
        serde_json::to_vec_pretty(self).map_err(|e| SyncError::MalformedDocument(e.to_string()))
    }
}

/// The queued instruction kind awaiting real-world completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Add,
    Remove,
}

/// An extension record annotated with the action that would reconcile it.
///
/// `Remove`: present locally, absent remotely. `Add`: the reverse. At most
/// one pending action exists per id at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    #[serde(flatten)]
    pub record: ExtensionRecord,
    pub action: Action,
}

impl PendingAction {
    pub fn id(&self) -> &str {
        &self.record.id
    }
}

/// Counts of pending actions by kind, for the "N added / M removed" badge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
}

/// The last remote revision the local side has synchronized against, plus
/// when. Updated only after a successful publish or an advancing pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionPointer {
    pub revision: String,
    pub last_sync: DateTime<Utc>,
}
