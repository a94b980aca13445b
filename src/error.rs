use thiserror::Error;

/// Transport-level failure categories, kept coarse so every category maps to
/// one human-readable message in the view layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("authentication failed, check your username and password or token")]
    AuthFailed,
    #[error("access denied, you may not have the required permissions")]
    Forbidden,
    #[error("repository not found, check the repository URL")]
    NotFound,
    #[error("invalid repository URL")]
    MalformedUrl,
    #[error("network error: {0}")]
    Network(String),
    #[error("git error: {0}")]
    Git(String),
}

/// Crate-level error taxonomy.
///
/// A failed pull or publish must leave the pending set and revision pointer
/// untouched; nothing here carries partial state.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("git repository not configured")]
    NotConfigured,

    /// Deliberate ordering guarantee: the remote cannot be overwritten while
    /// local/remote divergence is unresolved.
    #[error("cannot push: {0} pending operation(s) need to be resolved first")]
    PendingWork(usize),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("malformed sync document: {0}")]
    MalformedDocument(String),

    #[error("extension host error: {0}")]
    Host(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
