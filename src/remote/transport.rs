use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::config::Settings;
use crate::error::TransportError;

/// Head of the remote sync branch: its revision identifier and, when
/// present, the raw bytes of the data file at that revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHead {
    pub revision: String,
    pub file: Option<Vec<u8>>,
}

/// Version-control transport consumed as an opaque capability.
///
/// One production implementation (git2) and one in-memory implementation for
/// tests, selected by dependency injection.
pub trait Transport: Send + Sync {
    /// Cheap connectivity and permission check; no state change.
    fn probe(&self, settings: &Settings) -> Result<(), TransportError>;

    /// Fetch the sync branch head. `None` when the branch does not exist
    /// yet (an empty remote has nothing to reconcile against).
    fn fetch(&self, settings: &Settings) -> Result<Option<RemoteHead>, TransportError>;

    /// Commit the data file and push, returning the new revision identifier.
    fn publish(
        &self,
        settings: &Settings,
        content: &[u8],
        message: &str,
    ) -> Result<String, TransportError>;

    fn list_branches(&self, settings: &Settings) -> Result<Vec<String>, TransportError>;
}

/// Build the `Authorization` header for the configured credentials.
///
/// Username + password is HTTP Basic; a username already containing a colon
/// is treated as a pre-joined `user:token` pair; a password alone is a
/// Bearer token.
pub fn auth_header(settings: &Settings) -> Option<String> {
    let user = settings.username.trim();
    let pass = settings.password.trim();

    if !user.is_empty() && !pass.is_empty() {
        let raw = if user.contains(':') {
            user.to_string()
        } else {
            format!("{user}:{pass}")
        };
        Some(format!("Authorization: Basic {}", BASE64.encode(raw)))
    } else if !pass.is_empty() {
        Some(format!("Authorization: Bearer {pass}"))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(user: &str, pass: &str) -> Settings {
        Settings {
            username: user.to_string(),
            password: pass.to_string(),
            ..Settings::default()
        }
    }

    #[test]
    fn basic_auth_from_user_and_password() {
        let header = auth_header(&settings("alice", "secret")).unwrap();
        assert_eq!(
            header,
            format!("Authorization: Basic {}", BASE64.encode("alice:secret"))
        );
    }

    #[test]
    fn prejoined_token_pair_is_used_verbatim() {
        let header = auth_header(&settings("alice:tok123", "ignored")).unwrap();
        assert_eq!(
            header,
            format!("Authorization: Basic {}", BASE64.encode("alice:tok123"))
        );
    }

    #[test]
    fn password_only_is_bearer() {
        let header = auth_header(&settings("", "tok123")).unwrap();
        assert_eq!(header, "Authorization: Bearer tok123");
    }

    #[test]
    fn no_credentials_no_header() {
        assert_eq!(auth_header(&settings("", "")), None);
    }
}
