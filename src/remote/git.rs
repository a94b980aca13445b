//! Production transport on libgit2, operating against a cached working tree
//! under the data directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use git2::{
    BranchType, Commit, ErrorClass, ErrorCode, FetchOptions, PushOptions, RemoteCallbacks,
    Repository, Signature,
};

use super::transport::{auth_header, RemoteHead, Transport};
use crate::config::Settings;
use crate::error::TransportError;

const REMOTE_NAME: &str = "origin";
const COMMIT_AUTHOR: &str = "Extension Git Sync";
const COMMIT_EMAIL: &str = "exten.git@local";

pub struct GitTransport {
    workdir: PathBuf,
}

impl GitTransport {
    /// Transport rooted at a working-tree cache directory.
    pub fn new<P: AsRef<Path>>(workdir: P) -> Self {
        GitTransport {
            workdir: workdir.as_ref().to_path_buf(),
        }
    }

    /// Open the cached working tree, initializing it on first use, and make
    /// sure `origin` points at the configured URL.
    fn open(&self, settings: &Settings) -> Result<Repository, TransportError> {
        fs::create_dir_all(&self.workdir)
            .map_err(|e| TransportError::Git(format!("cannot create workdir: {e}")))?;
        let repo = Repository::open(&self.workdir)
            .or_else(|_| Repository::init(&self.workdir))
            .map_err(classify)?;

        let existing = repo
            .find_remote(REMOTE_NAME)
            .ok()
            .and_then(|r| r.url().map(str::to_string));
        match existing {
            Some(url) if url == settings.repo_url => {}
            Some(_) => {
                repo.remote_set_url(REMOTE_NAME, &settings.repo_url)
                    .map_err(classify)?;
            }
            None => {
                repo.remote(REMOTE_NAME, &settings.repo_url)
                    .map_err(classify)?;
            }
        }
        Ok(repo)
    }

    /// Fetch all remote heads. A glob refspec keeps this from failing on an
    /// empty remote or a branch that does not exist yet.
    fn fetch_remote(&self, repo: &Repository, settings: &Settings) -> Result<(), TransportError> {
        let mut remote = repo.find_remote(REMOTE_NAME).map_err(classify)?;
        let mut opts = FetchOptions::new();
        let header = auth_header(settings);
        if let Some(ref header) = header {
            opts.custom_headers(&[header.as_str()]);
        }
        let refspec = format!("+refs/heads/*:refs/remotes/{REMOTE_NAME}/*");
        remote
            .fetch(&[refspec.as_str()], Some(&mut opts), None)
            .map_err(classify)?;
        Ok(())
    }

    fn remote_branch_commit<'r>(
        &self,
        repo: &'r Repository,
        branch: &str,
    ) -> Option<Commit<'r>> {
        repo.find_reference(&format!("refs/remotes/{REMOTE_NAME}/{branch}"))
            .ok()
            .and_then(|r| r.peel_to_commit().ok())
    }
}

impl Transport for GitTransport {
    fn probe(&self, settings: &Settings) -> Result<(), TransportError> {
        let repo = self.open(settings)?;
        self.fetch_remote(&repo, settings)
    }

    fn fetch(&self, settings: &Settings) -> Result<Option<RemoteHead>, TransportError> {
        let repo = self.open(settings)?;
        self.fetch_remote(&repo, settings)?;

        let Some(commit) = self.remote_branch_commit(&repo, &settings.branch) else {
            tracing::debug!(branch = %settings.branch, "remote branch absent");
            return Ok(None);
        };
        let revision = commit.id().to_string();

        let tree = commit.tree().map_err(classify)?;
        let file = match tree.get_path(Path::new(&settings.file_path)) {
            Ok(entry) => entry
                .to_object(&repo)
                .map_err(classify)?
                .as_blob()
                .map(|blob| blob.content().to_vec()),
            Err(_) => None,
        };

        Ok(Some(RemoteHead { revision, file }))
    }

    fn publish(
        &self,
        settings: &Settings,
        content: &[u8],
        message: &str,
    ) -> Result<String, TransportError> {
        let repo = self.open(settings)?;
        self.fetch_remote(&repo, settings)?;

        let parent = self.remote_branch_commit(&repo, &settings.branch);

        // Stage on top of the remote tree so the commit only replaces the
        // data file, preserving whatever else lives in the repository.
        let mut index = repo.index().map_err(classify)?;
        if let Some(ref parent) = parent {
            let tree = parent.tree().map_err(classify)?;
            index.read_tree(&tree).map_err(classify)?;
        }

        let abs = self.workdir.join(&settings.file_path);
        if let Some(dir) = abs.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| TransportError::Git(format!("cannot create data path: {e}")))?;
        }
        fs::write(&abs, content)
            .map_err(|e| TransportError::Git(format!("cannot write data file: {e}")))?;
        index
            .add_path(Path::new(&settings.file_path))
            .map_err(classify)?;
        let tree_id = index.write_tree().map_err(classify)?;
        index.write().map_err(classify)?;
        let tree = repo.find_tree(tree_id).map_err(classify)?;

        let sig = Signature::now(COMMIT_AUTHOR, COMMIT_EMAIL).map_err(classify)?;
        let parents: Vec<&Commit> = parent.iter().collect();
        let local_ref = format!("refs/heads/{}", settings.branch);
        let commit_id = repo
            .commit(Some(&local_ref), &sig, &sig, message, &tree, &parents)
            .map_err(classify)?;

        let mut remote = repo.find_remote(REMOTE_NAME).map_err(classify)?;
        let mut opts = PushOptions::new();
        let header = auth_header(settings);
        if let Some(ref header) = header {
            opts.custom_headers(&[header.as_str()]);
        }

        // The server can reject a ref update after the transport succeeds;
        // surface that through the callback.
        let rejection: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&rejection);
        let mut callbacks = RemoteCallbacks::new();
        callbacks.push_update_reference(move |refname, status| {
            if let Some(status) = status {
                if let Ok(mut slot) = seen.lock() {
                    *slot = Some(format!("{refname}: {status}"));
                }
            }
            Ok(())
        });
        opts.remote_callbacks(callbacks);

        let refspec = format!("{local_ref}:{local_ref}");
        remote
            .push(&[refspec.as_str()], Some(&mut opts))
            .map_err(classify)?;

        if let Some(rejected) = rejection.lock().ok().and_then(|mut s| s.take()) {
            return Err(TransportError::Git(format!("push rejected: {rejected}")));
        }

        tracing::info!(revision = %commit_id, "published sync document");
        Ok(commit_id.to_string())
    }

    fn list_branches(&self, settings: &Settings) -> Result<Vec<String>, TransportError> {
        let repo = self.open(settings)?;
        self.fetch_remote(&repo, settings)?;

        let prefix = format!("{REMOTE_NAME}/");
        let mut names = Vec::new();
        let branches = repo.branches(Some(BranchType::Remote)).map_err(classify)?;
        for branch in branches {
            let (branch, _) = branch.map_err(classify)?;
            if let Ok(Some(name)) = branch.name() {
                if let Some(short) = name.strip_prefix(&prefix) {
                    if short != "HEAD" {
                        names.push(short.to_string());
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Map libgit2 failures onto the coarse transport taxonomy. libgit2 folds
/// HTTP status codes into message text, so the mapping has to sniff both the
/// structured class/code and the message.
fn classify(err: git2::Error) -> TransportError {
    let message = err.message().to_string();
    let lowered = message.to_lowercase();

    if err.code() == ErrorCode::Auth || lowered.contains("401") || lowered.contains("authentication")
    {
        return TransportError::AuthFailed;
    }
    if lowered.contains("403") || lowered.contains("forbidden") {
        return TransportError::Forbidden;
    }
    if lowered.contains("404") || lowered.contains("repository not found") {
        return TransportError::NotFound;
    }
    if lowered.contains("unsupported url protocol") || lowered.contains("malformed url") {
        return TransportError::MalformedUrl;
    }
    match err.class() {
        ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssl => TransportError::Network(message),
        _ => TransportError::Git(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_err(class: ErrorClass, code: ErrorCode, message: &str) -> git2::Error {
        git2::Error::new(code, class, message)
    }

    #[test]
    fn classifies_auth_by_code_and_status() {
        assert_eq!(
            classify(git_err(ErrorClass::Http, ErrorCode::Auth, "auth required")),
            TransportError::AuthFailed
        );
        assert_eq!(
            classify(git_err(
                ErrorClass::Http,
                ErrorCode::GenericError,
                "unexpected http status code: 401"
            )),
            TransportError::AuthFailed
        );
    }

    #[test]
    fn classifies_http_statuses() {
        assert_eq!(
            classify(git_err(
                ErrorClass::Http,
                ErrorCode::GenericError,
                "unexpected http status code: 403"
            )),
            TransportError::Forbidden
        );
        assert_eq!(
            classify(git_err(
                ErrorClass::Http,
                ErrorCode::GenericError,
                "unexpected http status code: 404"
            )),
            TransportError::NotFound
        );
    }

    #[test]
    fn classifies_url_and_network() {
        assert_eq!(
            classify(git_err(
                ErrorClass::Net,
                ErrorCode::GenericError,
                "unsupported URL protocol"
            )),
            TransportError::MalformedUrl
        );
        assert!(matches!(
            classify(git_err(
                ErrorClass::Net,
                ErrorCode::GenericError,
                "failed to resolve address"
            )),
            TransportError::Network(_)
        ));
    }
}
