//! Config repository access.
//!
//! A pass starts by materializing the repository as a [`FileTree`]: every
//! file keyed by its `/`-separated path relative to the repository root.
//! Fetchers never interpret content; that is the snapshot parser's job.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Errors raised while materializing a repository.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to clone '{url}': {message}")]
    Git { url: String, message: String },

    #[error("repository '{url}' is unreachable: {message}")]
    Unreachable { url: String, message: String },

    #[error("fetch task failed: {0}")]
    Task(String),
}

/// Files of one repository revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTree {
    files: BTreeMap<String, String>,
}

impl FileTree {
    /// Content of the file at `path`, if present.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    /// Files directly inside `dir`, as `(file name, content)` pairs.
    pub fn dir<'a>(&'a self, dir: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.files.iter().filter_map(move |(path, content)| {
            let rest = path.strip_prefix(dir)?.strip_prefix('/')?;
            if rest.is_empty() || rest.contains('/') {
                return None;
            }
            Some((rest, content.as_str()))
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl From<BTreeMap<String, String>> for FileTree {
    fn from(files: BTreeMap<String, String>) -> Self {
        Self { files }
    }
}

/// Source of repository content.
#[async_trait]
pub trait RepoFetcher: Send + Sync {
    /// Materialize the current revision of the repository at `url`.
    async fn fetch(&self, url: &str) -> Result<FileTree, FetchError>;
}

/// Longest a clone may take before the repository counts as unreachable.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Pick a fetcher for a repository location: local directories and
/// `file://` URLs are read in place, anything else is cloned with git
/// within `timeout`.
pub fn fetcher_for(url: &str, timeout: Duration) -> Arc<dyn RepoFetcher> {
    if url.starts_with("file://") || Path::new(url).is_dir() {
        Arc::new(DirFetcher)
    } else {
        Arc::new(GitFetcher::new("git", timeout))
    }
}

/// Reads a working copy straight from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirFetcher;

#[async_trait]
impl RepoFetcher for DirFetcher {
    async fn fetch(&self, url: &str) -> Result<FileTree, FetchError> {
        let root = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
        tokio::task::spawn_blocking(move || read_tree(&root))
            .await
            .map_err(|e| FetchError::Task(e.to_string()))?
    }
}

/// Shallow-clones the repository with the `git` binary into a scratch
/// directory that is discarded after reading. A clone still running after
/// `timeout` is killed.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    git: PathBuf,
    timeout: Duration,
}

impl GitFetcher {
    pub fn new(git: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            git: git.into(),
            timeout,
        }
    }
}

#[async_trait]
impl RepoFetcher for GitFetcher {
    async fn fetch(&self, url: &str) -> Result<FileTree, FetchError> {
        let scratch = tempfile::tempdir().map_err(|source| FetchError::Io {
            path: std::env::temp_dir(),
            source,
        })?;
        let checkout = scratch.path().join("checkout");

        debug!(url = %url, timeout_secs = self.timeout.as_secs(), "cloning config repository");
        let clone = Command::new(&self.git)
            .args(["clone", "--depth", "1", "--quiet", url])
            .arg(&checkout)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, clone)
            .await
            .map_err(|_| {
                warn!(url = %url, "config repository clone timed out");
                FetchError::Unreachable {
                    url: url.to_string(),
                    message: format!("git clone timed out after {:?}", self.timeout),
                }
            })?
            .map_err(|e| FetchError::Git {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(FetchError::Git {
                url: url.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let tree = tokio::task::spawn_blocking(move || read_tree(&checkout))
            .await
            .map_err(|e| FetchError::Task(e.to_string()))??;
        drop(scratch);
        Ok(tree)
    }
}

/// In-memory repository whose content can be swapped between passes.
#[derive(Debug)]
pub struct MemoryFetcher {
    content: RwLock<Result<FileTree, String>>,
}

impl Default for MemoryFetcher {
    fn default() -> Self {
        Self::new(FileTree::default())
    }
}

impl MemoryFetcher {
    pub fn new(tree: impl Into<FileTree>) -> Self {
        Self {
            content: RwLock::new(Ok(tree.into())),
        }
    }

    /// Serve `tree` from the next fetch on.
    pub fn set(&self, tree: impl Into<FileTree>) {
        *self.content.write().unwrap_or_else(|e| e.into_inner()) = Ok(tree.into());
    }

    /// Fail every fetch with `message` until the next [`set`](Self::set).
    pub fn set_unreachable(&self, message: impl Into<String>) {
        *self.content.write().unwrap_or_else(|e| e.into_inner()) = Err(message.into());
    }
}

#[async_trait]
impl RepoFetcher for MemoryFetcher {
    async fn fetch(&self, url: &str) -> Result<FileTree, FetchError> {
        let content = self.content.read().unwrap_or_else(|e| e.into_inner());
        content.clone().map_err(|message| FetchError::Unreachable {
            url: url.to_string(),
            message,
        })
    }
}

fn read_tree(root: &Path) -> Result<FileTree, FetchError> {
    let mut files = BTreeMap::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|source| FetchError::Io {
            path: dir.clone(),
            source,
        })?;

        for entry in entries {
            let entry = entry.map_err(|source| FetchError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|source| FetchError::Io {
                path: path.clone(),
                source,
            })?;

            if file_type.is_dir() {
                if entry.file_name() != ".git" {
                    pending.push(path);
                }
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let bytes = std::fs::read(&path).map_err(|source| FetchError::Io {
                path: path.clone(),
                source,
            })?;
            files.insert(key, String::from_utf8_lossy(&bytes).into_owned());
        }
    }

    Ok(FileTree { files })
}
