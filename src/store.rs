use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::session::Session;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid session history in {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize session history")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Strict reader for the persisted history. A missing file is an empty
/// history, not an error.
pub fn read_sessions(path: &Path) -> Result<Vec<Session>, StoreError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Append-only session history backed by a single JSON file that is
/// rewritten in full on every persist.
#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    sessions: Vec<Session>,
}

impl SessionStore {
    /// Loads the history at `path`. Never fails: unreadable or malformed
    /// files are logged and treated as an empty history.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let sessions = match read_sessions(&path) {
            Ok(sessions) => {
                debug!(path = %path.display(), count = sessions.len(), "loaded session history");
                sessions
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    cause = %error_cause(&err),
                    "starting with empty session history"
                );
                Vec::new()
            }
        };
        Self { path, sessions }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn append(&mut self, session: Session) {
        self.sessions.push(session);
    }

    /// Best-effort persist; failures are logged and the in-memory list is
    /// left as is.
    pub fn persist(&self) {
        if let Err(err) = self.try_persist() {
            warn!(error = %err, cause = %error_cause(&err), "failed to persist session history");
        }
    }

    /// Writes the full history to a temp file beside the target and renames
    /// it into place.
    pub fn try_persist(&self) -> Result<(), StoreError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|source| StoreError::Write {
            path: parent.clone(),
            source,
        })?;

        let data = serde_json::to_vec_pretty(&self.sessions).map_err(StoreError::Serialize)?;
        let write_err = |source: io::Error| StoreError::Write {
            path: self.path.clone(),
            source,
        };
        let mut tmp = NamedTempFile::new_in(&parent).map_err(write_err)?;
        tmp.write_all(&data).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path)
            .map_err(|err| write_err(err.error))?;
        Ok(())
    }
}

fn error_cause(err: &StoreError) -> String {
    std::error::Error::source(err)
        .map(ToString::to_string)
        .unwrap_or_default()
}
