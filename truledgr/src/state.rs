//! Persisted client state: the custom API URL and the access token.
//!
//! This is the native counterpart of the web client's localStorage. Writes go to a sibling
//! temporary file and are renamed into place, so a crash never leaves a truncated file. The
//! file holds a bearer token and is readable by its owner only.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use std::sync::{Mutex, PoisonError};

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientState {
    /// API URL chosen by the user, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

/// JSON file holding a [`ClientState`].
#[derive(Debug)]
pub struct StateFile {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current state. A missing file is an empty state.
    pub fn load(&self) -> Result<ClientState> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read()
    }

    /// Read the current state, moving an unreadable file aside so it can be rewritten.
    ///
    /// Used at startup, where a damaged file must not lock the user out of the commands that
    /// would repair it.
    pub fn load_or_reset(&self) -> ClientState {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        match self.read() {
            Ok(state) => state,
            Err(e) => {
                let backup = self.path.with_extension("json.corrupt");
                tracing::warn!("Ignoring unreadable client state: {}", e);
                match std::fs::rename(&self.path, &backup) {
                    Ok(()) => tracing::warn!(backup = %backup.display(), "Moved unreadable client state aside"),
                    Err(e) => tracing::error!("Failed to move unreadable client state aside: {}", e),
                }
                ClientState::default()
            }
        }
    }

    /// Apply `f` to the stored state and persist the result.
    pub fn update(&self, f: impl FnOnce(&mut ClientState)) -> Result<ClientState> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut state = self.read()?;
        f(&mut state);
        self.write(&state)?;
        Ok(state)
    }

    fn read(&self) -> Result<ClientState> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(ClientState::default()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| self.storage_error(e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ClientState::default()),
            Err(e) => Err(self.storage_error(e)),
        }
    }

    fn write(&self, state: &ClientState) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent).map_err(|e| self.storage_error(e))?;

        let body = serde_json::to_vec_pretty(state).map_err(|e| self.storage_error(e))?;
        // Temporary files are created owner-only, and the mode survives the rename
        let mut tmp = NamedTempFile::new_in(parent).map_err(|e| self.storage_error(e))?;
        tmp.write_all(&body).map_err(|e| self.storage_error(e))?;
        tmp.as_file().sync_all().map_err(|e| self.storage_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.storage_error(e))?;

        tracing::debug!(path = %self.path.display(), "Persisted client state");
        Ok(())
    }

    fn storage_error(&self, e: impl std::fmt::Display) -> Error {
        Error::Storage {
            path: self.path.clone(),
            message: e.to_string(),
        }
    }
}
