//! Access token persistence.

use arc_swap::ArcSwapOption;
use std::fmt;
use std::sync::Arc;

use crate::errors::Result;
use crate::state::StateFile;

/// Holds the current access token.
///
/// Implementations are shared between the HTTP client, which reads the token for every request
/// and clears it on 401, and the session store, which sets it on login.
pub trait TokenStore: Send + Sync + fmt::Debug {
    fn get(&self) -> Option<String>;

    fn set(&self, token: String) -> Result<()>;

    fn clear(&self) -> Result<()>;

    /// Clear the token only while it is still `expected`. Returns whether it was cleared.
    fn clear_if(&self, expected: &str) -> Result<bool> {
        if self.get().as_deref() != Some(expected) {
            return Ok(false);
        }
        self.clear().map(|()| true)
    }

    /// Drop any in-memory copy so the next [`get`](Self::get) re-reads the backing store.
    fn invalidate(&self) {}
}

/// Token store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: ArcSwapOption<String>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let token: String = token.into();
        Self {
            token: ArcSwapOption::from_pointee(token),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Option<String> {
        self.token.load_full().map(|t| (*t).clone())
    }

    fn set(&self, token: String) -> Result<()> {
        self.token.store(Some(Arc::new(token)));
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.token.store(None);
        Ok(())
    }

    fn clear_if(&self, expected: &str) -> Result<bool> {
        let previous = self.token.rcu(|current| match current.as_deref() {
            Some(token) if token == expected => None,
            _ => current.clone(),
        });
        Ok(previous.is_some_and(|token| *token == expected))
    }
}

/// Token store backed by the client state file, with an in-memory cache.
///
/// The cache also remembers a cleared token, so a clear whose write failed still stops the
/// token being sent. Only [`invalidate`](TokenStore::invalidate) makes the file authoritative
/// again.
#[derive(Debug)]
pub struct FileTokenStore {
    file: Arc<StateFile>,
    // None until loaded; Some(None) once known to be absent or cleared
    cache: ArcSwapOption<Option<String>>,
}

impl FileTokenStore {
    pub fn new(file: Arc<StateFile>) -> Self {
        Self {
            file,
            cache: ArcSwapOption::empty(),
        }
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self) -> Option<String> {
        if let Some(cached) = self.cache.load_full() {
            return (*cached).clone();
        }

        match self.file.load() {
            Ok(state) => {
                self.cache.store(Some(Arc::new(state.access_token.clone())));
                state.access_token
            }
            Err(e) => {
                tracing::warn!("Failed to read persisted access token: {}", e);
                None
            }
        }
    }

    fn set(&self, token: String) -> Result<()> {
        self.file.update(|s| s.access_token = Some(token.clone()))?;
        self.cache.store(Some(Arc::new(Some(token))));
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.cache.store(Some(Arc::new(None)));
        self.file.update(|s| s.access_token = None)?;
        Ok(())
    }

    fn clear_if(&self, expected: &str) -> Result<bool> {
        if self.get().as_deref() != Some(expected) {
            return Ok(false);
        }

        let previous = self.cache.rcu(|cached| match cached.as_deref() {
            Some(Some(token)) if token == expected => Some(Arc::new(None)),
            _ => cached.clone(),
        });
        if !matches!(previous.as_deref(), Some(Some(token)) if token == expected) {
            return Ok(false);
        }

        self.file.update(|s| {
            if s.access_token.as_deref() == Some(expected) {
                s.access_token = None;
            }
        })?;
        Ok(true)
    }

    fn invalidate(&self) {
        self.cache.store(None);
    }
}
