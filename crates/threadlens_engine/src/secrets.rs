//! Named credentials with a prompt-once fallback.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use threadlens_logging::{lens_info, lens_warn};

use crate::persist::write_atomic;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret store io: {0}")]
    Io(#[from] io::Error),
    #[error("secret store is not valid RON: {0}")]
    Format(String),
    #[error("secret store lock poisoned")]
    Poisoned,
}

pub trait SecretStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<String>, SecretError>;
    fn set(&self, name: &str, value: &str) -> Result<(), SecretError>;
}

/// Asks the user for a missing credential. `None` means the user declined.
pub trait SecretPrompt: Send + Sync {
    fn ask(&self, name: &str) -> Option<String>;
}

impl<F> SecretPrompt for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn ask(&self, name: &str) -> Option<String> {
        (self)(name)
    }
}

#[derive(Debug, Default)]
pub struct MemorySecretStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(self, name: &str, value: &str) -> Self {
        if let Ok(mut values) = self.values.lock() {
            values.insert(name.to_string(), value.to_string());
        }
        self
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, name: &str) -> Result<Option<String>, SecretError> {
        let values = self.values.lock().map_err(|_| SecretError::Poisoned)?;
        Ok(values.get(name).cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<(), SecretError> {
        let mut values = self.values.lock().map_err(|_| SecretError::Poisoned)?;
        values.insert(name.to_string(), value.to_string());
        Ok(())
    }
}

/// A RON map of name -> value on disk, rewritten atomically on every `set`.
#[derive(Debug)]
pub struct FileSecretStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, SecretError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        ron::from_str(&text).map_err(|err| SecretError::Format(err.to_string()))
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, name: &str) -> Result<Option<String>, SecretError> {
        let _guard = self.lock.lock().map_err(|_| SecretError::Poisoned)?;
        Ok(self.load()?.remove(name))
    }

    fn set(&self, name: &str, value: &str) -> Result<(), SecretError> {
        let _guard = self.lock.lock().map_err(|_| SecretError::Poisoned)?;
        let mut values = self.load()?;
        values.insert(name.to_string(), value.to_string());
        let text = ron::ser::to_string_pretty(&values, ron::ser::PrettyConfig::default())
            .map_err(|err| SecretError::Format(err.to_string()))?;
        write_atomic(&self.path, &text)?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct SecretVault {
    store: Arc<dyn SecretStore>,
    prompt: Option<Arc<dyn SecretPrompt>>,
}

impl SecretVault {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self {
            store,
            prompt: None,
        }
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn SecretPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Stored value, or `None`. Store errors are logged.
    pub fn get(&self, name: &str) -> Option<String> {
        match self.store.get(name) {
            Ok(value) => value.filter(|value| !value.is_empty()),
            Err(err) => {
                lens_warn!("Could not read secret {}: {}", name, err);
                None
            }
        }
    }

    pub fn set(&self, name: &str, value: &str) -> Result<(), SecretError> {
        self.store.set(name, value)
    }

    /// Stored value, otherwise asks the prompt once and persists a non-empty
    /// answer.
    pub fn get_or_prompt(&self, name: &str) -> Option<String> {
        if let Some(value) = self.get(name) {
            return Some(value);
        }
        let answer = self
            .prompt
            .as_ref()?
            .ask(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())?;
        match self.store.set(name, &answer) {
            Ok(()) => lens_info!("Stored secret {}", name),
            Err(err) => lens_warn!("Could not persist secret {}: {}", name, err),
        }
        Some(answer)
    }
}
