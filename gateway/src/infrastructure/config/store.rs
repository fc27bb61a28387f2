//! Persistence of settings changed at runtime.
//!
//! Mesh settings toggled through the API are written to a JSON overrides file
//! that [`Settings::load`](super::Settings::load) layers over the static
//! configuration on the next start.

use super::MeshSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Default location of the overrides file.
pub const DEFAULT_OVERRIDES_PATH: &str = "data/meshgate.settings.json";

/// Destination for runtime settings changes.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Persists the mesh section.
    async fn save_mesh(&self, settings: &MeshSettings) -> Result<()>;
}

/// Writes overrides to a JSON file, replacing it atomically.
///
/// Saves through clones of one store are serialized.
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: PathBuf,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl JsonSettingsStore {
    /// Creates a store backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<Map<String, Value>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(Map::new()),
            Ok(text) => match serde_json::from_str(&text)
                .with_context(|| format!("Invalid settings file {}", self.path.display()))?
            {
                Value::Object(map) => Ok(map),
                _ => Ok(Map::new()),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    /// Reads the persisted mesh section, if any.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be read or parsed.
    pub async fn load_mesh(&self) -> Result<Option<MeshSettings>> {
        let mut document = self.read_document().await?;
        document
            .remove("mesh")
            .map(serde_json::from_value)
            .transpose()
            .context("Invalid mesh section in settings file")
    }
}

#[async_trait]
impl SettingsStore for JsonSettingsStore {
    async fn save_mesh(&self, settings: &MeshSettings) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut document = self.read_document().await?;
        document.insert("mesh".to_string(), serde_json::to_value(settings)?);
        let text = serde_json::to_string_pretty(&Value::Object(document))?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || replace_file(&path, text.as_bytes()))
            .await
            .context("Settings writer panicked")??;

        debug!(path = %self.path.display(), "Mesh settings persisted");
        Ok(())
    }
}

/// Writes `contents` to a fresh temp file next to `path`, then renames it over `path`.
fn replace_file(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
            parent
        }
        None => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(contents)
        .and_then(|()| tmp.as_file().sync_all())
        .with_context(|| format!("Failed to write {}", tmp.path().display()))?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
