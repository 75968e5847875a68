//! Whole-document JSON store

use async_trait::async_trait;
use clima_core::{Dataset, DatasetStore, StoreError, StoreResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

/// Stores the dataset as one pretty-printed `{ "lecturas": [...] }` document
#[derive(Debug, Clone)]
pub struct JsonDocumentStore {
    path: PathBuf,
}

impl JsonDocumentStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DatasetStore for JsonDocumentStore {
    /// Missing or blank documents load as empty. A document that is not JSON
    /// at all (for instance after a truncated write) is logged and also loads
    /// as empty; the next save overwrites it. Malformed days or hours inside
    /// a readable document are dropped one by one.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> StoreResult<Dataset> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("document not found, starting from an empty dataset");
                return Ok(Dataset::new());
            }
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        if raw.trim().is_empty() {
            return Ok(Dataset::new());
        }

        match serde_json::from_str::<Dataset>(&raw) {
            Ok(dataset) => {
                debug!(days = dataset.len(), "dataset loaded");
                Ok(dataset)
            }
            Err(e) => {
                warn!(error = %e, "document unreadable, treating it as an empty dataset");
                Ok(Dataset::new())
            }
        }
    }

    #[instrument(skip(self, dataset), fields(path = %self.path.display(), days = dataset.len()))]
    async fn save(&self, dataset: &Dataset) -> StoreResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }

        let body = serde_json::to_string_pretty(dataset)?;
        fs::write(&self.path, body)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;

        debug!("dataset written");
        Ok(())
    }
}
