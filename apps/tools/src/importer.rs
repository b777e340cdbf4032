use std::path::{Path, PathBuf};

use anyhow::Context;
use apportion_api::RowImporter;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use shared::domain::BaseRecord;
use tracing::{debug, error};

/// Reads base rows from a JSON array file. Read and parse failures are
/// logged and yield no rows.
pub struct JsonFileImporter {
    path: PathBuf,
}

impl JsonFileImporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RowImporter for JsonFileImporter {
    async fn import_rows(&self) -> Vec<BaseRecord> {
        match read_json_rows(&self.path).await {
            Ok(rows) => {
                debug!(path = %self.path.display(), rows = rows.len(), "rows imported");
                rows
            }
            Err(err) => {
                error!(path = %self.path.display(), "import failed: {err:#}");
                Vec::new()
            }
        }
    }
}

pub async fn read_json_rows<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

#[cfg(test)]
#[path = "tests/importer_tests.rs"]
mod tests;
