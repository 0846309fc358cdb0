use async_trait::async_trait;
use hivemind_core::{Error, Result};
use hivemind_learning::store::SNAPSHOT_VERSION;
use hivemind_learning::{LearningSnapshot, LearningStore};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Learning state as one pretty-printed, versioned JSON document.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LearningStore for JsonFileStore {
    fn name(&self) -> &str {
        "json"
    }

    async fn save_all(&self, snapshot: &LearningSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(snapshot)?;
        // Write then rename so a crash never leaves a half-written file.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), patterns = snapshot.patterns.len(), "Saved learning state");
        Ok(())
    }

    async fn load_all(&self) -> Result<Option<LearningSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        if content.trim().is_empty() {
            warn!(path = %self.path.display(), "Learning state file is empty");
            return Ok(None);
        }

        let snapshot: LearningSnapshot = serde_json::from_str(&content)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(Error::Storage(format!(
                "learning state version {} is newer than supported version {}",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        Ok(Some(snapshot))
    }
}
