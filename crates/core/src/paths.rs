use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".hivemind"))
            .unwrap_or_else(|| PathBuf::from(".hivemind"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.base.join("state")
    }

    /// Learning snapshot used by the JSON store backend.
    pub fn learning_json(&self) -> PathBuf {
        self.state_dir().join("learning.json")
    }

    /// Database used by the SQLite store backend.
    pub fn learning_db(&self) -> PathBuf {
        self.state_dir().join("learning.db")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(self.state_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_files_live_under_base() {
        let paths = Paths::with_base(PathBuf::from("/tmp/hm"));
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/hm/config.json"));
        assert_eq!(
            paths.learning_json(),
            PathBuf::from("/tmp/hm/state/learning.json")
        );
        assert_eq!(paths.learning_db(), PathBuf::from("/tmp/hm/state/learning.db"));
    }

    #[test]
    fn test_ensure_dirs_creates_state() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base(dir.path().join("home"));
        paths.ensure_dirs().unwrap();
        assert!(paths.state_dir().is_dir());
        assert!(paths.logs_dir().is_dir());
    }
}
