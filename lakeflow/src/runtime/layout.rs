use std::path::{Path, PathBuf};

/// Directory layout below the home directory.
///
/// ```text
/// <home>/
///   db/     SQLite database
///   logs/   daily rolling log files
/// ```
#[derive(Clone, Debug)]
pub struct FilesystemLayout {
    home_dir: PathBuf,
}

impl FilesystemLayout {
    pub fn new(home_dir: PathBuf) -> Self {
        Self { home_dir }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn db_dir(&self) -> PathBuf {
        self.home_dir.join("db")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home_dir.join("logs")
    }

    /// Create every directory of the layout.
    pub fn prepare(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.home_dir)?;
        std::fs::create_dir_all(self.db_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prepare_creates_directories() {
        let dir = TempDir::new().unwrap();
        let layout = FilesystemLayout::new(dir.path().join("home"));
        layout.prepare().unwrap();
        assert!(layout.db_dir().is_dir());
        assert!(layout.logs_dir().is_dir());

        // Idempotent
        layout.prepare().unwrap();
    }
}
