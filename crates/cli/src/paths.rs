//! Path resolution for Misso data files.
//!
//! Resolved once at startup from: `--data-dir` > `MISSO_DATA_DIR` env > `~/.misso`.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    /// Priority: `explicit` arg > `MISSO_DATA_DIR` env > `~/.misso` default.
    pub fn resolve(explicit: Option<&Path>) -> anyhow::Result<Self> {
        Self::resolve_with(explicit, std::env::var_os("MISSO_DATA_DIR").map(PathBuf::from))
    }

    fn resolve_with(explicit: Option<&Path>, env_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let root = match (explicit, env_dir) {
            (Some(p), _) => p.to_path_buf(),
            (None, Some(p)) if !p.as_os_str().is_empty() => p,
            _ => dirs::home_dir()
                .context("HOME directory not found; pass --data-dir")?
                .join(".misso"),
        };
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn ensure_dirs(&self) -> io::Result<()> {
        std::fs::create_dir_all(self.log_dir())
    }
}
