//! Runtime configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable overriding the home directory.
pub const HOME_ENV: &str = "LAKEFLOW_HOME";
/// Environment variable naming the native plugin directory.
pub const PLUGIN_DIR_ENV: &str = "PLUGIN_DIR";
/// Environment variable naming the remote plugin directory.
pub const REMOTE_PLUGIN_DIR_ENV: &str = "REMOTE_PLUGIN_DIR";

const DEFAULT_HOME_DIR: &str = ".lakeflow";
const DATABASE_FILE: &str = "lakeflow.db";

/// Options for constructing a [`LakeflowRuntime`](super::LakeflowRuntime).
///
/// `Default` only resolves the home directory; plugin directories are picked up
/// from the environment by [`LakeflowOptions::from_env`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LakeflowOptions {
    /// Root of everything the runtime writes. Must be absolute.
    pub home_dir: PathBuf,
    /// Directory scanned for native plugin libraries.
    pub plugin_dir: Option<PathBuf>,
    /// Directory scanned for `run.sh` launchers.
    pub remote_plugin_dir: Option<PathBuf>,
    /// Database file; `<home>/db/lakeflow.db` when unset.
    pub database_path: Option<PathBuf>,
    /// Install the process-wide tracing subscriber on startup.
    pub init_logging: bool,
    /// Apply pending migrations while the runtime starts.
    pub auto_migrate: bool,
}

impl Default for LakeflowOptions {
    fn default() -> Self {
        Self {
            home_dir: default_home_dir(),
            plugin_dir: None,
            remote_plugin_dir: None,
            database_path: None,
            init_logging: true,
            auto_migrate: true,
        }
    }
}

impl LakeflowOptions {
    /// Defaults plus the plugin directories named by the environment.
    pub fn from_env() -> Self {
        Self {
            plugin_dir: env_path(PLUGIN_DIR_ENV),
            remote_plugin_dir: env_path(REMOTE_PLUGIN_DIR_ENV),
            ..Self::default()
        }
    }

    /// Options rooted at `home_dir` with nothing else configured.
    pub fn with_home(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
            ..Self::default()
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.home_dir.join("db").join(DATABASE_FILE))
    }
}

fn default_home_dir() -> PathBuf {
    if let Some(home) = env_path(HOME_ENV) {
        return home;
    }
    dirs::home_dir()
        .map(|home| home.join(DEFAULT_HOME_DIR))
        .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_HOME_DIR))
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}
