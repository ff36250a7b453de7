//! Remote plugins: directories holding a `run.sh` launcher.

use std::path::Path;
use std::sync::Arc;

use walkdir::WalkDir;

use lakeflow_shared::errors::{LakeflowError, LakeflowResult};
use lakeflow_shared::protocol::LAUNCHER_FILE;

use super::activate;
use crate::plugin::remote::RemotePlugin;
use crate::plugin::{BasicRes, Plugin, PluginRegistry};

/// Discover every launcher under `dir` and register its plugin under the name it
/// declares in `plugin-info`.
pub async fn load_remote_plugins(
    dir: &Path,
    registry: &PluginRegistry,
    res: &BasicRes,
) -> LakeflowResult<usize> {
    let mut plugin_dirs = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.map_err(|e| LakeflowError::PluginLoad {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        if entry.file_type().is_file()
            && entry.file_name() == LAUNCHER_FILE
            && let Some(parent) = entry.path().parent()
        {
            plugin_dirs.push(parent.to_path_buf());
        }
    }
    plugin_dirs.sort();

    for plugin_dir in &plugin_dirs {
        tracing::debug!(path = %plugin_dir.display(), "Loading remote plugin");
        let plugin = RemotePlugin::discover(plugin_dir).await?;
        let name = plugin.name().to_string();
        activate(
            registry,
            res,
            &name,
            Arc::new(plugin),
            &plugin_dir.display().to_string(),
        )
        .await?;
    }
    Ok(plugin_dirs.len())
}
