//! Native plugins: dynamic libraries exporting `_lakeflow_plugin_create`.

use std::path::Path;

use libloading::{Library, Symbol};
use walkdir::WalkDir;

use lakeflow_shared::errors::{LakeflowError, LakeflowResult};

use super::activate;
use crate::plugin::{BasicRes, PluginHandle, PluginRegistry};

/// Symbol every native plugin library exports (see [`declare_plugin!`](crate::declare_plugin)).
pub const NATIVE_ENTRY_SYMBOL: &str = "_lakeflow_plugin_create";

type CreatePluginFn = unsafe extern "C" fn() -> PluginHandle;

/// Load every dynamic library under `dir`, returning how many were registered.
///
/// Opened libraries are pushed to `libraries`, which must outlive `registry` and every
/// handle taken from it. This holds on the error path too.
pub async fn load_native_plugins(
    dir: &Path,
    registry: &PluginRegistry,
    res: &BasicRes,
    libraries: &mut Vec<Library>,
) -> LakeflowResult<usize> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.map_err(|e| LakeflowError::PluginLoad {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        let path = entry.path();
        if entry.file_type().is_file()
            && path.extension().and_then(|e| e.to_str()) == Some(std::env::consts::DLL_EXTENSION)
        {
            paths.push(path.to_path_buf());
        }
    }
    paths.sort();

    for path in &paths {
        let name = plugin_name_from_path(path)?;
        tracing::debug!(plugin = %name, path = %path.display(), "Loading native plugin");

        let (library, plugin) = open_library(path)?;
        libraries.push(library);
        activate(registry, res, &name, plugin, &path.display().to_string()).await?;
    }
    Ok(paths.len())
}

fn plugin_name_from_path(path: &Path) -> LakeflowResult<String> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| LakeflowError::PluginLoad {
            path: path.display().to_string(),
            reason: "file name is not valid UTF-8".to_string(),
        })?;
    let name = stem.strip_prefix("lib").unwrap_or(stem);
    if name.is_empty() {
        return Err(LakeflowError::PluginLoad {
            path: path.display().to_string(),
            reason: "cannot derive a plugin name".to_string(),
        });
    }
    Ok(name.to_string())
}

fn open_library(path: &Path) -> LakeflowResult<(Library, PluginHandle)> {
    let load_err = |reason: String| LakeflowError::PluginLoad {
        path: path.display().to_string(),
        reason,
    };

    // SAFETY: loading runs the library's initializers; plugin directories are trusted
    // configuration and libraries must be built against this crate's version.
    let library = unsafe { Library::new(path) }.map_err(|e| load_err(e.to_string()))?;
    let plugin = {
        // SAFETY: the symbol type matches what `declare_plugin!` exports.
        let create: Symbol<CreatePluginFn> = unsafe { library.get(NATIVE_ENTRY_SYMBOL.as_bytes()) }
            .map_err(|e| load_err(format!("missing symbol {NATIVE_ENTRY_SYMBOL}: {e}")))?;
        unsafe { create() }
    };
    Ok((library, plugin))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::runtime::LakeflowOptions;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_plugin_name_from_path() {
        assert_eq!(
            plugin_name_from_path(Path::new("/plugins/jira/libjira.so")).unwrap(),
            "jira"
        );
        assert_eq!(
            plugin_name_from_path(Path::new("/plugins/gitlab.dll")).unwrap(),
            "gitlab"
        );
        assert!(plugin_name_from_path(Path::new("/plugins/lib.so")).is_err());
    }

    fn resources(dir: &TempDir) -> BasicRes {
        let db = Database::open(&dir.path().join("db").join("lakeflow.db")).unwrap();
        BasicRes::new(db, Arc::new(LakeflowOptions::default()))
    }

    #[tokio::test]
    async fn test_invalid_library_aborts_pass() {
        let dir = TempDir::new().unwrap();
        let plugins = dir.path().join("plugins");
        std::fs::create_dir(&plugins).unwrap();
        let bogus = plugins.join(format!("libbogus.{}", std::env::consts::DLL_EXTENSION));
        std::fs::write(&bogus, b"not a library").unwrap();
        std::fs::write(plugins.join("README.md"), b"ignored").unwrap();

        let res = resources(&dir);
        let registry = PluginRegistry::new();
        let mut libraries = Vec::new();

        let err = load_native_plugins(&plugins, &registry, &res, &mut libraries)
            .await
            .unwrap_err();
        assert!(matches!(err, LakeflowError::PluginLoad { .. }));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_directory_without_libraries() {
        let dir = TempDir::new().unwrap();
        let plugins = dir.path().join("plugins");
        std::fs::create_dir(&plugins).unwrap();
        std::fs::write(plugins.join("notes.txt"), b"ignored").unwrap();

        let res = resources(&dir);
        let registry = PluginRegistry::new();
        let mut libraries = Vec::new();

        let loaded = load_native_plugins(&plugins, &registry, &res, &mut libraries)
            .await
            .unwrap();
        assert_eq!(loaded, 0);
        assert!(libraries.is_empty());
    }

    #[tokio::test]
    async fn test_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let res = resources(&dir);
        let registry = PluginRegistry::new();
        let mut libraries = Vec::new();

        let result =
            load_native_plugins(&dir.path().join("absent"), &registry, &res, &mut libraries).await;
        assert!(matches!(result, Err(LakeflowError::PluginLoad { .. })));
    }
}
