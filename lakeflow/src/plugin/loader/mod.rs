//! Plugin discovery and activation.
//!
//! Every pass ends the same way: check the handle's name, run its init capability
//! with the shared resources, register it. Any failure aborts the whole pass.

mod native;
mod remote;

use lakeflow_shared::errors::{LakeflowError, LakeflowResult};

use super::builtin::builtin_plugins;
use super::{BasicRes, PluginHandle, PluginRegistry};

pub use native::{NATIVE_ENTRY_SYMBOL, load_native_plugins};
pub use remote::load_remote_plugins;

/// Register every plugin submitted with `register_builtin_plugin!`.
pub async fn load_builtin_plugins(
    registry: &PluginRegistry,
    res: &BasicRes,
) -> LakeflowResult<usize> {
    let mut loaded = 0;
    for builtin in builtin_plugins() {
        let plugin = (builtin.create)();
        activate(registry, res, builtin.name, plugin, "builtin").await?;
        loaded += 1;
    }
    Ok(loaded)
}

pub(crate) async fn activate(
    registry: &PluginRegistry,
    res: &BasicRes,
    name: &str,
    plugin: PluginHandle,
    source: &str,
) -> LakeflowResult<()> {
    if plugin.name().trim().is_empty() {
        return Err(LakeflowError::PluginLoad {
            path: source.to_string(),
            reason: format!("plugin {name} reports an empty name"),
        });
    }
    if let Some(init) = plugin.as_init() {
        init.init(res).await?;
    }
    registry.register(name, plugin)?;
    tracing::info!(plugin = %name, source, "Loaded plugin");
    Ok(())
}
