//! Compiled-in plugins, collected at link time.

use super::PluginHandle;

/// A plugin compiled into the binary.
///
/// Submitted with [`register_builtin_plugin!`](crate::register_builtin_plugin) and
/// picked up by the runtime before any native or remote plugin is loaded.
pub struct BuiltinPlugin {
    pub name: &'static str,
    pub create: fn() -> PluginHandle,
}

impl BuiltinPlugin {
    pub const fn new(name: &'static str, create: fn() -> PluginHandle) -> Self {
        Self { name, create }
    }
}

inventory::collect!(BuiltinPlugin);

pub(crate) fn builtin_plugins() -> impl Iterator<Item = &'static BuiltinPlugin> {
    inventory::iter::<BuiltinPlugin>.into_iter()
}

/// Submit a compiled-in plugin.
///
/// ```ignore
/// fn create_dora() -> lakeflow::plugin::PluginHandle {
///     std::sync::Arc::new(DoraPlugin)
/// }
/// lakeflow::register_builtin_plugin!("dora", create_dora);
/// ```
#[macro_export]
macro_rules! register_builtin_plugin {
    ($name:expr, $create:path) => {
        $crate::inventory::submit! {
            $crate::plugin::BuiltinPlugin::new($name, $create)
        }
    };
}
