//! Runtime: the process-scoped object owning database, registry, migrator and loaders.

mod core;
mod layout;
mod options;
mod rt_impl;

pub use self::core::LakeflowRuntime;
pub use layout::FilesystemLayout;
pub use options::{HOME_ENV, LakeflowOptions, PLUGIN_DIR_ENV, REMOTE_PLUGIN_DIR_ENV};
