use std::collections::HashMap;
use std::sync::Arc;

use libloading::Library;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use lakeflow_shared::errors::{LakeflowError, LakeflowResult};

use crate::db::Database;
use crate::db::schema::{FRAMEWORK_COMPONENT, framework_migrations};
use crate::logging::init_logging_for;
use crate::migration::Migrator;
use crate::models::PipelineId;
use crate::plugin::loader::{load_builtin_plugins, load_native_plugins, load_remote_plugins};
use crate::plugin::{BasicRes, PluginHandle, PluginRegistry};
use crate::runtime::layout::FilesystemLayout;
use crate::runtime::options::LakeflowOptions;
use crate::task::{ProgressBoard, TaskRunner};

/// Shared runtime state. Cloning the public runtime clones this `Arc`.
pub type RuntimeInner = Arc<RuntimeInnerImpl>;

/// Runtime inner implementation.
///
/// Everything is immutable after construction or internally synchronized:
/// - `registry` and `migrator` carry their own locks
/// - `cancellations` maps running pipelines to the token their tasks observe
pub struct RuntimeInnerImpl {
    pub(crate) options: Arc<LakeflowOptions>,
    pub(crate) layout: FilesystemLayout,
    pub(crate) db: Database,
    pub(crate) registry: Arc<PluginRegistry>,
    pub(crate) migrator: Migrator,
    pub(crate) res: BasicRes,
    pub(crate) progress: Arc<ProgressBoard>,
    pub(crate) task_runner: Arc<TaskRunner>,
    pub(crate) cancellations: Mutex<HashMap<PipelineId, CancellationToken>>,

    /// Native plugin libraries. Declared last so they are unmapped after every
    /// handle above has been dropped.
    _libraries: Vec<Library>,
}

impl RuntimeInnerImpl {
    /// Set up the home directory, logging, database and plugins.
    ///
    /// Plugins are loaded in a fixed order (builtin, native, remote). Their migration
    /// scripts are registered after the framework's own, in registry order, and
    /// applied right away when `auto_migrate` is set.
    pub async fn new(options: LakeflowOptions) -> LakeflowResult<RuntimeInner> {
        if !options.home_dir.is_absolute() {
            return Err(LakeflowError::Config(format!(
                "home_dir must be absolute path, got: {}",
                options.home_dir.display()
            )));
        }

        let layout = FilesystemLayout::new(options.home_dir.clone());
        layout.prepare().map_err(|e| {
            LakeflowError::Storage(format!(
                "Failed to initialize filesystem at {}: {}",
                layout.home_dir().display(),
                e
            ))
        })?;

        if options.init_logging {
            init_logging_for(&layout)?;
        }

        let db_path = options.database_path();
        let db = Database::open(&db_path).map_err(|e| {
            LakeflowError::Storage(format!(
                "Failed to initialize database at {}: {}",
                db_path.display(),
                e
            ))
        })?;

        let migrator = Migrator::new();
        migrator.init(db.clone())?;

        let options = Arc::new(options);
        let res = BasicRes::new(db.clone(), options.clone());

        // Must be declared before the registry: on an early return the registry,
        // and the plugin handles inside it, drop first.
        let mut libraries = Vec::new();
        let registry = Arc::new(PluginRegistry::new());

        let builtin = load_builtin_plugins(&registry, &res).await?;
        let native = match scan_dir(options.plugin_dir.as_deref(), "plugin_dir") {
            Some(dir) => load_native_plugins(dir, &registry, &res, &mut libraries).await?,
            None => 0,
        };
        let remote = match scan_dir(options.remote_plugin_dir.as_deref(), "remote_plugin_dir") {
            Some(dir) => load_remote_plugins(dir, &registry, &res).await?,
            None => 0,
        };
        tracing::info!(builtin, native, remote, "Plugins loaded");

        migrator.register(FRAMEWORK_COMPONENT, framework_migrations())?;
        for name in registry.names() {
            register_migrations(&migrator, &name, &registry.get(&name)?)?;
        }
        if options.auto_migrate {
            migrator.execute()?;
        }

        let progress = Arc::new(ProgressBoard::new());
        let task_runner = Arc::new(TaskRunner::new(
            registry.clone(),
            res.clone(),
            progress.clone(),
        ));

        let inner = Arc::new(Self {
            options,
            layout,
            db,
            registry,
            migrator,
            res,
            progress,
            task_runner,
            cancellations: Mutex::new(HashMap::new()),
            _libraries: libraries,
        });

        tracing::debug!(home = %inner.layout.home_dir().display(), "initialized runtime");
        Ok(inner)
    }

    /// Token observed by every task of `pipeline_id`. The flag is true when this
    /// call created it, in which case the caller must [`release_token`](Self::release_token).
    pub(crate) fn acquire_token(&self, pipeline_id: PipelineId) -> (CancellationToken, bool) {
        let mut tokens = self.cancellations.lock();
        if let Some(token) = tokens.get(&pipeline_id) {
            return (token.clone(), false);
        }
        let token = CancellationToken::new();
        tokens.insert(pipeline_id, token.clone());
        (token, true)
    }

    pub(crate) fn release_token(&self, pipeline_id: PipelineId) {
        self.cancellations.lock().remove(&pipeline_id);
    }

    pub(crate) fn cancel_token(&self, pipeline_id: PipelineId) -> bool {
        match self.cancellations.lock().get(&pipeline_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Queue the migration scripts of `plugin`, if it has any.
pub(crate) fn register_migrations(
    migrator: &Migrator,
    name: &str,
    plugin: &PluginHandle,
) -> LakeflowResult<()> {
    if let Some(migration) = plugin.as_migration() {
        let scripts = migration.migration_scripts();
        if !scripts.is_empty() {
            tracing::debug!(plugin = %name, scripts = scripts.len(), "Registering plugin migrations");
            migrator.register(name, scripts)?;
        }
    }
    Ok(())
}

fn scan_dir<'a>(dir: Option<&'a std::path::Path>, setting: &str) -> Option<&'a std::path::Path> {
    let dir = dir?;
    if dir.is_dir() {
        Some(dir)
    } else {
        tracing::warn!(setting, path = %dir.display(), "Plugin directory does not exist, skipping");
        None
    }
}
