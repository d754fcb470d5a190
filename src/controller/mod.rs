//! Startup orchestration.
//!
//! [`PersistenceController::start`] is the one call an application makes: it
//! reads the store header, decides compatibility, migrates when the registry
//! allows it and hands back a ready [`ObjectGraphContext`].

pub mod config;
mod lock;

pub use config::{ControllerConfig, RecoveryPolicy};

use crate::core::{StartupError, StoreIoError};
use crate::migration::{
    CancellationToken, CompatibilityChecker, CompatibilityResult, MigrationExecutor,
    MigrationGraph, MigrationMapper, VersionRegistry, backup_path,
};
use crate::schema::SchemaModel;
use crate::storage::{
    ObjectGraphContext, StartupOutcome, StoreContents, StoreMetadata, StoreMetadataReader,
    read_store, write_store,
};
use lock::StoreLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, event, info_span};

/// Owns the version registry and opens stores against the current model.
///
/// The migration graph is built once, here. At most one `start()` runs per
/// store location at a time within the process; a second caller blocks until
/// the first returns and then sees the already-migrated store.
#[derive(Debug)]
pub struct PersistenceController {
    registry: VersionRegistry,
    graph: MigrationGraph,
    config: ControllerConfig,
}

impl PersistenceController {
    pub fn new(registry: VersionRegistry, config: ControllerConfig) -> Result<Self, StartupError> {
        config.validate().map_err(StartupError::Config)?;
        let graph = registry.graph();
        event!(
            Level::DEBUG,
            versions = registry.versions().len(),
            mapped_versions = graph.node_count(),
            mappings = graph.edge_count(),
            "persistence controller ready"
        );
        Ok(Self {
            registry,
            graph,
            config,
        })
    }

    pub fn registry(&self) -> &VersionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Opens (creating or migrating as needed) the store at `location` for `model`.
    pub fn start(
        &self,
        location: impl AsRef<Path>,
        model: impl Into<Arc<SchemaModel>>,
    ) -> Result<ObjectGraphContext, StartupError> {
        self.run(location.as_ref(), model.into(), None)
    }

    /// Like [`start`](Self::start), but a migration stops before its next step once
    /// `cancel` is set. The store stays at its original version in that case.
    pub fn start_with_cancel(
        &self,
        location: impl AsRef<Path>,
        model: impl Into<Arc<SchemaModel>>,
        cancel: &CancellationToken,
    ) -> Result<ObjectGraphContext, StartupError> {
        self.run(location.as_ref(), model.into(), Some(cancel))
    }

    /// Runs [`start`](Self::start) on tokio's blocking pool.
    pub async fn start_background(
        self: Arc<Self>,
        location: impl Into<PathBuf>,
        model: impl Into<Arc<SchemaModel>>,
    ) -> Result<ObjectGraphContext, StartupError> {
        let location = location.into();
        let model = model.into();
        tokio::task::spawn_blocking(move || self.start(&location, model))
            .await
            .map_err(|e| StartupError::Background(e.to_string()))?
    }

    /// Whether opening `location` with `model` would run a migration.
    ///
    /// Reads only the store header. A missing store needs no migration; a store
    /// with no path to `model` is an error unless the recovery policy recreates it.
    pub fn migration_required(
        &self,
        location: impl AsRef<Path>,
        model: &SchemaModel,
    ) -> Result<bool, StartupError> {
        model.validate()?;
        let metadata = match StoreMetadataReader::read_metadata(location.as_ref()) {
            Ok(metadata) => metadata,
            Err(StoreIoError::NotFound(_)) => return Ok(false),
            Err(err) => return Err(err.into()),
        };

        let current = model.fingerprint();
        match CompatibilityChecker::check(metadata.fingerprint, current, &self.graph) {
            CompatibilityResult::Compatible => Ok(false),
            CompatibilityResult::NeedsMigration => Ok(true),
            CompatibilityResult::Incompatible => match self.config.on_incompatible {
                RecoveryPolicy::Recreate => Ok(false),
                RecoveryPolicy::Fail => Err(StartupError::UnmigratableStore {
                    stored: metadata.fingerprint,
                    current,
                }),
            },
        }
    }

    fn run(
        &self,
        location: &Path,
        model: Arc<SchemaModel>,
        cancel: Option<&CancellationToken>,
    ) -> Result<ObjectGraphContext, StartupError> {
        model.validate()?;

        let span = info_span!(
            "store.start",
            path = %location.display(),
            version = %model.version_tag()
        );
        let _enter = span.enter();

        let lock = StoreLock::acquire(location, self.config.lock_timeout)
            .ok_or_else(|| StartupError::LockTimeout(location.to_path_buf()))?;
        event!(Level::DEBUG, key = %lock.path().display(), "store location locked");

        let metadata = match StoreMetadataReader::read_metadata(location) {
            Ok(metadata) => metadata,
            Err(StoreIoError::NotFound(_)) => {
                event!(Level::INFO, "no store found, creating");
                return self.create(location, model, StartupOutcome::Created);
            }
            Err(err) => return self.recover_unreadable(location, model, err),
        };

        let current = model.fingerprint();
        let compatibility = CompatibilityChecker::check(metadata.fingerprint, current, &self.graph);
        event!(
            Level::INFO,
            stored = %metadata.schema_version_tag,
            compatibility = %compatibility,
            "store version checked"
        );

        match compatibility {
            CompatibilityResult::Compatible => self.open(location, model, StartupOutcome::Opened),
            CompatibilityResult::NeedsMigration => {
                let plan = MigrationMapper::resolve_plan(metadata.fingerprint, current, &self.graph)
                    .inspect_err(|err| {
                        event!(Level::ERROR, error = %err, "migration plan resolution failed");
                    })?;

                let mut executor = MigrationExecutor::new(self.registry.functions().clone())
                    .durability(self.config.durability)
                    .keep_backup(self.config.keep_backup);
                if let Some(token) = cancel {
                    executor = executor.cancellation(token.clone());
                }
                executor.execute(location, &plan)?;

                self.open(location, model, StartupOutcome::Migrated { steps: plan.len() })
            }
            CompatibilityResult::Incompatible => match self.config.on_incompatible {
                RecoveryPolicy::Recreate => {
                    event!(
                        Level::WARN,
                        stored = %metadata.fingerprint.short(),
                        "store has no migration path, recreating"
                    );
                    self.recreate(location, model)
                }
                RecoveryPolicy::Fail => {
                    event!(Level::ERROR, stored = %metadata.fingerprint.short(), "store is unmigratable");
                    Err(StartupError::UnmigratableStore {
                        stored: metadata.fingerprint,
                        current,
                    })
                }
            },
        }
    }

    fn open(
        &self,
        location: &Path,
        model: Arc<SchemaModel>,
        outcome: StartupOutcome,
    ) -> Result<ObjectGraphContext, StartupError> {
        let (metadata, contents) = match read_store(location) {
            Ok(store) => store,
            Err(err) => return self.recover_unreadable(location, model, err),
        };
        if metadata.fingerprint != model.fingerprint() {
            return Err(StoreIoError::Corrupt(format!(
                "store is at {} after opening, expected {}",
                metadata.fingerprint.short(),
                model.fingerprint().short()
            ))
            .into());
        }

        event!(Level::INFO, objects = contents.instance_count(), "store opened");
        Ok(ObjectGraphContext::new(
            location.to_path_buf(),
            model,
            metadata,
            contents,
            self.config.durability,
            outcome,
        ))
    }

    fn create(
        &self,
        location: &Path,
        model: Arc<SchemaModel>,
        outcome: StartupOutcome,
    ) -> Result<ObjectGraphContext, StartupError> {
        let metadata = StoreMetadata::for_model(&model);
        let contents = StoreContents::default();
        write_store(location, &metadata, &contents, self.config.durability)?;
        event!(Level::INFO, fingerprint = %metadata.fingerprint.short(), "store created");

        Ok(ObjectGraphContext::new(
            location.to_path_buf(),
            model,
            metadata,
            contents,
            self.config.durability,
            outcome,
        ))
    }

    fn recreate(
        &self,
        location: &Path,
        model: Arc<SchemaModel>,
    ) -> Result<ObjectGraphContext, StartupError> {
        if self.config.keep_backup {
            std::fs::copy(location, backup_path(location))
                .map_err(|e| StoreIoError::from_io(e, "write store backup"))?;
        }
        self.create(location, model, StartupOutcome::Recreated)
    }

    /// Corrupt or unsupported stores go through `on_corrupt`; other I/O errors propagate.
    fn recover_unreadable(
        &self,
        location: &Path,
        model: Arc<SchemaModel>,
        err: StoreIoError,
    ) -> Result<ObjectGraphContext, StartupError> {
        let unreadable = matches!(
            err,
            StoreIoError::Corrupt(_) | StoreIoError::UnsupportedFormat { .. }
        );
        if unreadable && self.config.on_corrupt == RecoveryPolicy::Recreate {
            event!(Level::WARN, error = %err, "store is unreadable, recreating");
            return self.recreate(location, model);
        }
        event!(Level::ERROR, error = %err, "store could not be read");
        Err(err.into())
    }
}
