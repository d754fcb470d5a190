use crate::schema::Fingerprint;
use std::path::PathBuf;
use thiserror::Error;

/// A schema model is malformed. Developer error, surfaced before any disk access.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Duplicate {scope} name '{name}'")]
    DuplicateName { scope: String, name: String },

    #[error("Relationship '{entity}.{relationship}' targets unknown entity '{target}'")]
    UnknownTarget {
        entity: String,
        relationship: String,
        target: String,
    },

    #[error("Relationship '{entity}.{relationship}' has a broken inverse: {reason}")]
    BrokenInverse {
        entity: String,
        relationship: String,
        reason: String,
    },

    #[error("Attribute '{entity}.{attribute}' has an invalid default: {reason}")]
    InvalidDefault {
        entity: String,
        attribute: String,
        reason: String,
    },
}

/// Store file could not be read or written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreIoError {
    #[error("No store at '{}'", .0.display())]
    NotFound(PathBuf),

    #[error("Store is corrupt: {0}")]
    Corrupt(String),

    #[error("Unsupported store format version {found} (supported: {supported})")]
    UnsupportedFormat { found: u16, supported: u16 },

    #[error("Out of disk space")]
    OutOfSpace,

    #[error("I/O error: {0}")]
    Io(String),
}

impl StoreIoError {
    pub(crate) fn from_io(err: std::io::Error, context: &str) -> Self {
        if err.kind() == std::io::ErrorKind::StorageFull {
            return Self::OutOfSpace;
        }
        Self::Io(format!("{}: {}", context, err))
    }
}

/// The version registry is inconsistent. Internal defect, never a user error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("No mapping path from {from} to {to}")]
    NoPath { from: Fingerprint, to: Fingerprint },

    #[error("Mapping graph contains a cycle through {0}")]
    Cycle(Fingerprint),

    #[error("Schema version '{0}' is not registered")]
    UnknownVersion(String),

    #[error("Schema version '{0}' is already registered")]
    DuplicateVersion(String),

    #[error("A mapping from {from} to {to} is already registered")]
    DuplicateMapping { from: Fingerprint, to: Fingerprint },

    #[error("Invalid mapping: {0}")]
    InvalidMapping(String),

    #[error("Registry resource could not be parsed: {0}")]
    Parse(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// A migration failed. The original store is left untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MigrationError {
    #[error("Transform failed for entity '{entity}': {reason}")]
    TransformFailed { entity: String, reason: String },

    #[error("I/O failure during migration: {0}")]
    IoFailure(String),

    #[error("Out of disk space during migration")]
    OutOfSpace,

    #[error("Store is at {found} but the migration plan starts at {expected}")]
    PlanMismatch {
        expected: Fingerprint,
        found: Fingerprint,
    },

    #[error("Migration cancelled before step {step}")]
    Cancelled { step: usize },
}

impl MigrationError {
    pub(crate) fn transform(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TransformFailed {
            entity: entity.into(),
            reason: reason.into(),
        }
    }
}

impl From<StoreIoError> for MigrationError {
    fn from(err: StoreIoError) -> Self {
        match err {
            StoreIoError::OutOfSpace => Self::OutOfSpace,
            other => Self::IoFailure(other.to_string()),
        }
    }
}

/// Misuse of an opened object-graph context.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Entity '{0}' not found")]
    UnknownEntity(String),

    #[error("Attribute '{1}' not found on entity '{0}'")]
    UnknownAttribute(String, String),

    #[error("Relationship '{1}' not found on entity '{0}'")]
    UnknownRelationship(String, String),

    #[error("Object {0} not found")]
    UnknownObject(u64),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Attribute '{1}' on entity '{0}' is required")]
    RequiredAttribute(String, String),

    #[error("Delete denied: {0}")]
    DeleteDenied(String),

    #[error(transparent)]
    Store(#[from] StoreIoError),
}

/// Terminal outcome of `PersistenceController::start`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartupError {
    #[error("Store at {stored} cannot be migrated to the current model {current}")]
    UnmigratableStore {
        stored: Fingerprint,
        current: Fingerprint,
    },

    #[error("Invalid controller configuration: {0}")]
    Config(String),

    #[error("Timed out waiting for another startup on '{}'", .0.display())]
    LockTimeout(PathBuf),

    #[error("Background startup did not complete: {0}")]
    Background(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Store(#[from] StoreIoError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Migration(#[from] MigrationError),
}
