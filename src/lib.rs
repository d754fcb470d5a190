// ============================================================================
// evostore Library
// ============================================================================

//! Embedded object-graph store whose schema evolves with the application.
//!
//! Every store file carries the structural fingerprint of the schema it was
//! written with. At startup the [`PersistenceController`] compares that
//! fingerprint with the current [`SchemaModel`], and when they differ walks the
//! registered mappings to migrate the data into a new store that atomically
//! replaces the old one.
//!
//! # Examples
//!
//! ```no_run
//! use evostore::{
//!     AttributeDescription, AttributeType, ControllerConfig, EntityDescription,
//!     PersistenceController, SchemaModel, VersionRegistry,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let v1 = SchemaModel::builder("v1")
//!     .entity(
//!         EntityDescription::new("Recipe")
//!             .attribute(AttributeDescription::new("name", AttributeType::Text)),
//!     )
//!     .build()?;
//! let v2 = SchemaModel::builder("v2")
//!     .entity(
//!         EntityDescription::new("Recipe")
//!             .attribute(AttributeDescription::new("name", AttributeType::Text))
//!             .attribute(AttributeDescription::new("servings", AttributeType::Integer).with_default(2i64)),
//!     )
//!     .build()?;
//!
//! let mut registry = VersionRegistry::new();
//! registry.add_version(v1)?;
//! let current = registry.add_version(v2)?;
//! registry.add_inferred_mapping("v1", "v2")?;
//!
//! let controller = PersistenceController::new(registry, ControllerConfig::default())?;
//! let mut context = controller.start("recipes.evostore", current)?;
//! let recipe = context.insert("Recipe")?;
//! context.set(recipe, "name", "Pancakes")?;
//! context.save()?;
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod core;
pub mod migration;
pub mod schema;
pub mod storage;

// Re-export main types for convenience
pub use controller::{ControllerConfig, PersistenceController, RecoveryPolicy};
pub use core::{
    AttributeType, ContextError, MappingError, MigrationError, SchemaError, StartupError,
    StoreIoError, Value,
};
pub use migration::{
    AttributeTransform, CancellationToken, CompatibilityChecker, CompatibilityResult,
    EntityMapping, MappingModel, MigrationExecutor, MigrationGraph, MigrationMapper,
    MigrationPlan, RelationshipRule, VersionRegistry,
};
pub use schema::{
    AttributeDescription, Cardinality, DeleteRule, EntityDescription, Fingerprint,
    RelationshipDescription, SchemaModel,
};
pub use storage::{
    DurabilityMode, ObjectGraphContext, ObjectId, StartupOutcome, StoreMetadata,
    StoreMetadataReader,
};
