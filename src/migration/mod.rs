//! Version registry, mapping graph and the migration engine.
//!
//! A [`VersionRegistry`] holds every shipped [`SchemaModel`](crate::schema::SchemaModel)
//! and the [`MappingModel`]s between them. At startup it is turned into a
//! [`MigrationGraph`] once; the [`CompatibilityChecker`] and [`MigrationMapper`]
//! work on that graph and the [`MigrationExecutor`] applies the resulting plan.

pub mod checker;
pub mod executor;
pub mod graph;
pub mod mapper;
pub mod mapping;
pub mod registry;

pub use checker::{CompatibilityChecker, CompatibilityResult};
pub use executor::{CancellationToken, MigrationExecutor, backup_path};
pub use graph::MigrationGraph;
pub use mapper::{MigrationMapper, MigrationPlan};
pub use mapping::{
    AttributeTransform, EntityMapping, EntityMappingKind, MappingModel, RelationshipRule,
};
pub use registry::{TransformFn, TransformFunctions, VersionRegistry};
