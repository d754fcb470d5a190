use super::graph::MigrationGraph;
use super::mapping::{EntityMapping, MappingModel};
use crate::core::{MappingError, Value};
use crate::schema::{Fingerprint, SchemaModel};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A custom attribute transform, looked up by id from mapping models.
pub type TransformFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// Registered custom transform functions.
#[derive(Clone, Default)]
pub struct TransformFunctions {
    functions: HashMap<String, TransformFn>,
}

impl TransformFunctions {
    pub fn register<F>(&mut self, id: impl Into<String>, function: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.insert(id.into(), Arc::new(function));
    }

    pub fn get(&self, id: &str) -> Option<&TransformFn> {
        self.functions.get(id)
    }
}

impl fmt::Debug for TransformFunctions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&String> = self.functions.keys().collect();
        ids.sort();
        f.debug_struct("TransformFunctions")
            .field("ids", &ids)
            .finish()
    }
}

/// Developer-supplied history of schema versions and the mappings between them.
#[derive(Debug, Clone, Default)]
pub struct VersionRegistry {
    versions: Vec<Arc<SchemaModel>>,
    mappings: Vec<Arc<MappingModel>>,
    functions: TransformFunctions,
}

impl VersionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema version. Tags and fingerprints must both be unique.
    pub fn add_version(&mut self, model: SchemaModel) -> Result<Arc<SchemaModel>, MappingError> {
        model.validate()?;
        if self
            .versions
            .iter()
            .any(|v| v.version_tag() == model.version_tag() || v.fingerprint() == model.fingerprint())
        {
            return Err(MappingError::DuplicateVersion(model.version_tag().to_string()));
        }
        let model = Arc::new(model);
        self.versions.push(model.clone());
        Ok(model)
    }

    pub fn with_version(mut self, model: SchemaModel) -> Result<Self, MappingError> {
        self.add_version(model)?;
        Ok(self)
    }

    /// Registers a mapping between two registered versions after validating it.
    pub fn add_mapping(&mut self, mapping: MappingModel) -> Result<(), MappingError> {
        for model in [mapping.source(), mapping.destination()] {
            if self.version_by_fingerprint(model.fingerprint()).is_none() {
                return Err(MappingError::UnknownVersion(model.version_tag().to_string()));
            }
        }

        let from = mapping.source_fingerprint();
        let to = mapping.destination_fingerprint();
        if self
            .mappings
            .iter()
            .any(|m| m.source_fingerprint() == from && m.destination_fingerprint() == to)
        {
            return Err(MappingError::DuplicateMapping { from, to });
        }

        mapping.validate()?;
        self.mappings.push(Arc::new(mapping));
        Ok(())
    }

    /// Registers the name-matched lightweight mapping between two tagged versions.
    pub fn add_inferred_mapping(&mut self, from_tag: &str, to_tag: &str) -> Result<(), MappingError> {
        let source = self.require_version(from_tag)?;
        let destination = self.require_version(to_tag)?;
        self.add_mapping(MappingModel::infer(source, destination))
    }

    /// Starts an explicit mapping between two tagged versions.
    pub fn mapping_between(&self, from_tag: &str, to_tag: &str) -> Result<MappingModel, MappingError> {
        Ok(MappingModel::new(
            self.require_version(from_tag)?,
            self.require_version(to_tag)?,
        ))
    }

    pub fn register_function<F>(&mut self, id: impl Into<String>, function: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.register(id, function);
    }

    pub fn functions(&self) -> &TransformFunctions {
        &self.functions
    }

    pub fn versions(&self) -> &[Arc<SchemaModel>] {
        &self.versions
    }

    pub fn mappings(&self) -> &[Arc<MappingModel>] {
        &self.mappings
    }

    pub fn version(&self, tag: &str) -> Option<&Arc<SchemaModel>> {
        self.versions.iter().find(|v| v.version_tag() == tag)
    }

    pub fn version_by_fingerprint(&self, fingerprint: Fingerprint) -> Option<&Arc<SchemaModel>> {
        self.versions.iter().find(|v| v.fingerprint() == fingerprint)
    }

    /// Builds the fingerprint graph used for compatibility checks and path search.
    pub fn graph(&self) -> MigrationGraph {
        MigrationGraph::from_mappings(self.mappings.iter().cloned())
    }

    /// Loads versions and mappings from a bundled JSON resource.
    ///
    /// ```json
    /// { "versions": [ <SchemaModel>, ... ],
    ///   "mappings": [ { "from": "v1", "to": "v2", "inferred": true },
    ///                 { "from": "v2", "to": "v3", "entities": [ <EntityMapping>, ... ] } ] }
    /// ```
    ///
    /// Custom transform functions are code and must be registered afterwards.
    pub fn from_json(json: &str) -> Result<Self, MappingError> {
        let resource: RegistryResource =
            serde_json::from_str(json).map_err(|e| MappingError::Parse(e.to_string()))?;

        let mut registry = Self::new();
        for model in resource.versions {
            registry.add_version(model)?;
        }
        for def in resource.mappings {
            if def.inferred {
                registry.add_inferred_mapping(&def.from, &def.to)?;
                continue;
            }
            let mut mapping = registry.mapping_between(&def.from, &def.to)?;
            for entity in def.entities {
                mapping = mapping.entity(entity);
            }
            registry.add_mapping(mapping)?;
        }
        Ok(registry)
    }

    fn require_version(&self, tag: &str) -> Result<Arc<SchemaModel>, MappingError> {
        self.version(tag)
            .cloned()
            .ok_or_else(|| MappingError::UnknownVersion(tag.to_string()))
    }
}

#[derive(Deserialize)]
struct RegistryResource {
    versions: Vec<SchemaModel>,
    #[serde(default)]
    mappings: Vec<MappingDef>,
}

#[derive(Deserialize)]
struct MappingDef {
    from: String,
    to: String,
    #[serde(default)]
    inferred: bool,
    #[serde(default)]
    entities: Vec<EntityMapping>,
}
