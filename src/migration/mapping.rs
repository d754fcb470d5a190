use crate::core::{MappingError, Value};
use crate::schema::{EntityDescription, Fingerprint, SchemaModel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// How one destination attribute is produced from a source instance.
///
/// Source attributes that no transform reads are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeTransform {
    /// Copy the source attribute with the same name; types must already agree.
    Copy,
    /// Copy a differently named source attribute.
    Rename { from: String },
    /// Convert a source attribute to the destination attribute's type.
    Coerce { from: String },
    /// Use the destination attribute's default (or null when optional).
    DefaultFill,
    /// Use a fixed value.
    Constant(Value),
    /// Call a registered transform function with the listed source attributes.
    Custom { function: String, inputs: Vec<String> },
}

/// How one destination relationship is populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipRule {
    /// Take the references of a source relationship and remap them to the new identities.
    Follow { from: String },
    /// Leave the relationship empty.
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityMappingKind {
    Transform,
    Insert,
    Delete,
}

/// Mapping of one source entity onto one destination entity.
///
/// `source == None` synthesizes instances, `destination == None` drops them.
/// Destination attributes without a transform are default-filled; destination
/// relationships without a rule are left empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMapping {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeTransform>,
    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipRule>,
    #[serde(default = "default_synthesize")]
    pub synthesize: usize,
}

fn default_synthesize() -> usize {
    1
}

impl EntityMapping {
    pub fn transform(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            destination: Some(destination.into()),
            attributes: BTreeMap::new(),
            relationships: BTreeMap::new(),
            synthesize: default_synthesize(),
        }
    }

    /// Synthesizes `count` default-filled instances of a destination entity.
    pub fn insert(destination: impl Into<String>, count: usize) -> Self {
        Self {
            source: None,
            destination: Some(destination.into()),
            attributes: BTreeMap::new(),
            relationships: BTreeMap::new(),
            synthesize: count,
        }
    }

    pub fn delete(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            destination: None,
            attributes: BTreeMap::new(),
            relationships: BTreeMap::new(),
            synthesize: 0,
        }
    }

    pub fn attribute(mut self, destination: impl Into<String>, transform: AttributeTransform) -> Self {
        self.attributes.insert(destination.into(), transform);
        self
    }

    pub fn relationship(mut self, destination: impl Into<String>, rule: RelationshipRule) -> Self {
        self.relationships.insert(destination.into(), rule);
        self
    }

    pub fn kind(&self) -> Option<EntityMappingKind> {
        match (&self.source, &self.destination) {
            (Some(_), Some(_)) => Some(EntityMappingKind::Transform),
            (None, Some(_)) => Some(EntityMappingKind::Insert),
            (Some(_), None) => Some(EntityMappingKind::Delete),
            (None, None) => None,
        }
    }
}

/// One registered step between two schema versions, addressed by its fingerprint pair.
#[derive(Debug, Clone)]
pub struct MappingModel {
    source: Arc<SchemaModel>,
    destination: Arc<SchemaModel>,
    entity_mappings: Vec<EntityMapping>,
}

impl MappingModel {
    pub fn new(source: Arc<SchemaModel>, destination: Arc<SchemaModel>) -> Self {
        Self {
            source,
            destination,
            entity_mappings: Vec::new(),
        }
    }

    pub fn entity(mut self, mapping: EntityMapping) -> Self {
        self.entity_mappings.push(mapping);
        self
    }

    /// Builds the lightweight mapping between two models.
    ///
    /// Entities, attributes and relationships are matched by name. Attributes whose
    /// type changed are coerced, new attributes are default-filled and entities
    /// missing from the destination are deleted.
    pub fn infer(source: Arc<SchemaModel>, destination: Arc<SchemaModel>) -> Self {
        let mut mappings = Vec::new();

        for name in source.entity_names() {
            let Some(src) = source.entity(name) else {
                continue;
            };
            let Some(dst) = destination.entity(name) else {
                mappings.push(EntityMapping::delete(name));
                continue;
            };

            let mut mapping = EntityMapping::transform(name, name);
            for attribute in &dst.attributes {
                let transform = match src.get_attribute(&attribute.name) {
                    Some(old) if old.attribute_type == attribute.attribute_type => {
                        AttributeTransform::Copy
                    }
                    Some(_) => AttributeTransform::Coerce {
                        from: attribute.name.clone(),
                    },
                    None => AttributeTransform::DefaultFill,
                };
                mapping = mapping.attribute(attribute.name.clone(), transform);
            }
            for relationship in &dst.relationships {
                let rule = match src.get_relationship(&relationship.name) {
                    Some(_) => RelationshipRule::Follow {
                        from: relationship.name.clone(),
                    },
                    None => RelationshipRule::Clear,
                };
                mapping = mapping.relationship(relationship.name.clone(), rule);
            }
            mappings.push(mapping);
        }

        Self {
            source,
            destination,
            entity_mappings: mappings,
        }
    }

    pub fn source(&self) -> &Arc<SchemaModel> {
        &self.source
    }

    pub fn destination(&self) -> &Arc<SchemaModel> {
        &self.destination
    }

    pub fn source_fingerprint(&self) -> Fingerprint {
        self.source.fingerprint()
    }

    pub fn destination_fingerprint(&self) -> Fingerprint {
        self.destination.fingerprint()
    }

    pub fn entity_mappings(&self) -> &[EntityMapping] {
        &self.entity_mappings
    }

    /// Checks every name the mapping refers to against both models.
    pub fn validate(&self) -> Result<(), MappingError> {
        for mapping in &self.entity_mappings {
            let kind = mapping.kind().ok_or_else(|| {
                MappingError::InvalidMapping(
                    "entity mapping has neither source nor destination".to_string(),
                )
            })?;

            let src = match &mapping.source {
                Some(name) => Some(self.source.entity(name).ok_or_else(|| {
                    invalid(format!(
                        "source entity '{}' not in '{}'",
                        name,
                        self.source.version_tag()
                    ))
                })?),
                None => None,
            };
            let dst = match &mapping.destination {
                Some(name) => self.destination.entity(name).ok_or_else(|| {
                    invalid(format!(
                        "destination entity '{}' not in '{}'",
                        name,
                        self.destination.version_tag()
                    ))
                })?,
                None => continue,
            };

            validate_attributes(mapping, src, dst)?;
            validate_relationships(mapping, kind, src, dst)?;
        }
        Ok(())
    }
}

fn invalid(reason: String) -> MappingError {
    MappingError::InvalidMapping(reason)
}

fn validate_attributes(
    mapping: &EntityMapping,
    src: Option<&EntityDescription>,
    dst: &EntityDescription,
) -> Result<(), MappingError> {
    let require_source = |attribute: &str| -> Result<(), MappingError> {
        match src {
            Some(entity) if entity.get_attribute(attribute).is_some() => Ok(()),
            Some(entity) => Err(invalid(format!(
                "source attribute '{}.{}' does not exist",
                entity.name, attribute
            ))),
            None => Err(invalid(format!(
                "insert mapping for '{}' cannot read source attribute '{}'",
                dst.name, attribute
            ))),
        }
    };

    for (name, transform) in &mapping.attributes {
        let attribute = dst.get_attribute(name).ok_or_else(|| {
            invalid(format!(
                "destination attribute '{}.{}' does not exist",
                dst.name, name
            ))
        })?;

        match transform {
            AttributeTransform::Copy => require_source(name)?,
            AttributeTransform::Rename { from } | AttributeTransform::Coerce { from } => {
                require_source(from)?
            }
            AttributeTransform::Custom { inputs, .. } => {
                for input in inputs {
                    require_source(input)?;
                }
            }
            AttributeTransform::Constant(value) => {
                if !attribute.attribute_type.is_compatible(value) {
                    return Err(invalid(format!(
                        "constant for '{}.{}' is {}, expected {}",
                        dst.name,
                        name,
                        value.type_name(),
                        attribute.attribute_type
                    )));
                }
            }
            AttributeTransform::DefaultFill => {}
        }
    }
    Ok(())
}

fn validate_relationships(
    mapping: &EntityMapping,
    kind: EntityMappingKind,
    src: Option<&EntityDescription>,
    dst: &EntityDescription,
) -> Result<(), MappingError> {
    for (name, rule) in &mapping.relationships {
        if dst.get_relationship(name).is_none() {
            return Err(invalid(format!(
                "destination relationship '{}.{}' does not exist",
                dst.name, name
            )));
        }
        let RelationshipRule::Follow { from } = rule else {
            continue;
        };
        match src {
            Some(entity) if entity.get_relationship(from).is_some() => {}
            Some(entity) => {
                return Err(invalid(format!(
                    "source relationship '{}.{}' does not exist",
                    entity.name, from
                )));
            }
            None => {
                debug_assert_eq!(kind, EntityMappingKind::Insert);
                return Err(invalid(format!(
                    "insert mapping for '{}' cannot follow source relationship '{}'",
                    dst.name, from
                )));
            }
        }
    }
    Ok(())
}
