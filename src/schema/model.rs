use super::fingerprint::{Fingerprint, fingerprint_entities};
use crate::core::{AttributeType, SchemaError, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Whether a relationship holds at most one reference or many.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    ToOne,
    ToMany,
}

/// What happens to related objects when the owner of a relationship is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeleteRule {
    /// Remove the reference from the related objects.
    #[default]
    Nullify,
    /// Delete the related objects as well.
    Cascade,
    /// Refuse the delete while related objects exist.
    Deny,
    /// Leave related objects untouched.
    NoAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescription {
    pub name: String,
    pub attribute_type: AttributeType,
    #[serde(default = "default_optional")]
    pub optional: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

fn default_optional() -> bool {
    true
}

impl AttributeDescription {
    /// Attributes are optional unless marked otherwise.
    pub fn new(name: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attribute_type,
            optional: true,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.optional = false;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// The value a freshly synthesized instance receives, if any.
    pub fn initial_value(&self) -> Option<Value> {
        match &self.default {
            Some(value) => Some(value.clone()),
            None if self.optional => Some(Value::Null),
            None => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDescription {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    #[serde(default)]
    pub inverse: Option<String>,
    #[serde(default)]
    pub delete_rule: DeleteRule,
}

impl RelationshipDescription {
    pub fn to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::ToOne,
            inverse: None,
            delete_rule: DeleteRule::Nullify,
        }
    }

    pub fn to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            cardinality: Cardinality::ToMany,
            ..Self::to_one(name, target)
        }
    }

    pub fn inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }

    pub fn delete_rule(mut self, rule: DeleteRule) -> Self {
        self.delete_rule = rule;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescription {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<AttributeDescription>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDescription>,
}

impl EntityDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn attribute(mut self, attribute: AttributeDescription) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn relationship(mut self, relationship: RelationshipDescription) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn get_attribute(&self, name: &str) -> Option<&AttributeDescription> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn get_relationship(&self, name: &str) -> Option<&RelationshipDescription> {
        self.relationships.iter().find(|r| r.name == name)
    }
}

/// Serialized shape of a schema model; validated on the way in.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SchemaModelDef {
    version_tag: String,
    entities: Vec<EntityDescription>,
}

/// Immutable, versioned description of the persisted object model.
///
/// Built through [`SchemaModel::builder`]; construction validates the model and
/// computes its fingerprint once.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "SchemaModelDef", into = "SchemaModelDef")]
pub struct SchemaModel {
    version_tag: String,
    entities: Vec<EntityDescription>,
    fingerprint: Fingerprint,
}

impl SchemaModel {
    pub fn builder(version_tag: impl Into<String>) -> SchemaModelBuilder {
        SchemaModelBuilder {
            version_tag: version_tag.into(),
            entities: Vec::new(),
        }
    }

    pub fn version_tag(&self) -> &str {
        &self.version_tag
    }

    pub fn entities(&self) -> &[EntityDescription] {
        &self.entities
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDescription> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Entity names in ascending order; the canonical iteration order for storage.
    pub fn entity_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entities.iter().map(|e| e.name.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Checks name uniqueness, relationship targets, inverse consistency and defaults.
    pub fn validate(&self) -> Result<(), SchemaError> {
        validate_entities(&self.entities)
    }
}

impl PartialEq for SchemaModel {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl TryFrom<SchemaModelDef> for SchemaModel {
    type Error = SchemaError;

    fn try_from(def: SchemaModelDef) -> Result<Self, Self::Error> {
        SchemaModelBuilder {
            version_tag: def.version_tag,
            entities: def.entities,
        }
        .build()
    }
}

impl From<SchemaModel> for SchemaModelDef {
    fn from(model: SchemaModel) -> Self {
        Self {
            version_tag: model.version_tag,
            entities: model.entities,
        }
    }
}

pub struct SchemaModelBuilder {
    version_tag: String,
    entities: Vec<EntityDescription>,
}

impl SchemaModelBuilder {
    pub fn entity(mut self, entity: EntityDescription) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn build(self) -> Result<SchemaModel, SchemaError> {
        validate_entities(&self.entities)?;
        let fingerprint = fingerprint_entities(&self.entities);
        Ok(SchemaModel {
            version_tag: self.version_tag,
            entities: self.entities,
            fingerprint,
        })
    }
}

fn validate_entities(entities: &[EntityDescription]) -> Result<(), SchemaError> {
    let mut entity_names = HashSet::new();
    for entity in entities {
        if !entity_names.insert(entity.name.as_str()) {
            return Err(SchemaError::DuplicateName {
                scope: "entity".to_string(),
                name: entity.name.clone(),
            });
        }
    }

    for entity in entities {
        // Attributes and relationships share one property namespace.
        let mut property_names = HashSet::new();
        let properties = entity
            .attributes
            .iter()
            .map(|a| a.name.as_str())
            .chain(entity.relationships.iter().map(|r| r.name.as_str()));
        for name in properties {
            if !property_names.insert(name) {
                return Err(SchemaError::DuplicateName {
                    scope: format!("property on entity '{}'", entity.name),
                    name: name.to_string(),
                });
            }
        }

        for attribute in &entity.attributes {
            if let Some(default) = &attribute.default {
                if !attribute.attribute_type.is_compatible(default) {
                    return Err(SchemaError::InvalidDefault {
                        entity: entity.name.clone(),
                        attribute: attribute.name.clone(),
                        reason: format!(
                            "expected {}, got {}",
                            attribute.attribute_type,
                            default.type_name()
                        ),
                    });
                }
            }
        }

        for relationship in &entity.relationships {
            validate_relationship(entities, entity, relationship)?;
        }
    }

    Ok(())
}

fn validate_relationship(
    entities: &[EntityDescription],
    owner: &EntityDescription,
    relationship: &RelationshipDescription,
) -> Result<(), SchemaError> {
    let target = entities
        .iter()
        .find(|e| e.name == relationship.target)
        .ok_or_else(|| SchemaError::UnknownTarget {
            entity: owner.name.clone(),
            relationship: relationship.name.clone(),
            target: relationship.target.clone(),
        })?;

    let Some(inverse_name) = &relationship.inverse else {
        return Ok(());
    };

    let broken = |reason: String| SchemaError::BrokenInverse {
        entity: owner.name.clone(),
        relationship: relationship.name.clone(),
        reason,
    };

    let inverse = target.get_relationship(inverse_name).ok_or_else(|| {
        broken(format!(
            "'{}' has no relationship named '{}'",
            target.name, inverse_name
        ))
    })?;

    if inverse.target != owner.name {
        return Err(broken(format!(
            "'{}.{}' targets '{}' instead of '{}'",
            target.name, inverse.name, inverse.target, owner.name
        )));
    }

    if inverse.inverse.as_deref() != Some(relationship.name.as_str()) {
        return Err(broken(format!(
            "'{}.{}' does not name '{}' as its inverse",
            target.name, inverse.name, relationship.name
        )));
    }

    Ok(())
}
