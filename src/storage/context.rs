use super::format::{
    DurabilityMode, ObjectId, StoreContents, StoreMetadata, StoredObject, write_store,
};
use crate::core::{ContextError, Value};
use crate::schema::{Cardinality, DeleteRule, EntityDescription, SchemaModel};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, event};

/// How the store behind a context came to be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupOutcome {
    /// No store existed; a fresh empty one was created.
    Created,
    /// The store already matched the current model.
    Opened,
    /// The store was migrated through `steps` mappings.
    Migrated { steps: usize },
    /// The previous store was discarded on the caller's recovery policy.
    Recreated,
}

/// Live handle to the persisted object graph.
///
/// Changes stay in memory until [`ObjectGraphContext::save`] atomically rewrites
/// the store file. The context is single-owner.
#[derive(Debug)]
pub struct ObjectGraphContext {
    path: PathBuf,
    model: Arc<SchemaModel>,
    metadata: StoreMetadata,
    contents: StoreContents,
    index: HashMap<ObjectId, String>,
    durability: DurabilityMode,
    outcome: StartupOutcome,
    dirty: bool,
}

impl ObjectGraphContext {
    pub(crate) fn new(
        path: PathBuf,
        model: Arc<SchemaModel>,
        metadata: StoreMetadata,
        contents: StoreContents,
        durability: DurabilityMode,
        outcome: StartupOutcome,
    ) -> Self {
        let index = contents
            .entities
            .iter()
            .flat_map(|(entity, objects)| objects.keys().map(move |id| (*id, entity.clone())))
            .collect();

        Self {
            path,
            model,
            metadata,
            contents,
            index,
            durability,
            outcome,
            dirty: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn model(&self) -> &SchemaModel {
        &self.model
    }

    pub fn metadata(&self) -> &StoreMetadata {
        &self.metadata
    }

    pub fn startup_outcome(&self) -> StartupOutcome {
        self.outcome
    }

    pub fn has_changes(&self) -> bool {
        self.dirty
    }

    /// Inserts an instance with every attribute at its default.
    pub fn insert(&mut self, entity: &str) -> Result<ObjectId, ContextError> {
        self.insert_with(entity, Vec::<(&str, Value)>::new())
    }

    /// Inserts an instance, taking explicit attribute values over defaults.
    pub fn insert_with<I, K>(&mut self, entity: &str, values: I) -> Result<ObjectId, ContextError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let description = self.entity_description(entity)?;
        let mut provided: HashMap<String, Value> =
            values.into_iter().map(|(k, v)| (k.into(), v)).collect();

        let mut object = StoredObject::default();
        for attribute in &description.attributes {
            let value = match provided.remove(&attribute.name) {
                Some(value) => check_attribute_value(description, &attribute.name, value)?,
                None => attribute.initial_value().ok_or_else(|| {
                    ContextError::RequiredAttribute(entity.to_string(), attribute.name.clone())
                })?,
            };
            object.attributes.insert(attribute.name.clone(), value);
        }
        if let Some(unknown) = provided.into_keys().next() {
            return Err(ContextError::UnknownAttribute(entity.to_string(), unknown));
        }
        for relationship in &description.relationships {
            object
                .relationships
                .insert(relationship.name.clone(), Vec::new());
        }

        let id = self.contents.allocate_id();
        self.contents
            .entities
            .entry(entity.to_string())
            .or_default()
            .insert(id, object);
        self.index.insert(id, entity.to_string());
        self.dirty = true;
        Ok(id)
    }

    pub fn entity_of(&self, id: ObjectId) -> Result<&str, ContextError> {
        self.index
            .get(&id)
            .map(|s| s.as_str())
            .ok_or(ContextError::UnknownObject(id.0))
    }

    pub fn get(&self, id: ObjectId, attribute: &str) -> Result<&Value, ContextError> {
        let (entity, object) = self.object(id)?;
        object
            .attributes
            .get(attribute)
            .ok_or_else(|| ContextError::UnknownAttribute(entity.to_string(), attribute.to_string()))
    }

    pub fn set(
        &mut self,
        id: ObjectId,
        attribute: &str,
        value: impl Into<Value>,
    ) -> Result<(), ContextError> {
        let entity = self.entity_of(id)?.to_string();
        let description = self.entity_description(&entity)?;
        let value = check_attribute_value(description, attribute, value.into())?;

        let object = self.object_mut(id)?;
        object.attributes.insert(attribute.to_string(), value);
        self.dirty = true;
        Ok(())
    }

    /// Ids of all instances of `entity`, in identity order.
    pub fn fetch(&self, entity: &str) -> Result<Vec<ObjectId>, ContextError> {
        self.entity_description(entity)?;
        Ok(self
            .contents
            .entities
            .get(entity)
            .map(|objects| objects.keys().copied().collect())
            .unwrap_or_default())
    }

    pub fn count(&self, entity: &str) -> Result<usize, ContextError> {
        self.entity_description(entity)?;
        Ok(self
            .contents
            .entities
            .get(entity)
            .map(|objects| objects.len())
            .unwrap_or(0))
    }

    pub fn related(&self, id: ObjectId, relationship: &str) -> Result<Vec<ObjectId>, ContextError> {
        let (entity, object) = self.object(id)?;
        self.entity_description(entity)?
            .get_relationship(relationship)
            .ok_or_else(|| {
                ContextError::UnknownRelationship(entity.to_string(), relationship.to_string())
            })?;
        Ok(object
            .relationships
            .get(relationship)
            .cloned()
            .unwrap_or_default())
    }

    /// Links `source.relationship` to `target`, keeping the inverse side in step.
    ///
    /// On a to-one relationship the previous partner is unlinked first.
    pub fn relate(
        &mut self,
        source: ObjectId,
        relationship: &str,
        target: ObjectId,
    ) -> Result<(), ContextError> {
        let (cardinality, inverse) = self.check_link(source, relationship, target)?;

        if cardinality == Cardinality::ToOne {
            for previous in self.refs(source, relationship) {
                if previous != target {
                    self.unrelate(source, relationship, previous)?;
                }
            }
        }
        self.add_ref(source, relationship, target)?;

        if let Some(inverse) = inverse {
            let inverse_cardinality = self
                .entity_description(self.entity_of(target)?)?
                .get_relationship(&inverse)
                .map(|r| r.cardinality);
            if inverse_cardinality == Some(Cardinality::ToOne) {
                for previous in self.refs(target, &inverse) {
                    if previous != source {
                        self.unrelate(target, &inverse, previous)?;
                    }
                }
            }
            self.add_ref(target, &inverse, source)?;
        }

        self.dirty = true;
        Ok(())
    }

    pub fn unrelate(
        &mut self,
        source: ObjectId,
        relationship: &str,
        target: ObjectId,
    ) -> Result<(), ContextError> {
        let (_, inverse) = self.check_link(source, relationship, target)?;
        self.remove_ref(source, relationship, target)?;
        if let Some(inverse) = inverse {
            self.remove_ref(target, &inverse, source)?;
        }
        self.dirty = true;
        Ok(())
    }

    /// Deletes an instance, applying the delete rules of its relationships.
    ///
    /// Cascades are followed transitively; a `Deny` rule with live references
    /// aborts the whole delete before anything is removed. References to deleted
    /// objects are stripped from every survivor.
    pub fn delete(&mut self, id: ObjectId) -> Result<Vec<ObjectId>, ContextError> {
        self.entity_of(id)?;

        let mut doomed = BTreeSet::new();
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            if !doomed.insert(current) {
                continue;
            }
            let (entity, object) = self.object(current)?;
            let description = self.entity_description(entity)?;
            for relationship in &description.relationships {
                if relationship.delete_rule == DeleteRule::Cascade {
                    if let Some(refs) = object.relationships.get(&relationship.name) {
                        queue.extend(refs.iter().copied());
                    }
                }
            }
        }

        for current in &doomed {
            let (entity, object) = self.object(*current)?;
            let description = self.entity_description(entity)?;
            for relationship in &description.relationships {
                if relationship.delete_rule != DeleteRule::Deny {
                    continue;
                }
                let blocking = object
                    .relationships
                    .get(&relationship.name)
                    .map(|refs| refs.iter().any(|r| !doomed.contains(r)))
                    .unwrap_or(false);
                if blocking {
                    return Err(ContextError::DeleteDenied(format!(
                        "{} {}.{} still has related objects",
                        current, entity, relationship.name
                    )));
                }
            }
        }

        for current in &doomed {
            if let Some(entity) = self.index.remove(current) {
                if let Some(objects) = self.contents.entities.get_mut(&entity) {
                    objects.remove(current);
                }
            }
        }
        for objects in self.contents.entities.values_mut() {
            for object in objects.values_mut() {
                for refs in object.relationships.values_mut() {
                    refs.retain(|r| !doomed.contains(r));
                }
            }
        }

        event!(Level::DEBUG, deleted = doomed.len(), "context objects deleted");
        self.dirty = true;
        Ok(doomed.into_iter().collect())
    }

    /// Atomically rewrites the store file. Metadata is written unchanged.
    pub fn save(&mut self) -> Result<(), ContextError> {
        if !self.dirty {
            return Ok(());
        }
        write_store(&self.path, &self.metadata, &self.contents, self.durability)?;
        self.dirty = false;
        event!(
            Level::DEBUG,
            path = %self.path.display(),
            objects = self.contents.instance_count(),
            "context saved"
        );
        Ok(())
    }

    fn entity_description(&self, entity: &str) -> Result<&EntityDescription, ContextError> {
        self.model
            .entity(entity)
            .ok_or_else(|| ContextError::UnknownEntity(entity.to_string()))
    }

    fn object(&self, id: ObjectId) -> Result<(&str, &StoredObject), ContextError> {
        let entity = self.entity_of(id)?;
        self.contents
            .entities
            .get(entity)
            .and_then(|objects| objects.get(&id))
            .map(|object| (entity, object))
            .ok_or(ContextError::UnknownObject(id.0))
    }

    fn object_mut(&mut self, id: ObjectId) -> Result<&mut StoredObject, ContextError> {
        let entity = self
            .index
            .get(&id)
            .ok_or(ContextError::UnknownObject(id.0))?;
        self.contents
            .entities
            .get_mut(entity)
            .and_then(|objects| objects.get_mut(&id))
            .ok_or(ContextError::UnknownObject(id.0))
    }

    fn check_link(
        &self,
        source: ObjectId,
        relationship: &str,
        target: ObjectId,
    ) -> Result<(Cardinality, Option<String>), ContextError> {
        let source_entity = self.entity_of(source)?;
        let target_entity = self.entity_of(target)?;
        let description = self
            .entity_description(source_entity)?
            .get_relationship(relationship)
            .ok_or_else(|| {
                ContextError::UnknownRelationship(
                    source_entity.to_string(),
                    relationship.to_string(),
                )
            })?;
        if description.target != target_entity {
            return Err(ContextError::TypeMismatch(format!(
                "{}.{} expects '{}', got '{}'",
                source_entity, relationship, description.target, target_entity
            )));
        }
        Ok((description.cardinality, description.inverse.clone()))
    }

    fn refs(&self, id: ObjectId, relationship: &str) -> Vec<ObjectId> {
        self.object(id)
            .ok()
            .and_then(|(_, object)| object.relationships.get(relationship).cloned())
            .unwrap_or_default()
    }

    fn add_ref(&mut self, id: ObjectId, relationship: &str, target: ObjectId) -> Result<(), ContextError> {
        let refs = self
            .object_mut(id)?
            .relationships
            .entry(relationship.to_string())
            .or_default();
        if !refs.contains(&target) {
            refs.push(target);
        }
        Ok(())
    }

    fn remove_ref(
        &mut self,
        id: ObjectId,
        relationship: &str,
        target: ObjectId,
    ) -> Result<(), ContextError> {
        if let Some(refs) = self.object_mut(id)?.relationships.get_mut(relationship) {
            refs.retain(|r| *r != target);
        }
        Ok(())
    }
}

fn check_attribute_value(
    entity: &EntityDescription,
    attribute: &str,
    value: Value,
) -> Result<Value, ContextError> {
    let description = entity.get_attribute(attribute).ok_or_else(|| {
        ContextError::UnknownAttribute(entity.name.clone(), attribute.to_string())
    })?;

    if value.is_null() {
        if !description.optional {
            return Err(ContextError::RequiredAttribute(
                entity.name.clone(),
                attribute.to_string(),
            ));
        }
        return Ok(value);
    }

    if !description.attribute_type.is_compatible(&value) {
        return Err(ContextError::TypeMismatch(format!(
            "{}.{} expects {}, got {}",
            entity.name,
            attribute,
            description.attribute_type,
            value.type_name()
        )));
    }

    // Integer literals stored into float attributes are normalized.
    value
        .coerce(description.attribute_type)
        .map_err(ContextError::TypeMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AttributeType;
    use crate::schema::{AttributeDescription, RelationshipDescription};
    use crate::storage::format::read_store;
    use tempfile::TempDir;

    fn model() -> Arc<SchemaModel> {
        Arc::new(
            SchemaModel::builder("v1")
                .entity(
                    EntityDescription::new("Recipe")
                        .attribute(AttributeDescription::new("name", AttributeType::Text).required())
                        .attribute(
                            AttributeDescription::new("servings", AttributeType::Integer)
                                .with_default(2i64),
                        )
                        .relationship(
                            RelationshipDescription::to_many("ingredients", "Ingredient")
                                .inverse("recipe")
                                .delete_rule(DeleteRule::Cascade),
                        )
                        .relationship(
                            RelationshipDescription::to_one("image", "Image")
                                .inverse("recipe")
                                .delete_rule(DeleteRule::Deny),
                        ),
                )
                .entity(
                    EntityDescription::new("Ingredient")
                        .attribute(AttributeDescription::new("amount", AttributeType::Float))
                        .relationship(
                            RelationshipDescription::to_one("recipe", "Recipe").inverse("ingredients"),
                        ),
                )
                .entity(
                    EntityDescription::new("Image")
                        .relationship(RelationshipDescription::to_one("recipe", "Recipe").inverse("image")),
                )
                .build()
                .unwrap(),
        )
    }

    fn context(dir: &TempDir) -> ObjectGraphContext {
        let model = model();
        let metadata = StoreMetadata::for_model(&model);
        ObjectGraphContext::new(
            dir.path().join("store"),
            model,
            metadata,
            StoreContents::default(),
            DurabilityMode::Sync,
            StartupOutcome::Created,
        )
    }

    #[test]
    fn test_insert_applies_defaults_and_requires_values() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);

        assert!(matches!(
            ctx.insert("Recipe"),
            Err(ContextError::RequiredAttribute(_, _))
        ));

        let id = ctx
            .insert_with("Recipe", [("name", Value::from("Soup"))])
            .unwrap();
        assert_eq!(ctx.get(id, "servings").unwrap(), &Value::Integer(2));
        assert_eq!(ctx.count("Recipe").unwrap(), 1);
    }

    #[test]
    fn test_set_checks_types() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        let id = ctx.insert("Ingredient").unwrap();

        ctx.set(id, "amount", 3i64).unwrap();
        assert_eq!(ctx.get(id, "amount").unwrap(), &Value::Float(3.0));
        assert!(matches!(
            ctx.set(id, "amount", "lots"),
            Err(ContextError::TypeMismatch(_))
        ));
        assert!(matches!(
            ctx.set(id, "missing", 1i64),
            Err(ContextError::UnknownAttribute(_, _))
        ));
    }

    #[test]
    fn test_relate_maintains_inverse() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        let soup = ctx.insert_with("Recipe", [("name", Value::from("Soup"))]).unwrap();
        let stew = ctx.insert_with("Recipe", [("name", Value::from("Stew"))]).unwrap();
        let salt = ctx.insert("Ingredient").unwrap();

        ctx.relate(soup, "ingredients", salt).unwrap();
        assert_eq!(ctx.related(salt, "recipe").unwrap(), vec![soup]);

        // Re-pointing the to-one side moves the ingredient.
        ctx.relate(salt, "recipe", stew).unwrap();
        assert!(ctx.related(soup, "ingredients").unwrap().is_empty());
        assert_eq!(ctx.related(stew, "ingredients").unwrap(), vec![salt]);
    }

    #[test]
    fn test_delete_cascades_and_denies() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        let soup = ctx.insert_with("Recipe", [("name", Value::from("Soup"))]).unwrap();
        let salt = ctx.insert("Ingredient").unwrap();
        let photo = ctx.insert("Image").unwrap();
        ctx.relate(soup, "ingredients", salt).unwrap();
        ctx.relate(soup, "image", photo).unwrap();

        assert!(matches!(ctx.delete(soup), Err(ContextError::DeleteDenied(_))));
        assert_eq!(ctx.count("Ingredient").unwrap(), 1);

        ctx.delete(photo).unwrap();
        assert!(ctx.related(soup, "image").unwrap().is_empty());

        let deleted = ctx.delete(soup).unwrap();
        assert_eq!(deleted, vec![soup, salt]);
        assert_eq!(ctx.count("Ingredient").unwrap(), 0);
    }

    #[test]
    fn test_save_writes_store_atomically() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        ctx.insert_with("Recipe", [("name", Value::from("Soup"))]).unwrap();
        assert!(ctx.has_changes());
        ctx.save().unwrap();
        assert!(!ctx.has_changes());

        let (metadata, contents) = read_store(ctx.path()).unwrap();
        assert_eq!(&metadata, ctx.metadata());
        assert_eq!(contents.instance_count(), 1);
    }
}
