use super::mapper::MigrationPlan;
use super::mapping::{AttributeTransform, EntityMapping, EntityMappingKind, MappingModel, RelationshipRule};
use super::registry::TransformFunctions;
use crate::core::{MigrationError, StoreIoError, Value};
use crate::schema::{AttributeDescription, Cardinality, DeleteRule, EntityDescription, SchemaModel};
use crate::storage::{
    DurabilityMode, ObjectId, StoreContents, StoreMetadata, StoredObject, read_store, write_store,
};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{Level, event, info_span};

/// Cooperative cancellation flag, observed before each migration step begins.
///
/// A step already running is never interrupted. Once cancelled, the original
/// store is left untouched.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Applies a [`MigrationPlan`] to a store file.
///
/// Steps run in memory, one after the other, each into a fresh working store.
/// Only after the last step succeeds is the result written next to the original
/// and renamed over it. Any failure drops the working state and leaves the file
/// on disk exactly as it was.
#[derive(Debug, Clone, Default)]
pub struct MigrationExecutor {
    functions: TransformFunctions,
    durability: DurabilityMode,
    keep_backup: bool,
    cancel: Option<CancellationToken>,
}

impl MigrationExecutor {
    pub fn new(functions: TransformFunctions) -> Self {
        Self {
            functions,
            ..Self::default()
        }
    }

    pub fn durability(mut self, durability: DurabilityMode) -> Self {
        self.durability = durability;
        self
    }

    /// Copy the pre-migration store to `<file>.bak` before replacing it.
    pub fn keep_backup(mut self, keep: bool) -> Self {
        self.keep_backup = keep;
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn execute(&self, path: &Path, plan: &MigrationPlan) -> Result<PathBuf, MigrationError> {
        let span = info_span!(
            "store.migrate",
            path = %path.display(),
            steps = plan.len()
        );
        let _enter = span.enter();

        match self.execute_inner(path, plan) {
            Ok(()) => Ok(path.to_path_buf()),
            Err(err) => {
                event!(Level::ERROR, error = %err, "store migration failed, original kept");
                Err(err)
            }
        }
    }

    fn execute_inner(&self, path: &Path, plan: &MigrationPlan) -> Result<(), MigrationError> {
        let (Some(first), Some(last)) = (plan.steps().first(), plan.steps().last()) else {
            return Ok(());
        };

        let (metadata, mut contents) = read_store(path)?;
        if metadata.fingerprint != first.source_fingerprint() {
            return Err(MigrationError::PlanMismatch {
                expected: first.source_fingerprint(),
                found: metadata.fingerprint,
            });
        }

        for (index, step) in plan.steps().iter().enumerate() {
            if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                event!(Level::INFO, step = index, "store migration cancelled");
                return Err(MigrationError::Cancelled { step: index });
            }
            contents = apply_step(step, &contents, &self.functions)?;
            event!(
                Level::DEBUG,
                step = index,
                from = %step.source().version_tag(),
                to = %step.destination().version_tag(),
                objects = contents.instance_count(),
                "migration step applied"
            );
        }

        let migrated = StoreMetadata {
            fingerprint: last.destination_fingerprint(),
            schema_version_tag: last.destination().version_tag().to_string(),
            migrated_at: Some(Utc::now()),
            ..metadata
        };

        if self.keep_backup {
            let backup = backup_path(path);
            std::fs::copy(path, &backup)
                .map_err(|e| StoreIoError::from_io(e, "write store backup"))?;
        }
        write_store(path, &migrated, &contents, self.durability)?;

        event!(
            Level::INFO,
            version = %migrated.schema_version_tag,
            objects = contents.instance_count(),
            "store migrated"
        );
        Ok(())
    }
}

/// Location of the pre-migration copy kept when backups are enabled.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".bak");
    path.with_file_name(name)
}

/// One migrated instance waiting for its relationships.
struct Pending<'a> {
    entity: &'a EntityDescription,
    id: ObjectId,
    mapping: &'a EntityMapping,
    source: Option<&'a StoredObject>,
}

/// Transforms `source` into a new store laid out for the step's destination model.
///
/// Instances are built first so every destination identity exists before any
/// reference is remapped. Destination ids follow destination entity name, then
/// source entity name, then source id.
pub(crate) fn apply_step(
    step: &MappingModel,
    source: &StoreContents,
    functions: &TransformFunctions,
) -> Result<StoreContents, MigrationError> {
    let destination = step.destination();
    let mut mappings: Vec<&EntityMapping> = step
        .entity_mappings()
        .iter()
        .filter(|m| m.kind() != Some(EntityMappingKind::Delete))
        .collect();
    mappings.sort_by(|a, b| (&a.destination, &a.source).cmp(&(&b.destination, &b.source)));

    let mut working = StoreContents::default();
    let mut id_map: HashMap<(&str, ObjectId), ObjectId> = HashMap::new();
    let mut pending = Vec::new();

    for mapping in mappings {
        let Some(entity_name) = mapping.destination.as_deref() else {
            continue;
        };
        let entity = destination.entity(entity_name).ok_or_else(|| {
            MigrationError::transform(entity_name, "entity missing from destination model")
        })?;

        let mut built = Vec::new();
        match &mapping.source {
            Some(source_entity) => {
                let instances = source.entities.get(source_entity.as_str());
                for (source_id, object) in instances.into_iter().flatten() {
                    let attributes = build_attributes(entity, mapping, Some(object), functions)?;
                    built.push((Some(*source_id), Some(object), attributes));
                }
            }
            None => {
                for _ in 0..mapping.synthesize {
                    built.push((None, None, build_attributes(entity, mapping, None, functions)?));
                }
            }
        }

        for (source_id, object, attributes) in built {
            let id = working.allocate_id();
            if let Some(source_id) = source_id {
                id_map.insert((entity.name.as_str(), source_id), id);
            }
            working
                .entities
                .entry(entity.name.clone())
                .or_default()
                .insert(
                    id,
                    StoredObject {
                        attributes,
                        relationships: BTreeMap::new(),
                    },
                );
            pending.push(Pending {
                entity,
                id,
                mapping,
                source: object,
            });
        }
    }

    // Destination entities without any mapping still get an (empty) slot.
    for entity in destination.entities() {
        working.entities.entry(entity.name.clone()).or_default();
    }

    let mut doomed = BTreeSet::new();
    for item in &pending {
        let relationships = resolve_relationships(destination, item, &id_map, &mut doomed)?;
        if let Some(object) = working
            .entities
            .get_mut(&item.entity.name)
            .and_then(|objects| objects.get_mut(&item.id))
        {
            object.relationships = relationships;
        }
    }

    purge(destination, &mut working, doomed)?;
    Ok(working)
}

fn build_attributes(
    entity: &EntityDescription,
    mapping: &EntityMapping,
    source: Option<&StoredObject>,
    functions: &TransformFunctions,
) -> Result<BTreeMap<String, Value>, MigrationError> {
    let read = |name: &str| -> Result<Value, MigrationError> {
        let object = source.ok_or_else(|| {
            MigrationError::transform(
                &entity.name,
                format!("no source instance to read '{}' from", name),
            )
        })?;
        Ok(object.attributes.get(name).cloned().unwrap_or(Value::Null))
    };

    let mut attributes = BTreeMap::new();
    for attribute in &entity.attributes {
        let value = match mapping.attributes.get(&attribute.name) {
            None | Some(AttributeTransform::DefaultFill) => default_fill(entity, attribute)?,
            Some(AttributeTransform::Copy) => checked(entity, attribute, read(&attribute.name)?)?,
            Some(AttributeTransform::Rename { from }) => checked(entity, attribute, read(from)?)?,
            Some(AttributeTransform::Coerce { from }) => read(from)?
                .coerce(attribute.attribute_type)
                .map_err(|reason| {
                    MigrationError::transform(
                        &entity.name,
                        format!("attribute '{}': {}", attribute.name, reason),
                    )
                })?,
            Some(AttributeTransform::Constant(value)) => checked(entity, attribute, value.clone())?,
            Some(AttributeTransform::Custom { function, inputs }) => {
                let function_impl = functions.get(function).ok_or_else(|| {
                    MigrationError::transform(
                        &entity.name,
                        format!("transform function '{}' is not registered", function),
                    )
                })?;
                let args = inputs
                    .iter()
                    .map(|input| read(input))
                    .collect::<Result<Vec<_>, _>>()?;
                let value = function_impl(&args).map_err(|reason| {
                    MigrationError::transform(
                        &entity.name,
                        format!("function '{}' for '{}': {}", function, attribute.name, reason),
                    )
                })?;
                checked(entity, attribute, value)?
            }
        };

        let value = if value.is_null() && !attribute.optional {
            default_fill(entity, attribute)?
        } else {
            value
        };
        attributes.insert(attribute.name.clone(), value);
    }
    Ok(attributes)
}

/// Rejects a value of the wrong type; integers widen into float attributes.
fn checked(
    entity: &EntityDescription,
    attribute: &AttributeDescription,
    value: Value,
) -> Result<Value, MigrationError> {
    if !attribute.attribute_type.is_compatible(&value) {
        return Err(MigrationError::transform(
            &entity.name,
            format!(
                "attribute '{}' expects {}, got {}",
                attribute.name,
                attribute.attribute_type,
                value.type_name()
            ),
        ));
    }
    value
        .coerce(attribute.attribute_type)
        .map_err(|reason| MigrationError::transform(&entity.name, reason))
}

fn default_fill(
    entity: &EntityDescription,
    attribute: &AttributeDescription,
) -> Result<Value, MigrationError> {
    attribute.initial_value().ok_or_else(|| {
        MigrationError::transform(
            &entity.name,
            format!(
                "required attribute '{}' has no value and no default",
                attribute.name
            ),
        )
    })
}

fn resolve_relationships(
    destination: &SchemaModel,
    item: &Pending<'_>,
    id_map: &HashMap<(&str, ObjectId), ObjectId>,
    doomed: &mut BTreeSet<ObjectId>,
) -> Result<BTreeMap<String, Vec<ObjectId>>, MigrationError> {
    let entity = item.entity;
    let mut relationships = BTreeMap::new();

    for relationship in &entity.relationships {
        let mut resolved = Vec::new();
        let rule = item.mapping.relationships.get(&relationship.name);
        if let (Some(RelationshipRule::Follow { from }), Some(object)) = (rule, item.source) {
            for reference in object.relationships.get(from).into_iter().flatten() {
                match id_map.get(&(relationship.target.as_str(), *reference)) {
                    Some(mapped) => {
                        if !resolved.contains(mapped) {
                            resolved.push(*mapped);
                        }
                    }
                    None => match inverse_rule(destination, &relationship.target, &relationship.inverse) {
                        DeleteRule::Cascade => {
                            doomed.insert(item.id);
                        }
                        DeleteRule::Deny => {
                            return Err(MigrationError::transform(
                                &entity.name,
                                format!(
                                    "{} refers through '{}' to {} which was not migrated",
                                    item.id, relationship.name, reference
                                ),
                            ));
                        }
                        DeleteRule::Nullify | DeleteRule::NoAction => {}
                    },
                }
            }
        }

        if relationship.cardinality == Cardinality::ToOne && resolved.len() > 1 {
            return Err(MigrationError::transform(
                &entity.name,
                format!(
                    "to-one relationship '{}' of {} resolved to {} objects",
                    relationship.name,
                    item.id,
                    resolved.len()
                ),
            ));
        }
        relationships.insert(relationship.name.clone(), resolved);
    }
    Ok(relationships)
}

/// Delete rule that applies to a referencing object when its target goes away.
fn inverse_rule(destination: &SchemaModel, target: &str, inverse: &Option<String>) -> DeleteRule {
    inverse
        .as_deref()
        .and_then(|name| destination.entity(target)?.get_relationship(name))
        .map(|r| r.delete_rule)
        .unwrap_or(DeleteRule::Nullify)
}

/// Removes `doomed` instances and everything their removal cascades to.
fn purge(
    destination: &SchemaModel,
    working: &mut StoreContents,
    mut doomed: BTreeSet<ObjectId>,
) -> Result<(), MigrationError> {
    if doomed.is_empty() {
        return Ok(());
    }

    let index: HashMap<ObjectId, (&EntityDescription, &StoredObject)> = working
        .entities
        .iter()
        .filter_map(|(name, objects)| Some((destination.entity(name)?, objects)))
        .flat_map(|(entity, objects)| objects.iter().map(move |(id, object)| (*id, (entity, object))))
        .collect();
    let lookup = |id: ObjectId| index.get(&id).copied();

    let mut queue: VecDeque<ObjectId> = doomed.iter().copied().collect();
    loop {
        while let Some(id) = queue.pop_front() {
            let Some((entity, object)) = lookup(id) else {
                continue;
            };
            for relationship in &entity.relationships {
                if relationship.delete_rule != DeleteRule::Cascade {
                    continue;
                }
                for target in object.relationships.get(&relationship.name).into_iter().flatten() {
                    if doomed.insert(*target) {
                        queue.push_back(*target);
                    }
                }
            }
        }

        // Survivors pointing at a removed object through a cascading inverse go too.
        for (id, (entity, object)) in index.iter().filter(|(id, _)| !doomed.contains(*id)) {
            let cascades = entity.relationships.iter().any(|relationship| {
                inverse_rule(destination, &relationship.target, &relationship.inverse)
                    == DeleteRule::Cascade
                    && object
                        .relationships
                        .get(&relationship.name)
                        .is_some_and(|refs| refs.iter().any(|r| doomed.contains(r)))
            });
            if cascades {
                queue.push_back(*id);
            }
        }
        if queue.is_empty() {
            break;
        }
        doomed.extend(queue.iter().copied());
    }

    for id in &doomed {
        let Some((entity, object)) = lookup(*id) else {
            continue;
        };
        for relationship in &entity.relationships {
            if relationship.delete_rule != DeleteRule::Deny {
                continue;
            }
            let blocking = object
                .relationships
                .get(&relationship.name)
                .is_some_and(|refs| refs.iter().any(|r| !doomed.contains(r)));
            if blocking {
                return Err(MigrationError::transform(
                    &entity.name,
                    format!(
                        "{} cannot be dropped: '{}' still has related objects",
                        id, relationship.name
                    ),
                ));
            }
        }
    }

    for objects in working.entities.values_mut() {
        objects.retain(|id, _| !doomed.contains(id));
        for object in objects.values_mut() {
            for refs in object.relationships.values_mut() {
                refs.retain(|r| !doomed.contains(r));
            }
        }
    }
    Ok(())
}
