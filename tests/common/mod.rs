//! Recipe book models shared by the integration tests.
#![allow(dead_code)]

use evostore::{
    AttributeDescription, AttributeTransform, AttributeType, DeleteRule, EntityDescription,
    EntityMapping, ObjectGraphContext, RelationshipDescription, RelationshipRule, SchemaModel,
    Value, VersionRegistry,
};
use std::collections::BTreeMap;
use std::path::Path;

fn ingredient() -> EntityDescription {
    EntityDescription::new("Ingredient")
        .attribute(AttributeDescription::new("name", AttributeType::Text))
        .attribute(AttributeDescription::new("amount", AttributeType::Float))
        .relationship(RelationshipDescription::to_one("recipe", "Recipe").inverse("ingredients"))
}

fn ingredients() -> RelationshipDescription {
    RelationshipDescription::to_many("ingredients", "Ingredient")
        .inverse("recipe")
        .delete_rule(DeleteRule::Cascade)
}

/// First release: prep time kept as free text.
pub fn recipe_v1() -> SchemaModel {
    SchemaModel::builder("v1")
        .entity(
            EntityDescription::new("Recipe")
                .attribute(AttributeDescription::new("title", AttributeType::Text))
                .attribute(AttributeDescription::new("prepTime", AttributeType::Text))
                .relationship(ingredients()),
        )
        .entity(ingredient())
        .build()
        .unwrap()
}

/// Prep time becomes minutes; recipes gain optional notes.
pub fn recipe_v2() -> SchemaModel {
    SchemaModel::builder("v2")
        .entity(
            EntityDescription::new("Recipe")
                .attribute(AttributeDescription::new("title", AttributeType::Text))
                .attribute(AttributeDescription::new("prepTime", AttributeType::Integer))
                .attribute(AttributeDescription::new("notes", AttributeType::Text))
                .relationship(ingredients()),
        )
        .entity(ingredient())
        .build()
        .unwrap()
}

/// `title` is renamed to `name`; recipes get a required rating.
pub fn recipe_v3() -> SchemaModel {
    SchemaModel::builder("v3")
        .entity(
            EntityDescription::new("Recipe")
                .attribute(AttributeDescription::new("name", AttributeType::Text))
                .attribute(AttributeDescription::new("prepTime", AttributeType::Integer))
                .attribute(AttributeDescription::new("notes", AttributeType::Text))
                .attribute(
                    AttributeDescription::new("rating", AttributeType::Integer)
                        .required()
                        .with_default(0i64),
                )
                .relationship(ingredients()),
        )
        .entity(ingredient())
        .build()
        .unwrap()
}

/// A store history nobody registered a mapping for.
pub fn unrelated_model() -> SchemaModel {
    SchemaModel::builder("legacy")
        .entity(
            EntityDescription::new("Dish")
                .attribute(AttributeDescription::new("label", AttributeType::Text)),
        )
        .build()
        .unwrap()
}

/// v1 -> v2 inferred.
pub fn registry_v1_v2() -> VersionRegistry {
    let mut registry = VersionRegistry::new();
    registry.add_version(recipe_v1()).unwrap();
    registry.add_version(recipe_v2()).unwrap();
    registry.add_inferred_mapping("v1", "v2").unwrap();
    registry
}

/// v1 -> v2 inferred, v2 -> v3 explicit.
pub fn registry_v1_v2_v3() -> VersionRegistry {
    let mut registry = registry_v1_v2();
    registry.add_version(recipe_v3()).unwrap();
    let mapping = registry
        .mapping_between("v2", "v3")
        .unwrap()
        .entity(
            EntityMapping::transform("Recipe", "Recipe")
                .attribute("name", AttributeTransform::Rename { from: "title".into() })
                .attribute("prepTime", AttributeTransform::Copy)
                .attribute("notes", AttributeTransform::Copy)
                .relationship(
                    "ingredients",
                    RelationshipRule::Follow {
                        from: "ingredients".into(),
                    },
                ),
        )
        .entity(
            EntityMapping::transform("Ingredient", "Ingredient")
                .attribute("name", AttributeTransform::Copy)
                .attribute("amount", AttributeTransform::Copy)
                .relationship("recipe", RelationshipRule::Follow { from: "recipe".into() }),
        );
    registry.add_mapping(mapping).unwrap();
    registry
}

/// Pancakes (flour, milk) and toast (no ingredients), written in v1 layout.
pub fn seed_v1(context: &mut ObjectGraphContext) {
    let pancakes = context
        .insert_with(
            "Recipe",
            [("title", Value::from("Pancakes")), ("prepTime", Value::from("15"))],
        )
        .unwrap();
    context
        .insert_with(
            "Recipe",
            [("title", Value::from("Toast")), ("prepTime", Value::from("5"))],
        )
        .unwrap();

    for (name, amount) in [("Flour", 200.0), ("Milk", 0.5)] {
        let ingredient = context
            .insert_with(
                "Ingredient",
                [("name", Value::from(name)), ("amount", Value::Float(amount))],
            )
            .unwrap();
        context.relate(pancakes, "ingredients", ingredient).unwrap();
    }
    context.save().unwrap();
}

/// Creates a v1 store at `path` holding the seed data.
pub fn write_v1_store(path: &Path) {
    let controller =
        evostore::PersistenceController::new(VersionRegistry::new(), Default::default()).unwrap();
    let mut context = controller.start(path, recipe_v1()).unwrap();
    seed_v1(&mut context);
}

/// Attributes of every instance of `entity`, sorted so ids do not matter.
pub fn snapshot(context: &ObjectGraphContext, entity: &str) -> Vec<BTreeMap<String, Value>> {
    let attributes: Vec<String> = context
        .model()
        .entity(entity)
        .unwrap()
        .attributes
        .iter()
        .map(|a| a.name.clone())
        .collect();

    let mut rows: Vec<BTreeMap<String, Value>> = context
        .fetch(entity)
        .unwrap()
        .into_iter()
        .map(|id| {
            attributes
                .iter()
                .map(|a| (a.clone(), context.get(id, a).unwrap().clone()))
                .collect()
        })
        .collect();
    rows.sort_by(|a, b| format!("{:?}", a).cmp(&format!("{:?}", b)));
    rows
}

/// The instance of `entity` whose `attribute` equals `value`.
pub fn find(
    context: &ObjectGraphContext,
    entity: &str,
    attribute: &str,
    value: impl Into<Value>,
) -> evostore::ObjectId {
    let value = value.into();
    context
        .fetch(entity)
        .unwrap()
        .into_iter()
        .find(|id| context.get(*id, attribute).unwrap() == &value)
        .unwrap()
}
