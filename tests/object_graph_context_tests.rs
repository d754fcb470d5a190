//! Integration tests for the object-graph context handed out by startup

mod common;

use common::*;
use evostore::{
    AttributeDescription, AttributeType, ContextError, ControllerConfig, DeleteRule,
    EntityDescription, PersistenceController, RelationshipDescription, SchemaModel,
    StartupOutcome, StoreMetadataReader, Value, VersionRegistry,
};
use tempfile::TempDir;

fn controller() -> PersistenceController {
    PersistenceController::new(VersionRegistry::new(), ControllerConfig::default()).unwrap()
}

#[test]
fn test_saved_changes_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("recipes.evostore");
    write_v1_store(&path);
    let metadata = StoreMetadataReader::read_metadata(&path).unwrap();

    let context = controller().start(&path, recipe_v1()).unwrap();
    assert_eq!(context.startup_outcome(), StartupOutcome::Opened);
    assert_eq!(context.metadata(), &metadata);
    assert_eq!(context.count("Recipe").unwrap(), 2);
    assert_eq!(context.count("Ingredient").unwrap(), 2);

    let pancakes = find(&context, "Recipe", "title", "Pancakes");
    let mut names: Vec<Value> = context
        .related(pancakes, "ingredients")
        .unwrap()
        .into_iter()
        .map(|id| context.get(id, "name").unwrap().clone())
        .collect();
    names.sort_by_key(|v| v.to_string());
    assert_eq!(names, vec![Value::from("Flour"), Value::from("Milk")]);
}

#[test]
fn test_unsaved_changes_are_discarded() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("recipes.evostore");

    {
        let mut context = controller().start(&path, recipe_v1()).unwrap();
        context.insert("Recipe").unwrap();
        assert!(context.has_changes());
    }

    let context = controller().start(&path, recipe_v1()).unwrap();
    assert_eq!(context.count("Recipe").unwrap(), 0);
    assert!(!context.has_changes());
}

#[test]
fn test_values_are_type_checked() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("recipes.evostore");
    let mut context = controller().start(&path, recipe_v2()).unwrap();

    let recipe = context.insert("Recipe").unwrap();
    assert!(matches!(
        context.set(recipe, "prepTime", "soon"),
        Err(ContextError::TypeMismatch(_))
    ));
    assert!(matches!(
        context.set(recipe, "calories", 100i64),
        Err(ContextError::UnknownAttribute(_, _))
    ));
    assert!(matches!(context.insert("Pantry"), Err(ContextError::UnknownEntity(_))));

    // Integers widen into float attributes.
    let ingredient = context.insert("Ingredient").unwrap();
    context.set(ingredient, "amount", 2i64).unwrap();
    assert_eq!(context.get(ingredient, "amount").unwrap(), &Value::Float(2.0));
}

#[test]
fn test_required_attribute_without_default() {
    let model = SchemaModel::builder("strict")
        .entity(
            EntityDescription::new("Label")
                .attribute(AttributeDescription::new("text", AttributeType::Text).required()),
        )
        .build()
        .unwrap();
    let temp_dir = TempDir::new().unwrap();
    let mut context = controller()
        .start(temp_dir.path().join("labels.evostore"), model)
        .unwrap();

    assert!(matches!(
        context.insert("Label"),
        Err(ContextError::RequiredAttribute(_, _))
    ));
    let label = context
        .insert_with("Label", [("text", Value::from("fragile"))])
        .unwrap();
    assert!(matches!(
        context.set(label, "text", Value::Null),
        Err(ContextError::RequiredAttribute(_, _))
    ));
}

#[test]
fn test_to_one_relate_replaces_previous_partner() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("recipes.evostore");
    write_v1_store(&path);
    let mut context = controller().start(&path, recipe_v1()).unwrap();

    let pancakes = find(&context, "Recipe", "title", "Pancakes");
    let toast = find(&context, "Recipe", "title", "Toast");
    let milk = find(&context, "Ingredient", "name", "Milk");

    context.relate(milk, "recipe", toast).unwrap();
    assert_eq!(context.related(milk, "recipe").unwrap(), vec![toast]);
    assert_eq!(context.related(toast, "ingredients").unwrap(), vec![milk]);
    assert!(!context.related(pancakes, "ingredients").unwrap().contains(&milk));

    context.unrelate(toast, "ingredients", milk).unwrap();
    assert!(context.related(milk, "recipe").unwrap().is_empty());
    assert!(matches!(
        context.relate(milk, "recipe", milk),
        Err(ContextError::TypeMismatch(_))
    ));
}

#[test]
fn test_delete_rules() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("recipes.evostore");
    write_v1_store(&path);
    let mut context = controller().start(&path, recipe_v1()).unwrap();

    // Ingredient.recipe nullifies: the recipe keeps existing without it.
    let flour = find(&context, "Ingredient", "name", "Flour");
    let pancakes = find(&context, "Recipe", "title", "Pancakes");
    assert_eq!(context.delete(flour).unwrap(), vec![flour]);
    assert_eq!(context.related(pancakes, "ingredients").unwrap().len(), 1);

    // Recipe.ingredients cascades.
    let removed = context.delete(pancakes).unwrap();
    assert_eq!(removed.len(), 2);
    assert_eq!(context.count("Ingredient").unwrap(), 0);
    assert!(matches!(context.get(pancakes, "title"), Err(ContextError::UnknownObject(_))));

    context.save().unwrap();
    let reopened = controller().start(&path, recipe_v1()).unwrap();
    assert_eq!(reopened.count("Recipe").unwrap(), 1);
}

#[test]
fn test_deny_rule_blocks_delete() {
    let model = SchemaModel::builder("pantry")
        .entity(
            EntityDescription::new("Shelf").relationship(
                RelationshipDescription::to_many("jars", "Jar")
                    .inverse("shelf")
                    .delete_rule(DeleteRule::Deny),
            ),
        )
        .entity(
            EntityDescription::new("Jar")
                .relationship(RelationshipDescription::to_one("shelf", "Shelf").inverse("jars")),
        )
        .build()
        .unwrap();
    let temp_dir = TempDir::new().unwrap();
    let mut context = controller()
        .start(temp_dir.path().join("pantry.evostore"), model)
        .unwrap();

    let shelf = context.insert("Shelf").unwrap();
    let jar = context.insert("Jar").unwrap();
    context.relate(jar, "shelf", shelf).unwrap();

    assert!(matches!(context.delete(shelf), Err(ContextError::DeleteDenied(_))));
    assert_eq!(context.count("Shelf").unwrap(), 1);

    context.delete(jar).unwrap();
    assert_eq!(context.delete(shelf).unwrap(), vec![shelf]);
}
