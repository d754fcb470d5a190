use super::graph::MigrationGraph;
use crate::schema::Fingerprint;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompatibilityResult {
    /// Stored and current fingerprints are equal; the store opens as is.
    Compatible,
    /// Fingerprints differ and the registry connects them.
    NeedsMigration,
    /// No recorded mapping path exists. Automatic migration is impossible.
    Incompatible,
}

impl fmt::Display for CompatibilityResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompatibilityResult::Compatible => "compatible",
            CompatibilityResult::NeedsMigration => "needs-migration",
            CompatibilityResult::Incompatible => "incompatible",
        };
        write!(f, "{}", name)
    }
}

pub struct CompatibilityChecker;

impl CompatibilityChecker {
    pub fn check(
        stored: Fingerprint,
        current: Fingerprint,
        graph: &MigrationGraph,
    ) -> CompatibilityResult {
        if stored == current {
            CompatibilityResult::Compatible
        } else if graph.has_path(stored, current) {
            CompatibilityResult::NeedsMigration
        } else {
            CompatibilityResult::Incompatible
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AttributeType;
    use crate::migration::MappingModel;
    use crate::schema::{AttributeDescription, EntityDescription, SchemaModel};
    use std::sync::Arc;

    fn model(tag: &str, attributes: &[&str]) -> Arc<SchemaModel> {
        let mut entity = EntityDescription::new("Recipe");
        for name in attributes {
            entity = entity.attribute(AttributeDescription::new(*name, AttributeType::Text));
        }
        Arc::new(SchemaModel::builder(tag).entity(entity).build().unwrap())
    }

    #[test]
    fn test_classifies_fingerprint_pairs() {
        let v1 = model("v1", &["name"]);
        let v2 = model("v2", &["name", "notes"]);
        let v3 = model("v3", &["name", "notes", "source"]);
        let graph = MigrationGraph::from_mappings([Arc::new(MappingModel::infer(v1.clone(), v2.clone()))]);

        assert_eq!(
            CompatibilityChecker::check(v2.fingerprint(), v2.fingerprint(), &graph),
            CompatibilityResult::Compatible
        );
        assert_eq!(
            CompatibilityChecker::check(v1.fingerprint(), v2.fingerprint(), &graph),
            CompatibilityResult::NeedsMigration
        );
        assert_eq!(
            CompatibilityChecker::check(v1.fingerprint(), v3.fingerprint(), &graph),
            CompatibilityResult::Incompatible
        );
        // Mappings are directional.
        assert_eq!(
            CompatibilityChecker::check(v2.fingerprint(), v1.fingerprint(), &graph),
            CompatibilityResult::Incompatible
        );
    }

    #[test]
    fn test_independently_built_models_are_compatible() {
        let a = model("release-1", &["name", "notes"]);
        let b = model("release-1-rebuilt", &["notes", "name"]);
        assert_eq!(
            CompatibilityChecker::check(a.fingerprint(), b.fingerprint(), &MigrationGraph::default()),
            CompatibilityResult::Compatible
        );
    }
}
