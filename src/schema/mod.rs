pub mod fingerprint;
pub mod model;

pub use fingerprint::Fingerprint;
pub use model::{
    AttributeDescription, Cardinality, DeleteRule, EntityDescription, RelationshipDescription,
    SchemaModel, SchemaModelBuilder,
};
