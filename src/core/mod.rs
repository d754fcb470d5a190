pub mod error;
pub mod value;

pub use error::{
    ContextError, MappingError, MigrationError, SchemaError, StartupError, StoreIoError,
};
pub use value::{AttributeType, Value};
