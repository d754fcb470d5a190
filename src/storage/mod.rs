pub mod context;
pub mod format;

pub use context::{ObjectGraphContext, StartupOutcome};
pub use format::{
    DurabilityMode, ObjectId, STORE_FORMAT_VERSION, StoreContents, StoreMetadata,
    StoreMetadataReader, StoredObject, read_store, write_store,
};
