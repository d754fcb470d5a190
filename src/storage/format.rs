//! On-disk store file format.
//!
//! ```text
//! +----------+---------+--------------+----------------------+------------------+
//! | EVOSTORE | u16 LE  | u32 LE       | metadata (MessagePack)| body (MessagePack)|
//! | magic    | format  | metadata len |                      |                  |
//! +----------+---------+--------------+----------------------+------------------+
//! ```
//!
//! The metadata section sits in front of the body so that startup can decide
//! compatibility without deserializing the object graph.

use crate::core::{StoreIoError, Value};
use crate::schema::{Fingerprint, SchemaModel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use uuid::Uuid;

pub const STORE_MAGIC: &[u8; 8] = b"EVOSTORE";
pub const STORE_FORMAT_VERSION: u16 = 1;
const MAX_METADATA_LEN: u32 = 1024 * 1024;

// ============================================================================
// Metadata
// ============================================================================

/// Version metadata embedded in every store file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub fingerprint: Fingerprint,
    pub schema_version_tag: String,
    pub store_format_version: u32,
    pub store_uuid: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub migrated_at: Option<DateTime<Utc>>,
}

impl StoreMetadata {
    /// Metadata for a brand new store built against `model`.
    pub fn for_model(model: &SchemaModel) -> Self {
        Self {
            fingerprint: model.fingerprint(),
            schema_version_tag: model.version_tag().to_string(),
            store_format_version: u32::from(STORE_FORMAT_VERSION),
            store_uuid: Uuid::new_v4(),
            created_at: Utc::now(),
            migrated_at: None,
        }
    }
}

// ============================================================================
// Contents
// ============================================================================

/// Store-wide stable identity of a persisted object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One persisted instance. Relationships are identity references, never owned objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub attributes: BTreeMap<String, Value>,
    pub relationships: BTreeMap<String, Vec<ObjectId>>,
}

/// All instances of a store, grouped by entity name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreContents {
    pub next_id: u64,
    pub entities: BTreeMap<String, BTreeMap<ObjectId, StoredObject>>,
}

impl StoreContents {
    pub fn allocate_id(&mut self) -> ObjectId {
        self.next_id += 1;
        ObjectId(self.next_id)
    }

    pub fn instance_count(&self) -> usize {
        self.entities.values().map(|objects| objects.len()).sum()
    }
}

// ============================================================================
// Durability
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DurabilityMode {
    /// fsync the new file before it replaces the old one.
    #[default]
    Sync,
    /// Rely on the OS to flush; the rename is still atomic.
    Async,
}

// ============================================================================
// Reading
// ============================================================================

/// Reads the metadata section of a store file without touching its body.
pub struct StoreMetadataReader;

impl StoreMetadataReader {
    pub fn read_metadata(path: &Path) -> Result<StoreMetadata, StoreIoError> {
        let mut reader = open(path)?;
        read_header(&mut reader)
    }
}

/// Reads metadata and the full object graph.
pub fn read_store(path: &Path) -> Result<(StoreMetadata, StoreContents), StoreIoError> {
    let mut reader = open(path)?;
    let metadata = read_header(&mut reader)?;

    let mut body = Vec::new();
    reader
        .read_to_end(&mut body)
        .map_err(|e| StoreIoError::from_io(e, "read store body"))?;
    let contents: StoreContents = rmp_serde::from_slice(&body)
        .map_err(|e| StoreIoError::Corrupt(format!("store body: {}", e)))?;

    Ok((metadata, contents))
}

fn open(path: &Path) -> Result<BufReader<File>, StoreIoError> {
    match File::open(path) {
        Ok(file) => Ok(BufReader::new(file)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(StoreIoError::NotFound(path.to_path_buf()))
        }
        Err(e) => Err(StoreIoError::from_io(e, "open store")),
    }
}

fn read_header(reader: &mut impl Read) -> Result<StoreMetadata, StoreIoError> {
    let truncated = |e: std::io::Error| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            StoreIoError::Corrupt("truncated header".to_string())
        } else {
            StoreIoError::from_io(e, "read store header")
        }
    };

    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic).map_err(truncated)?;
    if &magic != STORE_MAGIC {
        return Err(StoreIoError::Corrupt("bad magic".to_string()));
    }

    let mut version = [0u8; 2];
    reader.read_exact(&mut version).map_err(truncated)?;
    let version = u16::from_le_bytes(version);
    if version == 0 || version > STORE_FORMAT_VERSION {
        return Err(StoreIoError::UnsupportedFormat {
            found: version,
            supported: STORE_FORMAT_VERSION,
        });
    }

    let mut len = [0u8; 4];
    reader.read_exact(&mut len).map_err(truncated)?;
    let len = u32::from_le_bytes(len);
    if len == 0 || len > MAX_METADATA_LEN {
        return Err(StoreIoError::Corrupt(format!(
            "metadata length {} out of range",
            len
        )));
    }

    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data).map_err(truncated)?;
    rmp_serde::from_slice(&data).map_err(|e| StoreIoError::Corrupt(format!("metadata: {}", e)))
}

// ============================================================================
// Writing
// ============================================================================

pub fn encode_store(
    metadata: &StoreMetadata,
    contents: &StoreContents,
) -> Result<Vec<u8>, StoreIoError> {
    let meta = rmp_serde::to_vec_named(metadata)
        .map_err(|e| StoreIoError::Io(format!("serialize metadata: {}", e)))?;
    let body = rmp_serde::to_vec_named(contents)
        .map_err(|e| StoreIoError::Io(format!("serialize store body: {}", e)))?;

    let mut bytes = Vec::with_capacity(14 + meta.len() + body.len());
    bytes.extend_from_slice(STORE_MAGIC);
    bytes.extend_from_slice(&STORE_FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(meta.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&meta);
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

/// Writes the whole store to a temp file next to `path` and renames it into place.
///
/// Readers observe either the previous file or the complete new one.
pub fn write_store(
    path: &Path,
    metadata: &StoreMetadata,
    contents: &StoreContents,
    durability: DurabilityMode,
) -> Result<(), StoreIoError> {
    let bytes = encode_store(metadata, contents)?;
    atomic_write(path, &bytes, durability)
}

pub fn atomic_write(
    path: &Path,
    bytes: &[u8],
    durability: DurabilityMode,
) -> Result<(), StoreIoError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)
        .map_err(|e| StoreIoError::from_io(e, "create store directory"))?;

    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|e| StoreIoError::from_io(e, "create temp store"))?;
    tmp.write_all(bytes)
        .map_err(|e| StoreIoError::from_io(e, "write temp store"))?;
    tmp.flush()
        .map_err(|e| StoreIoError::from_io(e, "flush temp store"))?;
    if durability == DurabilityMode::Sync {
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreIoError::from_io(e, "sync temp store"))?;
    }

    tmp.persist(path)
        .map_err(|e| StoreIoError::from_io(e.error, "replace store"))?;
    Ok(())
}
