//! Deterministic structural hashing for schema models.
//!
//! The hash stream is canonical: every list is sorted by name before it is
//! written, every string is length-prefixed and every optional or enum field is
//! tagged, so two independently built models with the same structure always
//! produce the same digest regardless of declaration order.

use super::model::{
    AttributeDescription, Cardinality, DeleteRule, EntityDescription, RelationshipDescription,
};
use crate::core::Value;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

const FINGERPRINT_CONTRACT_VERSION: u8 = 1;

/// Structural hash identifying one schema version.
///
/// Ordering is byte-wise and is what path selection uses to break ties.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 64 || !hex.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }

    /// First eight hex digits, for log lines.
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Fingerprint::from_hex(&hex)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid fingerprint '{}'", hex)))
    }
}

pub(crate) fn fingerprint_entities(entities: &[EntityDescription]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update([FINGERPRINT_CONTRACT_VERSION]);

    let mut sorted: Vec<&EntityDescription> = entities.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    write_len(&mut hasher, sorted.len());

    for entity in sorted {
        write_tag(&mut hasher, 0x01);
        write_str(&mut hasher, &entity.name);

        let mut attributes: Vec<&AttributeDescription> = entity.attributes.iter().collect();
        attributes.sort_by(|a, b| a.name.cmp(&b.name));
        write_len(&mut hasher, attributes.len());
        for attribute in attributes {
            hash_attribute(&mut hasher, attribute);
        }

        let mut relationships: Vec<&RelationshipDescription> =
            entity.relationships.iter().collect();
        relationships.sort_by(|a, b| a.name.cmp(&b.name));
        write_len(&mut hasher, relationships.len());
        for relationship in relationships {
            hash_relationship(&mut hasher, relationship);
        }
    }

    Fingerprint(hasher.finalize().into())
}

fn hash_attribute(hasher: &mut Sha256, attribute: &AttributeDescription) {
    write_tag(hasher, 0x02);
    write_str(hasher, &attribute.name);
    write_tag(hasher, attribute.attribute_type.tag());
    write_tag(hasher, u8::from(attribute.optional));
    match &attribute.default {
        None => write_tag(hasher, 0x00),
        Some(value) => {
            write_tag(hasher, 0x01);
            write_value(hasher, value);
        }
    }
}

fn hash_relationship(hasher: &mut Sha256, relationship: &RelationshipDescription) {
    write_tag(hasher, 0x03);
    write_str(hasher, &relationship.name);
    write_str(hasher, &relationship.target);
    write_tag(
        hasher,
        match relationship.cardinality {
            Cardinality::ToOne => 0x01,
            Cardinality::ToMany => 0x02,
        },
    );
    match &relationship.inverse {
        None => write_tag(hasher, 0x00),
        Some(inverse) => {
            write_tag(hasher, 0x01);
            write_str(hasher, inverse);
        }
    }
    write_tag(
        hasher,
        match relationship.delete_rule {
            DeleteRule::Nullify => 0x01,
            DeleteRule::Cascade => 0x02,
            DeleteRule::Deny => 0x03,
            DeleteRule::NoAction => 0x04,
        },
    );
}

fn write_value(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Null => write_tag(hasher, 0x00),
        Value::Integer(i) => {
            write_tag(hasher, 0x01);
            hasher.update(i.to_be_bytes());
        }
        Value::Float(f) => {
            write_tag(hasher, 0x02);
            hasher.update(f.to_bits().to_be_bytes());
        }
        Value::Text(s) => {
            write_tag(hasher, 0x03);
            write_str(hasher, s);
        }
        Value::Boolean(b) => {
            write_tag(hasher, 0x04);
            write_tag(hasher, u8::from(*b));
        }
        Value::Date(d) => {
            write_tag(hasher, 0x05);
            hasher.update(d.timestamp().to_be_bytes());
            hasher.update(d.timestamp_subsec_nanos().to_be_bytes());
        }
        Value::Binary(bytes) => {
            write_tag(hasher, 0x06);
            write_len(hasher, bytes.len());
            hasher.update(bytes);
        }
    }
}

fn write_tag(hasher: &mut Sha256, tag: u8) {
    hasher.update([tag]);
}

fn write_len(hasher: &mut Sha256, len: usize) {
    hasher.update((len as u64).to_be_bytes());
}

fn write_str(hasher: &mut Sha256, s: &str) {
    write_len(hasher, s.len());
    hasher.update(s.as_bytes());
}
