use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single persisted attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Date(DateTime<Utc>),
    Binary(Vec<u8>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::Boolean(_) => "BOOLEAN",
            Self::Date(_) => "DATE",
            Self::Binary(_) => "BINARY",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Converts the value to `target`, used by type-coercing attribute transforms.
    ///
    /// `Null` coerces to `Null` for every type. Lossy conversions (a fractional
    /// float to an integer, unparsable text) are errors rather than silent truncation.
    pub fn coerce(&self, target: AttributeType) -> Result<Value, String> {
        if target.is_compatible(self) {
            return Ok(match (target, self) {
                (AttributeType::Float, Value::Integer(i)) => Value::Float(*i as f64),
                _ => self.clone(),
            });
        }

        let fail = || {
            format!(
                "cannot coerce {} value '{}' to {}",
                self.type_name(),
                self,
                target
            )
        };

        match (target, self) {
            (AttributeType::Integer, Value::Float(f)) => {
                // i64::MAX rounds up to 2^63 as f64, so the upper bound is exclusive.
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 {
                    Ok(Value::Integer(*f as i64))
                } else {
                    Err(fail())
                }
            }
            (AttributeType::Integer, Value::Boolean(b)) => Ok(Value::Integer(i64::from(*b))),
            (AttributeType::Integer, Value::Text(s)) => {
                s.trim().parse::<i64>().map(Value::Integer).map_err(|_| fail())
            }
            (AttributeType::Integer, Value::Date(d)) => Ok(Value::Integer(d.timestamp_millis())),

            (AttributeType::Float, Value::Text(s)) => {
                s.trim().parse::<f64>().map(Value::Float).map_err(|_| fail())
            }

            (AttributeType::Boolean, Value::Integer(i)) => Ok(Value::Boolean(*i != 0)),
            (AttributeType::Boolean, Value::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Value::Boolean(true)),
                "false" | "no" | "0" => Ok(Value::Boolean(false)),
                _ => Err(fail()),
            },

            (AttributeType::Text, Value::Binary(bytes)) => String::from_utf8(bytes.clone())
                .map(Value::Text)
                .map_err(|_| fail()),
            (AttributeType::Text, Value::Date(d)) => Ok(Value::Text(d.to_rfc3339())),
            (AttributeType::Text, other) => Ok(Value::Text(other.to_string())),

            (AttributeType::Date, Value::Integer(ms)) => Utc
                .timestamp_millis_opt(*ms)
                .single()
                .map(Value::Date)
                .ok_or_else(fail),
            (AttributeType::Date, Value::Text(s)) => DateTime::parse_from_rfc3339(s.trim())
                .map(|d| Value::Date(d.with_timezone(&Utc)))
                .map_err(|_| fail()),

            (AttributeType::Binary, Value::Text(s)) => Ok(Value::Binary(s.as_bytes().to_vec())),

            _ => Err(fail()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(fl) => write!(f, "{}", fl),
            Self::Text(s) => write!(f, "{}", s),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Date(d) => write!(f, "{}", d.to_rfc3339()),
            Self::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Self::Date(d)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

/// Primitive attribute types a schema can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttributeType {
    Integer,
    Float,
    Text,
    Boolean,
    Date,
    Binary,
}

impl AttributeType {
    /// Whether `value` can be stored in an attribute of this type as-is.
    pub fn is_compatible(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::Integer, Value::Integer(_)) => true,
            (Self::Float, Value::Float(_)) => true,
            (Self::Float, Value::Integer(_)) => true,
            (Self::Text, Value::Text(_)) => true,
            (Self::Boolean, Value::Boolean(_)) => true,
            (Self::Date, Value::Date(_)) => true,
            (Self::Binary, Value::Binary(_)) => true,
            _ => false,
        }
    }

    pub(crate) fn tag(&self) -> u8 {
        match self {
            Self::Integer => 1,
            Self::Float => 2,
            Self::Text => 3,
            Self::Boolean => 4,
            Self::Date => 5,
            Self::Binary => 6,
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "INTEGER"),
            Self::Float => write!(f, "FLOAT"),
            Self::Text => write!(f, "TEXT"),
            Self::Boolean => write!(f, "BOOLEAN"),
            Self::Date => write!(f, "DATE"),
            Self::Binary => write!(f, "BINARY"),
        }
    }
}
