//! Core value types shared by the graph and its files

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a file within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Parameters for inserting a new file into a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    pub path: PathBuf,
    /// Explicit id. When absent the graph allocates a fresh one.
    pub id: Option<FileId>,
}

impl FileSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSpec {
            path: path.into(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: FileId) -> Self {
        self.id = Some(id);
        self
    }
}

impl From<PathBuf> for FileSpec {
    fn from(path: PathBuf) -> Self {
        FileSpec::new(path)
    }
}

impl From<&Path> for FileSpec {
    fn from(path: &Path) -> Self {
        FileSpec::new(path)
    }
}

impl From<&PathBuf> for FileSpec {
    fn from(path: &PathBuf) -> Self {
        FileSpec::new(path.clone())
    }
}

impl From<&str> for FileSpec {
    fn from(path: &str) -> Self {
        FileSpec::new(path)
    }
}

/// A value stored in a file's attribute bag.
///
/// Plugins use attributes to hand state from one hook to another (a packed
/// module mapping, a stat timestamp, parsed front-matter). The core never
/// looks inside them; it only clones and persists them. Every variant is
/// tagged on the wire so byte buffers and timestamps come back as the same
/// variant they went in as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Attribute {
    Null,
    Bool(bool),
    Int(i64),
    Float(#[serde(with = "float")] f64),
    String(String),
    Bytes(Vec<u8>),
    Time(DateTime<Utc>),
    List(Vec<Attribute>),
    Map(BTreeMap<String, Attribute>),
}

impl Attribute {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Attribute::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Attribute::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Attribute::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attribute::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Attribute::Bytes(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Attribute::Time(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Attribute]> {
        match self {
            Attribute::List(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Attribute>> {
        match self {
            Attribute::Map(values) => Some(values),
            _ => None,
        }
    }
}

/// JSON has no NaN or infinity, so those travel as strings.
mod float {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        match *value {
            v if v.is_finite() => serializer.serialize_f64(v),
            v if v.is_nan() => serializer.serialize_str("NaN"),
            v if v > 0.0 => serializer.serialize_str("inf"),
            _ => serializer.serialize_str("-inf"),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => match text.as_str() {
                "NaN" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(D::Error::custom(format!("invalid float attribute {other:?}"))),
            },
        }
    }
}

impl From<bool> for Attribute {
    fn from(value: bool) -> Self {
        Attribute::Bool(value)
    }
}

impl From<i64> for Attribute {
    fn from(value: i64) -> Self {
        Attribute::Int(value)
    }
}

impl From<f64> for Attribute {
    fn from(value: f64) -> Self {
        Attribute::Float(value)
    }
}

impl From<&str> for Attribute {
    fn from(value: &str) -> Self {
        Attribute::String(value.to_string())
    }
}

impl From<String> for Attribute {
    fn from(value: String) -> Self {
        Attribute::String(value)
    }
}

impl From<Vec<u8>> for Attribute {
    fn from(value: Vec<u8>) -> Self {
        Attribute::Bytes(value)
    }
}

impl From<DateTime<Utc>> for Attribute {
    fn from(value: DateTime<Utc>) -> Self {
        Attribute::Time(value)
    }
}

impl From<Vec<Attribute>> for Attribute {
    fn from(values: Vec<Attribute>) -> Self {
        Attribute::List(values)
    }
}

impl From<BTreeMap<String, Attribute>> for Attribute {
    fn from(values: BTreeMap<String, Attribute>) -> Self {
        Attribute::Map(values)
    }
}
