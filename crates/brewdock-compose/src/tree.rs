//! Typed config tree.
//!
//! Config files are decoded into a [`ConfigValue`] tree, mutated through
//! dotted key paths, and encoded back into the format they came from.
//! Map keys are kept sorted, so encoding the same tree twice is
//! byte-identical.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use brewdock_common::error::{BrewdockError, Result};
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};

/// A node of a decoded config document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
    /// An explicit null.
    Null,
    /// A boolean.
    Bool(bool),
    /// An integral number.
    Integer(i64),
    /// An integral number above `i64::MAX`.
    Unsigned(u64),
    /// A non-integral number.
    Float(f64),
    /// A string.
    String(String),
    /// An ordered sequence.
    Array(Vec<ConfigValue>),
    /// A string-keyed mapping.
    Map(BTreeMap<String, ConfigValue>),
}

/// One step of a dotted key path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

impl<'a> Segment<'a> {
    fn parse(full_key: &str, raw: &'a str) -> Result<Self> {
        if raw.is_empty() {
            return Err(path_error(full_key, raw, "empty segment"));
        }
        match raw.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            Some(digits) => digits
                .parse::<usize>()
                .map(Segment::Index)
                .map_err(|_| path_error(full_key, raw, "array index is not a number")),
            None => Ok(Segment::Key(raw)),
        }
    }
}

fn path_error(key: &str, segment: &str, reason: impl Into<String>) -> BrewdockError {
    BrewdockError::PathResolution {
        key: key.to_string(),
        segment: segment.to_string(),
        reason: reason.into(),
    }
}

impl ConfigValue {
    /// Returns a short name of the node kind, used in error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) | Self::Unsigned(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
        }
    }

    /// Writes `value` at the dotted `key` path.
    ///
    /// Only the terminal segment is created or overwritten; every
    /// intermediate segment must already exist. A segment of the form
    /// `[N]` addresses element `N` of an existing array.
    ///
    /// # Errors
    ///
    /// Returns [`BrewdockError::PathResolution`] if the key is empty, an
    /// intermediate segment is missing or not a container, or an index is
    /// out of bounds.
    pub fn set_path(&mut self, key: &str, value: Self) -> Result<()> {
        let raw_segments: Vec<&str> = key.split('.').collect();
        let Some((last_raw, parents)) = raw_segments.split_last() else {
            return Err(path_error(key, "", "empty key"));
        };

        let mut node = self;
        for raw in parents {
            node = match Segment::parse(key, raw)? {
                Segment::Key(name) => match node {
                    Self::Map(map) => map
                        .get_mut(name)
                        .ok_or_else(|| path_error(key, raw, "intermediate map does not exist"))?,
                    other => {
                        return Err(path_error(key, raw, format!("parent is a {}, not a map", other.kind())));
                    }
                },
                Segment::Index(idx) => match node {
                    Self::Array(items) => {
                        let len = items.len();
                        items.get_mut(idx).ok_or_else(|| {
                            path_error(key, raw, format!("index out of bounds (len {len})"))
                        })?
                    }
                    other => {
                        return Err(path_error(key, raw, format!("parent is a {}, not an array", other.kind())));
                    }
                },
            };
        }

        match (Segment::parse(key, last_raw)?, node) {
            (Segment::Key(name), Self::Map(map)) => {
                let _ = map.insert(name.to_string(), value);
                Ok(())
            }
            (Segment::Index(idx), Self::Array(items)) => {
                let len = items.len();
                let slot = items.get_mut(idx).ok_or_else(|| {
                    path_error(key, last_raw, format!("index out of bounds (len {len})"))
                })?;
                *slot = value;
                Ok(())
            }
            (Segment::Key(_), other) => Err(path_error(
                key,
                last_raw,
                format!("parent is a {}, not a map", other.kind()),
            )),
            (Segment::Index(_), other) => Err(path_error(
                key,
                last_raw,
                format!("parent is a {}, not an array", other.kind()),
            )),
        }
    }

    /// Reads the node at the dotted `key` path, if it exists.
    #[must_use]
    pub fn get_path(&self, key: &str) -> Option<&Self> {
        key.split('.').try_fold(self, |node, raw| match Segment::parse(key, raw).ok()? {
            Segment::Key(name) => match node {
                Self::Map(map) => map.get(name),
                _ => None,
            },
            Segment::Index(idx) => match node {
                Self::Array(items) => items.get(idx),
                _ => None,
            },
        })
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<'de> Deserialize<'de> for ConfigValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = ConfigValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a config value")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<ConfigValue, E> {
        Ok(ConfigValue::Null)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<ConfigValue, E> {
        Ok(ConfigValue::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<ConfigValue, D::Error> {
        ConfigValue::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<ConfigValue, E> {
        Ok(ConfigValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<ConfigValue, E> {
        Ok(ConfigValue::Integer(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<ConfigValue, E> {
        Ok(i64::try_from(v).map_or(ConfigValue::Unsigned(v), ConfigValue::Integer))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<ConfigValue, E> {
        Ok(ConfigValue::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<ConfigValue, E> {
        Ok(ConfigValue::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<ConfigValue, E> {
        Ok(ConfigValue::String(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<ConfigValue, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(ConfigValue::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<ConfigValue, A::Error> {
        let mut map = BTreeMap::new();
        while let Some((MapKey(key), value)) = access.next_entry()? {
            let _ = map.insert(key, value);
        }
        Ok(ConfigValue::Map(map))
    }
}

/// Map key of any scalar type, rendered as a string.
struct MapKey(String);

impl<'de> Deserialize<'de> for MapKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(KeyVisitor).map(MapKey)
    }
}

struct KeyVisitor;

impl Visitor<'_> for KeyVisitor {
    type Value = String;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a scalar map key")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<String, E> {
        Ok("null".to_string())
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<String, E> {
        Ok(v)
    }
}

/// On-disk format of a config file, inferred from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// `.yaml` or `.yml`.
    Yaml,
    /// `.json`.
    Json,
}

impl ConfigFormat {
    /// Infers the format from a file extension.
    ///
    /// # Errors
    ///
    /// Returns [`BrewdockError::UnsupportedFormat`] for any other extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Ok(Self::Yaml),
            Some("json") => Ok(Self::Json),
            _ => Err(BrewdockError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Decodes a document into a config tree.
    ///
    /// # Errors
    ///
    /// Returns [`BrewdockError::Decode`] on malformed input.
    pub fn decode(self, text: &str, path: &Path) -> Result<ConfigValue> {
        let decoded = match self {
            Self::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string()),
            Self::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
        };
        decoded.map_err(|message| BrewdockError::Decode {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Encodes a config tree into this format.
    ///
    /// # Errors
    ///
    /// Returns [`BrewdockError::Encode`] if serialization fails.
    pub fn encode(self, value: &ConfigValue, path: &Path) -> Result<String> {
        let encoded = match self {
            Self::Yaml => serde_yaml::to_string(value).map_err(|e| e.to_string()),
            Self::Json => serde_json::to_string_pretty(value)
                .map(|mut s| {
                    s.push('\n');
                    s
                })
                .map_err(|e| e.to_string()),
        };
        encoded.map_err(|message| BrewdockError::Encode {
            path: path.to_path_buf(),
            message,
        })
    }
}

/// Reads and decodes a config file, inferring its format from the extension.
///
/// # Errors
///
/// Returns an error if the extension is unsupported, the file cannot be
/// read, or its content is malformed.
pub fn load_config_file(path: &Path) -> Result<(ConfigFormat, ConfigValue)> {
    let format = ConfigFormat::from_path(path)?;
    let text = std::fs::read_to_string(path).map_err(|e| BrewdockError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let tree = format.decode(&text, path)?;
    tracing::debug!(path = %path.display(), "loaded config file");
    Ok((format, tree))
}

/// Encodes a config tree and writes it to `path`.
///
/// # Errors
///
/// Returns an error if encoding or writing fails.
pub fn write_config_file(path: &Path, format: ConfigFormat, tree: &ConfigValue) -> Result<()> {
    let text = format.encode(tree, path)?;
    std::fs::write(path, text).map_err(|e| BrewdockError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}
