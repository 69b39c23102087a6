//! Entity definitions and path-based entity extraction.
//!
//! An entity is a named token embedded in a BIDS file name (`sub-01`, `run-2`,
//! `desc-preproc`). Each entity carries a regular expression with a single
//! capture group; applying every entity of an [`EntityTable`] to a path yields
//! an [`EntityMap`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, PatternError};

/// Mapping from entity name to value. Ordered so that output is deterministic.
pub type EntityMap = BTreeMap<String, EntityValue>;

/// Serialized form of an entity, as found in layout configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDefinition {
    /// Unique entity name.
    pub name: String,
    /// Regular expression with exactly one capture group.
    pub pattern: String,
    /// Optional coercion target (`int` or `str`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,
}

impl EntityDefinition {
    /// Creates a string-typed entity definition.
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            dtype: None,
        }
    }

    /// Sets the dtype of this definition.
    pub fn with_dtype(mut self, dtype: impl Into<String>) -> Self {
        self.dtype = Some(dtype.into());
        self
    }
}

/// Coercion applied to a captured entity value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dtype {
    #[default]
    Str,
    Int,
}

impl Dtype {
    fn parse(entity: &str, dtype: Option<&str>) -> Result<Self, ConfigError> {
        match dtype {
            None | Some("str") => Ok(Dtype::Str),
            Some("int") => Ok(Dtype::Int),
            Some(other) => Err(ConfigError::UnknownDtype {
                entity: entity.to_string(),
                dtype: other.to_string(),
            }),
        }
    }
}

/// Integer that remembers the zero-padded width it was written with.
///
/// `run-01` parses to value 1 with width 2 and renders back as `01`.
#[derive(Debug, Clone, Copy, Eq)]
pub struct PaddedInt {
    pub value: i64,
    pub width: usize,
}

impl PaddedInt {
    pub fn new(value: i64) -> Self {
        Self { value, width: 0 }
    }

    /// Parses a decimal string, keeping its width.
    ///
    /// Returns `None` for non-digit text and for values above `i64::MAX`.
    pub fn parse(text: &str) -> Option<Self> {
        if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let value = text.parse::<i64>().ok()?;
        Some(Self {
            value,
            width: text.len(),
        })
    }
}

impl PartialEq for PaddedInt {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl fmt::Display for PaddedInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$}", self.value, width = self.width)
    }
}

/// Value of an extracted or supplied entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityValue {
    Str(String),
    Int(PaddedInt),
}

impl EntityValue {
    /// Returns true if both values denote the same entity value.
    ///
    /// Integers compare numerically, so `Int(1)` matches `"01"`.
    pub fn matches(&self, other: &EntityValue) -> bool {
        match (self, other) {
            (EntityValue::Int(a), EntityValue::Int(b)) => a.value == b.value,
            (EntityValue::Int(a), EntityValue::Str(s)) | (EntityValue::Str(s), EntityValue::Int(a)) => {
                PaddedInt::parse(s).is_some_and(|p| p.value == a.value)
            }
            (EntityValue::Str(a), EntityValue::Str(b)) => a == b,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            EntityValue::Str(s) => Some(s),
            EntityValue::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            EntityValue::Int(p) => Some(p.value),
            EntityValue::Str(_) => None,
        }
    }
}

impl fmt::Display for EntityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityValue::Str(s) => f.write_str(s),
            EntityValue::Int(p) => p.fmt(f),
        }
    }
}

impl From<&str> for EntityValue {
    fn from(value: &str) -> Self {
        EntityValue::Str(value.to_string())
    }
}

impl From<String> for EntityValue {
    fn from(value: String) -> Self {
        EntityValue::Str(value)
    }
}

impl From<i64> for EntityValue {
    fn from(value: i64) -> Self {
        EntityValue::Int(PaddedInt::new(value))
    }
}

impl From<PaddedInt> for EntityValue {
    fn from(value: PaddedInt) -> Self {
        EntityValue::Int(value)
    }
}

impl Serialize for EntityValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A compiled entity.
#[derive(Debug, Clone)]
pub struct Entity {
    name: String,
    regex: Regex,
    dtype: Dtype,
}

impl Entity {
    /// Compiles an entity definition, checking its regex and capture group count.
    pub fn compile(def: &EntityDefinition) -> Result<Self, ConfigError> {
        let regex = Regex::new(&def.pattern).map_err(|e| ConfigError::InvalidEntityPattern {
            entity: def.name.clone(),
            pattern: def.pattern.clone(),
            message: e.to_string(),
        })?;

        // captures_len counts the implicit whole-match group
        let groups = regex.captures_len() - 1;
        if groups != 1 {
            return Err(ConfigError::CaptureGroupCount {
                entity: def.name.clone(),
                found: groups,
            });
        }

        Ok(Self {
            name: def.name.clone(),
            regex,
            dtype: Dtype::parse(&def.name, def.dtype.as_deref())?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// Applies this entity to a path. Returns `Ok(None)` when the pattern does not match.
    pub fn extract(&self, path: &str) -> Result<Option<EntityValue>, PatternError> {
        let Some(raw) = self
            .regex
            .captures(path)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
        else {
            return Ok(None);
        };

        match self.dtype {
            Dtype::Str => Ok(Some(EntityValue::Str(raw.to_string()))),
            Dtype::Int => PaddedInt::parse(raw)
                .map(|p| Some(EntityValue::Int(p)))
                .ok_or_else(|| {
                    let reason = if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
                        format!("integer exceeds the maximum of {}", i64::MAX)
                    } else {
                        "expected an integer".to_string()
                    };
                    PatternError::MalformedEntityValue {
                        entity: self.name.clone(),
                        value: raw.to_string(),
                        reason,
                    }
                }),
        }
    }
}

/// Ordered collection of compiled entities with unique names.
#[derive(Debug, Clone, Default)]
pub struct EntityTable {
    entities: Vec<Entity>,
    index: HashMap<String, usize>,
}

impl EntityTable {
    /// Compiles a list of definitions into a table.
    pub fn from_definitions(defs: &[EntityDefinition]) -> Result<Self, ConfigError> {
        let mut table = Self::default();
        for def in defs {
            if table.index.contains_key(&def.name) {
                return Err(ConfigError::DuplicateEntity(def.name.clone()));
            }
            table.index.insert(def.name.clone(), table.entities.len());
            table.entities.push(Entity::compile(def)?);
        }
        Ok(table)
    }

    pub fn get(&self, name: &str) -> Option<&Entity> {
        self.index.get(name).map(|&i| &self.entities[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(|e| e.name.as_str())
    }

    /// Extracts every matching entity from `path`.
    ///
    /// Backslash separators are normalised to `/` first. Entities whose pattern
    /// does not match are absent from the result.
    pub fn extract(&self, path: &str) -> Result<EntityMap, PatternError> {
        let normalised = path.replace('\\', "/");
        let mut found = EntityMap::new();
        for entity in &self.entities {
            if let Some(value) = entity.extract(&normalised)? {
                found.insert(entity.name.clone(), value);
            }
        }
        Ok(found)
    }
}
