//! Data models for proxkit.
//!
//! This module contains the core data structures shared by every
//! command: entity identifiers, attribute values, point features,
//! feature tables with their field metadata, neighbor relation tuples
//! and the statistic enumeration.

use crate::error::{Error, Result};
use geo::Point;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, info};

/// Identifier of an entity (the join key between weights and features).
///
/// Integers sort before text so result maps iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Int(i64),
    Text(String),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Int(i) => write!(f, "{}", i),
            EntityId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl EntityId {
    /// Derive a key from an attribute value.
    ///
    /// Integral floats collapse to `Int` so `3.0` in a table matches `3` in
    /// a weights file. Null, booleans and fractional floats are not keys.
    pub fn from_value(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::Int(i) => Some(EntityId::Int(*i)),
            AttributeValue::Float(f) if f.is_finite() && f.fract() == 0.0 => {
                Some(EntityId::Int(*f as i64))
            }
            AttributeValue::String(s) => Some(EntityId::from(s.as_str())),
            _ => None,
        }
    }
}

impl From<i64> for EntityId {
    fn from(i: i64) -> Self {
        EntityId::Int(i)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId::Text(s.to_string())
    }
}

/// Attribute value types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl AttributeValue {
    /// Numeric view of the value. Anything non-numeric is missing.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(i) => Some(*i as f64),
            AttributeValue::Float(f) if !f.is_nan() => Some(*f),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Null, empty text, zero and false.
    pub fn is_falsy(&self) -> bool {
        match self {
            AttributeValue::Null => true,
            AttributeValue::Bool(b) => !b,
            AttributeValue::Int(i) => *i == 0,
            AttributeValue::Float(f) => *f == 0.0 || f.is_nan(),
            AttributeValue::String(s) => s.is_empty(),
        }
    }

    /// Equality as a SQL `field = value` query would see it: numbers compare
    /// by value regardless of integer/float storage, null never matches.
    pub fn matches(&self, other: &AttributeValue) -> bool {
        match (self, other) {
            (a, b) if a.is_null() || b.is_null() => false,
            (AttributeValue::Bool(a), AttributeValue::Bool(b)) => a == b,
            (AttributeValue::String(a), AttributeValue::String(b)) => a == b,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }

    fn rank(&self) -> u8 {
        match self {
            AttributeValue::Null => 0,
            AttributeValue::Bool(_) => 1,
            AttributeValue::Int(_) | AttributeValue::Float(_) => 2,
            AttributeValue::String(_) => 3,
        }
    }

    /// Total order used when sorting unique values.
    pub fn total_cmp(&self, other: &AttributeValue) -> Ordering {
        match (self, other) {
            (AttributeValue::Bool(a), AttributeValue::Bool(b)) => a.cmp(b),
            (AttributeValue::String(a), AttributeValue::String(b)) => a.cmp(b),
            (AttributeValue::Int(a), AttributeValue::Int(b)) => a.cmp(b),
            (a, b) if a.rank() == 2 && b.rank() == 2 => {
                let x = a.as_f64().unwrap_or(f64::NAN);
                let y = b.as_f64().unwrap_or(f64::NAN);
                x.total_cmp(&y)
            }
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Null => write!(f, "NULL"),
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::Int(i) => write!(f, "{}", i),
            // Integral floats keep their ".0" so they never collide with ints.
            AttributeValue::Float(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{:.1}", v),
            AttributeValue::Float(v) => write!(f, "{}", v),
            AttributeValue::String(s) => write!(f, "{}", s),
        }
    }
}

/// Storage type of a table field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Double,
    Integer,
    Text,
    Boolean,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Double => write!(f, "DOUBLE"),
            FieldType::Integer => write!(f, "LONG"),
            FieldType::Text => write!(f, "TEXT"),
            FieldType::Boolean => write!(f, "BOOLEAN"),
        }
    }
}

impl FieldType {
    /// Field type implied by a value, `None` for null.
    pub fn of(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::Null => None,
            AttributeValue::Bool(_) => Some(FieldType::Boolean),
            AttributeValue::Int(_) => Some(FieldType::Integer),
            AttributeValue::Float(_) => Some(FieldType::Double),
            AttributeValue::String(_) => Some(FieldType::Text),
        }
    }
}

/// Field metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name as stored in feature properties.
    pub name: String,
    /// Storage type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Display alias (the unvalidated name for derived fields).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            alias: None,
        }
    }
}

/// A point feature with attributes.
#[derive(Debug, Clone)]
pub struct Feature {
    /// Object id.
    pub fid: i64,
    /// Point geometry, `None` for rows without a shape.
    pub geometry: Option<Point<f64>>,
    /// Attribute values keyed by field name.
    pub properties: HashMap<String, AttributeValue>,
}

impl Feature {
    pub fn new(fid: i64, geometry: Option<Point<f64>>) -> Self {
        Self {
            fid,
            geometry,
            properties: HashMap::new(),
        }
    }

    /// Set an attribute.
    pub fn set(&mut self, key: impl Into<String>, value: AttributeValue) {
        self.properties.insert(key.into(), value);
    }

    /// Get an attribute; absent keys read as null.
    pub fn get(&self, key: &str) -> &AttributeValue {
        const NULL: &AttributeValue = &AttributeValue::Null;
        self.properties.get(key).unwrap_or(NULL)
    }
}

/// An attribute table of point features with ordered field metadata.
#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    /// Table name (used for near layer naming).
    pub name: String,
    /// Ordered field definitions.
    pub fields: Vec<FieldDef>,
    /// Rows.
    pub features: Vec<Feature>,
}

impl FeatureTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            features: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Look up a field by name, ignoring case.
    pub fn find_field(&self, name: &str) -> Option<&FieldDef> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Check whether a field exists (case-insensitive).
    pub fn field_exists(&self, name: &str) -> bool {
        self.find_field(name).is_some()
    }

    /// Resolve a field name to its stored spelling or fail.
    pub fn require_field(&self, name: &str) -> Result<String> {
        self.find_field(name)
            .map(|f| f.name.clone())
            .ok_or_else(|| Error::FieldNotFound {
                field: name.to_string(),
                table: self.name.clone(),
            })
    }

    /// Add a new field if it does not exist yet.
    ///
    /// Returns the stored name: the existing field's spelling when present,
    /// otherwise `name`.
    pub fn add_field(&mut self, name: &str, field_type: FieldType, alias: Option<&str>) -> String {
        if let Some(existing) = self.find_field(name) {
            info!("{} Exists", existing.name);
            return existing.name.clone();
        }

        info!("Adding {}", name);
        self.fields.push(FieldDef {
            name: name.to_string(),
            field_type,
            alias: alias.map(String::from),
        });
        name.to_string()
    }

    /// Sorted unique values of a field, optionally dropping falsy values.
    pub fn unique_values(&self, field: &str, filter_falsy: bool) -> Result<Vec<AttributeValue>> {
        let field = self.require_field(field)?;

        let mut values: Vec<AttributeValue> = self
            .features
            .iter()
            .map(|f| f.get(&field).clone())
            .filter(|v| !(filter_falsy && v.is_falsy()))
            .collect();

        values.sort_by(|a, b| a.total_cmp(b));
        values.dedup_by(|a, b| a.total_cmp(b) == Ordering::Equal);

        Ok(values)
    }

    /// Subset of this table whose `field` equals `value`.
    pub fn filter_by_value(
        &self,
        field: &str,
        value: &AttributeValue,
        layer_name: &str,
    ) -> Result<FeatureTable> {
        let field = self.require_field(field)?;

        Ok(FeatureTable {
            name: layer_name.to_string(),
            fields: self.fields.clone(),
            features: self
                .features
                .iter()
                .filter(|f| f.get(&field).matches(value))
                .cloned()
                .collect(),
        })
    }

    /// Join computed columns onto the table by key.
    ///
    /// Every name in `columns` is added as a Double field, in the given
    /// order. Rows whose `join_field` value matches a result key take that
    /// result's values; everything else is null. No rows are added or
    /// removed. Returns the number of matched rows.
    pub fn extend_by_key(
        &mut self,
        join_field: &str,
        columns: &[String],
        results: &BTreeMap<EntityId, BTreeMap<String, f64>>,
    ) -> Result<usize> {
        let join_field = self.require_field(join_field)?;

        let stored: Vec<String> = columns
            .iter()
            .map(|c| self.add_field(c, FieldType::Double, None))
            .collect();

        let mut matched = 0;
        for feature in &mut self.features {
            let row = EntityId::from_value(feature.get(&join_field)).and_then(|id| results.get(&id));

            if row.is_some() {
                matched += 1;
            }

            for (column, name) in columns.iter().zip(&stored) {
                let value = row
                    .and_then(|r| r.get(column))
                    .map(|v| AttributeValue::Float(*v))
                    .unwrap_or(AttributeValue::Null);
                feature.set(name.clone(), value);
            }
        }

        debug!(
            "Extended {} of {} rows with {} columns",
            matched,
            self.features.len(),
            columns.len()
        );
        Ok(matched)
    }
}

/// Make a name safe to use as a field name.
///
/// Characters outside `[A-Za-z0-9_]` become `_`, a leading digit gets an
/// `_` prefix, and the result is cut to `max_len` characters.
pub fn validate_field_name(name: &str, max_len: usize) -> String {
    let mut valid: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    if valid.is_empty() {
        valid.push('_');
    }

    if valid.starts_with(|c: char| c.is_ascii_digit()) {
        valid.insert(0, '_');
    }

    if max_len > 0 {
        valid.truncate(max_len);
    }

    valid
}

/// Directed, weighted adjacency from an entity to one of its neighbors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborTuple {
    pub entity: EntityId,
    pub neighbor: EntityId,
    pub weight: f64,
}

impl NeighborTuple {
    pub fn new(entity: impl Into<EntityId>, neighbor: impl Into<EntityId>, weight: f64) -> Self {
        Self {
            entity: entity.into(),
            neighbor: neighbor.into(),
            weight,
        }
    }
}

/// Neighborhood statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    Sum,
    Mean,
    Std,
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Statistic {
    pub const ALL: [Statistic; 3] = [Statistic::Sum, Statistic::Mean, Statistic::Std];

    pub fn name(&self) -> &'static str {
        match self {
            Statistic::Sum => "sum",
            Statistic::Mean => "mean",
            Statistic::Std => "std",
        }
    }

    /// Output column prefix: `sum`, or `w_sum` for weighted runs.
    pub fn prefix(&self, weighted: bool) -> String {
        if weighted {
            format!("w_{}", self.name())
        } else {
            self.name().to_string()
        }
    }

    /// Parse a single statistic name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "sum" => Some(Statistic::Sum),
            "mean" => Some(Statistic::Mean),
            "std" => Some(Statistic::Std),
            _ => None,
        }
    }

    /// Parse a list of names, dropping unsupported ones.
    ///
    /// The result is deduplicated and in canonical order (sum, mean, std).
    pub fn parse_lenient<S: AsRef<str>>(names: &[S]) -> Vec<Statistic> {
        let mut stats: Vec<Statistic> = names
            .iter()
            .filter_map(|n| {
                let parsed = Statistic::from_name(n.as_ref());
                if parsed.is_none() {
                    debug!("Ignoring unsupported statistic: {}", n.as_ref());
                }
                parsed
            })
            .collect();
        stats.sort();
        stats.dedup();
        stats
    }
}
