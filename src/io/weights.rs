//! Spatial weights relation files.
//!
//! A weights relation is the table form of a spatial weights matrix: one
//! row per (source, neighbor) pair with its weight, plus the name of the
//! feature-table field the source and neighbor ids refer to.

use crate::error::{Error, Result};
use crate::models::{EntityId, NeighborTuple};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::info;

/// Neighbor relation tuples keyed by a feature-table join field.
#[derive(Debug, Clone)]
pub struct WeightsRelation {
    /// Field in the feature table holding entity ids.
    pub join_field: String,
    pub relations: Vec<NeighborTuple>,
}

#[derive(Debug, Deserialize)]
struct RawWeights {
    join_field: String,
    #[serde(default)]
    rows: Vec<RawRow>,
}

#[derive(Debug, Deserialize)]
struct RawRow {
    source: RawId,
    neighbor: RawId,
    #[serde(default = "default_weight")]
    weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<RawId> for EntityId {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Int(i) => EntityId::Int(i),
            RawId::Float(f) if f.is_finite() && f.fract() == 0.0 => EntityId::Int(f as i64),
            RawId::Float(f) => EntityId::Text(f.to_string()),
            RawId::Text(s) => EntityId::Text(s),
        }
    }
}

/// Read a weights relation file.
pub fn read_weights(path: &Path) -> Result<WeightsRelation> {
    let content = fs::read_to_string(path)?;
    let weights = parse_weights(&content)?;
    info!(
        "Read {} neighbor relations from {} (join field {})",
        weights.relations.len(),
        path.display(),
        weights.join_field
    );
    Ok(weights)
}

/// Parse a weights relation. Negative or non-finite weights are rejected.
pub fn parse_weights(content: &str) -> Result<WeightsRelation> {
    let raw: RawWeights = serde_json::from_str(content)?;

    if raw.join_field.trim().is_empty() {
        return Err(Error::InvalidParameter {
            name: "join_field",
            value: raw.join_field,
            reason: "must name a field".to_string(),
        });
    }

    let relations = raw
        .rows
        .into_iter()
        .map(|row| {
            let tuple = NeighborTuple::new(row.source, row.neighbor, row.weight);
            if !(tuple.weight.is_finite() && tuple.weight >= 0.0) {
                return Err(Error::InvalidWeight {
                    entity: tuple.entity.to_string(),
                    neighbor: tuple.neighbor.to_string(),
                    weight: tuple.weight,
                });
            }
            Ok(tuple)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(WeightsRelation {
        join_field: raw.join_field,
        relations,
    })
}
