//! Threshold scoring of derived fields.
//!
//! Every scored field gets a companion `SCORE_<name>` field holding one
//! score when the value falls within `[lower, upper]` and another when it
//! does not. Defaults give a binary 1/0 score.

use crate::models::{validate_field_name, AttributeValue, FeatureTable, FieldType};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Bounds and scores applied to every scored field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub upper: f64,
    pub lower: f64,
    pub within_score: f64,
    pub outside_score: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            upper: 0.0,
            lower: 0.0,
            within_score: 1.0,
            outside_score: 0.0,
        }
    }
}

/// Score a single value; both bounds are inclusive.
pub fn score_value(value: f64, thresholds: &Thresholds) -> f64 {
    if value >= thresholds.lower && value <= thresholds.upper {
        thresholds.within_score
    } else {
        thresholds.outside_score
    }
}

/// Name of the score field for a scored field: `SCORE_` plus the field
/// name without its first `DIST_` and then its first `ANGLE_`.
pub fn score_field_name(field: &str, max_len: usize) -> String {
    let stripped = field.replacen("DIST_", "", 1).replacen("ANGLE_", "", 1);
    validate_field_name(&format!("SCORE_{}", stripped), max_len)
}

/// Outcome of scoring one field.
#[derive(Debug, Clone)]
pub struct ScoredField {
    pub source: String,
    pub score_field: String,
    /// Rows that received a score (non-null numeric input).
    pub scored: usize,
}

/// Add and compute a score field for each of `fields`.
///
/// Fields missing from the table are reported and skipped. A null or
/// non-numeric value scores as null for that row only.
pub fn chained_scoring(
    table: &mut FeatureTable,
    fields: &[String],
    thresholds: &Thresholds,
    max_field_length: usize,
) -> Vec<ScoredField> {
    info!("Adding and Computing Score Fields.");
    let mut results = Vec::with_capacity(fields.len());

    for field in fields {
        let score_name = score_field_name(field, max_field_length);

        let Some(source) = table.find_field(field).map(|f| f.name.clone()) else {
            warn!("Could not process field {}", score_name);
            continue;
        };

        let stored = table.add_field(&score_name, FieldType::Double, Some(&score_name));
        info!(
            "Computing score for field {}. Returning {} if value <= {} and >= {}, and {} otherwise.",
            stored,
            thresholds.within_score,
            thresholds.upper,
            thresholds.lower,
            thresholds.outside_score
        );

        let mut scored = 0;
        for feature in &mut table.features {
            let score = match feature.get(&source).as_f64() {
                Some(value) => {
                    scored += 1;
                    AttributeValue::Float(score_value(value, thresholds))
                }
                None => AttributeValue::Null,
            };
            feature.set(stored.clone(), score);
        }

        debug!("Scored {} rows of {}", scored, source);
        results.push(ScoredField {
            source,
            score_field: stored,
            scored,
        });
    }

    results
}
