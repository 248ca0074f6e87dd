//! Neighborhood statistics over a feature table.
//!
//! Resolves the weights relation's join field against the table, builds
//! attribute vectors from the requested fields, runs the aggregator and
//! joins the resulting columns onto a copy of the table.

use crate::analysis::aggregator::{aggregate, AttributeVector, StatsContext};
use crate::error::{Error, Result};
use crate::io::WeightsRelation;
use crate::models::{EntityId, FeatureTable};
use std::collections::HashMap;
use tracing::{info, warn};

/// Output of a neighborhood statistics run.
#[derive(Debug, Clone)]
pub struct NeighborStats {
    /// Copy of the input table with the statistic columns joined on.
    pub table: FeatureTable,
    /// Names of the added columns.
    pub columns: Vec<String>,
    /// Number of source entities in the weights relation.
    pub entities: usize,
    /// Number of table rows that received values.
    pub matched: usize,
}

/// Compute neighborhood statistics for `table` from `weights`.
///
/// `context.fields` may use any casing; they are resolved against the table
/// and the stored spelling is used in output column names. A missing join
/// field or attribute field is an error.
pub fn compute_neighborhood_stats(
    table: &FeatureTable,
    weights: &WeightsRelation,
    context: &StatsContext,
) -> Result<NeighborStats> {
    let join_field = table
        .find_field(&weights.join_field)
        .map(|f| f.name.clone())
        .ok_or_else(|| Error::JoinFieldNotFound {
            field: weights.join_field.clone(),
            table: table.name.clone(),
        })?;

    let fields = context
        .fields
        .iter()
        .map(|f| table.require_field(f))
        .collect::<Result<Vec<_>>>()?;

    if context.statistics.is_empty() {
        warn!("No supported statistics requested; no columns will be added");
    }

    info!("Combining spatial weights matrix & feature class fields...");
    let attributes = attribute_vectors(table, &join_field, &fields);

    let resolved = StatsContext {
        fields,
        ..context.clone()
    };

    if resolved.weighted {
        info!("Computing weighted neighborhood statistics...");
    } else {
        info!("Computing non-weighted neighborhood statistics...");
    }
    let results = aggregate(&weights.relations, &attributes, &resolved);

    let columns: Vec<String> = resolved
        .statistics
        .iter()
        .flat_map(|&stat| {
            resolved
                .fields
                .iter()
                .map(move |field| (stat, field.clone()))
        })
        .map(|(stat, field)| resolved.column_name(stat, &field))
        .collect();

    info!("Joining new fields to feature class. The new fields are {:?}", columns);
    let mut output = table.clone();
    let matched = output.extend_by_key(&join_field, &columns, &results)?;

    if matched < results.len() {
        warn!(
            "{} of {} source entities have no row in {}",
            results.len() - matched.min(results.len()),
            results.len(),
            table.name
        );
    }

    Ok(NeighborStats {
        table: output,
        columns,
        entities: results.len(),
        matched,
    })
}

/// Numeric values of `fields` per join key. Rows without a usable key are
/// skipped; non-numeric values are left out of the vector.
fn attribute_vectors(
    table: &FeatureTable,
    join_field: &str,
    fields: &[String],
) -> HashMap<EntityId, AttributeVector> {
    let mut attributes = HashMap::with_capacity(table.len());

    for feature in &table.features {
        let Some(key) = EntityId::from_value(feature.get(join_field)) else {
            warn!(
                "Feature {} has no usable {} value; skipped",
                feature.fid, join_field
            );
            continue;
        };

        let vector: AttributeVector = fields
            .iter()
            .filter_map(|f| feature.get(f).as_f64().map(|v| (f.clone(), v)))
            .collect();

        if attributes.insert(key.clone(), vector).is_some() {
            warn!("Duplicate {} value {}; last row wins", join_field, key);
        }
    }

    attributes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::table::parse_table;
    use crate::io::weights::parse_weights;
    use crate::models::{AttributeValue, Statistic};

    fn fixture() -> (FeatureTable, WeightsRelation) {
        let table = parse_table(include_str!("../../fixtures/parcels.geojson"), "parcels").unwrap();
        let weights =
            parse_weights(include_str!("../../fixtures/parcels_weights.json")).unwrap();
        (table, weights)
    }

    fn value(table: &FeatureTable, row: usize, column: &str) -> AttributeValue {
        table.features[row].get(column).clone()
    }

    #[test]
    fn test_weighted_stats_on_fixture() {
        let (table, weights) = fixture();
        let context = StatsContext::new(vec!["pop".to_string()], Statistic::ALL.to_vec(), true);

        let stats = compute_neighborhood_stats(&table, &weights, &context).unwrap();

        assert_eq!(stats.columns, vec!["w_sum_POP", "w_mean_POP", "w_std_POP"]);
        assert_eq!(stats.entities, 3);
        assert_eq!(stats.matched, 3);
        assert_eq!(stats.table.len(), table.len());

        // PID 1: neighbors 2 (4.0, w1), 3 (null), 4 (10.0, w0).
        assert_eq!(value(&stats.table, 0, "w_sum_POP"), AttributeValue::Float(4.0));
        assert_eq!(value(&stats.table, 0, "w_mean_POP"), AttributeValue::Float(4.0));
        assert_eq!(value(&stats.table, 0, "w_std_POP"), AttributeValue::Float(0.0));

        // PID 2: single neighbor 1 with default weight.
        assert_eq!(value(&stats.table, 1, "w_mean_POP"), AttributeValue::Float(2.0));

        // PID 3: neighbor 9 does not exist, so the mean is the NaN sentinel.
        match value(&stats.table, 2, "w_mean_POP") {
            AttributeValue::Float(v) => assert!(v.is_nan()),
            other => panic!("expected NaN, got {:?}", other),
        }

        // PID 4 is never a source.
        assert!(value(&stats.table, 3, "w_sum_POP").is_null());

        // The input table is untouched.
        assert!(!table.field_exists("w_sum_POP"));
    }

    #[test]
    fn test_unweighted_stats_on_fixture() {
        let (table, weights) = fixture();
        let context = StatsContext::new(
            vec!["POP".to_string()],
            Statistic::parse_lenient(&["sum", "median"]),
            false,
        );

        let stats = compute_neighborhood_stats(&table, &weights, &context).unwrap();

        assert_eq!(stats.columns, vec!["sum_POP"]);
        assert!(!stats.table.field_exists("mean_POP"));
        // PID 1 unweighted: 4.0 + 10.0, null excluded.
        assert_eq!(value(&stats.table, 0, "sum_POP"), AttributeValue::Float(14.0));
    }

    #[test]
    fn test_columns_follow_statistic_order() {
        let (table, mut weights) = fixture();
        weights.relations.clear();
        let context = StatsContext::new(vec!["POP".to_string()], Statistic::ALL.to_vec(), false);

        let stats = compute_neighborhood_stats(&table, &weights, &context).unwrap();

        assert_eq!(stats.entities, 0);
        assert_eq!(stats.matched, 0);
        assert_eq!(stats.columns, vec!["sum_POP", "mean_POP", "std_POP"]);

        let added: Vec<&str> = stats.table.fields[table.fields.len()..]
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(added, stats.columns);
        assert!(value(&stats.table, 0, "sum_POP").is_null());
    }

    #[test]
    fn test_join_field_mismatch() {
        let (table, mut weights) = fixture();
        weights.join_field = "PARCEL_ID".to_string();
        let context = StatsContext::new(vec!["POP".to_string()], vec![Statistic::Sum], false);

        let result = compute_neighborhood_stats(&table, &weights, &context);
        assert!(matches!(result, Err(Error::JoinFieldNotFound { .. })));
    }

    #[test]
    fn test_missing_attribute_field() {
        let (table, weights) = fixture();
        let context = StatsContext::new(vec!["INCOME".to_string()], vec![Statistic::Sum], false);

        let result = compute_neighborhood_stats(&table, &weights, &context);
        assert!(matches!(result, Err(Error::FieldNotFound { .. })));
    }
}
