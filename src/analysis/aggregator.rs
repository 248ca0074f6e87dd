//! Neighborhood statistics aggregation.
//!
//! Joins a neighbor relation against per-entity attribute vectors and
//! computes, for every source entity, sum / mean / population standard
//! deviation of each requested attribute over its neighbors, either plain
//! or weighted by the relation's weights.
//!
//! The computation is pure: callers supply the relation and attribute data
//! and merge the result back into a table themselves.

use crate::models::{EntityId, NeighborTuple, Statistic};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Attribute name to value for one entity. Missing values are absent keys.
pub type AttributeVector = HashMap<String, f64>;

/// Per-entity output columns, keyed `{prefix}_{attribute}`.
pub type AggregateResult = BTreeMap<EntityId, BTreeMap<String, f64>>;

/// Everything an aggregation pass needs besides the data itself.
#[derive(Debug, Clone)]
pub struct StatsContext {
    /// Attributes to summarize.
    pub fields: Vec<String>,
    /// Statistics to compute.
    pub statistics: Vec<Statistic>,
    /// Use relation weights.
    pub weighted: bool,
}

impl StatsContext {
    pub fn new(fields: Vec<String>, statistics: Vec<Statistic>, weighted: bool) -> Self {
        Self {
            fields,
            statistics,
            weighted,
        }
    }

    /// Output column name for a statistic over a field.
    pub fn column_name(&self, statistic: Statistic, field: &str) -> String {
        format!("{}_{}", statistic.prefix(self.weighted), field)
    }
}

/// One neighbor's contribution to a group: its weight and attribute vector
/// (`None` when the neighbor has no attribute row at all).
struct JoinedRecord<'a> {
    weight: f64,
    values: Option<&'a AttributeVector>,
}

/// Compute neighborhood statistics.
///
/// Every distinct `entity` in `relations` appears exactly once in the
/// result. A missing attribute value excludes that record from that
/// attribute only. Empty value sets give `sum = 0` and `NaN` mean/std; a
/// zero weight sum gives `NaN` weighted mean/std.
pub fn aggregate(
    relations: &[NeighborTuple],
    attributes: &HashMap<EntityId, AttributeVector>,
    context: &StatsContext,
) -> AggregateResult {
    let mut groups: BTreeMap<&EntityId, Vec<JoinedRecord<'_>>> = BTreeMap::new();

    for tuple in relations {
        groups.entry(&tuple.entity).or_default().push(JoinedRecord {
            weight: tuple.weight,
            values: attributes.get(&tuple.neighbor),
        });
    }

    debug!(
        "Aggregating {} relations into {} groups ({} mode)",
        relations.len(),
        groups.len(),
        if context.weighted { "weighted" } else { "unweighted" }
    );

    let mut results = AggregateResult::new();

    for (entity, records) in groups {
        let mut row = BTreeMap::new();

        for field in &context.fields {
            let samples: Vec<(f64, f64)> = records
                .iter()
                .filter_map(|r| {
                    let value = r.values.and_then(|v| v.get(field)).copied()?;
                    if value.is_nan() {
                        return None;
                    }
                    let weight = if context.weighted { r.weight } else { 1.0 };
                    Some((value, weight))
                })
                .collect();

            let summary = Summary::of(&samples);

            for &statistic in &context.statistics {
                let value = match statistic {
                    Statistic::Sum => summary.sum,
                    Statistic::Mean => summary.mean(),
                    Statistic::Std => summary.std(&samples),
                };
                row.insert(context.column_name(statistic, field), value);
            }
        }

        results.insert(entity.clone(), row);
    }

    results
}

/// Running totals for one attribute within one group.
///
/// Unweighted runs pass weight 1.0 for every sample, which reduces the
/// weighted formulas to the plain ones (count as the weight sum).
#[derive(Debug, Clone, Copy)]
struct Summary {
    sum: f64,
    weight_sum: f64,
}

impl Summary {
    fn of(samples: &[(f64, f64)]) -> Self {
        let mut summary = Summary {
            sum: 0.0,
            weight_sum: 0.0,
        };
        for &(value, weight) in samples {
            summary.sum += value * weight;
            summary.weight_sum += weight;
        }
        summary
    }

    fn mean(&self) -> f64 {
        if self.weight_sum == 0.0 {
            return f64::NAN;
        }
        self.sum / self.weight_sum
    }

    /// Population standard deviation around the (weighted) mean.
    fn std(&self, samples: &[(f64, f64)]) -> f64 {
        if self.weight_sum == 0.0 {
            return f64::NAN;
        }
        let mean = self.mean();
        let spread: f64 = samples
            .iter()
            .map(|&(value, weight)| weight * (value - mean) * (value - mean))
            .sum();
        (spread / self.weight_sum).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn attrs(rows: &[(i64, &[(&str, f64)])]) -> HashMap<EntityId, AttributeVector> {
        rows.iter()
            .map(|(id, values)| {
                let vector = values
                    .iter()
                    .map(|(k, v)| (k.to_string(), *v))
                    .collect::<AttributeVector>();
                (EntityId::Int(*id), vector)
            })
            .collect()
    }

    fn all_stats(weighted: bool) -> StatsContext {
        StatsContext::new(vec!["A".to_string()], Statistic::ALL.to_vec(), weighted)
    }

    #[test]
    fn test_weighted_reference_group() {
        let relations = vec![NeighborTuple::new(1, 2, 1.0), NeighborTuple::new(1, 3, 1.0)];
        let attributes = attrs(&[(2, &[("A", 2.0)]), (3, &[("A", 4.0)])]);

        let result = aggregate(&relations, &attributes, &all_stats(true));
        let row = &result[&EntityId::Int(1)];

        assert_eq!(row["w_sum_A"], 6.0);
        assert_eq!(row["w_mean_A"], 3.0);
        assert!((row["w_std_A"] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_unweighted_ignores_weights() {
        let relations = vec![NeighborTuple::new(1, 2, 5.0), NeighborTuple::new(1, 3, 0.0)];
        let attributes = attrs(&[(2, &[("A", 2.0)]), (3, &[("A", 4.0)])]);

        let result = aggregate(&relations, &attributes, &all_stats(false));
        let row = &result[&EntityId::Int(1)];

        assert_eq!(row["sum_A"], 6.0);
        assert_eq!(row["mean_A"], 3.0);
        // Population std divides by N.
        assert!((row["std_A"] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_mean_uses_weights() {
        let relations = vec![NeighborTuple::new(1, 2, 3.0), NeighborTuple::new(1, 3, 1.0)];
        let attributes = attrs(&[(2, &[("A", 0.0)]), (3, &[("A", 8.0)])]);

        let result = aggregate(&relations, &attributes, &all_stats(true));
        let row = &result[&EntityId::Int(1)];

        assert_eq!(row["w_sum_A"], 8.0);
        assert_eq!(row["w_mean_A"], 2.0);
        // sqrt((3 * 4 + 1 * 36) / 4) = sqrt(12)
        assert!((row["w_std_A"] - 12.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_zero_weight_sum_is_nan() {
        let relations = vec![NeighborTuple::new(1, 2, 0.0), NeighborTuple::new(1, 3, 0.0)];
        let attributes = attrs(&[(2, &[("A", 2.0)]), (3, &[("A", 4.0)])]);

        let result = aggregate(&relations, &attributes, &all_stats(true));
        let row = &result[&EntityId::Int(1)];

        assert_eq!(row["w_sum_A"], 0.0);
        assert!(row["w_mean_A"].is_nan());
        assert!(row["w_std_A"].is_nan());
    }

    #[test]
    fn test_missing_values_are_excluded_not_zeroed() {
        let relations = vec![
            NeighborTuple::new(1, 2, 1.0),
            NeighborTuple::new(1, 3, 1.0),
            NeighborTuple::new(1, 4, 1.0),
        ];
        // 3 lacks "A", 4 has no attribute row at all.
        let attributes = attrs(&[(2, &[("A", 6.0), ("B", 1.0)]), (3, &[("B", 3.0)])]);

        let context = StatsContext::new(
            vec!["A".to_string(), "B".to_string()],
            vec![Statistic::Sum, Statistic::Mean],
            false,
        );
        let result = aggregate(&relations, &attributes, &context);
        let row = &result[&EntityId::Int(1)];

        assert_eq!(row["sum_A"], 6.0);
        assert_eq!(row["mean_A"], 6.0);
        assert_eq!(row["sum_B"], 4.0);
        assert_eq!(row["mean_B"], 2.0);
    }

    #[test]
    fn test_entity_without_data_keeps_its_row() {
        let relations = vec![NeighborTuple::new(7, 99, 1.0)];
        let result = aggregate(&relations, &HashMap::new(), &all_stats(false));

        let row = &result[&EntityId::Int(7)];
        assert_eq!(row["sum_A"], 0.0);
        assert!(row["mean_A"].is_nan());
        assert!(row["std_A"].is_nan());
    }

    #[test]
    fn test_only_requested_statistics() {
        let relations = vec![NeighborTuple::new(1, 2, 1.0)];
        let attributes = attrs(&[(2, &[("A", 2.0)])]);
        let statistics = Statistic::parse_lenient(&["median", "sum"]);
        let context = StatsContext::new(vec!["A".to_string()], statistics, false);

        let result = aggregate(&relations, &attributes, &context);
        let row = &result[&EntityId::Int(1)];

        assert_eq!(row.len(), 1);
        assert!(row.contains_key("sum_A"));
    }

    #[test]
    fn test_empty_relations() {
        let result = aggregate(&[], &HashMap::new(), &all_stats(true));
        assert!(result.is_empty());
    }

    fn relation_strategy() -> impl Strategy<Value = Vec<(i64, i64, f64)>> {
        prop::collection::vec((0i64..8, 0i64..8, 0.0f64..5.0), 1..40)
    }

    proptest! {
        #[test]
        fn prop_every_source_appears_once(rows in relation_strategy()) {
            let relations: Vec<NeighborTuple> = rows
                .iter()
                .map(|&(e, n, w)| NeighborTuple::new(e, n, w))
                .collect();
            let attributes: HashMap<EntityId, AttributeVector> = (0..8)
                .map(|i| (EntityId::Int(i), AttributeVector::from([("A".to_string(), i as f64)])))
                .collect();

            let result = aggregate(&relations, &attributes, &all_stats(true));

            let mut sources: Vec<EntityId> = relations.iter().map(|r| r.entity.clone()).collect();
            sources.sort();
            sources.dedup();
            let keys: Vec<EntityId> = result.keys().cloned().collect();
            prop_assert_eq!(keys, sources);
        }

        #[test]
        fn prop_idempotent(rows in relation_strategy()) {
            let relations: Vec<NeighborTuple> = rows
                .iter()
                .map(|&(e, n, w)| NeighborTuple::new(e, n, w))
                .collect();
            let attributes: HashMap<EntityId, AttributeVector> = (0..8)
                .map(|i| (EntityId::Int(i), AttributeVector::from([("A".to_string(), (i * i) as f64)])))
                .collect();

            let first = aggregate(&relations, &attributes, &all_stats(true));
            let second = aggregate(&relations, &attributes, &all_stats(true));

            for (entity, row) in &first {
                for (column, value) in row {
                    prop_assert_eq!(value.to_bits(), second[entity][column].to_bits());
                }
            }
        }

        #[test]
        fn prop_equal_weights_match_plain_mean(rows in relation_strategy(), w in 0.1f64..10.0) {
            let relations: Vec<NeighborTuple> = rows
                .iter()
                .map(|&(e, n, _)| NeighborTuple::new(e, n, w))
                .collect();
            let attributes: HashMap<EntityId, AttributeVector> = (0..8)
                .map(|i| (EntityId::Int(i), AttributeVector::from([("A".to_string(), i as f64 * 1.5)])))
                .collect();

            let weighted = aggregate(&relations, &attributes, &all_stats(true));
            let plain = aggregate(&relations, &attributes, &all_stats(false));

            for (entity, row) in &weighted {
                let expected = plain[entity]["mean_A"];
                prop_assert!((row["w_mean_A"] - expected).abs() < 1e-9);
            }
        }

        #[test]
        fn prop_identical_values_have_zero_std(rows in relation_strategy()) {
            let relations: Vec<NeighborTuple> = rows
                .iter()
                .map(|&(e, n, w)| NeighborTuple::new(e, n, w + 0.01))
                .collect();
            let attributes: HashMap<EntityId, AttributeVector> = (0..8)
                .map(|i| (EntityId::Int(i), AttributeVector::from([("A".to_string(), 4.25)])))
                .collect();

            let result = aggregate(&relations, &attributes, &all_stats(true));

            for row in result.values() {
                prop_assert!(row["w_std_A"].abs() < 1e-9);
            }
        }
    }
}
