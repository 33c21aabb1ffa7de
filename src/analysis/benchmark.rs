//! Cross-sectional peer ranking for a single report year.
//!
//! Rank 1 is the highest value. Equal values are ordered by ascending utility name so the
//! ordinal rank is deterministic; they share the same percentile, computed from their
//! average ascending position: `avg_position / n * 100`.

use super::{collect_observations, NotComputableReason, Outcome};
use crate::schema::{Metric, RecordKey, UtilityYearRecord};
use crate::utils::{mean, sample_std_dev};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BenchmarkRank {
    pub key: RecordKey,
    pub value: f64,

    #[schemars(description = "Ordinal rank, 1 = highest value")]
    pub rank: usize,

    #[schemars(description = "Share of peers at or below this value, in (0, 100]")]
    pub percentile: f64,

    #[schemars(description = "Standard score against the peer group; absent with fewer than two peers or no spread")]
    pub z_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BenchmarkResult {
    pub metric: Metric,
    pub year: i32,
    pub ranks: Vec<BenchmarkRank>,
    pub peer_mean: f64,
    pub peer_std_dev: Option<f64>,
    /// Utilities with a record for the year but no value for the metric
    pub excluded: Vec<String>,
}

impl BenchmarkResult {
    pub fn rank_of(&self, utility_name: &str) -> Option<&BenchmarkRank> {
        self.ranks.iter().find(|r| r.key.utility_name == utility_name)
    }
}

pub fn peer_benchmark(records: &[UtilityYearRecord], year: i32, metric: Metric) -> Outcome<BenchmarkResult> {
    let (mut observations, excluded) =
        collect_observations(records.iter().filter(|r| r.report_year == year), metric);

    if observations.is_empty() {
        debug!("No {} observations to benchmark in {}", metric, year);
        return Outcome::not_computable(NotComputableReason::InsufficientSample {
            required: 1,
            actual: 0,
        });
    }

    observations.sort_by(|a, b| {
        b.value
            .total_cmp(&a.value)
            .then_with(|| a.key.utility_name.cmp(&b.key.utility_name))
    });

    let values: Vec<f64> = observations.iter().map(|o| o.value).collect();
    let mut ascending = values.clone();
    ascending.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    let peer_mean = mean(&values).unwrap_or(0.0);
    let peer_std_dev = sample_std_dev(&values).filter(|sd| *sd > 0.0);

    let ranks = observations
        .into_iter()
        .enumerate()
        .map(|(index, o)| {
            let first = ascending.partition_point(|v| *v < o.value);
            let last = ascending.partition_point(|v| *v <= o.value);
            // 1-based positions first+1 ..= last
            let average_position = (first + 1 + last) as f64 / 2.0;
            BenchmarkRank {
                value: o.value,
                rank: index + 1,
                percentile: average_position / n as f64 * 100.0,
                z_score: peer_std_dev.map(|sd| (o.value - peer_mean) / sd),
                key: o.key,
            }
        })
        .collect();

    let mut excluded: Vec<String> = excluded.into_iter().map(|k| k.utility_name).collect();
    excluded.sort();

    Outcome::computed(BenchmarkResult {
        metric,
        year,
        ranks,
        peer_mean,
        peer_std_dev,
        excluded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CategoryTotals, CustomerClasses};

    fn record(utility: &str, year: i32, om_total: f64, rate_base: Option<f64>) -> UtilityYearRecord {
        let om = CategoryTotals {
            transmission: om_total,
            ..Default::default()
        };
        UtilityYearRecord {
            utility_name: utility.to_string(),
            report_year: year,
            source_a_id: 1,
            source_b_id: 2,
            om_total: om.total(),
            om,
            rate_base,
            operating_revenue: None,
            classes: CustomerClasses::default(),
            metrics: None,
        }
    }

    #[test]
    fn test_ranks_descending_with_percentiles() {
        let records = vec![
            record("PG&E", 2022, 300.0, None),
            record("SCE", 2022, 200.0, None),
            record("SDG&E", 2022, 100.0, None),
            record("PG&E", 2021, 999.0, None),
        ];
        let result = peer_benchmark(&records, 2022, Metric::OmTotal).into_option().unwrap();

        assert_eq!(result.ranks.len(), 3);
        let pge = result.rank_of("PG&E").unwrap();
        assert_eq!(pge.rank, 1);
        assert!((pge.percentile - 100.0).abs() < 1e-9);
        assert!((pge.z_score.unwrap() - 1.0).abs() < 1e-9);

        let sdge = result.rank_of("SDG&E").unwrap();
        assert_eq!(sdge.rank, 3);
        assert!((sdge.percentile - 100.0 / 3.0).abs() < 1e-9);
        assert!((result.peer_mean - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_ties_broken_by_name_share_percentile() {
        let records = vec![
            record("Zeta", 2022, 50.0, None),
            record("Alpha", 2022, 50.0, None),
            record("Mid", 2022, 10.0, None),
        ];
        let result = peer_benchmark(&records, 2022, Metric::OmTotal).into_option().unwrap();

        assert_eq!(result.ranks[0].key.utility_name, "Alpha");
        assert_eq!(result.ranks[0].rank, 1);
        assert_eq!(result.ranks[1].key.utility_name, "Zeta");
        assert_eq!(result.ranks[1].rank, 2);
        assert_eq!(result.ranks[0].percentile, result.ranks[1].percentile);
        // ascending positions 2 and 3 average to 2.5 of 3
        assert!((result.ranks[0].percentile - 2.5 / 3.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_deterministic_regardless_of_input_order() {
        let mut records = vec![
            record("B", 2022, 5.0, None),
            record("A", 2022, 5.0, None),
            record("C", 2022, 7.0, None),
        ];
        let first = peer_benchmark(&records, 2022, Metric::OmTotal);
        records.reverse();
        let second = peer_benchmark(&records, 2022, Metric::OmTotal);
        assert_eq!(first, second);
    }

    #[test]
    fn test_absent_values_excluded_and_empty_year_not_computable() {
        let records = vec![
            record("A", 2022, 5.0, Some(100.0)),
            record("B", 2022, 5.0, None),
        ];
        let result = peer_benchmark(&records, 2022, Metric::RateBase).into_option().unwrap();
        assert_eq!(result.ranks.len(), 1);
        assert_eq!(result.excluded, vec!["B".to_string()]);
        assert_eq!(result.ranks[0].z_score, None);
        assert_eq!(result.ranks[0].percentile, 100.0);

        assert!(!peer_benchmark(&records, 1999, Metric::OmTotal).is_computed());
    }
}
