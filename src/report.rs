use crate::analysis::{
    cost_driver_regression, detect_outliers, peer_benchmark, trend_analysis, utility_summary, BenchmarkResult,
    OutlierReport, OutlierScope, Outcome, RegressionResult, TrendResult, UtilitySummary,
};
use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::metrics::{MetricsCalculator, YoyRow};
use crate::schema::{Metric, UtilityYearRecord};
use log::info;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

pub const SUMMARY_METRICS: [Metric; 4] = [
    Metric::OmTotal,
    Metric::OmPerCustomer,
    Metric::OmPerMwh,
    Metric::RateBase,
];

/// Every analysis result for one run. Maps are ordered so the JSON layout is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisReport {
    pub trend_metric: Metric,
    pub trends: BTreeMap<String, Outcome<TrendResult>>,
    pub utility_summaries: BTreeMap<String, BTreeMap<Metric, Outcome<UtilitySummary>>>,
    pub regression: Outcome<RegressionResult>,

    #[schemars(description = "Outlier analyses keyed by scope, e.g. 'utility:SCE' or 'year:2023'")]
    pub outliers: BTreeMap<String, Outcome<OutlierReport>>,

    pub benchmark_year: Option<i32>,
    pub benchmark: Outcome<BenchmarkResult>,
    pub year_over_year: Vec<YoyRow>,
}

impl AnalysisReport {
    /// Runs every analysis over the derived panel. Non-computable analyses are recorded
    /// in place and never stop the others.
    pub fn build(records: &[UtilityYearRecord], config: &AnalysisConfig) -> Self {
        let utilities: BTreeSet<&str> = records.iter().map(|r| r.utility_name.as_str()).collect();
        let years: BTreeSet<i32> = records.iter().map(|r| r.report_year).collect();

        let trends = utilities
            .iter()
            .map(|u| (u.to_string(), trend_analysis(records, u, config.trend_metric)))
            .collect();

        let utility_summaries = utilities
            .iter()
            .map(|u| {
                let by_metric = SUMMARY_METRICS
                    .iter()
                    .map(|m| (*m, utility_summary(records, u, *m)))
                    .collect();
                (u.to_string(), by_metric)
            })
            .collect();

        let mut outliers = BTreeMap::new();
        let scopes = utilities
            .iter()
            .map(|u| OutlierScope::Utility(u.to_string()))
            .chain(years.iter().map(|y| OutlierScope::Year(*y)));
        for scope in scopes {
            let label = match &scope {
                OutlierScope::Utility(name) => format!("utility:{}", name),
                OutlierScope::Year(year) => format!("year:{}", year),
                OutlierScope::Panel => "panel".to_string(),
            };
            outliers.insert(
                label,
                detect_outliers(records, config.outlier_metric, scope, config.outlier_z_threshold),
            );
        }

        let benchmark_year = config.benchmark_year.or_else(|| years.iter().next_back().copied());
        let benchmark = match benchmark_year {
            Some(year) => peer_benchmark(records, year, config.benchmark_metric),
            None => Outcome::not_computable(crate::analysis::NotComputableReason::InsufficientSample {
                required: 1,
                actual: 0,
            }),
        };

        let report = Self {
            trend_metric: config.trend_metric,
            trends,
            utility_summaries,
            regression: cost_driver_regression(records, config.regression_response),
            outliers,
            benchmark_year,
            benchmark,
            year_over_year: MetricsCalculator::yoy_table(records, config.trend_metric),
        };

        info!(
            "Analysis report: {} trends, {} outlier scopes, regression {}",
            report.trends.len(),
            report.outliers.len(),
            if report.regression.is_computed() {
                "computed"
            } else {
                "not computable"
            }
        );
        report
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Flattened `path -> value` view, e.g. `trends.SCE.value.cagr.value`.
    pub fn key_values(&self) -> Result<BTreeMap<String, Value>> {
        let mut out = BTreeMap::new();
        flatten(&serde_json::to_value(self)?, String::new(), &mut out);
        Ok(out)
    }
}

fn flatten(value: &Value, prefix: String, out: &mut BTreeMap<String, Value>) {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", prefix, key)
        }
    };
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten(child, join(key), out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten(child, join(&index.to_string()), out);
            }
        }
        leaf => {
            out.insert(prefix, leaf.clone());
        }
    }
}
