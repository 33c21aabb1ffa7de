//! Statistical analyses over the reconciled utility-year panel.
//!
//! Each analysis returns an [`Outcome`]: either a computed value or an explicit reason the
//! analysis could not be computed for this input. Non-computability is never an error and
//! never a sentinel number.

pub mod benchmark;
pub mod inference;
pub mod outliers;
pub mod regression;
pub mod trend;

pub use benchmark::{peer_benchmark, BenchmarkRank, BenchmarkResult};
pub use inference::{two_sided_p_value, CoefficientInference, SIGNIFICANCE_LEVEL, VIF_WARNING_THRESHOLD};
pub use outliers::{detect_outliers, OutlierFlag, OutlierReport, OutlierScope, SeriesMoments};
pub use regression::{cost_driver_regression, ols, OlsFit, Predictor, RegressionResult, ResidualEntry};
pub use trend::{cagr, fit_line, slope_inference, trend_analysis, utility_summary, LineFit, TrendResult, UtilitySummary};

use crate::schema::{Metric, RecordKey, UtilityYearRecord};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome<T> {
    Computed { value: T },
    NotComputable { reason: NotComputableReason },
}

impl<T> Outcome<T> {
    pub fn computed(value: T) -> Self {
        Outcome::Computed { value }
    }

    pub fn not_computable(reason: NotComputableReason) -> Self {
        Outcome::NotComputable { reason }
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, Outcome::Computed { .. })
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Computed { value } => Some(value),
            Outcome::NotComputable { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&NotComputableReason> {
        match self {
            Outcome::Computed { .. } => None,
            Outcome::NotComputable { reason } => Some(reason),
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Outcome::Computed { value } => Some(value),
            Outcome::NotComputable { .. } => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Computed { value } => Outcome::Computed { value: f(value) },
            Outcome::NotComputable { reason } => Outcome::NotComputable { reason },
        }
    }
}

impl<T: Copy> Outcome<T> {
    pub fn get(&self) -> Option<T> {
        self.value().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NotComputableReason {
    InsufficientSample { required: usize, actual: usize },
    ZeroVariance { variable: String },
    SingularDesign { details: String },
    NonPositiveEndpoint { start_value: f64, end_value: f64 },
    ZeroPeriod,
    InvalidParameter { details: String },
}

impl fmt::Display for NotComputableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotComputableReason::InsufficientSample { required, actual } => write!(
                f,
                "insufficient sample: {} observations, at least {} required",
                actual, required
            ),
            NotComputableReason::ZeroVariance { variable } => {
                write!(f, "{} has zero variance", variable)
            }
            NotComputableReason::SingularDesign { details } => {
                write!(f, "singular design matrix: {}", details)
            }
            NotComputableReason::NonPositiveEndpoint {
                start_value,
                end_value,
            } => write!(
                f,
                "growth rate undefined for non-positive endpoints ({} -> {})",
                start_value, end_value
            ),
            NotComputableReason::ZeroPeriod => write!(f, "start and end fall in the same year"),
            NotComputableReason::InvalidParameter { details } => {
                write!(f, "invalid parameter: {}", details)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Observation {
    pub key: RecordKey,
    pub value: f64,
}

/// Splits records into present observations of `metric` and keys where it is absent.
pub(crate) fn collect_observations<'a>(
    records: impl IntoIterator<Item = &'a UtilityYearRecord>,
    metric: Metric,
) -> (Vec<Observation>, Vec<RecordKey>) {
    let mut observations = Vec::new();
    let mut excluded = Vec::new();
    for record in records {
        match record.metric_value(metric) {
            Some(value) if value.is_finite() => observations.push(Observation {
                key: record.key(),
                value,
            }),
            _ => excluded.push(record.key()),
        }
    }
    (observations, excluded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serialization() {
        let computed: Outcome<f64> = Outcome::computed(0.5);
        let json = serde_json::to_string(&computed).unwrap();
        assert_eq!(json, r#"{"status":"computed","value":0.5}"#);

        let missing: Outcome<f64> = Outcome::not_computable(NotComputableReason::ZeroPeriod);
        let json = serde_json::to_string(&missing).unwrap();
        assert_eq!(
            json,
            r#"{"status":"not_computable","reason":{"reason":"zero_period"}}"#
        );
    }

    #[test]
    fn test_outcome_accessors() {
        let computed: Outcome<f64> = Outcome::computed(2.0);
        assert!(computed.is_computed());
        assert_eq!(computed.get(), Some(2.0));
        assert_eq!(computed.clone().map(|v| v * 2.0).get(), Some(4.0));

        let missing: Outcome<f64> = Outcome::not_computable(NotComputableReason::InsufficientSample {
            required: 3,
            actual: 1,
        });
        assert_eq!(missing.get(), None);
        assert!(missing.reason().unwrap().to_string().contains("at least 3"));
    }
}
