use super::{collect_observations, NotComputableReason, Outcome};
use crate::schema::{Metric, RecordKey, UtilityYearRecord};
use crate::utils::{is_constant, mean, sample_std_dev};
use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_Z_THRESHOLD: f64 = 2.0;
pub const MIN_OUTLIER_SAMPLE: usize = 3;

/// Which slice of the panel the mean and standard deviation are computed over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "scope", content = "value", rename_all = "snake_case")]
pub enum OutlierScope {
    /// One utility's time series
    Utility(String),
    /// All utilities within one report year
    Year(i32),
    Panel,
}

impl OutlierScope {
    pub fn includes(&self, record: &UtilityYearRecord) -> bool {
        match self {
            OutlierScope::Utility(name) => &record.utility_name == name,
            OutlierScope::Year(year) => record.report_year == *year,
            OutlierScope::Panel => true,
        }
    }
}

impl fmt::Display for OutlierScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutlierScope::Utility(name) => write!(f, "utility {}", name),
            OutlierScope::Year(year) => write!(f, "year {}", year),
            OutlierScope::Panel => write!(f, "panel"),
        }
    }
}

/// Sample mean and standard deviation of a series with non-zero spread.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SeriesMoments {
    pub mean: f64,
    pub std_dev: f64,
}

impl SeriesMoments {
    /// Needs at least three values that are not all equal.
    pub fn from_values(values: &[f64]) -> Outcome<Self> {
        if values.len() < MIN_OUTLIER_SAMPLE {
            return Outcome::not_computable(NotComputableReason::InsufficientSample {
                required: MIN_OUTLIER_SAMPLE,
                actual: values.len(),
            });
        }
        let zero_variance = || {
            Outcome::not_computable(NotComputableReason::ZeroVariance {
                variable: "series".to_string(),
            })
        };
        if is_constant(values) {
            return zero_variance();
        }
        match (mean(values), sample_std_dev(values)) {
            (Some(mean), Some(std_dev)) if std_dev > 0.0 => Outcome::computed(Self { mean, std_dev }),
            _ => zero_variance(),
        }
    }

    pub fn z_score(&self, value: f64) -> f64 {
        (value - self.mean) / self.std_dev
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OutlierFlag {
    pub key: RecordKey,
    pub value: f64,
    pub z_score: f64,

    #[schemars(description = "True when |z| is strictly greater than the threshold")]
    pub exceeds_threshold: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OutlierReport {
    pub metric: Metric,
    pub scope: OutlierScope,
    pub threshold: f64,
    pub moments: SeriesMoments,
    pub sample_size: usize,
    /// One entry per observation, in key order
    pub flags: Vec<OutlierFlag>,
    pub excluded: Vec<RecordKey>,
}

impl OutlierReport {
    pub fn outliers(&self) -> impl Iterator<Item = &OutlierFlag> {
        self.flags.iter().filter(|f| f.exceeds_threshold)
    }

    pub fn outlier_count(&self) -> usize {
        self.outliers().count()
    }
}

/// Flags observations of `metric` within `scope` whose |z| exceeds `threshold`.
pub fn detect_outliers(
    records: &[UtilityYearRecord],
    metric: Metric,
    scope: OutlierScope,
    threshold: f64,
) -> Outcome<OutlierReport> {
    if !threshold.is_finite() || threshold <= 0.0 {
        return Outcome::not_computable(NotComputableReason::InvalidParameter {
            details: format!("z threshold must be positive, got {}", threshold),
        });
    }

    let mut scoped: Vec<&UtilityYearRecord> = records.iter().filter(|r| scope.includes(r)).collect();
    scoped.sort_by_key(|r| r.key());
    let (observations, excluded) = collect_observations(scoped, metric);

    let values: Vec<f64> = observations.iter().map(|o| o.value).collect();
    let moments = match SeriesMoments::from_values(&values) {
        Outcome::Computed { value } => value,
        Outcome::NotComputable { reason } => {
            debug!("Outlier detection for {} over {} not applicable: {}", metric, scope, reason);
            return Outcome::not_computable(reason);
        }
    };

    let flags: Vec<OutlierFlag> = observations
        .into_iter()
        .map(|o| {
            let z_score = moments.z_score(o.value);
            OutlierFlag {
                key: o.key,
                value: o.value,
                z_score,
                exceeds_threshold: z_score.abs() > threshold,
            }
        })
        .collect();

    let report = OutlierReport {
        metric,
        scope,
        threshold,
        moments,
        sample_size: flags.len(),
        flags,
        excluded,
    };
    if report.outlier_count() > 0 {
        info!(
            "{} outlier(s) in {} over {}",
            report.outlier_count(),
            metric,
            report.scope
        );
    }
    Outcome::computed(report)
}
