use super::inference::CoefficientInference;
use super::{collect_observations, NotComputableReason, Observation, Outcome};
use crate::schema::{Metric, RecordKey, UtilityYearRecord};
use crate::utils::{is_constant, mean, ratio, sample_std_dev};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TrendResult {
    pub utility_name: String,
    pub metric: Metric,

    #[schemars(description = "Change in the metric per report year (OLS slope)")]
    pub slope: f64,
    pub intercept: f64,

    #[schemars(description = "Standard error and two-sided p-value of the slope; needs at least three observations")]
    pub slope_inference: Outcome<CoefficientInference>,

    #[schemars(description = "Goodness of fit of the trend line; not computable for a flat series")]
    pub r_squared: Outcome<f64>,

    pub start_year: i32,
    pub end_year: i32,
    pub start_value: f64,
    pub end_value: f64,

    #[schemars(description = "Compound annual growth rate between the first and last observation, as a fraction")]
    pub cagr: Outcome<f64>,

    pub observations: usize,
    pub mean: f64,
    pub std_dev: Option<f64>,

    #[schemars(description = "Sample standard deviation divided by the mean")]
    pub coefficient_of_variation: Option<f64>,

    #[schemars(description = "Years where the metric was absent and therefore left out of the fit")]
    pub excluded_years: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UtilitySummary {
    pub utility_name: String,
    pub metric: Metric,
    pub observations: usize,
    pub mean: f64,
    pub std_dev: Option<f64>,
    pub min: f64,
    pub max: f64,
    pub cagr: Outcome<f64>,
}

/// Compound annual growth rate as a fraction: `(end / start)^(1 / n_years) - 1`.
///
/// Both endpoints must be strictly positive and the period non-zero.
pub fn cagr(start_value: f64, end_value: f64, n_years: f64) -> Outcome<f64> {
    if !start_value.is_finite() || !end_value.is_finite() || !n_years.is_finite() {
        return Outcome::not_computable(NotComputableReason::InvalidParameter {
            details: format!(
                "non-finite input: start {}, end {}, years {}",
                start_value, end_value, n_years
            ),
        });
    }
    if n_years <= 0.0 {
        return Outcome::not_computable(NotComputableReason::ZeroPeriod);
    }
    if start_value <= 0.0 || end_value <= 0.0 {
        return Outcome::not_computable(NotComputableReason::NonPositiveEndpoint {
            start_value,
            end_value,
        });
    }
    Outcome::computed((end_value / start_value).powf(1.0 / n_years) - 1.0)
}

/// Ordinary least-squares line through `(xs, ys)`.
pub fn fit_line(xs: &[f64], ys: &[f64]) -> Outcome<LineFit> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return Outcome::not_computable(NotComputableReason::InsufficientSample {
            required: 2,
            actual: n,
        });
    }
    let (xs, ys) = (&xs[..n], &ys[..n]);
    if is_constant(xs) {
        return Outcome::not_computable(NotComputableReason::ZeroVariance {
            variable: "report_year".to_string(),
        });
    }

    let x_mean = xs.iter().sum::<f64>() / n as f64;
    let y_mean = ys.iter().sum::<f64>() / n as f64;
    let (sxy, sxx) = xs
        .iter()
        .zip(ys)
        .fold((0.0, 0.0), |(sxy, sxx), (x, y)| {
            (sxy + (x - x_mean) * (y - y_mean), sxx + (x - x_mean).powi(2))
        });

    let slope = sxy / sxx;
    Outcome::computed(LineFit {
        slope,
        intercept: y_mean - slope * x_mean,
    })
}

/// Coefficient of determination of `fit` on the data, clamped to [0, 1].
fn line_r_squared(fit: &LineFit, xs: &[f64], ys: &[f64], variable: &str) -> Outcome<f64> {
    if is_constant(ys) {
        return Outcome::not_computable(NotComputableReason::ZeroVariance {
            variable: variable.to_string(),
        });
    }
    let y_mean = ys.iter().sum::<f64>() / ys.len() as f64;
    let ss_tot: f64 = ys.iter().map(|y| (y - y_mean).powi(2)).sum();
    let ss_res: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (y - (fit.intercept + fit.slope * x)).powi(2))
        .sum();
    Outcome::computed((1.0 - ss_res / ss_tot).clamp(0.0, 1.0))
}

/// t-test of the slope against zero on `n - 2` degrees of freedom.
pub fn slope_inference(fit: &LineFit, xs: &[f64], ys: &[f64]) -> Outcome<CoefficientInference> {
    let n = xs.len().min(ys.len());
    if n < 3 {
        return Outcome::not_computable(NotComputableReason::InsufficientSample {
            required: 3,
            actual: n,
        });
    }
    let x_mean = xs[..n].iter().sum::<f64>() / n as f64;
    let sxx: f64 = xs[..n].iter().map(|x| (x - x_mean).powi(2)).sum();
    let ss_res: f64 = xs[..n]
        .iter()
        .zip(&ys[..n])
        .map(|(x, y)| (y - (fit.intercept + fit.slope * x)).powi(2))
        .sum();
    let std_error = (ss_res / (n - 2) as f64 / sxx).sqrt();
    Outcome::computed(CoefficientInference::new(fit.slope, std_error, n - 2))
}

fn utility_series(
    records: &[UtilityYearRecord],
    utility_name: &str,
    metric: Metric,
) -> (Vec<Observation>, Vec<RecordKey>) {
    let mut scoped: Vec<&UtilityYearRecord> = records
        .iter()
        .filter(|r| r.utility_name == utility_name)
        .collect();
    scoped.sort_by_key(|r| r.report_year);
    collect_observations(scoped, metric)
}

/// Fits `metric` against report year for one utility.
pub fn trend_analysis(
    records: &[UtilityYearRecord],
    utility_name: &str,
    metric: Metric,
) -> Outcome<TrendResult> {
    let (observations, excluded) = utility_series(records, utility_name, metric);
    let xs: Vec<f64> = observations.iter().map(|o| o.key.report_year as f64).collect();
    let ys: Vec<f64> = observations.iter().map(|o| o.value).collect();

    let fit = match fit_line(&xs, &ys) {
        Outcome::Computed { value } => value,
        Outcome::NotComputable { reason } => {
            debug!("Trend of {} for {} not computable: {}", metric, utility_name, reason);
            return Outcome::not_computable(reason);
        }
    };

    // fit_line guarantees at least two observations
    let (first, last) = match (observations.first(), observations.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => {
            return Outcome::not_computable(NotComputableReason::InsufficientSample {
                required: 2,
                actual: 0,
            })
        }
    };

    let mean_value = mean(&ys).unwrap_or(0.0);
    let std_dev = sample_std_dev(&ys);

    Outcome::computed(TrendResult {
        utility_name: utility_name.to_string(),
        metric,
        slope: fit.slope,
        intercept: fit.intercept,
        slope_inference: slope_inference(&fit, &xs, &ys),
        r_squared: line_r_squared(&fit, &xs, &ys, metric.as_str()),
        start_year: first.key.report_year,
        end_year: last.key.report_year,
        start_value: first.value,
        end_value: last.value,
        cagr: cagr(
            first.value,
            last.value,
            (last.key.report_year - first.key.report_year) as f64,
        ),
        observations: observations.len(),
        mean: mean_value,
        std_dev,
        coefficient_of_variation: std_dev.and_then(|s| ratio(s, mean_value)),
        excluded_years: excluded.iter().map(|k| k.report_year).collect(),
    })
}

/// Descriptive statistics and growth for one utility's metric series.
pub fn utility_summary(
    records: &[UtilityYearRecord],
    utility_name: &str,
    metric: Metric,
) -> Outcome<UtilitySummary> {
    let (observations, _) = utility_series(records, utility_name, metric);
    if observations.len() < 2 {
        return Outcome::not_computable(NotComputableReason::InsufficientSample {
            required: 2,
            actual: observations.len(),
        });
    }

    let values: Vec<f64> = observations.iter().map(|o| o.value).collect();
    let first = &observations[0];
    let last = &observations[observations.len() - 1];

    Outcome::computed(UtilitySummary {
        utility_name: utility_name.to_string(),
        metric,
        observations: values.len(),
        mean: mean(&values).unwrap_or(0.0),
        std_dev: sample_std_dev(&values),
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        cagr: cagr(
            first.value,
            last.value,
            (last.key.report_year - first.key.report_year) as f64,
        ),
    })
}
