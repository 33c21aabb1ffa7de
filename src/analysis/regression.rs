//! Panel cost-driver regression.
//!
//! The model is deliberately under-specified: public filings only carry a handful of
//! plausible cost drivers. The residual of each observation is reported as labeled
//! "unexplained" cost rather than treated as error.

use super::inference::{CoefficientInference, VIF_WARNING_THRESHOLD};
use super::{NotComputableReason, Outcome};
use crate::schema::{Metric, RecordKey, UtilityYearRecord};
use crate::utils::{is_constant, mean, sample_std_dev};
use log::{debug, info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const RESIDUAL_INTERPRETATION: &str = "Residual = unexplained variance: the part of the cost metric not accounted for by the predictors. It is a model output, not an error.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Predictor {
    CustomersTotal,
    SalesMwhTotal,
    RateBase,
}

impl Predictor {
    pub const COST_DRIVERS: [Predictor; 3] = [
        Predictor::CustomersTotal,
        Predictor::SalesMwhTotal,
        Predictor::RateBase,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Predictor::CustomersTotal => "customers_total",
            Predictor::SalesMwhTotal => "sales_mwh_total",
            Predictor::RateBase => "rate_base",
        }
    }

    pub fn value(&self, record: &UtilityYearRecord) -> Option<f64> {
        match self {
            Predictor::CustomersTotal => record.customers_total().map(|c| c as f64),
            Predictor::SalesMwhTotal => record.sales_mwh_total(),
            Predictor::RateBase => record.rate_base,
        }
    }
}

impl fmt::Display for Predictor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OlsFit {
    pub intercept: f64,
    /// One coefficient per design column, in column order
    pub coefficients: Vec<f64>,
    pub r_squared: f64,
    pub adjusted_r_squared: f64,
    /// Variance inflation factor per design column
    pub vif: Vec<f64>,
    pub fitted: Vec<f64>,

    /// Residual sum of squares over `degrees_of_freedom`
    pub residual_variance: f64,
    pub degrees_of_freedom: usize,
    pub intercept_std_error: f64,
    /// One standard error per design column
    pub std_errors: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResidualEntry {
    pub key: RecordKey,
    pub observed: f64,
    pub fitted: f64,

    #[schemars(description = "observed - fitted: cost not explained by the predictors")]
    pub unexplained: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RegressionResult {
    pub response: Metric,
    pub predictors: Vec<Predictor>,
    pub intercept: f64,
    pub coefficients: BTreeMap<String, f64>,

    #[schemars(description = "Share of response variance explained by the predictors, in [0, 1]")]
    pub r_squared: f64,
    pub adjusted_r_squared: f64,

    #[schemars(description = "Variance inflation factor per predictor; large values signal multicollinearity")]
    pub vif: BTreeMap<String, f64>,

    #[schemars(description = "Predictors whose VIF exceeds 10")]
    pub high_vif_predictors: Vec<String>,

    #[schemars(description = "Standard error, t-statistic and two-sided p-value per predictor")]
    pub inference: BTreeMap<String, CoefficientInference>,
    pub intercept_inference: CoefficientInference,

    #[schemars(description = "Predictors with p < 0.05")]
    pub significant_drivers: Vec<String>,

    pub sample_size: usize,
    pub residuals: Vec<ResidualEntry>,

    #[schemars(description = "Records left out because the response or a predictor was absent")]
    pub excluded: Vec<RecordKey>,

    pub interpretation: String,
}

/// Ordinary least squares of `y` on the columns of `rows` plus an intercept.
///
/// Predictors are standardized before solving the normal equations, which keeps the
/// system well scaled when columns differ by orders of magnitude (customers vs dollars).
pub fn ols(rows: &[Vec<f64>], y: &[f64], names: &[&str]) -> Outcome<OlsFit> {
    let n = y.len();
    let k = names.len();

    if rows.len() != n || rows.iter().any(|r| r.len() != k) {
        return Outcome::not_computable(NotComputableReason::InvalidParameter {
            details: format!(
                "design has {} rows for {} responses and expects {} columns",
                rows.len(),
                n,
                k
            ),
        });
    }
    if n < k + 2 {
        return Outcome::not_computable(NotComputableReason::InsufficientSample {
            required: k + 2,
            actual: n,
        });
    }

    let mut column_means = Vec::with_capacity(k);
    let mut column_sds = Vec::with_capacity(k);
    for (j, name) in names.iter().enumerate() {
        let column: Vec<f64> = rows.iter().map(|r| r[j]).collect();
        if is_constant(&column) {
            return Outcome::not_computable(NotComputableReason::ZeroVariance {
                variable: name.to_string(),
            });
        }
        match (mean(&column), sample_std_dev(&column)) {
            (Some(m), Some(sd)) if sd > 0.0 => {
                column_means.push(m);
                column_sds.push(sd);
            }
            _ => {
                return Outcome::not_computable(NotComputableReason::ZeroVariance {
                    variable: name.to_string(),
                })
            }
        }
    }
    if is_constant(y) {
        return Outcome::not_computable(NotComputableReason::ZeroVariance {
            variable: "response".to_string(),
        });
    }
    let y_mean = y.iter().sum::<f64>() / n as f64;

    let standardized: Vec<Vec<f64>> = rows
        .iter()
        .map(|r| {
            r.iter()
                .enumerate()
                .map(|(j, x)| (x - column_means[j]) / column_sds[j])
                .collect()
        })
        .collect();

    let mut gram = vec![vec![0.0; k]; k];
    let mut rhs = vec![0.0; k];
    for (z, y_i) in standardized.iter().zip(y) {
        for a in 0..k {
            rhs[a] += z[a] * (y_i - y_mean);
            for b in 0..k {
                gram[a][b] += z[a] * z[b];
            }
        }
    }

    // Diagonal of the standardized Gram matrix is n - 1
    let scale = (n - 1) as f64;
    let inverse = match invert(&gram, 1e-9 * scale) {
        Some(inverse) => inverse,
        None => {
            return Outcome::not_computable(NotComputableReason::SingularDesign {
                details: format!("predictors {} are perfectly collinear", names.join(", ")),
            })
        }
    };

    let coefficients: Vec<f64> = (0..k)
        .map(|a| {
            let standardized_beta: f64 = (0..k).map(|b| inverse[a][b] * rhs[b]).sum();
            standardized_beta / column_sds[a]
        })
        .collect();
    let intercept = y_mean
        - coefficients
            .iter()
            .zip(&column_means)
            .map(|(beta, m)| beta * m)
            .sum::<f64>();

    let fitted: Vec<f64> = rows
        .iter()
        .map(|r| intercept + r.iter().zip(&coefficients).map(|(x, beta)| x * beta).sum::<f64>())
        .collect();
    let ss_res: f64 = y.iter().zip(&fitted).map(|(o, f)| (o - f).powi(2)).sum();
    let ss_tot: f64 = y.iter().map(|o| (o - y_mean).powi(2)).sum();
    let r_squared = (1.0 - ss_res / ss_tot).clamp(0.0, 1.0);
    let adjusted_r_squared = 1.0 - (1.0 - r_squared) * (n - 1) as f64 / (n - k - 1) as f64;

    // inverse correlation matrix diagonal = VIF
    let vif = (0..k).map(|j| inverse[j][j] * scale).collect();

    // Cov(beta) = sigma^2 (Z'Z)^-1 rescaled back to the raw predictor units
    let degrees_of_freedom = n - k - 1;
    let residual_variance = ss_res / degrees_of_freedom as f64;
    let covariance = |a: usize, b: usize| residual_variance * inverse[a][b] / (column_sds[a] * column_sds[b]);
    let std_errors: Vec<f64> = (0..k).map(|j| covariance(j, j).max(0.0).sqrt()).collect();
    let mut intercept_variance = residual_variance / n as f64;
    for a in 0..k {
        for b in 0..k {
            intercept_variance += column_means[a] * column_means[b] * covariance(a, b);
        }
    }

    Outcome::computed(OlsFit {
        intercept,
        coefficients,
        r_squared,
        adjusted_r_squared,
        vif,
        fitted,
        residual_variance,
        degrees_of_freedom,
        intercept_std_error: intercept_variance.max(0.0).sqrt(),
        std_errors,
    })
}

/// Gauss-Jordan inversion with partial pivoting. `None` when a pivot falls below `tolerance`.
fn invert(matrix: &[Vec<f64>], tolerance: f64) -> Option<Vec<Vec<f64>>> {
    let k = matrix.len();
    let mut augmented: Vec<Vec<f64>> = matrix
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let mut row = row.clone();
            row.extend((0..k).map(|j| if i == j { 1.0 } else { 0.0 }));
            row
        })
        .collect();

    for col in 0..k {
        let pivot_row = (col..k).max_by(|&a, &b| {
            augmented[a][col]
                .abs()
                .total_cmp(&augmented[b][col].abs())
        })?;
        if augmented[pivot_row][col].abs() <= tolerance {
            return None;
        }
        augmented.swap(col, pivot_row);

        let pivot = augmented[col][col];
        for value in augmented[col].iter_mut() {
            *value /= pivot;
        }

        let pivot_values = augmented[col].clone();
        for (row, values) in augmented.iter_mut().enumerate() {
            if row == col {
                continue;
            }
            let factor = values[col];
            if factor != 0.0 {
                for (value, p) in values.iter_mut().zip(&pivot_values) {
                    *value -= factor * p;
                }
            }
        }
    }

    Some(augmented.into_iter().map(|row| row[k..].to_vec()).collect())
}

/// Regresses `response` on customers, sales volume and rate base across the whole panel.
pub fn cost_driver_regression(records: &[UtilityYearRecord], response: Metric) -> Outcome<RegressionResult> {
    let predictors = Predictor::COST_DRIVERS;
    let names: Vec<&str> = predictors.iter().map(|p| p.as_str()).collect();

    let mut ordered: Vec<&UtilityYearRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.key());

    let mut keys = Vec::new();
    let mut rows = Vec::new();
    let mut ys = Vec::new();
    let mut excluded = Vec::new();
    for record in ordered {
        let row: Option<Vec<f64>> = predictors.iter().map(|p| p.value(record)).collect();
        match (record.metric_value(response), row) {
            (Some(y), Some(row)) => {
                keys.push(record.key());
                rows.push(row);
                ys.push(y);
            }
            _ => {
                debug!("Excluding {} from regression: incomplete observation", record.key());
                excluded.push(record.key());
            }
        }
    }

    let fit = match ols(&rows, &ys, &names) {
        Outcome::Computed { value } => value,
        Outcome::NotComputable { reason } => {
            info!("Cost-driver regression of {} not computable: {}", response, reason);
            return Outcome::not_computable(reason);
        }
    };

    let residuals = keys
        .into_iter()
        .zip(ys.iter().zip(&fit.fitted))
        .map(|(key, (observed, fitted))| ResidualEntry {
            key,
            observed: *observed,
            fitted: *fitted,
            unexplained: observed - fitted,
        })
        .collect();

    let inference: BTreeMap<String, CoefficientInference> = names
        .iter()
        .zip(fit.coefficients.iter().zip(&fit.std_errors))
        .map(|(name, (beta, se))| {
            (
                name.to_string(),
                CoefficientInference::new(*beta, *se, fit.degrees_of_freedom),
            )
        })
        .collect();
    let significant_drivers: Vec<String> = names
        .iter()
        .filter(|n| inference.get(**n).is_some_and(|i| i.significant))
        .map(|n| n.to_string())
        .collect();
    let high_vif_predictors: Vec<String> = names
        .iter()
        .zip(&fit.vif)
        .filter(|(_, vif)| **vif > VIF_WARNING_THRESHOLD)
        .map(|(n, _)| n.to_string())
        .collect();
    if !high_vif_predictors.is_empty() {
        warn!(
            "Multicollinearity in cost-driver regression: VIF above {} for {}",
            VIF_WARNING_THRESHOLD,
            high_vif_predictors.join(", ")
        );
    }

    info!(
        "Cost-driver regression of {} on {} observations: R² {:.4}, significant drivers [{}]",
        response,
        ys.len(),
        fit.r_squared,
        significant_drivers.join(", ")
    );

    Outcome::computed(RegressionResult {
        response,
        predictors: predictors.to_vec(),
        intercept: fit.intercept,
        coefficients: names
            .iter()
            .map(|n| n.to_string())
            .zip(fit.coefficients.iter().copied())
            .collect(),
        r_squared: fit.r_squared,
        adjusted_r_squared: fit.adjusted_r_squared,
        vif: names
            .iter()
            .map(|n| n.to_string())
            .zip(fit.vif.iter().copied())
            .collect(),
        high_vif_predictors,
        inference,
        intercept_inference: CoefficientInference::new(
            fit.intercept,
            fit.intercept_std_error,
            fit.degrees_of_freedom,
        ),
        significant_drivers,
        sample_size: ys.len(),
        residuals,
        excluded,
        interpretation: RESIDUAL_INTERPRETATION.to_string(),
    })
}
