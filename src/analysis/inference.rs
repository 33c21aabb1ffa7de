//! Student's t inference for least-squares estimates.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

pub const SIGNIFICANCE_LEVEL: f64 = 0.05;

/// VIF above this is reported as multicollinearity.
pub const VIF_WARNING_THRESHOLD: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CoefficientInference {
    pub estimate: f64,
    pub std_error: f64,

    #[schemars(description = "estimate / std_error; absent when the fit is exact and the standard error is zero")]
    pub t_statistic: Option<f64>,

    #[schemars(description = "Two-sided p-value under Student's t with the residual degrees of freedom")]
    pub p_value: Option<f64>,

    #[schemars(description = "True when the p-value is below 0.05")]
    pub significant: bool,
}

impl CoefficientInference {
    pub fn new(estimate: f64, std_error: f64, degrees_of_freedom: usize) -> Self {
        let t_statistic = Some(estimate / std_error).filter(|t| std_error > 0.0 && t.is_finite());
        let p_value = t_statistic.and_then(|t| two_sided_p_value(t, degrees_of_freedom));
        Self {
            estimate,
            std_error,
            t_statistic,
            p_value,
            significant: p_value.is_some_and(|p| p < SIGNIFICANCE_LEVEL),
        }
    }
}

/// `P(|T| >= |t|)` for `T ~ t(degrees_of_freedom)`.
pub fn two_sided_p_value(t_statistic: f64, degrees_of_freedom: usize) -> Option<f64> {
    if degrees_of_freedom == 0 || !t_statistic.is_finite() {
        return None;
    }
    let distribution = StudentsT::new(0.0, 1.0, degrees_of_freedom as f64).ok()?;
    Some((2.0 * distribution.sf(t_statistic.abs())).clamp(0.0, 1.0))
}
