use crate::bill_impact::SensitivityGrid;
use crate::chart_of_accounts::ChartOfAccounts;
use crate::error::{RateCaseError, Result};
use crate::metrics::DEFAULT_AG_ELECTRIC_ALLOCATION;
use crate::reconciliation::{CrosswalkEntry, IdentifierCrosswalk};
use crate::schema::Metric;
use crate::validation::CoverageExpectation;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

pub const DEFAULT_DEPRECIATION_RATE: f64 = 0.035;
pub const DEFAULT_WACC: f64 = 0.075;
pub const DEFAULT_TAX_RATE: f64 = 0.27;
pub const DEFAULT_RESIDENTIAL_MONTHLY_KWH: f64 = 500.0;
pub const DEFAULT_OM_ESCALATION: f64 = 0.03;
pub const DEFAULT_RATE_BASE_GROWTH: f64 = 0.04;
pub const DEFAULT_OUTLIER_Z_THRESHOLD: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaxBasis {
    /// Income tax grossed up on the pre-tax total: `pre_tax * t / (1 - t)`
    #[default]
    GrossUp,
    /// Flat effective rate on the pre-tax total: `pre_tax * t`
    Simple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OmBasis {
    /// All six O&M categories
    #[default]
    Total,
    /// Total less production, whose fuel and purchased power are recovered through pass-through balancing accounts
    ExcludePassthrough,
    /// Distribution + customer service + allocated A&G, comparable to a general rate case request
    GrcComparable,
}

/// Regulatory assumptions feeding the revenue requirement and bill impact model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AssumptionSet {
    #[schemars(description = "Annual depreciation as a fraction of rate base (default 0.035)")]
    pub depreciation_rate: f64,

    #[schemars(description = "Weighted average cost of capital, the allowed return on rate base (default 0.075)")]
    pub wacc: f64,

    #[schemars(description = "Combined federal and state income tax rate (default 0.27)")]
    pub tax_rate: f64,

    pub tax_basis: TaxBasis,
    pub om_basis: OmBasis,

    #[schemars(description = "Share of A&G attributed to the electric business in GRC-comparable O&M (default 0.70)")]
    pub ag_electric_allocation: f64,

    #[schemars(description = "Average residential usage used for the baseline bill, kWh per month (default 500)")]
    pub residential_monthly_kwh: f64,

    #[schemars(description = "Annual O&M escalation applied for the test year (default 0.03)")]
    pub om_escalation: f64,

    #[schemars(description = "Annual rate base growth applied for the test year (default 0.04)")]
    pub rate_base_growth: f64,
}

impl Default for AssumptionSet {
    fn default() -> Self {
        Self {
            depreciation_rate: DEFAULT_DEPRECIATION_RATE,
            wacc: DEFAULT_WACC,
            tax_rate: DEFAULT_TAX_RATE,
            tax_basis: TaxBasis::GrossUp,
            om_basis: OmBasis::Total,
            ag_electric_allocation: DEFAULT_AG_ELECTRIC_ALLOCATION,
            residential_monthly_kwh: DEFAULT_RESIDENTIAL_MONTHLY_KWH,
            om_escalation: DEFAULT_OM_ESCALATION,
            rate_base_growth: DEFAULT_RATE_BASE_GROWTH,
        }
    }
}

impl AssumptionSet {
    /// The simplified GRC comparison: GRC-comparable O&M with a flat 15% effective tax rate.
    pub fn grc_comparable() -> Self {
        Self {
            tax_rate: 0.15,
            tax_basis: TaxBasis::Simple,
            om_basis: OmBasis::GrcComparable,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let unit_interval = [
            ("depreciation_rate", self.depreciation_rate),
            ("wacc", self.wacc),
            ("ag_electric_allocation", self.ag_electric_allocation),
        ];
        for (name, value) in unit_interval {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(RateCaseError::InvalidAssumption(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        if !self.tax_rate.is_finite() || !(0.0..1.0).contains(&self.tax_rate) {
            return Err(RateCaseError::InvalidAssumption(format!(
                "tax_rate must be within [0, 1), got {}",
                self.tax_rate
            )));
        }

        if !self.residential_monthly_kwh.is_finite() || self.residential_monthly_kwh <= 0.0 {
            return Err(RateCaseError::InvalidAssumption(format!(
                "residential_monthly_kwh must be positive, got {}",
                self.residential_monthly_kwh
            )));
        }

        for (name, value) in [
            ("om_escalation", self.om_escalation),
            ("rate_base_growth", self.rate_base_growth),
        ] {
            if !value.is_finite() || value <= -1.0 {
                return Err(RateCaseError::InvalidAssumption(format!(
                    "{} must be greater than -1, got {}",
                    name, value
                )));
            }
        }

        Ok(())
    }
}

/// Everything the pipeline needs beyond the source rows themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AnalysisConfig {
    pub assumptions: AssumptionSet,

    #[schemars(description = "Observations with |z| strictly above this are flagged (default 2.0)")]
    pub outlier_z_threshold: f64,

    pub outlier_metric: Metric,
    pub benchmark_metric: Metric,
    pub trend_metric: Metric,
    pub regression_response: Metric,

    #[schemars(description = "Year to benchmark; defaults to the latest year present")]
    pub benchmark_year: Option<i32>,

    #[schemars(description = "Year whose records drive bill impacts and the test-year forecast; defaults to the latest year present")]
    pub base_year: Option<i32>,

    pub coverage: CoverageExpectation,

    #[schemars(description = "Source-A to source-B identifier mapping with canonical utility names")]
    pub crosswalk: Vec<CrosswalkEntry>,

    #[schemars(description = "Two-letter state code used to filter source-B sales rows")]
    pub target_state: String,

    pub chart: ChartOfAccounts,
    pub sensitivity: SensitivityGrid,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            assumptions: AssumptionSet::default(),
            outlier_z_threshold: DEFAULT_OUTLIER_Z_THRESHOLD,
            outlier_metric: Metric::OmPerCustomer,
            benchmark_metric: Metric::OmPerCustomer,
            trend_metric: Metric::OmTotal,
            regression_response: Metric::OmTotal,
            benchmark_year: None,
            base_year: None,
            coverage: CoverageExpectation::default(),
            crosswalk: IdentifierCrosswalk::california_ious(),
            target_state: "CA".to_string(),
            chart: ChartOfAccounts::default(),
            sensitivity: SensitivityGrid::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn from_json_str(contents: &str) -> Result<Self> {
        let config: AnalysisConfig = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AnalysisConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a `.toml` or `.json` config file, chosen by extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        debug!("Loading analysis config from {}", path.display());
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&contents),
            _ => Self::from_json_str(&contents),
        }
    }

    pub fn identifier_crosswalk(&self) -> Result<IdentifierCrosswalk> {
        IdentifierCrosswalk::new(self.crosswalk.clone())
    }

    pub fn validate(&self) -> Result<()> {
        self.assumptions.validate()?;

        if !self.outlier_z_threshold.is_finite() || self.outlier_z_threshold <= 0.0 {
            return Err(RateCaseError::InvalidAssumption(format!(
                "outlier_z_threshold must be positive, got {}",
                self.outlier_z_threshold
            )));
        }

        if self.target_state.trim().is_empty() {
            return Err(RateCaseError::InvalidAssumption(
                "target_state must not be empty".to_string(),
            ));
        }

        self.chart.validate()?;
        self.sensitivity.validate()?;

        let crosswalk = self.identifier_crosswalk()?;
        if self.coverage.utilities.is_empty() || self.coverage.years.is_empty() {
            return Err(RateCaseError::InvalidCrosswalk(
                "coverage expectation must name at least one utility and one year".to_string(),
            ));
        }
        let known: BTreeSet<&str> = crosswalk.entries().map(|e| e.utility_name.as_str()).collect();
        if let Some(unknown) = self
            .coverage
            .utilities
            .iter()
            .find(|u| !known.contains(u.as_str()))
        {
            return Err(RateCaseError::InvalidCrosswalk(format!(
                "expected utility '{}' has no crosswalk entry",
                unknown
            )));
        }

        Ok(())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(AnalysisConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}
