//! Residential bill impact under alternative assumption sets.
//!
//! Each scenario is a complete, independent [`AssumptionSet`]. A bill impact is a pure
//! function of one record and one scenario, so scenarios never share mutable state.

use crate::config::AssumptionSet;
use crate::error::{RateCaseError, Result};
use crate::revenue_requirement::{compute_revenue_requirement, om_for_basis, SkippedRecord};
use crate::schema::UtilityYearRecord;
use crate::utils::ratio;
use log::{debug, info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

const MONTHS_PER_YEAR: f64 = 12.0;
const KWH_PER_MWH: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssumptionParameter {
    DepreciationRate,
    Wacc,
    TaxRate,
    OmEscalation,
    RateBaseGrowth,
}

impl AssumptionParameter {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssumptionParameter::DepreciationRate => "depreciation_rate",
            AssumptionParameter::Wacc => "wacc",
            AssumptionParameter::TaxRate => "tax_rate",
            AssumptionParameter::OmEscalation => "om_escalation",
            AssumptionParameter::RateBaseGrowth => "rate_base_growth",
        }
    }

    pub fn apply(&self, assumptions: &mut AssumptionSet, value: f64) {
        match self {
            AssumptionParameter::DepreciationRate => assumptions.depreciation_rate = value,
            AssumptionParameter::Wacc => assumptions.wacc = value,
            AssumptionParameter::TaxRate => assumptions.tax_rate = value,
            AssumptionParameter::OmEscalation => assumptions.om_escalation = value,
            AssumptionParameter::RateBaseGrowth => assumptions.rate_base_growth = value,
        }
    }
}

impl fmt::Display for AssumptionParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SensitivityAxis {
    pub parameter: AssumptionParameter,
    pub values: Vec<f64>,
}

impl SensitivityAxis {
    pub fn new(parameter: AssumptionParameter, values: Vec<f64>) -> Self {
        Self { parameter, values }
    }
}

/// Cartesian sweep: `k` values on each of `p` axes yields `k^p` scenarios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SensitivityGrid {
    pub axes: Vec<SensitivityAxis>,
}

impl Default for SensitivityGrid {
    fn default() -> Self {
        Self {
            axes: vec![
                SensitivityAxis::new(AssumptionParameter::Wacc, vec![0.065, 0.075, 0.085]),
                SensitivityAxis::new(
                    AssumptionParameter::DepreciationRate,
                    vec![0.030, 0.035, 0.040],
                ),
            ],
        }
    }
}

impl SensitivityGrid {
    pub fn new(axes: Vec<SensitivityAxis>) -> Result<Self> {
        let grid = Self { axes };
        grid.validate()?;
        Ok(grid)
    }

    pub fn validate(&self) -> Result<()> {
        let mut parameters = BTreeSet::new();
        for axis in &self.axes {
            if !parameters.insert(axis.parameter) {
                return Err(RateCaseError::InvalidSensitivityGrid(format!(
                    "parameter {} appears on more than one axis",
                    axis.parameter
                )));
            }
            if axis.values.is_empty() {
                return Err(RateCaseError::InvalidSensitivityGrid(format!(
                    "axis {} has no values",
                    axis.parameter
                )));
            }
            for (i, value) in axis.values.iter().enumerate() {
                if !value.is_finite() {
                    return Err(RateCaseError::InvalidSensitivityGrid(format!(
                        "axis {} has non-finite value {}",
                        axis.parameter, value
                    )));
                }
                if axis.values[..i].contains(value) {
                    return Err(RateCaseError::InvalidSensitivityGrid(format!(
                        "axis {} repeats value {}",
                        axis.parameter, value
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn scenario_count(&self) -> usize {
        self.axes.iter().map(|a| a.values.len()).product()
    }

    /// Expands the grid over `base`, one fully specified scenario per combination.
    pub fn scenarios(&self, base: &AssumptionSet) -> Result<Vec<Scenario>> {
        self.validate()?;

        let mut combinations: Vec<Vec<(AssumptionParameter, f64)>> = vec![Vec::new()];
        for axis in &self.axes {
            combinations = combinations
                .into_iter()
                .flat_map(|prefix| {
                    axis.values.iter().map(move |value| {
                        let mut combination = prefix.clone();
                        combination.push((axis.parameter, *value));
                        combination
                    })
                })
                .collect();
        }

        combinations
            .into_iter()
            .map(|parameters| Scenario::from_parameters(base, parameters))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Scenario {
    pub label: String,
    pub parameters: Vec<(AssumptionParameter, f64)>,
    pub assumptions: AssumptionSet,
}

impl Scenario {
    pub fn base(assumptions: &AssumptionSet) -> Self {
        Self {
            label: "Base Case".to_string(),
            parameters: Vec::new(),
            assumptions: assumptions.clone(),
        }
    }

    pub fn from_parameters(base: &AssumptionSet, parameters: Vec<(AssumptionParameter, f64)>) -> Result<Self> {
        let label = parameters
            .iter()
            .map(|(p, v)| format!("{}={}", p, v))
            .collect::<Vec<_>>()
            .join(", ");
        Self::named(label, base, parameters)
    }

    pub fn named(
        label: impl Into<String>,
        base: &AssumptionSet,
        parameters: Vec<(AssumptionParameter, f64)>,
    ) -> Result<Self> {
        let label = label.into();
        let mut assumptions = base.clone();
        for (parameter, value) in &parameters {
            parameter.apply(&mut assumptions, *value);
        }
        assumptions
            .validate()
            .map_err(|e| RateCaseError::InvalidSensitivityGrid(format!("scenario '{}': {}", label, e)))?;
        Ok(Self {
            label,
            parameters,
            assumptions,
        })
    }
}

/// One-at-a-time scenarios around the base case.
pub fn named_scenarios(base: &AssumptionSet) -> Result<Vec<Scenario>> {
    use AssumptionParameter::*;
    let variants = [
        ("High O&M Escalation", OmEscalation, 0.05),
        ("Low O&M Escalation", OmEscalation, 0.01),
        ("High Rate Base Growth", RateBaseGrowth, 0.06),
        ("Low Rate Base Growth", RateBaseGrowth, 0.02),
        ("High WACC", Wacc, 0.085),
        ("Low WACC", Wacc, 0.065),
    ];

    let mut scenarios = vec![Scenario::base(base)];
    for (label, parameter, value) in variants {
        scenarios.push(Scenario::named(label, base, vec![(parameter, value)])?);
    }
    Ok(scenarios)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BillImpactRecord {
    pub utility_name: String,
    pub report_year: i32,
    pub scenario_label: String,

    #[schemars(description = "Residential share of retail revenue used to allocate RR")]
    pub residential_share: f64,
    pub proposed_revenue_requirement: f64,

    #[schemars(description = "Actual residential revenue / residential customers / 12")]
    pub current_monthly_bill: f64,

    #[schemars(description = "Residential share x scenario RR / residential customers / 12")]
    pub proposed_monthly_bill: f64,

    #[schemars(description = "Fractional change from current to proposed bill")]
    pub pct_change: Option<f64>,
    pub annual_change: f64,

    pub current_rate_per_kwh: Option<f64>,
    pub proposed_rate_per_kwh: Option<f64>,

    #[schemars(description = "Proposed rate applied to the configured baseline monthly usage")]
    pub baseline_monthly_bill: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BillImpactTable {
    pub rows: Vec<BillImpactRecord>,
    pub skipped: Vec<SkippedRecord>,
}

fn require<T>(value: Option<T>, record: &UtilityYearRecord, field: &str) -> Result<T> {
    value.ok_or_else(|| RateCaseError::MissingField {
        utility: record.utility_name.clone(),
        year: record.report_year,
        field: field.to_string(),
    })
}

/// Bill impact of `scenario` on one utility-year. O&M and rate base are escalated one
/// year forward by the scenario's escalation and growth rates before RR is computed.
pub fn bill_impact(record: &UtilityYearRecord, scenario: &Scenario) -> Result<BillImpactRecord> {
    let assumptions = &scenario.assumptions;
    let residential = &record.classes.residential;

    let residential_revenue = require(residential.revenue, record, "residential_revenue")?;
    let customers = require(
        residential.customers.filter(|c| *c > 0).map(|c| c as f64),
        record,
        "residential_customers",
    )?;
    let residential_share = require(record.residential_revenue_share(), record, "residential_revenue_share")?;
    let rate_base = require(record.rate_base, record, "rate_base")?;

    let om_expense = om_for_basis(record, assumptions.om_basis, assumptions.ag_electric_allocation);
    let rr = compute_revenue_requirement(
        om_expense * (1.0 + assumptions.om_escalation),
        rate_base * (1.0 + assumptions.rate_base_growth),
        assumptions,
    )?;

    let residential_rr = residential_share * rr.revenue_requirement;
    let current_monthly_bill = residential_revenue / customers / MONTHS_PER_YEAR;
    let proposed_monthly_bill = residential_rr / customers / MONTHS_PER_YEAR;

    let residential_kwh = residential.sales_mwh.map(|mwh| mwh * KWH_PER_MWH);
    let current_rate_per_kwh = residential_kwh.and_then(|kwh| ratio(residential_revenue, kwh));
    let proposed_rate_per_kwh = residential_kwh.and_then(|kwh| ratio(residential_rr, kwh));

    Ok(BillImpactRecord {
        utility_name: record.utility_name.clone(),
        report_year: record.report_year,
        scenario_label: scenario.label.clone(),
        residential_share,
        proposed_revenue_requirement: rr.revenue_requirement,
        current_monthly_bill,
        proposed_monthly_bill,
        pct_change: ratio(proposed_monthly_bill - current_monthly_bill, current_monthly_bill),
        annual_change: (proposed_monthly_bill - current_monthly_bill) * MONTHS_PER_YEAR,
        current_rate_per_kwh,
        proposed_rate_per_kwh,
        baseline_monthly_bill: proposed_rate_per_kwh.map(|rate| rate * assumptions.residential_monthly_kwh),
    })
}

/// Bill impacts for every record under every scenario, ordered by utility, year, then scenario.
pub fn sweep(records: &[UtilityYearRecord], scenarios: &[Scenario]) -> BillImpactTable {
    let mut ordered: Vec<&UtilityYearRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.key());

    let mut table = BillImpactTable::default();
    for record in ordered {
        let mut failure = None;
        for scenario in scenarios {
            match bill_impact(record, scenario) {
                Ok(row) => table.rows.push(row),
                Err(e) => {
                    debug!("Bill impact for {} under '{}' failed: {}", record.key(), scenario.label, e);
                    failure = Some(e);
                }
            }
        }
        if let Some(e) = failure {
            warn!("Skipping bill impacts for {}: {}", record.key(), e);
            table.skipped.push(SkippedRecord {
                key: record.key(),
                reason: e.to_string(),
            });
        }
    }

    info!(
        "Computed {} bill impact rows across {} scenarios ({} records skipped)",
        table.rows.len(),
        scenarios.len(),
        table.skipped.len()
    );
    table
}
