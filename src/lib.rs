//! # Rate Case Analysis
//!
//! A library for turning two independently keyed sets of utility regulatory filings into
//! one reconciled utility-year panel, then deriving cost benchmarks and a simplified
//! regulatory financial model from it.
//!
//! ## Core Concepts
//!
//! - **Categorization**: FERC expense account codes are mapped onto six functional O&M buckets
//! - **Reconciliation**: Source-A (FERC Form 1) and source-B (EIA-861) rows are joined
//!   through an explicit identifier crosswalk; unmatched rows become reported gaps
//! - **Derived Metrics**: Per-customer, per-MWh and year-over-year ratios, absent when undefined
//! - **Statistical Analyses**: Trend/CAGR, cost-driver regression, outliers and peer ranking,
//!   each returning either a value or an explicit reason it is not computable
//! - **Financial Model**: Revenue requirement, revenue gap and residential bill impact
//!   across a sensitivity sweep of assumptions
//!
//! ## Example
//!
//! ```rust,ignore
//! use rate_case_analysis::*;
//!
//! let inputs = SourceInputs {
//!     expense_lines: Some(expense_lines),
//!     plant: Some(plant_rows),
//!     operating_revenue: Vec::new(),
//!     sales: Some(sales_rows),
//! };
//!
//! let output = RateCaseProcessor::run(&inputs, &AnalysisConfig::default())?;
//! println!("{}", output.report.to_json()?);
//! ```

pub mod analysis;
pub mod bill_impact;
pub mod chart_of_accounts;
pub mod config;
pub mod error;
pub mod export;
pub mod ingestion;
pub mod metrics;
pub mod reconciliation;
pub mod report;
pub mod revenue_requirement;
pub mod schema;
pub mod utils;
pub mod validation;

pub use analysis::{NotComputableReason, Outcome};
pub use bill_impact::{
    bill_impact, named_scenarios, sweep, AssumptionParameter, BillImpactRecord, BillImpactTable, Scenario,
    SensitivityAxis, SensitivityGrid,
};
pub use chart_of_accounts::{AccountRange, ChartOfAccounts};
pub use config::{AnalysisConfig, AssumptionSet, OmBasis, TaxBasis};
pub use error::{RateCaseError, Result};
pub use ingestion::{build_source_a, build_source_b};
pub use metrics::{derive_metrics, DerivedMetricSet, MetricsCalculator, YoyRow};
pub use reconciliation::{
    reconcile, CrosswalkEntry, IdentifierCrosswalk, ReconciliationGap, ReconciliationOutcome, Reconciler,
};
pub use report::AnalysisReport;
pub use revenue_requirement::{
    compute_revenue_requirement, revenue_requirement_table, RevenueRequirementCalculator,
    RevenueRequirementRecord, RevenueRequirementTable, TestYearForecast,
};
pub use schema::*;
pub use validation::{verify_records, CoverageExpectation, RecordValidator, ValidationReport};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Rows handed over by the external extraction step. `None` marks a source that was
/// never loaded, which is fatal; an empty `Vec` is a loaded source with no rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceInputs {
    pub expense_lines: Option<Vec<RawExpenseLine>>,
    pub plant: Option<Vec<PlantRecord>>,
    /// Optional schedule; when empty, actual revenue falls back to source-B retail revenue
    pub operating_revenue: Vec<OperatingRevenueRecord>,
    pub sales: Option<Vec<SalesRow>>,
}

impl SourceInputs {
    fn require<'a, T>(source: &'a Option<Vec<T>>, name: &str) -> Result<&'a [T]> {
        source
            .as_deref()
            .ok_or_else(|| RateCaseError::MissingSource {
                source_name: name.to_string(),
            })
    }

    pub fn expense_lines(&self) -> Result<&[RawExpenseLine]> {
        Self::require(&self.expense_lines, "source-A operating expenses")
    }

    pub fn plant(&self) -> Result<&[PlantRecord]> {
        Self::require(&self.plant, "source-A utility plant")
    }

    pub fn sales(&self) -> Result<&[SalesRow]> {
        Self::require(&self.sales, "source-B retail sales")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    /// Canonical records with derived metrics, sorted by (utility, year)
    pub records: Vec<UtilityYearRecord>,
    pub validation: ValidationReport,
    pub revenue_requirements: RevenueRequirementTable,
    pub base_year: Option<i32>,
    pub forecasts: Vec<TestYearForecast>,
    /// Cartesian sensitivity sweep over the base-year records
    pub bill_impacts: BillImpactTable,
    /// One-at-a-time named scenarios over the base-year records
    pub scenario_impacts: BillImpactTable,
    pub report: AnalysisReport,
}

pub struct RateCaseProcessor;

impl RateCaseProcessor {
    /// Ingest, categorize and reconcile. Rows for years outside the coverage expectation
    /// are dropped before the join. Gaps are returned, not raised, so unrelated
    /// entity-years remain usable.
    pub fn reconcile(inputs: &SourceInputs, config: &AnalysisConfig) -> Result<ReconciliationOutcome> {
        let expense_lines = inputs.expense_lines()?;
        let plant = inputs.plant()?;
        let sales = inputs.sales()?;

        let crosswalk = config.identifier_crosswalk()?;
        debug!(
            "Ingesting {} expense lines, {} plant rows, {} sales rows",
            expense_lines.len(),
            plant.len(),
            sales.len()
        );

        let years: BTreeSet<i32> = config.coverage.years.iter().copied().collect();
        let mut source_a = build_source_a(&config.chart, expense_lines, plant, &inputs.operating_revenue);
        let mut source_b = build_source_b(&crosswalk, sales, &config.target_state);

        let (a_before, b_before) = (source_a.len(), source_b.len());
        source_a.retain(|a| years.contains(&a.report_year));
        source_b.retain(|b| years.contains(&b.report_year));
        if source_a.len() < a_before || source_b.len() < b_before {
            debug!(
                "Dropped {} source-A and {} source-B aggregates outside coverage years {:?}",
                a_before - source_a.len(),
                b_before - source_b.len(),
                years
            );
        }

        Reconciler::new(&crosswalk).reconcile(&source_a, &source_b)
    }

    pub fn run(inputs: &SourceInputs, config: &AnalysisConfig) -> Result<PipelineOutput> {
        config.validate()?;

        // Fail fast on absent sources before any work
        inputs.expense_lines()?;
        inputs.plant()?;
        inputs.sales()?;

        info!(
            "Running rate case analysis for {} utilities over {} years",
            config.coverage.utilities.len(),
            config.coverage.years.len()
        );

        let outcome = Self::reconcile(inputs, config)?;
        let validation = verify_records(&config.coverage, &outcome.records, &outcome.gaps)?;

        let mut records = outcome.records;
        derive_metrics(&mut records, config.assumptions.ag_electric_allocation);

        let report = AnalysisReport::build(&records, config);

        let calculator = RevenueRequirementCalculator::new(&config.assumptions);
        let revenue_requirements = calculator.table(&records);

        let base_year = config
            .base_year
            .or_else(|| records.iter().map(|r| r.report_year).max());
        let base_records: Vec<UtilityYearRecord> = records
            .iter()
            .filter(|r| Some(r.report_year) == base_year)
            .cloned()
            .collect();
        if base_records.is_empty() {
            warn!("No records for base year {:?}; bill impacts will be empty", base_year);
        }

        let forecasts: Vec<TestYearForecast> = base_records
            .iter()
            .filter_map(|r| match calculator.forecast(r) {
                Ok(forecast) => Some(forecast),
                Err(e) => {
                    warn!("No test-year forecast for {}: {}", r.key(), e);
                    None
                }
            })
            .collect();

        let grid_scenarios = config.sensitivity.scenarios(&config.assumptions)?;
        let bill_impacts = sweep(&base_records, &grid_scenarios);
        let scenario_impacts = sweep(&base_records, &named_scenarios(&config.assumptions)?);

        info!(
            "Rate case analysis complete: {} records, {} revenue requirement rows, {} bill impact rows",
            records.len(),
            revenue_requirements.rows.len(),
            bill_impacts.rows.len()
        );

        Ok(PipelineOutput {
            records,
            validation,
            revenue_requirements,
            base_year,
            forecasts,
            bill_impacts,
            scenario_impacts,
            report,
        })
    }
}

pub fn run_rate_case_analysis(inputs: &SourceInputs, config: &AnalysisConfig) -> Result<PipelineOutput> {
    RateCaseProcessor::run(inputs, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_utility_config() -> AnalysisConfig {
        AnalysisConfig {
            crosswalk: vec![CrosswalkEntry::new(155, 17609, "SCE")],
            coverage: CoverageExpectation {
                utilities: vec!["SCE".to_string()],
                years: vec![2022, 2023],
            },
            ..AnalysisConfig::default()
        }
    }

    fn inputs() -> SourceInputs {
        inputs_for(&[2022, 2023])
    }

    fn inputs_for(years: &[i32]) -> SourceInputs {
        let mut expense_lines = Vec::new();
        let mut plant = Vec::new();
        let mut sales = Vec::new();
        for (i, year) in years.iter().copied().enumerate() {
            let scale = 1.0 + 0.1 * i as f64;
            expense_lines.push(RawExpenseLine {
                entity_id: 155,
                account_code: "555".to_string(),
                amount: 1.0e9 * scale,
                report_year: year,
            });
            expense_lines.push(RawExpenseLine {
                entity_id: 155,
                account_code: "588".to_string(),
                amount: 0.5e9 * scale,
                report_year: year,
            });
            plant.push(PlantRecord {
                entity_id: 155,
                report_year: year,
                utility_plant_in_service: Some(50.0e9),
                accumulated_depreciation: Some(15.0e9),
            });
            sales.push(SalesRow {
                utility_id: 17609,
                report_year: year,
                utility_name: "Southern California Edison Co".to_string(),
                state: "CA".to_string(),
                classes: CustomerClasses {
                    residential: ClassSales {
                        revenue: Some(4.0e6),
                        sales_mwh: Some(30.0e6),
                        customers: Some(4_500_000),
                    },
                    total: ClassSales {
                        revenue: Some(10.0e6),
                        sales_mwh: Some(80.0e6),
                        customers: Some(5_000_000),
                    },
                    ..Default::default()
                },
            });
        }
        SourceInputs {
            expense_lines: Some(expense_lines),
            plant: Some(plant),
            operating_revenue: Vec::new(),
            sales: Some(sales),
        }
    }

    #[test]
    fn test_missing_source_is_fatal() {
        let mut missing = inputs();
        missing.plant = None;
        match RateCaseProcessor::run(&missing, &single_utility_config()) {
            Err(RateCaseError::MissingSource { source_name }) => {
                assert!(source_name.contains("plant"));
            }
            other => panic!("expected missing source, got {:?}", other.map(|o| o.records.len())),
        }
    }

    #[test]
    fn test_run_small_panel() {
        let output = RateCaseProcessor::run(&inputs(), &single_utility_config()).unwrap();

        assert_eq!(output.records.len(), 2);
        assert_eq!(output.base_year, Some(2023));
        assert!(output.records.iter().all(|r| r.metrics.is_some()));
        assert_eq!(output.records[0].rate_base, Some(35.0e9));
        assert_eq!(output.records[0].revenue_total(), Some(10.0e9));

        assert_eq!(output.revenue_requirements.rows.len(), 2);
        assert_eq!(output.forecasts.len(), 1);
        assert_eq!(output.bill_impacts.rows.len(), 9);
        assert_eq!(output.scenario_impacts.rows.len(), 7);

        let yoy = output.records[1]
            .metrics
            .as_ref()
            .and_then(|m| m.yoy(Metric::OmTotal))
            .unwrap();
        assert!((yoy - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_coverage_shortfall_is_fatal() {
        let mut partial = inputs();
        if let Some(sales) = partial.sales.as_mut() {
            sales.retain(|s| s.report_year != 2023);
        }
        assert!(matches!(
            RateCaseProcessor::run(&partial, &single_utility_config()),
            Err(RateCaseError::CoverageShortfall { .. })
        ));

        // Reconciliation alone still yields the unaffected year
        let outcome = RateCaseProcessor::reconcile(&partial, &single_utility_config()).unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.gaps.len(), 1);
    }

    #[test]
    fn test_rows_outside_coverage_years_are_ignored() {
        let inputs = inputs_for(&[2021, 2022, 2023]);
        let config = single_utility_config();

        let outcome = RateCaseProcessor::reconcile(&inputs, &config).unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert!(outcome.gaps.is_empty());

        let output = RateCaseProcessor::run(&inputs, &config).unwrap();
        assert_eq!(output.records.len(), 2);
        assert!(output.records.iter().all(|r| r.report_year >= 2022));
        // 2022 has no prior year once 2021 is dropped
        let first = output.records[0].metrics.as_ref().unwrap();
        assert_eq!(first.yoy(Metric::OmTotal), None);
    }

    #[test]
    fn test_unexpected_utility_still_fatal() {
        let mut config = single_utility_config();
        config.crosswalk.push(CrosswalkEntry::new(183, 14328, "PG&E"));
        let mut inputs = inputs();
        if let (Some(expenses), Some(plant), Some(sales)) =
            (inputs.expense_lines.as_mut(), inputs.plant.as_mut(), inputs.sales.as_mut())
        {
            expenses.push(RawExpenseLine {
                entity_id: 183,
                account_code: "580".to_string(),
                amount: 1.0e9,
                report_year: 2023,
            });
            plant.push(PlantRecord {
                entity_id: 183,
                report_year: 2023,
                utility_plant_in_service: Some(1.0e9),
                accumulated_depreciation: Some(0.5e9),
            });
            sales.push(SalesRow {
                utility_id: 14328,
                report_year: 2023,
                utility_name: "Pacific Gas & Electric Co".to_string(),
                state: "CA".to_string(),
                classes: CustomerClasses::default(),
            });
        }
        assert!(matches!(
            RateCaseProcessor::run(&inputs, &config),
            Err(RateCaseError::InvariantViolation { invariant, .. }) if invariant == "expected_coverage"
        ));
    }
}
