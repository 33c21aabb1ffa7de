//! Revenue requirement: `RR = O&M + depreciation + return + taxes`.
//!
//! Depreciation and return are both proportional to rate base. Taxes are applied to the
//! pre-tax total according to the configured [`TaxBasis`].

use crate::config::{AssumptionSet, OmBasis, TaxBasis};
use crate::error::{RateCaseError, Result};
use crate::schema::{RecordKey, UtilityYearRecord};
use crate::utils::ratio;
use log::{info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RevenueRequirementComponents {
    pub om_expense: f64,
    pub depreciation: f64,
    pub return_on_rate_base: f64,
    pub pre_tax_total: f64,
    pub taxes: f64,
    pub revenue_requirement: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RevenueRequirementRecord {
    pub utility_name: String,
    pub report_year: i32,
    pub om_basis: OmBasis,

    #[schemars(description = "O&M under the configured basis")]
    pub om_total: f64,
    pub rate_base: f64,
    pub depreciation: f64,
    pub return_on_rate_base: f64,
    pub taxes: f64,
    pub revenue_requirement: f64,

    #[schemars(description = "Source-A operating revenue, else source-B total retail revenue")]
    pub actual_revenue: Option<f64>,

    #[schemars(description = "RR - actual revenue; positive means under-recovery")]
    pub revenue_gap: Option<f64>,

    #[schemars(description = "Revenue gap as a fraction of actual revenue")]
    pub revenue_gap_pct: Option<f64>,
}

impl RevenueRequirementRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.utility_name.clone(), self.report_year)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SkippedRecord {
    pub key: RecordKey,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RevenueRequirementTable {
    pub rows: Vec<RevenueRequirementRecord>,
    pub skipped: Vec<SkippedRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TestYearForecast {
    pub utility_name: String,
    pub base_year: i32,
    pub base_revenue_requirement: f64,
    pub forecast_om: f64,
    pub forecast_rate_base: f64,
    pub forecast_revenue_requirement: f64,
    pub change: f64,
    pub change_pct: Option<f64>,
}

/// O&M expense for a record under `basis`.
pub fn om_for_basis(record: &UtilityYearRecord, basis: OmBasis, ag_electric_allocation: f64) -> f64 {
    match basis {
        OmBasis::Total => record.om_total,
        OmBasis::ExcludePassthrough => record.om_total - record.om.production,
        OmBasis::GrcComparable => {
            record.om.distribution
                + record.om.customer_service
                + record.om.admin_general * ag_electric_allocation
        }
    }
}

/// Actual collected revenue: source-A operating revenue when filed, else source-B retail revenue.
pub fn actual_revenue(record: &UtilityYearRecord) -> Option<f64> {
    record.operating_revenue.or_else(|| record.revenue_total())
}

/// Pure RR computation from O&M, rate base and the assumption set.
pub fn compute_revenue_requirement(
    om_expense: f64,
    rate_base: f64,
    assumptions: &AssumptionSet,
) -> Result<RevenueRequirementComponents> {
    if !(0.0..1.0).contains(&assumptions.tax_rate) {
        return Err(RateCaseError::InvalidAssumption(format!(
            "tax_rate must be within [0, 1), got {}",
            assumptions.tax_rate
        )));
    }

    let depreciation = assumptions.depreciation_rate * rate_base;
    let return_on_rate_base = assumptions.wacc * rate_base;
    let pre_tax_total = om_expense + depreciation + return_on_rate_base;
    let taxes = match assumptions.tax_basis {
        TaxBasis::GrossUp => pre_tax_total * assumptions.tax_rate / (1.0 - assumptions.tax_rate),
        TaxBasis::Simple => pre_tax_total * assumptions.tax_rate,
    };

    Ok(RevenueRequirementComponents {
        om_expense,
        depreciation,
        return_on_rate_base,
        pre_tax_total,
        taxes,
        revenue_requirement: pre_tax_total + taxes,
    })
}

pub struct RevenueRequirementCalculator<'a> {
    assumptions: &'a AssumptionSet,
}

impl<'a> RevenueRequirementCalculator<'a> {
    pub fn new(assumptions: &'a AssumptionSet) -> Self {
        Self { assumptions }
    }

    fn rate_base(record: &UtilityYearRecord) -> Result<f64> {
        record.rate_base.ok_or_else(|| RateCaseError::MissingField {
            utility: record.utility_name.clone(),
            year: record.report_year,
            field: "rate_base".to_string(),
        })
    }

    pub fn om_expense(&self, record: &UtilityYearRecord) -> f64 {
        om_for_basis(
            record,
            self.assumptions.om_basis,
            self.assumptions.ag_electric_allocation,
        )
    }

    pub fn for_record(&self, record: &UtilityYearRecord) -> Result<RevenueRequirementRecord> {
        let rate_base = Self::rate_base(record)?;
        let components = compute_revenue_requirement(self.om_expense(record), rate_base, self.assumptions)?;

        let actual_revenue = actual_revenue(record);
        let revenue_gap = actual_revenue.map(|actual| components.revenue_requirement - actual);
        let revenue_gap_pct = revenue_gap
            .zip(actual_revenue)
            .and_then(|(gap, actual)| ratio(gap, actual));

        Ok(RevenueRequirementRecord {
            utility_name: record.utility_name.clone(),
            report_year: record.report_year,
            om_basis: self.assumptions.om_basis,
            om_total: components.om_expense,
            rate_base,
            depreciation: components.depreciation,
            return_on_rate_base: components.return_on_rate_base,
            taxes: components.taxes,
            revenue_requirement: components.revenue_requirement,
            actual_revenue,
            revenue_gap,
            revenue_gap_pct,
        })
    }

    /// RR for every record. Records that cannot be computed are listed, not fatal.
    pub fn table(&self, records: &[UtilityYearRecord]) -> RevenueRequirementTable {
        let mut table = RevenueRequirementTable::default();
        for record in records {
            match self.for_record(record) {
                Ok(row) => table.rows.push(row),
                Err(e) => {
                    warn!("Skipping revenue requirement for {}: {}", record.key(), e);
                    table.skipped.push(SkippedRecord {
                        key: record.key(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        table.rows.sort_by_key(|r| r.key());

        info!(
            "Computed revenue requirement for {} records ({} skipped)",
            table.rows.len(),
            table.skipped.len()
        );
        table
    }

    /// Escalates O&M and rate base one year forward and recomputes RR.
    pub fn forecast(&self, record: &UtilityYearRecord) -> Result<TestYearForecast> {
        let rate_base = Self::rate_base(record)?;
        let om_expense = self.om_expense(record);
        let base = compute_revenue_requirement(om_expense, rate_base, self.assumptions)?;

        let forecast_om = om_expense * (1.0 + self.assumptions.om_escalation);
        let forecast_rate_base = rate_base * (1.0 + self.assumptions.rate_base_growth);
        let forecast = compute_revenue_requirement(forecast_om, forecast_rate_base, self.assumptions)?;

        let change = forecast.revenue_requirement - base.revenue_requirement;
        Ok(TestYearForecast {
            utility_name: record.utility_name.clone(),
            base_year: record.report_year,
            base_revenue_requirement: base.revenue_requirement,
            forecast_om,
            forecast_rate_base,
            forecast_revenue_requirement: forecast.revenue_requirement,
            change,
            change_pct: ratio(change, base.revenue_requirement),
        })
    }
}

pub fn revenue_requirement_table(records: &[UtilityYearRecord], assumptions: &AssumptionSet) -> RevenueRequirementTable {
    RevenueRequirementCalculator::new(assumptions).table(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CategoryTotals, ClassSales, CustomerClasses};

    const BILLION: f64 = 1.0e9;

    fn no_tax() -> AssumptionSet {
        AssumptionSet {
            tax_rate: 0.0,
            ..AssumptionSet::default()
        }
    }

    fn record(om_total: f64, rate_base: Option<f64>) -> UtilityYearRecord {
        let om = CategoryTotals {
            production: om_total * 0.4,
            distribution: om_total * 0.3,
            customer_service: om_total * 0.1,
            admin_general: om_total * 0.2,
            ..Default::default()
        };
        UtilityYearRecord {
            utility_name: "SCE".to_string(),
            report_year: 2023,
            source_a_id: 155,
            source_b_id: 17609,
            om_total: om.total(),
            om,
            rate_base,
            operating_revenue: None,
            classes: CustomerClasses {
                total: ClassSales {
                    revenue: Some(9.0 * BILLION),
                    sales_mwh: None,
                    customers: None,
                },
                ..Default::default()
            },
            metrics: None,
        }
    }

    #[test]
    fn test_revenue_requirement_without_taxes() {
        let rr = compute_revenue_requirement(5.0 * BILLION, 40.0 * BILLION, &no_tax()).unwrap();
        assert!((rr.depreciation - 1.4 * BILLION).abs() < 1.0);
        assert!((rr.return_on_rate_base - 3.0 * BILLION).abs() < 1.0);
        assert_eq!(rr.taxes, 0.0);
        assert!((rr.revenue_requirement - 9.4 * BILLION).abs() < 1.0);
    }

    #[test]
    fn test_tax_bases() {
        let gross_up = compute_revenue_requirement(100.0, 0.0, &AssumptionSet::default()).unwrap();
        assert!((gross_up.taxes - 100.0 * 0.27 / 0.73).abs() < 1e-9);

        let simple = AssumptionSet {
            tax_basis: TaxBasis::Simple,
            tax_rate: 0.15,
            ..AssumptionSet::default()
        };
        let simple = compute_revenue_requirement(100.0, 0.0, &simple).unwrap();
        assert!((simple.taxes - 15.0).abs() < 1e-9);

        let invalid = AssumptionSet {
            tax_rate: 1.0,
            ..AssumptionSet::default()
        };
        assert!(compute_revenue_requirement(100.0, 0.0, &invalid).is_err());
    }

    #[test]
    fn test_revenue_gap_signed() {
        let assumptions = no_tax();
        let row = RevenueRequirementCalculator::new(&assumptions)
            .for_record(&record(5.0 * BILLION, Some(40.0 * BILLION)))
            .unwrap();
        // RR 9.4B against 9.0B of source-B revenue: under-recovery
        assert!((row.revenue_gap.unwrap() - 0.4 * BILLION).abs() < 1.0);
        assert!((row.revenue_gap_pct.unwrap() - 0.4 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_operating_revenue_preferred_for_actual() {
        let mut rec = record(5.0 * BILLION, Some(40.0 * BILLION));
        rec.operating_revenue = Some(10.0 * BILLION);
        assert_eq!(actual_revenue(&rec), Some(10.0 * BILLION));

        rec.operating_revenue = None;
        rec.classes.total.revenue = None;
        assert_eq!(actual_revenue(&rec), None);
    }

    #[test]
    fn test_missing_rate_base_is_skipped() {
        let assumptions = AssumptionSet::default();
        let calc = RevenueRequirementCalculator::new(&assumptions);
        assert!(matches!(
            calc.for_record(&record(100.0, None)),
            Err(RateCaseError::MissingField { field, .. }) if field == "rate_base"
        ));

        let table = calc.table(&[record(100.0, None), record(100.0, Some(1000.0))]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.skipped.len(), 1);
        assert!(table.skipped[0].reason.contains("rate_base"));
    }

    #[test]
    fn test_om_bases() {
        let rec = record(1000.0, Some(0.0));
        assert_eq!(om_for_basis(&rec, OmBasis::Total, 0.7), rec.om_total);
        assert!((om_for_basis(&rec, OmBasis::ExcludePassthrough, 0.7) - 600.0).abs() < 1e-9);
        // 300 + 100 + 200 * 0.7
        assert!((om_for_basis(&rec, OmBasis::GrcComparable, 0.7) - 540.0).abs() < 1e-9);
    }

    #[test]
    fn test_test_year_forecast() {
        let assumptions = no_tax();
        let forecast = RevenueRequirementCalculator::new(&assumptions)
            .forecast(&record(5.0 * BILLION, Some(40.0 * BILLION)))
            .unwrap();
        assert!((forecast.forecast_om - 5.15 * BILLION).abs() < 1.0);
        assert!((forecast.forecast_rate_base - 41.6 * BILLION).abs() < 1.0);
        // 5.15 + 41.6 * 0.11 = 9.726
        assert!((forecast.forecast_revenue_requirement - 9.726 * BILLION).abs() < 10.0);
        assert!(forecast.change > 0.0);
    }
}
