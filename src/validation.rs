use crate::error::{RateCaseError, Result};
use crate::reconciliation::{IdentifierCrosswalk, ReconciliationGap};
use crate::schema::{CostCategory, RecordKey, UtilityYearRecord};
use crate::utils::approx_eq;
use log::{info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const DEFAULT_RELATIVE_TOLERANCE: f64 = 1e-6;

/// The utility-years a complete run is expected to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CoverageExpectation {
    pub utilities: Vec<String>,
    pub years: Vec<i32>,
}

impl Default for CoverageExpectation {
    fn default() -> Self {
        Self {
            utilities: IdentifierCrosswalk::california_ious()
                .into_iter()
                .map(|e| e.utility_name)
                .collect(),
            years: (2018..=2023).collect(),
        }
    }
}

impl CoverageExpectation {
    pub fn expected_keys(&self) -> BTreeSet<RecordKey> {
        self.utilities
            .iter()
            .flat_map(|u| self.years.iter().map(move |y| RecordKey::new(u.clone(), *y)))
            .collect()
    }

    pub fn expected_count(&self) -> usize {
        self.expected_keys().len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub records_checked: usize,
    pub expected_records: usize,
    /// Gaps that did not touch the expected coverage set (e.g. unrelated entities)
    pub tolerated_gaps: Vec<ReconciliationGap>,
}

pub struct RecordValidator<'a> {
    expectation: &'a CoverageExpectation,
    tolerance: f64,
}

impl<'a> RecordValidator<'a> {
    pub fn new(expectation: &'a CoverageExpectation) -> Self {
        Self {
            expectation,
            tolerance: DEFAULT_RELATIVE_TOLERANCE,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Checks record invariants and coverage. Any violation is fatal.
    pub fn verify(
        &self,
        records: &[UtilityYearRecord],
        gaps: &[ReconciliationGap],
    ) -> Result<ValidationReport> {
        let mut seen = BTreeSet::new();
        for record in records {
            if !seen.insert(record.key()) {
                return Err(RateCaseError::DuplicateRecord {
                    utility: record.utility_name.clone(),
                    year: record.report_year,
                });
            }
            self.verify_record(record)?;
        }

        let expected = self.expectation.expected_keys();

        let unexpected: Vec<String> = seen
            .difference(&expected)
            .map(|k| k.to_string())
            .collect();
        if let Some(first) = seen.difference(&expected).next() {
            return Err(RateCaseError::InvariantViolation {
                utility: first.utility_name.clone(),
                year: first.report_year,
                invariant: "expected_coverage".to_string(),
                details: format!(
                    "{} records outside the expected coverage set: {}",
                    unexpected.len(),
                    unexpected.join(", ")
                ),
            });
        }

        let missing: Vec<String> = expected
            .difference(&seen)
            .map(|key| {
                let reasons: Vec<String> = gaps
                    .iter()
                    .filter(|g| g.key().as_ref() == Some(key))
                    .map(|g| g.to_string())
                    .collect();
                if reasons.is_empty() {
                    key.to_string()
                } else {
                    format!("{} ({})", key, reasons.join("; "))
                }
            })
            .collect();

        if !missing.is_empty() {
            return Err(RateCaseError::CoverageShortfall {
                expected: expected.len(),
                actual: records.len(),
                missing,
            });
        }

        let tolerated_gaps: Vec<ReconciliationGap> = gaps
            .iter()
            .filter(|g| g.key().map_or(true, |k| !expected.contains(&k)))
            .cloned()
            .collect();
        for gap in &tolerated_gaps {
            warn!("Reconciliation gap outside expected coverage: {}", gap);
        }

        info!(
            "Validated {} utility-year records against {} expected",
            records.len(),
            expected.len()
        );

        Ok(ValidationReport {
            records_checked: records.len(),
            expected_records: expected.len(),
            tolerated_gaps,
        })
    }

    pub fn verify_record(&self, record: &UtilityYearRecord) -> Result<()> {
        let violation = |invariant: &str, details: String| RateCaseError::InvariantViolation {
            utility: record.utility_name.clone(),
            year: record.report_year,
            invariant: invariant.to_string(),
            details,
        };

        let category_sum = record.om.total();
        if !record.om_total.is_finite() || !approx_eq(record.om_total, category_sum, self.tolerance) {
            return Err(violation(
                "om_total_equals_category_sum",
                format!(
                    "om_total {} != sum of categories {} (difference {})",
                    record.om_total,
                    category_sum,
                    (record.om_total - category_sum).abs()
                ),
            ));
        }

        let mut amounts: Vec<(String, Option<f64>)> = CostCategory::ALL
            .iter()
            .map(|c| (format!("om_{}", c), Some(record.om.get(*c))))
            .collect();
        amounts.push(("om_total".to_string(), Some(record.om_total)));
        amounts.push(("rate_base".to_string(), record.rate_base));
        amounts.push(("operating_revenue".to_string(), record.operating_revenue));
        for (class, sales) in [
            ("residential", &record.classes.residential),
            ("commercial", &record.classes.commercial),
            ("industrial", &record.classes.industrial),
            ("total", &record.classes.total),
        ] {
            amounts.push((format!("revenue_{}", class), sales.revenue));
            amounts.push((format!("sales_mwh_{}", class), sales.sales_mwh));
        }

        for (field, value) in amounts {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(violation(
                        "non_negative",
                        format!("{} is {}", field, v),
                    ));
                }
            }
        }

        Ok(())
    }
}

pub fn verify_records(
    expectation: &CoverageExpectation,
    records: &[UtilityYearRecord],
    gaps: &[ReconciliationGap],
) -> Result<ValidationReport> {
    RecordValidator::new(expectation).verify(records, gaps)
}
