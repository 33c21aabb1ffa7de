use crate::error::{RateCaseError, Result};
use crate::schema::{CategoryTotals, CostCategory, RawExpenseLine};
use crate::utils::order_independent_sum;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An inclusive range of integer account prefixes belonging to one functional category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AccountRange {
    pub category: CostCategory,
    #[schemars(description = "First account prefix in the range (inclusive)")]
    pub first: u32,
    #[schemars(description = "Last account prefix in the range (inclusive)")]
    pub last: u32,
}

impl AccountRange {
    pub fn new(category: CostCategory, first: u32, last: u32) -> Self {
        Self {
            category,
            first,
            last,
        }
    }

    pub fn contains(&self, prefix: u32) -> bool {
        (self.first..=self.last).contains(&prefix)
    }

    fn overlaps(&self, other: &AccountRange) -> bool {
        self.first <= other.last && other.first <= self.last
    }
}

/// Partition of expense account codes into functional cost buckets.
///
/// The explicit ranges must not overlap. Anything they do not cover, including codes
/// that cannot be parsed, falls into [`CostCategory::Other`], so classification is total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChartOfAccounts {
    pub ranges: Vec<AccountRange>,
}

impl Default for ChartOfAccounts {
    fn default() -> Self {
        Self::ferc_uniform_system()
    }
}

impl ChartOfAccounts {
    pub fn new(ranges: Vec<AccountRange>) -> Result<Self> {
        let chart = Self { ranges };
        chart.validate()?;
        Ok(chart)
    }

    /// Functional groupings of the FERC Uniform System of Accounts for electric O&M.
    pub fn ferc_uniform_system() -> Self {
        Self {
            ranges: vec![
                AccountRange::new(CostCategory::Production, 500, 557),
                AccountRange::new(CostCategory::Transmission, 560, 574),
                AccountRange::new(CostCategory::Distribution, 580, 598),
                AccountRange::new(CostCategory::CustomerService, 901, 910),
                AccountRange::new(CostCategory::AdminGeneral, 920, 935),
            ],
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (idx, range) in self.ranges.iter().enumerate() {
            if range.first > range.last {
                return Err(RateCaseError::InvalidChart(format!(
                    "Range #{} for {} starts at {} after its end {}",
                    idx, range.category, range.first, range.last
                )));
            }
            if range.category == CostCategory::Other {
                return Err(RateCaseError::InvalidChart(format!(
                    "Range #{} is assigned to 'other', which is reserved for uncovered codes",
                    idx
                )));
            }
            for other in &self.ranges[idx + 1..] {
                if range.overlaps(other) {
                    return Err(RateCaseError::InvalidChart(format!(
                        "{} range {}-{} overlaps {} range {}-{}",
                        range.category,
                        range.first,
                        range.last,
                        other.category,
                        other.first,
                        other.last
                    )));
                }
            }
        }
        Ok(())
    }

    /// Integer prefix of an account code ("920.1" -> 920). `None` for unparsable codes.
    pub fn account_prefix(code: &str) -> Option<u32> {
        let parsed: f64 = code.trim().parse().ok()?;
        if !parsed.is_finite() || parsed < 0.0 || parsed > u32::MAX as f64 {
            return None;
        }
        Some(parsed.trunc() as u32)
    }

    pub fn classify_code(&self, code: &str) -> CostCategory {
        let Some(prefix) = Self::account_prefix(code) else {
            return CostCategory::Other;
        };

        self.ranges
            .iter()
            .find(|r| r.contains(prefix))
            .map(|r| r.category)
            .unwrap_or(CostCategory::Other)
    }

    pub fn classify(&self, line: &RawExpenseLine) -> CostCategory {
        self.classify_code(&line.account_code)
    }

    /// Sums expense lines per (entity, year) and category.
    ///
    /// Amounts are summed in a canonical order, so any permutation of `lines` yields
    /// bit-identical totals.
    pub fn aggregate(&self, lines: &[RawExpenseLine]) -> BTreeMap<(u32, i32), CategoryTotals> {
        let mut buckets: BTreeMap<(u32, i32), BTreeMap<CostCategory, Vec<f64>>> = BTreeMap::new();

        for line in lines {
            let category = self.classify(line);
            buckets
                .entry((line.entity_id, line.report_year))
                .or_default()
                .entry(category)
                .or_default()
                .push(line.amount);
        }

        debug!(
            "Categorized {} expense lines into {} entity-years",
            lines.len(),
            buckets.len()
        );

        buckets
            .into_iter()
            .map(|(key, categories)| {
                let mut totals = CategoryTotals::default();
                for (category, mut amounts) in categories {
                    *totals.get_mut(category) = order_independent_sum(&mut amounts);
                }
                (key, totals)
            })
            .collect()
    }
}
