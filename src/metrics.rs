//! Ratio and year-over-year indicators derived from reconciled records.
//!
//! Every derived field is an `Option`: a zero or absent denominator, or a missing
//! prior-year record, leaves the field absent instead of producing zero or infinity.

use crate::schema::{Metric, RecordKey, UtilityYearRecord};
use crate::utils::{fractional_change, ratio};
use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_AG_ELECTRIC_ALLOCATION: f64 = 0.70;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DerivedMetricSet {
    #[schemars(description = "Distribution + customer service + allocated share of A&G")]
    pub grc_om: f64,
    pub om_per_customer: Option<f64>,
    pub grc_om_per_customer: Option<f64>,
    pub om_per_mwh: Option<f64>,
    pub rate_base_per_customer: Option<f64>,
    pub revenue_per_customer: Option<f64>,

    #[schemars(
        description = "Fractional change from the same utility's prior-year record, one entry per metric; null when not computable"
    )]
    pub yoy_change: BTreeMap<Metric, Option<f64>>,
}

impl DerivedMetricSet {
    /// Value of a derived metric. Base metrics (`OmTotal`, `RateBase`) live on the record.
    pub fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::GrcOm => Some(self.grc_om),
            Metric::OmPerCustomer => self.om_per_customer,
            Metric::GrcOmPerCustomer => self.grc_om_per_customer,
            Metric::OmPerMwh => self.om_per_mwh,
            Metric::RateBasePerCustomer => self.rate_base_per_customer,
            Metric::RevenuePerCustomer => self.revenue_per_customer,
            Metric::OmTotal | Metric::RateBase => None,
        }
    }

    pub fn yoy(&self, metric: Metric) -> Option<f64> {
        self.yoy_change.get(&metric).copied().flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct YoyRow {
    pub utility_name: String,
    pub report_year: i32,
    pub value: Option<f64>,
    pub yoy_change: Option<f64>,
}

pub struct MetricsCalculator {
    ag_electric_allocation: f64,
}

impl Default for MetricsCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_AG_ELECTRIC_ALLOCATION)
    }
}

impl MetricsCalculator {
    pub fn new(ag_electric_allocation: f64) -> Self {
        Self {
            ag_electric_allocation,
        }
    }

    /// Ratio metrics for a single record, without year-over-year fields.
    pub fn compute_ratios(&self, record: &UtilityYearRecord) -> DerivedMetricSet {
        let customers = record.customers_total().map(|c| c as f64);
        let per_customer = |numerator: Option<f64>| -> Option<f64> {
            ratio(numerator?, customers?)
        };

        let grc_om = record.om.distribution
            + record.om.customer_service
            + record.om.admin_general * self.ag_electric_allocation;

        DerivedMetricSet {
            grc_om,
            om_per_customer: per_customer(Some(record.om_total)),
            grc_om_per_customer: per_customer(Some(grc_om)),
            om_per_mwh: record
                .sales_mwh_total()
                .and_then(|mwh| ratio(record.om_total, mwh)),
            rate_base_per_customer: per_customer(record.rate_base),
            revenue_per_customer: per_customer(record.revenue_total()),
            yoy_change: BTreeMap::new(),
        }
    }

    /// Attaches derived metrics to every record in place.
    ///
    /// Year-over-year changes look up the (utility, year - 1) record by key, so the
    /// result does not depend on the order of `records`.
    pub fn derive(&self, records: &mut [UtilityYearRecord]) {
        for record in records.iter_mut() {
            record.metrics = Some(self.compute_ratios(record));
        }

        let snapshot: BTreeMap<RecordKey, BTreeMap<Metric, Option<f64>>> = records
            .iter()
            .map(|r| {
                let values = Metric::ALL.iter().map(|m| (*m, r.metric_value(*m))).collect();
                (r.key(), values)
            })
            .collect();

        for record in records.iter_mut() {
            let prior_key = RecordKey::new(record.utility_name.clone(), record.report_year - 1);
            let prior = snapshot.get(&prior_key);
            if prior.is_none() {
                debug!("No prior-year record for {}", record.key());
            }

            let yoy_change: BTreeMap<Metric, Option<f64>> = Metric::ALL
                .iter()
                .map(|m| {
                    let change = prior
                        .and_then(|p| p.get(m).copied().flatten())
                        .zip(record.metric_value(*m))
                        .and_then(|(previous, current)| fractional_change(previous, current));
                    (*m, change)
                })
                .collect();

            if let Some(metrics) = record.metrics.as_mut() {
                metrics.yoy_change = yoy_change;
            }
        }

        info!("Derived metrics for {} utility-year records", records.len());
    }

    /// Year-over-year table for one metric, ordered by utility then year.
    pub fn yoy_table(records: &[UtilityYearRecord], metric: Metric) -> Vec<YoyRow> {
        let mut rows: Vec<YoyRow> = records
            .iter()
            .map(|r| YoyRow {
                utility_name: r.utility_name.clone(),
                report_year: r.report_year,
                value: r.metric_value(metric),
                yoy_change: r.metrics.as_ref().and_then(|m| m.yoy(metric)),
            })
            .collect();
        rows.sort_by(|a, b| {
            a.utility_name
                .cmp(&b.utility_name)
                .then(a.report_year.cmp(&b.report_year))
        });
        rows
    }
}

pub fn derive_metrics(records: &mut [UtilityYearRecord], ag_electric_allocation: f64) {
    MetricsCalculator::new(ag_electric_allocation).derive(records)
}
