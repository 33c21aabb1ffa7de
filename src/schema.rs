use crate::metrics::DerivedMetricSet;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CostCategory {
    #[schemars(description = "Power production O&M, including fuel and purchased power (FERC 500-557)")]
    Production,

    #[schemars(description = "Transmission O&M (FERC 560-574)")]
    Transmission,

    #[schemars(description = "Distribution O&M (FERC 580-598)")]
    Distribution,

    #[schemars(description = "Customer accounts, service and sales expense (FERC 901-910)")]
    CustomerService,

    #[schemars(description = "Administrative and general expense (FERC 920-935)")]
    AdminGeneral,

    #[schemars(description = "Any account code outside the defined functional ranges")]
    Other,
}

impl CostCategory {
    pub const ALL: [CostCategory; 6] = [
        CostCategory::Production,
        CostCategory::Transmission,
        CostCategory::Distribution,
        CostCategory::CustomerService,
        CostCategory::AdminGeneral,
        CostCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CostCategory::Production => "production",
            CostCategory::Transmission => "transmission",
            CostCategory::Distribution => "distribution",
            CostCategory::CustomerService => "customer_service",
            CostCategory::AdminGeneral => "admin_general",
            CostCategory::Other => "other",
        }
    }
}

impl fmt::Display for CostCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One expense row from the source-A (FERC Form 1) operating expense schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawExpenseLine {
    pub entity_id: u32,
    /// Account code as filed, e.g. "500", "920.1"
    pub account_code: String,
    pub amount: f64,
    pub report_year: i32,
}

/// Source-A utility plant summary row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantRecord {
    pub entity_id: u32,
    pub report_year: i32,
    pub utility_plant_in_service: Option<f64>,
    pub accumulated_depreciation: Option<f64>,
}

/// Source-A operating revenue (account 400) row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatingRevenueRecord {
    pub entity_id: u32,
    pub report_year: i32,
    pub operating_revenue: Option<f64>,
}

/// Revenue, energy sales and customer count for one customer class.
///
/// Revenue units depend on context: source rows carry thousand dollars, aggregates
/// and canonical records carry dollars.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClassSales {
    pub revenue: Option<f64>,
    pub sales_mwh: Option<f64>,
    pub customers: Option<u64>,
}

impl ClassSales {
    pub fn with_revenue_scaled(&self, factor: f64) -> Self {
        Self {
            revenue: self.revenue.map(|r| r * factor),
            sales_mwh: self.sales_mwh,
            customers: self.customers,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CustomerClasses {
    pub residential: ClassSales,
    pub commercial: ClassSales,
    pub industrial: ClassSales,
    pub total: ClassSales,
}

/// Source-B (EIA-861 retail sales) row. Revenue is in thousand dollars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesRow {
    pub utility_id: u32,
    pub report_year: i32,
    pub utility_name: String,
    pub state: String,
    pub classes: CustomerClasses,
}

/// Categorized O&M totals for one entity-year.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CategoryTotals {
    pub production: f64,
    pub transmission: f64,
    pub distribution: f64,
    pub customer_service: f64,
    pub admin_general: f64,
    pub other: f64,
}

impl CategoryTotals {
    pub fn get(&self, category: CostCategory) -> f64 {
        match category {
            CostCategory::Production => self.production,
            CostCategory::Transmission => self.transmission,
            CostCategory::Distribution => self.distribution,
            CostCategory::CustomerService => self.customer_service,
            CostCategory::AdminGeneral => self.admin_general,
            CostCategory::Other => self.other,
        }
    }

    pub fn get_mut(&mut self, category: CostCategory) -> &mut f64 {
        match category {
            CostCategory::Production => &mut self.production,
            CostCategory::Transmission => &mut self.transmission,
            CostCategory::Distribution => &mut self.distribution,
            CostCategory::CustomerService => &mut self.customer_service,
            CostCategory::AdminGeneral => &mut self.admin_general,
            CostCategory::Other => &mut self.other,
        }
    }

    pub fn total(&self) -> f64 {
        CostCategory::ALL.iter().map(|c| self.get(*c)).sum()
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            production: self.production * factor,
            transmission: self.transmission * factor,
            distribution: self.distribution * factor,
            customer_service: self.customer_service * factor,
            admin_general: self.admin_general * factor,
            other: self.other * factor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAAggregate {
    pub entity_id: u32,
    pub report_year: i32,
    pub om: CategoryTotals,
    pub rate_base: Option<f64>,
    pub operating_revenue: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceBAggregate {
    pub source_b_id: u32,
    pub report_year: i32,
    /// Revenue in dollars
    pub classes: CustomerClasses,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub struct RecordKey {
    pub utility_name: String,
    pub report_year: i32,
}

impl RecordKey {
    pub fn new(utility_name: impl Into<String>, report_year: i32) -> Self {
        Self {
            utility_name: utility_name.into(),
            report_year,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.utility_name, self.report_year)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[schemars(description = "Total O&M expense across all six categories")]
    OmTotal,

    #[schemars(description = "GRC-comparable O&M: distribution + customer service + allocated A&G")]
    GrcOm,

    #[schemars(description = "Net utility plant (plant in service less accumulated depreciation)")]
    RateBase,

    OmPerCustomer,
    GrcOmPerCustomer,
    OmPerMwh,
    RateBasePerCustomer,
    RevenuePerCustomer,
}

impl Metric {
    pub const ALL: [Metric; 8] = [
        Metric::OmTotal,
        Metric::GrcOm,
        Metric::RateBase,
        Metric::OmPerCustomer,
        Metric::GrcOmPerCustomer,
        Metric::OmPerMwh,
        Metric::RateBasePerCustomer,
        Metric::RevenuePerCustomer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::OmTotal => "om_total",
            Metric::GrcOm => "grc_om",
            Metric::RateBase => "rate_base",
            Metric::OmPerCustomer => "om_per_customer",
            Metric::GrcOmPerCustomer => "grc_om_per_customer",
            Metric::OmPerMwh => "om_per_mwh",
            Metric::RateBasePerCustomer => "rate_base_per_customer",
            Metric::RevenuePerCustomer => "revenue_per_customer",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The canonical reconciled record: one per (utility, report year).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UtilityYearRecord {
    pub utility_name: String,
    pub report_year: i32,

    #[schemars(description = "Source-A (FERC respondent) identifier")]
    pub source_a_id: u32,

    #[schemars(description = "Source-B (EIA utility number) identifier")]
    pub source_b_id: u32,

    pub om: CategoryTotals,

    #[schemars(description = "Sum of the six O&M category fields")]
    pub om_total: f64,

    #[schemars(description = "Absent when the plant schedule is missing for this utility-year")]
    pub rate_base: Option<f64>,

    #[schemars(description = "Source-A operating revenue (account 400), in dollars")]
    pub operating_revenue: Option<f64>,

    #[schemars(description = "Source-B revenue (dollars), MWh and customers by class")]
    pub classes: CustomerClasses,

    #[schemars(description = "Ratio and year-over-year fields; absent until metrics are derived")]
    pub metrics: Option<DerivedMetricSet>,
}

impl UtilityYearRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.utility_name.clone(), self.report_year)
    }

    pub fn sales_mwh_total(&self) -> Option<f64> {
        self.classes.total.sales_mwh
    }

    pub fn customers_total(&self) -> Option<u64> {
        self.classes.total.customers
    }

    pub fn revenue_total(&self) -> Option<f64> {
        self.classes.total.revenue
    }

    /// Residential share of retail revenue, from the source-B class breakdown.
    pub fn residential_revenue_share(&self) -> Option<f64> {
        let residential = self.classes.residential.revenue?;
        let total = self.classes.total.revenue?;
        crate::utils::ratio(residential, total)
    }

    /// Value of a metric for this record. Ratio metrics are absent until derived.
    pub fn metric_value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::OmTotal => Some(self.om_total),
            Metric::RateBase => self.rate_base,
            _ => self.metrics.as_ref().and_then(|m| m.value(metric)),
        }
    }
}
