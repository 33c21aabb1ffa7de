//! CSV renderings of the canonical, revenue requirement and bill impact tables.

use crate::bill_impact::BillImpactRecord;
use crate::error::Result;
use crate::revenue_requirement::RevenueRequirementRecord;
use crate::schema::{ClassSales, CostCategory, Metric, UtilityYearRecord};
use std::io::Write;

/// Field order of [`RevenueRequirementRecord`].
pub const REVENUE_REQUIREMENT_COLUMNS: [&str; 12] = [
    "utility_name",
    "report_year",
    "om_basis",
    "om_total",
    "rate_base",
    "depreciation",
    "return_on_rate_base",
    "taxes",
    "revenue_requirement",
    "actual_revenue",
    "revenue_gap",
    "revenue_gap_pct",
];

/// Field order of [`BillImpactRecord`].
pub const BILL_IMPACT_COLUMNS: [&str; 12] = [
    "utility_name",
    "report_year",
    "scenario_label",
    "residential_share",
    "proposed_revenue_requirement",
    "current_monthly_bill",
    "proposed_monthly_bill",
    "pct_change",
    "annual_change",
    "current_rate_per_kwh",
    "proposed_rate_per_kwh",
    "baseline_monthly_bill",
];

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn canonical_header() -> Vec<String> {
    let mut header: Vec<String> = vec![
        "utility_name".into(),
        "report_year".into(),
        "source_a_id".into(),
        "source_b_id".into(),
    ];
    header.extend(CostCategory::ALL.iter().map(|c| format!("om_{}", c)));
    header.extend(
        [
            "om_total",
            "rate_base",
            "operating_revenue",
            "revenue_total",
            "sales_mwh_total",
            "customers_total",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    for class in ["residential", "commercial", "industrial"] {
        header.push(format!("revenue_{}", class));
        header.push(format!("sales_mwh_{}", class));
        header.push(format!("customers_{}", class));
    }
    header.extend(
        Metric::ALL
            .iter()
            .filter(|m| !matches!(m, Metric::OmTotal | Metric::RateBase))
            .map(|m| m.to_string()),
    );
    header.extend(Metric::ALL.iter().map(|m| format!("yoy_{}", m)));
    header
}

fn class_fields(sales: &ClassSales) -> [String; 3] {
    [
        optional(sales.revenue),
        optional(sales.sales_mwh),
        optional(sales.customers),
    ]
}

fn canonical_row(record: &UtilityYearRecord) -> Vec<String> {
    let mut row = vec![
        record.utility_name.clone(),
        record.report_year.to_string(),
        record.source_a_id.to_string(),
        record.source_b_id.to_string(),
    ];
    row.extend(CostCategory::ALL.iter().map(|c| record.om.get(*c).to_string()));
    row.push(record.om_total.to_string());
    row.push(optional(record.rate_base));
    row.push(optional(record.operating_revenue));
    row.push(optional(record.revenue_total()));
    row.push(optional(record.sales_mwh_total()));
    row.push(optional(record.customers_total()));
    for sales in [
        &record.classes.residential,
        &record.classes.commercial,
        &record.classes.industrial,
    ] {
        row.extend(class_fields(sales));
    }
    row.extend(
        Metric::ALL
            .iter()
            .filter(|m| !matches!(m, Metric::OmTotal | Metric::RateBase))
            .map(|m| optional(record.metric_value(*m))),
    );
    row.extend(
        Metric::ALL
            .iter()
            .map(|m| optional(record.metrics.as_ref().and_then(|d| d.yoy(*m)))),
    );
    row
}

/// One row per utility-year, absent values as empty cells.
pub fn write_canonical_table<W: Write>(writer: W, records: &[UtilityYearRecord]) -> Result<()> {
    let mut ordered: Vec<&UtilityYearRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.key());

    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(canonical_header())?;
    for record in ordered {
        csv_writer.write_record(canonical_row(record))?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Header first, then one serialized row per record. The header is written even when
/// there are no rows.
fn write_serialized<W: Write, T: serde::Serialize>(writer: W, columns: &[&str], rows: &[T]) -> Result<()> {
    let mut csv_writer = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    csv_writer.write_record(columns)?;
    for row in rows {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_revenue_requirement_table<W: Write>(writer: W, rows: &[RevenueRequirementRecord]) -> Result<()> {
    write_serialized(writer, &REVENUE_REQUIREMENT_COLUMNS, rows)
}

pub fn write_bill_impact_table<W: Write>(writer: W, rows: &[BillImpactRecord]) -> Result<()> {
    write_serialized(writer, &BILL_IMPACT_COLUMNS, rows)
}
