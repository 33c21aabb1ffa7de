//! Turns raw source rows into per-entity-year aggregates ready for reconciliation.
//!
//! Reading the source files is left to the caller; this module only shapes rows that
//! have already been extracted.

use crate::chart_of_accounts::ChartOfAccounts;
use crate::reconciliation::IdentifierCrosswalk;
use crate::schema::{
    ClassSales, CustomerClasses, OperatingRevenueRecord, PlantRecord, RawExpenseLine, SalesRow,
    SourceAAggregate, SourceBAggregate,
};
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};

/// Source-B revenue is reported in thousand dollars.
pub const SOURCE_B_REVENUE_SCALE: f64 = 1000.0;

fn add_present<T: std::ops::Add<Output = T>>(a: Option<T>, b: Option<T>) -> Option<T> {
    Some(a? + b?)
}

fn merge_class(a: &ClassSales, b: &ClassSales) -> ClassSales {
    ClassSales {
        revenue: add_present(a.revenue, b.revenue),
        sales_mwh: add_present(a.sales_mwh, b.sales_mwh),
        customers: add_present(a.customers, b.customers),
    }
}

fn merge_classes(a: &CustomerClasses, b: &CustomerClasses) -> CustomerClasses {
    CustomerClasses {
        residential: merge_class(&a.residential, &b.residential),
        commercial: merge_class(&a.commercial, &b.commercial),
        industrial: merge_class(&a.industrial, &b.industrial),
        total: merge_class(&a.total, &b.total),
    }
}

/// Rate base per (entity, year): plant in service less accumulated depreciation.
///
/// Duplicate rows for the same entity-year are summed. A missing component leaves the
/// rate base absent.
pub fn rate_base_by_entity_year(plant: &[PlantRecord]) -> BTreeMap<(u32, i32), Option<f64>> {
    let mut components: BTreeMap<(u32, i32), (Option<f64>, Option<f64>)> = BTreeMap::new();
    for row in plant {
        components
            .entry((row.entity_id, row.report_year))
            .and_modify(|(in_service, accumulated)| {
                *in_service = add_present(*in_service, row.utility_plant_in_service);
                *accumulated = add_present(*accumulated, row.accumulated_depreciation);
            })
            .or_insert((row.utility_plant_in_service, row.accumulated_depreciation));
    }

    components
        .into_iter()
        .map(|(key, (in_service, accumulated))| {
            let rate_base = in_service.zip(accumulated).map(|(p, d)| p - d);
            if rate_base.is_none() {
                debug!("Plant components incomplete for entity {} in {}", key.0, key.1);
            }
            (key, rate_base)
        })
        .collect()
}

fn operating_revenue_by_entity_year(rows: &[OperatingRevenueRecord]) -> BTreeMap<(u32, i32), Option<f64>> {
    let mut totals: BTreeMap<(u32, i32), Option<f64>> = BTreeMap::new();
    for row in rows {
        totals
            .entry((row.entity_id, row.report_year))
            .and_modify(|total| *total = add_present(*total, row.operating_revenue))
            .or_insert(row.operating_revenue);
    }
    totals
}

/// Builds one source-A aggregate per entity-year that filed expense lines.
pub fn build_source_a(
    chart: &ChartOfAccounts,
    expenses: &[RawExpenseLine],
    plant: &[PlantRecord],
    revenue: &[OperatingRevenueRecord],
) -> Vec<SourceAAggregate> {
    let om = chart.aggregate(expenses);
    let rate_base = rate_base_by_entity_year(plant);
    let operating_revenue = operating_revenue_by_entity_year(revenue);

    let orphaned: BTreeSet<&(u32, i32)> = rate_base.keys().filter(|k| !om.contains_key(*k)).collect();
    for (entity_id, year) in orphaned {
        debug!(
            "Plant data for entity {} in {} has no expense lines; ignored",
            entity_id, year
        );
    }

    let aggregates: Vec<SourceAAggregate> = om
        .into_iter()
        .map(|((entity_id, report_year), om)| SourceAAggregate {
            entity_id,
            report_year,
            om,
            rate_base: rate_base.get(&(entity_id, report_year)).copied().flatten(),
            operating_revenue: operating_revenue
                .get(&(entity_id, report_year))
                .copied()
                .flatten(),
        })
        .collect();

    info!(
        "Built {} source-A aggregates from {} expense lines",
        aggregates.len(),
        expenses.len()
    );
    aggregates
}

/// Filters sales rows to the target state and crosswalk utilities, sums duplicate
/// rows per (utility, year), and converts revenue to dollars.
pub fn build_source_b(crosswalk: &IdentifierCrosswalk, rows: &[SalesRow], target_state: &str) -> Vec<SourceBAggregate> {
    let wanted = crosswalk.source_b_ids();
    let mut merged: BTreeMap<(u32, i32), CustomerClasses> = BTreeMap::new();
    let mut kept = 0usize;

    for row in rows {
        if !row.state.trim().eq_ignore_ascii_case(target_state.trim()) || !wanted.contains(&row.utility_id) {
            continue;
        }
        kept += 1;
        merged
            .entry((row.utility_id, row.report_year))
            .and_modify(|classes| *classes = merge_classes(classes, &row.classes))
            .or_insert_with(|| row.classes.clone());
    }

    let aggregates: Vec<SourceBAggregate> = merged
        .into_iter()
        .map(|((source_b_id, report_year), classes)| SourceBAggregate {
            source_b_id,
            report_year,
            classes: CustomerClasses {
                residential: classes.residential.with_revenue_scaled(SOURCE_B_REVENUE_SCALE),
                commercial: classes.commercial.with_revenue_scaled(SOURCE_B_REVENUE_SCALE),
                industrial: classes.industrial.with_revenue_scaled(SOURCE_B_REVENUE_SCALE),
                total: classes.total.with_revenue_scaled(SOURCE_B_REVENUE_SCALE),
            },
        })
        .collect();

    info!(
        "Built {} source-B aggregates from {} of {} sales rows",
        aggregates.len(),
        kept,
        rows.len()
    );
    aggregates
}
