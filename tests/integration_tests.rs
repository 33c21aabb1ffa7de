use rate_case_analysis::export::{write_bill_impact_table, write_canonical_table, write_revenue_requirement_table};
use rate_case_analysis::*;
use std::fs::File;

const UTILITIES: [(u32, u32, &str); 3] = [(183, 14328, "PG&E"), (155, 17609, "SCE"), (218, 16609, "SDG&E")];

fn expense(entity_id: u32, code: &str, amount: f64, year: i32) -> RawExpenseLine {
    RawExpenseLine {
        entity_id,
        account_code: code.to_string(),
        amount,
        report_year: year,
    }
}

fn class(revenue_k: f64, sales_mwh: f64, customers: u64) -> ClassSales {
    ClassSales {
        revenue: Some(revenue_k),
        sales_mwh: Some(sales_mwh),
        customers: Some(customers),
    }
}

/// Three California IOUs over 2018-2023, shaped loosely on their filed magnitudes.
fn california_inputs() -> SourceInputs {
    let mut expense_lines = Vec::new();
    let mut plant = Vec::new();
    let mut sales = Vec::new();

    for (u, (source_a_id, source_b_id, name)) in UTILITIES.iter().enumerate() {
        let size = (3 - u) as f64;
        for (i, year) in (2018..=2023).enumerate() {
            let growth = 1.0 + 0.04 * i as f64 + 0.003 * ((i * (u + 2)) % 5) as f64;
            expense_lines.push(expense(*source_a_id, "501", 1.2e9 * size * growth, year));
            expense_lines.push(expense(*source_a_id, "555", 0.8e9 * size * growth, year));
            expense_lines.push(expense(*source_a_id, "566", 0.3e9 * size * growth, year));
            expense_lines.push(expense(*source_a_id, "593", 0.9e9 * size * growth * growth, year));
            expense_lines.push(expense(*source_a_id, "903", 0.25e9 * size, year));
            expense_lines.push(expense(*source_a_id, "920.1", 0.6e9 * size * growth, year));
            expense_lines.push(expense(*source_a_id, "912", 0.05e9 * size, year));

            plant.push(PlantRecord {
                entity_id: *source_a_id,
                report_year: year,
                utility_plant_in_service: Some(30.0e9 * size + 2.5e9 * (i * i) as f64 / size),
                accumulated_depreciation: Some(10.0e9 * size + 0.4e9 * i as f64),
            });

            let customers = 1_500_000 * (3 - u as u64) + 12_000 * i as u64 + 5_000 * ((i + u) % 3) as u64;
            let residential_customers = customers * 88 / 100;
            let mwh = 25.0e6 * size + 0.6e6 * ((3 * i + u) % 4) as f64;
            let total_revenue_k = 6.0e6 * size * growth;
            sales.push(SalesRow {
                utility_id: *source_b_id,
                report_year: year,
                utility_name: format!("{} (retail)", name),
                state: "CA".to_string(),
                classes: CustomerClasses {
                    residential: class(total_revenue_k * 0.4, mwh * 0.35, residential_customers),
                    commercial: class(total_revenue_k * 0.45, mwh * 0.45, customers - residential_customers - 1_000),
                    industrial: class(total_revenue_k * 0.15, mwh * 0.2, 1_000),
                    total: class(total_revenue_k, mwh, customers),
                },
            });
        }
    }

    // Unrelated rows that must be filtered or tolerated
    sales.push(SalesRow {
        utility_id: 99999,
        report_year: 2023,
        utility_name: "Municipal Light".to_string(),
        state: "CA".to_string(),
        classes: CustomerClasses::default(),
    });
    sales.push(SalesRow {
        utility_id: 17609,
        report_year: 2023,
        utility_name: "Southern California Edison Co".to_string(),
        state: "NV".to_string(),
        classes: CustomerClasses {
            total: class(10.0, 10.0, 10),
            ..Default::default()
        },
    });

    SourceInputs {
        expense_lines: Some(expense_lines),
        plant: Some(plant),
        operating_revenue: Vec::new(),
        sales: Some(sales),
    }
}

#[test]
fn test_full_pipeline_three_utilities() {
    let output = RateCaseProcessor::run(&california_inputs(), &AnalysisConfig::default()).unwrap();

    assert_eq!(output.records.len(), 18);
    assert_eq!(output.validation.records_checked, 18);
    assert_eq!(output.validation.expected_records, 18);
    assert!(output.validation.tolerated_gaps.is_empty());

    for record in &output.records {
        let category_sum: f64 = CostCategory::ALL.iter().map(|c| record.om.get(*c)).sum();
        assert!((record.om_total - category_sum).abs() <= 1e-6 * category_sum);
        assert!(record.om.other > 0.0);
        assert!(record.rate_base.is_some());
        assert!(record.metrics.is_some());
    }

    // The NV row for SCE must not leak into the CA figures
    let sce_2023 = output
        .records
        .iter()
        .find(|r| r.utility_name == "SCE" && r.report_year == 2023)
        .unwrap();
    assert_eq!(sce_2023.customers_total(), Some(3_060_000));

    let report = &output.report;
    assert_eq!(report.trends.len(), 3);
    assert!(report.trends.values().all(|t| t.is_computed()));
    assert!(report.regression.is_computed());
    assert_eq!(report.regression.value().unwrap().sample_size, 18);
    // customers and sales both track utility size
    let regression = report.regression.value().unwrap();
    assert!(regression.high_vif_predictors.contains(&"customers_total".to_string()));
    assert_eq!(regression.inference.len(), 3);
    assert!(regression.intercept_inference.p_value.is_some());
    assert_eq!(report.outliers.len(), 3 + 6);
    assert_eq!(report.benchmark_year, Some(2023));
    assert_eq!(report.benchmark.value().unwrap().ranks.len(), 3);

    assert_eq!(output.revenue_requirements.rows.len(), 18);
    assert!(output.revenue_requirements.skipped.is_empty());
    assert_eq!(output.base_year, Some(2023));
    assert_eq!(output.forecasts.len(), 3);
    assert_eq!(output.bill_impacts.rows.len(), 3 * 9);
    assert_eq!(output.scenario_impacts.rows.len(), 3 * 7);
}

#[test]
fn test_unresolved_entity_leaves_other_records_intact() {
    let config = AnalysisConfig {
        crosswalk: vec![CrosswalkEntry::new(183, 14328, "PG&E"), CrosswalkEntry::new(155, 17609, "SCE")],
        coverage: CoverageExpectation {
            utilities: vec!["PG&E".to_string(), "SCE".to_string()],
            years: (2018..=2023).collect(),
        },
        ..AnalysisConfig::default()
    };

    let outcome = RateCaseProcessor::reconcile(&california_inputs(), &config).unwrap();
    assert_eq!(outcome.records.len(), 12);
    let unresolved: Vec<&ReconciliationGap> = outcome
        .gaps
        .iter()
        .filter(|g| matches!(g, ReconciliationGap::UnresolvedEntity { source_a_id: 218, .. }))
        .collect();
    assert_eq!(unresolved.len(), 6);
    assert_eq!(outcome.gaps.len(), 6);

    let output = RateCaseProcessor::run(&california_inputs(), &config).unwrap();
    assert_eq!(output.records.len(), 12);
    assert_eq!(output.validation.tolerated_gaps.len(), 6);
    assert!(output.records.iter().all(|r| r.utility_name != "SDG&E"));
}

#[test]
fn test_missing_counterpart_is_a_coverage_shortfall() {
    let mut inputs = california_inputs();
    if let Some(sales) = inputs.sales.as_mut() {
        sales.retain(|s| !(s.utility_id == 17609 && s.report_year == 2020));
    }

    let outcome = RateCaseProcessor::reconcile(&inputs, &AnalysisConfig::default()).unwrap();
    assert_eq!(outcome.records.len(), 17);
    assert_eq!(
        outcome.gaps,
        vec![ReconciliationGap::MissingSourceB {
            utility_name: "SCE".to_string(),
            source_b_id: 17609,
            report_year: 2020,
        }]
    );

    match RateCaseProcessor::run(&inputs, &AnalysisConfig::default()) {
        Err(RateCaseError::CoverageShortfall {
            expected,
            actual,
            missing,
        }) => {
            assert_eq!(expected, 18);
            assert_eq!(actual, 17);
            assert_eq!(missing.len(), 1);
            assert!(missing[0].starts_with("SCE 2020"));
        }
        other => panic!("expected coverage shortfall, got {:?}", other.map(|o| o.records.len())),
    }
}

#[test]
fn test_missing_source_is_fatal() {
    let mut inputs = california_inputs();
    inputs.sales = None;
    assert!(matches!(
        run_rate_case_analysis(&inputs, &AnalysisConfig::default()),
        Err(RateCaseError::MissingSource { .. })
    ));
}

#[test]
fn test_sensitivity_grid_produces_k_to_the_p_scenarios() {
    let mut config = AnalysisConfig::default();
    config.sensitivity = SensitivityGrid::new(vec![
        SensitivityAxis::new(AssumptionParameter::Wacc, vec![0.07, 0.08]),
        SensitivityAxis::new(AssumptionParameter::TaxRate, vec![0.21, 0.27]),
        SensitivityAxis::new(AssumptionParameter::OmEscalation, vec![0.0, 0.05]),
    ])
    .unwrap();

    let output = RateCaseProcessor::run(&california_inputs(), &config).unwrap();
    assert_eq!(config.sensitivity.scenario_count(), 8);
    assert_eq!(output.bill_impacts.rows.len(), 3 * 8);

    let labels: std::collections::BTreeSet<&str> = output
        .bill_impacts
        .rows
        .iter()
        .map(|r| r.scenario_label.as_str())
        .collect();
    assert_eq!(labels.len(), 8);

    // Higher WACC with everything else fixed always raises the proposed bill
    for utility in ["PG&E", "SCE", "SDG&E"] {
        let bill = |wacc: &str| {
            output
                .bill_impacts
                .rows
                .iter()
                .find(|r| {
                    r.utility_name == utility
                        && r.scenario_label.contains(wacc)
                        && r.scenario_label.contains("tax_rate=0.27")
                        && r.scenario_label.contains("om_escalation=0.05")
                })
                .map(|r| r.proposed_monthly_bill)
                .unwrap()
        };
        assert!(bill("wacc=0.08") > bill("wacc=0.07"));
    }

    // Same inputs, same table
    let again = RateCaseProcessor::run(&california_inputs(), &config).unwrap();
    assert_eq!(output.bill_impacts, again.bill_impacts);
}

#[test]
fn test_report_is_independent_of_input_order() {
    let config = AnalysisConfig::default();
    let forward = RateCaseProcessor::run(&california_inputs(), &config).unwrap();

    let mut reversed = california_inputs();
    if let Some(rows) = reversed.expense_lines.as_mut() {
        rows.reverse();
    }
    if let Some(rows) = reversed.plant.as_mut() {
        rows.reverse();
    }
    if let Some(rows) = reversed.sales.as_mut() {
        rows.reverse();
    }
    let backward = RateCaseProcessor::run(&reversed, &config).unwrap();

    assert_eq!(forward.records, backward.records);
    assert_eq!(forward.report.to_json().unwrap(), backward.report.to_json().unwrap());
    assert_eq!(forward.revenue_requirements, backward.revenue_requirements);
}

#[test]
fn test_grc_comparable_basis_lowers_revenue_requirement() {
    let mut config = AnalysisConfig::default();
    let total = RateCaseProcessor::run(&california_inputs(), &config).unwrap();

    config.assumptions = AssumptionSet::grc_comparable();
    let grc = RateCaseProcessor::run(&california_inputs(), &config).unwrap();

    for (a, b) in total.revenue_requirements.rows.iter().zip(&grc.revenue_requirements.rows) {
        assert_eq!(a.key(), b.key());
        assert!(b.om_total < a.om_total);
        assert!(b.revenue_requirement < a.revenue_requirement);
        assert!(a.revenue_gap.is_some());
    }
}

#[test]
fn test_toml_config_drives_pipeline() {
    let config = AnalysisConfig::from_toml_str(
        r#"
        outlier_z_threshold = 1.5
        benchmark_metric = "rate_base_per_customer"
        base_year = 2021

        [assumptions]
        wacc = 0.08

        [coverage]
        utilities = ["PG&E", "SCE", "SDG&E"]
        years = [2018, 2019, 2020, 2021, 2022, 2023]
        "#,
    )
    .unwrap();

    let output = RateCaseProcessor::run(&california_inputs(), &config).unwrap();
    assert_eq!(output.base_year, Some(2021));
    assert!(output.bill_impacts.rows.iter().all(|r| r.report_year == 2021));
    assert_eq!(output.report.benchmark.value().unwrap().metric, Metric::RateBasePerCustomer);
    assert!(output
        .report
        .outliers
        .values()
        .filter_map(|o| o.value())
        .all(|r| r.threshold == 1.5));
}

#[test]
fn test_csv_exports() -> anyhow::Result<()> {
    let output = RateCaseProcessor::run(&california_inputs(), &AnalysisConfig::default())?;

    let mut canonical = Vec::new();
    write_canonical_table(&mut canonical, &output.records)?;
    let canonical = String::from_utf8(canonical)?;
    assert_eq!(canonical.lines().count(), 19);
    assert!(canonical.lines().nth(1).unwrap_or_default().starts_with("PG&E,2018,183,14328"));

    let mut revenue = Vec::new();
    write_revenue_requirement_table(&mut revenue, &output.revenue_requirements.rows)?;
    assert_eq!(String::from_utf8(revenue)?.lines().count(), 19);

    let path = std::env::temp_dir().join(format!("rate_case_bill_impacts_{}_csv_exports.csv", std::process::id()));
    write_bill_impact_table(File::create(&path)?, &output.bill_impacts.rows)?;
    let written = std::fs::read_to_string(&path)?;
    assert_eq!(written.lines().count(), 1 + 27);
    assert!(written.starts_with("utility_name,report_year,scenario_label"));
    std::fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn test_schema_generation() {
    let schema = AnalysisConfig::schema_as_json().unwrap();
    assert!(schema.contains("sensitivity"));
    assert!(schema.contains("crosswalk"));
}
