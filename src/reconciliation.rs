use crate::error::{RateCaseError, Result};
use crate::schema::{RecordKey, SourceAAggregate, SourceBAggregate, UtilityYearRecord};
use log::{debug, info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Maps one source-A entity to its source-B counterpart and canonical name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CrosswalkEntry {
    #[schemars(description = "FERC Form 1 respondent id")]
    pub source_a_id: u32,
    #[schemars(description = "EIA utility number")]
    pub source_b_id: u32,
    #[schemars(description = "Canonical utility name used as the record key")]
    pub utility_name: String,
}

impl CrosswalkEntry {
    pub fn new(source_a_id: u32, source_b_id: u32, utility_name: impl Into<String>) -> Self {
        Self {
            source_a_id,
            source_b_id,
            utility_name: utility_name.into(),
        }
    }
}

/// Outcome of looking up a source-A key in the crosswalk.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<'a> {
    Found(&'a CrosswalkEntry),
    NotFound { source_a_id: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentifierCrosswalk {
    by_source_a: BTreeMap<u32, CrosswalkEntry>,
    by_source_b: BTreeMap<u32, u32>,
}

impl IdentifierCrosswalk {
    pub fn new(entries: Vec<CrosswalkEntry>) -> Result<Self> {
        let mut by_source_a = BTreeMap::new();
        let mut by_source_b = BTreeMap::new();
        let mut names = BTreeSet::new();

        for entry in entries {
            if !names.insert(entry.utility_name.clone()) {
                return Err(RateCaseError::InvalidCrosswalk(format!(
                    "utility name '{}' appears more than once",
                    entry.utility_name
                )));
            }
            if by_source_b.insert(entry.source_b_id, entry.source_a_id).is_some() {
                return Err(RateCaseError::InvalidCrosswalk(format!(
                    "source-B id {} appears more than once",
                    entry.source_b_id
                )));
            }
            let source_a_id = entry.source_a_id;
            if by_source_a.insert(source_a_id, entry).is_some() {
                return Err(RateCaseError::InvalidCrosswalk(format!(
                    "source-A id {} appears more than once",
                    source_a_id
                )));
            }
        }

        Ok(Self {
            by_source_a,
            by_source_b,
        })
    }

    /// The three California investor-owned utilities.
    pub fn california_ious() -> Vec<CrosswalkEntry> {
        vec![
            CrosswalkEntry::new(183, 14328, "PG&E"),
            CrosswalkEntry::new(155, 17609, "SCE"),
            CrosswalkEntry::new(218, 16609, "SDG&E"),
        ]
    }

    pub fn resolve(&self, source_a_id: u32) -> Resolution<'_> {
        match self.by_source_a.get(&source_a_id) {
            Some(entry) => Resolution::Found(entry),
            None => Resolution::NotFound { source_a_id },
        }
    }

    pub fn by_source_b(&self, source_b_id: u32) -> Option<&CrosswalkEntry> {
        self.by_source_b
            .get(&source_b_id)
            .and_then(|a| self.by_source_a.get(a))
    }

    pub fn source_b_ids(&self) -> BTreeSet<u32> {
        self.by_source_b.keys().copied().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &CrosswalkEntry> {
        self.by_source_a.values()
    }

    pub fn len(&self) -> usize {
        self.by_source_a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_source_a.is_empty()
    }
}

/// A utility-year that could not be reconciled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconciliationGap {
    /// Source-A entity has no crosswalk entry
    UnresolvedEntity { source_a_id: u32, report_year: i32 },
    /// Resolved source-A row has no source-B row for the same year
    MissingSourceB {
        utility_name: String,
        source_b_id: u32,
        report_year: i32,
    },
    /// Crosswalked source-B row has no source-A row for the same year
    MissingSourceA {
        utility_name: String,
        source_a_id: u32,
        report_year: i32,
    },
}

impl ReconciliationGap {
    /// Canonical key the gap would have produced, when the entity is known.
    pub fn key(&self) -> Option<RecordKey> {
        match self {
            ReconciliationGap::UnresolvedEntity { .. } => None,
            ReconciliationGap::MissingSourceB {
                utility_name,
                report_year,
                ..
            }
            | ReconciliationGap::MissingSourceA {
                utility_name,
                report_year,
                ..
            } => Some(RecordKey::new(utility_name.clone(), *report_year)),
        }
    }
}

impl fmt::Display for ReconciliationGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconciliationGap::UnresolvedEntity {
                source_a_id,
                report_year,
            } => write!(
                f,
                "source-A entity {} ({}) has no crosswalk entry",
                source_a_id, report_year
            ),
            ReconciliationGap::MissingSourceB {
                utility_name,
                source_b_id,
                report_year,
            } => write!(
                f,
                "{} ({}) has no source-B row for id {}",
                utility_name, report_year, source_b_id
            ),
            ReconciliationGap::MissingSourceA {
                utility_name,
                source_a_id,
                report_year,
            } => write!(
                f,
                "{} ({}) has no source-A row for id {}",
                utility_name, report_year, source_a_id
            ),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconciliationOutcome {
    /// Sorted by (utility_name, report_year)
    pub records: Vec<UtilityYearRecord>,
    pub gaps: Vec<ReconciliationGap>,
}

impl ReconciliationOutcome {
    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty()
    }

    pub fn record(&self, key: &RecordKey) -> Option<&UtilityYearRecord> {
        self.records
            .iter()
            .find(|r| r.utility_name == key.utility_name && r.report_year == key.report_year)
    }
}

pub struct Reconciler<'a> {
    crosswalk: &'a IdentifierCrosswalk,
}

impl<'a> Reconciler<'a> {
    pub fn new(crosswalk: &'a IdentifierCrosswalk) -> Self {
        Self { crosswalk }
    }

    /// Joins source-A and source-B aggregates into canonical records.
    ///
    /// Unresolvable or one-sided entity-years are returned as gaps and never produce a
    /// partially populated record. Duplicate keys on either side are fatal.
    pub fn reconcile(
        &self,
        source_a: &[SourceAAggregate],
        source_b: &[SourceBAggregate],
    ) -> Result<ReconciliationOutcome> {
        let a_index = self.index_source_a(source_a)?;
        let b_index = self.index_source_b(source_b)?;

        let mut records = Vec::new();
        let mut gaps = Vec::new();

        for (&(source_a_id, report_year), aggregate) in &a_index {
            let entry = match self.crosswalk.resolve(source_a_id) {
                Resolution::Found(entry) => entry,
                Resolution::NotFound { source_a_id } => {
                    warn!(
                        "No crosswalk entry for source-A entity {} ({})",
                        source_a_id, report_year
                    );
                    gaps.push(ReconciliationGap::UnresolvedEntity {
                        source_a_id,
                        report_year,
                    });
                    continue;
                }
            };

            match b_index.get(&(entry.source_b_id, report_year)) {
                Some(counterpart) => records.push(self.build_record(entry, aggregate, counterpart)),
                None => {
                    warn!(
                        "{} ({}) has no source-B counterpart (id {})",
                        entry.utility_name, report_year, entry.source_b_id
                    );
                    gaps.push(ReconciliationGap::MissingSourceB {
                        utility_name: entry.utility_name.clone(),
                        source_b_id: entry.source_b_id,
                        report_year,
                    });
                }
            }
        }

        for &(source_b_id, report_year) in b_index.keys() {
            let Some(entry) = self.crosswalk.by_source_b(source_b_id) else {
                debug!(
                    "Ignoring source-B id {} ({}): not in crosswalk",
                    source_b_id, report_year
                );
                continue;
            };
            if !a_index.contains_key(&(entry.source_a_id, report_year)) {
                warn!(
                    "{} ({}) has no source-A counterpart (id {})",
                    entry.utility_name, report_year, entry.source_a_id
                );
                gaps.push(ReconciliationGap::MissingSourceA {
                    utility_name: entry.utility_name.clone(),
                    source_a_id: entry.source_a_id,
                    report_year,
                });
            }
        }

        records.sort_by(|a, b| {
            a.utility_name
                .cmp(&b.utility_name)
                .then(a.report_year.cmp(&b.report_year))
        });

        info!(
            "Reconciled {} utility-years with {} gaps",
            records.len(),
            gaps.len()
        );

        Ok(ReconciliationOutcome { records, gaps })
    }

    fn index_source_a<'s>(
        &self,
        source_a: &'s [SourceAAggregate],
    ) -> Result<BTreeMap<(u32, i32), &'s SourceAAggregate>> {
        let mut index = BTreeMap::new();
        for aggregate in source_a {
            let key = (aggregate.entity_id, aggregate.report_year);
            if index.insert(key, aggregate).is_some() {
                return Err(RateCaseError::DuplicateRecord {
                    utility: self.describe_source_a(aggregate.entity_id),
                    year: aggregate.report_year,
                });
            }
        }
        Ok(index)
    }

    fn index_source_b<'s>(
        &self,
        source_b: &'s [SourceBAggregate],
    ) -> Result<BTreeMap<(u32, i32), &'s SourceBAggregate>> {
        let mut index = BTreeMap::new();
        for aggregate in source_b {
            let key = (aggregate.source_b_id, aggregate.report_year);
            if index.insert(key, aggregate).is_some() {
                let utility = self
                    .crosswalk
                    .by_source_b(aggregate.source_b_id)
                    .map(|e| e.utility_name.clone())
                    .unwrap_or_else(|| format!("source-B entity {}", aggregate.source_b_id));
                return Err(RateCaseError::DuplicateRecord {
                    utility,
                    year: aggregate.report_year,
                });
            }
        }
        Ok(index)
    }

    fn describe_source_a(&self, source_a_id: u32) -> String {
        match self.crosswalk.resolve(source_a_id) {
            Resolution::Found(entry) => entry.utility_name.clone(),
            Resolution::NotFound { .. } => format!("source-A entity {}", source_a_id),
        }
    }

    fn build_record(
        &self,
        entry: &CrosswalkEntry,
        source_a: &SourceAAggregate,
        source_b: &SourceBAggregate,
    ) -> UtilityYearRecord {
        UtilityYearRecord {
            utility_name: entry.utility_name.clone(),
            report_year: source_a.report_year,
            source_a_id: entry.source_a_id,
            source_b_id: entry.source_b_id,
            om: source_a.om.clone(),
            om_total: source_a.om.total(),
            rate_base: source_a.rate_base,
            operating_revenue: source_a.operating_revenue,
            classes: source_b.classes.clone(),
            metrics: None,
        }
    }
}

pub fn reconcile(
    crosswalk: &IdentifierCrosswalk,
    source_a: &[SourceAAggregate],
    source_b: &[SourceBAggregate],
) -> Result<ReconciliationOutcome> {
    Reconciler::new(crosswalk).reconcile(source_a, source_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CategoryTotals, CustomerClasses};

    fn source_a(entity_id: u32, year: i32, production: f64) -> SourceAAggregate {
        SourceAAggregate {
            entity_id,
            report_year: year,
            om: CategoryTotals {
                production,
                distribution: 10.0,
                ..Default::default()
            },
            rate_base: Some(1000.0),
            operating_revenue: None,
        }
    }

    fn source_b(source_b_id: u32, year: i32) -> SourceBAggregate {
        SourceBAggregate {
            source_b_id,
            report_year: year,
            classes: CustomerClasses::default(),
        }
    }

    fn crosswalk() -> IdentifierCrosswalk {
        IdentifierCrosswalk::new(IdentifierCrosswalk::california_ious()).unwrap()
    }

    #[test]
    fn test_resolution() {
        let crosswalk = crosswalk();
        match crosswalk.resolve(183) {
            Resolution::Found(entry) => {
                assert_eq!(entry.utility_name, "PG&E");
                assert_eq!(entry.source_b_id, 14328);
            }
            Resolution::NotFound { .. } => panic!("expected PG&E"),
        }
        assert_eq!(
            crosswalk.resolve(999),
            Resolution::NotFound { source_a_id: 999 }
        );
        assert_eq!(crosswalk.by_source_b(16609).unwrap().utility_name, "SDG&E");
    }

    #[test]
    fn test_duplicate_crosswalk_rejected() {
        let result = IdentifierCrosswalk::new(vec![
            CrosswalkEntry::new(1, 10, "A"),
            CrosswalkEntry::new(1, 11, "B"),
        ]);
        assert!(matches!(result, Err(RateCaseError::InvalidCrosswalk(_))));

        let result = IdentifierCrosswalk::new(vec![
            CrosswalkEntry::new(1, 10, "A"),
            CrosswalkEntry::new(2, 11, "A"),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_reconcile_full_join() {
        let crosswalk = crosswalk();
        let a = vec![source_a(183, 2020, 5.0), source_a(155, 2020, 6.0)];
        let b = vec![source_b(14328, 2020), source_b(17609, 2020)];

        let outcome = reconcile(&crosswalk, &a, &b).unwrap();
        assert!(outcome.is_complete());
        assert_eq!(outcome.records.len(), 2);

        let pge = outcome.record(&RecordKey::new("PG&E", 2020)).unwrap();
        assert_eq!(pge.om_total, 15.0);
        assert_eq!(pge.source_b_id, 14328);
        assert_eq!(pge.rate_base, Some(1000.0));
        assert!(pge.metrics.is_none());

        // Sorted by utility name
        assert_eq!(outcome.records[0].utility_name, "PG&E");
        assert_eq!(outcome.records[1].utility_name, "SCE");
    }

    #[test]
    fn test_unresolved_entity_is_localized() {
        let crosswalk = crosswalk();
        let a = vec![
            source_a(183, 2020, 5.0),
            source_a(777, 2020, 1.0),
            source_a(218, 2020, 2.0),
        ];
        let b = vec![source_b(14328, 2020), source_b(16609, 2020)];

        let outcome = reconcile(&crosswalk, &a, &b).unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(
            outcome.gaps,
            vec![ReconciliationGap::UnresolvedEntity {
                source_a_id: 777,
                report_year: 2020
            }]
        );
        assert_eq!(outcome.records[0].om_total, 15.0);
        assert_eq!(outcome.records[1].om_total, 12.0);
    }

    #[test]
    fn test_one_sided_rows_reported_as_gaps() {
        let crosswalk = crosswalk();
        let a = vec![source_a(183, 2020, 5.0), source_a(183, 2021, 5.0)];
        let b = vec![
            source_b(14328, 2020),
            source_b(17609, 2020),
            source_b(99999, 2020),
        ];

        let outcome = reconcile(&crosswalk, &a, &b).unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.gaps.len(), 2);
        assert!(outcome.gaps.contains(&ReconciliationGap::MissingSourceB {
            utility_name: "PG&E".to_string(),
            source_b_id: 14328,
            report_year: 2021,
        }));
        assert!(outcome.gaps.contains(&ReconciliationGap::MissingSourceA {
            utility_name: "SCE".to_string(),
            source_a_id: 155,
            report_year: 2020,
        }));
    }

    #[test]
    fn test_duplicate_source_rows_fatal() {
        let crosswalk = crosswalk();
        let a = vec![source_a(183, 2020, 5.0), source_a(183, 2020, 6.0)];
        let b = vec![source_b(14328, 2020)];

        let result = reconcile(&crosswalk, &a, &b);
        assert!(matches!(
            result,
            Err(RateCaseError::DuplicateRecord { ref utility, year: 2020 }) if utility == "PG&E"
        ));
    }

    #[test]
    fn test_gap_display_and_key() {
        let gap = ReconciliationGap::MissingSourceB {
            utility_name: "SCE".to_string(),
            source_b_id: 17609,
            report_year: 2019,
        };
        assert_eq!(gap.key(), Some(RecordKey::new("SCE", 2019)));
        assert!(gap.to_string().contains("SCE (2019)"));

        let json = serde_json::to_string(&gap).unwrap();
        assert!(json.contains("\"kind\":\"missing_source_b\""));
    }
}
