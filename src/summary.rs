//! Cohort summary of the preprocessed dataset
//!
//! Category counts, the patients flagged with more than one treatment
//! category after aggregation, and per-feature shares by symptom severity.

use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;
use log::{info, warn};

use crate::assemble::PatientRecord;
use crate::derive::TreatmentCategory;

/// Single treatment label of a patient
///
/// The flagged category whose column name sorts last wins, so a patient
/// flagged conventional and adt-only is labelled conventional. `None` when
/// no category is flagged.
#[must_use]
pub fn treatment_type(record: &PatientRecord) -> Option<TreatmentCategory> {
    record
        .treatment_categories()
        .into_iter()
        .max_by_key(|c| c.aggregate_column())
}

/// Binary features whose share is reported per severity level
pub const BINARY_FEATURES: [&str; 6] = [
    "history_phys_24",
    "history_mh_24",
    "treatment_adt_only_cur",
    "treatment_conv_cur",
    "treatment_aug_cur",
    "gender",
];

fn binary_value(record: &PatientRecord, feature: &str) -> Option<i32> {
    match feature {
        "history_phys_24" => Some(record.history_phys_24),
        "history_mh_24" => Some(record.history_mh_24),
        "gender" => Some(record.gender),
        _ => TreatmentCategory::ALL
            .into_iter()
            .find(|c| c.aggregate_column() == feature)
            .map(|c| record.treatment_flag(c)),
    }
}

/// Descriptive summary of a cohort
#[derive(Debug, Clone, PartialEq)]
pub struct CohortSummary {
    /// Number of patients
    pub patients: usize,
    /// Patients per flagged category (a patient may count in several)
    pub category_counts: BTreeMap<TreatmentCategory, usize>,
    /// Ids of patients flagged with more than one category
    pub multi_category: Vec<String>,
    /// Patients without any category
    pub untreated: usize,
    /// Patients per gender code
    pub gender_counts: BTreeMap<i32, usize>,
    /// Patients per race label
    pub race_counts: BTreeMap<String, usize>,
    /// For each binary feature, the share of all patients with the feature
    /// set, per symptom severity
    pub severity_shares: BTreeMap<String, BTreeMap<i64, f64>>,
}

impl CohortSummary {
    /// Summarize a set of patient records
    #[must_use]
    pub fn from_records(records: &[PatientRecord]) -> Self {
        let mut category_counts = BTreeMap::new();
        let mut multi_category = Vec::new();
        let mut untreated = 0;

        for record in records {
            let flagged = record.treatment_categories();
            for category in &flagged {
                *category_counts.entry(*category).or_insert(0) += 1;
            }
            match flagged.len() {
                0 => untreated += 1,
                1 => {}
                _ => multi_category.push(record.id.clone()),
            }
        }

        let gender_counts = records.iter().map(|r| r.gender).counts().into_iter().collect();
        let race_counts = records
            .iter()
            .map(|r| r.race.clone().unwrap_or_else(|| "unknown".to_string()))
            .counts()
            .into_iter()
            .collect();

        Self {
            patients: records.len(),
            category_counts,
            multi_category: multi_category.into_iter().sorted().collect(),
            untreated,
            gender_counts,
            race_counts,
            severity_shares: severity_shares(records),
        }
    }

    /// Log the summary
    pub fn log(&self) {
        info!("{self}");
        if !self.multi_category.is_empty() {
            warn!(
                "{} patients carry more than one treatment category: {}",
                self.multi_category.len(),
                self.multi_category.join(", ")
            );
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn severity_shares(records: &[PatientRecord]) -> BTreeMap<String, BTreeMap<i64, f64>> {
    if records.is_empty() {
        return BTreeMap::new();
    }
    let total = records.len() as f64;

    BINARY_FEATURES
        .iter()
        .map(|feature| {
            let mut shares: BTreeMap<i64, f64> = BTreeMap::new();
            for record in records {
                let Some(severity) = record.symptom_severity_cur else {
                    continue;
                };
                let value = binary_value(record, feature).unwrap_or(0);
                *shares.entry(severity).or_insert(0.0) += f64::from(value) / total;
            }
            ((*feature).to_string(), shares)
        })
        .collect()
}

impl fmt::Display for CohortSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Patients: {}", self.patients)?;
        for category in TreatmentCategory::ALL {
            writeln!(
                f,
                "  {category}: {}",
                self.category_counts.get(&category).copied().unwrap_or(0)
            )?;
        }
        writeln!(f, "  untreated: {}", self.untreated)?;
        writeln!(f, "  multiple categories: {}", self.multi_category.len())?;
        writeln!(
            f,
            "Gender: {}",
            self.gender_counts
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .join(", ")
        )?;
        write!(
            f,
            "Race: {}",
            self.race_counts
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .join(", ")
        )
    }
}
