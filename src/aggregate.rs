//! Per-patient aggregation of encounter features
//!
//! Flags, severity, BMI and functioning level reduce with `max`; stay length
//! and impression change reduce with `mean`. Treatment categories are
//! exclusive per encounter but not per patient: a patient whose encounters
//! fall into different categories keeps every category flag that fired.

use std::time::Instant;

use arrow::record_batch::RecordBatch;
use itertools::Itertools;
use log::warn;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::derive::{BMI, CGIS_CHANGE, STAY_DURATION, SYMPTOM_SEVERITY, TreatmentCategory};
use crate::error::Result;
use crate::utils::arrow::{column_f64, column_i64, column_string};
use crate::utils::log_operation_complete;

/// Reduction applied to one feature over a patient's encounters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    /// Largest non-missing value
    Max,
    /// Arithmetic mean of the non-missing values
    Mean,
}

impl Reducer {
    /// Reduce the values of one group; `None` when every value is missing
    #[must_use]
    pub fn reduce(self, values: &[Option<f64>]) -> Option<f64> {
        // Sorted so the mean does not depend on row order
        let present = values
            .iter()
            .flatten()
            .copied()
            .sorted_by(f64::total_cmp)
            .collect_vec();
        if present.is_empty() {
            return None;
        }
        match self {
            Self::Max => present.last().copied(),
            #[allow(clippy::cast_precision_loss)]
            Self::Mean => Some(present.iter().sum::<f64>() / present.len() as f64),
        }
    }
}

/// One row per patient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientAggregate {
    /// Patient identifier
    pub id: String,
    /// Highest global functioning level
    pub gaf_lv_24: Option<f64>,
    /// Mean stay length in days
    pub ips_duration_mean: Option<f64>,
    /// Any physical condition in the history
    pub history_phys_24: i32,
    /// Any mental health condition in the history
    pub history_mh_24: i32,
    /// Ever treated with antidepressant-type medication alone
    pub treatment_adt_only_cur: i32,
    /// Ever treated conventionally
    pub treatment_conv_cur: i32,
    /// Ever treated with augmented medication
    pub treatment_aug_cur: i32,
    /// Mean change of the global impression score
    pub cgis_change_mean: Option<f64>,
    /// Highest symptom severity
    pub symptom_severity_cur: Option<i64>,
    /// Highest BMI
    pub bmi_cur: Option<f64>,
}

struct EncounterColumns {
    ids: Vec<Option<String>>,
    gaf: Vec<Option<f64>>,
    duration: Vec<Option<f64>>,
    history_phys: Vec<Option<f64>>,
    history_mh: Vec<Option<f64>>,
    adt_only: Vec<Option<f64>>,
    conv: Vec<Option<f64>>,
    aug: Vec<Option<f64>>,
    cgis_change: Vec<Option<f64>>,
    severity: Vec<Option<i64>>,
    bmi: Vec<Option<f64>>,
}

impl EncounterColumns {
    fn from_batch(batch: &RecordBatch) -> Result<Self> {
        let f = |column: &str| column_f64(batch, column, "derived encounters");
        Ok(Self {
            ids: column_string(batch, "id", "derived encounters")?,
            gaf: f("gaf_lv")?,
            duration: f(STAY_DURATION)?,
            history_phys: f("history_phys")?,
            history_mh: f("history_mh")?,
            adt_only: f(TreatmentCategory::AdtOnly.column())?,
            conv: f(TreatmentCategory::Conventional.column())?,
            aug: f(TreatmentCategory::Augmented.column())?,
            cgis_change: f(CGIS_CHANGE)?,
            severity: column_i64(batch, SYMPTOM_SEVERITY, "derived encounters")?,
            bmi: f(BMI)?,
        })
    }
}

fn pick<T: Copy>(values: &[T], rows: &[usize]) -> Vec<T> {
    rows.iter().map(|&r| values[r]).collect()
}

#[allow(clippy::cast_possible_truncation)]
fn flag(values: &[Option<f64>], rows: &[usize]) -> i32 {
    Reducer::Max
        .reduce(&pick(values, rows))
        .map_or(0, |v| v as i32)
}

/// Reduce derived encounter rows to one row per patient, sorted by id
///
/// Rows without a patient identifier are dropped with a warning.
pub fn aggregate_by_patient(batch: &RecordBatch) -> Result<Vec<PatientAggregate>> {
    let start = Instant::now();
    let cols = EncounterColumns::from_batch(batch)?;

    let mut groups: FxHashMap<&str, Vec<usize>> = FxHashMap::default();
    let mut missing_ids = 0usize;
    for (row, id) in cols.ids.iter().enumerate() {
        match id {
            Some(id) => groups.entry(id.as_str()).or_default().push(row),
            None => missing_ids += 1,
        }
    }
    if missing_ids > 0 {
        warn!("Dropped {missing_ids} encounter rows without a patient id");
    }

    let aggregates = groups
        .into_iter()
        .sorted_by(|a, b| a.0.cmp(b.0))
        .map(|(id, rows)| PatientAggregate {
            id: id.to_string(),
            gaf_lv_24: Reducer::Max.reduce(&pick(&cols.gaf, &rows)),
            ips_duration_mean: Reducer::Mean.reduce(&pick(&cols.duration, &rows)),
            history_phys_24: flag(&cols.history_phys, &rows),
            history_mh_24: flag(&cols.history_mh, &rows),
            treatment_adt_only_cur: flag(&cols.adt_only, &rows),
            treatment_conv_cur: flag(&cols.conv, &rows),
            treatment_aug_cur: flag(&cols.aug, &rows),
            cgis_change_mean: Reducer::Mean.reduce(&pick(&cols.cgis_change, &rows)),
            symptom_severity_cur: rows.iter().filter_map(|&r| cols.severity[r]).max(),
            bmi_cur: Reducer::Max.reduce(&pick(&cols.bmi, &rows)),
        })
        .collect_vec();

    log_operation_complete(
        "aggregated",
        "encounter rows",
        aggregates.len(),
        Some(start.elapsed()),
    );
    Ok(aggregates)
}
