//! Joining patient aggregates with demographics and persisting the dataset

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use arrow::array::UInt32Array;
use arrow::compute::take_record_batch;
use arrow::datatypes::FieldRef;
use arrow::record_batch::RecordBatch;
use arrow::row::{RowConverter, SortField};
use itertools::izip;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use serde_arrow::schema::{SchemaLike, TracingOptions};

use crate::aggregate::PatientAggregate;
use crate::config::PipelineConfig;
use crate::derive::TreatmentCategory;
use crate::error::util::safe_open_file;
use crate::error::{PipelineError, Result};
use crate::normalize::AGE_COLUMN;
use crate::utils::arrow::{column_i64, column_string};
use crate::utils::{log_operation_complete, log_operation_start};

/// Normalized demographic attributes of one patient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Demographic {
    /// Patient identifier
    pub patient_id: String,
    /// 0 for female, 1 otherwise
    pub gender: i32,
    /// Canonical race label
    pub race: Option<String>,
    /// Age in calendar years
    pub age_years: Option<i32>,
}

/// One row of the persisted dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
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
    /// 0 for female, 1 otherwise
    pub gender: i32,
    /// Canonical race label
    pub race: Option<String>,
    /// Age in calendar years
    pub age_years: Option<i32>,
}

impl PatientRecord {
    /// Combine a patient's aggregate with its demographics
    #[must_use]
    pub fn from_parts(aggregate: &PatientAggregate, demographic: &Demographic) -> Self {
        Self {
            id: aggregate.id.clone(),
            gaf_lv_24: aggregate.gaf_lv_24,
            ips_duration_mean: aggregate.ips_duration_mean,
            history_phys_24: aggregate.history_phys_24,
            history_mh_24: aggregate.history_mh_24,
            treatment_adt_only_cur: aggregate.treatment_adt_only_cur,
            treatment_conv_cur: aggregate.treatment_conv_cur,
            treatment_aug_cur: aggregate.treatment_aug_cur,
            cgis_change_mean: aggregate.cgis_change_mean,
            symptom_severity_cur: aggregate.symptom_severity_cur,
            bmi_cur: aggregate.bmi_cur,
            gender: demographic.gender,
            race: demographic.race.clone(),
            age_years: demographic.age_years,
        }
    }

    /// Value of a per-patient treatment category flag
    #[must_use]
    pub const fn treatment_flag(&self, category: TreatmentCategory) -> i32 {
        match category {
            TreatmentCategory::Conventional => self.treatment_conv_cur,
            TreatmentCategory::Augmented => self.treatment_aug_cur,
            TreatmentCategory::AdtOnly => self.treatment_adt_only_cur,
        }
    }

    /// Categories flagged for this patient, in column order
    ///
    /// Several categories can be flagged when the encounters of a patient
    /// fall into different categories.
    #[must_use]
    pub fn treatment_categories(&self) -> Vec<TreatmentCategory> {
        TreatmentCategory::ALL
            .into_iter()
            .filter(|c| self.treatment_flag(*c) == 1)
            .collect()
    }

    /// Arrow fields of the persisted dataset
    pub fn fields() -> Result<Vec<FieldRef>> {
        Ok(Vec::<FieldRef>::from_type::<Self>(
            TracingOptions::default().allow_null_fields(true),
        )?)
    }
}

/// Extract demographics from a recoded table carrying `age_years`
///
/// # Errors
///
/// `Schema` if `patient_id`, `gender`, `race` or `age_years` is missing
pub fn demographics_from_batch(batch: &RecordBatch) -> Result<Vec<Demographic>> {
    let ids = column_string(batch, "patient_id", "demographics")?;
    let genders = column_i64(batch, "gender", "demographics")?;
    let races = column_string(batch, "race", "demographics")?;
    let ages = column_i64(batch, AGE_COLUMN, "demographics")?;

    Ok(izip!(ids, genders, races, ages)
        .filter_map(|(id, gender, race, age)| {
            Some(Demographic {
                patient_id: id?,
                gender: gender.and_then(|g| i32::try_from(g).ok()).unwrap_or(1),
                race,
                age_years: age.and_then(|a| i32::try_from(a).ok()),
            })
        })
        .collect())
}

/// Inner join on patient identifier
///
/// Patients missing on either side are dropped; a patient with several
/// demographic rows yields one record per row.
#[must_use]
pub fn join(aggregates: &[PatientAggregate], demographics: &[Demographic]) -> Vec<PatientRecord> {
    let mut by_id: FxHashMap<&str, Vec<&Demographic>> = FxHashMap::default();
    for d in demographics {
        by_id.entry(d.patient_id.as_str()).or_default().push(d);
    }

    aggregates
        .iter()
        .flat_map(|a| {
            by_id
                .get(a.id.as_str())
                .into_iter()
                .flatten()
                .map(move |d| PatientRecord::from_parts(a, d))
        })
        .collect()
}

/// Remove exact duplicate rows, keeping the first occurrence of each
pub fn remove_duplicates(batch: &RecordBatch) -> Result<RecordBatch> {
    if batch.num_rows() == 0 {
        return Ok(batch.clone());
    }

    let converter = RowConverter::new(
        batch
            .schema()
            .fields()
            .iter()
            .map(|f| SortField::new(f.data_type().clone()))
            .collect(),
    )?;
    let rows = converter.convert_columns(batch.columns())?;

    let mut seen = FxHashSet::default();
    let keep: UInt32Array = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| seen.insert(*row))
        .map(|(idx, _)| u32::try_from(idx).ok())
        .collect();

    let removed = batch.num_rows() - keep.len();
    if removed > 0 {
        log::info!("Removed {removed} duplicate rows");
    }
    Ok(take_record_batch(batch, &keep)?)
}

/// Convert records to a record batch
pub fn records_to_batch(records: &[PatientRecord]) -> Result<RecordBatch> {
    let fields = PatientRecord::fields()?;
    Ok(serde_arrow::to_record_batch(&fields, &records)?)
}

/// Convert a record batch back to records
pub fn records_from_batch(batch: &RecordBatch) -> Result<Vec<PatientRecord>> {
    Ok(serde_arrow::from_record_batch(batch)?)
}

/// Write a batch to a parquet file, replacing any previous file
///
/// The data goes to a temporary sibling first and is renamed over `path`,
/// so a failed write leaves no partial dataset behind.
pub fn write_parquet(batch: &RecordBatch, path: &Path) -> Result<()> {
    let start = Instant::now();
    log_operation_start("Writing dataset to", &path.display().to_string());

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| PipelineError::Config(format!("{} is not a file path", path.display())))?;
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

    let result = (|| -> Result<()> {
        let file = fs::File::create(&tmp_path)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
        writer.write(batch)?;
        writer.close()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result?;

    log_operation_complete(
        "wrote",
        &path.display().to_string(),
        batch.num_rows(),
        Some(start.elapsed()),
    );
    Ok(())
}

/// Read a persisted dataset
pub fn read_dataset(path: &Path) -> Result<Vec<PatientRecord>> {
    let start = Instant::now();
    log_operation_start("Reading dataset", &path.display().to_string());

    let file = safe_open_file(path, "reading the preprocessed dataset")?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut records = Vec::new();
    for batch in reader {
        records.extend(records_from_batch(&batch?)?);
    }

    log_operation_complete(
        "read",
        &path.display().to_string(),
        records.len(),
        Some(start.elapsed()),
    );
    Ok(records)
}

/// Builds and persists the final dataset
#[derive(Debug, Clone)]
pub struct DatasetAssembler {
    output_path: PathBuf,
}

impl DatasetAssembler {
    /// Create an assembler writing to the configured output path
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            output_path: config.output_path(),
        }
    }

    /// Where the dataset is written
    #[must_use]
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Join, deduplicate and convert to a record batch
    pub fn assemble(
        &self,
        aggregates: &[PatientAggregate],
        demographics: &RecordBatch,
    ) -> Result<RecordBatch> {
        let demographics = demographics_from_batch(demographics)?;
        let records = join(aggregates, &demographics);
        log::info!(
            "Joined {} patients with {} demographic rows into {} records",
            aggregates.len(),
            demographics.len(),
            records.len()
        );
        remove_duplicates(&records_to_batch(&records)?)
    }

    /// Persist a dataset, overwriting the previous one
    pub fn write(&self, batch: &RecordBatch) -> Result<()> {
        write_parquet(batch, &self.output_path)
    }
}
