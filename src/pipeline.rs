//! End-to-end preprocessing run
//!
//! Load the raw tables, derive and aggregate encounter features, join the
//! demographics and write the dataset. Each stage consumes the whole table
//! before the next starts, and the first error aborts the run.

use std::path::PathBuf;
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use chrono::Datelike;
use itertools::Itertools;
use log::info;

use crate::aggregate::aggregate_by_patient;
use crate::assemble::DatasetAssembler;
use crate::config::PipelineConfig;
use crate::derive::{FeatureDeriver, recode_demographics};
use crate::error::Result;
use crate::loader::{Table, TableLoader, TableRole};
use crate::normalize::{derive_age, parse_dates, recode_yes_no};
use crate::utils::arrow::column_string;

/// Counts reported at the end of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Input tables parsed
    pub tables: usize,
    /// Encounter rows in the clinical table
    pub encounters: usize,
    /// Distinct patients in the written dataset
    pub patients: usize,
    /// Rows in the written dataset
    pub records: usize,
    /// Where the dataset was written
    pub output_path: PathBuf,
}

/// A built dataset with the counts reported for it
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Joined and deduplicated rows
    pub batch: RecordBatch,
    /// Encounter rows in the clinical table
    pub encounters: usize,
    /// Distinct patients in `batch`
    pub patients: usize,
}

/// The configured preprocessing pipeline
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    loader: TableLoader,
    deriver: FeatureDeriver,
    assembler: DatasetAssembler,
}

impl Pipeline {
    /// Build every stage from one configuration
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            loader: TableLoader::new(&config),
            deriver: FeatureDeriver::new(&config.features),
            assembler: DatasetAssembler::new(&config),
            config,
        }
    }

    /// Normalize and derive the clinical table
    pub fn derive_encounters(&self, clinical: &RecordBatch) -> Result<RecordBatch> {
        let mut batch = clinical.clone();
        for column in &self.config.features.yes_no_columns {
            batch = recode_yes_no(&batch, column)?;
        }
        batch = parse_dates(
            &batch,
            &["date_of_admission", "date_of_discharge"],
            &self.config.admission_date_format,
        )?;
        self.deriver.derive(&batch)
    }

    /// Normalize the demographics table and append `age_years`
    pub fn normalize_demographics(
        &self,
        demographics: &RecordBatch,
        current_year: i32,
    ) -> Result<RecordBatch> {
        let batch = parse_dates(demographics, &["date_of_birth"], &self.config.birth_date_format)?;
        let batch = recode_demographics(&batch)?;
        derive_age(&batch, "date_of_birth", current_year)
    }

    /// Build the final dataset from already parsed tables
    pub fn build_dataset(&self, tables: &[Table], current_year: i32) -> Result<Dataset> {
        let demographics = TableRole::Demographics.select(tables, &self.config.features)?;
        let clinical = TableRole::Clinical.select(tables, &self.config.features)?;

        let encounters = self.derive_encounters(&clinical.batch)?;
        let aggregates = aggregate_by_patient(&encounters)?;
        let demographics = self.normalize_demographics(&demographics.batch, current_year)?;

        let batch = self.assembler.assemble(&aggregates, &demographics)?;
        let patients = column_string(&batch, "id", "dataset")?
            .into_iter()
            .flatten()
            .unique()
            .count();

        Ok(Dataset {
            batch,
            encounters: clinical.batch.num_rows(),
            patients,
        })
    }

    /// Run the whole pipeline on the files with `extension`, using the
    /// current calendar year for ages
    pub fn run(&self, extension: &str) -> Result<RunReport> {
        self.run_for_year(extension, chrono::Local::now().year())
    }

    /// Run the whole pipeline with an explicit year for ages
    pub fn run_for_year(&self, extension: &str, current_year: i32) -> Result<RunReport> {
        let start = Instant::now();
        let tables = self.loader.load(extension)?;
        let dataset = self.build_dataset(&tables, current_year)?;

        self.assembler.write(&dataset.batch)?;

        info!("Pipeline finished in {:?}", start.elapsed());
        Ok(RunReport {
            tables: tables.len(),
            encounters: dataset.encounters,
            patients: dataset.patients,
            records: dataset.batch.num_rows(),
            output_path: self.assembler.output_path().to_path_buf(),
        })
    }
}
