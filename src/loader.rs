//! Delimited file loading and table selection
//!
//! Raw exports are a directory of headered CSV files, one table per file.
//! Tables are told apart by their columns: each [`TableRole`] names a column
//! substring that identifies it and the columns it must carry.

use std::fs;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use arrow::compute::concat_batches;
use arrow::csv::ReaderBuilder;
use arrow::csv::reader::Format;
use arrow::datatypes::{DataType, FieldRef, Schema};
use arrow::record_batch::RecordBatch;
use itertools::Itertools;
use log::debug;

use crate::config::{FeatureConfig, PipelineConfig};
use crate::error::util::{safe_open_file, validate_directory};
use crate::error::{PipelineError, Result};
use crate::utils::{log_operation_complete, log_operation_start, log_warning};

/// One parsed input file
#[derive(Debug, Clone)]
pub struct Table {
    /// File name the table was read from
    pub name: String,
    /// All rows of the file
    pub batch: RecordBatch,
}

impl Table {
    /// Create a table from a name and its data
    #[must_use]
    pub fn new(name: impl Into<String>, batch: RecordBatch) -> Self {
        Self {
            name: name.into(),
            batch,
        }
    }

    /// Whether any column name contains `needle`
    #[must_use]
    pub fn has_column_containing(&self, needle: &str) -> bool {
        self.batch
            .schema()
            .fields()
            .iter()
            .any(|f| f.name().contains(needle))
    }

    /// Columns from `required` that the table lacks
    #[must_use]
    pub fn missing_columns(&self, required: &[String]) -> Vec<String> {
        let schema = self.batch.schema();
        required
            .iter()
            .filter(|c| schema.index_of(c).is_err())
            .cloned()
            .collect()
    }
}

/// Logical role of an input table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableRole {
    /// One row per patient: identifier, gender, race, date of birth
    Demographics,
    /// One row per encounter: dates, treatment and history flags, scores
    Clinical,
}

impl TableRole {
    /// Convert `TableRole` to static string
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Demographics => "demographics",
            Self::Clinical => "clinical",
        }
    }

    /// Column-name substring identifying the table
    #[must_use]
    pub const fn needle(self) -> &'static str {
        match self {
            Self::Demographics => "gender",
            Self::Clinical => "trt_adt",
        }
    }

    /// Columns the table must carry for the derivations configured in `features`
    #[must_use]
    pub fn required_columns(self, features: &FeatureConfig) -> Vec<String> {
        match self {
            Self::Demographics => ["patient_id", "gender", "race", "date_of_birth"]
                .iter()
                .map(|c| (*c).to_string())
                .collect(),
            Self::Clinical => {
                let derived: Vec<&str> = features
                    .compound_groups
                    .iter()
                    .map(|g| g.name.as_str())
                    .collect();

                [
                    "id",
                    "date_of_admission",
                    "date_of_discharge",
                    "height",
                    "weight",
                    "gaf_lv",
                    "cgis_adm",
                    "cgis_dis",
                ]
                .iter()
                .map(|c| (*c).to_string())
                .chain(std::iter::once(features.therapy_column.clone()))
                .chain(features.yes_no_columns.iter().cloned())
                .chain(
                    features
                        .compound_groups
                        .iter()
                        .flat_map(|g| g.columns.iter().cloned()),
                )
                .filter(|c| !derived.contains(&c.as_str()))
                .unique()
                .collect()
            }
        }
    }

    /// Select the table for this role and check its columns
    ///
    /// # Errors
    ///
    /// `NoMatchingTable` if no table carries the role's needle, `Schema` if
    /// the selected table lacks a required column.
    pub fn select<'a>(self, tables: &'a [Table], features: &FeatureConfig) -> Result<&'a Table> {
        let table = select_table(tables, self.needle())?;
        let missing = table.missing_columns(&self.required_columns(features));
        if !missing.is_empty() {
            return Err(PipelineError::Schema(format!(
                "{} table '{}' is missing required columns: {}",
                self.as_str(),
                table.name,
                missing.join(", ")
            )));
        }
        debug!("Selected '{}' as the {} table", table.name, self.as_str());
        Ok(table)
    }
}

/// Select the first table having a column whose name contains `needle`
pub fn select_table<'a>(tables: &'a [Table], needle: &str) -> Result<&'a Table> {
    tables
        .iter()
        .find(|t| t.has_column_containing(needle))
        .ok_or_else(|| PipelineError::NoMatchingTable {
            needle: needle.to_string(),
        })
}

/// List the files in `dir` whose name ends with `extension`, sorted by name
///
/// # Errors
///
/// `InputAbsent` if the directory is empty or nothing matches the extension
pub fn read_file_names(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    log_operation_start("Searching for input files in", &dir.display().to_string());
    validate_directory(dir, "raw input tables")?;

    let entries = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    if entries.is_empty() {
        return Err(PipelineError::InputAbsent(format!(
            "directory {} is empty",
            dir.display()
        )));
    }

    let files = entries
        .into_iter()
        .map(|entry| entry.path())
        .filter(|path| {
            let matches = path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(extension));
            if !matches {
                debug!("Skipping {}", path.display());
            }
            matches
        })
        .sorted()
        .collect_vec();

    if files.is_empty() {
        log_warning(&format!("No '{extension}' files found in directory"), Some(dir));
        return Err(PipelineError::InputAbsent(format!(
            "no files ending in '{extension}' in {}",
            dir.display()
        )));
    }

    log_operation_complete("found", &dir.display().to_string(), files.len(), None);
    Ok(files)
}

/// Inferred schema with every temporal column read as text
///
/// Dates are parsed later with the configured formats, so inference must not
/// accept a layout the format would reject.
fn temporal_as_text(schema: &Schema) -> Schema {
    let fields: Vec<FieldRef> = schema
        .fields()
        .iter()
        .map(|f| {
            if f.data_type().is_temporal() {
                Arc::new(f.as_ref().clone().with_data_type(DataType::Utf8))
            } else {
                Arc::clone(f)
            }
        })
        .collect();
    Schema::new_with_metadata(fields, schema.metadata().clone())
}

/// Parse one headered CSV file into a table
pub fn read_table(path: &Path, inference_rows: Option<usize>) -> Result<Table> {
    let start = Instant::now();
    log_operation_start("Reading table", &path.display().to_string());

    let mut file = safe_open_file(path, "reading a raw table")?;
    let format = Format::default().with_header(true);
    let (schema, _) = format.infer_schema(&mut file, inference_rows)?;
    file.seek(SeekFrom::Start(0))?;

    let schema = Arc::new(temporal_as_text(&schema));
    let reader = ReaderBuilder::new(Arc::clone(&schema))
        .with_format(format)
        .build(file)?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    let batch = concat_batches(&schema, &batches)?;

    let name = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
    log_operation_complete("read", &name, batch.num_rows(), Some(start.elapsed()));
    Ok(Table::new(name, batch))
}

/// Parse every file in `files`
///
/// # Errors
///
/// `InputAbsent` if `files` is empty; any read or parse failure aborts
pub fn read_files(files: &[PathBuf], inference_rows: Option<usize>) -> Result<Vec<Table>> {
    if files.is_empty() {
        return Err(PipelineError::InputAbsent("file list is empty".to_string()));
    }
    files
        .iter()
        .map(|path| read_table(path, inference_rows))
        .collect()
}

/// Loads the raw tables of a run
#[derive(Debug, Clone)]
pub struct TableLoader {
    dataset_dir: PathBuf,
    inference_rows: Option<usize>,
}

impl TableLoader {
    /// Create a loader reading from the configured dataset directory
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            dataset_dir: config.dataset_dir.clone(),
            inference_rows: config.schema_inference_rows,
        }
    }

    /// Read every file with the given extension
    pub fn load(&self, extension: &str) -> Result<Vec<Table>> {
        let files = read_file_names(&self.dataset_dir, extension)?;
        read_files(&files, self.inference_rows)
    }
}
