//! Configuration for the preprocessing pipeline.
//!
//! The configuration is loaded once at the entry point and passed by
//! reference into every stage constructor.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::derive::Reduction;
use crate::error::{PipelineError, Result};
use crate::error::util::safe_open_file;

/// A derived flag computed by reducing several raw flag columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompoundGroup {
    /// Raw 0/1 columns folded into the compound flag
    pub columns: Vec<String>,
    /// Name of the derived column
    pub name: String,
    /// How the columns are folded (`any` unless configured)
    #[serde(default)]
    pub reduction: Reduction,
}

impl CompoundGroup {
    /// Create a compound group from column names
    #[must_use]
    pub fn new(columns: &[&str], name: &str) -> Self {
        Self {
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            name: name.to_string(),
            reduction: Reduction::default(),
        }
    }
}

/// Column names and derivation rules for the clinical table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Columns holding free-text yes/no answers to recode as 0/1
    pub yes_no_columns: Vec<String>,
    /// Compound flags, derived in order
    pub compound_groups: Vec<CompoundGroup>,
    /// Substring identifying symptom sub-score columns
    pub symptom_marker: String,
    /// Therapy flag used by the treatment classification
    pub therapy_column: String,
    /// Compound flag for antidepressant-type treatment
    pub adt_column: String,
    /// Compound flag for other medication classes
    pub other_med_column: String,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            yes_no_columns: vec!["medical_history_hbp".to_string()],
            compound_groups: vec![
                CompoundGroup::new(
                    &[
                        "medical_history_dia",
                        "medical_history_hbp",
                        "medical_history_ren",
                        "medical_history_tum",
                    ],
                    "history_phys",
                ),
                CompoundGroup::new(
                    &["medical_history_sud", "medical_history_anx", "medical_history_mood"],
                    "history_mh",
                ),
                CompoundGroup::new(&["trt_adt", "trt_ssr"], "treatment_adt"),
                CompoundGroup::new(&["trt_anx", "trt_con", "trt_oth"], "treatment_other_med"),
            ],
            symptom_marker: "symptom_".to_string(),
            therapy_column: "trt_the".to_string(),
            adt_column: "treatment_adt".to_string(),
            other_med_column: "treatment_other_med".to_string(),
        }
    }
}

/// Configuration for a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding the raw exports and the written dataset
    pub dataset_dir: PathBuf,
    /// File name of the preprocessed dataset inside `dataset_dir`
    pub preprocessed_file_name: String,
    /// Seed for every random operation
    pub random_state: u64,
    /// Colour palette for figures, as `#rrggbb`
    pub palette: Vec<String>,
    /// Format of admission and discharge dates
    pub admission_date_format: String,
    /// Format of dates of birth
    pub birth_date_format: String,
    /// Rows read for CSV type inference (`None` reads the whole file)
    pub schema_inference_rows: Option<usize>,
    /// Feature derivation rules
    pub features: FeatureConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dataset_dir: PathBuf::from("datasets"),
            preprocessed_file_name: "preprocessed.parquet".to_string(),
            random_state: 42,
            palette: vec![
                "#264653".to_string(),
                "#2a9d8f".to_string(),
                "#e9c46a".to_string(),
                "#f4a261".to_string(),
                "#e76f51".to_string(),
            ],
            admission_date_format: "%d/%m/%y".to_string(),
            birth_date_format: "%Y-%m-%d".to_string(),
            schema_inference_rows: Some(1000),
            features: FeatureConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a JSON file; absent keys take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = safe_open_file(path, "pipeline configuration")?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Override the dataset directory
    #[must_use]
    pub fn with_dataset_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dataset_dir = dir.into();
        self
    }

    /// Full path of the preprocessed dataset
    #[must_use]
    pub fn output_path(&self) -> PathBuf {
        self.dataset_dir.join(&self.preprocessed_file_name)
    }

    /// Check the settings every run relies on
    pub fn validate(&self) -> Result<()> {
        if self.preprocessed_file_name.trim().is_empty() {
            return Err(PipelineError::Config(
                "preprocessed_file_name must not be empty".to_string(),
            ));
        }
        if self.palette.is_empty() {
            return Err(PipelineError::Config("palette must not be empty".to_string()));
        }
        if let Some(colour) = self.palette.iter().find(|c| !is_hex_colour(c)) {
            return Err(PipelineError::Config(format!(
                "palette entry '{colour}' is not a #rrggbb colour"
            )));
        }
        if self.features.compound_groups.iter().any(|g| g.columns.is_empty()) {
            return Err(PipelineError::Config(
                "compound groups need at least one column".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_hex_colour(s: &str) -> bool {
    s.len() == 7
        && s.starts_with('#')
        && s.chars().skip(1).all(|c| c.is_ascii_hexdigit())
}
