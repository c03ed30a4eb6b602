//! Modelling preparation of the preprocessed dataset
//!
//! Builds the numeric design matrix (race one-hot encoded, first level
//! dropped), splits it reproducibly into training, test and validation parts
//! and standard-scales the non-binary features with statistics fitted on the
//! training part. No model is fitted here.

use itertools::Itertools;
use log::{info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::assemble::PatientRecord;
use crate::error::{PipelineError, Result};

/// Share of rows held out from training
pub const TEST_SIZE: f64 = 0.3;

/// Numeric features taken directly from a record, in column order
pub const BASE_FEATURES: [&str; 11] = [
    "gaf_lv_24",
    "ips_duration_mean",
    "history_phys_24",
    "history_mh_24",
    "treatment_adt_only_cur",
    "treatment_conv_cur",
    "treatment_aug_cur",
    "cgis_change_mean",
    "bmi_cur",
    "gender",
    "age_years",
];

fn base_values(record: &PatientRecord) -> [Option<f64>; 11] {
    [
        record.gaf_lv_24,
        record.ips_duration_mean,
        Some(f64::from(record.history_phys_24)),
        Some(f64::from(record.history_mh_24)),
        Some(f64::from(record.treatment_adt_only_cur)),
        Some(f64::from(record.treatment_conv_cur)),
        Some(f64::from(record.treatment_aug_cur)),
        record.cgis_change_mean,
        record.bmi_cur,
        Some(f64::from(record.gender)),
        record.age_years.map(f64::from),
    ]
}

fn race_label(record: &PatientRecord) -> &str {
    record.race.as_deref().unwrap_or("null")
}

/// Race levels that get a dummy column: sorted distinct labels minus the first
#[must_use]
pub fn race_levels(records: &[PatientRecord]) -> Vec<String> {
    records
        .iter()
        .map(race_label)
        .unique()
        .sorted()
        .skip(1)
        .map(str::to_string)
        .collect()
}

/// One-hot race columns (`race_<label>`) and their values per record
#[must_use]
pub fn race_dummies(records: &[PatientRecord]) -> (Vec<String>, Vec<Vec<f64>>) {
    let levels = race_levels(records);
    let values = records
        .iter()
        .map(|record| {
            let race = race_label(record);
            levels
                .iter()
                .map(|l| if l == race { 1.0 } else { 0.0 })
                .collect()
        })
        .collect();
    (levels.iter().map(|l| format!("race_{l}")).collect(), values)
}

/// Numeric features, target and identifiers, one row per patient
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    /// Feature names
    pub columns: Vec<String>,
    /// Patient identifiers, aligned with `rows`
    pub ids: Vec<String>,
    /// Feature values
    pub rows: Vec<Vec<f64>>,
    /// Symptom severity per row
    pub target: Vec<i64>,
}

impl DesignMatrix {
    /// Build the matrix; records with a missing feature or target are skipped
    #[must_use]
    pub fn from_records(records: &[PatientRecord]) -> Self {
        let (dummy_columns, dummies) = race_dummies(records);
        let columns = BASE_FEATURES
            .iter()
            .map(|c| (*c).to_string())
            .chain(dummy_columns)
            .collect_vec();

        let mut matrix = Self {
            columns,
            ids: Vec::new(),
            rows: Vec::new(),
            target: Vec::new(),
        };
        let mut skipped = 0usize;

        for (record, dummy) in records.iter().zip(dummies) {
            let base: Option<Vec<f64>> = base_values(record).into_iter().collect();
            let (Some(mut row), Some(target)) = (base, record.symptom_severity_cur) else {
                skipped += 1;
                continue;
            };
            row.extend(dummy);

            matrix.ids.push(record.id.clone());
            matrix.rows.push(row);
            matrix.target.push(target);
        }

        if skipped > 0 {
            warn!("Skipped {skipped} records with missing values");
        }
        matrix
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the matrix has no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows at the given positions, in that order
    #[must_use]
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            ids: indices.iter().map(|&i| self.ids[i].clone()).collect(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
            target: indices.iter().map(|&i| self.target[i]).collect(),
        }
    }

    /// Position of a named column
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| PipelineError::missing_column(name, "design matrix"))
    }

    /// Values of one column
    #[must_use]
    pub fn column_values(&self, index: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r[index]).collect()
    }
}

/// Columns whose values are all 0 or 1
#[must_use]
pub fn binary_columns(matrix: &DesignMatrix) -> Vec<String> {
    matrix
        .columns
        .iter()
        .enumerate()
        .filter(|(idx, _)| {
            matrix
                .rows
                .iter()
                .all(|r| r[*idx] == 0.0 || r[*idx] == 1.0)
        })
        .map(|(_, name)| name.clone())
        .collect()
}

/// Column-wise standardisation fitted on one matrix and applied to others
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    /// Scaled columns
    pub columns: Vec<String>,
    /// Mean per scaled column
    pub mean: Vec<f64>,
    /// Population standard deviation per scaled column
    pub std: Vec<f64>,
}

impl StandardScaler {
    /// Fit means and standard deviations of the named columns
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(matrix: &DesignMatrix, columns: &[String]) -> Result<Self> {
        if matrix.is_empty() {
            return Err(PipelineError::InputAbsent(
                "cannot fit a scaler on an empty matrix".to_string(),
            ));
        }
        let n = matrix.len() as f64;
        let mut mean = Vec::with_capacity(columns.len());
        let mut std = Vec::with_capacity(columns.len());

        for column in columns {
            let values = matrix.column_values(matrix.column_index(column)?);
            let m = values.iter().sum::<f64>() / n;
            let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
            mean.push(m);
            std.push(var.sqrt());
        }

        Ok(Self {
            columns: columns.to_vec(),
            mean,
            std,
        })
    }

    /// Scale a matrix; zero-variance columns are only centred
    pub fn transform(&self, matrix: &DesignMatrix) -> Result<DesignMatrix> {
        let indices = self
            .columns
            .iter()
            .map(|c| matrix.column_index(c))
            .collect::<Result<Vec<_>>>()?;

        let mut scaled = matrix.clone();
        for row in &mut scaled.rows {
            for (k, &idx) in indices.iter().enumerate() {
                let centred = row[idx] - self.mean[k];
                row[idx] = if self.std[k] > 0.0 {
                    centred / self.std[k]
                } else {
                    centred
                };
            }
        }
        Ok(scaled)
    }
}

/// Shuffle positions `0..n` with a seeded generator and hold out
/// `floor(n * test_size)` of them
///
/// Returns `(train, test)` positions.
#[must_use]
pub fn train_test_split(n: usize, test_size: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices = (0..n).collect_vec();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let n_test = ((n as f64) * test_size.clamp(0.0, 1.0)).floor() as usize;
    let test = indices.split_off(n - n_test);
    (indices, test)
}

/// Training, test and validation parts of a dataset
#[derive(Debug, Clone)]
pub struct PreparedSplits {
    /// Scaled training rows
    pub train: DesignMatrix,
    /// Scaled test rows
    pub test: DesignMatrix,
    /// Scaled validation rows
    pub valid: DesignMatrix,
    /// Scaler fitted on the training rows
    pub scaler: StandardScaler,
}

/// Split 70/15/15 with `seed` and scale the non-binary features
pub fn prepare(records: &[PatientRecord], seed: u64) -> Result<PreparedSplits> {
    let matrix = DesignMatrix::from_records(records);
    if matrix.is_empty() {
        return Err(PipelineError::InputAbsent(
            "no complete records to prepare".to_string(),
        ));
    }

    let binary = binary_columns(&matrix);
    let to_scale = matrix
        .columns
        .iter()
        .filter(|c| !binary.contains(c))
        .cloned()
        .collect_vec();

    let (train_idx, held_out) = train_test_split(matrix.len(), TEST_SIZE, seed);
    let (test_pos, valid_pos) = train_test_split(held_out.len(), 0.5, seed);
    let test_idx = test_pos.iter().map(|&p| held_out[p]).collect_vec();
    let valid_idx = valid_pos.iter().map(|&p| held_out[p]).collect_vec();

    let train = matrix.select(&train_idx);
    let scaler = StandardScaler::fit(&train, &to_scale)?;

    let splits = PreparedSplits {
        train: scaler.transform(&train)?,
        test: scaler.transform(&matrix.select(&test_idx))?,
        valid: scaler.transform(&matrix.select(&valid_idx))?,
        scaler,
    };
    info!(
        "Prepared {} training, {} test and {} validation rows over {} features ({} scaled)",
        splits.train.len(),
        splits.test.len(),
        splits.valid.len(),
        matrix.columns.len(),
        to_scale.len()
    );
    Ok(splits)
}
