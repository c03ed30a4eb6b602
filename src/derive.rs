//! Per-encounter feature derivation
//!
//! Compound flags, treatment categories and the derived scalar features are
//! appended to the clinical table as new columns. Demographic recoding lives
//! here too since it follows the same column-rule pattern.

use std::fmt;
use std::sync::Arc;

use arrow::array::{Float64Array, Int32Array, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use itertools::{Itertools, izip};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::FeatureConfig;
use crate::error::{PipelineError, Result};
use crate::utils::arrow::{
    column_date, column_f64, column_i64, column_string, columns_containing, with_column,
};

/// Inpatient stay length in days
pub const STAY_DURATION: &str = "ips_duration";
/// Global impression change over the stay
pub const CGIS_CHANGE: &str = "cgis_change";
/// Sum of the symptom sub-scores
pub const SYMPTOM_SEVERITY: &str = "symptom_severity";
/// Body mass index
pub const BMI: &str = "bmi";

/// How the flags of a compound group are folded into one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    /// Set when any constituent flag is set
    #[default]
    Any,
    /// Set when every constituent flag is set
    All,
}

impl Reduction {
    /// Fold a row's flags
    #[must_use]
    pub fn apply(self, flags: &[bool]) -> bool {
        match self {
            Self::Any => flags.iter().any(|f| *f),
            Self::All => flags.iter().all(|f| *f),
        }
    }
}

/// Mutually exclusive treatment categories of one encounter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TreatmentCategory {
    /// Antidepressant-type treatment plus therapy, no other medication
    Conventional,
    /// Antidepressant-type treatment plus other medication
    Augmented,
    /// Antidepressant-type treatment alone
    AdtOnly,
}

impl TreatmentCategory {
    /// All categories, in column order
    pub const ALL: [Self; 3] = [Self::Conventional, Self::Augmented, Self::AdtOnly];

    /// Per-encounter flag column
    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::Conventional => "treatment_conv",
            Self::Augmented => "treatment_aug",
            Self::AdtOnly => "treatment_adt_only",
        }
    }

    /// Per-patient flag column after aggregation
    #[must_use]
    pub const fn aggregate_column(self) -> &'static str {
        match self {
            Self::Conventional => "treatment_conv_cur",
            Self::Augmented => "treatment_aug_cur",
            Self::AdtOnly => "treatment_adt_only_cur",
        }
    }
}

impl fmt::Display for TreatmentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Conventional => "conventional",
            Self::Augmented => "augmented",
            Self::AdtOnly => "adt-only",
        };
        write!(f, "{name}")
    }
}

/// Category flags of one encounter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreatmentFlags {
    /// Conventional treatment
    pub conventional: bool,
    /// Augmented treatment
    pub augmented: bool,
    /// Antidepressant-type treatment only
    pub adt_only: bool,
}

impl TreatmentFlags {
    /// Evaluate the three category rules independently
    ///
    /// A flag counts as set only when it equals 1 and as unset only when it
    /// equals 0; a missing value satisfies neither.
    #[must_use]
    pub fn classify(adt: Option<f64>, therapy: Option<f64>, other_med: Option<f64>) -> Self {
        let is = |v: Option<f64>, target: f64| v.is_some_and(|v| (v - target).abs() < f64::EPSILON);
        Self {
            conventional: is(adt, 1.0) && is(therapy, 1.0) && is(other_med, 0.0),
            augmented: is(adt, 1.0) && is(other_med, 1.0),
            adt_only: is(adt, 1.0) && is(other_med, 0.0) && is(therapy, 0.0),
        }
    }

    /// Whether the given category fired
    #[must_use]
    pub const fn get(self, category: TreatmentCategory) -> bool {
        match category {
            TreatmentCategory::Conventional => self.conventional,
            TreatmentCategory::Augmented => self.augmented,
            TreatmentCategory::AdtOnly => self.adt_only,
        }
    }
}

/// Body mass index from weight in kg and height in cm
#[must_use]
pub fn bmi_value(weight_kg: f64, height_cm: f64) -> f64 {
    weight_kg / (height_cm / 100.0).powi(2)
}

fn flag_values(batch: &RecordBatch, column: &str) -> Result<Vec<bool>> {
    Ok(column_f64(batch, column, "clinical")?
        .into_iter()
        .map(|v| v.is_some_and(|v| v != 0.0 && !v.is_nan()))
        .collect())
}

fn to_flag(b: bool) -> i32 {
    i32::from(b)
}

/// Append a 0/1 column folding `columns` row by row; missing values count as 0
pub fn compound_flag(
    batch: &RecordBatch,
    columns: &[String],
    name: &str,
    reduction: Reduction,
) -> Result<RecordBatch> {
    if columns.is_empty() {
        return Err(PipelineError::Config(format!(
            "compound flag '{name}' has no source columns"
        )));
    }

    let per_column = columns
        .iter()
        .map(|c| flag_values(batch, c))
        .collect::<Result<Vec<_>>>()?;

    let folded: Int32Array = (0..batch.num_rows())
        .map(|row| {
            let flags = per_column.iter().map(|col| col[row]).collect_vec();
            Some(to_flag(reduction.apply(&flags)))
        })
        .collect();

    debug!("Derived compound flag '{name}' from {}", columns.join(", "));
    with_column(batch, name, Arc::new(folded))
}

/// Append the three treatment category flag columns
pub fn classify_treatment(
    batch: &RecordBatch,
    adt_column: &str,
    therapy_column: &str,
    other_med_column: &str,
) -> Result<RecordBatch> {
    let adt = column_f64(batch, adt_column, "clinical")?;
    let therapy = column_f64(batch, therapy_column, "clinical")?;
    let other = column_f64(batch, other_med_column, "clinical")?;

    let flags = izip!(adt, therapy, other)
        .map(|(a, t, o)| TreatmentFlags::classify(a, t, o))
        .collect_vec();

    let mut out = batch.clone();
    for category in TreatmentCategory::ALL {
        let column: Int32Array = flags
            .iter()
            .map(|f| Some(to_flag(f.get(category))))
            .collect();
        out = with_column(&out, category.column(), Arc::new(column))?;
    }
    Ok(out)
}

/// Append `ips_duration`: discharge minus admission, in whole days
pub fn stay_duration(batch: &RecordBatch, admission: &str, discharge: &str) -> Result<RecordBatch> {
    let admitted = column_date(batch, admission, "clinical")?;
    let discharged = column_date(batch, discharge, "clinical")?;

    let days: Int64Array = admitted
        .into_iter()
        .zip(discharged)
        .map(|(a, d)| match (a, d) {
            (Some(a), Some(d)) => Some(d.signed_duration_since(a).num_days()),
            _ => None,
        })
        .collect();
    with_column(batch, STAY_DURATION, Arc::new(days))
}

/// Append `cgis_change`: discharge score minus admission score
pub fn cgis_change(batch: &RecordBatch, admission: &str, discharge: &str) -> Result<RecordBatch> {
    let adm = column_f64(batch, admission, "clinical")?;
    let dis = column_f64(batch, discharge, "clinical")?;

    let change: Float64Array = adm
        .into_iter()
        .zip(dis)
        .map(|(a, d)| Some(d? - a?))
        .collect();
    with_column(batch, CGIS_CHANGE, Arc::new(change))
}

/// Append `symptom_severity`: the sum of every column whose name contains
/// `marker`; a row with a missing sub-score has no severity
pub fn symptom_severity(batch: &RecordBatch, marker: &str) -> Result<RecordBatch> {
    let columns = columns_containing(batch, marker)
        .into_iter()
        .filter(|c| c != SYMPTOM_SEVERITY)
        .collect_vec();
    if columns.is_empty() {
        return Err(PipelineError::Schema(format!(
            "no symptom columns containing '{marker}'"
        )));
    }

    let scores = columns
        .iter()
        .map(|c| column_i64(batch, c, "clinical"))
        .collect::<Result<Vec<_>>>()?;

    let sums: Int64Array = (0..batch.num_rows())
        .map(|row| scores.iter().map(|col| col[row]).sum::<Option<i64>>())
        .collect();

    debug!("Symptom severity summed over {} columns", columns.len());
    with_column(batch, SYMPTOM_SEVERITY, Arc::new(sums))
}

/// Append `bmi` = weight / (height / 100)^2
pub fn bmi(batch: &RecordBatch, height: &str, weight: &str) -> Result<RecordBatch> {
    let heights = column_f64(batch, height, "clinical")?;
    let weights = column_f64(batch, weight, "clinical")?;

    let values: Float64Array = weights
        .into_iter()
        .zip(heights)
        .map(|(w, h)| Some(bmi_value(w?, h?)))
        .collect();
    with_column(batch, BMI, Arc::new(values))
}

/// Binary gender code: 0 when the value contains an "f" (any case), else 1
///
/// Every other value, including unknown or missing ones, maps to 1.
#[must_use]
pub fn recode_gender_value(value: Option<&str>) -> i32 {
    match value {
        Some(v) if v.to_lowercase().contains('f') => 0,
        _ => 1,
    }
}

/// Canonical race label; values matching no rule pass through unchanged
#[must_use]
pub fn canonical_race(value: &str) -> String {
    let lower = value.to_lowercase();
    if lower.contains("chin") {
        "Chinese".to_string()
    } else if lower.contains("ind") {
        "Indian".to_string()
    } else {
        value.to_string()
    }
}

/// Replace `gender` with its binary code and `race` with its canonical label
pub fn recode_demographics(batch: &RecordBatch) -> Result<RecordBatch> {
    let genders: Int32Array = column_string(batch, "gender", "demographics")?
        .iter()
        .map(|g| Some(recode_gender_value(g.as_deref())))
        .collect();
    let races: StringArray = column_string(batch, "race", "demographics")?
        .iter()
        .map(|r| r.as_deref().map(canonical_race))
        .collect();

    let out = with_column(batch, "gender", Arc::new(genders))?;
    with_column(&out, "race", Arc::new(races))
}

/// Derives every per-encounter feature of the clinical table
#[derive(Debug, Clone)]
pub struct FeatureDeriver {
    features: FeatureConfig,
}

impl FeatureDeriver {
    /// Create a deriver for the configured feature rules
    #[must_use]
    pub fn new(features: &FeatureConfig) -> Self {
        Self {
            features: features.clone(),
        }
    }

    /// Derive all features of a normalized clinical table
    ///
    /// The admission and discharge columns must already be Date32.
    pub fn derive(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        let mut out = stay_duration(batch, "date_of_admission", "date_of_discharge")?;

        for group in &self.features.compound_groups {
            out = compound_flag(&out, &group.columns, &group.name, group.reduction)?;
        }

        out = classify_treatment(
            &out,
            &self.features.adt_column,
            &self.features.therapy_column,
            &self.features.other_med_column,
        )?;
        out = cgis_change(&out, "cgis_adm", "cgis_dis")?;
        out = symptom_severity(&out, &self.features.symptom_marker)?;
        bmi(&out, "height", "weight")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::ArrayRef;
    use arrow::datatypes::{Field, Schema};

    fn batch(columns: Vec<(&str, ArrayRef)>) -> RecordBatch {
        let fields: Vec<Field> = columns
            .iter()
            .map(|(n, a)| Field::new(*n, a.data_type().clone(), true))
            .collect();
        RecordBatch::try_new(
            Arc::new(Schema::new(fields)),
            columns.into_iter().map(|(_, a)| a).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_bmi_formula() {
        assert!((bmi_value(70.0, 170.0) - 24.221_453_287_197_23).abs() < 1e-9);
        assert!((bmi_value(100.0, 200.0) - 25.0).abs() < 1e-12);
    }

    #[test]
    fn test_bmi_monotonic_in_weight_and_inverse_in_height() {
        for height in [120.0, 150.0, 170.0, 210.0] {
            let mut previous = 0.0;
            for weight in [30.0, 60.0, 90.0, 200.0] {
                let value = bmi_value(weight, height);
                assert!(value > previous);
                previous = value;
                assert!((value * (height / 100.0_f64).powi(2) - weight).abs() < 1e-9);
            }
        }
        assert!(bmi_value(70.0, 150.0) > bmi_value(70.0, 190.0));
    }

    #[test]
    fn test_no_category_without_adt() {
        for therapy in [0.0, 1.0] {
            for other in [0.0, 1.0] {
                let flags = TreatmentFlags::classify(Some(0.0), Some(therapy), Some(other));
                assert_eq!(flags, TreatmentFlags::default());
            }
        }
    }

    #[test]
    fn test_exactly_one_category_with_adt() {
        let cases = [
            (0.0, 0.0, TreatmentCategory::AdtOnly),
            (1.0, 0.0, TreatmentCategory::Conventional),
            (0.0, 1.0, TreatmentCategory::Augmented),
            (1.0, 1.0, TreatmentCategory::Augmented),
        ];
        for (therapy, other, expected) in cases {
            let flags = TreatmentFlags::classify(Some(1.0), Some(therapy), Some(other));
            let fired = TreatmentCategory::ALL.iter().filter(|c| flags.get(**c)).count();
            assert_eq!(fired, 1, "therapy={therapy} other={other}");
            assert!(flags.get(expected));
        }
    }

    #[test]
    fn test_missing_flags_match_no_rule() {
        let flags = TreatmentFlags::classify(Some(1.0), None, None);
        assert_eq!(flags, TreatmentFlags::default());
    }

    #[test]
    fn test_compound_flag_any_and_all() {
        let b = batch(vec![
            ("a", Arc::new(Int64Array::from(vec![Some(0), Some(1), None])) as ArrayRef),
            ("b", Arc::new(Float64Array::from(vec![Some(0.0), Some(1.0), Some(1.0)]))),
        ]);
        let cols = vec!["a".to_string(), "b".to_string()];

        let any = compound_flag(&b, &cols, "ab", Reduction::Any).unwrap();
        assert_eq!(
            column_i64(&any, "ab", "t").unwrap(),
            vec![Some(0), Some(1), Some(1)]
        );

        let all = compound_flag(&b, &cols, "ab", Reduction::All).unwrap();
        assert_eq!(
            column_i64(&all, "ab", "t").unwrap(),
            vec![Some(0), Some(1), Some(0)]
        );
    }

    #[test]
    fn test_symptom_severity_sums_marked_columns() {
        let b = batch(vec![
            ("symptom_1", Arc::new(Int64Array::from(vec![Some(1), Some(2)])) as ArrayRef),
            ("symptom_2", Arc::new(Int64Array::from(vec![Some(3), None]))),
            ("height", Arc::new(Int64Array::from(vec![Some(170), Some(180)]))),
        ]);
        let out = symptom_severity(&b, "symptom_").unwrap();
        assert_eq!(
            column_i64(&out, SYMPTOM_SEVERITY, "t").unwrap(),
            vec![Some(4), None]
        );

        // Recomputing must not fold the previous result into the sum
        let again = symptom_severity(&out, "symptom_").unwrap();
        assert_eq!(
            column_i64(&again, SYMPTOM_SEVERITY, "t").unwrap(),
            vec![Some(4), None]
        );
    }

    #[test]
    fn test_gender_recode() {
        for female in ["Female", "female", "F"] {
            assert_eq!(recode_gender_value(Some(female)), 0);
        }
        for other in ["Male", "M", ""] {
            assert_eq!(recode_gender_value(Some(other)), 1);
        }
        assert_eq!(recode_gender_value(None), 1);
    }

    #[test]
    fn test_race_recode() {
        assert_eq!(canonical_race("Chinese"), "Chinese");
        assert_eq!(canonical_race("chinese descent"), "Chinese");
        assert_eq!(canonical_race("South Indian"), "Indian");
        assert_eq!(canonical_race("Malay"), "Malay");
    }

    #[test]
    fn test_recode_demographics_columns() {
        let b = batch(vec![
            ("gender", Arc::new(StringArray::from(vec![Some("Female"), None])) as ArrayRef),
            ("race", Arc::new(StringArray::from(vec![Some("chinese"), None]))),
        ]);
        let out = recode_demographics(&b).unwrap();
        assert_eq!(column_i64(&out, "gender", "t").unwrap(), vec![Some(0), Some(1)]);
        assert_eq!(
            column_string(&out, "race", "t").unwrap(),
            vec![Some("Chinese".to_string()), None]
        );
    }
}
