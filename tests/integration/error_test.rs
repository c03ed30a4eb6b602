use std::fs;

use crate::utils::{
    CLINICAL_HEADER, DEMOGRAPHICS_HEADER, TWO_PATIENT_DEMOGRAPHICS, YEAR, encounter, test_config,
    two_patient_encounters, write_fixture, write_table,
};
use trial_prep::{Pipeline, PipelineConfig, PipelineError};

/// An empty input directory is reported as absent input
#[test]
fn test_empty_directory() -> trial_prep::Result<()> {
    let dir = tempfile::tempdir()?;
    let result = Pipeline::new(test_config(dir.path())).run_for_year(".csv", YEAR);
    assert!(matches!(result, Err(PipelineError::InputAbsent(_))));
    Ok(())
}

/// Files with other extensions are not picked up
#[test]
fn test_no_matching_extension() -> trial_prep::Result<()> {
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join("notes.txt"), "gender,trt_adt\n")?;
    let result = Pipeline::new(test_config(dir.path())).run_for_year(".csv", YEAR);
    assert!(matches!(result, Err(PipelineError::InputAbsent(_))));
    Ok(())
}

/// A missing clinical table fails selection and writes nothing
#[test]
fn test_no_clinical_table() -> trial_prep::Result<()> {
    let dir = tempfile::tempdir()?;
    let people = TWO_PATIENT_DEMOGRAPHICS.map(str::to_string);
    write_table(dir.path(), "demographics.csv", DEMOGRAPHICS_HEADER, &people)?;

    let config = test_config(dir.path());
    let output = config.output_path();
    let result = Pipeline::new(config).run_for_year(".csv", YEAR);

    match result {
        Err(PipelineError::NoMatchingTable { needle }) => assert_eq!(needle, "trt_adt"),
        other => panic!("expected NoMatchingTable, got {other:?}"),
    }
    assert!(!output.exists());
    Ok(())
}

/// An admission date in the wrong format aborts the run
#[test]
fn test_unparseable_date() -> trial_prep::Result<()> {
    let dir = tempfile::tempdir()?;
    let encounters = vec![crate::utils::Encounter {
        admitted: "31/02/21",
        ..encounter("P1")
    }];
    write_fixture(dir.path(), &encounters, &TWO_PATIENT_DEMOGRAPHICS)?;

    let result = Pipeline::new(test_config(dir.path())).run_for_year(".csv", YEAR);
    match result {
        Err(PipelineError::Parse { column, value, .. }) => {
            assert_eq!(column, "date_of_admission");
            assert_eq!(value, "31/02/21");
        }
        other => panic!("expected Parse, got {other:?}"),
    }
    Ok(())
}

/// ISO dates are checked against the configured day/month/year format
#[test]
fn test_iso_dates_rejected_by_default_format() -> trial_prep::Result<()> {
    let dir = tempfile::tempdir()?;
    let encounters = vec![crate::utils::Encounter {
        admitted: "2021-01-02",
        discharged: "2021-01-12",
        ..encounter("P1")
    }];
    write_fixture(dir.path(), &encounters, &TWO_PATIENT_DEMOGRAPHICS)?;

    let config = test_config(dir.path());
    let output = config.output_path();
    let result = Pipeline::new(config).run_for_year(".csv", YEAR);
    match result {
        Err(PipelineError::Parse { column, value, format }) => {
            assert_eq!(column, "date_of_admission");
            assert_eq!(value, "2021-01-02");
            assert_eq!(format, "%d/%m/%y");
        }
        other => panic!("expected Parse, got {other:?}"),
    }
    assert!(!output.exists());
    Ok(())
}

/// ISO dates load once the configured format matches them
#[test]
fn test_iso_dates_accepted_with_matching_format() -> trial_prep::Result<()> {
    let dir = tempfile::tempdir()?;
    let encounters = vec![crate::utils::Encounter {
        admitted: "2021-01-02",
        discharged: "2021-01-12",
        ..encounter("P1")
    }];
    write_fixture(dir.path(), &encounters, &TWO_PATIENT_DEMOGRAPHICS)?;

    let config = PipelineConfig {
        admission_date_format: "%Y-%m-%d".to_string(),
        ..test_config(dir.path())
    };
    let report = Pipeline::new(config).run_for_year(".csv", YEAR)?;
    let records = trial_prep::read_dataset(&report.output_path)?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].ips_duration_mean, Some(10.0));
    Ok(())
}

/// A non-numeric measurement is a cast failure
#[test]
fn test_non_numeric_weight() -> trial_prep::Result<()> {
    let dir = tempfile::tempdir()?;
    let line = encounter("P1").to_csv().replace(",70,170,", ",heavy,170,");
    write_table(dir.path(), "clinical.csv", CLINICAL_HEADER, &[line])?;
    let people = TWO_PATIENT_DEMOGRAPHICS.map(str::to_string);
    write_table(dir.path(), "demographics.csv", DEMOGRAPHICS_HEADER, &people)?;

    let result = Pipeline::new(test_config(dir.path())).run_for_year(".csv", YEAR);
    match result {
        Err(PipelineError::TypeCast { column, value }) => {
            assert_eq!(column, "weight");
            assert_eq!(value, "heavy");
        }
        other => panic!("expected TypeCast, got {other:?}"),
    }
    Ok(())
}

/// A clinical table lacking a required column is a schema error
#[test]
fn test_missing_required_column() -> trial_prep::Result<()> {
    let dir = tempfile::tempdir()?;
    write_fixture(dir.path(), &two_patient_encounters(), &TWO_PATIENT_DEMOGRAPHICS)?;
    let clinical = fs::read_to_string(dir.path().join("clinical.csv"))?;
    let without_gaf: String = clinical
        .lines()
        .map(|line| {
            let (rest, _) = line.rsplit_once(',').unwrap_or((line, ""));
            format!("{rest}\n")
        })
        .collect();
    fs::write(dir.path().join("clinical.csv"), without_gaf)?;

    let result = Pipeline::new(test_config(dir.path())).run_for_year(".csv", YEAR);
    match result {
        Err(PipelineError::Schema(message)) => assert!(message.contains("gaf_lv")),
        other => panic!("expected Schema, got {other:?}"),
    }
    Ok(())
}
