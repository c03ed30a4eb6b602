use crate::utils::{
    TWO_PATIENT_DEMOGRAPHICS, YEAR, encounter, test_config, two_patient_encounters, write_fixture,
};
use trial_prep::derive::{Reduction, bmi_value};
use trial_prep::{CohortSummary, Pipeline, PatientRecord, TreatmentCategory, prepare, read_dataset};

fn by_id<'a>(records: &'a [PatientRecord], id: &str) -> &'a PatientRecord {
    records
        .iter()
        .find(|r| r.id == id)
        .unwrap_or_else(|| panic!("no record for {id}"))
}

/// Full run over CSV fixtures writes one aggregated row per patient
#[test]
fn test_end_to_end_run() -> trial_prep::Result<()> {
    let dir = tempfile::tempdir()?;
    write_fixture(dir.path(), &two_patient_encounters(), &TWO_PATIENT_DEMOGRAPHICS)?;

    let report = Pipeline::new(test_config(dir.path())).run_for_year(".csv", YEAR)?;
    assert_eq!(report.tables, 2);
    assert_eq!(report.encounters, 3);
    assert_eq!(report.patients, 2);
    assert_eq!(report.records, 2);
    assert!(report.output_path.exists());

    let records = read_dataset(&report.output_path)?;
    assert_eq!(records.len(), 2);

    let p1 = by_id(&records, "P1");
    assert_eq!(p1.treatment_conv_cur, 1);
    assert_eq!(p1.treatment_adt_only_cur, 1);
    assert_eq!(p1.treatment_aug_cur, 0);
    assert_eq!(p1.history_phys_24, 1);
    assert_eq!(p1.history_mh_24, 0);
    assert!((p1.bmi_cur.unwrap() - bmi_value(75.0, 170.0)).abs() < 1e-9);
    assert_eq!(p1.ips_duration_mean, Some(7.5));
    assert_eq!(p1.cgis_change_mean, Some(-2.5));
    assert_eq!(p1.symptom_severity_cur, Some(5));
    assert_eq!(p1.gaf_lv_24, Some(50.0));
    assert_eq!(p1.gender, 0);
    assert_eq!(p1.race.as_deref(), Some("Chinese"));
    assert_eq!(p1.age_years, Some(44));

    let p2 = by_id(&records, "P2");
    assert_eq!(p2.treatment_aug_cur, 1);
    assert_eq!(p2.treatment_conv_cur, 0);
    assert_eq!(p2.treatment_adt_only_cur, 0);
    assert_eq!(p2.history_mh_24, 1);
    assert_eq!(p2.symptom_severity_cur, Some(8));
    assert_eq!(p2.gender, 1);
    assert_eq!(p2.race.as_deref(), Some("Malay"));
    assert_eq!(p2.age_years, Some(34));

    Ok(())
}

/// A second run replaces the dataset with identical content
#[test]
fn test_rerun_overwrites_dataset() -> trial_prep::Result<()> {
    let dir = tempfile::tempdir()?;
    write_fixture(dir.path(), &two_patient_encounters(), &TWO_PATIENT_DEMOGRAPHICS)?;
    let pipeline = Pipeline::new(test_config(dir.path()));

    let first = pipeline.run_for_year(".csv", YEAR)?;
    let first_records = read_dataset(&first.output_path)?;
    let second = pipeline.run_for_year(".csv", YEAR)?;
    let second_records = read_dataset(&second.output_path)?;

    assert_eq!(first, second);
    assert_eq!(first_records, second_records);
    Ok(())
}

/// Reordering the encounter rows does not change the dataset
#[test]
fn test_aggregation_ignores_row_order() -> trial_prep::Result<()> {
    let encounters = two_patient_encounters();
    let mut shuffled = encounters.clone();
    shuffled.reverse();
    shuffled.swap(0, 1);

    let ordered_dir = tempfile::tempdir()?;
    write_fixture(ordered_dir.path(), &encounters, &TWO_PATIENT_DEMOGRAPHICS)?;
    let shuffled_dir = tempfile::tempdir()?;
    let mut demographics = TWO_PATIENT_DEMOGRAPHICS;
    demographics.reverse();
    write_fixture(shuffled_dir.path(), &shuffled, &demographics)?;

    let a = Pipeline::new(test_config(ordered_dir.path())).run_for_year(".csv", YEAR)?;
    let b = Pipeline::new(test_config(shuffled_dir.path())).run_for_year(".csv", YEAR)?;

    assert_eq!(read_dataset(&a.output_path)?, read_dataset(&b.output_path)?);
    Ok(())
}

/// Repeated demographic rows collapse to one record; unmatched patients drop
#[test]
fn test_join_deduplicates_and_drops_unmatched() -> trial_prep::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut encounters = two_patient_encounters();
    encounters.push(encounter("P3"));
    let demographics = [
        TWO_PATIENT_DEMOGRAPHICS[0],
        TWO_PATIENT_DEMOGRAPHICS[0],
        TWO_PATIENT_DEMOGRAPHICS[1],
        "P9,Female,Indian,1970-01-01",
    ];
    write_fixture(dir.path(), &encounters, &demographics)?;

    let report = Pipeline::new(test_config(dir.path())).run_for_year(".csv", YEAR)?;
    assert_eq!(report.encounters, 4);
    assert_eq!(report.patients, 2);
    assert_eq!(report.records, 2);
    let records = read_dataset(&report.output_path)?;

    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["P1", "P2"]);
    Ok(())
}

/// A compound group configured with `all` needs every constituent flag
#[test]
fn test_configured_group_reduction() -> trial_prep::Result<()> {
    let dir = tempfile::tempdir()?;
    write_fixture(dir.path(), &two_patient_encounters(), &TWO_PATIENT_DEMOGRAPHICS)?;

    let mut config = test_config(dir.path());
    for group in &mut config.features.compound_groups {
        if group.name == "history_phys" {
            group.reduction = Reduction::All;
        }
    }
    let report = Pipeline::new(config).run_for_year(".csv", YEAR)?;
    let records = read_dataset(&report.output_path)?;

    // P1 reports high blood pressure only
    assert_eq!(by_id(&records, "P1").history_phys_24, 0);
    assert_eq!(by_id(&records, "P2").history_mh_24, 1);
    Ok(())
}

/// Summary and modelling preparation run on the written dataset
#[test]
fn test_downstream_on_written_dataset() -> trial_prep::Result<()> {
    let dir = tempfile::tempdir()?;
    write_fixture(dir.path(), &two_patient_encounters(), &TWO_PATIENT_DEMOGRAPHICS)?;
    let config = test_config(dir.path());
    let seed = config.random_state;

    let report = Pipeline::new(config).run_for_year(".csv", YEAR)?;
    let records = read_dataset(&report.output_path)?;

    let summary = CohortSummary::from_records(&records);
    assert_eq!(summary.patients, 2);
    assert_eq!(summary.multi_category, vec!["P1".to_string()]);
    assert_eq!(summary.category_counts[&TreatmentCategory::Augmented], 1);

    let splits = prepare(&records, seed)?;
    assert_eq!(splits.train.len(), 2);
    assert!(splits.test.is_empty());
    assert!(splits.valid.is_empty());
    Ok(())
}
