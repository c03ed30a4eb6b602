use std::fs;
use std::path::Path;

use trial_prep::{PipelineConfig, Result};

/// Header of the clinical fixture table
pub const CLINICAL_HEADER: &str = "id,date_of_admission,date_of_discharge,\
medical_history_dia,medical_history_sud,medical_history_hbp,medical_history_ren,\
medical_history_tum,medical_history_anx,medical_history_mood,\
trt_anx,trt_con,trt_adt,trt_ssr,trt_the,trt_oth,\
symptom_1,symptom_2,weight,height,cgis_adm,cgis_dis,gaf_lv";

/// Header of the demographics fixture table
pub const DEMOGRAPHICS_HEADER: &str = "patient_id,gender,race,date_of_birth";

/// Year used for age derivation in tests
pub const YEAR: i32 = 2024;

/// One clinical encounter of a fixture
#[derive(Debug, Clone)]
pub struct Encounter {
    pub id: &'static str,
    pub admitted: &'static str,
    pub discharged: &'static str,
    pub hbp: &'static str,
    pub anxiety_history: u8,
    pub adt: u8,
    pub therapy: u8,
    pub other_med: u8,
    pub symptoms: [i64; 2],
    pub weight: f64,
    pub height: f64,
    pub cgis: (i64, i64),
    pub gaf: i64,
}

/// An untreated encounter with plausible defaults
#[must_use]
pub fn encounter(id: &'static str) -> Encounter {
    Encounter {
        id,
        admitted: "02/01/21",
        discharged: "12/01/21",
        hbp: "No",
        anxiety_history: 0,
        adt: 0,
        therapy: 0,
        other_med: 0,
        symptoms: [1, 1],
        weight: 70.0,
        height: 170.0,
        cgis: (5, 3),
        gaf: 40,
    }
}

impl Encounter {
    /// The encounter as a CSV line under [`CLINICAL_HEADER`]
    #[must_use]
    pub fn to_csv(&self) -> String {
        format!(
            "{},{},{},0,0,{},0,0,{},0,{},0,{},0,{},{},{},{},{},{},{},{},{}",
            self.id,
            self.admitted,
            self.discharged,
            self.hbp,
            self.anxiety_history,
            self.other_med,
            self.adt,
            self.therapy,
            self.other_med,
            self.symptoms[0],
            self.symptoms[1],
            self.weight,
            self.height,
            self.cgis.0,
            self.cgis.1,
            self.gaf
        )
    }
}

/// Write a table with `header` and `lines` to `dir/name`
pub fn write_table(dir: &Path, name: &str, header: &str, lines: &[String]) -> Result<()> {
    let mut content = String::from(header);
    for line in lines {
        content.push('\n');
        content.push_str(line);
    }
    content.push('\n');
    fs::write(dir.join(name), content)?;
    Ok(())
}

/// Write the clinical and demographics fixtures into `dir`
pub fn write_fixture(dir: &Path, encounters: &[Encounter], demographics: &[&str]) -> Result<()> {
    let clinical = encounters.iter().map(Encounter::to_csv).collect::<Vec<_>>();
    let people = demographics.iter().map(|d| (*d).to_string()).collect::<Vec<_>>();
    write_table(dir, "clinical.csv", CLINICAL_HEADER, &clinical)?;
    write_table(dir, "demographics.csv", DEMOGRAPHICS_HEADER, &people)
}

/// Default configuration reading from and writing to `dir`
#[must_use]
pub fn test_config(dir: &Path) -> PipelineConfig {
    PipelineConfig::default().with_dataset_dir(dir)
}

/// Two patients: P1 treated conventionally then with antidepressants alone,
/// P2 with augmented medication
#[must_use]
pub fn two_patient_encounters() -> Vec<Encounter> {
    vec![
        Encounter {
            adt: 1,
            therapy: 1,
            hbp: "Yes",
            symptoms: [2, 3],
            cgis: (6, 2),
            gaf: 35,
            ..encounter("P1")
        },
        Encounter {
            admitted: "01/03/21",
            discharged: "06/03/21",
            adt: 1,
            weight: 75.0,
            cgis: (4, 3),
            gaf: 50,
            ..encounter("P1")
        },
        Encounter {
            adt: 1,
            other_med: 1,
            anxiety_history: 1,
            symptoms: [4, 4],
            weight: 60.0,
            height: 160.0,
            ..encounter("P2")
        },
    ]
}

/// Demographic rows matching [`two_patient_encounters`]
pub const TWO_PATIENT_DEMOGRAPHICS: [&str; 2] = [
    "P1,Female,chinese,1980-05-01",
    "P2,Male,Malay,1990-07-15",
];
