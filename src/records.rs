use polars::prelude::{DataFrame, DataType, Field, NamedFrom, PolarsResult, Schema, Series};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, FieldViolation, ValidationError};

pub const FEATURE_COUNT: usize = 13;

/// Admissible values of one record field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Domain {
    /// Whole numbers in `[min, max]`.
    Range { min: i32, max: i32 },
    /// One of a closed set of codes.
    Choices(&'static [i32]),
    /// Real numbers in `[min, max]`.
    Continuous { min: f64, max: f64 },
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub domain: Domain,
    /// Display names for `Choices` codes, in code order. Empty shows the codes.
    pub option_labels: &'static [&'static str],
}

impl FieldSpec {
    const fn new(name: &'static str, label: &'static str, domain: Domain) -> Self {
        Self {
            name,
            label,
            domain,
            option_labels: &[],
        }
    }

    /// Display text for one admissible code.
    pub fn option_label(&self, code: i32) -> String {
        if let Domain::Choices(codes) = self.domain {
            if let Some(idx) = codes.iter().position(|c| *c == code) {
                if let Some(label) = self.option_labels.get(idx) {
                    return (*label).to_string();
                }
            }
        }
        code.to_string()
    }

    pub fn is_integral(&self) -> bool {
        !matches!(self.domain, Domain::Continuous { .. })
    }

    fn check(&self, value: f64) -> Option<FieldViolation> {
        if self.is_integral() && value.fract() != 0.0 {
            return Some(FieldViolation::NotInteger {
                field: self.name,
                value,
            });
        }
        match self.domain {
            Domain::Range { min, max } => {
                let (min, max) = (f64::from(min), f64::from(max));
                (!(min..=max).contains(&value)).then_some(FieldViolation::OutOfRange {
                    field: self.name,
                    value,
                    min,
                    max,
                })
            }
            Domain::Continuous { min, max } => {
                (!(min..=max).contains(&value)).then_some(FieldViolation::OutOfRange {
                    field: self.name,
                    value,
                    min,
                    max,
                })
            }
            Domain::Choices(allowed) => (!allowed.iter().any(|c| f64::from(*c) == value))
                .then_some(FieldViolation::NotAllowed {
                    field: self.name,
                    value,
                    allowed,
                }),
        }
    }
}

/// The pipeline column order. The scaler and classifier see positions only,
/// so this table and `PatientRecord::features` must agree.
pub static FIELDS: [FieldSpec; FEATURE_COUNT] = [
    FieldSpec::new("age", "Age", Domain::Range { min: 18, max: 90 }),
    FieldSpec {
        option_labels: &["Female", "Male"],
        ..FieldSpec::new("sex", "Sex", Domain::Choices(&[0, 1]))
    },
    FieldSpec::new(
        "chest_pain_type",
        "Chest Pain Type (0-3)",
        Domain::Choices(&[0, 1, 2, 3]),
    ),
    FieldSpec::new(
        "resting_bp",
        "Resting Blood Pressure (mmHg)",
        Domain::Range { min: 90, max: 200 },
    ),
    FieldSpec::new(
        "cholesterol",
        "Cholesterol (mg/dl)",
        Domain::Range { min: 100, max: 400 },
    ),
    FieldSpec::new(
        "fasting_blood_sugar_high",
        "Fasting Blood Sugar > 120 mg/dl?",
        Domain::Choices(&[0, 1]),
    ),
    FieldSpec::new(
        "resting_ecg",
        "Resting ECG (0-2)",
        Domain::Choices(&[0, 1, 2]),
    ),
    FieldSpec::new(
        "max_heart_rate",
        "Max Heart Rate Achieved",
        Domain::Range { min: 60, max: 200 },
    ),
    FieldSpec::new(
        "exercise_angina",
        "Exercise Induced Angina?",
        Domain::Choices(&[0, 1]),
    ),
    FieldSpec::new(
        "st_depression",
        "ST depression induced by exercise",
        Domain::Continuous { min: 0.0, max: 6.0 },
    ),
    FieldSpec::new(
        "st_slope",
        "Slope of ST segment (0-2)",
        Domain::Choices(&[0, 1, 2]),
    ),
    FieldSpec::new(
        "major_vessels",
        "Number of major vessels (0-3)",
        Domain::Range { min: 0, max: 3 },
    ),
    FieldSpec::new(
        "thalassemia",
        "Thalassemia (3,6,7)",
        Domain::Choices(&[3, 6, 7]),
    ),
];

/// Thirteen clinical measurements of one patient.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub age: i32,
    /// 0 = female, 1 = male
    pub sex: i32,
    pub chest_pain_type: i32,
    pub resting_bp: i32,
    pub cholesterol: i32,
    pub fasting_blood_sugar_high: i32,
    pub resting_ecg: i32,
    pub max_heart_rate: i32,
    pub exercise_angina: i32,
    pub st_depression: f64,
    pub st_slope: i32,
    pub major_vessels: i32,
    pub thalassemia: i32,
}

impl Default for PatientRecord {
    /// The form's initial values.
    fn default() -> Self {
        Self {
            age: 30,
            sex: 0,
            chest_pain_type: 0,
            resting_bp: 120,
            cholesterol: 200,
            fasting_blood_sugar_high: 0,
            resting_ecg: 0,
            max_heart_rate: 150,
            exercise_angina: 0,
            st_depression: 1.0,
            st_slope: 0,
            major_vessels: 0,
            thalassemia: 3,
        }
    }
}

impl PatientRecord {
    /// Values in `FIELDS` order.
    pub fn features(&self) -> [f64; FEATURE_COUNT] {
        [
            f64::from(self.age),
            f64::from(self.sex),
            f64::from(self.chest_pain_type),
            f64::from(self.resting_bp),
            f64::from(self.cholesterol),
            f64::from(self.fasting_blood_sugar_high),
            f64::from(self.resting_ecg),
            f64::from(self.max_heart_rate),
            f64::from(self.exercise_angina),
            self.st_depression,
            f64::from(self.st_slope),
            f64::from(self.major_vessels),
            f64::from(self.thalassemia),
        ]
    }

    /// Builds a record from submitted text, looked up by field name. Every
    /// missing, non-numeric or out-of-domain field is reported.
    pub fn from_fields<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_cells(std::array::from_fn(|idx| {
            let spec = &FIELDS[idx];
            parse_cell(spec, lookup(spec.name).as_deref())
        }))
    }

    /// The form defaults overlaid with every submitted value that parses.
    pub fn prefill<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut values = Self::default().features();
        for (value, spec) in values.iter_mut().zip(FIELDS.iter()) {
            if let Ok(parsed) = parse_cell(spec, lookup(spec.name).as_deref()) {
                if parsed.is_finite() {
                    *value = parsed;
                }
            }
        }
        Self::from_features(values)
    }

    fn from_cells(
        cells: [Result<f64, FieldViolation>; FEATURE_COUNT],
    ) -> Result<Self, ValidationError> {
        let violations: Vec<FieldViolation> = FIELDS
            .iter()
            .zip(cells.iter())
            .filter_map(|(spec, cell)| match cell {
                Ok(value) => spec.check(*value),
                Err(violation) => Some(violation.clone()),
            })
            .collect();
        if !violations.is_empty() {
            return Err(ValidationError {
                row: None,
                violations,
            });
        }

        // every integral cell passed the whole-number check above
        Ok(Self::from_features(cells.map(|cell| cell.unwrap_or_default())))
    }

    fn from_features(v: [f64; FEATURE_COUNT]) -> Self {
        Self {
            age: v[0] as i32,
            sex: v[1] as i32,
            chest_pain_type: v[2] as i32,
            resting_bp: v[3] as i32,
            cholesterol: v[4] as i32,
            fasting_blood_sugar_high: v[5] as i32,
            resting_ecg: v[6] as i32,
            max_heart_rate: v[7] as i32,
            exercise_angina: v[8] as i32,
            st_depression: v[9],
            st_slope: v[10] as i32,
            major_vessels: v[11] as i32,
            thalassemia: v[12] as i32,
        }
    }

    /// Checks every field against its domain, reporting all offenders at once.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let violations: Vec<FieldViolation> = FIELDS
            .iter()
            .zip(self.features())
            .filter_map(|(spec, value)| spec.check(value))
            .collect();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                row: None,
                violations,
            })
        }
    }

    /// Column schema of a batch CSV file. Cells are read as text and parsed
    /// during validation, so a malformed cell is reported with its row.
    pub fn raw_schema() -> Schema {
        Schema::from_iter(FIELDS.iter().map(|spec| Field::new(spec.name, DataType::Utf8)))
    }
}

fn parse_cell(spec: &FieldSpec, text: Option<&str>) -> Result<f64, FieldViolation> {
    match text.map(str::trim).filter(|text| !text.is_empty()) {
        None => Err(FieldViolation::Missing { field: spec.name }),
        Some(text) => text.parse::<f64>().map_err(|_| FieldViolation::NotANumber {
            field: spec.name,
            text: text.to_string(),
        }),
    }
}

/// One row per record, one typed column per field.
pub fn records_frame(records: &[PatientRecord]) -> PolarsResult<DataFrame> {
    let rows: Vec<[f64; FEATURE_COUNT]> = records.iter().map(PatientRecord::features).collect();
    let columns: Vec<Series> = FIELDS
        .iter()
        .enumerate()
        .map(|(idx, spec)| {
            if spec.is_integral() {
                let values: Vec<i64> = rows.iter().map(|row| row[idx] as i64).collect();
                Series::new(spec.name, values)
            } else {
                let values: Vec<f64> = rows.iter().map(|row| row[idx]).collect();
                Series::new(spec.name, values)
            }
        })
        .collect();
    DataFrame::new(columns)
}

/// Reads every row of `df` as a validated record.
pub fn records_from_frame(df: &DataFrame) -> Result<Vec<PatientRecord>, AppError> {
    let present = df.get_column_names();
    let missing: Vec<FieldViolation> = FIELDS
        .iter()
        .filter(|spec| !present.contains(&spec.name))
        .map(|spec| FieldViolation::Missing { field: spec.name })
        .collect();
    if !missing.is_empty() {
        return Err(ValidationError {
            row: None,
            violations: missing,
        }
        .into());
    }

    let mut columns: Vec<Vec<Result<f64, FieldViolation>>> = Vec::with_capacity(FEATURE_COUNT);
    for spec in FIELDS.iter() {
        let series = df.column(spec.name)?;
        let cells = if series.dtype() == &DataType::Utf8 {
            series
                .utf8()?
                .into_iter()
                .map(|text| parse_cell(spec, text))
                .collect()
        } else {
            series
                .cast(&DataType::Float64)?
                .f64()?
                .into_iter()
                .map(|value| value.ok_or(FieldViolation::Missing { field: spec.name }))
                .collect()
        };
        columns.push(cells);
    }

    (0..df.height())
        .map(|row| {
            let cells = std::array::from_fn(|col| columns[col][row].clone());
            PatientRecord::from_cells(cells).map_err(|e| AppError::from(e.at_row(row)))
        })
        .collect()
}

/// The reference record used across the test modules.
#[cfg(test)]
pub(crate) fn sample() -> PatientRecord {
    PatientRecord {
        age: 45,
        sex: 1,
        chest_pain_type: 2,
        resting_bp: 130,
        cholesterol: 250,
        fasting_blood_sugar_high: 0,
        resting_ecg: 1,
        max_heart_rate: 160,
        exercise_angina: 0,
        st_depression: 1.2,
        st_slope: 1,
        major_vessels: 0,
        thalassemia: 3,
    }
}
