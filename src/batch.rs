use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::ValueEnum;
use polars::prelude::*;
use polars_io::parquet::ParquetWriter;

use crate::error::{AppError, ConfigError};
use crate::evaluator::{RiskEvaluator, RiskResult};
use crate::records::{records_frame, records_from_frame, PatientRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TableFormat {
    Csv,
    Parquet,
}

impl TableFormat {
    /// Format implied by the file extension.
    pub fn infer(path: &Path) -> Result<Self, ConfigError> {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("csv") => Ok(TableFormat::Csv),
            Some("parquet") | Some("pq") => Ok(TableFormat::Parquet),
            _ => Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }
}

pub fn read_parquet(path: &Path) -> Result<DataFrame, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::io(format!("cannot open {}", path.display()), e))?;
    Ok(ParquetReader::new(file).finish()?)
}

pub fn read_csv(path: &Path) -> Result<DataFrame, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::io(format!("cannot open {}", path.display()), e))?;
    Ok(CsvReader::new(file)
        .has_header(true)
        .with_dtypes(Some(Arc::new(PatientRecord::raw_schema())))
        .finish()?)
}

pub fn write_csv(path: &Path, df: &mut DataFrame) -> Result<(), AppError> {
    let mut file = File::create(path)
        .map_err(|e| AppError::io(format!("cannot create {}", path.display()), e))?;
    CsvWriter::new(&mut file).finish(df)?;
    Ok(())
}

pub fn write_parquet(path: &Path, df: &mut DataFrame) -> Result<(), AppError> {
    let mut file = File::create(path)
        .map_err(|e| AppError::io(format!("cannot create {}", path.display()), e))?;
    ParquetWriter::new(&mut file).finish(df)?;
    Ok(())
}

/// Input table plus the `label`, `probability` and `risk_tier` columns.
pub fn results_frame(
    records: &[PatientRecord],
    results: &[RiskResult],
) -> PolarsResult<DataFrame> {
    let mut df = records_frame(records)?;
    let labels: Vec<i32> = results.iter().map(|r| i32::from(r.label)).collect();
    let probabilities: Vec<f64> = results.iter().map(|r| r.probability).collect();
    let tiers: Vec<&str> = results.iter().map(|r| r.tier.as_str()).collect();
    df.with_column(Series::new("label", labels))?;
    df.with_column(Series::new("probability", probabilities))?;
    df.with_column(Series::new("risk_tier", tiers))?;
    Ok(df)
}

#[derive(Debug, Clone)]
pub struct BatchJob {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Output format; inferred from `output` when unset.
    pub format: Option<TableFormat>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub rows: usize,
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

impl BatchSummary {
    fn from_results(results: &[RiskResult]) -> Self {
        use crate::evaluator::RiskTier;
        results.iter().fold(
            Self {
                rows: results.len(),
                ..Self::default()
            },
            |mut acc, r| {
                match r.tier {
                    RiskTier::Low => acc.low += 1,
                    RiskTier::Medium => acc.medium += 1,
                    RiskTier::High => acc.high += 1,
                }
                acc
            },
        )
    }
}

/// Reads, validates and evaluates every row of `job.input`, then writes the results.
pub fn run_batch(evaluator: &RiskEvaluator, job: &BatchJob) -> Result<BatchSummary, AppError> {
    let input_format = TableFormat::infer(&job.input)?;
    let output_format = match job.format {
        Some(format) => format,
        None => TableFormat::infer(&job.output)?,
    };

    let df = match input_format {
        TableFormat::Csv => read_csv(&job.input)?,
        TableFormat::Parquet => read_parquet(&job.input)?,
    };
    log::info!("read {} rows from {}", df.height(), job.input.display());

    let records = records_from_frame(&df)?;
    let results = evaluator.evaluate_batch(&records)?;
    let mut out = results_frame(&records, &results)?;

    match output_format {
        TableFormat::Csv => write_csv(&job.output, &mut out)?,
        TableFormat::Parquet => write_parquet(&job.output, &mut out)?,
    }

    let summary = BatchSummary::from_results(&results);
    log::info!(
        "wrote {} rows to {} (low {}, medium {}, high {})",
        summary.rows,
        job.output.display(),
        summary.low,
        summary.medium,
        summary.high
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FieldViolation;
    use crate::model::{LogisticModel, StandardScaler};
    use crate::records::{sample, FEATURE_COUNT};
    use std::fs;

    /// Age-driven model: age 45 is high risk, age 30 is low risk.
    fn evaluator() -> RiskEvaluator {
        let mut coefficients = vec![0.0; FEATURE_COUNT];
        coefficients[0] = 1.0;
        RiskEvaluator::new(
            Box::new(StandardScaler {
                mean: vec![40.0; FEATURE_COUNT],
                scale: vec![1.0; FEATURE_COUNT],
            }),
            Box::new(LogisticModel {
                coefficients,
                intercept: 0.0,
                threshold: 0.5,
            }),
        )
    }

    const HEADER: &str = "age,sex,chest_pain_type,resting_bp,cholesterol,fasting_blood_sugar_high,\
resting_ecg,max_heart_rate,exercise_angina,st_depression,st_slope,major_vessels,thalassemia";

    #[test]
    fn formats_are_inferred_from_extensions() {
        assert_eq!(
            TableFormat::infer(Path::new("a/b.CSV")).unwrap(),
            TableFormat::Csv
        );
        assert_eq!(
            TableFormat::infer(Path::new("out.parquet")).unwrap(),
            TableFormat::Parquet
        );
        assert!(TableFormat::infer(Path::new("out.xlsx")).is_err());
    }

    #[test]
    fn csv_batch_writes_risk_columns() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("patients.csv");
        fs::write(
            &input,
            format!(
                "{HEADER}\n45,1,2,130,250,0,1,160,0,1.2,1,0,3\n30,0,0,120,200,0,0,150,0,1.0,0,0,3\n"
            ),
        )
        .unwrap();
        let job = BatchJob {
            input,
            output: dir.path().join("scored.csv"),
            format: None,
        };

        let summary = run_batch(&evaluator(), &job).unwrap();
        assert_eq!(
            summary,
            BatchSummary {
                rows: 2,
                low: 1,
                medium: 0,
                high: 1
            }
        );

        let written = read_csv(&job.output).unwrap();
        assert_eq!(written.height(), 2);
        let tiers: Vec<Option<&str>> = written
            .column("risk_tier")
            .unwrap()
            .utf8()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(tiers, vec![Some("High Risk"), Some("Low Risk")]);
    }

    #[test]
    fn parquet_output_round_trips_records() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("patients.parquet");
        let mut df = records_frame(&[sample(), PatientRecord::default()]).unwrap();
        write_parquet(&input, &mut df).unwrap();

        let job = BatchJob {
            input,
            output: dir.path().join("scored.bin"),
            format: Some(TableFormat::Parquet),
        };
        run_batch(&evaluator(), &job).unwrap();

        let written = read_parquet(&job.output).unwrap();
        assert_eq!(
            records_from_frame(&written).unwrap(),
            vec![sample(), PatientRecord::default()]
        );
        assert!(written.column("probability").is_ok());
    }

    #[test]
    fn invalid_row_is_reported_with_its_index() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("patients.csv");
        fs::write(
            &input,
            format!(
                "{HEADER}\n45,1,2,130,250,0,1,160,0,1.2,1,0,3\n45,1,2,130,250,0,1,160,0,1.2,1,0,4\n"
            ),
        )
        .unwrap();
        let job = BatchJob {
            input,
            output: dir.path().join("scored.csv"),
            format: None,
        };

        match run_batch(&evaluator(), &job) {
            Err(AppError::Validation(err)) => {
                assert_eq!(err.row, Some(1));
                assert!(matches!(
                    err.violations[0],
                    FieldViolation::NotAllowed {
                        field: "thalassemia",
                        ..
                    }
                ));
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
        assert!(!job.output.exists());
    }

    #[test]
    fn malformed_csv_cells_fail_validation_with_their_row() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("patients.csv");
        fs::write(
            &input,
            format!(
                "{HEADER}\n45,1,2,130,250,0,1,160,0,1.2,1,0,3\n45.5,1,2,abc,250,0,1,160,0,1.2,1,,3\n"
            ),
        )
        .unwrap();
        let job = BatchJob {
            input,
            output: dir.path().join("scored.csv"),
            format: None,
        };

        match run_batch(&evaluator(), &job) {
            Err(AppError::Validation(err)) => {
                assert_eq!(err.row, Some(1));
                assert_eq!(
                    err.violations,
                    vec![
                        FieldViolation::NotInteger {
                            field: "age",
                            value: 45.5
                        },
                        FieldViolation::NotANumber {
                            field: "resting_bp",
                            text: "abc".to_string()
                        },
                        FieldViolation::Missing {
                            field: "major_vessels"
                        },
                    ]
                );
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }
}
