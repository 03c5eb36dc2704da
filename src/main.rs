mod batch;
mod config;
mod error;
mod evaluator;
mod model;
mod records;
mod render;
mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use env_logger::{Builder, Env};
use log::{debug, error, info, LevelFilter};

use batch::{BatchJob, TableFormat};
use config::{AppConfig, ArtifactArgs};
use error::AppError;
use records::PatientRecord;
use render::{Presenter, TextPresenter};
use server::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about = "Heart attack risk predictor", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    artifacts: ArtifactArgs,
    #[arg(short, long, action = clap::ArgAction::Count, global = true, help = "Verbose level")]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate one patient record given as flags
    Predict {
        #[command(flatten)]
        record: RecordArgs,
        #[arg(long, help = "Echo the submitted record as a table")]
        echo: bool,
        #[arg(long, help = "Print the result as JSON")]
        json: bool,
    },
    /// Evaluate every row of a CSV or Parquet file
    Batch {
        #[arg(short, long, help = "Input path (.csv or .parquet)")]
        input: PathBuf,
        #[arg(short, long, help = "Output path")]
        output: PathBuf,
        #[arg(short, long, value_enum, help = "Output format, inferred from the output extension by default")]
        format: Option<TableFormat>,
    },
    /// Serve the form and the JSON API over HTTP
    Serve {
        #[arg(long, env = "HEART_RISK_BIND", default_value = "127.0.0.1:8501")]
        bind: SocketAddr,
    },
}

/// The thirteen form fields. Defaults are the form's initial values.
#[derive(Args, Debug, Clone)]
struct RecordArgs {
    #[arg(long, default_value_t = 30)]
    age: i32,
    #[arg(long, default_value_t = 0, help = "0 = female, 1 = male")]
    sex: i32,
    #[arg(long, default_value_t = 0)]
    chest_pain_type: i32,
    #[arg(long, default_value_t = 120, help = "Resting blood pressure (mmHg)")]
    resting_bp: i32,
    #[arg(long, default_value_t = 200, help = "Cholesterol (mg/dl)")]
    cholesterol: i32,
    #[arg(long, default_value_t = 0, help = "Fasting blood sugar > 120 mg/dl")]
    fasting_blood_sugar_high: i32,
    #[arg(long, default_value_t = 0)]
    resting_ecg: i32,
    #[arg(long, default_value_t = 150)]
    max_heart_rate: i32,
    #[arg(long, default_value_t = 0)]
    exercise_angina: i32,
    #[arg(long, default_value_t = 1.0)]
    st_depression: f64,
    #[arg(long, default_value_t = 0)]
    st_slope: i32,
    #[arg(long, default_value_t = 0)]
    major_vessels: i32,
    #[arg(long, default_value_t = 3)]
    thalassemia: i32,
}

impl From<RecordArgs> for PatientRecord {
    fn from(args: RecordArgs) -> Self {
        Self {
            age: args.age,
            sex: args.sex,
            chest_pain_type: args.chest_pain_type,
            resting_bp: args.resting_bp,
            cholesterol: args.cholesterol,
            fasting_blood_sugar_high: args.fasting_blood_sugar_high,
            resting_ecg: args.resting_ecg,
            max_heart_rate: args.max_heart_rate,
            exercise_angina: args.exercise_angina,
            st_depression: args.st_depression,
            st_slope: args.st_slope,
            major_vessels: args.major_vessels,
            thalassemia: args.thalassemia,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let env = Env::new().filter("HEART_RISK_LOG");
    Builder::new()
        .filter(Some("heart_risk"), log_level)
        .parse_env(env)
        .init();

    debug!("Arguments {:#?}", cli);

    let config = AppConfig::new(&cli.artifacts);
    let evaluator = config.load_evaluator()?;

    match cli.command {
        Command::Predict { record, echo, json } => {
            let record = PatientRecord::from(record);
            let outcome = evaluator.assess(&record);
            if let Err(AppError::Inference(e)) = &outcome {
                error!("inference failed: {e}");
            }
            if json {
                match &outcome {
                    Ok(result) => println!("{}", serde_json::to_string_pretty(result)?),
                    Err(e) => eprintln!("{e}"),
                }
            } else {
                print!("{}", TextPresenter { echo_inputs: echo }.render(&record, &outcome));
            }
            if outcome.is_err() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Batch {
            input,
            output,
            format,
        } => {
            let start_time = Instant::now();
            let job = BatchJob {
                input,
                output,
                format,
            };
            batch::run_batch(&evaluator, &job)?;
            info!("batch finished in {:?}", start_time.elapsed());
        }
        Command::Serve { bind } => {
            let state = Arc::new(AppState { evaluator });
            server::serve(state, bind).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
