use std::fmt;
use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use polars::prelude::PolarsError;
use serde_json::json;
use thiserror::Error;

/// One field that fell outside its declared domain.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldViolation {
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    NotAllowed {
        field: &'static str,
        value: f64,
        allowed: &'static [i32],
    },
    NotInteger {
        field: &'static str,
        value: f64,
    },
    NotANumber {
        field: &'static str,
        text: String,
    },
    Missing {
        field: &'static str,
    },
}

impl FieldViolation {
    pub fn field(&self) -> &'static str {
        match self {
            FieldViolation::OutOfRange { field, .. }
            | FieldViolation::NotAllowed { field, .. }
            | FieldViolation::NotInteger { field, .. }
            | FieldViolation::NotANumber { field, .. }
            | FieldViolation::Missing { field } => *field,
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldViolation::OutOfRange {
                field,
                value,
                min,
                max,
            } => write!(f, "{field} = {value} is outside [{min}, {max}]"),
            FieldViolation::NotAllowed {
                field,
                value,
                allowed,
            } => write!(f, "{field} = {value} is not one of {allowed:?}"),
            FieldViolation::NotInteger { field, value } => {
                write!(f, "{field} = {value} is not a whole number")
            }
            FieldViolation::NotANumber { field, text } => {
                write!(f, "{field} = {text:?} is not a number")
            }
            FieldViolation::Missing { field } => write!(f, "{field} is missing"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid patient record{}: {}", row_suffix(.row), join_violations(.violations))]
pub struct ValidationError {
    /// Zero-based row, set when the record came from a batch file.
    pub row: Option<usize>,
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub fn at_row(mut self, row: usize) -> Self {
        self.row = Some(row);
        self
    }
}

fn row_suffix(row: &Option<usize>) -> String {
    match row {
        Some(row) => format!(" at row {row}"),
        None => String::new(),
    }
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("failed to read artifact {path:?}")]
    ArtifactRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse artifact {path:?}")]
    ArtifactParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("artifact {name} is invalid: {reason}")]
    InvalidArtifact { name: &'static str, reason: String },

    #[error("shape mismatch in {stage}: expected {expected} columns, got {got}")]
    ShapeMismatch {
        stage: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("classifier returned {got} outputs for {expected} rows")]
    OutputLength { expected: usize, got: usize },

    #[error("classifier produced an invalid output: {reason}")]
    InvalidOutput { reason: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unsupported file format for {path:?}")]
    UnsupportedFormat { path: PathBuf },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A request body that could not be read as fields at all.
    #[error("malformed request: {0}")]
    BadRequest(String),

    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON processing error")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("table processing error")]
    Polars {
        #[from]
        source: PolarsError,
    },
}

impl AppError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) | AppError::Json { .. } => {
                StatusCode::BAD_REQUEST
            }
            AppError::Inference(_)
            | AppError::Config(_)
            | AppError::Io { .. }
            | AppError::Polars { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_failure",
            AppError::Inference(_) => "inference_failure",
            AppError::Config(_) => "configuration_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::Io { .. } => "io_error",
            AppError::Json { .. } => "json_error",
            AppError::Polars { .. } => "table_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_type = self.error_type();
        // inference details stay in the log
        let message = match &self {
            AppError::Inference(e) => {
                log::error!("inference failed: {e}");
                "prediction failed, please try again".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}
