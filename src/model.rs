//! Scaler and classifier collaborators of the evaluator.
//!
//! Both are loaded once from JSON artifacts and shared read-only afterwards.
//! Artifacts are tagged by `kind`:
//!
//! ```json
//! { "kind": "standard", "mean": [..13], "scale": [..13] }
//! { "kind": "min_max", "min": [..13], "max": [..13] }
//! { "kind": "logistic", "coefficients": [..13], "intercept": -0.2, "threshold": 0.5 }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::arrays::{Array, MutArray};
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::error::InferenceError;
use crate::records::FEATURE_COUNT;

/// Feature normalization applied before classification.
pub trait FeatureScaler: Send + Sync {
    /// Maps an n x 13 matrix of raw features to an n x 13 matrix of scaled ones.
    fn transform(&self, x: &DenseMatrix<f64>) -> Result<DenseMatrix<f64>, InferenceError>;
}

/// Binary heart-disease classifier.
pub trait RiskClassifier: Send + Sync {
    /// One label per row, 0 = no disease, 1 = disease.
    fn predict(&self, x: &DenseMatrix<f64>) -> Result<Vec<u8>, InferenceError>;

    /// Probability of the disease class per row, in `[0, 1]`.
    fn predict_proba(&self, x: &DenseMatrix<f64>) -> Result<Vec<f64>, InferenceError>;
}

fn check_columns(x: &DenseMatrix<f64>, stage: &'static str) -> Result<(usize, usize), InferenceError> {
    let (nrows, ncols) = x.shape();
    if ncols != FEATURE_COUNT {
        return Err(InferenceError::ShapeMismatch {
            stage,
            expected: FEATURE_COUNT,
            got: ncols,
        });
    }
    Ok((nrows, ncols))
}

fn check_vector(name: &'static str, field: &str, values: &[f64]) -> Result<(), InferenceError> {
    if values.len() != FEATURE_COUNT {
        return Err(InferenceError::InvalidArtifact {
            name,
            reason: format!(
                "{field} has {} entries, expected {FEATURE_COUNT}",
                values.len()
            ),
        });
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(InferenceError::InvalidArtifact {
            name,
            reason: format!("{field} contains a non-finite value"),
        });
    }
    Ok(())
}

/// Applies `(x - offset[c]) / divisor[c]` column-wise. A zero divisor acts as 1.
fn affine_columns(
    x: &DenseMatrix<f64>,
    offset: &[f64],
    divisor: &[f64],
) -> Result<DenseMatrix<f64>, InferenceError> {
    let (nrows, ncols) = check_columns(x, "scaler")?;
    let mut scaled = DenseMatrix::new(nrows, ncols, vec![0.0; nrows * ncols], false);
    for row in 0..nrows {
        for col in 0..ncols {
            let d = if divisor[col] == 0.0 { 1.0 } else { divisor[col] };
            scaled.set((row, col), (*x.get((row, col)) - offset[col]) / d);
        }
    }
    Ok(scaled)
}

/// Standardization with per-column mean and scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn validate(&self) -> Result<(), InferenceError> {
        check_vector("standard scaler", "mean", &self.mean)?;
        check_vector("standard scaler", "scale", &self.scale)
    }
}

impl FeatureScaler for StandardScaler {
    fn transform(&self, x: &DenseMatrix<f64>) -> Result<DenseMatrix<f64>, InferenceError> {
        affine_columns(x, &self.mean, &self.scale)
    }
}

/// Rescales each column to `[0, 1]` over the training range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

impl MinMaxScaler {
    pub fn validate(&self) -> Result<(), InferenceError> {
        check_vector("min-max scaler", "min", &self.min)?;
        check_vector("min-max scaler", "max", &self.max)?;
        if self.min.iter().zip(&self.max).any(|(lo, hi)| hi < lo) {
            return Err(InferenceError::InvalidArtifact {
                name: "min-max scaler",
                reason: "a column has max below min".to_string(),
            });
        }
        Ok(())
    }

    fn range(&self) -> Vec<f64> {
        self.min.iter().zip(&self.max).map(|(lo, hi)| hi - lo).collect()
    }
}

impl FeatureScaler for MinMaxScaler {
    fn transform(&self, x: &DenseMatrix<f64>) -> Result<DenseMatrix<f64>, InferenceError> {
        affine_columns(x, &self.min, &self.range())
    }
}

fn default_threshold() -> f64 {
    0.5
}

/// Logistic regression over the scaled features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    /// Positive label when the disease probability exceeds this value.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl LogisticModel {
    pub fn validate(&self) -> Result<(), InferenceError> {
        check_vector("logistic model", "coefficients", &self.coefficients)?;
        if !self.intercept.is_finite() {
            return Err(InferenceError::InvalidArtifact {
                name: "logistic model",
                reason: "intercept is not finite".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(InferenceError::InvalidArtifact {
                name: "logistic model",
                reason: format!("threshold {} is outside [0, 1]", self.threshold),
            });
        }
        Ok(())
    }

    fn decision(&self, x: &DenseMatrix<f64>) -> Result<Vec<f64>, InferenceError> {
        let (nrows, ncols) = check_columns(x, "classifier")?;
        Ok((0..nrows)
            .map(|row| {
                (0..ncols).fold(self.intercept, |acc, col| {
                    acc + self.coefficients[col] * *x.get((row, col))
                })
            })
            .collect())
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl RiskClassifier for LogisticModel {
    fn predict(&self, x: &DenseMatrix<f64>) -> Result<Vec<u8>, InferenceError> {
        Ok(self
            .predict_proba(x)?
            .into_iter()
            .map(|p| u8::from(p > self.threshold))
            .collect())
    }

    fn predict_proba(&self, x: &DenseMatrix<f64>) -> Result<Vec<f64>, InferenceError> {
        Ok(self.decision(x)?.into_iter().map(sigmoid).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScalerArtifact {
    Standard(StandardScaler),
    MinMax(MinMaxScaler),
}

impl ScalerArtifact {
    pub fn into_scaler(self) -> Result<Box<dyn FeatureScaler>, InferenceError> {
        Ok(match self {
            ScalerArtifact::Standard(s) => {
                s.validate()?;
                Box::new(s)
            }
            ScalerArtifact::MinMax(s) => {
                s.validate()?;
                Box::new(s)
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifierArtifact {
    Logistic(LogisticModel),
}

impl ClassifierArtifact {
    pub fn into_classifier(self) -> Result<Box<dyn RiskClassifier>, InferenceError> {
        match self {
            ClassifierArtifact::Logistic(m) => {
                m.validate()?;
                Ok(Box::new(m))
            }
        }
    }
}

fn read_artifact<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, InferenceError> {
    let text = fs::read_to_string(path).map_err(|source| InferenceError::ArtifactRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| InferenceError::ArtifactParse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_scaler(path: &Path) -> Result<Box<dyn FeatureScaler>, InferenceError> {
    let artifact: ScalerArtifact = read_artifact(path)?;
    log::debug!("loaded scaler artifact from {}", path.display());
    artifact.into_scaler()
}

pub fn load_classifier(path: &Path) -> Result<Box<dyn RiskClassifier>, InferenceError> {
    let artifact: ClassifierArtifact = read_artifact(path)?;
    log::debug!("loaded classifier artifact from {}", path.display());
    artifact.into_classifier()
}
