use std::fmt;

use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::error::{AppError, InferenceError};
use crate::model::{FeatureScaler, RiskClassifier};
use crate::records::{PatientRecord, FEATURE_COUNT};

/// Probability, in percent, from which a positive label counts as high risk.
pub const HIGH_RISK_THRESHOLD: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "Low Risk",
            RiskTier::Medium => "Medium Risk",
            RiskTier::High => "High Risk",
        }
    }

    pub fn advice(&self) -> &'static str {
        match self {
            RiskTier::Low => "Maintain a healthy lifestyle and regular checkups.",
            RiskTier::Medium => "Consult a doctor for preventive measures.",
            RiskTier::High => "Please seek medical advice immediately!",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps the classifier output to a tier. `probability` is in percent.
pub fn classify(label: u8, probability: f64) -> RiskTier {
    if label == 0 {
        RiskTier::Low
    } else if probability < HIGH_RISK_THRESHOLD {
        RiskTier::Medium
    } else {
        RiskTier::High
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskResult {
    pub tier: RiskTier,
    pub label: u8,
    /// Disease probability in percent.
    pub probability: f64,
    pub message: String,
    pub advice: String,
}

impl RiskResult {
    pub fn from_prediction(label: u8, probability: f64) -> Self {
        let tier = classify(label, probability);
        let message = match tier {
            RiskTier::Low => format!("{tier}: No Heart Disease"),
            RiskTier::Medium | RiskTier::High => {
                format!("{tier}: Probability: {probability:.1}%")
            }
        };
        Self {
            tier,
            label,
            probability,
            message,
            advice: tier.advice().to_string(),
        }
    }
}

/// Scale-then-classify pipeline over the two loaded artifacts.
pub struct RiskEvaluator {
    scaler: Box<dyn FeatureScaler>,
    classifier: Box<dyn RiskClassifier>,
}

impl RiskEvaluator {
    pub fn new(scaler: Box<dyn FeatureScaler>, classifier: Box<dyn RiskClassifier>) -> Self {
        Self { scaler, classifier }
    }

    /// Evaluates a record the caller has already validated.
    pub fn evaluate(&self, record: &PatientRecord) -> Result<RiskResult, InferenceError> {
        self.evaluate_batch(std::slice::from_ref(record))?
            .pop()
            .ok_or(InferenceError::OutputLength {
                expected: 1,
                got: 0,
            })
    }

    /// Validates `record`, then evaluates it.
    pub fn assess(&self, record: &PatientRecord) -> Result<RiskResult, AppError> {
        record.validate()?;
        Ok(self.evaluate(record)?)
    }

    /// One scaler call and one classifier call for all `records`.
    pub fn evaluate_batch(
        &self,
        records: &[PatientRecord],
    ) -> Result<Vec<RiskResult>, InferenceError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let x = feature_matrix(records);
        let scaled = self.scaler.transform(&x)?;
        let labels = self.classifier.predict(&scaled)?;
        let probabilities = self.classifier.predict_proba(&scaled)?;

        for got in [labels.len(), probabilities.len()] {
            if got != records.len() {
                return Err(InferenceError::OutputLength {
                    expected: records.len(),
                    got,
                });
            }
        }

        labels
            .into_iter()
            .zip(probabilities)
            .map(|(label, p)| {
                if label > 1 {
                    return Err(InferenceError::InvalidOutput {
                        reason: format!("label {label} is not binary"),
                    });
                }
                if !(0.0..=1.0).contains(&p) {
                    return Err(InferenceError::InvalidOutput {
                        reason: format!("probability {p} is outside [0, 1]"),
                    });
                }
                let result = RiskResult::from_prediction(label, p * 100.0);
                log::debug!(
                    "label={} probability={:.1}% tier={}",
                    label,
                    result.probability,
                    result.tier
                );
                Ok(result)
            })
            .collect()
    }
}

/// Row-major n x 13 matrix in pipeline column order.
pub fn feature_matrix(records: &[PatientRecord]) -> DenseMatrix<f64> {
    let values: Vec<f64> = records.iter().flat_map(|r| r.features()).collect();
    DenseMatrix::new(records.len(), FEATURE_COUNT, values, false)
}
