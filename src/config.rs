use std::path::PathBuf;

use clap::Args;

use crate::error::InferenceError;
use crate::evaluator::RiskEvaluator;
use crate::model::{load_classifier, load_scaler};

/// Locations of the two pre-trained artifacts.
#[derive(Args, Debug, Clone)]
pub struct ArtifactArgs {
    #[arg(
        long,
        env = "HEART_RISK_MODEL",
        default_value = "artifacts/model.json",
        help = "Classifier artifact"
    )]
    pub model: PathBuf,
    #[arg(
        long,
        env = "HEART_RISK_SCALER",
        default_value = "artifacts/scaler.json",
        help = "Feature scaler artifact"
    )]
    pub scaler: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model_path: PathBuf,
    pub scaler_path: PathBuf,
}

impl AppConfig {
    pub fn new(artifacts: &ArtifactArgs) -> Self {
        Self {
            model_path: artifacts.model.clone(),
            scaler_path: artifacts.scaler.clone(),
        }
    }

    /// Loads both artifacts. Called once at start-up.
    pub fn load_evaluator(&self) -> Result<RiskEvaluator, InferenceError> {
        let scaler = load_scaler(&self.scaler_path)?;
        let classifier = load_classifier(&self.model_path)?;
        log::info!(
            "artifacts loaded: model {}, scaler {}",
            self.model_path.display(),
            self.scaler_path.display()
        );
        Ok(RiskEvaluator::new(scaler, classifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::RiskTier;
    use crate::records::PatientRecord;
    use std::path::Path;

    fn bundled() -> AppConfig {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("artifacts");
        AppConfig {
            model_path: root.join("model.json"),
            scaler_path: root.join("scaler.json"),
        }
    }

    #[test]
    fn bundled_artifacts_load_and_evaluate() {
        let evaluator = bundled().load_evaluator().unwrap();
        let result = evaluator.assess(&PatientRecord::default()).unwrap();
        assert!((0.0..=100.0).contains(&result.probability));
        if result.label == 0 {
            assert_eq!(result.tier, RiskTier::Low);
        }
    }

    #[test]
    fn missing_model_fails_start_up() {
        let mut config = bundled();
        config.model_path = config.model_path.with_file_name("nope.json");
        assert!(matches!(
            config.load_evaluator(),
            Err(InferenceError::ArtifactRead { .. })
        ));
    }
}
