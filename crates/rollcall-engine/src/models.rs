//! Loading the ONNX detector and embedder named by the configuration.

use crate::config::Config;
use rollcall_core::{DetectorError, EmbedderError, FacenetEmbedder, ScrfdDetector};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder: {0}")]
    Embedder(#[from] EmbedderError),
}

/// Load both models, failing fast if either file is missing.
pub fn load_models(config: &Config) -> Result<(ScrfdDetector, FacenetEmbedder), ModelError> {
    let detector_path = config.detector_model_path();
    let detector = ScrfdDetector::load(&detector_path)?;
    tracing::info!(path = %detector_path.display(), "SCRFD detector loaded");

    let embedder_path = config.embedder_model_path();
    let embedder = FacenetEmbedder::load(&embedder_path)?;
    tracing::info!(path = %embedder_path.display(), "FaceNet embedder loaded");

    Ok((detector, embedder))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_models_fail_before_loading() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            model_dir: dir.path().to_path_buf(),
            ..Config::default()
        };

        let err = load_models(&config).err().unwrap();
        assert!(matches!(err, ModelError::Detector(DetectorError::ModelNotFound(_))));
    }
}
