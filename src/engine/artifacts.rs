//! Artifact directory / model file existence checks (§4.1 initialization contract, step 1).

use std::path::Path;

use crate::config::AppConfig;
use crate::error::{Error, Result};

/// Verify the configured artifact directory and model file exist before attempting to load them.
pub fn verify_present(config: &AppConfig) -> Result<()> {
    let dir = config.model_artifact_dir();
    if !dir.is_dir() {
        return Err(Error::ArtifactMissing(format!(
            "artifact directory does not exist: {}",
            dir.display()
        )));
    }

    let model_path = config.model_path();
    if !is_regular_file(&model_path) {
        return Err(Error::ArtifactMissing(format!(
            "model file does not exist: {}",
            model_path.display()
        )));
    }

    Ok(())
}

fn is_regular_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}
