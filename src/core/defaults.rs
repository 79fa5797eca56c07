//! Contractual constants for the default serving pipeline.

use std::env;

/// Workflow file looked up in the working directory.
pub const WORKFLOW_FILE: &str = "gantry.yml";

/// Repository name the published image is tagged under.
pub const REPOSITORY: &str = "deploy-ml-model";

/// Tag applied to published images.
pub const TAG: &str = "latest";

/// Port the packaged service listens on.
pub const SERVE_PORT: u16 = 8000;

/// Base image for the default serving spec.
pub const BASE_IMAGE: &str = "python:3.11-slim";

/// Dependency manifest installed before application code is copied.
pub const REQUIREMENTS_FILE: &str = "requirements.txt";

/// Model artifact path checked by the debug step.
pub const MODEL_ARTIFACT: &str = "model/simple_model.joblib";

/// Secret names consumed by the publish stage only.
pub const SECRET_REGISTRY_USERNAME: &str = "DOCKERHUB_USERNAME";
pub const SECRET_REGISTRY_TOKEN: &str = "DOCKERHUB_TOKEN";

/// Startup command of the packaged service.
pub fn serve_command() -> Vec<String> {
    vec![
        "uvicorn".to_string(),
        "app.main:app".to_string(),
        "--host".to_string(),
        "0.0.0.0".to_string(),
        "--port".to_string(),
        SERVE_PORT.to_string(),
    ]
}

/// Container tool binary, overridable for sandboxed environments.
pub fn docker_bin() -> String {
    env::var("GANTRY_DOCKER_BIN").unwrap_or_else(|_| "docker".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_command_pins_port_8000() {
        let cmd = serve_command();
        assert_eq!(cmd[0], "uvicorn");
        assert_eq!(cmd[1], "app.main:app");
        assert_eq!(cmd.last().map(String::as_str), Some("8000"));
    }
}
