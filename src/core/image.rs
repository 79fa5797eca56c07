//! Container image building.
//!
//! An `ImageSpec` declares the runnable unit: base image, dependency
//! manifest, directories copied into the image, exposed port, and startup
//! command. Rendering is deterministic — identical specs produce
//! byte-identical build files — and dependency installation is layered
//! before any application bytes are copied, so a missing dependency fails
//! the build before `app/` or `model/` enter the image.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::defaults;
use crate::core::error::{CommandFailedDetails, Error, Result};
use crate::core::registry;
use crate::log_status;
use crate::utils::command;
use crate::utils::io;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyUnit {
    pub source: String,
    pub dest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    pub base_image: String,
    pub workdir: String,
    pub requirements: String,
    pub copy: Vec<CopyUnit>,
    pub expose: u16,
    pub command: Vec<String>,
}

impl ImageSpec {
    /// The serving image contract: requirements installed first, then
    /// `app/` and `model/` copied in, port 8000, uvicorn entry command.
    pub fn default_serving() -> Self {
        Self {
            base_image: defaults::BASE_IMAGE.to_string(),
            workdir: "/app".to_string(),
            requirements: defaults::REQUIREMENTS_FILE.to_string(),
            copy: vec![
                CopyUnit {
                    source: "./app".to_string(),
                    dest: "./app".to_string(),
                },
                CopyUnit {
                    source: "./model".to_string(),
                    dest: "./model".to_string(),
                },
            ],
            expose: defaults::SERVE_PORT,
            command: defaults::serve_command(),
        }
    }

    /// Validate the spec against a build context directory.
    pub fn validate(&self, context_dir: &Path) -> Result<()> {
        if self.base_image.trim().is_empty() {
            return Err(Error::image_spec_invalid("baseImage", "Base image cannot be empty"));
        }
        if self.expose == 0 {
            return Err(Error::image_spec_invalid("expose", "Exposed port must be non-zero"));
        }
        if self.command.is_empty() {
            return Err(Error::image_spec_invalid("command", "Startup command cannot be empty"));
        }

        let requirements = context_dir.join(&self.requirements);
        if !requirements.is_file() {
            return Err(Error::image_spec_invalid(
                "requirements",
                format!(
                    "Requirements manifest not found at {}",
                    requirements.display()
                ),
            ));
        }

        for unit in &self.copy {
            validate_copy_source(&unit.source)?;
            let source = context_dir.join(unit.source.trim_start_matches("./"));
            if !source.exists() {
                return Err(Error::image_spec_invalid(
                    "copy",
                    format!("Copy source '{}' not found in build context", unit.source),
                ));
            }
        }

        Ok(())
    }
}

fn validate_copy_source(source: &str) -> Result<()> {
    let path = Path::new(source);
    if path.is_absolute() {
        return Err(Error::image_spec_invalid(
            "copy",
            format!("Copy source '{}' must be relative to the build context", source),
        ));
    }
    if path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(Error::image_spec_invalid(
            "copy",
            format!("Copy source '{}' escapes the build context", source),
        ));
    }
    Ok(())
}

/// Render the container build file.
///
/// The requirements manifest is copied and installed before any copy unit,
/// so the dependency layer caches independently of application changes and
/// a bad manifest fails before application bytes are staged.
pub fn render_dockerfile(spec: &ImageSpec) -> String {
    let mut lines = Vec::new();

    lines.push(format!("FROM {}", spec.base_image));
    lines.push(format!("WORKDIR {}", spec.workdir));
    lines.push(String::new());
    lines.push(format!("COPY {} .", spec.requirements));
    lines.push(format!(
        "RUN pip install --no-cache-dir -r {}",
        spec.requirements
    ));
    lines.push(String::new());

    for unit in &spec.copy {
        lines.push(format!("COPY {} {}", unit.source, unit.dest));
    }

    lines.push(String::new());
    lines.push(format!("EXPOSE {}", spec.expose));
    lines.push(format!("CMD {}", render_exec_form(&spec.command)));

    let mut rendered = lines.join("\n");
    rendered.push('\n');
    rendered
}

fn render_exec_form(command: &[String]) -> String {
    serde_json::to_string(command).unwrap_or_else(|_| "[]".to_string())
}

/// Fingerprint of the build inputs: the rendered build file plus the
/// requirements manifest bytes. Identical inputs yield identical values.
pub fn fingerprint(spec: &ImageSpec, context_dir: &Path) -> Result<String> {
    let rendered = render_dockerfile(spec);
    let requirements = std::fs::read(context_dir.join(&spec.requirements)).map_err(|e| {
        Error::internal_io(e.to_string(), Some("read requirements manifest".to_string()))
    })?;

    let mut hasher = Sha256::new();
    hasher.update(rendered.as_bytes());
    hasher.update(&requirements);
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageBuild {
    pub reference: String,
    pub dockerfile: String,
    pub fingerprint: String,
}

/// Build the image with the container tool.
///
/// The rendered build file is staged under `.gantry/` inside the context so
/// a hand-written Dockerfile in the context is never overwritten.
pub fn build(spec: &ImageSpec, context_dir: &Path, reference: &str) -> Result<ImageBuild> {
    registry::validate_reference(reference)?;
    spec.validate(context_dir)?;

    let rendered = render_dockerfile(spec);
    let fingerprint = fingerprint(spec, context_dir)?;

    let staging_dir = context_dir.join(".gantry");
    std::fs::create_dir_all(&staging_dir).map_err(|e| {
        Error::internal_io(e.to_string(), Some("create .gantry staging dir".to_string()))
    })?;

    let dockerfile_path = staging_dir.join("Dockerfile");
    io::write_file_atomic(&dockerfile_path, &rendered, "write build file")?;

    log_status!("image", "Building {} from {}", reference, context_dir.display());

    let docker = defaults::docker_bin();
    let output = Command::new(&docker)
        .arg("build")
        .arg("-f")
        .arg(dockerfile_path.as_os_str())
        .arg("-t")
        .arg(reference)
        .arg(".")
        .current_dir(context_dir)
        .output()
        .map_err(|e| {
            Error::internal_io(
                format!("Failed to run {}: {}", docker, e),
                Some("image build".to_string()),
            )
        })?;

    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        return Err(Error::image_build_failed(CommandFailedDetails {
            command: format!("{} build -t {}", docker, reference),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: command::output_tail(&stdout, 15),
            stderr: command::output_tail(&stderr, 15),
        }));
    }

    log_status!("image", "Built {} ({})", reference, &fingerprint[..12]);

    Ok(ImageBuild {
        reference: reference.to_string(),
        dockerfile: dockerfile_path.to_string_lossy().to_string(),
        fingerprint,
    })
}

/// Resolve a build context argument to an absolute-ish path with `~` and
/// env references expanded.
pub fn resolve_context(context: &str) -> PathBuf {
    let expanded = shellexpand::full(context)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| context.to_string());
    PathBuf::from(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn serving_context() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("requirements.txt"), "fastapi\nuvicorn\n").unwrap();
        fs::create_dir(dir.path().join("app")).unwrap();
        fs::write(dir.path().join("app/main.py"), "app = None\n").unwrap();
        fs::create_dir(dir.path().join("model")).unwrap();
        fs::write(dir.path().join("model/simple_model.joblib"), b"blob").unwrap();
        dir
    }

    #[test]
    fn rendering_is_deterministic() {
        let spec = ImageSpec::default_serving();
        assert_eq!(render_dockerfile(&spec), render_dockerfile(&spec));
    }

    #[test]
    fn default_spec_renders_the_serving_contract() {
        let rendered = render_dockerfile(&ImageSpec::default_serving());

        assert!(rendered.starts_with("FROM python:3.11-slim\n"));
        assert!(rendered.contains("WORKDIR /app\n"));
        assert!(rendered.contains("EXPOSE 8000\n"));
        assert!(rendered.contains(
            r#"CMD ["uvicorn","app.main:app","--host","0.0.0.0","--port","8000"]"#
        ));
    }

    #[test]
    fn dependencies_install_before_application_bytes() {
        let rendered = render_dockerfile(&ImageSpec::default_serving());

        let install = rendered.find("RUN pip install").unwrap();
        let copy_app = rendered.find("COPY ./app").unwrap();
        let copy_model = rendered.find("COPY ./model").unwrap();
        assert!(install < copy_app);
        assert!(install < copy_model);
    }

    #[test]
    fn fingerprint_is_stable_for_identical_inputs() {
        let dir = serving_context();
        let spec = ImageSpec::default_serving();

        let first = fingerprint(&spec, dir.path()).unwrap();
        let second = fingerprint(&spec, dir.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn fingerprint_changes_when_requirements_change() {
        let dir = serving_context();
        let spec = ImageSpec::default_serving();

        let before = fingerprint(&spec, dir.path()).unwrap();
        fs::write(dir.path().join("requirements.txt"), "fastapi==0.110\n").unwrap();
        let after = fingerprint(&spec, dir.path()).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn validate_rejects_missing_requirements() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ImageSpec::default_serving();

        let err = spec.validate(dir.path()).unwrap_err();
        assert_eq!(err.code.as_str(), "image.spec_invalid");
        assert_eq!(err.details["field"], "requirements");
    }

    #[test]
    fn validate_rejects_copy_sources_escaping_the_context() {
        let dir = serving_context();
        let mut spec = ImageSpec::default_serving();
        spec.copy.push(CopyUnit {
            source: "../outside".to_string(),
            dest: "./outside".to_string(),
        });

        let err = spec.validate(dir.path()).unwrap_err();
        assert_eq!(err.details["field"], "copy");
    }

    #[test]
    fn validate_rejects_absolute_copy_sources() {
        let dir = serving_context();
        let mut spec = ImageSpec::default_serving();
        spec.copy[0].source = "/etc".to_string();

        let err = spec.validate(dir.path()).unwrap_err();
        assert_eq!(err.details["field"], "copy");
    }

    #[test]
    fn validate_rejects_port_zero() {
        let dir = serving_context();
        let mut spec = ImageSpec::default_serving();
        spec.expose = 0;

        let err = spec.validate(dir.path()).unwrap_err();
        assert_eq!(err.details["field"], "expose");
    }

    #[test]
    fn build_rejects_malformed_references_before_spawning_anything() {
        let dir = serving_context();
        let spec = ImageSpec::default_serving();

        let err = build(&spec, dir.path(), "Not A Reference").unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
    }

    // Requires a running docker daemon. Run manually with:
    // cargo test image -- --ignored
    #[test]
    #[ignore]
    fn build_produces_an_image_with_docker() {
        let dir = serving_context();
        let spec = ImageSpec::default_serving();

        let built = build(&spec, dir.path(), "gantry-test/deploy-ml-model:latest").unwrap();
        assert_eq!(built.fingerprint.len(), 64);
    }
}
