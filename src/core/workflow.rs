//! Workflow definitions: triggers, jobs, and steps.
//!
//! A workflow is a YAML document declaring what starts a run (`on`), the
//! jobs it contains, their dependency edges (`needs`), and per-job gates
//! (`when`). `${VAR}` placeholders are substituted from the process
//! environment at load time; unresolved placeholders are left intact.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::defaults;
use crate::core::error::{Error, Result};
use crate::core::event::{EventKind, Gate, TriggerEvent};
use crate::utils::io;
use crate::utils::validation;

/// Step kinds understood by the default executor.
pub mod kinds {
    pub const RUN: &str = "run";
    pub const IMAGE_BUILD: &str = "image.build";
    pub const REGISTRY_LOGIN: &str = "registry.login";
    pub const REGISTRY_PUSH: &str = "registry.push";
    pub const ARTIFACT_CHECK: &str = "artifact.check";

    pub const ALL: &[&str] = &[RUN, IMAGE_BUILD, REGISTRY_LOGIN, REGISTRY_PUSH, ARTIFACT_CHECK];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub on: TriggerConfig,
    pub jobs: BTreeMap<String, Job>,
}

/// Workflow-level trigger filter. A run only starts when the event matches
/// one of the configured triggers; an absent trigger matches nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push: Option<BranchFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<BranchFilter>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<String>,
}

impl BranchFilter {
    fn matches(&self, branch: &str) -> bool {
        self.branches.is_empty() || self.branches.iter().any(|b| b == branch)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Job {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    /// Hard gate evaluated against the trigger event before the job may run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<Gate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Secret names injected into this job's steps only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_step_kind")]
    pub uses: String,
    /// Shell command, required when `uses` is `run`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub with: BTreeMap<String, String>,
}

fn default_step_kind() -> String {
    kinds::RUN.to_string()
}

impl Step {
    pub fn run(command: impl Into<String>) -> Self {
        Self {
            name: None,
            uses: kinds::RUN.to_string(),
            run: Some(command.into()),
            with: BTreeMap::new(),
        }
    }

    pub fn uses(kind: impl Into<String>) -> Self {
        Self {
            name: None,
            uses: kind.into(),
            run: None,
            with: BTreeMap::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with.insert(key.into(), value.into());
        self
    }

    /// Display label: explicit name, the command, or the step kind.
    pub fn label(&self) -> &str {
        if let Some(name) = &self.name {
            return name;
        }
        if let Some(run) = &self.run {
            return run;
        }
        &self.uses
    }
}

impl Workflow {
    /// Load a workflow from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::workflow_not_found(path.display().to_string()));
        }
        let content = io::read_file(path, "read workflow")?;
        Self::from_yaml_str(&content)
    }

    /// Parse a workflow from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let substituted = substitute_env_vars(content);
        let workflow: Workflow = serde_yml::from_str(&substituted)
            .map_err(|e| Error::validation_invalid_yaml(e, Some("parse workflow".to_string())))?;
        workflow.validate()?;
        Ok(workflow)
    }

    /// Structural validation. Dependency cycles are caught when the job
    /// graph is ordered at plan time.
    pub fn validate(&self) -> Result<()> {
        if self.jobs.is_empty() {
            return Err(Error::workflow_invalid("Workflow has no jobs", vec![]));
        }

        for (id, job) in &self.jobs {
            let unknown: Vec<String> = job
                .needs
                .iter()
                .filter(|need| !self.jobs.contains_key(*need))
                .cloned()
                .collect();
            if !unknown.is_empty() {
                return Err(Error::workflow_invalid(
                    format!("Job '{}' depends on unknown jobs", id),
                    unknown,
                ));
            }

            for secret in &job.secrets {
                validation::require_env_name(secret, "secrets")?;
            }

            for step in &job.steps {
                self.validate_step(id, step)?;
            }
        }

        Ok(())
    }

    fn validate_step(&self, job_id: &str, step: &Step) -> Result<()> {
        if step.uses == kinds::RUN && step.run.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Err(Error::workflow_invalid(
                format!("Job '{}' has a run step without a command", job_id),
                vec![job_id.to_string()],
            ));
        }

        if step.uses != kinds::RUN && step.run.is_some() {
            return Err(Error::workflow_invalid(
                format!(
                    "Job '{}' step '{}' declares both 'uses: {}' and a run command",
                    job_id,
                    step.label(),
                    step.uses
                ),
                vec![job_id.to_string()],
            ));
        }

        Ok(())
    }

    /// Whether the event matches a workflow-level trigger.
    pub fn matches(&self, event: &TriggerEvent) -> bool {
        let filter = match event.kind {
            EventKind::Push => self.on.push.as_ref(),
            EventKind::PullRequest => self.on.pull_request.as_ref(),
        };
        filter.map(|f| f.matches(&event.branch)).unwrap_or(false)
    }

    /// The built-in serving workflow: a `test` job, then a
    /// `build-and-push` job gated to push events on `main`.
    pub fn default_serving() -> Self {
        let mut jobs = BTreeMap::new();

        jobs.insert(
            "test".to_string(),
            Job {
                name: Some("Run tests".to_string()),
                steps: vec![
                    Step::run(format!("pip install -r {}", defaults::REQUIREMENTS_FILE))
                        .named("Install dependencies"),
                    Step::run("pytest").named("Run test suite"),
                    Step::uses(kinds::ARTIFACT_CHECK)
                        .named("Report model artifact")
                        .with("path", defaults::MODEL_ARTIFACT),
                ],
                ..Job::default()
            },
        );

        jobs.insert(
            "build-and-push".to_string(),
            Job {
                name: Some("Build and publish image".to_string()),
                needs: vec!["test".to_string()],
                when: Some(Gate {
                    events: vec![EventKind::Push],
                    branches: vec!["main".to_string()],
                }),
                secrets: vec![
                    defaults::SECRET_REGISTRY_USERNAME.to_string(),
                    defaults::SECRET_REGISTRY_TOKEN.to_string(),
                ],
                steps: vec![
                    Step::uses(kinds::IMAGE_BUILD).named("Build image"),
                    Step::uses(kinds::REGISTRY_LOGIN).named("Log in to registry"),
                    Step::uses(kinds::REGISTRY_PUSH).named("Push image"),
                ],
                ..Job::default()
            },
        );

        Workflow {
            name: defaults::REPOSITORY.to_string(),
            on: TriggerConfig {
                push: Some(BranchFilter {
                    branches: vec!["main".to_string()],
                }),
                pull_request: Some(BranchFilter {
                    branches: vec!["main".to_string()],
                }),
            },
            jobs,
        }
    }
}

/// YAML written by `gantry init`. Kept in sync with
/// `Workflow::default_serving` (asserted in tests).
pub const DEFAULT_WORKFLOW_YAML: &str = r#"name: deploy-ml-model

on:
  push:
    branches: [main]
  pull_request:
    branches: [main]

jobs:
  test:
    name: Run tests
    steps:
      - name: Install dependencies
        run: pip install -r requirements.txt
      - name: Run test suite
        run: pytest
      - name: Report model artifact
        uses: artifact.check
        with:
          path: model/simple_model.joblib

  build-and-push:
    name: Build and publish image
    needs: [test]
    when:
      events: [push]
      branches: [main]
    secrets: [DOCKERHUB_USERNAME, DOCKERHUB_TOKEN]
    steps:
      - name: Build image
        uses: image.build
      - name: Log in to registry
        uses: registry.login
      - name: Push image
        uses: registry.push
"#;

/// Substitute `${VAR}` placeholders from the environment, leaving
/// unresolved placeholders intact.
fn substitute_env_vars(content: &str) -> String {
    // Identifier-shaped names only; `${{ ... }}` style is not ours to touch.
    let re = match regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}") {
        Ok(re) => re,
        Err(_) => return content.to_string(),
    };

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_yaml_matches_default_workflow() {
        let from_yaml = Workflow::from_yaml_str(DEFAULT_WORKFLOW_YAML).unwrap();
        let built = Workflow::default_serving();

        assert_eq!(from_yaml.name, built.name);
        assert_eq!(
            from_yaml.jobs.keys().collect::<Vec<_>>(),
            built.jobs.keys().collect::<Vec<_>>()
        );

        let publish = &from_yaml.jobs["build-and-push"];
        assert_eq!(publish.needs, vec!["test"]);
        assert_eq!(publish.when, built.jobs["build-and-push"].when);
        assert_eq!(
            publish.secrets,
            vec!["DOCKERHUB_USERNAME", "DOCKERHUB_TOKEN"]
        );
        assert_eq!(
            publish.steps.iter().map(|s| s.uses.as_str()).collect::<Vec<_>>(),
            vec!["image.build", "registry.login", "registry.push"]
        );
    }

    #[test]
    fn default_workflow_matches_spec_triggers() {
        let workflow = Workflow::default_serving();

        assert!(workflow.matches(&TriggerEvent::new(EventKind::Push, "main")));
        assert!(workflow.matches(&TriggerEvent::new(EventKind::PullRequest, "main")));
        assert!(!workflow.matches(&TriggerEvent::new(EventKind::Push, "feature/x")));
        assert!(!workflow.matches(&TriggerEvent::new(EventKind::PullRequest, "develop")));
    }

    #[test]
    fn empty_triggers_match_nothing() {
        let yaml = r#"
name: quiet
jobs:
  test:
    steps:
      - run: "true"
"#;
        let workflow = Workflow::from_yaml_str(yaml).unwrap();
        assert!(!workflow.matches(&TriggerEvent::new(EventKind::Push, "main")));
    }

    #[test]
    fn rejects_empty_jobs() {
        let yaml = "name: empty\njobs: {}\n";
        let err = Workflow::from_yaml_str(yaml).unwrap_err();
        assert_eq!(err.code.as_str(), "workflow.invalid");
    }

    #[test]
    fn rejects_unknown_needs() {
        let yaml = r#"
name: broken
jobs:
  publish:
    needs: [missing-job]
    steps:
      - run: "true"
"#;
        let err = Workflow::from_yaml_str(yaml).unwrap_err();
        assert_eq!(err.code.as_str(), "workflow.invalid");
        assert_eq!(err.details["jobs"][0], "missing-job");
    }

    #[test]
    fn rejects_run_step_without_command() {
        let yaml = r#"
name: broken
jobs:
  test:
    steps:
      - name: no command here
"#;
        let err = Workflow::from_yaml_str(yaml).unwrap_err();
        assert_eq!(err.code.as_str(), "workflow.invalid");
    }

    #[test]
    fn rejects_invalid_secret_names() {
        let yaml = r#"
name: broken
jobs:
  publish:
    secrets: ["not a name"]
    steps:
      - run: "true"
"#;
        let err = Workflow::from_yaml_str(yaml).unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
    }

    #[test]
    fn substitutes_env_vars_and_keeps_unresolved() {
        std::env::set_var("GANTRY_TEST_BRANCH", "main");
        let yaml = r#"
name: sub
on:
  push:
    branches: ["${GANTRY_TEST_BRANCH}"]
jobs:
  test:
    steps:
      - run: echo ${GANTRY_TEST_UNSET_VAR}
"#;
        let workflow = Workflow::from_yaml_str(yaml).unwrap();
        assert!(workflow.matches(&TriggerEvent::new(EventKind::Push, "main")));
        assert_eq!(
            workflow.jobs["test"].steps[0].run.as_deref(),
            Some("echo ${GANTRY_TEST_UNSET_VAR}")
        );
        std::env::remove_var("GANTRY_TEST_BRANCH");
    }

    #[test]
    fn step_label_prefers_name_then_command() {
        let named = Step::run("pytest").named("Run test suite");
        assert_eq!(named.label(), "Run test suite");

        let bare = Step::run("pytest");
        assert_eq!(bare.label(), "pytest");

        let builtin = Step::uses(kinds::REGISTRY_PUSH);
        assert_eq!(builtin.label(), "registry.push");
    }
}
