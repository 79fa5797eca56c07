//! The default step executor and run entry points.
//!
//! `ShellStepExecutor` is the production seam implementation: `run` steps
//! go through the shell in the workflow directory, built-in kinds delegate
//! to the image, registry, and artifact modules. Secrets resolve during
//! job preparation and are visible to that job's steps only.

use std::path::{Path, PathBuf};

use crate::core::artifact;
use crate::core::defaults;
use crate::core::error::{Error, Result};
use crate::core::event::TriggerEvent;
use crate::core::image::{self, ImageSpec};
use crate::core::pipeline::{
    self, JobContext, RunOutcome, RunPlan, StepExecutor, StepKindResolver, StepOutcome,
};
use crate::core::registry::{self, RegistryAuth};
use crate::core::secrets::SecretStore;
use crate::core::workflow::{kinds, Job, Step, Workflow};
use crate::utils::command::{self, CapturedOutput};
use crate::utils::io;
use crate::utils::template::{self, TemplateVars};

pub struct ShellStepExecutor {
    store: SecretStore,
    workflow_dir: PathBuf,
    event: TriggerEvent,
}

impl ShellStepExecutor {
    pub fn new(store: SecretStore, workflow_dir: PathBuf, event: TriggerEvent) -> Self {
        Self {
            store,
            workflow_dir,
            event,
        }
    }

    fn execute_run(&self, job_id: &str, step: &Step, ctx: &JobContext) -> Result<StepOutcome> {
        let raw = step.run.as_deref().ok_or_else(|| {
            Error::validation_invalid_argument(
                "run",
                format!("Step '{}' has no command", step.label()),
                None,
                None,
            )
        })?;

        let rendered = template::render(
            raw,
            &[
                (TemplateVars::EVENT, self.event.kind.as_str()),
                (TemplateVars::BRANCH, &self.event.branch),
                (TemplateVars::JOB, job_id),
            ],
        );

        let env_refs: Vec<(&str, &str)> = ctx
            .env
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let output = command::execute_shell(
            &rendered,
            Some(&self.workflow_dir.to_string_lossy()),
            if env_refs.is_empty() {
                None
            } else {
                Some(&env_refs)
            },
        );

        Ok(StepOutcome {
            label: step.label().to_string(),
            uses: step.uses.clone(),
            success: output.success,
            exit_code: output.exit_code,
            output: CapturedOutput::new(output.stdout, output.stderr),
            data: None,
            error: None,
        })
    }

    fn execute_image_build(&self, step: &Step, ctx: &JobContext) -> Result<StepOutcome> {
        let context_dir = self.resolve_build_context(step);
        let spec = self.resolve_image_spec(step)?;
        let reference = self.resolve_reference(step, ctx)?;

        let built = image::build(&spec, &context_dir, &reference)?;
        let data = serde_json::to_value(&built)
            .map_err(|e| Error::internal_json(e.to_string(), Some("serialize build".to_string())))?;

        Ok(StepOutcome::succeeded(step.label(), step.uses.clone()).with_data(data))
    }

    fn execute_registry_login(&self, step: &Step, ctx: &JobContext) -> Result<StepOutcome> {
        let auth = job_auth(ctx)?;
        registry::login(&auth)?;
        Ok(StepOutcome::succeeded(step.label(), step.uses.clone()))
    }

    fn execute_registry_push(&self, step: &Step, ctx: &JobContext) -> Result<StepOutcome> {
        let reference = self.resolve_reference(step, ctx)?;
        let pushed = registry::push(&reference)?;
        let data = serde_json::to_value(&pushed)
            .map_err(|e| Error::internal_json(e.to_string(), Some("serialize push".to_string())))?;

        Ok(StepOutcome::succeeded(step.label(), step.uses.clone()).with_data(data))
    }

    fn execute_artifact_check(&self, step: &Step) -> Result<StepOutcome> {
        let pattern = step
            .with
            .get("path")
            .cloned()
            .unwrap_or_else(|| defaults::MODEL_ARTIFACT.to_string());
        let resolved = self.workflow_dir.join(&pattern);

        let report = artifact::check(&resolved.to_string_lossy());
        let data = serde_json::to_value(&report)
            .map_err(|e| Error::internal_json(e.to_string(), Some("serialize report".to_string())))?;

        // Observation only: the report never fails the run.
        Ok(StepOutcome::succeeded(step.label(), step.uses.clone()).with_data(data))
    }

    fn resolve_build_context(&self, step: &Step) -> PathBuf {
        match step.with.get("context") {
            Some(context) => {
                let resolved = image::resolve_context(context);
                if resolved.is_absolute() {
                    resolved
                } else {
                    self.workflow_dir.join(resolved)
                }
            }
            None => self.workflow_dir.clone(),
        }
    }

    fn resolve_image_spec(&self, step: &Step) -> Result<ImageSpec> {
        match step.with.get("spec") {
            Some(spec_path) => {
                let path = self.workflow_dir.join(spec_path);
                let content = io::read_file(&path, "read image spec")?;
                serde_yml::from_str(&content).map_err(|e| {
                    Error::validation_invalid_yaml(e, Some(format!("parse image spec {}", spec_path)))
                })
            }
            None => Ok(ImageSpec::default_serving()),
        }
    }

    /// Push target: explicit `tag`, or the default reference derived from
    /// the username secret the job declared.
    fn resolve_reference(&self, step: &Step, ctx: &JobContext) -> Result<String> {
        if let Some(tag) = step.with.get("tag") {
            return Ok(tag.clone());
        }

        let username = ctx
            .env
            .iter()
            .find(|(name, _)| name == defaults::SECRET_REGISTRY_USERNAME)
            .map(|(_, value)| value.clone());

        match username {
            Some(username) => Ok(registry::default_reference(&username)),
            None => Err(Error::validation_invalid_argument(
                "tag",
                format!(
                    "No tag given and {} is not available to derive one",
                    defaults::SECRET_REGISTRY_USERNAME
                ),
                None,
                Some(vec![format!(
                    "Add {} to the job's secrets list or set 'with: {{tag: ...}}'",
                    defaults::SECRET_REGISTRY_USERNAME
                )]),
            )),
        }
    }
}

/// Credentials from the job's resolved environment. Secrets are job-scoped:
/// a job that never declared them cannot publish.
fn job_auth(ctx: &JobContext) -> Result<RegistryAuth> {
    let lookup = |name: &str| {
        ctx.env
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    };

    let username = lookup(defaults::SECRET_REGISTRY_USERNAME)
        .ok_or_else(|| Error::secret_not_found(defaults::SECRET_REGISTRY_USERNAME))?;
    let token = lookup(defaults::SECRET_REGISTRY_TOKEN)
        .ok_or_else(|| Error::secret_not_found(defaults::SECRET_REGISTRY_TOKEN))?;

    Ok(RegistryAuth::new(username, token))
}

impl StepKindResolver for ShellStepExecutor {
    fn is_supported(&self, kind: &str) -> bool {
        kinds::ALL.contains(&kind)
    }
}

impl StepExecutor for ShellStepExecutor {
    fn prepare(&self, _job_id: &str, job: &Job) -> Result<JobContext> {
        let mut env: Vec<(String, String)> =
            job.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let mut secret_values = Vec::with_capacity(job.secrets.len());

        for name in &job.secrets {
            let value = self.store.require(name)?;
            env.push((name.clone(), value.clone()));
            secret_values.push(value);
        }

        Ok(JobContext { env, secret_values })
    }

    fn execute(&self, job_id: &str, step: &Step, ctx: &JobContext) -> Result<StepOutcome> {
        match step.uses.as_str() {
            kinds::RUN => self.execute_run(job_id, step, ctx),
            kinds::IMAGE_BUILD => self.execute_image_build(step, ctx),
            kinds::REGISTRY_LOGIN => self.execute_registry_login(step, ctx),
            kinds::REGISTRY_PUSH => self.execute_registry_push(step, ctx),
            kinds::ARTIFACT_CHECK => self.execute_artifact_check(step),
            other => Err(Error::validation_invalid_argument(
                "uses",
                format!("Unknown step kind '{}'", other),
                Some(other.to_string()),
                Some(kinds::ALL.iter().map(|k| k.to_string()).collect()),
            )),
        }
    }
}

/// Plan a workflow run for an event.
pub fn plan_workflow(
    workflow: &Workflow,
    event: &TriggerEvent,
    dir: &Path,
    store: SecretStore,
) -> Result<RunPlan> {
    require_trigger_match(workflow, event)?;
    let executor = ShellStepExecutor::new(store, dir.to_path_buf(), event.clone());
    pipeline::plan(workflow, event, &executor)
}

/// Execute a workflow run for an event.
pub fn run_workflow(
    workflow: &Workflow,
    event: &TriggerEvent,
    dir: &Path,
    store: SecretStore,
) -> Result<RunOutcome> {
    require_trigger_match(workflow, event)?;
    let executor = ShellStepExecutor::new(store, dir.to_path_buf(), event.clone());
    pipeline::run(workflow, event, &executor)
}

fn require_trigger_match(workflow: &Workflow, event: &TriggerEvent) -> Result<()> {
    if workflow.matches(event) {
        Ok(())
    } else {
        Err(
            Error::workflow_trigger_unmatched(event.kind.as_str(), event.branch.clone()).with_hint(
                "Adjust the workflow's 'on:' triggers or pass a matching --event/--branch",
            ),
        )
    }
}
