//! The job orchestration state machine.
//!
//! A run plans first, then executes: jobs are ordered by their `needs`
//! edges, gates are evaluated against the trigger event, and execution
//! walks the ordered jobs with fail-fast semantics. A job whose gate does
//! not permit the event is skipped terminally and never executes; a job
//! whose dependency finished in any state other than passed is skipped
//! with a reason naming the dependency. There are no retries and no
//! timeouts: every failure is terminal for the run.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::error::{Error, Result};
use crate::core::event::TriggerEvent;
use crate::core::secrets;
use crate::core::workflow::{Job, Step, Workflow};
use crate::log_status;
use crate::utils::command::CapturedOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Passed,
    Failed,
    Skipped,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Ready,
    Skipped,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    Failed,
    Skipped,
    Missing,
}

/// Plan entry for one job: where it sits in the order and whether it will
/// execute at all.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPlan {
    pub id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    pub status: PlanStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPlan {
    pub workflow: String,
    pub event: TriggerEvent,
    pub jobs: Vec<JobPlan>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Result of one executed step.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub label: String,
    pub uses: String,
    pub success: bool,
    pub exit_code: i32,
    #[serde(flatten)]
    pub output: CapturedOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn succeeded(label: impl Into<String>, uses: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            uses: uses.into(),
            success: true,
            exit_code: 0,
            output: CapturedOutput::default(),
            data: None,
            error: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Mask secret values in every captured stream before the outcome is
    /// stored or printed.
    pub fn redact(&mut self, values: &[String]) {
        self.output.stdout = secrets::redact(&self.output.stdout, values);
        self.output.stderr = secrets::redact(&self.output.stderr, values);
        if let Some(error) = &self.error {
            self.error = Some(secrets::redact(error, values));
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub missing: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub run_id: String,
    pub workflow: String,
    pub event: TriggerEvent,
    pub started_at: String,
    pub finished_at: String,
    pub status: RunStatus,
    pub jobs: Vec<JobOutcome>,
    pub summary: RunSummary,
}

/// Reports which step kinds an executor understands. Unknown kinds turn
/// the owning job terminal at plan time instead of failing mid-run.
pub trait StepKindResolver {
    fn is_supported(&self, kind: &str) -> bool;
}

/// Per-job execution context: resolved environment and the secret values
/// to redact from captured output.
#[derive(Debug, Default)]
pub struct JobContext {
    pub env: Vec<(String, String)>,
    pub secret_values: Vec<String>,
}

/// The seam between the state machine and side effects.
pub trait StepExecutor: StepKindResolver {
    /// Resolve the job's environment and secrets. Failing here fails the
    /// job before any of its steps run.
    fn prepare(&self, job_id: &str, job: &Job) -> Result<JobContext>;

    fn execute(&self, job_id: &str, step: &Step, ctx: &JobContext) -> Result<StepOutcome>;
}

/// Order jobs so that every job appears after all of its dependencies.
///
/// Kahn's algorithm over the `needs` edges; map order keeps the result
/// deterministic. A cycle is a validation error naming the jobs left over.
fn order_jobs<'a>(workflow: &'a Workflow) -> Result<Vec<(&'a str, &'a Job)>> {
    let ids: Vec<&str> = workflow.jobs.keys().map(String::as_str).collect();
    let index: BTreeMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let mut indegree = vec![0usize; ids.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];

    for (idx, id) in ids.iter().enumerate() {
        let job = &workflow.jobs[*id];
        for need in &job.needs {
            let Some(&parent) = index.get(need.as_str()) else {
                return Err(Error::workflow_invalid(
                    format!("Job '{}' depends on unknown job '{}'", id, need),
                    vec![need.clone()],
                ));
            };
            indegree[idx] += 1;
            dependents[parent].push(idx);
        }
    }

    let mut queue: std::collections::VecDeque<usize> = indegree
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(idx, _)| idx)
        .collect();

    let mut ordered = Vec::with_capacity(ids.len());
    while let Some(idx) = queue.pop_front() {
        ordered.push(idx);
        for &child in &dependents[idx] {
            indegree[child] -= 1;
            if indegree[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    if ordered.len() != ids.len() {
        let pending: Vec<String> = indegree
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(idx, _)| ids[idx].to_string())
            .collect();
        return Err(Error::workflow_invalid(
            "Jobs contain a dependency cycle",
            pending,
        ));
    }

    Ok(ordered
        .into_iter()
        .map(|idx| (ids[idx], &workflow.jobs[ids[idx]]))
        .collect())
}

/// Compute the plan for an event: ordered jobs with gate decisions applied.
/// What you preview is what you execute.
pub fn plan<R: StepKindResolver + ?Sized>(
    workflow: &Workflow,
    event: &TriggerEvent,
    resolver: &R,
) -> Result<RunPlan> {
    let ordered = order_jobs(workflow)?;

    let mut warnings = Vec::new();
    if workflow.jobs.values().any(|job| !job.needs.is_empty()) {
        warnings.push("Jobs ordered by dependencies".to_string());
    }

    let jobs = ordered
        .into_iter()
        .map(|(id, job)| {
            let (status, reason, missing) = plan_job(job, event, resolver);
            JobPlan {
                id: id.to_string(),
                needs: job.needs.clone(),
                status,
                reason,
                missing,
                steps: job.steps.iter().map(|s| s.label().to_string()).collect(),
            }
        })
        .collect();

    Ok(RunPlan {
        workflow: workflow.name.clone(),
        event: event.clone(),
        jobs,
        warnings,
    })
}

fn plan_job<R: StepKindResolver + ?Sized>(
    job: &Job,
    event: &TriggerEvent,
    resolver: &R,
) -> (PlanStatus, Option<String>, Vec<String>) {
    if let Some(gate) = &job.when {
        if !gate.permits(event) {
            return (PlanStatus::Skipped, Some(gate.describe()), Vec::new());
        }
    }

    let mut missing: Vec<String> = job
        .steps
        .iter()
        .map(|step| step.uses.clone())
        .filter(|kind| !resolver.is_supported(kind))
        .collect();
    missing.dedup();

    if !missing.is_empty() {
        return (PlanStatus::Missing, None, missing);
    }

    (PlanStatus::Ready, None, Vec::new())
}

/// Execute a workflow for an event.
///
/// Jobs run sequentially in dependency order. The only ordering guarantee
/// is the one the plan encodes: a job never starts before every job in its
/// `needs` list has passed.
pub fn run(
    workflow: &Workflow,
    event: &TriggerEvent,
    executor: &dyn StepExecutor,
) -> Result<RunOutcome> {
    let run_plan = plan(workflow, event, executor)?;

    let started_at = chrono::Utc::now();
    let mut statuses: BTreeMap<String, JobStatus> = BTreeMap::new();
    let mut jobs = Vec::with_capacity(run_plan.jobs.len());

    for job_plan in &run_plan.jobs {
        let outcome = match job_plan.status {
            PlanStatus::Skipped => JobOutcome {
                id: job_plan.id.clone(),
                status: JobStatus::Skipped,
                steps: Vec::new(),
                skip_reason: job_plan.reason.clone(),
                error: None,
            },
            PlanStatus::Missing => JobOutcome {
                id: job_plan.id.clone(),
                status: JobStatus::Missing,
                steps: Vec::new(),
                skip_reason: None,
                error: Some(format!(
                    "Unknown step kinds: {}",
                    job_plan.missing.join(", ")
                )),
            },
            PlanStatus::Ready => {
                let unmet = job_plan
                    .needs
                    .iter()
                    .find(|need| statuses.get(*need) != Some(&JobStatus::Passed));

                match unmet {
                    Some(dep) => JobOutcome {
                        id: job_plan.id.clone(),
                        status: JobStatus::Skipped,
                        steps: Vec::new(),
                        skip_reason: Some(format!("Skipped because '{}' did not pass", dep)),
                        error: None,
                    },
                    None => {
                        let job = &workflow.jobs[&job_plan.id];
                        run_job(&job_plan.id, job, executor)
                    }
                }
            }
        };

        statuses.insert(outcome.id.clone(), outcome.status);
        jobs.push(outcome);
    }

    let finished_at = chrono::Utc::now();
    let status = derive_overall_status(&jobs);
    let summary = build_summary(&jobs);

    Ok(RunOutcome {
        run_id: uuid::Uuid::new_v4().to_string(),
        workflow: run_plan.workflow,
        event: event.clone(),
        started_at: started_at.to_rfc3339(),
        finished_at: finished_at.to_rfc3339(),
        status,
        jobs,
        summary,
    })
}

fn run_job(id: &str, job: &Job, executor: &dyn StepExecutor) -> JobOutcome {
    let ctx = match executor.prepare(id, job) {
        Ok(ctx) => ctx,
        Err(err) => {
            log_status!("run", "Job '{}' failed during preparation: {}", id, err);
            return JobOutcome {
                id: id.to_string(),
                status: JobStatus::Failed,
                steps: Vec::new(),
                skip_reason: None,
                error: Some(err.to_string()),
            };
        }
    };

    let mut steps = Vec::with_capacity(job.steps.len());
    let mut failed = false;

    for step in &job.steps {
        let mut outcome = match executor.execute(id, step, &ctx) {
            Ok(outcome) => outcome,
            Err(err) => StepOutcome {
                label: step.label().to_string(),
                uses: step.uses.clone(),
                success: false,
                exit_code: 1,
                output: CapturedOutput::default(),
                data: Some(err.details.clone()),
                error: Some(err.message.clone()),
            },
        };

        outcome.redact(&ctx.secret_values);

        let success = outcome.success;
        steps.push(outcome);

        // First failing step fails the job; remaining steps never run.
        if !success {
            failed = true;
            break;
        }
    }

    let status = if failed {
        JobStatus::Failed
    } else {
        JobStatus::Passed
    };

    log_status!(
        "run",
        "Job '{}' {}",
        id,
        if failed { "failed" } else { "passed" }
    );

    JobOutcome {
        id: id.to_string(),
        status,
        steps,
        skip_reason: None,
        error: None,
    }
}

fn derive_overall_status(jobs: &[JobOutcome]) -> RunStatus {
    if jobs.iter().any(|j| j.status == JobStatus::Failed) {
        return RunStatus::Failed;
    }
    if jobs.iter().any(|j| j.status == JobStatus::Missing) {
        return RunStatus::Missing;
    }
    if jobs.iter().any(|j| j.status == JobStatus::Passed) {
        return RunStatus::Passed;
    }
    RunStatus::Skipped
}

fn build_summary(jobs: &[JobOutcome]) -> RunSummary {
    RunSummary {
        total: jobs.len(),
        passed: jobs.iter().filter(|j| j.status == JobStatus::Passed).count(),
        failed: jobs.iter().filter(|j| j.status == JobStatus::Failed).count(),
        skipped: jobs.iter().filter(|j| j.status == JobStatus::Skipped).count(),
        missing: jobs.iter().filter(|j| j.status == JobStatus::Missing).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::EventKind;
    use crate::core::workflow::{kinds, Workflow};
    use std::cell::RefCell;

    /// Executor that records what ran and fails commands on demand.
    struct ScriptedExecutor {
        executed: RefCell<Vec<(String, String)>>,
        failing_commands: Vec<String>,
        secret_values: Vec<String>,
        echo_env: bool,
    }

    impl ScriptedExecutor {
        fn new() -> Self {
            Self {
                executed: RefCell::new(Vec::new()),
                failing_commands: Vec::new(),
                secret_values: Vec::new(),
                echo_env: false,
            }
        }

        fn failing(commands: &[&str]) -> Self {
            let mut executor = Self::new();
            executor.failing_commands = commands.iter().map(|c| c.to_string()).collect();
            executor
        }

        fn executed(&self) -> Vec<(String, String)> {
            self.executed.borrow().clone()
        }

        fn ran_job(&self, job_id: &str) -> bool {
            self.executed.borrow().iter().any(|(job, _)| job == job_id)
        }
    }

    impl StepKindResolver for ScriptedExecutor {
        fn is_supported(&self, kind: &str) -> bool {
            kinds::ALL.contains(&kind)
        }
    }

    impl StepExecutor for ScriptedExecutor {
        fn prepare(&self, _job_id: &str, job: &Job) -> Result<JobContext> {
            Ok(JobContext {
                env: job.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                secret_values: self.secret_values.clone(),
            })
        }

        fn execute(&self, job_id: &str, step: &Step, _ctx: &JobContext) -> Result<StepOutcome> {
            self.executed
                .borrow_mut()
                .push((job_id.to_string(), step.label().to_string()));

            let command = step.run.clone().unwrap_or_default();
            if self.failing_commands.contains(&command) {
                return Ok(StepOutcome {
                    label: step.label().to_string(),
                    uses: step.uses.clone(),
                    success: false,
                    exit_code: 1,
                    output: CapturedOutput::new(String::new(), "boom".to_string()),
                    data: None,
                    error: None,
                });
            }

            let mut outcome = StepOutcome::succeeded(step.label(), step.uses.clone());
            if self.echo_env {
                outcome.output.stdout = self.secret_values.join(" ");
            }
            Ok(outcome)
        }
    }

    fn push(branch: &str) -> TriggerEvent {
        TriggerEvent::new(EventKind::Push, branch)
    }

    fn pull_request(branch: &str) -> TriggerEvent {
        TriggerEvent::new(EventKind::PullRequest, branch)
    }

    #[test]
    fn publish_never_runs_for_push_to_non_main_branch() {
        let workflow = Workflow::default_serving();
        let executor = ScriptedExecutor::new();

        let outcome = run(&workflow, &push("feature/x"), &executor).unwrap();

        assert!(!executor.ran_job("build-and-push"));
        let publish = outcome.jobs.iter().find(|j| j.id == "build-and-push").unwrap();
        assert_eq!(publish.status, JobStatus::Skipped);
        assert!(publish.skip_reason.as_deref().unwrap().contains("push"));
    }

    #[test]
    fn publish_never_runs_for_pull_requests_even_when_tests_pass() {
        let workflow = Workflow::default_serving();
        let executor = ScriptedExecutor::new();

        let outcome = run(&workflow, &pull_request("main"), &executor).unwrap();

        assert!(executor.ran_job("test"));
        assert!(!executor.ran_job("build-and-push"));
        let publish = outcome.jobs.iter().find(|j| j.id == "build-and-push").unwrap();
        assert_eq!(publish.status, JobStatus::Skipped);
        assert_eq!(outcome.status, RunStatus::Passed);
    }

    #[test]
    fn publish_never_runs_for_pull_requests_when_tests_fail() {
        let workflow = Workflow::default_serving();
        let executor = ScriptedExecutor::failing(&["pytest"]);

        let outcome = run(&workflow, &pull_request("main"), &executor).unwrap();

        assert!(!executor.ran_job("build-and-push"));
        assert_eq!(outcome.status, RunStatus::Failed);
    }

    #[test]
    fn publish_runs_for_push_to_main_when_tests_pass() {
        let workflow = Workflow::default_serving();
        let executor = ScriptedExecutor::new();

        let outcome = run(&workflow, &push("main"), &executor).unwrap();

        assert!(executor.ran_job("build-and-push"));
        assert_eq!(outcome.status, RunStatus::Passed);
        assert_eq!(outcome.summary.passed, 2);

        // Test steps all ran before any publish step.
        let order = executor.executed();
        let last_test = order.iter().rposition(|(job, _)| job == "test").unwrap();
        let first_publish = order
            .iter()
            .position(|(job, _)| job == "build-and-push")
            .unwrap();
        assert!(last_test < first_publish);
    }

    #[test]
    fn publish_skipped_when_tests_fail_on_main() {
        let workflow = Workflow::default_serving();
        let executor = ScriptedExecutor::failing(&["pytest"]);

        let outcome = run(&workflow, &push("main"), &executor).unwrap();

        assert!(!executor.ran_job("build-and-push"));
        let publish = outcome.jobs.iter().find(|j| j.id == "build-and-push").unwrap();
        assert_eq!(publish.status, JobStatus::Skipped);
        assert_eq!(
            publish.skip_reason.as_deref(),
            Some("Skipped because 'test' did not pass")
        );
        assert_eq!(outcome.status, RunStatus::Failed);
    }

    #[test]
    fn first_failing_step_halts_the_job() {
        let workflow = Workflow::default_serving();
        let executor = ScriptedExecutor::failing(&["pip install -r requirements.txt"]);

        let outcome = run(&workflow, &push("main"), &executor).unwrap();

        let test = outcome.jobs.iter().find(|j| j.id == "test").unwrap();
        assert_eq!(test.status, JobStatus::Failed);
        assert_eq!(test.steps.len(), 1);
        assert!(!executor
            .executed()
            .iter()
            .any(|(_, label)| label == "Run test suite"));
    }

    #[test]
    fn unknown_step_kind_is_missing_not_failed() {
        let yaml = r#"
name: exotic
on:
  push:
    branches: [main]
jobs:
  deploy:
    steps:
      - uses: rocket.launch
"#;
        let workflow = Workflow::from_yaml_str(yaml).unwrap();
        let executor = ScriptedExecutor::new();

        let outcome = run(&workflow, &push("main"), &executor).unwrap();

        assert_eq!(outcome.jobs[0].status, JobStatus::Missing);
        assert_eq!(outcome.status, RunStatus::Missing);
        assert!(outcome.jobs[0]
            .error
            .as_deref()
            .unwrap()
            .contains("rocket.launch"));
    }

    #[test]
    fn dependency_cycle_is_a_validation_error() {
        let yaml = r#"
name: cyclic
jobs:
  a:
    needs: [b]
    steps:
      - run: "true"
  b:
    needs: [a]
    steps:
      - run: "true"
"#;
        let workflow = Workflow::from_yaml_str(yaml).unwrap();
        let err = plan(&workflow, &push("main"), &ScriptedExecutor::new()).unwrap_err();
        assert_eq!(err.code.as_str(), "workflow.invalid");
        assert!(err.message.contains("cycle"));
    }

    #[test]
    fn plan_orders_jobs_after_their_dependencies() {
        let workflow = Workflow::default_serving();
        let run_plan = plan(&workflow, &push("main"), &ScriptedExecutor::new()).unwrap();

        let ids: Vec<&str> = run_plan.jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["test", "build-and-push"]);
        assert_eq!(run_plan.jobs[1].status, PlanStatus::Ready);
    }

    #[test]
    fn plan_marks_gated_job_skipped_for_pull_request() {
        let workflow = Workflow::default_serving();
        let run_plan = plan(&workflow, &pull_request("main"), &ScriptedExecutor::new()).unwrap();

        let publish = run_plan
            .jobs
            .iter()
            .find(|j| j.id == "build-and-push")
            .unwrap();
        assert_eq!(publish.status, PlanStatus::Skipped);
        assert!(publish.reason.is_some());
    }

    #[test]
    fn secret_values_are_redacted_from_captured_output() {
        let workflow = Workflow::default_serving();
        let mut executor = ScriptedExecutor::new();
        executor.secret_values = vec!["hub-token-123".to_string()];
        executor.echo_env = true;

        let outcome = run(&workflow, &push("main"), &executor).unwrap();

        for job in &outcome.jobs {
            for step in &job.steps {
                assert!(!step.output.stdout.contains("hub-token-123"));
            }
        }
    }

    #[test]
    fn summary_counts_every_job_once() {
        let workflow = Workflow::default_serving();
        let executor = ScriptedExecutor::failing(&["pytest"]);

        let outcome = run(&workflow, &push("main"), &executor).unwrap();

        assert_eq!(outcome.summary.total, 2);
        assert_eq!(outcome.summary.failed, 1);
        assert_eq!(outcome.summary.skipped, 1);
        assert_eq!(outcome.summary.passed, 0);
    }

    #[test]
    fn all_jobs_gated_means_run_skipped() {
        let yaml = r#"
name: gated
on:
  pull_request:
    branches: [main]
jobs:
  publish:
    when:
      events: [push]
    steps:
      - run: "true"
"#;
        let workflow = Workflow::from_yaml_str(yaml).unwrap();
        let outcome = run(&workflow, &pull_request("main"), &ScriptedExecutor::new()).unwrap();
        assert_eq!(outcome.status, RunStatus::Skipped);
    }
}
