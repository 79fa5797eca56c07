use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use gantry::runner;
use gantry::secrets::SecretStore;
use gantry::workflow::Workflow;
use gantry::{defaults, RunOutcome, RunStatus, TriggerEvent};

use super::{CmdResult, EventArg};

#[derive(Args)]
pub struct RunArgs {
    /// Workflow file (defaults to gantry.yml in the working directory)
    #[arg(long, short = 'f')]
    pub file: Option<PathBuf>,

    /// Trigger event kind
    #[arg(long, value_enum, default_value = "push")]
    pub event: EventArg,

    /// Branch the event happened on (detected from git when omitted)
    #[arg(long)]
    pub branch: Option<String>,

    /// Use the built-in serving workflow instead of a file
    #[arg(long)]
    pub builtin: bool,
}

#[derive(Serialize)]
pub struct RunOutput {
    pub command: String,
    #[serde(flatten)]
    pub outcome: RunOutcome,
}

pub fn run(args: RunArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<RunOutput> {
    let dir = super::working_dir()?;
    let workflow = load_workflow(&dir, args.file.as_deref(), args.builtin)?;
    let event = TriggerEvent::detect(args.event.into(), args.branch, &dir.to_string_lossy())?;

    let outcome = runner::run_workflow(&workflow, &event, &dir, SecretStore::default())?;

    // Skipped jobs are not failures; only executed jobs decide the exit.
    let exit_code = match outcome.status {
        RunStatus::Passed | RunStatus::Skipped => 0,
        RunStatus::Failed | RunStatus::Missing => 1,
    };

    Ok((
        RunOutput {
            command: "run".to_string(),
            outcome,
        },
        exit_code,
    ))
}

pub(crate) fn load_workflow(
    dir: &std::path::Path,
    file: Option<&std::path::Path>,
    builtin: bool,
) -> gantry::Result<Workflow> {
    if builtin {
        return Ok(Workflow::default_serving());
    }
    let path = match file {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => dir.join(path),
        None => dir.join(defaults::WORKFLOW_FILE),
    };
    Workflow::load(&path)
}
