use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use gantry::runner;
use gantry::secrets::SecretStore;
use gantry::{RunPlan, TriggerEvent};

use super::{CmdResult, EventArg};

#[derive(Args)]
pub struct PlanArgs {
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
pub struct PlanOutput {
    pub command: String,
    #[serde(flatten)]
    pub plan: RunPlan,
}

pub fn run(args: PlanArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<PlanOutput> {
    let dir = super::working_dir()?;
    let workflow = super::run::load_workflow(&dir, args.file.as_deref(), args.builtin)?;
    let event = TriggerEvent::detect(args.event.into(), args.branch, &dir.to_string_lossy())?;

    let plan = runner::plan_workflow(&workflow, &event, &dir, SecretStore::default())?;

    Ok((
        PlanOutput {
            command: "plan".to_string(),
            plan,
        },
        0,
    ))
}
