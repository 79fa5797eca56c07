use clap::Args;
use serde::Serialize;

use gantry::workflow::DEFAULT_WORKFLOW_YAML;
use gantry::utils::io;
use gantry::{defaults, Error};

use super::CmdResult;

#[derive(Args)]
pub struct InitArgs {
    /// Overwrite an existing workflow file
    #[arg(long)]
    pub force: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitOutput {
    pub command: String,
    pub path: String,
    pub created: bool,
}

pub fn run(args: InitArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<InitOutput> {
    let dir = super::working_dir()?;
    let path = dir.join(defaults::WORKFLOW_FILE);

    if path.exists() && !args.force {
        return Err(Error::validation_invalid_argument(
            "workflow",
            format!("{} already exists", path.display()),
            None,
            Some(vec!["Pass --force to overwrite it".to_string()]),
        ));
    }

    io::write_file_atomic(&path, DEFAULT_WORKFLOW_YAML, "write workflow file")?;

    Ok((
        InitOutput {
            command: "init".to_string(),
            path: path.display().to_string(),
            created: true,
        },
        0,
    ))
}
