use std::path::PathBuf;

use clap::ValueEnum;
use gantry::{Error, EventKind};

pub mod image;
pub mod init;
pub mod plan;
pub mod publish;
pub mod run;
pub mod secret;

pub type CmdResult<T> = gantry::Result<(T, i32)>;

pub(crate) struct GlobalArgs {}

/// CLI spelling of trigger events.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum EventArg {
    Push,
    PullRequest,
}

impl From<EventArg> for EventKind {
    fn from(value: EventArg) -> Self {
        match value {
            EventArg::Push => EventKind::Push,
            EventArg::PullRequest => EventKind::PullRequest,
        }
    }
}

/// Working directory for the invoked command.
pub(crate) fn working_dir() -> gantry::Result<PathBuf> {
    std::env::current_dir()
        .map_err(|e| Error::internal_io(e.to_string(), Some("resolve working directory".to_string())))
}
