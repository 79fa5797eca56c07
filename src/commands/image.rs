use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde::Serialize;

use gantry::artifact::{self, ArtifactReport};
use gantry::image::{self, ImageBuild, ImageSpec};
use gantry::registry;
use gantry::secrets::SecretStore;
use gantry::{defaults, Error};
use gantry::utils::io;

use super::CmdResult;

#[derive(Args)]
pub struct ImageArgs {
    #[command(subcommand)]
    pub command: ImageCommand,
}

#[derive(Subcommand)]
pub enum ImageCommand {
    /// Build the serving image from a build context
    Build(BuildArgs),
    /// Report whether the model artifact is present
    Check(CheckArgs),
}

#[derive(Args)]
pub struct BuildArgs {
    /// Build context directory
    #[arg(long, default_value = ".")]
    pub context: String,

    /// Image reference to tag (derived from the username secret when omitted)
    #[arg(long)]
    pub tag: Option<String>,

    /// Image spec file (YAML); the built-in serving spec when omitted
    #[arg(long)]
    pub spec: Option<PathBuf>,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Artifact path or glob pattern
    #[arg(default_value = defaults::MODEL_ARTIFACT)]
    pub path: String,
}

#[derive(Serialize)]
pub struct ImageBuildOutput {
    pub command: String,
    #[serde(flatten)]
    pub build: ImageBuild,
}

#[derive(Serialize)]
pub struct ImageCheckOutput {
    pub command: String,
    #[serde(flatten)]
    pub report: ArtifactReport,
}

pub enum ImageOutput {
    Build(ImageBuildOutput),
    Check(ImageCheckOutput),
}

impl Serialize for ImageOutput {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ImageOutput::Build(output) => output.serialize(serializer),
            ImageOutput::Check(output) => output.serialize(serializer),
        }
    }
}

pub fn run(args: ImageArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<ImageOutput> {
    match args.command {
        ImageCommand::Build(args) => run_build(args),
        ImageCommand::Check(args) => run_check(args),
    }
}

fn run_build(args: BuildArgs) -> CmdResult<ImageOutput> {
    let context = image::resolve_context(&args.context);

    let spec = match &args.spec {
        Some(path) => {
            let content = io::read_file(path, "read image spec")?;
            serde_yml::from_str::<ImageSpec>(&content).map_err(|e| {
                Error::validation_invalid_yaml(e, Some(format!("parse image spec {}", path.display())))
            })?
        }
        None => ImageSpec::default_serving(),
    };

    let reference = match args.tag {
        Some(tag) => tag,
        None => {
            let username = SecretStore::default().require(defaults::SECRET_REGISTRY_USERNAME)?;
            registry::default_reference(&username)
        }
    };

    let build = image::build(&spec, &context, &reference)?;

    Ok((
        ImageOutput::Build(ImageBuildOutput {
            command: "image.build".to_string(),
            build,
        }),
        0,
    ))
}

fn run_check(args: CheckArgs) -> CmdResult<ImageOutput> {
    let report = artifact::check(&args.path);

    // The check is an observation: missing artifacts report, never fail.
    Ok((
        ImageOutput::Check(ImageCheckOutput {
            command: "image.check".to_string(),
            report,
        }),
        0,
    ))
}
