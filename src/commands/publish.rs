use clap::Args;
use serde::Serialize;

use gantry::image::{self, ImageBuild, ImageSpec};
use gantry::registry::{self, PushOutcome, RegistryAuth};
use gantry::secrets::SecretStore;

use super::CmdResult;

#[derive(Args)]
pub struct PublishArgs {
    /// Image reference to publish (derived from the username secret when omitted)
    #[arg(long)]
    pub tag: Option<String>,

    /// Build context directory
    #[arg(long, default_value = ".")]
    pub context: String,

    /// Push an already-built image without rebuilding
    #[arg(long)]
    pub skip_build: bool,
}

#[derive(Serialize)]
pub struct PublishOutput {
    pub command: String,
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub built: Option<ImageBuild>,
    #[serde(flatten)]
    pub pushed: PushOutcome,
}

pub fn run(args: PublishArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<PublishOutput> {
    let store = SecretStore::default();

    // Credentials resolve before anything is built or pushed.
    let auth = RegistryAuth::resolve(&store)?;

    let reference = args
        .tag
        .unwrap_or_else(|| registry::default_reference(&auth.username));

    let built = if args.skip_build {
        None
    } else {
        let context = image::resolve_context(&args.context);
        Some(image::build(&ImageSpec::default_serving(), &context, &reference)?)
    };

    registry::login(&auth)?;
    let pushed = registry::push(&reference)?;

    Ok((
        PublishOutput {
            command: "publish".to_string(),
            reference,
            built,
            pushed,
        },
        0,
    ))
}
