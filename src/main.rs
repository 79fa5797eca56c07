use clap::{Parser, Subcommand};

use commands::GlobalArgs;

mod commands;
mod output;

use commands::{image, init, plan, publish, run, secret};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "gantry")]
#[command(version = VERSION)]
#[command(about = "CLI for container build, test, and publish pipeline automation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow for a trigger event
    Run(run::RunArgs),
    /// Show the gated plan for a trigger event without executing
    Plan(plan::PlanArgs),
    /// Image building and artifact checks
    Image(image::ImageArgs),
    /// Build, log in, and push the serving image
    Publish(publish::PublishArgs),
    /// Manage registry secrets
    Secret(secret::SecretArgs),
    /// Write the default workflow file
    Init(init::InitArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let global = GlobalArgs {};

    let (json_result, exit_code) = match cli.command {
        Commands::Run(args) => output::map_cmd_result_to_json(run::run(args, &global)),
        Commands::Plan(args) => output::map_cmd_result_to_json(plan::run(args, &global)),
        Commands::Image(args) => output::map_cmd_result_to_json(image::run(args, &global)),
        Commands::Publish(args) => output::map_cmd_result_to_json(publish::run(args, &global)),
        Commands::Secret(args) => output::map_cmd_result_to_json(secret::run(args, &global)),
        Commands::Init(args) => output::map_cmd_result_to_json(init::run(args, &global)),
    };

    if output::print_json_result(json_result).is_err() {
        return std::process::ExitCode::from(1);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if (0..=255).contains(&code) {
        code as u8
    } else {
        1
    }
}
