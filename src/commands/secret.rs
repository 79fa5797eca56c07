use std::io::Read;

use clap::{Args, Subcommand};
use serde::Serialize;

use gantry::registry::{self, RegistryAuth};
use gantry::secrets::SecretStore;
use gantry::Error;

use super::CmdResult;

#[derive(Args)]
pub struct SecretArgs {
    #[command(subcommand)]
    pub command: SecretCommand,
}

#[derive(Subcommand)]
pub enum SecretCommand {
    /// Store a secret in the system keychain
    Set(SetArgs),
    /// Remove a secret from the system keychain
    Rm(RmArgs),
    /// Verify the registry credential pair against Docker Hub
    Verify,
}

#[derive(Args)]
pub struct SetArgs {
    /// Secret name (e.g. DOCKERHUB_TOKEN)
    pub name: String,

    /// Secret value (read from stdin when omitted, keeping it out of argv)
    pub value: Option<String>,
}

#[derive(Args)]
pub struct RmArgs {
    /// Secret name
    pub name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretOutput {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

pub fn run(args: SecretArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<SecretOutput> {
    let store = SecretStore::default();

    match args.command {
        SecretCommand::Set(args) => {
            let value = match args.value {
                Some(value) => value,
                None => read_value_from_stdin()?,
            };
            store.set(&args.name, &value)?;

            Ok((
                SecretOutput {
                    command: "secret.set".to_string(),
                    name: Some(args.name),
                    username: None,
                },
                0,
            ))
        }
        SecretCommand::Rm(args) => {
            store.delete(&args.name)?;

            Ok((
                SecretOutput {
                    command: "secret.rm".to_string(),
                    name: Some(args.name),
                    username: None,
                },
                0,
            ))
        }
        SecretCommand::Verify => {
            let auth = RegistryAuth::resolve(&store)?;
            registry::verify_credentials(&auth)?;

            Ok((
                SecretOutput {
                    command: "secret.verify".to_string(),
                    name: None,
                    username: Some(auth.username),
                },
                0,
            ))
        }
    }
}

fn read_value_from_stdin() -> gantry::Result<String> {
    use std::io::IsTerminal;

    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Err(Error::validation_missing_argument(vec![
            "value (or pipe it via stdin)".to_string(),
        ]));
    }

    let mut buf = String::new();
    stdin
        .read_to_string(&mut buf)
        .map_err(|e| Error::internal_io(e.to_string(), Some("read stdin".to_string())))?;

    let value = buf.trim_end_matches(['\r', '\n']).to_string();
    if value.is_empty() {
        return Err(Error::validation_missing_argument(vec!["value".to_string()]));
    }
    Ok(value)
}
