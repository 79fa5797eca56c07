//! Registry authentication and image publishing.
//!
//! Credentials are opaque: the token travels to the container tool over
//! stdin, never argv, and is redacted from anything captured. Serialized
//! output and error details carry secret names only.

use std::process::Command;

use base64::Engine;
use serde::Serialize;

use crate::core::defaults;
use crate::core::error::{CommandFailedDetails, Error, Result};
use crate::core::secrets::{self, SecretStore};
use crate::log_status;
use crate::utils::command;

#[derive(Clone)]
pub struct RegistryAuth {
    pub username: String,
    token: String,
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("token", &"***")
            .finish()
    }
}

impl RegistryAuth {
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: token.into(),
        }
    }

    /// Resolve the publish credentials from the secret store.
    ///
    /// Either name missing halts publishing before anything is pushed.
    pub fn resolve(store: &SecretStore) -> Result<Self> {
        let username = store.require(defaults::SECRET_REGISTRY_USERNAME)?;
        let token = store.require(defaults::SECRET_REGISTRY_TOKEN)?;
        Ok(Self::new(username, token))
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// HTTP Basic header for registry token requests.
    pub fn basic_header(&self) -> String {
        let raw = format!("{}:{}", self.username, self.token);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        )
    }
}

/// Default push target for an authenticated user.
pub fn default_reference(username: &str) -> String {
    format!("{}/{}:{}", username, defaults::REPOSITORY, defaults::TAG)
}

/// Validate a `namespace/repository[:tag]` image reference.
///
/// Name components are lowercase alphanumerics joined by `.`, `_`, or `-`;
/// the namespace separator is mandatory since pushes without one target a
/// library repository the credentials cannot own.
pub fn validate_reference(reference: &str) -> Result<()> {
    let re = regex::Regex::new(
        r"^[a-z0-9]+(?:[._-][a-z0-9]+)*(?:/[a-z0-9]+(?:[._-][a-z0-9]+)*)+(?::[A-Za-z0-9_][A-Za-z0-9._-]{0,127})?$",
    )
    .map_err(|e| Error::internal_unexpected(format!("Reference pattern failed to compile: {}", e)))?;

    if re.is_match(reference) {
        Ok(())
    } else {
        Err(Error::validation_invalid_argument(
            "reference",
            format!(
                "'{}' is not a valid image reference (expected namespace/repository[:tag])",
                reference
            ),
            Some(reference.to_string()),
            None,
        ))
    }
}

/// Log in to the registry through the container tool.
///
/// The token is written to the child's stdin; a failed login halts
/// publishing and nothing is pushed.
pub fn login(auth: &RegistryAuth) -> Result<()> {
    log_status!("registry", "Logging in as {}", auth.username);

    let docker = defaults::docker_bin();
    let output = command::run_with_stdin(
        &docker,
        &["login", "--username", auth.username.as_str(), "--password-stdin"],
        auth.token(),
        "registry login",
    )?;

    if !output.success {
        let problem = secrets::redact(
            &command::output_tail(&output.stderr, 5),
            &[auth.token.clone()],
        );
        return Err(Error::registry_auth_failed(problem));
    }

    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushOutcome {
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Push a tagged image to the registry.
pub fn push(reference: &str) -> Result<PushOutcome> {
    validate_reference(reference)?;

    log_status!("registry", "Pushing {}", reference);

    let docker = defaults::docker_bin();
    let output = Command::new(&docker)
        .args(["push", reference])
        .output()
        .map_err(|e| {
            Error::internal_io(
                format!("Failed to run {}: {}", docker, e),
                Some("registry push".to_string()),
            )
        })?;

    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        return Err(Error::registry_push_failed(CommandFailedDetails {
            command: format!("{} push {}", docker, reference),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: command::output_tail(&stdout, 15),
            stderr: command::output_tail(&stderr, 15),
        }));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(PushOutcome {
        reference: reference.to_string(),
        digest: parse_digest(&stdout),
    })
}

fn parse_digest(output: &str) -> Option<String> {
    let re = regex::Regex::new(r"digest:\s*(sha256:[0-9a-f]+)").ok()?;
    re.captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Verify the credential pair against the Docker Hub token service without
/// needing a container daemon.
pub fn verify_credentials(auth: &RegistryAuth) -> Result<()> {
    let scope = format!("repository:{}/{}:push,pull", auth.username, defaults::REPOSITORY);
    let url = format!(
        "https://auth.docker.io/token?service=registry.docker.io&scope={}",
        scope
    );

    let client = reqwest::blocking::Client::new();
    let response = client
        .get(&url)
        .header("Authorization", auth.basic_header())
        .send()
        .map_err(|e| Error::internal_unexpected(format!("Token service unreachable: {}", e)))?;

    if response.status().is_success() {
        Ok(())
    } else {
        Err(Error::registry_auth_failed(format!(
            "Token service rejected the credentials (HTTP {})",
            response.status().as_u16()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_reference_uses_latest_tag() {
        assert_eq!(
            default_reference("octocat"),
            "octocat/deploy-ml-model:latest"
        );
    }

    #[test]
    fn validate_reference_accepts_namespaced_references() {
        assert!(validate_reference("octocat/deploy-ml-model:latest").is_ok());
        assert!(validate_reference("octo.cat/some_repo").is_ok());
        assert!(validate_reference("a/b/c:v1.2.3").is_ok());
    }

    #[test]
    fn validate_reference_rejects_bare_and_malformed_references() {
        assert!(validate_reference("deploy-ml-model").is_err());
        assert!(validate_reference("Upper/Case").is_err());
        assert!(validate_reference("user/repo:").is_err());
        assert!(validate_reference("user//repo").is_err());
        assert!(validate_reference("").is_err());
    }

    #[test]
    fn basic_header_encodes_username_and_token() {
        let auth = RegistryAuth::new("user", "tok");
        assert_eq!(auth.basic_header(), "Basic dXNlcjp0b2s=");
    }

    #[test]
    fn debug_output_never_contains_the_token() {
        let auth = RegistryAuth::new("user", "super-secret-token");
        let debugged = format!("{:?}", auth);
        assert!(!debugged.contains("super-secret-token"));
        assert!(debugged.contains("***"));
    }

    #[test]
    fn parse_digest_extracts_sha256() {
        let output = "latest: digest: sha256:0a1b2c3d size: 1234";
        assert_eq!(parse_digest(output), Some("sha256:0a1b2c3d".to_string()));
        assert_eq!(parse_digest("no digest here"), None);
    }

    // Requires network access and real Docker Hub credentials in the
    // environment. Run manually with: cargo test registry -- --ignored
    #[test]
    #[ignore]
    fn verify_credentials_against_docker_hub() {
        let store = SecretStore::default();
        let auth = RegistryAuth::resolve(&store).unwrap();
        verify_credentials(&auth).unwrap();
    }
}
