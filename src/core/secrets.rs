//! Secret resolution and redaction.
//!
//! Secrets are looked up in the process environment first, then in the
//! system keychain (macOS Keychain, Linux Secret Service, Windows
//! Credential Manager). Values never appear in serialized output; the
//! runner redacts them from every captured stream.

use keyring::Entry;

use crate::core::error::{Error, Result};
use crate::utils::validation;

const SERVICE_NAME: &str = "gantry";

fn keyring_error(e: keyring::Error) -> Error {
    Error::internal_unexpected(format!("Keychain error: {}", e))
}

#[derive(Debug, Clone)]
pub struct SecretStore {
    service: String,
}

impl Default for SecretStore {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

impl SecretStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Resolve a secret: environment first, keychain second.
    ///
    /// Returns `None` when the name is set in neither place.
    pub fn get(&self, name: &str) -> Result<Option<String>> {
        let name = validation::require_env_name(name, "secret")?;

        if let Ok(value) = std::env::var(name) {
            if !value.is_empty() {
                return Ok(Some(value));
            }
        }

        let entry = Entry::new(&self.service, name).map_err(keyring_error)?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(keyring_error(e)),
        }
    }

    /// Resolve a secret or fail with `secret.not_found`.
    pub fn require(&self, name: &str) -> Result<String> {
        self.get(name)?.ok_or_else(|| Error::secret_not_found(name))
    }

    /// Store a secret in the keychain.
    pub fn set(&self, name: &str, value: &str) -> Result<()> {
        let name = validation::require_env_name(name, "secret")?;
        let entry = Entry::new(&self.service, name).map_err(keyring_error)?;
        entry.set_password(value).map_err(keyring_error)?;
        Ok(())
    }

    /// Delete a secret from the keychain. Deleting a missing entry is not
    /// an error.
    pub fn delete(&self, name: &str) -> Result<()> {
        let name = validation::require_env_name(name, "secret")?;
        let entry = Entry::new(&self.service, name).map_err(keyring_error)?;
        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(keyring_error(e)),
        }
    }
}

/// Replace every secret value in `text` with a mask.
///
/// Empty values are ignored; masking them would corrupt arbitrary text.
pub fn redact(text: &str, values: &[String]) -> String {
    let mut result = text.to_string();
    for value in values {
        if !value.is_empty() {
            result = result.replace(value.as_str(), "***");
        }
    }
    result
}
