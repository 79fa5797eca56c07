use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ValidationMissingArgument,
    ValidationInvalidArgument,
    ValidationInvalidYaml,

    WorkflowNotFound,
    WorkflowInvalid,
    WorkflowTriggerUnmatched,

    EventBranchUnknown,

    SecretNotFound,

    ImageSpecInvalid,
    ImageBuildFailed,

    RegistryAuthFailed,
    RegistryPushFailed,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",
            ErrorCode::ValidationInvalidYaml => "validation.invalid_yaml",

            ErrorCode::WorkflowNotFound => "workflow.not_found",
            ErrorCode::WorkflowInvalid => "workflow.invalid",
            ErrorCode::WorkflowTriggerUnmatched => "workflow.trigger_unmatched",

            ErrorCode::EventBranchUnknown => "event.branch_unknown",

            ErrorCode::SecretNotFound => "secret.not_found",

            ErrorCode::ImageSpecInvalid => "image.spec_invalid",
            ErrorCode::ImageBuildFailed => "image.build_failed",

            ErrorCode::RegistryAuthFailed => "registry.auth_failed",
            ErrorCode::RegistryPushFailed => "registry.push_failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArgumentDetails {
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInvalidDetails {
    pub problem: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub jobs: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFailedDetails {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        let details = serde_json::to_value(MissingArgumentDetails { args })
            .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        Self::new(
            ErrorCode::ValidationMissingArgument,
            "Missing required argument",
            details,
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let details = serde_json::to_value(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.into(),
            id,
            tried,
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            details,
        )
    }

    pub fn validation_invalid_yaml(err: serde_yml::Error, context: Option<String>) -> Self {
        let details = serde_json::json!({
            "error": err.to_string(),
            "context": context,
        });

        Self::new(ErrorCode::ValidationInvalidYaml, "Invalid YAML", details)
    }

    pub fn workflow_not_found(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(
            ErrorCode::WorkflowNotFound,
            "Workflow file not found",
            serde_json::json!({ "path": path }),
        )
        .with_hint("Run 'gantry init' to create a default workflow file")
    }

    pub fn workflow_invalid(problem: impl Into<String>, jobs: Vec<String>) -> Self {
        let problem = problem.into();
        let details = serde_json::to_value(WorkflowInvalidDetails {
            problem: problem.clone(),
            jobs,
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(ErrorCode::WorkflowInvalid, problem, details)
    }

    pub fn workflow_trigger_unmatched(event: impl Into<String>, branch: impl Into<String>) -> Self {
        let event: String = event.into();
        let branch: String = branch.into();
        Self::new(
            ErrorCode::WorkflowTriggerUnmatched,
            "Event does not match any workflow trigger",
            serde_json::json!({ "event": event, "branch": branch }),
        )
    }

    pub fn event_branch_unknown(problem: impl Into<String>) -> Self {
        let problem: String = problem.into();
        Self::new(
            ErrorCode::EventBranchUnknown,
            "Could not detect the current branch",
            serde_json::json!({ "problem": problem }),
        )
        .with_hint("Pass the branch explicitly with --branch <name>")
    }

    pub fn secret_not_found(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            ErrorCode::SecretNotFound,
            format!("Secret '{}' is not set", name),
            serde_json::json!({ "name": name.clone() }),
        )
        .with_hint(format!(
            "Export {} in the environment or run 'gantry secret set {}'",
            name, name
        ))
    }

    pub fn image_spec_invalid(field: impl Into<String>, problem: impl Into<String>) -> Self {
        let field: String = field.into();
        let problem: String = problem.into();
        Self::new(
            ErrorCode::ImageSpecInvalid,
            "Invalid image spec",
            serde_json::json!({ "field": field, "problem": problem }),
        )
    }

    pub fn image_build_failed(details: CommandFailedDetails) -> Self {
        let details =
            serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(ErrorCode::ImageBuildFailed, "Image build failed", details)
    }

    pub fn registry_auth_failed(problem: impl Into<String>) -> Self {
        let problem: String = problem.into();
        Self::new(
            ErrorCode::RegistryAuthFailed,
            "Registry authentication failed",
            serde_json::json!({ "problem": problem }),
        )
    }

    pub fn registry_push_failed(details: CommandFailedDetails) -> Self {
        let details =
            serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(ErrorCode::RegistryPushFailed, "Registry push failed", details)
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let details = serde_json::to_value(InternalIoErrorDetails {
            error: error.into(),
            context,
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(ErrorCode::InternalIoError, "IO error", details)
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let error: String = error.into();
        let details = serde_json::json!({
            "error": error,
            "context": context,
        });

        Self::new(ErrorCode::InternalJsonError, "JSON error", details)
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        let error: String = error.into();
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error }),
        )
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::internal_unexpected(message)
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_as_dotted_strings() {
        assert_eq!(ErrorCode::WorkflowInvalid.as_str(), "workflow.invalid");
        assert_eq!(
            ErrorCode::RegistryAuthFailed.as_str(),
            "registry.auth_failed"
        );
        assert_eq!(ErrorCode::SecretNotFound.as_str(), "secret.not_found");
    }

    #[test]
    fn secret_not_found_names_the_secret_but_carries_no_value() {
        let err = Error::secret_not_found("DOCKERHUB_TOKEN");
        assert_eq!(err.code, ErrorCode::SecretNotFound);
        assert_eq!(err.details["name"], "DOCKERHUB_TOKEN");
        assert!(!err.hints.is_empty());
    }

    #[test]
    fn with_hint_accumulates() {
        let err = Error::other("boom").with_hint("first").with_hint("second");
        assert_eq!(err.hints.len(), 2);
        assert_eq!(err.hints[1].message, "second");
    }
}
