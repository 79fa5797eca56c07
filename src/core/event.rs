//! Trigger events and job-level gating.
//!
//! An event is what starts a run: a push or a pull request, carrying the
//! branch it happened on. Gates are the hard filter a job applies to the
//! event before it is allowed to execute.

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};
use crate::utils::command;
use crate::utils::validation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
    pub kind: EventKind,
    pub branch: String,
}

impl TriggerEvent {
    pub fn new(kind: EventKind, branch: impl Into<String>) -> Self {
        Self {
            kind,
            branch: branch.into(),
        }
    }

    /// Build an event from CLI input, reading the branch from git when
    /// not given explicitly.
    pub fn detect(kind: EventKind, branch: Option<String>, dir: &str) -> Result<Self> {
        if let Some(branch) = branch {
            let branch = validation::require_non_empty(&branch, "branch", "Branch cannot be empty")?;
            return Ok(Self::new(kind, branch));
        }

        let branch = current_branch(dir).ok_or_else(|| {
            Error::event_branch_unknown(format!("'{}' is not inside a git checkout", dir))
        })?;

        Ok(Self::new(kind, branch))
    }
}

/// Current branch name, or None outside a repository or on a detached HEAD.
pub fn current_branch(dir: &str) -> Option<String> {
    let branch = command::run_in_optional(dir, "git", &["rev-parse", "--abbrev-ref", "HEAD"])?;
    if branch == "HEAD" {
        None
    } else {
        Some(branch)
    }
}

/// Job-level gate. An empty axis means "no constraint on that axis";
/// a populated axis must contain the event's value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<String>,
}

impl Gate {
    pub fn permits(&self, event: &TriggerEvent) -> bool {
        let event_ok = self.events.is_empty() || self.events.contains(&event.kind);
        let branch_ok = self.branches.is_empty() || self.branches.iter().any(|b| b == &event.branch);
        event_ok && branch_ok
    }

    /// Human-readable reason used when a gated job is skipped.
    pub fn describe(&self) -> String {
        let events = if self.events.is_empty() {
            "any event".to_string()
        } else {
            self.events
                .iter()
                .map(|e| e.as_str().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let branches = if self.branches.is_empty() {
            "any branch".to_string()
        } else {
            self.branches.join(", ")
        };
        format!("gated to {} on {}", events, branches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_only_push_gate() -> Gate {
        Gate {
            events: vec![EventKind::Push],
            branches: vec!["main".to_string()],
        }
    }

    #[test]
    fn gate_permits_push_to_main() {
        let gate = main_only_push_gate();
        assert!(gate.permits(&TriggerEvent::new(EventKind::Push, "main")));
    }

    #[test]
    fn gate_blocks_push_to_other_branches() {
        let gate = main_only_push_gate();
        assert!(!gate.permits(&TriggerEvent::new(EventKind::Push, "feature/x")));
        assert!(!gate.permits(&TriggerEvent::new(EventKind::Push, "develop")));
    }

    #[test]
    fn gate_blocks_pull_requests_even_on_main() {
        let gate = main_only_push_gate();
        assert!(!gate.permits(&TriggerEvent::new(EventKind::PullRequest, "main")));
    }

    #[test]
    fn empty_gate_permits_everything() {
        let gate = Gate::default();
        assert!(gate.permits(&TriggerEvent::new(EventKind::Push, "anything")));
        assert!(gate.permits(&TriggerEvent::new(EventKind::PullRequest, "main")));
    }

    #[test]
    fn detect_prefers_explicit_branch() {
        let event = TriggerEvent::detect(EventKind::Push, Some("main".to_string()), "/tmp").unwrap();
        assert_eq!(event.branch, "main");
    }

    #[test]
    fn detect_rejects_empty_branch() {
        let result = TriggerEvent::detect(EventKind::Push, Some("  ".to_string()), "/tmp");
        assert!(result.is_err());
    }

    #[test]
    fn event_kind_serializes_snake_case() {
        assert_eq!(EventKind::PullRequest.as_str(), "pull_request");
        let json = serde_json::to_string(&EventKind::PullRequest).unwrap();
        assert_eq!(json, "\"pull_request\"");
    }
}
