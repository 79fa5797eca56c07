//! Model artifact existence reporting.
//!
//! The artifact check is a debug observation, not a gate: it reports
//! whether the model file is present without ever failing the run. The
//! report is verifiable offline against the filesystem alone.

use std::path::PathBuf;

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactReport {
    pub path: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Check whether an artifact exists at a path or glob pattern.
///
/// Glob patterns resolve to the most recently modified match. Never fails;
/// an unreadable or missing artifact reports `exists: false`.
pub fn check(pattern: &str) -> ArtifactReport {
    let expanded = expand(pattern);

    let resolved = resolve(&expanded);

    match resolved {
        Some(path) => {
            let size_bytes = path.metadata().map(|m| m.len()).ok();
            ArtifactReport {
                path: pattern.to_string(),
                exists: true,
                resolved: Some(path.to_string_lossy().to_string()),
                size_bytes,
            }
        }
        None => ArtifactReport {
            path: pattern.to_string(),
            exists: false,
            resolved: None,
            size_bytes: None,
        },
    }
}

fn expand(pattern: &str) -> String {
    shellexpand::full(pattern)
        .map(|expanded| expanded.into_owned())
        .unwrap_or_else(|_| pattern.to_string())
}

/// Resolve a path or glob to an existing file, newest match first.
fn resolve(pattern: &str) -> Option<PathBuf> {
    if !contains_glob_chars(pattern) {
        let path = PathBuf::from(pattern);
        return path.is_file().then_some(path);
    }

    let entries: Vec<PathBuf> = glob::glob(pattern)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .collect();

    entries
        .into_iter()
        .max_by_key(|p| p.metadata().and_then(|m| m.modified()).ok())
}

fn contains_glob_chars(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}
