//! Running `kubectl` and parsing its JSON output.

use serde::de::DeserializeOwned;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::KubeConfig;

/// Errors from shelling out to `kubectl`
#[derive(Error, Debug)]
pub enum KubectlError {
    #[error("error starting kubectl {args:?}: {source}")]
    Start {
        args: Vec<String>,
        source: std::io::Error,
    },

    #[error("kubectl {args:?} failed: {stderr}")]
    Failed { args: Vec<String>, stderr: String },

    #[error("error parsing output of kubectl {args:?}: {source}")]
    Parse {
        args: Vec<String>,
        source: serde_json::Error,
    },
}

impl KubectlError {
    /// Whether the server reported the requested object as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubectlError::Failed { stderr, .. } if stderr.contains("NotFound") || stderr.contains("not found"))
    }
}

/// Run `kubectl` with the config's flag prefix, capture stdout, and parse it
/// as JSON into `T`. Stderr is captured for the error message instead of
/// leaking onto the user's terminal.
pub(crate) async fn kubectl_json<T: DeserializeOwned>(
    config: &KubeConfig,
    args: &[&str],
) -> Result<T, KubectlError> {
    let full_args: Vec<String> = config
        .base_args()
        .into_iter()
        .chain(args.iter().map(|s| s.to_string()))
        .collect();
    debug!(args = ?full_args, "running kubectl");

    let output = Command::new("kubectl")
        .args(&full_args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| KubectlError::Start {
            args: full_args.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(KubectlError::Failed {
            args: full_args,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    serde_json::from_slice(&output.stdout).map_err(|source| KubectlError::Parse {
        args: full_args,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_recognized_in_stderr() {
        let err = KubectlError::Failed {
            args: vec!["get".to_string(), "pod".to_string(), "web-9".to_string()],
            stderr: "Error from server (NotFound): pods \"web-9\" not found".to_string(),
        };
        assert!(err.is_not_found());
    }

    #[test]
    fn other_failures_are_not_not_found() {
        let err = KubectlError::Failed {
            args: vec!["get".to_string()],
            stderr: "Unable to connect to the server: dial tcp: i/o timeout".to_string(),
        };
        assert!(!err.is_not_found());
    }
}
