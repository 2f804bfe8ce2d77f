//! Supervision of the user's command as a local child process.

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

/// Errors that can occur when launching the command
#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("failed to launch {command}: {source}")]
    Launch {
        command: String,
        source: std::io::Error,
    },
}

/// The command to run once the tunnel's local port is known.
///
/// Stdio is inherited from the invoking terminal so the child behaves as if
/// the user ran it directly. Built once, consumed once.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

/// How a supervised process finished.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessOutcome {
    /// Normal exit with the given status code.
    Exited(i32),
    /// Killed by a signal, or the exit status could not be collected.
    Terminated,
}

impl ProcessOutcome {
    pub fn success(self) -> bool {
        matches!(self, ProcessOutcome::Exited(0))
    }
}

/// A running child process.
#[async_trait]
pub trait ProcessHandle: Send + std::fmt::Debug {
    /// Wait for the process to finish. The only blocking operation on the
    /// process side; safe to race in a `select!`.
    async fn wait(&mut self) -> ProcessOutcome;

    /// Request termination. Best-effort and fire-and-forget: the process may
    /// still be running when this returns, and its eventual outcome is
    /// whatever [`wait`](Self::wait) reports.
    fn stop(&mut self);
}

/// Launches commands. A trait so tests can substitute a spy that records
/// start calls without running anything.
pub trait ProcessSupervisor: Send + Sync {
    /// Start the command. Fails fast if the executable cannot be located or
    /// launched; does not wait for completion.
    fn start(&self, spec: &CommandSpec) -> Result<Box<dyn ProcessHandle>, SpawnError>;
}

/// Supervisor that runs the command as a local child with inherited stdio.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalSupervisor;

impl ProcessSupervisor for LocalSupervisor {
    fn start(&self, spec: &CommandSpec) -> Result<Box<dyn ProcessHandle>, SpawnError> {
        let child = tokio::process::Command::new(&spec.program)
            .args(&spec.args)
            .spawn()
            .map_err(|source| SpawnError::Launch {
                command: spec.program.clone(),
                source,
            })?;
        Ok(Box::new(LocalProcess { child }))
    }
}

#[derive(Debug)]
struct LocalProcess {
    child: tokio::process::Child,
}

#[async_trait]
impl ProcessHandle for LocalProcess {
    async fn wait(&mut self) -> ProcessOutcome {
        match self.child.wait().await {
            Ok(status) => match status.code() {
                Some(code) => ProcessOutcome::Exited(code),
                None => ProcessOutcome::Terminated,
            },
            Err(err) => {
                warn!("could not collect child exit status: {}", err);
                ProcessOutcome::Terminated
            }
        }
    }

    fn stop(&mut self) {
        // Fails if the child already exited; the pending wait() reports that.
        let _ = self.child.start_kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn spec(program: &str, args: &[&str]) -> CommandSpec {
        CommandSpec {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn reports_the_exit_code() {
        let mut handle = LocalSupervisor.start(&spec("sh", &["-c", "exit 7"])).unwrap();
        assert_eq!(handle.wait().await, ProcessOutcome::Exited(7));
    }

    #[tokio::test]
    async fn zero_exit_is_a_success() {
        let mut handle = LocalSupervisor.start(&spec("true", &[])).unwrap();
        assert!(handle.wait().await.success());
    }

    #[tokio::test]
    async fn missing_executable_fails_fast() {
        let err = LocalSupervisor
            .start(&spec("fwdrun-test-no-such-binary", &[]))
            .unwrap_err();
        assert!(err.to_string().contains("fwdrun-test-no-such-binary"));
    }

    #[tokio::test]
    async fn stop_terminates_a_long_running_child() {
        let mut handle = LocalSupervisor.start(&spec("sleep", &["30"])).unwrap();
        handle.stop();
        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("stopped child should exit promptly");
        assert_eq!(outcome, ProcessOutcome::Terminated);
    }

    #[tokio::test]
    async fn stop_after_exit_is_harmless() {
        let mut handle = LocalSupervisor.start(&spec("true", &[])).unwrap();
        assert!(handle.wait().await.success());
        handle.stop();
        handle.stop();
    }
}
