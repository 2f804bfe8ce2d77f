//! The lifecycle coordinator: races tunnel readiness, child completion, and
//! external interruption into a single deterministic shutdown sequence.

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::expand::expand_args;
use crate::process::{CommandSpec, ProcessOutcome, ProcessSupervisor, SpawnError};
use crate::tunnel::{TunnelError, TunnelRequest, TunnelTransport};

/// Terminal errors for one coordinated run. None are retried.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("command exited with status {code}")]
    CommandFailed { code: i32 },

    #[error("command terminated abnormally")]
    CommandTerminated,
}

/// How a coordinated run ended, when it ended without error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Completion {
    /// The command ran to completion and exited successfully.
    Finished,
    /// An interrupt arrived first; shutdown was user-requested, so the
    /// child's eventual outcome is deliberately not reported as a failure.
    Interrupted,
}

/// Drives one tunnel-then-command run.
pub struct Coordinator<'a> {
    transport: &'a dyn TunnelTransport,
    supervisor: &'a dyn ProcessSupervisor,
}

impl<'a> Coordinator<'a> {
    pub fn new(transport: &'a dyn TunnelTransport, supervisor: &'a dyn ProcessSupervisor) -> Self {
        Self {
            transport,
            supervisor,
        }
    }

    /// Run `command` with the tunnel from `request` established around it.
    ///
    /// The command is never started unless the tunnel reports ready, and the
    /// tunnel's stop control is invoked on every exit path before the result
    /// is returned. After the command starts, the only events raced are its
    /// completion and `interrupt`; there is no timeout.
    pub async fn run(
        &self,
        request: &TunnelRequest,
        command: &CommandSpec,
        interrupt: CancellationToken,
    ) -> Result<Completion, RunError> {
        let mut tunnel = self.transport.establish(request).await?;

        let port = match tunnel.ready().await {
            Ok(port) => port,
            Err(err) => {
                tunnel.stop();
                return Err(err.into());
            }
        };
        debug!(local_port = port, "port forward ready");

        let spec = CommandSpec {
            program: command.program.clone(),
            args: expand_args(&command.args, port),
        };
        let mut process = match self.supervisor.start(&spec) {
            Ok(process) => process,
            Err(err) => {
                tunnel.stop();
                return Err(err.into());
            }
        };
        debug!(command = %spec.program, "command started");

        enum Raced {
            Completed(ProcessOutcome),
            Interrupted,
        }

        let raced = tokio::select! {
            outcome = process.wait() => Raced::Completed(outcome),
            _ = interrupt.cancelled() => Raced::Interrupted,
        };

        match raced {
            Raced::Completed(outcome) => {
                tunnel.stop();
                match outcome {
                    ProcessOutcome::Exited(0) => Ok(Completion::Finished),
                    ProcessOutcome::Exited(code) => Err(RunError::CommandFailed { code }),
                    ProcessOutcome::Terminated => Err(RunError::CommandTerminated),
                }
            }
            Raced::Interrupted => {
                info!("interrupt received, shutting down");
                process.stop();
                tunnel.stop();
                Ok(Completion::Interrupted)
            }
        }
    }
}
