//! Tunnel abstraction: one local-to-remote forward behind an opaque transport.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Errors that can occur while establishing or maintaining a tunnel
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("failed to establish port forward: {0}")]
    Establish(String),

    #[error("could not bind local port {port}: {reason}")]
    Bind { port: u16, reason: String },

    #[error("port forward closed unexpectedly: {0}")]
    Closed(String),

    #[error("I/O error on port forward transport: {0}")]
    Io(#[from] std::io::Error),
}

/// Identity of the workload instance the tunnel should reach. The
/// coordinator treats this as opaque; only the transport interprets it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TunnelTarget {
    pub name: String,
    pub namespace: Option<String>,
}

/// Where the local end of the tunnel should bind.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LocalPort {
    /// Let the transport pick any free ephemeral port.
    Any,
    /// Bind exactly this port, failing if it is taken.
    Fixed(u16),
}

/// A request for a single tunnel. Immutable once built.
#[derive(Clone, Debug)]
pub struct TunnelRequest {
    pub target: TunnelTarget,
    pub remote_port: u16,
    pub local_port: LocalPort,
}

/// Lifecycle events delivered by the transport, in order. Failures before
/// and after readiness arrive on the same channel so the owner can observe
/// both through one signal.
#[derive(Debug)]
pub enum TunnelEvent {
    /// The tunnel is open; the local port is authoritative from here on.
    Ready(u16),
    /// The tunnel failed, before or after readiness. Not retried.
    Failed(TunnelError),
    /// The tunnel shut down cleanly after a stop request.
    Closed,
}

/// Handle to one established (or establishing) tunnel.
///
/// Owned by a single task for its lifetime. The stop control may be invoked
/// any number of times, from any task, concurrently with event delivery:
/// it is a [`CancellationToken`], so redundant calls are no-ops.
pub struct TunnelHandle {
    events: mpsc::Receiver<TunnelEvent>,
    local_port: Option<u16>,
    stop: CancellationToken,
}

impl TunnelHandle {
    /// Build a handle from the transport's event stream and its stop token.
    pub fn new(events: mpsc::Receiver<TunnelEvent>, stop: CancellationToken) -> Self {
        Self {
            events,
            local_port: None,
            stop,
        }
    }

    /// Wait until the tunnel is open and return the assigned local port.
    ///
    /// Must complete successfully before [`local_port`](Self::local_port)
    /// is trusted. A failure or close before readiness is terminal.
    pub async fn ready(&mut self) -> Result<u16, TunnelError> {
        match self.events.recv().await {
            Some(TunnelEvent::Ready(port)) => {
                self.local_port = Some(port);
                Ok(port)
            }
            Some(TunnelEvent::Failed(err)) => Err(err),
            Some(TunnelEvent::Closed) | None => Err(TunnelError::Closed(
                "tunnel closed before becoming ready".to_string(),
            )),
        }
    }

    /// The assigned local port, once readiness has been observed. Stable for
    /// the remainder of the handle's life.
    pub fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    /// Release the tunnel's resources. Idempotent: zero, one, or many calls
    /// are all safe, including after the tunnel has already failed.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// A clone of the stop token, for callers that want to stop the tunnel
    /// from another task.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// The next lifecycle event after readiness. Lets an owner observe a
    /// post-ready transport failure; `None` means the transport is gone.
    pub async fn fault(&mut self) -> Option<TunnelEvent> {
        self.events.recv().await
    }
}

/// Capability interface over whatever actually carries the tunnel.
///
/// `establish` begins setup and returns quickly; the caller must await
/// [`TunnelHandle::ready`] before reading the local port. Implementations
/// must honor the handle's stop token on every path, releasing the local
/// port and the underlying stream once it is cancelled.
#[async_trait]
pub trait TunnelTransport: Send + Sync {
    async fn establish(&self, request: &TunnelRequest) -> Result<TunnelHandle, TunnelError>;
}
