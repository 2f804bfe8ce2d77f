//! Lifecycle coordination for running a command against a forwarded port.
//!
//! The crate knows nothing about any particular transport: the tunnel and
//! the child process are reached through capability traits so callers (and
//! tests) decide what actually carries the traffic.

pub mod coordinate;
pub mod expand;
pub mod process;
pub mod tunnel;

pub use coordinate::{Completion, Coordinator, RunError};
pub use expand::{expand_args, PORT_TOKEN};
pub use process::{
    CommandSpec, LocalSupervisor, ProcessHandle, ProcessOutcome, ProcessSupervisor, SpawnError,
};
pub use tunnel::{
    LocalPort, TunnelError, TunnelEvent, TunnelHandle, TunnelRequest, TunnelTarget,
    TunnelTransport,
};
