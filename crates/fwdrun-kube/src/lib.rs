//! Kubernetes collaborators for fwdrun: cluster configuration, workload
//! resolution, and a `kubectl port-forward` tunnel transport.
//!
//! Everything here talks to the cluster through the user's own `kubectl`,
//! so credentials, contexts, and API negotiation stay where they already
//! live: in the kubeconfig.

pub mod config;
pub mod forward;
pub mod kubectl;
pub mod resolve;

pub use config::{KubeConfig, DEFAULT_POD_RUNNING_TIMEOUT};
pub use forward::KubectlForwarder;
pub use kubectl::KubectlError;
pub use resolve::{attachable_pod, PodTarget, ResolveError, ResourceRef};
