//! Cluster-access configuration, built once from flags and passed around by
//! reference. No process-wide mutable state backs any of this.

use std::path::PathBuf;
use std::time::Duration;

/// How long to wait for a target pod to reach the Running phase.
pub const DEFAULT_POD_RUNNING_TIMEOUT: Duration = Duration::from_secs(60);

/// Standard cluster-access settings shared by every `kubectl` invocation.
///
/// Namespace defaulting is intentionally left to `kubectl`'s own kubeconfig
/// loading: when `namespace` is `None` the flag is simply omitted.
#[derive(Clone, Debug)]
pub struct KubeConfig {
    pub namespace: Option<String>,
    pub context: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    pub pod_running_timeout: Duration,
}

impl Default for KubeConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            context: None,
            kubeconfig: None,
            pod_running_timeout: DEFAULT_POD_RUNNING_TIMEOUT,
        }
    }
}

impl KubeConfig {
    /// The shared `kubectl` flag prefix, with `namespace_override` taking
    /// precedence over the configured namespace (a resolved pod's own
    /// namespace is authoritative).
    pub(crate) fn args_with_namespace(&self, namespace_override: Option<&str>) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(path) = &self.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(path.display().to_string());
        }
        if let Some(context) = &self.context {
            args.push("--context".to_string());
            args.push(context.clone());
        }
        if let Some(namespace) = namespace_override.or(self.namespace.as_deref()) {
            args.push("--namespace".to_string());
            args.push(namespace.to_string());
        }
        args
    }

    pub(crate) fn base_args(&self) -> Vec<String> {
        self.args_with_namespace(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_adds_no_flags() {
        assert!(KubeConfig::default().base_args().is_empty());
    }

    #[test]
    fn all_flags_are_emitted_in_order() {
        let config = KubeConfig {
            namespace: Some("staging".to_string()),
            context: Some("minikube".to_string()),
            kubeconfig: Some(PathBuf::from("/home/me/.kube/config")),
            pod_running_timeout: DEFAULT_POD_RUNNING_TIMEOUT,
        };
        assert_eq!(
            config.base_args(),
            vec![
                "--kubeconfig",
                "/home/me/.kube/config",
                "--context",
                "minikube",
                "--namespace",
                "staging",
            ]
        );
    }

    #[test]
    fn namespace_override_wins() {
        let config = KubeConfig {
            namespace: Some("staging".to_string()),
            ..KubeConfig::default()
        };
        assert_eq!(
            config.args_with_namespace(Some("prod")),
            vec!["--namespace", "prod"]
        );
    }

    #[test]
    fn override_applies_even_without_configured_namespace() {
        let config = KubeConfig::default();
        assert_eq!(
            config.args_with_namespace(Some("default")),
            vec!["--namespace", "default"]
        );
    }
}
