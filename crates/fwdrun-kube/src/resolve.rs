//! Resolving a user-given resource reference to one concrete running pod.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::config::KubeConfig;
use crate::kubectl::{kubectl_json, KubectlError};

/// How often the pod phase is re-checked while waiting for Running.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Errors from target resolution
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("invalid resource reference {0:?}: expected NAME or TYPE/NAME")]
    BadReference(String),

    #[error("{reference} not found: {message}")]
    NotFound { reference: String, message: String },

    #[error("{reference} has no label selector to find pods with")]
    NoSelector { reference: String },

    #[error("no running pods match {reference} (selector {selector:?})")]
    NoRunningPods {
        reference: String,
        selector: String,
    },

    #[error("pod {name} was not running within {timeout_secs}s")]
    NotReady { name: String, timeout_secs: u64 },

    #[error(transparent)]
    Kubectl(#[from] KubectlError),
}

/// A `TYPE/NAME` reference from the command line. A bare name means a pod.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceRef {
    pub kind: String,
    pub name: String,
}

impl ResourceRef {
    fn is_pod(&self) -> bool {
        matches!(self.kind.as_str(), "pod" | "pods" | "po")
    }
}

impl FromStr for ResourceRef {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            None if !s.is_empty() => Ok(ResourceRef {
                kind: "pod".to_string(),
                name: s.to_string(),
            }),
            Some((kind, name))
                if !kind.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(ResourceRef {
                    kind: kind.to_ascii_lowercase(),
                    name: name.to_string(),
                })
            }
            _ => Err(ResolveError::BadReference(s.to_string())),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// The pod a tunnel should attach to, as reported by the cluster.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PodTarget {
    pub name: String,
    pub namespace: Option<String>,
}

// Partial views of the kubectl JSON; everything irrelevant is ignored.

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: Metadata,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    #[serde(default)]
    phase: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct WorkloadObject {
    #[serde(default)]
    spec: WorkloadSpec,
}

#[derive(Debug, Default, Deserialize)]
struct WorkloadSpec {
    #[serde(default)]
    selector: Option<Selector>,
}

/// Label selectors come in two shapes: controllers nest them under
/// `matchLabels`, services carry a bare label map.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Selector {
    // matchLabels must be present here, or every bare service selector
    // would match this variant with an empty map.
    Labeled {
        #[serde(rename = "matchLabels")]
        match_labels: BTreeMap<String, String>,
    },
    Plain(BTreeMap<String, String>),
}

impl Selector {
    fn labels(self) -> BTreeMap<String, String> {
        match self {
            Selector::Labeled { match_labels } => match_labels,
            Selector::Plain(labels) => labels,
        }
    }
}

fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn is_running(pod: &Pod) -> bool {
    pod.status.phase.as_deref() == Some("Running")
}

fn map_get_error(reference: &ResourceRef, err: KubectlError) -> ResolveError {
    if err.is_not_found() {
        ResolveError::NotFound {
            reference: reference.to_string(),
            message: err.to_string(),
        }
    } else {
        ResolveError::Kubectl(err)
    }
}

/// Resolve `reference` to one concrete running pod.
///
/// Pods are fetched directly and polled until Running within the config's
/// pod-running timeout. Any other kind is fetched for its label selector,
/// and the first running pod matching it wins.
pub async fn attachable_pod(
    config: &KubeConfig,
    reference: &ResourceRef,
) -> Result<PodTarget, ResolveError> {
    if reference.is_pod() {
        wait_for_running(config, reference).await
    } else {
        pod_behind_selector(config, reference).await
    }
}

async fn wait_for_running(
    config: &KubeConfig,
    reference: &ResourceRef,
) -> Result<PodTarget, ResolveError> {
    let deadline = Instant::now() + config.pod_running_timeout;
    loop {
        let pod: Pod = kubectl_json(config, &["get", "pod", &reference.name, "-o", "json"])
            .await
            .map_err(|err| map_get_error(reference, err))?;
        if is_running(&pod) {
            return Ok(PodTarget {
                name: pod.metadata.name,
                namespace: pod.metadata.namespace,
            });
        }
        if Instant::now() >= deadline {
            return Err(ResolveError::NotReady {
                name: reference.name.clone(),
                timeout_secs: config.pod_running_timeout.as_secs(),
            });
        }
        debug!(
            pod = %reference.name,
            phase = pod.status.phase.as_deref().unwrap_or("unknown"),
            "waiting for pod to be running"
        );
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn pod_behind_selector(
    config: &KubeConfig,
    reference: &ResourceRef,
) -> Result<PodTarget, ResolveError> {
    let object: WorkloadObject = kubectl_json(
        config,
        &["get", &reference.kind, &reference.name, "-o", "json"],
    )
    .await
    .map_err(|err| map_get_error(reference, err))?;

    let labels = object
        .spec
        .selector
        .map(Selector::labels)
        .filter(|labels| !labels.is_empty())
        .ok_or_else(|| ResolveError::NoSelector {
            reference: reference.to_string(),
        })?;
    let selector = selector_string(&labels);
    debug!(%reference, %selector, "resolving pods behind selector");

    let pods: PodList =
        kubectl_json(config, &["get", "pods", "-l", &selector, "-o", "json"]).await?;
    let pod = pods
        .items
        .into_iter()
        .find(is_running)
        .ok_or_else(|| ResolveError::NoRunningPods {
            reference: reference.to_string(),
            selector,
        })?;

    Ok(PodTarget {
        name: pod.metadata.name,
        namespace: pod.metadata.namespace,
    })
}
