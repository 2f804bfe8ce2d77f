//! `kubectl port-forward` as the opaque tunnel transport.
//!
//! The transport is a supervised `kubectl` child process. Readiness is the
//! `Forwarding from ...` line on its stdout, which also carries the
//! assigned local port; failure is the child exiting; stop kills the child,
//! which frees the local port.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use fwdrun_core::{
    LocalPort, TunnelError, TunnelEvent, TunnelHandle, TunnelRequest, TunnelTransport,
};

use crate::config::KubeConfig;

/// Tunnel transport backed by a `kubectl port-forward` subprocess.
pub struct KubectlForwarder {
    config: KubeConfig,
}

impl KubectlForwarder {
    pub fn new(config: KubeConfig) -> Self {
        Self { config }
    }

    fn forward_args(&self, request: &TunnelRequest) -> Vec<String> {
        let mut args = self
            .config
            .args_with_namespace(request.target.namespace.as_deref());
        args.push("port-forward".to_string());
        args.push(format!("pod/{}", request.target.name));
        args.push(match request.local_port {
            LocalPort::Any => format!(":{}", request.remote_port),
            LocalPort::Fixed(local) => format!("{}:{}", local, request.remote_port),
        });
        args.push("--address".to_string());
        args.push("localhost".to_string());
        args
    }
}

#[async_trait]
impl TunnelTransport for KubectlForwarder {
    async fn establish(&self, request: &TunnelRequest) -> Result<TunnelHandle, TunnelError> {
        let args = self.forward_args(request);
        debug!(?args, "starting kubectl port-forward");

        let mut child = Command::new("kubectl")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| TunnelError::Establish(format!("error starting kubectl: {err}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TunnelError::Establish("kubectl stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TunnelError::Establish("kubectl stderr was not captured".to_string()))?;

        // kubectl's stderr is drained continuously; the tail feeds failure
        // messages instead of leaking onto the user's terminal.
        let stderr_tail: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let tail = stderr_tail.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(source = "kubectl", "{}", line);
                if let Ok(mut tail) = tail.lock() {
                    tail.push(line);
                }
            }
        });

        let (events, events_rx) = mpsc::channel(4);
        let stop = CancellationToken::new();
        tokio::spawn(drive_forward(
            child,
            BufReader::new(stdout).lines(),
            events,
            stop.clone(),
            stderr_tail,
        ));

        Ok(TunnelHandle::new(events_rx, stop))
    }
}

/// Background task owning the kubectl child for its whole life.
async fn drive_forward(
    mut child: Child,
    mut lines: Lines<BufReader<ChildStdout>>,
    events: mpsc::Sender<TunnelEvent>,
    stop: CancellationToken,
    stderr_tail: Arc<Mutex<Vec<String>>>,
) {
    // Establishment: wait for the readiness line, racing the stop token and
    // the child exiting underneath us.
    let port = loop {
        tokio::select! {
            _ = stop.cancelled() => {
                reap(&mut child).await;
                let _ = events.send(TunnelEvent::Closed).await;
                return;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    debug!(source = "kubectl", "{}", line);
                    if let Some(port) = parse_forwarding_line(&line) {
                        break port;
                    }
                }
                Ok(None) => {
                    // stdout closed: the child is going away.
                    let status = child.wait().await.ok();
                    let event = if stop.is_cancelled() {
                        TunnelEvent::Closed
                    } else {
                        TunnelEvent::Failed(TunnelError::Establish(failure_message(
                            status,
                            &stderr_tail,
                        )))
                    };
                    let _ = events.send(event).await;
                    return;
                }
                Err(err) => {
                    reap(&mut child).await;
                    let _ = events.send(TunnelEvent::Failed(TunnelError::Io(err))).await;
                    return;
                }
            }
        }
    };

    if events.send(TunnelEvent::Ready(port)).await.is_err() {
        // Owner is gone; nothing left to forward for.
        reap(&mut child).await;
        return;
    }

    // Steady state: drain connection chatter from stdout while watching for
    // the stop token or an unexpected exit.
    loop {
        enum Step {
            Stopped,
            Exited(Option<std::process::ExitStatus>),
            Output(Option<String>),
        }

        let step = tokio::select! {
            _ = stop.cancelled() => Step::Stopped,
            status = child.wait() => Step::Exited(status.ok()),
            line = lines.next_line() => Step::Output(line.unwrap_or(None)),
        };

        match step {
            Step::Stopped => {
                reap(&mut child).await;
                let _ = events.send(TunnelEvent::Closed).await;
                return;
            }
            Step::Exited(status) => {
                let _ = events
                    .send(TunnelEvent::Failed(TunnelError::Closed(failure_message(
                        status,
                        &stderr_tail,
                    ))))
                    .await;
                return;
            }
            Step::Output(Some(line)) => {
                debug!(source = "kubectl", "{}", line);
            }
            Step::Output(None) => {
                // stdout closed; only the exit status is left to collect.
                let status = tokio::select! {
                    _ = stop.cancelled() => None,
                    status = child.wait() => Some(status.ok()),
                };
                let event = match status {
                    None => {
                        reap(&mut child).await;
                        TunnelEvent::Closed
                    }
                    Some(status) => TunnelEvent::Failed(TunnelError::Closed(failure_message(
                        status,
                        &stderr_tail,
                    ))),
                };
                let _ = events.send(event).await;
                return;
            }
        }
    }
}

/// Kill the child and collect it so the local port is actually released.
async fn reap(child: &mut Child) {
    let _ = child.start_kill();
    let _ = child.wait().await;
}

/// Parse kubectl's readiness line, e.g.
/// `Forwarding from 127.0.0.1:40331 -> 8080` or
/// `Forwarding from [::1]:40331 -> 8080`.
fn parse_forwarding_line(line: &str) -> Option<u16> {
    let rest = line.strip_prefix("Forwarding from ")?;
    let address = rest.split(" -> ").next()?;
    address.rsplit(':').next()?.parse().ok()
}

fn failure_message(
    status: Option<std::process::ExitStatus>,
    stderr_tail: &Mutex<Vec<String>>,
) -> String {
    let mut message = match status {
        Some(status) => format!("kubectl port-forward exited ({status})"),
        None => "kubectl port-forward exited".to_string(),
    };
    let stderr = stderr_tail
        .lock()
        .map(|lines| lines.join("; "))
        .unwrap_or_default();
    if !stderr.is_empty() {
        message.push_str(": ");
        message.push_str(&stderr);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use fwdrun_core::TunnelTarget;

    fn request(namespace: Option<&str>, local: LocalPort) -> TunnelRequest {
        TunnelRequest {
            target: TunnelTarget {
                name: "web-0".to_string(),
                namespace: namespace.map(|s| s.to_string()),
            },
            remote_port: 8080,
            local_port: local,
        }
    }

    #[test]
    fn parses_ipv4_forwarding_line() {
        assert_eq!(
            parse_forwarding_line("Forwarding from 127.0.0.1:40331 -> 8080"),
            Some(40331)
        );
    }

    #[test]
    fn parses_ipv6_forwarding_line() {
        assert_eq!(
            parse_forwarding_line("Forwarding from [::1]:40331 -> 8080"),
            Some(40331)
        );
    }

    #[test]
    fn ignores_unrelated_lines() {
        assert_eq!(parse_forwarding_line("Handling connection for 40331"), None);
        assert_eq!(parse_forwarding_line(""), None);
    }

    #[test]
    fn ephemeral_port_uses_the_colon_form() {
        let forwarder = KubectlForwarder::new(KubeConfig::default());
        let args = forwarder.forward_args(&request(Some("prod"), LocalPort::Any));
        assert_eq!(
            args,
            vec![
                "--namespace",
                "prod",
                "port-forward",
                "pod/web-0",
                ":8080",
                "--address",
                "localhost",
            ]
        );
    }

    #[test]
    fn fixed_port_is_spelled_out() {
        let forwarder = KubectlForwarder::new(KubeConfig::default());
        let args = forwarder.forward_args(&request(None, LocalPort::Fixed(5432)));
        assert!(args.contains(&"5432:8080".to_string()));
    }

    #[tokio::test]
    async fn establish_failure_surfaces_stderr() {
        // `kubectl` may not exist in the test environment; either way the
        // handle must report a terminal establishment failure, not hang.
        let forwarder = KubectlForwarder::new(KubeConfig {
            kubeconfig: Some(std::path::PathBuf::from("/nonexistent/kubeconfig")),
            ..KubeConfig::default()
        });
        match forwarder.establish(&request(None, LocalPort::Any)).await {
            Ok(mut handle) => {
                let result = tokio::time::timeout(
                    std::time::Duration::from_secs(30),
                    handle.ready(),
                )
                .await
                .expect("establishment failure must be reported promptly");
                assert!(result.is_err());
            }
            Err(err) => assert!(matches!(err, TunnelError::Establish(_))),
        }
    }
}
