//! kubectl-fwdrun - run a command with a port-forward established around it.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fwdrun_core::{
    CommandSpec, Completion, Coordinator, LocalPort, LocalSupervisor, TunnelRequest, TunnelTarget,
};
use fwdrun_kube::{attachable_pod, KubeConfig, KubectlForwarder, ResourceRef};
use tokio_util::sync::CancellationToken;

/// Run a command with a port-forward to a workload established
#[derive(Parser, Debug)]
#[command(name = "kubectl-fwdrun")]
#[command(about = "Run a command with a port-forward to a workload established")]
#[command(version)]
#[command(long_about = r#"
Establishes a port-forward to a pod (or to a pod behind a deployment,
service, or other workload), substitutes the assigned local port for every
`{}` in the command after `--`, runs that command with your terminal's
stdio, and tears the forward down when the command exits or you press
Ctrl+C.

EXAMPLES:
  # Probe a pod's health endpoint through an ephemeral local port
  kubectl fwdrun web-0 8080 -- curl -sS http://localhost:{}/healthz

  # Forward to whichever pod backs a deployment
  kubectl fwdrun deploy/api 8080 -- curl http://localhost:{}

  # Pin the local port and run an interactive client
  kubectl fwdrun statefulset/db 5432 --local-port 15432 -- psql -h localhost -p {}
"#)]
struct Cli {
    /// Workload to forward to: NAME (a pod) or TYPE/NAME (e.g. deploy/api)
    resource: String,

    /// Remote port on the pod
    remote_port: u16,

    /// Local port to bind (defaults to an ephemeral port)
    #[arg(long)]
    local_port: Option<u16>,

    /// Kubernetes namespace (defaults to the kubeconfig's current namespace)
    #[arg(short = 'n', long, env = "FWDRUN_NAMESPACE")]
    namespace: Option<String>,

    /// Kubeconfig context to use
    #[arg(long)]
    context: Option<String>,

    /// Path to the kubeconfig file
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// How long to wait for the target pod to be running, in seconds
    #[arg(long, default_value = "60", value_name = "SECONDS")]
    pod_running_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Command to run once the forward is ready; `{}` expands to the local port
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

/// Setup logging with the specified log level
fn setup_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("Invalid log level: {}", log_level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        // kubectl-style: message on stdout, exit code 1.
        println!("{err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    setup_logging(&cli.log_level)?;

    let (program, args) = cli
        .command
        .split_first()
        .context("no command given after --")?;
    let command = CommandSpec {
        program: program.clone(),
        args: args.to_vec(),
    };

    let config = KubeConfig {
        namespace: cli.namespace,
        context: cli.context,
        kubeconfig: cli.kubeconfig,
        pod_running_timeout: std::time::Duration::from_secs(cli.pod_running_timeout),
    };

    let reference: ResourceRef = cli.resource.parse()?;
    let pod = attachable_pod(&config, &reference)
        .await
        .with_context(|| format!("could not resolve {}", cli.resource))?;
    info!(pod = %pod.name, "resolved target pod");

    let request = TunnelRequest {
        target: TunnelTarget {
            name: pod.name,
            namespace: pod.namespace,
        },
        remote_port: cli.remote_port,
        local_port: match cli.local_port {
            Some(port) => LocalPort::Fixed(port),
            None => LocalPort::Any,
        },
    };

    // One interrupt, observed once per run. A second Ctrl+C while shutting
    // down reaches the child directly through the foreground process group.
    let interrupt = CancellationToken::new();
    let trigger = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt signal received");
            trigger.cancel();
        }
    });

    let transport = KubectlForwarder::new(config);
    let supervisor = LocalSupervisor;
    let coordinator = Coordinator::new(&transport, &supervisor);

    match coordinator.run(&request, &command, interrupt).await? {
        Completion::Finished => debug!("command finished"),
        Completion::Interrupted => info!("interrupted; port-forward closed"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_tail_is_captured_after_the_separator() {
        let cli = Cli::try_parse_from([
            "kubectl-fwdrun",
            "deploy/api",
            "8080",
            "--",
            "curl",
            "-sS",
            "http://localhost:{}/healthz",
        ])
        .unwrap();
        assert_eq!(cli.resource, "deploy/api");
        assert_eq!(cli.remote_port, 8080);
        assert_eq!(cli.command, vec!["curl", "-sS", "http://localhost:{}/healthz"]);
    }

    #[test]
    fn command_is_required() {
        assert!(Cli::try_parse_from(["kubectl-fwdrun", "web-0", "8080"]).is_err());
    }

    #[test]
    fn flags_do_not_leak_into_the_command() {
        let cli = Cli::try_parse_from([
            "kubectl-fwdrun",
            "-n",
            "staging",
            "--local-port",
            "15432",
            "statefulset/db",
            "5432",
            "--",
            "psql",
            "-p",
            "{}",
        ])
        .unwrap();
        assert_eq!(cli.namespace.as_deref(), Some("staging"));
        assert_eq!(cli.local_port, Some(15432));
        assert_eq!(cli.command, vec!["psql", "-p", "{}"]);
    }

    #[test]
    fn remote_port_must_be_a_port() {
        assert!(
            Cli::try_parse_from(["kubectl-fwdrun", "web-0", "http", "--", "curl"]).is_err()
        );
    }

    #[test]
    fn pod_running_timeout_defaults_to_a_minute() {
        let cli =
            Cli::try_parse_from(["kubectl-fwdrun", "web-0", "8080", "--", "true"]).unwrap();
        assert_eq!(cli.pod_running_timeout, 60);
    }
}
