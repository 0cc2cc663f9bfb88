use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use caravel_domain::{ApplyOutcome, ReadinessProbe, ResourceDocument};
use caravel_engine::{ClusterClient, ClusterError, ReadyStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportSetupError {
    #[error("kubectl not found on PATH")]
    KubectlMissing {
        #[source]
        source: which::Error,
    },
}

/// Stderr fragments that indicate a transient condition worth retrying.
/// Everything else is treated as a permanent rejection.
const RETRYABLE_FRAGMENTS: &[&str] = &[
    "connection refused",
    "i/o timeout",
    "tls handshake timeout",
    "the object has been modified",
    "the server is currently unable to handle the request",
    "too many requests",
    "etcdserver: leader changed",
];

/// Control-plane client backed by the `kubectl` binary.
///
/// Documents are piped to `kubectl apply -f -` one at a time so the
/// reconciliation verdict on stdout maps back to a single document.
pub struct KubectlClient {
    binary: PathBuf,
    context: Option<String>,
}

impl KubectlClient {
    /// Locate `kubectl` on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns an error when the binary cannot be found.
    pub fn discover(context: Option<String>) -> Result<Self, TransportSetupError> {
        let binary = which::which("kubectl")
            .map_err(|source| TransportSetupError::KubectlMissing { source })?;
        Ok(Self { binary, context })
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        if let Some(context) = &self.context {
            command.arg("--context").arg(context);
        }
        command
    }
}

impl ClusterClient for KubectlClient {
    fn apply(&self, document: &ResourceDocument) -> Result<ApplyOutcome, ClusterError> {
        let rendered = document.to_yaml().map_err(|error| ClusterError::Fatal {
            message: format!("failed to serialize {}: {error}", document.identity()),
        })?;

        let mut child = self
            .command()
            .args(["apply", "-f", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| ClusterError::Fatal {
                message: format!("failed to execute kubectl apply: {error}"),
            })?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin
                .write_all(rendered.as_bytes())
                .map_err(|error| ClusterError::Fatal {
                    message: format!("failed to stream manifest to kubectl: {error}"),
                })?;
        }

        let output = child.wait_with_output().map_err(|error| ClusterError::Fatal {
            message: format!("failed to collect kubectl output: {error}"),
        })?;

        if output.status.success() {
            Ok(parse_apply_outcome(&String::from_utf8_lossy(
                &output.stdout,
            )))
        } else {
            Err(classify_apply_failure(&String::from_utf8_lossy(
                &output.stderr,
            )))
        }
    }

    fn wait_ready(&self, probe: &ReadinessProbe) -> Result<ReadyStatus, ClusterError> {
        let timeout = format!("{}s", probe.timeout.as_secs());
        let mut command = self.command();
        command.args(["wait", "--for=condition=Ready", "pod"]);
        command.arg("--selector").arg(&probe.selector);
        command.arg("--timeout").arg(&timeout);
        if let Some(namespace) = &probe.namespace {
            command.arg("--namespace").arg(namespace);
        }

        let output = command
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|error| ClusterError::Fatal {
                message: format!("failed to execute kubectl wait: {error}"),
            })?;

        if output.status.success() {
            return Ok(ReadyStatus::Ready);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("timed out") {
            return Ok(ReadyStatus::TimedOut);
        }
        Err(ClusterError::Fatal {
            message: format!("kubectl wait failed: {}", stderr.trim()),
        })
    }
}

/// Map the verdict kubectl prints per resource (`deployment.apps/web
/// configured`) onto an outcome. A successful apply with an unrecognized
/// verdict counts as `Configured`.
fn parse_apply_outcome(stdout: &str) -> ApplyOutcome {
    let verdict = stdout
        .lines()
        .rev()
        .find_map(|line| line.split_whitespace().last());
    match verdict {
        Some("created") => ApplyOutcome::Created,
        Some("unchanged") => ApplyOutcome::Unchanged,
        _ => ApplyOutcome::Configured,
    }
}

fn classify_apply_failure(stderr: &str) -> ClusterError {
    let message = stderr.trim().to_string();
    let lowered = message.to_lowercase();
    if RETRYABLE_FRAGMENTS
        .iter()
        .any(|fragment| lowered.contains(fragment))
    {
        ClusterError::Retryable { message }
    } else {
        ClusterError::Fatal { message }
    }
}
