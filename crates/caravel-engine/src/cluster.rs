use std::io;
use std::path::Path;
use std::process::ExitStatus;

use caravel_domain::{ApplyOutcome, ImageReference, ReadinessProbe, ResourceDocument};
use thiserror::Error;

/// Errors surfaced by the control-plane transport, split by retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    /// Transient condition (connectivity, optimistic-concurrency conflict);
    /// the engine retries these with bounded backoff.
    #[error("retryable apply error: {message}")]
    Retryable { message: String },
    /// Permanent rejection (schema validation, unknown kind); the engine
    /// fails the node immediately.
    #[error("fatal apply error: {message}")]
    Fatal { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyStatus {
    Ready,
    TimedOut,
}

/// Interface to the remote control plane.
///
/// `apply` submits desired state and reports how the control plane
/// reconciled it. Re-applying an unchanged document yields `Unchanged`, not
/// an error. If a document's identity fields (kind/name/namespace) changed
/// since a previous run, the control plane creates a fresh resource and the
/// old one is orphaned for the operator; the engine performs no cleanup.
pub trait ClusterClient: Sync {
    /// Submit one document for server-side reconciliation.
    ///
    /// # Errors
    ///
    /// Returns a retryable or fatal transport error.
    fn apply(&self, document: &ResourceDocument) -> Result<ApplyOutcome, ClusterError>;

    /// Block until the workloads selected by `probe` report healthy, or the
    /// probe's timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns an error when the wait itself cannot be issued.
    fn wait_ready(&self, probe: &ReadinessProbe) -> Result<ReadyStatus, ClusterError>;
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("image builder \"{binary}\" not found on PATH")]
    BuilderMissing { binary: String },
    #[error("build context does not exist: {context}")]
    MissingContext { context: String },
    #[error("failed to execute image build for {context}")]
    Spawn {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("image build failed for {context} (exit: {status}): {stderr}")]
    BuildFailed {
        context: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("image build for {context} produced no reference")]
    EmptyReference { context: String },
}

/// Produces an immutable image reference from a build context directory.
/// The engine consumes the reference only; the build process itself is an
/// external concern.
pub trait ArtifactBuilder {
    /// Build (or locate) the artifact for `context_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error when the build cannot run or yields no reference.
    fn build(&self, context_dir: &Path) -> Result<ImageReference, ArtifactError>;
}
