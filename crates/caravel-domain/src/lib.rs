use std::fmt;
use std::ops::Deref;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod document;

pub use document::{DocumentIdentity, DocumentValidationError, ResourceDocument};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainValidationError {
    #[error("node identifier must not be empty")]
    EmptyNodeId,
    #[error("container name must not be empty")]
    EmptyContainerName,
    #[error("image reference must not be empty")]
    EmptyImageReference,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Create a node identifier, rejecting blank values.
    ///
    /// # Errors
    ///
    /// Returns an error when `id` is empty after trimming.
    pub fn new(id: String) -> Result<Self, DomainValidationError> {
        if id.trim().is_empty() {
            Err(DomainValidationError::EmptyNodeId)
        } else {
            Ok(Self(id))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NodeId {
    type Error = DomainValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for NodeId {
    type Error = DomainValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value.to_string())
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for NodeId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(formatter)
    }
}

impl From<NodeId> for String {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerName(String);

impl ContainerName {
    /// Create a container name, rejecting blank values.
    ///
    /// # Errors
    ///
    /// Returns an error when `name` is empty after trimming.
    pub fn new(name: String) -> Result<Self, DomainValidationError> {
        if name.trim().is_empty() {
            Err(DomainValidationError::EmptyContainerName)
        } else {
            Ok(Self(name))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-normalized comparison against a container name found in a
    /// workload document.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        self.0.eq_ignore_ascii_case(candidate)
    }
}

impl TryFrom<String> for ContainerName {
    type Error = DomainValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for ContainerName {
    type Error = DomainValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value.to_string())
    }
}

impl AsRef<str> for ContainerName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(formatter)
    }
}

impl From<ContainerName> for String {
    fn from(value: ContainerName) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageReference(String);

impl ImageReference {
    /// Create an image reference, rejecting blank values.
    ///
    /// # Errors
    ///
    /// Returns an error when `reference` is empty after trimming.
    pub fn new(reference: String) -> Result<Self, DomainValidationError> {
        if reference.trim().is_empty() {
            Err(DomainValidationError::EmptyImageReference)
        } else {
            Ok(Self(reference))
        }
    }

    /// Placeholder reference shown in plan output when no artifact has been
    /// resolved for a service yet. Never valid to apply.
    #[must_use]
    pub fn placeholder(service: &str) -> Self {
        Self(format!("pending-build:{service}"))
    }

    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.0.starts_with("pending-build:")
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ImageReference {
    type Error = DomainValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for ImageReference {
    type Error = DomainValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value.to_string())
    }
}

impl AsRef<str> for ImageReference {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(formatter)
    }
}

impl From<ImageReference> for String {
    fn from(value: ImageReference) -> Self {
        value.0
    }
}

/// A pending image rewrite for a node's workload document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBinding {
    pub container: ContainerName,
    pub reference: ImageReference,
}

/// Health wait attached to a node whose dependents require live workloads,
/// not merely an acknowledged apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessProbe {
    pub namespace: Option<String>,
    pub selector: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    Applying,
    Applied,
    Failed,
}

/// Control-plane classification of a single document apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Created,
    Configured,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Fatal,
    RetryExhausted,
    ReadinessTimeout,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentOutcome {
    pub identity: DocumentIdentity,
    pub outcome: ApplyOutcome,
    pub attempts: u32,
}

/// Per-node plan row: what would be applied and in which shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id: NodeId,
    pub documents: Vec<DocumentIdentity>,
    pub images: Vec<ImageBinding>,
    pub depends_on: Vec<NodeId>,
    pub readiness_gate: bool,
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanReport {
    pub execution_order: Vec<NodeId>,
    pub nodes: Vec<NodeSummary>,
    pub errors: Vec<String>,
}

impl PlanReport {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    #[must_use]
    pub fn has_pending_images(&self) -> bool {
        self.nodes
            .iter()
            .flat_map(|node| &node.images)
            .any(|binding| binding.reference.is_placeholder())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    pub id: NodeId,
    pub state: NodeState,
    pub documents: Vec<DocumentOutcome>,
    pub failure: Option<NodeFailure>,
    /// Failed ancestor that kept this node in `Pending`, if any. Set only
    /// for nodes that were never attempted.
    pub blocked_by: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub plan: PlanReport,
    pub nodes: Vec<NodeReport>,
    pub errors: Vec<String>,
}

impl RunReport {
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.errors.is_empty()
            || self
                .nodes
                .iter()
                .any(|node| node.state != NodeState::Applied)
    }

    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&NodeReport> {
        self.nodes.iter().find(|node| &node.id == id)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::{
        ContainerName, DomainValidationError, ImageReference, NodeId, NodeReport, NodeState,
        PlanReport, RunReport,
    };

    #[test]
    fn node_id_rejects_blank_values() {
        let error = NodeId::try_from("   ").expect_err("blank ids must be rejected");
        assert!(matches!(error, DomainValidationError::EmptyNodeId));
    }

    #[test]
    fn container_name_matches_case_insensitively() {
        let name = ContainerName::try_from("FrontEnd").expect("valid name");
        assert!(name.matches("frontend"));
        assert!(!name.matches("backend"));
    }

    #[test]
    fn placeholder_references_are_flagged() {
        let pending = ImageReference::placeholder("cartservice");
        assert!(pending.is_placeholder());

        let real = ImageReference::try_from("registry.local/cartservice@sha256:abc")
            .expect("valid reference");
        assert!(!real.is_placeholder());
    }

    #[test]
    fn run_report_counts_non_applied_nodes_as_failures() {
        let plan = PlanReport {
            execution_order: vec![],
            nodes: vec![],
            errors: vec![],
        };
        let report = RunReport {
            plan,
            nodes: vec![NodeReport {
                id: NodeId::try_from("gateway").expect("valid id"),
                state: NodeState::Pending,
                documents: vec![],
                failure: None,
                blocked_by: Some(NodeId::try_from("application").expect("valid id")),
            }],
            errors: vec![],
        };
        assert!(report.has_failures());
    }
}
