use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use caravel_domain::{
    DocumentOutcome, FailureKind, NodeFailure, NodeId, NodeReport, NodeState, RunReport,
};

use crate::cluster::{ClusterClient, ClusterError, ReadyStatus};
use crate::graph::{DependencyGraph, GraphNode};
use crate::plan::build_plan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff_base: Duration::from_millis(500),
        }
    }
}

/// Cooperative cancellation flag shared between the scheduler and callers.
///
/// Cancellation stops new `Pending -> Applying` transitions and stops
/// in-flight nodes between documents; the document currently being applied
/// always finishes, so no workload is left half-submitted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct NodeCompletion {
    index: usize,
    documents: Vec<DocumentOutcome>,
    failure: Option<NodeFailure>,
}

/// Apply every node of the graph against the control plane in dependency
/// order.
///
/// Independent branches apply concurrently; a single node's documents apply
/// sequentially in document order. A failed node is terminal for the run:
/// its dependents stay `Pending` and are attributed to the failed ancestor
/// in the report, while unrelated branches continue. Already-applied nodes
/// are never rolled back.
#[must_use]
pub fn run(
    graph: &DependencyGraph,
    client: &dyn ClusterClient,
    options: RunOptions,
    cancel: &CancelToken,
) -> RunReport {
    let plan = build_plan(graph);
    if plan.has_errors() {
        let nodes = graph
            .nodes
            .iter()
            .map(|node| pending_report(&node.id, None))
            .collect();
        return RunReport {
            plan,
            nodes,
            errors: vec!["graph is structurally invalid; nothing was attempted".to_string()],
        };
    }

    let total = graph.nodes.len();
    let mut states = vec![NodeState::Pending; total];
    let mut failures: Vec<Option<NodeFailure>> = vec![None; total];
    let mut outcomes: Vec<Vec<DocumentOutcome>> = vec![Vec::new(); total];

    let mut indegree: Vec<usize> = graph
        .nodes
        .iter()
        .map(|node| node.depends_on.len())
        .collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); total];
    for (index, node) in graph.nodes.iter().enumerate() {
        for &dependency in &node.depends_on {
            dependents[dependency].push(index);
        }
    }

    let mut ready: BTreeSet<usize> = indegree
        .iter()
        .enumerate()
        .filter_map(|(index, &count)| (count == 0).then_some(index))
        .collect();

    let (sender, receiver) = mpsc::channel::<NodeCompletion>();

    thread::scope(|scope| {
        let mut in_flight = 0_usize;
        loop {
            if !cancel.is_cancelled() {
                while let Some(index) = ready.pop_first() {
                    states[index] = NodeState::Applying;
                    in_flight += 1;
                    let sender = sender.clone();
                    let node = &graph.nodes[index];
                    scope.spawn(move || {
                        let completion = apply_node(index, node, client, options, cancel);
                        let _ = sender.send(completion);
                    });
                }
            }

            if in_flight == 0 {
                break;
            }

            let Ok(completion) = receiver.recv() else {
                break;
            };
            in_flight -= 1;

            let index = completion.index;
            outcomes[index] = completion.documents;
            if let Some(failure) = completion.failure {
                states[index] = NodeState::Failed;
                failures[index] = Some(failure);
            } else {
                states[index] = NodeState::Applied;
                for &dependent in &dependents[index] {
                    if indegree[dependent] > 0 {
                        indegree[dependent] -= 1;
                        if indegree[dependent] == 0 && states[dependent] == NodeState::Pending {
                            ready.insert(dependent);
                        }
                    }
                }
            }
        }
    });

    let blocked = attribute_blocked(graph, &states);
    let mut errors = Vec::new();
    if cancel.is_cancelled() {
        let left_pending = states
            .iter()
            .filter(|state| **state == NodeState::Pending)
            .count();
        errors.push(format!(
            "run cancelled ({left_pending} node(s) left pending)"
        ));
    }

    let nodes = plan
        .execution_order
        .iter()
        .filter_map(|id| graph.handle(id))
        .map(|handle| {
            let index = handle.0;
            NodeReport {
                id: graph.nodes[index].id.clone(),
                state: states[index],
                documents: outcomes[index].clone(),
                failure: failures[index].clone(),
                blocked_by: blocked[index].clone(),
            }
        })
        .collect();

    RunReport { plan, nodes, errors }
}

fn pending_report(id: &NodeId, blocked_by: Option<NodeId>) -> NodeReport {
    NodeReport {
        id: id.clone(),
        state: NodeState::Pending,
        documents: Vec::new(),
        failure: None,
        blocked_by,
    }
}

/// For every node left `Pending`, find the failed ancestor that blocked it.
/// Attribution is transitive to the root cause, so a deep dependent names
/// the node that actually failed, not an intermediate blocked one.
fn attribute_blocked(graph: &DependencyGraph, states: &[NodeState]) -> Vec<Option<NodeId>> {
    let mut blocked: Vec<Option<NodeId>> = vec![None; states.len()];
    let Ok(order) = graph.execution_order() else {
        return blocked;
    };

    for handle in order {
        let index = handle.0;
        if states[index] != NodeState::Pending {
            continue;
        }
        for &dependency in &graph.nodes[index].depends_on {
            if states[dependency] == NodeState::Failed {
                blocked[index] = Some(graph.nodes[dependency].id.clone());
                break;
            }
            if let Some(root_cause) = &blocked[dependency] {
                blocked[index] = Some(root_cause.clone());
                break;
            }
        }
    }

    blocked
}

fn apply_node(
    index: usize,
    node: &GraphNode,
    client: &dyn ClusterClient,
    options: RunOptions,
    cancel: &CancelToken,
) -> NodeCompletion {
    let mut documents = Vec::with_capacity(node.documents.len());

    for document in &node.documents {
        if cancel.is_cancelled() {
            return NodeCompletion {
                index,
                documents,
                failure: Some(NodeFailure {
                    kind: FailureKind::Cancelled,
                    message: format!("run cancelled before {}", document.identity()),
                }),
            };
        }

        match apply_document(document, client, options) {
            Ok(outcome) => documents.push(outcome),
            Err(failure) => {
                return NodeCompletion {
                    index,
                    documents,
                    failure: Some(failure),
                };
            }
        }
    }

    if let Some(probe) = &node.readiness_gate {
        let failure = match client.wait_ready(probe) {
            Ok(ReadyStatus::Ready) => None,
            Ok(ReadyStatus::TimedOut) => Some(NodeFailure {
                kind: FailureKind::ReadinessTimeout,
                message: format!(
                    "workloads matching \"{}\" not ready within {:?}",
                    probe.selector, probe.timeout
                ),
            }),
            Err(error) => Some(NodeFailure {
                kind: FailureKind::Fatal,
                message: error.to_string(),
            }),
        };
        if failure.is_some() {
            return NodeCompletion {
                index,
                documents,
                failure,
            };
        }
    }

    NodeCompletion {
        index,
        documents,
        failure: None,
    }
}

fn apply_document(
    document: &caravel_domain::ResourceDocument,
    client: &dyn ClusterClient,
    options: RunOptions,
) -> Result<DocumentOutcome, NodeFailure> {
    let mut attempt = 0_u32;
    loop {
        attempt += 1;
        match client.apply(document) {
            Ok(outcome) => {
                return Ok(DocumentOutcome {
                    identity: document.identity(),
                    outcome,
                    attempts: attempt,
                });
            }
            Err(ClusterError::Fatal { message }) => {
                return Err(NodeFailure {
                    kind: FailureKind::Fatal,
                    message: format!("{}: {message}", document.identity()),
                });
            }
            Err(ClusterError::Retryable { message }) => {
                if attempt >= options.max_attempts {
                    return Err(NodeFailure {
                        kind: FailureKind::RetryExhausted,
                        message: format!(
                            "{}: {message} (gave up after {attempt} attempts)",
                            document.identity()
                        ),
                    });
                }
                let backoff = options
                    .backoff_base
                    .saturating_mul(1_u32 << (attempt - 1).min(16));
                thread::sleep(backoff);
            }
        }
    }
}
