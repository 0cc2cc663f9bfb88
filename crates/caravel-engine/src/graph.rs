use std::collections::{BTreeSet, HashMap};

use caravel_domain::{ImageBinding, NodeId, ReadinessProbe, ResourceDocument};

use crate::error::GraphError;

/// Opaque handle into the graph's node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(pub(crate) usize);

#[derive(Debug, Clone)]
pub(crate) struct GraphNode {
    pub(crate) id: NodeId,
    pub(crate) documents: Vec<ResourceDocument>,
    pub(crate) depends_on: Vec<usize>,
    pub(crate) images: Vec<ImageBinding>,
    pub(crate) readiness_gate: Option<ReadinessProbe>,
}

/// Arena of deployment nodes plus directed dependency edges.
///
/// The graph owns all nodes; edges are a relation between arena indices, not
/// ownership, so a namespace node can be depended on by many service nodes
/// and leaf nodes need no dependents. Construction is the plan phase: all
/// structural validation happens here, before any apply call.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    pub(crate) nodes: Vec<GraphNode>,
    index: HashMap<NodeId, usize>,
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Register a node deployed as one apply unit.
    ///
    /// # Errors
    ///
    /// Returns an error when `id` is already registered.
    pub fn add_node(
        &mut self,
        id: NodeId,
        documents: Vec<ResourceDocument>,
    ) -> Result<NodeHandle, GraphError> {
        if self.index.contains_key(&id) {
            return Err(GraphError::DuplicateNode { id: id.to_string() });
        }

        let handle = NodeHandle(self.nodes.len());
        self.index.insert(id.clone(), handle.0);
        self.nodes.push(GraphNode {
            id,
            documents,
            depends_on: Vec::new(),
            images: Vec::new(),
            readiness_gate: None,
        });
        Ok(handle)
    }

    /// Declare that `dependent` must not begin applying until `dependency`
    /// has been applied.
    ///
    /// # Errors
    ///
    /// Returns an error for self-edges or handles outside the arena.
    pub fn add_edge(
        &mut self,
        dependent: NodeHandle,
        dependency: NodeHandle,
    ) -> Result<(), GraphError> {
        let max = self.nodes.len();
        for handle in [dependent, dependency] {
            if handle.0 >= max {
                return Err(GraphError::UnknownNode { index: handle.0 });
            }
        }
        if dependent == dependency {
            return Err(GraphError::SelfDependency {
                id: self.nodes[dependent.0].id.to_string(),
            });
        }

        let edges = &mut self.nodes[dependent.0].depends_on;
        if !edges.contains(&dependency.0) {
            edges.push(dependency.0);
        }
        Ok(())
    }

    pub fn set_readiness_gate(&mut self, handle: NodeHandle, probe: ReadinessProbe) {
        if let Some(node) = self.nodes.get_mut(handle.0) {
            node.readiness_gate = Some(probe);
        }
    }

    pub(crate) fn record_images(&mut self, handle: NodeHandle, images: Vec<ImageBinding>) {
        if let Some(node) = self.nodes.get_mut(handle.0) {
            node.images = images;
        }
    }

    #[must_use]
    pub fn handle(&self, id: &NodeId) -> Option<NodeHandle> {
        self.index.get(id).copied().map(NodeHandle)
    }

    #[must_use]
    pub fn id(&self, handle: NodeHandle) -> Option<&NodeId> {
        self.nodes.get(handle.0).map(|node| &node.id)
    }

    /// Compute a dependency-respecting apply order via topological sorting.
    ///
    /// Ties among independent nodes are broken by insertion order, so the
    /// result is reproducible across runs for identical input.
    ///
    /// # Errors
    ///
    /// Returns an error when the edge set contains a cycle, naming the
    /// participating node identifiers.
    pub fn execution_order(&self) -> Result<Vec<NodeHandle>, GraphError> {
        if self.nodes.is_empty() {
            return Ok(Vec::new());
        }

        let mut indegree: Vec<usize> = self.nodes.iter().map(|node| node.depends_on.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (index, node) in self.nodes.iter().enumerate() {
            for &dependency in &node.depends_on {
                dependents[dependency].push(index);
            }
        }

        let mut ready: BTreeSet<usize> = indegree
            .iter()
            .enumerate()
            .filter_map(|(index, &count)| (count == 0).then_some(index))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(next) = ready.pop_first() {
            order.push(NodeHandle(next));

            for &dependent in &dependents[next] {
                let Some(entry) = indegree.get_mut(dependent) else {
                    return Err(GraphError::Invariant {
                        message: "internal graph error: missing dependent indegree".to_string(),
                    });
                };
                if *entry == 0 {
                    continue;
                }
                *entry -= 1;
                if *entry == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(self.trace_cycle(&indegree));
        }

        Ok(order)
    }

    /// Walk one cycle through the nodes left unordered and name exactly its
    /// members. Acyclic descendants of a cycle also end up unordered, but
    /// they are not part of the problem and would drown out the message.
    fn trace_cycle(&self, residual_indegree: &[usize]) -> GraphError {
        let residual: Vec<bool> = residual_indegree.iter().map(|&count| count > 0).collect();
        let Some(start) = residual.iter().position(|&leftover| leftover) else {
            return GraphError::Invariant {
                message: "internal graph error: unordered nodes without residual edges"
                    .to_string(),
            };
        };

        // Every residual node still has at least one residual dependency, so
        // following them must eventually revisit a node on the path.
        let mut position_in_path: HashMap<usize, usize> = HashMap::new();
        let mut path: Vec<usize> = Vec::new();
        let mut current = start;
        loop {
            if let Some(&first_visit) = position_in_path.get(&current) {
                let nodes = path[first_visit..]
                    .iter()
                    .map(|&index| self.nodes[index].id.to_string())
                    .collect::<Vec<_>>()
                    .join(" -> ");
                return GraphError::Cycle { nodes };
            }
            position_in_path.insert(current, path.len());
            path.push(current);

            let Some(next) = self.nodes[current]
                .depends_on
                .iter()
                .copied()
                .find(|&dependency| residual[dependency])
            else {
                return GraphError::Invariant {
                    message: "internal graph error: residual node without residual dependency"
                        .to_string(),
                };
            };
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use caravel_domain::NodeId;

    use super::DependencyGraph;
    use crate::error::GraphError;

    fn id(value: &str) -> NodeId {
        NodeId::try_from(value).expect("valid node id")
    }

    #[test]
    fn orders_dependencies_before_dependents() {
        let mut graph = DependencyGraph::new();
        let application = graph.add_node(id("application"), vec![]).expect("add");
        let gateway = graph.add_node(id("gateway"), vec![]).expect("add");
        graph.add_edge(gateway, application).expect("edge");

        let order = graph.execution_order().expect("order");
        assert_eq!(order, vec![application, gateway]);
    }

    #[test]
    fn independent_nodes_keep_insertion_order() {
        let mut graph = DependencyGraph::new();
        let redis = graph.add_node(id("redis"), vec![]).expect("add");
        let cart = graph.add_node(id("cartservice"), vec![]).expect("add");
        let orders = graph.add_node(id("orderservice"), vec![]).expect("add");

        let order = graph.execution_order().expect("order");
        assert_eq!(order, vec![redis, cart, orders]);
    }

    #[test]
    fn every_node_appears_exactly_once() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_node(id("a"), vec![]).expect("add");
        let b = graph.add_node(id("b"), vec![]).expect("add");
        let c = graph.add_node(id("c"), vec![]).expect("add");
        graph.add_edge(b, a).expect("edge");
        graph.add_edge(c, a).expect("edge");
        graph.add_edge(c, b).expect("edge");

        let order = graph.execution_order().expect("order");
        assert_eq!(order.len(), 3);
        let position = |handle| order.iter().position(|entry| *entry == handle);
        assert!(position(a) < position(b));
        assert!(position(b) < position(c));
    }

    #[test]
    fn detects_cycles_naming_participants() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_node(id("application"), vec![]).expect("add");
        let b = graph.add_node(id("gateway"), vec![]).expect("add");
        graph.add_edge(a, b).expect("edge");
        graph.add_edge(b, a).expect("edge");

        let error = graph.execution_order().expect_err("must fail");
        assert!(matches!(error, GraphError::Cycle { .. }));
        let message = error.to_string();
        assert!(message.contains("application"));
        assert!(message.contains("gateway"));
    }

    #[test]
    fn cycle_errors_omit_acyclic_descendants() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_node(id("application"), vec![]).expect("add");
        let b = graph.add_node(id("gateway"), vec![]).expect("add");
        let c = graph.add_node(id("frontend"), vec![]).expect("add");
        graph.add_edge(a, b).expect("edge");
        graph.add_edge(b, a).expect("edge");
        // frontend only waits on the cycle; it is not part of it.
        graph.add_edge(c, a).expect("edge");

        let error = graph.execution_order().expect_err("must fail");
        let message = error.to_string();
        assert!(message.contains("application"));
        assert!(message.contains("gateway"));
        assert!(!message.contains("frontend"));
    }

    #[test]
    fn rejects_duplicate_node_ids() {
        let mut graph = DependencyGraph::new();
        graph.add_node(id("redis"), vec![]).expect("add");
        let error = graph.add_node(id("redis"), vec![]).expect_err("must fail");
        assert!(matches!(error, GraphError::DuplicateNode { .. }));
    }

    #[test]
    fn rejects_self_edges() {
        let mut graph = DependencyGraph::new();
        let node = graph.add_node(id("redis"), vec![]).expect("add");
        let error = graph.add_edge(node, node).expect_err("must fail");
        assert!(matches!(error, GraphError::SelfDependency { .. }));
    }
}
