use std::fmt::Write;

use caravel_domain::{NodeSummary, PlanReport};
use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::graph::{DependencyGraph, GraphNode};

/// Build the structural plan for a graph: the apply order plus one summary
/// row per node.
///
/// Ordering failures (cycles) do not abort plan construction; the report
/// falls back to insertion order and carries the error, so the plan stays
/// renderable for diagnosis. Callers must treat a plan with errors as
/// not-applyable.
#[must_use]
pub fn build_plan(graph: &DependencyGraph) -> PlanReport {
    let mut errors = Vec::new();
    let order = match graph.execution_order() {
        Ok(order) => order,
        Err(error) => {
            errors.push(error.to_string());
            (0..graph.len()).map(crate::graph::NodeHandle).collect()
        }
    };

    let mut summaries: Vec<(usize, NodeSummary)> = order
        .par_iter()
        .enumerate()
        .filter_map(|(position, handle)| {
            graph
                .nodes
                .get(handle.0)
                .map(|node| (position, summarize(graph, node)))
        })
        .collect();
    summaries.sort_by_key(|(position, _)| *position);

    PlanReport {
        execution_order: order
            .iter()
            .filter_map(|handle| graph.id(*handle).cloned())
            .collect(),
        nodes: summaries.into_iter().map(|(_, summary)| summary).collect(),
        errors,
    }
}

fn summarize(graph: &DependencyGraph, node: &GraphNode) -> NodeSummary {
    NodeSummary {
        id: node.id.clone(),
        documents: node
            .documents
            .iter()
            .map(caravel_domain::ResourceDocument::identity)
            .collect(),
        images: node.images.clone(),
        depends_on: node
            .depends_on
            .iter()
            .filter_map(|&index| graph.nodes.get(index).map(|entry| entry.id.clone()))
            .collect(),
        readiness_gate: node.readiness_gate.is_some(),
        content_hash: content_hash(node),
    }
}

fn content_hash(node: &GraphNode) -> String {
    let mut hasher = Sha256::new();
    for document in &node.documents {
        if let Ok(rendered) = document.to_yaml() {
            hasher.update(rendered.as_bytes());
        }
    }
    let digest = hasher.finalize();
    digest.iter().fold(String::new(), |mut output, byte| {
        let _ = write!(output, "{byte:02x}");
        output
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use caravel_domain::{NodeId, ResourceDocument};

    use super::build_plan;
    use crate::graph::DependencyGraph;

    fn id(value: &str) -> NodeId {
        NodeId::try_from(value).expect("valid node id")
    }

    fn namespace_document(name: &str) -> ResourceDocument {
        ResourceDocument::from_mapping(
            serde_yaml::from_str(&format!(
                "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: {name}\n"
            ))
            .expect("valid yaml"),
        )
        .expect("valid document")
    }

    #[test]
    fn summaries_follow_execution_order() {
        let mut graph = DependencyGraph::new();
        let application = graph
            .add_node(id("application"), vec![namespace_document("abshop")])
            .expect("add");
        let gateway = graph
            .add_node(id("gateway"), vec![namespace_document("gateway-ns")])
            .expect("add");
        graph.add_edge(gateway, application).expect("edge");

        let plan = build_plan(&graph);
        assert!(!plan.has_errors());
        assert_eq!(plan.execution_order, vec![id("application"), id("gateway")]);
        assert_eq!(plan.nodes[1].depends_on, vec![id("application")]);
        assert_eq!(plan.nodes[0].documents[0].kind, "Namespace");
        assert_eq!(plan.nodes[0].content_hash.len(), 64);
    }

    #[test]
    fn identical_nodes_hash_identically() {
        let mut graph = DependencyGraph::new();
        graph
            .add_node(id("one"), vec![namespace_document("abshop")])
            .expect("add");
        graph
            .add_node(id("two"), vec![namespace_document("abshop")])
            .expect("add");

        let plan = build_plan(&graph);
        assert_eq!(plan.nodes[0].content_hash, plan.nodes[1].content_hash);
    }

    #[test]
    fn cycle_errors_keep_the_plan_renderable() {
        let mut graph = DependencyGraph::new();
        let a = graph
            .add_node(id("a"), vec![namespace_document("a")])
            .expect("add");
        let b = graph
            .add_node(id("b"), vec![namespace_document("b")])
            .expect("add");
        graph.add_edge(a, b).expect("edge");
        graph.add_edge(b, a).expect("edge");

        let plan = build_plan(&graph);
        assert!(plan.has_errors());
        assert_eq!(plan.nodes.len(), 2);
        assert!(plan.errors[0].contains("cycle"));
    }
}
