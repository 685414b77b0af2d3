//! GraphBuilder and the validated graph definition it produces.

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::types::NodeId;

/// Builder for workflow graph topology.
///
/// The builder records node identifiers and directed edges; node
/// implementations live in a
/// [`NodeRegistry`](crate::node::NodeRegistry) and are bound at compile
/// time. `NodeId::Start` and `NodeId::End` are virtual endpoints: edges may
/// leave `Start` and enter `End`, but neither may be added as a node.
///
/// Declaration order matters. Nodes are remembered in the order they were
/// added, and that order decides how sibling branches are sequenced at
/// merge barriers.
///
/// # Examples
///
/// ```
/// use loomflow::graphs::GraphBuilder;
/// use loomflow::types::NodeId;
///
/// let definition = GraphBuilder::new()
///     .add_node("clean")
///     .add_node("analyze")
///     .add_edge(NodeId::Start, "clean")
///     .add_edge("clean", "analyze")
///     // "analyze" has no outgoing edge, so it is wired to End implicitly.
///     .build()
///     .unwrap();
///
/// assert_eq!(definition.nodes().len(), 2);
/// ```
pub struct GraphBuilder {
    nodes: Vec<NodeId>,
    edges: Vec<(NodeId, NodeId)>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    /// Creates a new, empty graph builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Adds a node identifier to the graph.
    ///
    /// `Start` and `End` are virtual and are ignored with a warning, the
    /// same way duplicate additions are.
    #[must_use]
    pub fn add_node(mut self, id: impl Into<NodeId>) -> Self {
        let id = id.into();
        if !id.is_custom() {
            tracing::warn!(node = %id, "virtual endpoints cannot be added as nodes; ignored");
            return self;
        }
        if self.nodes.contains(&id) {
            tracing::warn!(node = %id, "node added twice; ignored");
            return self;
        }
        self.nodes.push(id);
        self
    }

    /// Adds a directed edge.
    ///
    /// Endpoints are validated at [`build`](Self::build) so edges and nodes
    /// may be declared in any order.
    #[must_use]
    pub fn add_edge(mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// Validate the topology and freeze it into a [`GraphDefinition`].
    ///
    /// Checks, in order:
    /// - the graph has at least one node and at least one edge from `Start`
    /// - no edge enters `Start` or leaves `End`
    /// - every edge endpoint names an added node (or a virtual endpoint)
    /// - every node is reachable from `Start`
    /// - the graph is acyclic
    ///
    /// Nodes with no outgoing edge are wired to `End` implicitly.
    pub fn build(self) -> Result<GraphDefinition, GraphError> {
        if self.nodes.is_empty() {
            return Err(GraphError::EmptyGraph);
        }

        let node_set: FxHashSet<&NodeId> = self.nodes.iter().collect();
        for (from, to) in &self.edges {
            if to.is_start() {
                return Err(GraphError::EdgeIntoStart { from: from.clone() });
            }
            if from.is_end() {
                return Err(GraphError::EdgeOutOfEnd { to: to.clone() });
            }
            for endpoint in [from, to] {
                if endpoint.is_custom() && !node_set.contains(endpoint) {
                    return Err(GraphError::UnknownNode {
                        node: endpoint.clone(),
                    });
                }
            }
        }

        // Successor lists in edge declaration order, deduplicated.
        let mut successors: FxHashMap<NodeId, Vec<NodeId>> = FxHashMap::default();
        for (from, to) in &self.edges {
            let targets = successors.entry(from.clone()).or_default();
            if !targets.contains(to) {
                targets.push(to.clone());
            }
        }

        if successors.get(&NodeId::Start).is_none_or(Vec::is_empty) {
            return Err(GraphError::NoEntryEdge);
        }

        // Implicit exit wiring: sinks flow to End.
        for node in &self.nodes {
            if successors.get(node).is_none_or(Vec::is_empty) {
                successors.entry(node.clone()).or_default().push(NodeId::End);
            }
        }

        // Reachability from Start.
        let mut reachable: FxHashSet<NodeId> = FxHashSet::default();
        let mut frontier = vec![NodeId::Start];
        while let Some(current) = frontier.pop() {
            if let Some(targets) = successors.get(&current) {
                for target in targets {
                    if target.is_custom() && reachable.insert(target.clone()) {
                        frontier.push(target.clone());
                    }
                }
            }
        }
        for node in &self.nodes {
            if !reachable.contains(node) {
                return Err(GraphError::Unreachable { node: node.clone() });
            }
        }

        let definition = GraphDefinition {
            nodes: self.nodes,
            successors,
        };
        // Layering doubles as cycle detection.
        definition.layers()?;
        Ok(definition)
    }
}

/// A validated, immutable graph topology.
#[derive(Clone, Debug)]
pub struct GraphDefinition {
    nodes: Vec<NodeId>,
    successors: FxHashMap<NodeId, Vec<NodeId>>,
}

impl GraphDefinition {
    /// Node identifiers in declaration order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Successors of `node` in edge declaration order.
    pub fn successors(&self, node: &NodeId) -> &[NodeId] {
        self.successors.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Predecessors of `node`, in the declaration order of their edges.
    pub fn predecessors(&self, node: &NodeId) -> Vec<NodeId> {
        let mut preds = Vec::new();
        for (from, targets) in &self.successors {
            if targets.contains(node) && !preds.contains(from) {
                preds.push(from.clone());
            }
        }
        preds
    }

    /// Group nodes into execution layers.
    ///
    /// A node's layer index is the length of the longest path from `Start`
    /// to it, so every predecessor of a node sits in a strictly earlier
    /// layer. Within a layer, nodes appear in declaration order, which is
    /// the order their patches fold at the barrier. Fails if a cycle
    /// survives validation.
    pub fn layers(&self) -> Result<Vec<Vec<NodeId>>, GraphError> {
        let mut indegree: FxHashMap<&NodeId, usize> =
            self.nodes.iter().map(|n| (n, 0)).collect();
        // Only custom-to-custom edges contribute to indegree; virtual
        // endpoints are never placed.
        for (from, targets) in &self.successors {
            if !from.is_custom() {
                continue;
            }
            for target in targets {
                if let Some(count) = indegree.get_mut(target) {
                    *count += 1;
                }
            }
        }

        let mut placed: FxHashSet<&NodeId> = FxHashSet::default();
        let mut layers = Vec::new();
        while placed.len() < self.nodes.len() {
            let ready: Vec<&NodeId> = self
                .nodes
                .iter()
                .filter(|n| !placed.contains(*n) && indegree[*n] == 0)
                .collect();
            if ready.is_empty() {
                let offender = self
                    .nodes
                    .iter()
                    .find(|n| !placed.contains(*n))
                    .cloned()
                    .unwrap_or(NodeId::End);
                return Err(GraphError::Cycle { node: offender });
            }
            for node in &ready {
                placed.insert(node);
                for target in self.successors(node) {
                    if let Some(count) = indegree.get_mut(target) {
                        *count -= 1;
                    }
                }
            }
            layers.push(ready.into_iter().cloned().collect());
        }
        Ok(layers)
    }
}

/// Errors raised while validating graph topology.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    /// No nodes were added.
    #[error("graph has no nodes")]
    #[diagnostic(code(loomflow::graphs::empty))]
    EmptyGraph,

    /// No edge leaves `Start`.
    #[error("graph has no entry edge from Start")]
    #[diagnostic(
        code(loomflow::graphs::no_entry),
        help("Add at least one edge from NodeId::Start to an entry node.")
    )]
    NoEntryEdge,

    /// An edge names a node that was never added.
    #[error("edge references unknown node: {node}")]
    #[diagnostic(code(loomflow::graphs::unknown_node))]
    UnknownNode { node: NodeId },

    /// An edge points into the virtual `Start` endpoint.
    #[error("edge from {from} into Start is not allowed")]
    #[diagnostic(code(loomflow::graphs::edge_into_start))]
    EdgeIntoStart { from: NodeId },

    /// An edge leaves the virtual `End` endpoint.
    #[error("edge out of End into {to} is not allowed")]
    #[diagnostic(code(loomflow::graphs::edge_out_of_end))]
    EdgeOutOfEnd { to: NodeId },

    /// A node cannot be reached from `Start`.
    #[error("node {node} is unreachable from Start")]
    #[diagnostic(
        code(loomflow::graphs::unreachable),
        help("Every node must lie on some path from Start.")
    )]
    Unreachable { node: NodeId },

    /// The graph contains a cycle through the named node.
    #[error("graph contains a cycle through {node}")]
    #[diagnostic(
        code(loomflow::graphs::cycle),
        help("Workflow graphs must be acyclic.")
    )]
    Cycle { node: NodeId },
}
