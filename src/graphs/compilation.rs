//! Compilation: binding a graph definition to nodes and a schema.
//!
//! Compilation is where topology meets dataflow. Given a validated
//! [`GraphDefinition`] and a [`NodeRegistry`], [`compile`] proves that
//! every node's declared reads are satisfiable by the graph's input shape
//! or by some ancestor's writes, that the declared output shape is fully
//! produced, and precomputes the execution layers. The result is an
//! immutable [`CompiledGraph`] that can be invoked any number of times,
//! including concurrently.

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

use super::builder::{GraphDefinition, GraphError};
use crate::node::NodeRegistry;
use crate::schema::StateSchema;
use crate::types::NodeId;

/// An executable workflow: topology, node bindings, schema, and layers.
///
/// Compiled graphs are `Send + Sync` and internally immutable. Cloning is
/// cheap; the executor and the sub-graph adapter both hold them behind
/// `Arc`.
#[derive(Clone, Debug)]
pub struct CompiledGraph {
    definition: GraphDefinition,
    registry: NodeRegistry,
    layers: Vec<Vec<NodeId>>,
}

impl CompiledGraph {
    pub fn definition(&self) -> &GraphDefinition {
        &self.definition
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn schema(&self) -> &Arc<StateSchema> {
        self.registry.schema()
    }

    /// Execution layers in run order; nodes within a layer are in
    /// declaration order.
    pub fn layers(&self) -> &[Vec<NodeId>] {
        &self.layers
    }

    /// Run this graph on a default [`Executor`](crate::executor::Executor).
    ///
    /// Convenience for one-off runs; construct an executor explicitly to
    /// share reducers, an event bus, or configuration across runs.
    pub async fn invoke(
        &self,
        initial: crate::state::StateInstance,
    ) -> Result<crate::state::StateInstance, crate::executor::RunError> {
        crate::executor::Executor::new().run(self, initial).await
    }
}

/// Bind `definition` to the nodes and schema in `registry`.
///
/// Validation order is deterministic: nodes are visited layer by layer and,
/// within a layer, in declaration order, so the same broken graph always
/// reports the same first violation.
#[instrument(skip_all, fields(shape = %registry.schema().name()), err)]
pub fn compile(
    definition: GraphDefinition,
    registry: NodeRegistry,
) -> Result<CompiledGraph, CompileError> {
    let layers = definition.layers()?;
    let schema = registry.schema().clone();

    for node in definition.nodes() {
        if !registry.contains(node) {
            return Err(CompileError::UnboundNode { node: node.clone() });
        }
    }

    // Availability flows along edges: a node may read the graph input plus
    // anything any ancestor wrote.
    let input: FxHashSet<&str> = schema.input_shape().iter().map(String::as_str).collect();
    let mut available: FxHashMap<&NodeId, FxHashSet<String>> = FxHashMap::default();
    for layer in &layers {
        for node in layer {
            let mut fields: FxHashSet<String> =
                input.iter().map(|s| (*s).to_string()).collect();
            for pred in definition.predecessors(node) {
                if let Some(upstream) = available.get(&pred) {
                    fields.extend(upstream.iter().cloned());
                }
                if let Some(binding) = registry.binding(&pred) {
                    fields.extend(binding.writes().iter().cloned());
                }
            }

            let binding = registry
                .binding(node)
                .ok_or_else(|| CompileError::UnboundNode { node: node.clone() })?;
            for read in binding.reads() {
                if !fields.contains(read) {
                    return Err(CompileError::UnsatisfiableRead {
                        node: node.clone(),
                        field: read.clone(),
                    });
                }
            }

            let owner = definition
                .nodes()
                .iter()
                .find(|n| *n == node)
                .ok_or_else(|| CompileError::UnboundNode { node: node.clone() })?;
            available.insert(owner, fields);
        }
    }

    // Output completeness: every declared output field has a producer.
    let mut produced: FxHashSet<&str> = input;
    for node in definition.nodes() {
        if let Some(binding) = registry.binding(node) {
            produced.extend(binding.writes().iter().map(String::as_str));
        }
    }
    for field in schema.output_shape() {
        if !produced.contains(field.as_str()) {
            return Err(CompileError::UnproducedOutput {
                field: field.clone(),
            });
        }
    }

    Ok(CompiledGraph {
        definition,
        registry,
        layers,
    })
}

/// Errors raised while compiling a graph against a node registry.
#[derive(Debug, Error, Diagnostic)]
pub enum CompileError {
    /// The topology itself is invalid.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    /// A graph node has no registered implementation.
    #[error("no node registered for {node}")]
    #[diagnostic(
        code(loomflow::graphs::unbound_node),
        help("Register an implementation for every node in the graph.")
    )]
    UnboundNode { node: NodeId },

    /// A node reads a field neither the input shape nor any ancestor provides.
    #[error("node {node} reads {field:?}, which no ancestor produces")]
    #[diagnostic(
        code(loomflow::graphs::unsatisfiable_read),
        help(
            "A read must be covered by the graph's input shape or by the writes of an upstream node."
        )
    )]
    UnsatisfiableRead { node: NodeId, field: String },

    /// A declared output field has no producer anywhere in the graph.
    #[error("output field {field:?} is never produced")]
    #[diagnostic(
        code(loomflow::graphs::unproduced_output),
        help("Some node must write every field of the output shape, or the input must carry it.")
    )]
    UnproducedOutput { field: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphs::GraphBuilder;
    use crate::node::{Node, NodeContext, NodeError};
    use crate::schema::{FieldSpec, StateSchema};
    use crate::state::{StatePatch, StateView};
    use crate::types::FieldType;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Node for Noop {
        async fn run(&self, _view: StateView, _ctx: NodeContext) -> Result<StatePatch, NodeError> {
            Ok(StatePatch::default())
        }
    }

    fn schema() -> Arc<StateSchema> {
        Arc::new(
            StateSchema::builder("compile_test")
                .field(FieldSpec::required("input", FieldType::List))
                .field(FieldSpec::optional("mid", FieldType::Text))
                .field(FieldSpec::optional("out", FieldType::Text))
                .input(["input"])
                .output(["out"])
                .build()
                .unwrap(),
        )
    }

    fn two_step_definition() -> GraphDefinition {
        GraphBuilder::new()
            .add_node("first")
            .add_node("second")
            .add_edge(NodeId::Start, "first")
            .add_edge("first", "second")
            .build()
            .unwrap()
    }

    #[test]
    fn valid_pipeline_compiles_with_layers() {
        let mut registry = NodeRegistry::new(schema());
        registry
            .register("first", Arc::new(Noop), vec!["input"], vec!["mid"])
            .unwrap();
        registry
            .register("second", Arc::new(Noop), vec!["mid"], vec!["out"])
            .unwrap();

        let compiled = compile(two_step_definition(), registry).unwrap();
        assert_eq!(compiled.layers().len(), 2);
        // Debug output names the bound nodes, for error reporting in tests.
        let rendered = format!("{compiled:?}");
        assert!(rendered.contains("first"));
        assert!(rendered.contains("second"));
    }

    #[test]
    fn unbound_node_fails() {
        let registry = NodeRegistry::new(schema());
        let err = compile(two_step_definition(), registry).unwrap_err();
        assert!(matches!(err, CompileError::UnboundNode { .. }));
    }

    #[test]
    fn read_without_upstream_producer_fails() {
        let mut registry = NodeRegistry::new(schema());
        // "first" reads "mid" which nothing upstream writes.
        registry
            .register("first", Arc::new(Noop), vec!["mid"], vec!["out"])
            .unwrap();
        registry
            .register("second", Arc::new(Noop), vec!["out"], vec!["out"])
            .unwrap();

        let err = compile(two_step_definition(), registry).unwrap_err();
        match err {
            CompileError::UnsatisfiableRead { node, field } => {
                assert_eq!(node, NodeId::custom("first"));
                assert_eq!(field, "mid");
            }
            other => panic!("expected UnsatisfiableRead, got {other:?}"),
        }
    }

    #[test]
    fn sibling_writes_are_not_readable() {
        // first and sibling share a layer; sibling's write must not satisfy
        // first's read.
        let definition = GraphBuilder::new()
            .add_node("writer")
            .add_node("reader")
            .add_edge(NodeId::Start, "writer")
            .add_edge(NodeId::Start, "reader")
            .build()
            .unwrap();

        let mut registry = NodeRegistry::new(schema());
        registry
            .register("writer", Arc::new(Noop), vec!["input"], vec!["mid", "out"])
            .unwrap();
        registry
            .register("reader", Arc::new(Noop), vec!["mid"], Vec::<String>::new())
            .unwrap();

        let err = compile(definition, registry).unwrap_err();
        assert!(matches!(err, CompileError::UnsatisfiableRead { .. }));
    }

    #[test]
    fn unproduced_output_fails() {
        let mut registry = NodeRegistry::new(schema());
        registry
            .register("first", Arc::new(Noop), vec!["input"], vec!["mid"])
            .unwrap();
        registry
            .register("second", Arc::new(Noop), vec!["mid"], Vec::<String>::new())
            .unwrap();

        let err = compile(two_step_definition(), registry).unwrap_err();
        match err {
            CompileError::UnproducedOutput { field } => assert_eq!(field, "out"),
            other => panic!("expected UnproducedOutput, got {other:?}"),
        }
    }
}
