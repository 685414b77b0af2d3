//! Embedding compiled graphs as nodes of a parent graph.
//!
//! A [`SubgraphNode`] wraps an [`Arc<CompiledGraph>`] and presents it to
//! the parent as one ordinary node with a single logical read/write set.
//! Field maps translate between the parent's schema and the child's input
//! and output shapes, so the two graphs can use different field names (and
//! entirely different schemas). Wrapped graphs nest to arbitrary depth;
//! the parent cannot tell a sub-graph from a plain node.

use std::io::{self, Result as IoResult};
use std::sync::Arc;

use async_trait::async_trait;

use crate::event_bus::{Event, EventBus, EventSink};
use crate::executor::Executor;
use crate::graphs::CompiledGraph;
use crate::node::{Node, NodeContext, NodeError};
use crate::state::{StateInstance, StatePatch, StateView};

/// A compiled graph adapted to the [`Node`] trait.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use loomflow::subgraph::SubgraphNode;
/// # fn wrap(child: Arc<loomflow::graphs::CompiledGraph>) {
/// let node = SubgraphNode::wrap(
///     child,
///     // parent "cleaned_logs" feeds the child's "cleaned_logs"
///     [("cleaned_logs", "cleaned_logs")],
///     // child "fa_summary" lands in the parent's "fa_summary"
///     [("fa_summary", "fa_summary"), ("processed_logs", "processed_logs")],
/// );
/// # }
/// ```
pub struct SubgraphNode {
    graph: Arc<CompiledGraph>,
    /// Pairs of (parent field, child input field).
    input_map: Vec<(String, String)>,
    /// Pairs of (child output field, parent field).
    output_map: Vec<(String, String)>,
}

impl SubgraphNode {
    /// Wrap `graph` with explicit field maps.
    pub fn wrap<I, O, A, B, C, D>(graph: Arc<CompiledGraph>, input_map: I, output_map: O) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        O: IntoIterator<Item = (C, D)>,
        A: Into<String>,
        B: Into<String>,
        C: Into<String>,
        D: Into<String>,
    {
        Self {
            graph,
            input_map: input_map
                .into_iter()
                .map(|(a, b)| (a.into(), b.into()))
                .collect(),
            output_map: output_map
                .into_iter()
                .map(|(c, d)| (c.into(), d.into()))
                .collect(),
        }
    }

    /// Wrap `graph` mapping every input and output field to the same name
    /// in the parent. Useful when parent and child share a vocabulary.
    pub fn transparent(graph: Arc<CompiledGraph>) -> Self {
        let schema = graph.schema().clone();
        let input_map = schema
            .input_shape()
            .iter()
            .map(|f| (f.clone(), f.clone()))
            .collect();
        let output_map = schema
            .output_shape()
            .iter()
            .map(|f| (f.clone(), f.clone()))
            .collect();
        Self {
            graph,
            input_map,
            output_map,
        }
    }

    /// Parent-side fields this node reads; use as the registration read set.
    pub fn reads(&self) -> Vec<String> {
        self.input_map.iter().map(|(p, _)| p.clone()).collect()
    }

    /// Parent-side fields this node writes; use as the registration write set.
    pub fn writes(&self) -> Vec<String> {
        self.output_map.iter().map(|(_, p)| p.clone()).collect()
    }
}

#[async_trait]
impl Node for SubgraphNode {
    async fn run(&self, view: StateView, ctx: NodeContext) -> Result<StatePatch, NodeError> {
        let mut initial = StateInstance::new();
        for (parent_field, child_field) in &self.input_map {
            if let Some(value) = view.get(parent_field) {
                initial.set(child_field.clone(), value.clone());
            }
        }

        // Child events surface on the parent's bus.
        let executor = Executor::new().with_event_bus(EventBus::with_sink(ForwardSink {
            sender: ctx.event_bus_sender.clone(),
        }));

        let output = executor
            .run(&self.graph, initial)
            .await
            .map_err(|err| NodeError::Subgraph {
                message: err.to_string(),
            })?;

        // The child's output is ours to consume; move values rather than
        // cloning them across the boundary.
        let mut produced = output.into_fields();
        let mut patch = StatePatch::default();
        for (child_field, parent_field) in &self.output_map {
            if let Some(value) = produced.remove(child_field) {
                patch.insert(parent_field.clone(), value);
            }
        }
        Ok(patch)
    }
}

/// Sink forwarding a child run's events into the parent's bus channel.
struct ForwardSink {
    sender: flume::Sender<Event>,
}

impl EventSink for ForwardSink {
    fn handle(&mut self, event: &Event) -> IoResult<()> {
        self.sender
            .send(event.clone())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "parent bus closed"))
    }
}
