//! Node execution framework.
//!
//! This module provides the core abstractions for executable workflow nodes:
//! the [`Node`] trait, the execution context handed to each invocation, the
//! [`NodeRegistry`] that binds node implementations to declared read/write
//! sets, and the error types for both.

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::event_bus::Event;
use crate::schema::StateSchema;
use crate::state::{StateInstance, StatePatch, StateView};
use crate::types::NodeId;

/// Core trait defining executable workflow nodes.
///
/// A node is a pure state transformation: it receives a read-only
/// [`StateView`] projected to its declared read set, does its work, and
/// returns a [`StatePatch`] covering a subset of its declared write set.
/// Nodes never mutate shared state and never see sibling writes from their
/// own layer, which is what makes concurrent branches safe.
///
/// # Error Handling
///
/// Returning `Err(NodeError)` is fatal for the run; the executor surfaces
/// the failure together with all state merged up to the node's layer.
///
/// # Examples
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use loomflow::node::{Node, NodeContext, NodeError};
/// use loomflow::state::{StatePatch, StateView};
/// use serde_json::json;
///
/// struct CleanLogs;
///
/// #[async_trait]
/// impl Node for CleanLogs {
///     async fn run(&self, view: StateView, ctx: NodeContext) -> Result<StatePatch, NodeError> {
///         ctx.emit("clean", "normalizing raw logs")?;
///         let raw = view
///             .get_array("raw_logs")
///             .ok_or(NodeError::MissingInput { what: "raw_logs" })?;
///         let mut patch = StatePatch::default();
///         patch.insert("cleaned_logs".into(), json!(raw));
///         Ok(patch)
///     }
/// }
/// ```
#[async_trait]
pub trait Node: Send + Sync {
    /// Execute this node against its projected view of the state.
    async fn run(&self, view: StateView, ctx: NodeContext) -> Result<StatePatch, NodeError>;
}

/// Execution context passed to nodes during workflow execution.
///
/// Carries the node's identity, the index of the layer it runs in, and a
/// sender for the run's event bus.
#[derive(Clone, Debug)]
pub struct NodeContext {
    /// Identifier of the node being invoked.
    pub node_id: String,
    /// Zero-based index of the execution layer this invocation belongs to.
    pub layer: u64,
    /// Channel for emitting events to the run's event bus.
    pub event_bus_sender: flume::Sender<Event>,
}

impl NodeContext {
    /// Emit a node-scoped event enriched with this context's metadata.
    pub fn emit(
        &self,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), NodeError> {
        self.event_bus_sender
            .send(Event::node_message_with_meta(
                self.node_id.clone(),
                self.layer,
                scope,
                message,
            ))
            .map_err(|_| NodeError::EventBusUnavailable)
    }
}

/// Errors that can occur during node execution.
///
/// These are fatal for the run. The executor wraps them with the failing
/// node's identity and the partially merged state.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// Expected input data is missing from the node's view.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(loomflow::node::missing_input),
        help("Check that an upstream node produced the required field.")
    )]
    MissingInput { what: &'static str },

    /// External provider or service error.
    #[error("provider error ({provider}): {message}")]
    #[diagnostic(code(loomflow::node::provider))]
    Provider {
        provider: &'static str,
        message: String,
    },

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    #[diagnostic(code(loomflow::node::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Input validation failed.
    #[error("validation failed: {0}")]
    #[diagnostic(
        code(loomflow::node::validation),
        help("Check input data format and required fields.")
    )]
    ValidationFailed(String),

    /// A nested graph invoked by this node failed.
    #[error("nested workflow failed: {message}")]
    #[diagnostic(code(loomflow::node::subgraph))]
    Subgraph { message: String },

    /// Event could not be sent due to event bus disconnection.
    #[error("failed to emit event: event bus unavailable")]
    #[diagnostic(
        code(loomflow::node::event_bus_unavailable),
        help("The event bus listener may have been stopped.")
    )]
    EventBusUnavailable,
}

/// A node implementation together with its declared field accesses.
#[derive(Clone)]
pub struct NodeBinding {
    node: Arc<dyn Node>,
    reads: Vec<String>,
    writes: Vec<String>,
}

impl fmt::Debug for NodeBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeBinding")
            .field("reads", &self.reads)
            .field("writes", &self.writes)
            .finish_non_exhaustive()
    }
}

impl NodeBinding {
    pub fn node(&self) -> &Arc<dyn Node> {
        &self.node
    }

    /// Fields this node may read, in declaration order.
    pub fn reads(&self) -> &[String] {
        &self.reads
    }

    /// Fields this node may write, in declaration order.
    pub fn writes(&self) -> &[String] {
        &self.writes
    }

    /// Run the bound node against an already-projected view and enforce the
    /// declared write set on the resulting patch.
    pub async fn invoke(
        &self,
        id: &NodeId,
        view: StateView,
        ctx: NodeContext,
    ) -> Result<StatePatch, InvokeError> {
        let patch = self
            .node
            .run(view, ctx)
            .await
            .map_err(|source| InvokeError::Node {
                node: id.clone(),
                source,
            })?;

        for field in patch.keys() {
            if !self.writes.iter().any(|w| w == field) {
                return Err(InvokeError::UnauthorizedWrite {
                    node: id.clone(),
                    field: field.clone(),
                });
            }
        }

        Ok(patch)
    }
}

/// Binds node identifiers to implementations and declared read/write sets,
/// all validated against one state schema.
///
/// Registration is the only gate between a node and the state: at run time
/// the registry projects the state down to the declared reads before
/// invocation and rejects any patched field outside the declared writes.
#[derive(Clone)]
pub struct NodeRegistry {
    schema: Arc<StateSchema>,
    bindings: FxHashMap<NodeId, NodeBinding>,
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("shape", &self.schema.name())
            .field("bindings", &self.bindings)
            .finish()
    }
}

impl NodeRegistry {
    /// A registry whose nodes operate on `schema`.
    pub fn new(schema: Arc<StateSchema>) -> Self {
        Self {
            schema,
            bindings: FxHashMap::default(),
        }
    }

    /// The schema this registry validates against.
    pub fn schema(&self) -> &Arc<StateSchema> {
        &self.schema
    }

    /// Register `node` under `id` with its declared read and write sets.
    ///
    /// Every declared field must exist in the schema, and `id` must be
    /// fresh; both checks fail with the first offending name.
    pub fn register<R, W, S, T>(
        &mut self,
        id: impl Into<NodeId>,
        node: Arc<dyn Node>,
        reads: R,
        writes: W,
    ) -> Result<&mut Self, RegistryError>
    where
        R: IntoIterator<Item = S>,
        W: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        let id = id.into();
        if self.bindings.contains_key(&id) {
            return Err(RegistryError::DuplicateNode { node: id });
        }

        let reads: Vec<String> = reads.into_iter().map(Into::into).collect();
        let writes: Vec<String> = writes.into_iter().map(Into::into).collect();
        for field in reads.iter().chain(writes.iter()) {
            if !self.schema.contains(field) {
                return Err(RegistryError::UnknownField {
                    node: id,
                    field: field.clone(),
                    shape: self.schema.name().to_string(),
                });
            }
        }

        self.bindings
            .insert(id, NodeBinding { node, reads, writes });
        Ok(self)
    }

    /// Look up the binding for `id`.
    pub fn binding(&self, id: &NodeId) -> Option<&NodeBinding> {
        self.bindings.get(id)
    }

    /// Returns `true` if `id` is registered.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.bindings.contains_key(id)
    }

    /// Invoke the node bound to `id` against `state`.
    ///
    /// The state is projected down to the node's declared reads before the
    /// call, and the returned patch is checked against the declared writes.
    /// A field outside the write set is an [`InvokeError::UnauthorizedWrite`]
    /// and discards the whole patch.
    pub async fn invoke(
        &self,
        id: &NodeId,
        state: &StateInstance,
        ctx: NodeContext,
    ) -> Result<StatePatch, InvokeError> {
        let binding = self
            .bindings
            .get(id)
            .ok_or_else(|| InvokeError::UnknownNode { node: id.clone() })?;

        let view = state.project(binding.reads());
        binding.invoke(id, view, ctx).await
    }
}

/// Errors raised while registering nodes.
#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    /// A node identifier was registered twice.
    #[error("node already registered: {node}")]
    #[diagnostic(code(loomflow::node::duplicate_node))]
    DuplicateNode { node: NodeId },

    /// A declared read or write names a field the schema does not have.
    #[error("node {node} declares unknown field {field:?} (shape {shape})")]
    #[diagnostic(
        code(loomflow::node::unknown_field),
        help("Declared reads and writes must name fields of the registry's schema.")
    )]
    UnknownField {
        node: NodeId,
        field: String,
        shape: String,
    },
}

/// Errors raised while invoking a registered node.
#[derive(Debug, Error, Diagnostic)]
pub enum InvokeError {
    /// The identifier is not registered.
    #[error("unknown node: {node}")]
    #[diagnostic(code(loomflow::node::unknown_node))]
    UnknownNode { node: NodeId },

    /// The node patched a field outside its declared write set.
    #[error("node {node} wrote undeclared field {field:?}")]
    #[diagnostic(
        code(loomflow::node::unauthorized_write),
        help("Add the field to the node's declared writes, or stop patching it.")
    )]
    UnauthorizedWrite { node: NodeId, field: String },

    /// The node itself failed.
    #[error("node {node} failed")]
    #[diagnostic(code(loomflow::node::failed))]
    Node {
        node: NodeId,
        #[source]
        #[diagnostic_source]
        source: NodeError,
    },
}
