//! Layered concurrent execution of compiled graphs.
//!
//! The [`Executor`] walks a [`CompiledGraph`]'s precomputed layers: every
//! node of a layer runs concurrently against the state as it stood when
//! the layer began, then a barrier folds the returned patches back into
//! the state in declared node order. Determinism comes from that fixed
//! fold order; completion order never matters.
//!
//! Failure and cancellation preserve partial progress: the error carries
//! the state as merged up to (and including, for completed siblings) the
//! failing layer.

pub mod config;

pub use config::ExecutorConfig;

use miette::Diagnostic;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::instrument;

use crate::event_bus::{Event, EventBus};
use crate::graphs::CompiledGraph;
use crate::node::{InvokeError, NodeContext};
use crate::reducers::ReducerRegistry;
use crate::schema::MergeError;
use crate::state::{StateInstance, StatePatch};
use crate::types::{FieldType, NodeId};
use crate::utils::id_generator::IdGenerator;

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminalStatus {
    /// The run completed and produced its full output shape.
    Succeeded,
    /// A node, merge, or cancellation ended the run mid-flight.
    Failed,
    /// The initial state never passed input validation; nothing ran.
    InvalidRun,
}

/// Drives runs of compiled graphs.
///
/// An executor owns its reducer registry, event bus, and configuration and
/// can serve any number of graphs and runs. Cloning shares the bus and
/// reducers.
#[derive(Clone)]
pub struct Executor {
    config: ExecutorConfig,
    reducers: Arc<ReducerRegistry>,
    event_bus: Arc<EventBus>,
    ids: IdGenerator,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    /// An executor with default config, default reducers, and a stdout bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ExecutorConfig::new(),
            reducers: Arc::new(ReducerRegistry::default()),
            event_bus: Arc::new(EventBus::default()),
            ids: IdGenerator::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_reducers(mut self, reducers: ReducerRegistry) -> Self {
        self.reducers = Arc::new(reducers);
        self
    }

    #[must_use]
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Arc::new(event_bus);
        self
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Run `graph` to completion on the current task.
    ///
    /// On success the returned state is narrowed to the graph's declared
    /// output shape. On failure the error carries whatever state the run
    /// accumulated before it stopped.
    pub async fn run(
        &self,
        graph: &CompiledGraph,
        initial: StateInstance,
    ) -> Result<StateInstance, RunError> {
        // Keep the sender alive so the cancel watch never reports closure.
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let run_id = self.config.resolve_run_id(&self.ids);
        self.execute(graph, initial, run_id, cancel_rx).await
    }

    /// Spawn a cancellable run on the Tokio runtime.
    ///
    /// The handle's [`run_id`](RunHandle::run_id) is the same id that
    /// labels the run's diagnostic events on the bus.
    pub fn spawn(&self, graph: Arc<CompiledGraph>, initial: StateInstance) -> RunHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let executor = self.clone();
        let run_id = self.config.resolve_run_id(&self.ids);
        let task_run_id = run_id.clone();
        let join = tokio::spawn(async move {
            executor.execute(&graph, initial, task_run_id, cancel_rx).await
        });
        RunHandle {
            cancel_tx,
            join,
            run_id,
        }
    }

    /// Wraps [`execute_layers`](Self::execute_layers) in a bus listener
    /// scoped to this run, so every event the run emitted has reached the
    /// sinks by the time this returns.
    async fn execute(
        &self,
        graph: &CompiledGraph,
        initial: StateInstance,
        run_id: String,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<StateInstance, RunError> {
        let listener = self.event_bus.attach();
        let result = self
            .execute_layers(graph, initial, &run_id, cancel_rx)
            .await;
        listener.close().await;
        result
    }

    #[instrument(skip_all, fields(shape = %graph.schema().name(), run_id = %run_id), err)]
    async fn execute_layers(
        &self,
        graph: &CompiledGraph,
        initial: StateInstance,
        run_id: &str,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> Result<StateInstance, RunError> {
        let schema = graph.schema().clone();
        validate_input(&schema, &initial)?;

        let sender = self.event_bus.get_sender();
        let _ = sender.send(Event::diagnostic(
            format!("run:{run_id}"),
            format!("starting {} layers", graph.layers().len()),
        ));

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency()));
        let mut state = initial;

        for (layer_idx, layer) in graph.layers().iter().enumerate() {
            if *cancel_rx.borrow() {
                return Err(RunError::Cancelled { partial: state });
            }

            let mut join_set: JoinSet<(usize, Result<StatePatch, InvokeError>)> = JoinSet::new();
            for (idx, node_id) in layer.iter().enumerate() {
                let Some(binding) = graph.registry().binding(node_id).cloned() else {
                    // Compilation guarantees a binding for every node.
                    return Err(RunError::Node {
                        node: node_id.clone(),
                        partial: state,
                        source: InvokeError::UnknownNode {
                            node: node_id.clone(),
                        },
                    });
                };
                let view = state.project(binding.reads());
                let ctx = NodeContext {
                    node_id: node_id.to_string(),
                    layer: layer_idx as u64,
                    event_bus_sender: sender.clone(),
                };
                let id = node_id.clone();
                let semaphore = semaphore.clone();
                join_set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    (idx, binding.invoke(&id, view, ctx).await)
                });
            }

            let mut results: Vec<Option<Result<StatePatch, InvokeError>>> =
                (0..layer.len()).map(|_| None).collect();
            let mut cancelled = false;
            let mut watching = true;
            loop {
                tokio::select! {
                    biased;
                    changed = cancel_rx.changed(), if watching && !cancelled => {
                        match changed {
                            Ok(()) if *cancel_rx.borrow() => {
                                cancelled = true;
                                join_set.abort_all();
                            }
                            Ok(()) => {}
                            Err(_) => watching = false,
                        }
                    }
                    next = join_set.join_next() => match next {
                        None => break,
                        Some(Ok((idx, outcome))) => results[idx] = Some(outcome),
                        Some(Err(join_err)) => {
                            if join_err.is_cancelled() {
                                continue;
                            }
                            return Err(RunError::Panic {
                                partial: state,
                                message: join_err.to_string(),
                            });
                        }
                    }
                }
            }

            // Fold completed sibling patches in declared node order.
            let mut patches: Vec<(NodeId, StatePatch)> = Vec::new();
            let mut first_failure: Option<(NodeId, InvokeError)> = None;
            for (idx, slot) in results.into_iter().enumerate() {
                match slot {
                    Some(Ok(patch)) => patches.push((layer[idx].clone(), patch)),
                    Some(Err(err)) if first_failure.is_none() => {
                        first_failure = Some((layer[idx].clone(), err));
                    }
                    _ => {}
                }
            }

            if cancelled || first_failure.is_some() {
                // Best-effort merge of what the layer did complete.
                let mut partial = state.clone();
                if schema
                    .merge_layer(&mut partial, &patches, &self.reducers)
                    .is_err()
                {
                    partial = state;
                }
                let _ = sender.send(Event::diagnostic(
                    format!("run:{run_id}"),
                    format!("layer {layer_idx} aborted"),
                ));
                return Err(match first_failure {
                    Some((node, source)) => RunError::Node {
                        node,
                        partial,
                        source,
                    },
                    None => RunError::Cancelled { partial },
                });
            }

            let updated = schema
                .merge_layer(&mut state, &patches, &self.reducers)
                .map_err(|source| RunError::Merge {
                    partial: state.clone(),
                    source,
                })?;
            tracing::debug!(layer = layer_idx, updated = ?updated, "barrier merged");
            let _ = sender.send(Event::diagnostic(
                format!("run:{run_id}"),
                format!("layer {layer_idx} merged {} fields", updated.len()),
            ));
        }

        // Required output fields must be populated before narrowing.
        for field in schema.output_shape() {
            let required = schema.field(field).is_some_and(|spec| spec.required);
            if required && !state.contains(field) {
                return Err(RunError::MissingOutput {
                    field: field.clone(),
                    partial: state,
                });
            }
        }

        Ok(state.narrow_to(schema.output_shape()))
    }
}

fn validate_input(
    schema: &crate::schema::StateSchema,
    initial: &StateInstance,
) -> Result<(), RunError> {
    for field in schema.input_shape() {
        let Some(spec) = schema.field(field) else {
            continue;
        };
        match initial.get(field) {
            None if spec.required => {
                return Err(RunError::MissingInput {
                    field: field.clone(),
                });
            }
            Some(value) if !spec.field_type.admits(value) => {
                return Err(RunError::InvalidInput {
                    field: field.clone(),
                    expected: spec.field_type,
                });
            }
            _ => {}
        }
    }
    for (field, _) in initial.iter() {
        if !schema.contains(field) {
            return Err(RunError::UndeclaredInput {
                field: field.clone(),
            });
        }
    }
    Ok(())
}

/// Handle to a spawned, cancellable run.
pub struct RunHandle {
    cancel_tx: watch::Sender<bool>,
    join: tokio::task::JoinHandle<Result<StateInstance, RunError>>,
    run_id: String,
}

impl RunHandle {
    /// Request cooperative cancellation.
    ///
    /// In-flight nodes are stopped; patches from siblings that already
    /// completed are preserved in the resulting
    /// [`RunError::Cancelled`].
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Wait for the run to finish.
    pub async fn join(self) -> Result<StateInstance, RunError> {
        match self.join.await {
            Ok(result) => result,
            Err(join_err) => Err(RunError::Panic {
                partial: StateInstance::new(),
                message: join_err.to_string(),
            }),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

/// Errors that end a run.
#[derive(Debug, Error, Diagnostic)]
pub enum RunError {
    /// A required input-shape field is absent from the initial state.
    #[error("missing required input field {field:?}")]
    #[diagnostic(
        code(loomflow::executor::missing_input),
        help("Populate every required field of the graph's input shape.")
    )]
    MissingInput { field: String },

    /// An input-shape field carries a value of the wrong type.
    #[error("input field {field:?} is not {expected}")]
    #[diagnostic(code(loomflow::executor::invalid_input))]
    InvalidInput { field: String, expected: FieldType },

    /// The initial state carries a field the schema does not declare.
    #[error("initial state carries undeclared field {field:?}")]
    #[diagnostic(code(loomflow::executor::undeclared_input))]
    UndeclaredInput { field: String },

    /// A node failed or wrote outside its declared write set.
    #[error("node {node} ended the run")]
    #[diagnostic(code(loomflow::executor::node_failed))]
    Node {
        node: NodeId,
        /// State merged up to the failure, including completed siblings.
        partial: StateInstance,
        #[source]
        #[diagnostic_source]
        source: InvokeError,
    },

    /// A barrier merge failed, e.g. on conflicting sibling writes.
    #[error("barrier merge failed")]
    #[diagnostic(code(loomflow::executor::merge_failed))]
    Merge {
        /// State as of the start of the failing layer.
        partial: StateInstance,
        #[source]
        #[diagnostic_source]
        source: MergeError,
    },

    /// The run was cancelled through its [`RunHandle`].
    #[error("run cancelled")]
    #[diagnostic(code(loomflow::executor::cancelled))]
    Cancelled {
        /// State merged up to cancellation, including completed siblings.
        partial: StateInstance,
    },

    /// A required output-shape field was never produced at run time.
    #[error("run finished without producing output field {field:?}")]
    #[diagnostic(code(loomflow::executor::missing_output))]
    MissingOutput { field: String, partial: StateInstance },

    /// A node task panicked or was torn down by the runtime.
    #[error("node task failed: {message}")]
    #[diagnostic(code(loomflow::executor::panic))]
    Panic {
        partial: StateInstance,
        message: String,
    },
}

impl RunError {
    /// Classify the error for reporting.
    pub fn terminal_status(&self) -> TerminalStatus {
        match self {
            RunError::MissingInput { .. }
            | RunError::InvalidInput { .. }
            | RunError::UndeclaredInput { .. } => TerminalStatus::InvalidRun,
            _ => TerminalStatus::Failed,
        }
    }

    /// The partial state preserved by the run, when any layer progressed.
    pub fn partial_state(&self) -> Option<&StateInstance> {
        match self {
            RunError::Node { partial, .. }
            | RunError::Merge { partial, .. }
            | RunError::Cancelled { partial }
            | RunError::MissingOutput { partial, .. }
            | RunError::Panic { partial, .. } => Some(partial),
            _ => None,
        }
    }
}
