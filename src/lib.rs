//! # Loomflow: Graph-based Stateful Workflow Orchestration
//!
//! Loomflow executes typed, directed, acyclic workflows of pure
//! state-transforming nodes, with nested sub-graphs, concurrent sibling
//! branches, and deterministic per-field merge policies instead of
//! last-write-wins.
//!
//! ## Core Concepts
//!
//! - **Schemas**: A [`schema::StateSchema`] declares the fields of a
//!   workflow's state, their types, and how concurrent writes merge
//! - **Nodes**: Async units of work that read a projected view of state
//!   and return a patch
//! - **Graphs**: Declarative topology built with
//!   [`graphs::GraphBuilder`] and compiled into immutable, reentrant
//!   [`graphs::CompiledGraph`]s
//! - **Executor**: Runs compiled graphs layer by layer, fanning sibling
//!   nodes out concurrently and merging patches at barriers in declared
//!   node order
//! - **Sub-graphs**: Any compiled graph embeds in a parent as a single
//!   node via [`subgraph::SubgraphNode`]
//!
//! ## Quick Start
//!
//! ```
//! use async_trait::async_trait;
//! use loomflow::{
//!     executor::Executor,
//!     graphs::{GraphBuilder, compile},
//!     node::{Node, NodeContext, NodeError, NodeRegistry},
//!     schema::{FieldSpec, StateSchema},
//!     state::{StateInstance, StatePatch, StateView},
//!     types::{FieldType, NodeId},
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! struct Shout;
//!
//! #[async_trait]
//! impl Node for Shout {
//!     async fn run(&self, view: StateView, _ctx: NodeContext) -> Result<StatePatch, NodeError> {
//!         let text = view
//!             .get_str("text")
//!             .ok_or(NodeError::MissingInput { what: "text" })?;
//!         let mut patch = StatePatch::default();
//!         patch.insert("shouted".into(), json!(text.to_uppercase()));
//!         Ok(patch)
//!     }
//! }
//!
//! # async fn demo() -> miette::Result<()> {
//! let schema = Arc::new(
//!     StateSchema::builder("shout")
//!         .field(FieldSpec::required("text", FieldType::Text))
//!         .field(FieldSpec::required("shouted", FieldType::Text))
//!         .input(["text"])
//!         .output(["shouted"])
//!         .build()?,
//! );
//!
//! let mut registry = NodeRegistry::new(schema);
//! registry.register("shout", Arc::new(Shout), vec!["text"], vec!["shouted"])?;
//!
//! let definition = GraphBuilder::new()
//!     .add_node("shout")
//!     .add_edge(NodeId::Start, "shout")
//!     .build()?;
//! let compiled = compile(definition, registry)?;
//!
//! let initial = StateInstance::builder()
//!     .with_field("text", json!("hello"))
//!     .build();
//! let output = Executor::new().run(&compiled, initial).await?;
//! assert_eq!(output.get("shouted"), Some(&json!("HELLO")));
//! # Ok(())
//! # }
//! ```
//!
//! ## Determinism
//!
//! Sibling nodes of one execution layer run concurrently but never see
//! each other's writes; their patches fold at the barrier in node
//! declaration order. Two fields with the `Overwrite` policy written by
//! two siblings in the same layer fail the run with a conflicting-write
//! error rather than racing.
//!
//! ## Module Guide
//!
//! - [`types`] - Node identifiers, merge policies, field types
//! - [`schema`] - State schemas, shape registry, barrier merge
//! - [`state`] - State instances, patches, and read-only views
//! - [`node`] - Node trait, execution context, node registry
//! - [`reducers`] - Merge-policy combinators and their registry
//! - [`graphs`] - Graph building, validation, and compilation
//! - [`subgraph`] - Compiled graphs embedded as parent-graph nodes
//! - [`executor`] - Layered concurrent execution, cancellation, config
//! - [`event_bus`] - Run-scoped progress events and sinks
//! - [`textgen`] - Injected text-generation collaborator seam

pub mod event_bus;
pub mod executor;
pub mod graphs;
pub mod node;
pub mod reducers;
pub mod schema;
pub mod state;
pub mod subgraph;
pub mod textgen;
pub mod types;
pub mod utils;
