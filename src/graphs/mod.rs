//! Graph construction and compilation.
//!
//! Workflows are built in two phases. [`GraphBuilder`] collects node
//! identifiers and edges with a fluent API and freezes them into a
//! validated [`GraphDefinition`] (reachability, acyclicity, implicit exit
//! wiring). [`compile`] then binds a definition to a
//! [`NodeRegistry`](crate::node::NodeRegistry),
//! checks that every read is satisfiable and every declared output is
//! produced, and precomputes the execution layers the executor runs.

pub mod builder;
pub mod compilation;

pub use builder::{GraphBuilder, GraphDefinition, GraphError};
pub use compilation::{CompileError, CompiledGraph, compile};
