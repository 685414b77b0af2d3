//! Core domain types for the loomflow workflow engine.
//!
//! This module defines the fundamental concepts a workflow is made of:
//!
//! - [`NodeId`]: identifies a vertex of the workflow graph. The `Start` and
//!   `End` variants are virtual sentinels that frame a graph's topology;
//!   they are never registered as executable nodes.
//! - [`MergePolicy`]: how concurrently-produced writes to one state field
//!   are combined at a barrier.
//! - [`FieldType`]: the declared value shape of a state field, checked when
//!   initial state and patches enter the engine.
//!
//! # Examples
//!
//! ```rust
//! use loomflow::types::NodeId;
//!
//! let entry = NodeId::Start;
//! let clean = NodeId::custom("clean_logs");
//! let exit = NodeId::End;
//!
//! assert!(entry.is_start());
//! assert!(clean.is_custom());
//! assert_eq!(clean.to_string(), "clean_logs");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a vertex within a workflow graph.
///
/// `Start` and `End` are virtual: they carry no node implementation and are
/// used only to anchor entry and exit edges. Every executable node is a
/// `Custom` id, unique within its graph.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeId {
    /// Virtual entry sentinel. Always exists; never executed.
    Start,
    /// Virtual exit sentinel. Always exists; never executed.
    End,
    /// User-defined node identifier, unique within the graph.
    Custom(String),
}

impl NodeId {
    /// Convenience constructor for custom node ids.
    pub fn custom(name: impl Into<String>) -> Self {
        NodeId::Custom(name.into())
    }

    /// Returns `true` if this is the [`Start`](Self::Start) sentinel.
    #[must_use]
    pub fn is_start(&self) -> bool {
        matches!(self, Self::Start)
    }

    /// Returns `true` if this is the [`End`](Self::End) sentinel.
    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }

    /// Returns `true` if this is an executable custom node.
    #[must_use]
    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }

    /// The custom name, if any. Sentinels return `None`.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            NodeId::Custom(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::End => write!(f, "End"),
            Self::Custom(name) => write!(f, "{name}"),
        }
    }
}

// Developer experience: allow string literals where a NodeId is expected.
impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        match s {
            "Start" => NodeId::Start,
            "End" => NodeId::End,
            other => NodeId::Custom(other.to_string()),
        }
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId::from(s.as_str())
    }
}

/// How concurrent writes to a single state field are combined at a barrier.
///
/// Every declared field carries exactly one policy. `Overwrite` fields admit
/// at most one writer per layer; two sibling writes in the same layer are a
/// design error surfaced as `ConflictingWrite`. `Accumulate` fields combine
/// through an associative reducer in the branches' declaration order, so
/// results are identical across runs regardless of completion timing.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MergePolicy {
    /// Last writer wins across layers; concurrent same-layer writes fail.
    Overwrite,
    /// Combine via the registered associative combinator (list concat by
    /// default), folding in declared branch order.
    Accumulate,
    /// A user-registered named combinator.
    Custom(String),
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overwrite => write!(f, "overwrite"),
            Self::Accumulate => write!(f, "accumulate"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// Declared value shape for a state field.
///
/// Checked once when a run's initial state enters the executor and again on
/// each applied patch, replacing the ad-hoc key-presence checks loosely
/// typed state dictionaries would otherwise need inside every node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// A JSON string.
    Text,
    /// A JSON integer.
    Integer,
    /// A JSON boolean.
    Boolean,
    /// A JSON array.
    List,
    /// A JSON object.
    Record,
    /// Any JSON value.
    Any,
}

impl FieldType {
    /// Returns `true` if `value` conforms to this type.
    #[must_use]
    pub fn admits(&self, value: &serde_json::Value) -> bool {
        match self {
            FieldType::Text => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::List => value.is_array(),
            FieldType::Record => value.is_object(),
            FieldType::Any => true,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Integer => write!(f, "integer"),
            Self::Boolean => write!(f, "boolean"),
            Self::List => write!(f, "list"),
            Self::Record => write!(f, "record"),
            Self::Any => write!(f, "any"),
        }
    }
}
