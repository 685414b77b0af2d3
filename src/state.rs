//! State containers for workflow execution.
//!
//! State in loomflow is schema-driven: a [`StateInstance`] maps declared
//! field names to JSON values and conforms to exactly one
//! [`StateSchema`](crate::schema::StateSchema) at a time. Nodes never touch
//! the shared instance directly; they receive a read-only [`StateView`]
//! projected down to their declared read set and return a [`StatePatch`]
//! that the executor folds back in at the next barrier.
//!
//! # Examples
//!
//! ```rust
//! use loomflow::state::StateInstance;
//! use serde_json::json;
//!
//! let state = StateInstance::builder()
//!     .with_field("raw_logs", json!([{"id": "log-1", "question": "?"}]))
//!     .with_field("attempt", json!(1))
//!     .build();
//!
//! assert_eq!(state.get("attempt"), Some(&json!(1)));
//! assert!(state.get("missing").is_none());
//! ```

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::utils::collections::{field_map_with_capacity, new_field_map};

/// A mapping from declared field names to values, owned by a single run.
///
/// Partially populated while a run is in flight; the executor guarantees the
/// declared output shape is fully populated before a run reports success.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateInstance {
    fields: FxHashMap<String, Value>,
}

/// A partial state update returned by a node.
///
/// Patches carry only the fields the node wrote; the executor validates
/// them against the node's declared write set and merges them through the
/// schema's per-field policies.
pub type StatePatch = FxHashMap<String, Value>;

/// Read-only projection of a [`StateInstance`] handed to a node.
///
/// Contains clones of exactly the fields in the node's declared read set,
/// taken at the start of the node's layer. Sibling patches from the same
/// layer are never visible here.
#[derive(Clone, Debug, Default)]
pub struct StateView {
    fields: FxHashMap<String, Value>,
}

impl StateInstance {
    /// Creates an empty instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fields: new_field_map(),
        }
    }

    /// Creates a builder for fluent construction of an initial state.
    pub fn builder() -> StateInstanceBuilder {
        StateInstanceBuilder::default()
    }

    /// Builds an instance from an existing field map.
    pub fn from_fields(fields: FxHashMap<String, Value>) -> Self {
        Self { fields }
    }

    /// Returns the value of `field`, if present.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Returns `true` if `field` is populated.
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Sets `field` to `value`, replacing any previous value.
    pub fn set(&mut self, field: impl Into<String>, value: Value) -> &mut Self {
        self.fields.insert(field.into(), value);
        self
    }

    /// Number of populated fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if no field is populated.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over populated `(field, value)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Clone the fields named in `keys` into a read-only [`StateView`].
    ///
    /// Missing fields are simply absent from the view; presence checks are
    /// the compiler's and executor's job, not the projection's.
    pub fn project(&self, keys: &[String]) -> StateView {
        let mut fields = field_map_with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.fields.get(key) {
                fields.insert(key.clone(), value.clone());
            }
        }
        StateView { fields }
    }

    /// Narrow this instance to the given keys, dropping everything else.
    ///
    /// Used to project a finished run onto a graph's declared output shape.
    #[must_use]
    pub fn narrow_to(&self, keys: &[String]) -> StateInstance {
        let mut fields = field_map_with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.fields.get(key) {
                fields.insert(key.clone(), value.clone());
            }
        }
        StateInstance { fields }
    }

    /// Consume the instance, yielding the underlying field map.
    pub fn into_fields(self) -> FxHashMap<String, Value> {
        self.fields
    }
}

impl StateView {
    /// Returns the value of `field`, if it was in the read set and populated.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Returns `true` if `field` is present in the view.
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Number of fields in the view.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the view carries no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Convenience accessor: the field as a string slice, if it is one.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// Convenience accessor: the field as a JSON array, if it is one.
    pub fn get_array(&self, field: &str) -> Option<&Vec<Value>> {
        self.fields.get(field).and_then(Value::as_array)
    }

    #[cfg(test)]
    pub fn from_fields(fields: FxHashMap<String, Value>) -> Self {
        Self { fields }
    }
}

/// Fluent builder for initial [`StateInstance`]s.
///
/// # Examples
///
/// ```rust
/// use loomflow::state::StateInstance;
/// use serde_json::json;
///
/// let state = StateInstance::builder()
///     .with_field("raw_logs", json!([]))
///     .build();
/// assert!(state.contains("raw_logs"));
/// ```
#[derive(Debug, Default)]
pub struct StateInstanceBuilder {
    fields: FxHashMap<String, Value>,
}

impl StateInstanceBuilder {
    /// Populate `field` with `value`.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, value: Value) -> Self {
        self.fields.insert(field.into(), value);
        self
    }

    /// Build the final instance.
    pub fn build(self) -> StateInstance {
        StateInstance {
            fields: self.fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_populates_fields() {
        let state = StateInstance::builder()
            .with_field("a", json!(1))
            .with_field("b", json!("two"))
            .build();
        assert_eq!(state.len(), 2);
        assert_eq!(state.get("a"), Some(&json!(1)));
    }

    #[test]
    fn project_clones_only_requested_keys() {
        let mut state = StateInstance::new();
        state.set("keep", json!("yes"));
        state.set("drop", json!("no"));

        let view = state.project(&["keep".to_string(), "absent".to_string()]);
        assert_eq!(view.get_str("keep"), Some("yes"));
        assert!(!view.contains("drop"));
        assert!(!view.contains("absent"));
    }

    #[test]
    fn projection_is_independent_of_source() {
        let mut state = StateInstance::new();
        state.set("k", json!("before"));
        let view = state.project(&["k".to_string()]);
        state.set("k", json!("after"));
        assert_eq!(view.get_str("k"), Some("before"));
    }

    #[test]
    fn narrow_to_drops_internal_fields() {
        let mut state = StateInstance::new();
        state.set("internal", json!(0));
        state.set("out", json!(1));
        let narrowed = state.narrow_to(&["out".to_string()]);
        assert!(!narrowed.contains("internal"));
        assert_eq!(narrowed.get("out"), Some(&json!(1)));
    }
}
