//! Schema declarations for workflow state.
//!
//! A [`StateSchema`] declares the full set of fields a workflow's state may
//! hold, which of them are required, the [`FieldType`] of each, and the
//! [`MergePolicy`] used when concurrent branches write the same field. A
//! schema also distinguishes the *input shape* (fields a graph may read at
//! entry) from the *output shape* (fields it guarantees to produce at
//! exit); the output shape is always a subset of the full internal shape.
//!
//! Schemas are declared once in a [`SchemaRegistry`] and shared immutably
//! by compiled graphs. The barrier merge for a whole execution layer lives
//! here too ([`StateSchema::merge_layer`]): it folds sibling patches in
//! declared branch order through the policy combinators, which is what
//! makes accumulated output deterministic across runs.
//!
//! # Examples
//!
//! ```rust
//! use loomflow::schema::{FieldSpec, StateSchema};
//! use loomflow::types::FieldType;
//!
//! let schema = StateSchema::builder("failure_analysis")
//!     .field(FieldSpec::required("cleaned_logs", FieldType::List))
//!     .field(FieldSpec::optional("failures", FieldType::List))
//!     .field(FieldSpec::optional("fa_summary", FieldType::Text))
//!     .field(FieldSpec::optional("processed_logs", FieldType::List).accumulating())
//!     .input(["cleaned_logs"])
//!     .output(["fa_summary", "processed_logs"])
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(schema.fields().len(), 4);
//! assert_eq!(schema.output_shape(), ["fa_summary", "processed_logs"]);
//! ```

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

use crate::reducers::{ReducerError, ReducerRegistry};
use crate::state::{StateInstance, StatePatch};
use crate::types::{FieldType, MergePolicy, NodeId};

/// Declaration of a single state field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name, unique within its schema.
    pub name: String,
    /// Declared value shape, checked on input and on every patch.
    pub field_type: FieldType,
    /// Required fields must be present wherever the shape demands them
    /// (input shape at run start, output shape at run end).
    pub required: bool,
    /// How concurrent writes to this field merge at a barrier.
    pub policy: MergePolicy,
}

impl FieldSpec {
    /// A required field with the default `Overwrite` policy.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            policy: MergePolicy::Overwrite,
        }
    }

    /// An optional field with the default `Overwrite` policy.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            policy: MergePolicy::Overwrite,
        }
    }

    /// Switch the field to the `Accumulate` policy.
    #[must_use]
    pub fn accumulating(mut self) -> Self {
        self.policy = MergePolicy::Accumulate;
        self
    }

    /// Bind the field to a named custom merge policy.
    #[must_use]
    pub fn with_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// An ordered, immutable set of field declarations plus input/output shapes.
///
/// Field order is declaration order and is load-bearing: merge results and
/// first-violation compile diagnostics scan fields in this order.
#[derive(Clone, Debug)]
pub struct StateSchema {
    name: String,
    fields: Vec<FieldSpec>,
    index: FxHashMap<String, usize>,
    input_keys: Vec<String>,
    output_keys: Vec<String>,
}

impl StateSchema {
    /// Start building a schema with the given shape name.
    pub fn builder(name: impl Into<String>) -> StateSchemaBuilder {
        StateSchemaBuilder {
            name: name.into(),
            fields: Vec::new(),
            input_keys: Vec::new(),
            output_keys: Vec::new(),
        }
    }

    /// The shape name this schema was declared under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All field declarations in declaration order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Look up a field declaration by name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.index.get(name).map(|i| &self.fields[*i])
    }

    /// Returns `true` if `name` is a declared field.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// The merge policy for `field`.
    pub fn merge_policy(&self, field: &str) -> Result<&MergePolicy, SchemaError> {
        self.field(field)
            .map(|spec| &spec.policy)
            .ok_or_else(|| SchemaError::UnknownField {
                shape: self.name.clone(),
                field: field.to_string(),
            })
    }

    /// Fields a graph over this schema may read at entry.
    pub fn input_shape(&self) -> &[String] {
        &self.input_keys
    }

    /// Fields a graph over this schema guarantees to produce at exit.
    pub fn output_shape(&self) -> &[String] {
        &self.output_keys
    }

    /// Fold one execution layer's patches into `state`.
    ///
    /// `patches` must already be in declared branch order; completion order
    /// plays no part here. For each field the layer wrote:
    ///
    /// - `Overwrite` fields admit exactly one writer per layer; a second
    ///   writer is a [`MergeError::ConflictingWrite`].
    /// - `Accumulate` (and custom) fields fold every write through the
    ///   registered combinator, in patch order.
    ///
    /// Patch values are type-checked against the field declarations before
    /// anything is applied, so a failed merge from a malformed patch leaves
    /// `state` untouched. Returns the names of updated fields in schema
    /// declaration order.
    #[instrument(skip_all, fields(shape = %self.name), err)]
    pub fn merge_layer(
        &self,
        state: &mut StateInstance,
        patches: &[(NodeId, StatePatch)],
        reducers: &ReducerRegistry,
    ) -> Result<Vec<String>, MergeError> {
        // Gather writes per field, preserving declared branch order.
        let mut writes: FxHashMap<&str, Vec<(&NodeId, &Value)>> = FxHashMap::default();
        for (node, patch) in patches {
            for (field, value) in patch {
                let spec = self
                    .field(field)
                    .ok_or_else(|| MergeError::UnknownField {
                        node: node.clone(),
                        field: field.clone(),
                    })?;
                if !spec.field_type.admits(value) {
                    return Err(MergeError::TypeMismatch {
                        node: node.clone(),
                        field: field.clone(),
                        expected: spec.field_type,
                    });
                }
                writes.entry(field.as_str()).or_default().push((node, value));
            }
        }

        // Apply per field in schema declaration order for stable results.
        let mut updated = Vec::new();
        for spec in &self.fields {
            let Some(field_writes) = writes.get(spec.name.as_str()) else {
                continue;
            };

            if spec.policy == MergePolicy::Overwrite && field_writes.len() > 1 {
                return Err(MergeError::ConflictingWrite {
                    field: spec.name.clone(),
                    first: field_writes[0].0.clone(),
                    second: field_writes[1].0.clone(),
                });
            }

            let reducer = reducers.resolve(&spec.policy)?;
            let mut current = state.get(&spec.name).cloned();
            for (_, value) in field_writes {
                current = Some(reducer.combine(current.as_ref(), value)?);
            }
            if let Some(value) = current {
                tracing::debug!(field = %spec.name, policy = %spec.policy, "field updated");
                state.set(spec.name.clone(), value);
                updated.push(spec.name.clone());
            }
        }

        Ok(updated)
    }
}

/// Builder for [`StateSchema`].
pub struct StateSchemaBuilder {
    name: String,
    fields: Vec<FieldSpec>,
    input_keys: Vec<String>,
    output_keys: Vec<String>,
}

impl StateSchemaBuilder {
    /// Declare a field. Declaration order is preserved.
    #[must_use]
    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    /// Declare the input shape: the fields a graph may read at entry.
    #[must_use]
    pub fn input<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Declare the output shape: the fields a graph guarantees at exit.
    #[must_use]
    pub fn output<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Validate and freeze the schema.
    ///
    /// Fails on duplicate field declarations and on input/output keys that
    /// name no declared field. An empty output shape defaults to the full
    /// internal shape.
    pub fn build(self) -> Result<StateSchema, SchemaError> {
        let mut index = FxHashMap::default();
        for (i, spec) in self.fields.iter().enumerate() {
            if index.insert(spec.name.clone(), i).is_some() {
                return Err(SchemaError::DuplicateField {
                    shape: self.name,
                    field: spec.name.clone(),
                });
            }
        }

        for key in self.input_keys.iter().chain(self.output_keys.iter()) {
            if !index.contains_key(key) {
                return Err(SchemaError::UnknownField {
                    shape: self.name,
                    field: key.clone(),
                });
            }
        }

        let output_keys = if self.output_keys.is_empty() {
            self.fields.iter().map(|f| f.name.clone()).collect()
        } else {
            self.output_keys
        };

        Ok(StateSchema {
            name: self.name,
            fields: self.fields,
            index,
            input_keys: self.input_keys,
            output_keys,
        })
    }
}

/// Registry of declared state shapes.
///
/// A shape name may be declared once; re-declaration is an error rather
/// than a silent replacement so two workflows can never disagree about what
/// a shape means within one process.
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    shapes: FxHashMap<String, Arc<StateSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `schema` under its shape name.
    pub fn declare(&mut self, schema: StateSchema) -> Result<Arc<StateSchema>, SchemaError> {
        if self.shapes.contains_key(schema.name()) {
            return Err(SchemaError::DuplicateShape {
                shape: schema.name().to_string(),
            });
        }
        let schema = Arc::new(schema);
        self.shapes.insert(schema.name().to_string(), schema.clone());
        Ok(schema)
    }

    /// Look up a declared shape.
    pub fn get(&self, shape: &str) -> Result<Arc<StateSchema>, SchemaError> {
        self.shapes
            .get(shape)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownShape {
                shape: shape.to_string(),
            })
    }

    /// The merge policy for `field` of `shape`.
    pub fn merge_policy(&self, shape: &str, field: &str) -> Result<MergePolicy, SchemaError> {
        Ok(self.get(shape)?.merge_policy(field)?.clone())
    }
}

/// Errors raised while declaring or querying schemas.
#[derive(Debug, Error, Diagnostic)]
pub enum SchemaError {
    /// A shape name was declared twice.
    #[error("state shape already declared: {shape}")]
    #[diagnostic(
        code(loomflow::schema::duplicate_shape),
        help("Each shape name may be declared once per registry.")
    )]
    DuplicateShape { shape: String },

    /// A shape name was never declared.
    #[error("unknown state shape: {shape}")]
    #[diagnostic(code(loomflow::schema::unknown_shape))]
    UnknownShape { shape: String },

    /// Two field declarations share a name within one shape.
    #[error("duplicate field {field:?} in shape {shape}")]
    #[diagnostic(code(loomflow::schema::duplicate_field))]
    DuplicateField { shape: String, field: String },

    /// A field name does not exist in the shape.
    #[error("unknown field {field:?} in shape {shape}")]
    #[diagnostic(
        code(loomflow::schema::unknown_field),
        help("Check the field name against the shape's declarations.")
    )]
    UnknownField { shape: String, field: String },
}

/// Errors raised while folding a layer's patches into state.
#[derive(Debug, Error, Diagnostic)]
pub enum MergeError {
    /// A node patched a field its schema does not declare.
    #[error("node {node} wrote undeclared field {field:?}")]
    #[diagnostic(code(loomflow::schema::merge_unknown_field))]
    UnknownField { node: NodeId, field: String },

    /// A patched value does not conform to the field's declared type.
    #[error("node {node} wrote field {field:?} with a value that is not {expected}")]
    #[diagnostic(code(loomflow::schema::merge_type_mismatch))]
    TypeMismatch {
        node: NodeId,
        field: String,
        expected: FieldType,
    },

    /// Two sibling branches wrote the same overwrite-policy field.
    #[error("conflicting writes to overwrite field {field:?} by {first} and {second}")]
    #[diagnostic(
        code(loomflow::schema::conflicting_write),
        help(
            "Overwrite fields admit one writer per layer; declare the field as accumulating or restructure the branches."
        )
    )]
    ConflictingWrite {
        field: String,
        first: NodeId,
        second: NodeId,
    },

    /// The policy combinator itself failed.
    #[error(transparent)]
    #[diagnostic(code(loomflow::schema::reducer))]
    Reducer(#[from] ReducerError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::collections::new_field_map;
    use serde_json::{Value, json};

    fn items_schema() -> StateSchema {
        StateSchema::builder("test")
            .field(FieldSpec::optional("items", FieldType::List).accumulating())
            .field(FieldSpec::optional("summary", FieldType::Text))
            .build()
            .unwrap()
    }

    fn patch(pairs: &[(&str, Value)]) -> StatePatch {
        let mut map = new_field_map();
        for (k, v) in pairs {
            map.insert((*k).to_string(), v.clone());
        }
        map
    }

    #[test]
    fn duplicate_shape_declaration_fails() {
        let mut registry = SchemaRegistry::new();
        registry.declare(items_schema()).unwrap();
        let err = registry.declare(items_schema()).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateShape { .. }));
    }

    #[test]
    fn merge_policy_lookup() {
        let mut registry = SchemaRegistry::new();
        registry.declare(items_schema()).unwrap();
        assert_eq!(
            registry.merge_policy("test", "items").unwrap(),
            MergePolicy::Accumulate
        );
        assert!(matches!(
            registry.merge_policy("test", "missing"),
            Err(SchemaError::UnknownField { .. })
        ));
        assert!(matches!(
            registry.merge_policy("ghost", "items"),
            Err(SchemaError::UnknownShape { .. })
        ));
    }

    #[test]
    fn accumulate_merges_in_declared_branch_order() {
        let schema = items_schema();
        let reducers = ReducerRegistry::default();
        let mut state = StateInstance::new();

        // Patch order is declaration order; completion order is irrelevant.
        let patches = vec![
            (NodeId::custom("a"), patch(&[("items", json!(["a"]))])),
            (NodeId::custom("b"), patch(&[("items", json!(["b"]))])),
        ];
        let updated = schema
            .merge_layer(&mut state, &patches, &reducers)
            .unwrap();
        assert_eq!(updated, vec!["items".to_string()]);
        assert_eq!(state.get("items"), Some(&json!(["a", "b"])));
    }

    #[test]
    fn conflicting_overwrite_in_one_layer_fails() {
        let schema = items_schema();
        let reducers = ReducerRegistry::default();
        let mut state = StateInstance::new();

        let patches = vec![
            (NodeId::custom("a"), patch(&[("summary", json!("from a"))])),
            (NodeId::custom("b"), patch(&[("summary", json!("from b"))])),
        ];
        let err = schema
            .merge_layer(&mut state, &patches, &reducers)
            .unwrap_err();
        match err {
            MergeError::ConflictingWrite { field, first, second } => {
                assert_eq!(field, "summary");
                assert_eq!(first, NodeId::custom("a"));
                assert_eq!(second, NodeId::custom("b"));
            }
            other => panic!("expected ConflictingWrite, got {other:?}"),
        }
        // Failed merges leave state untouched.
        assert!(state.is_empty());
    }

    #[test]
    fn overwrite_across_layers_is_fine() {
        let schema = items_schema();
        let reducers = ReducerRegistry::default();
        let mut state = StateInstance::new();

        let first = vec![(NodeId::custom("a"), patch(&[("summary", json!("v1"))]))];
        let second = vec![(NodeId::custom("b"), patch(&[("summary", json!("v2"))]))];
        schema.merge_layer(&mut state, &first, &reducers).unwrap();
        schema.merge_layer(&mut state, &second, &reducers).unwrap();
        assert_eq!(state.get("summary"), Some(&json!("v2")));
    }

    #[test]
    fn undeclared_field_in_patch_fails() {
        let schema = items_schema();
        let reducers = ReducerRegistry::default();
        let mut state = StateInstance::new();

        let patches = vec![(NodeId::custom("a"), patch(&[("ghost", json!(1))]))];
        assert!(matches!(
            schema.merge_layer(&mut state, &patches, &reducers),
            Err(MergeError::UnknownField { .. })
        ));
    }

    #[test]
    fn type_mismatch_in_patch_fails() {
        let schema = items_schema();
        let reducers = ReducerRegistry::default();
        let mut state = StateInstance::new();

        let patches = vec![(NodeId::custom("a"), patch(&[("summary", json!(42))]))];
        assert!(matches!(
            schema.merge_layer(&mut state, &patches, &reducers),
            Err(MergeError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn builder_rejects_duplicate_fields_and_unknown_shape_keys() {
        let err = StateSchema::builder("dup")
            .field(FieldSpec::optional("x", FieldType::Any))
            .field(FieldSpec::optional("x", FieldType::Any))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateField { .. }));

        let err = StateSchema::builder("bad_output")
            .field(FieldSpec::optional("x", FieldType::Any))
            .output(["y"])
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownField { .. }));
    }

    #[test]
    fn empty_output_shape_defaults_to_full_shape() {
        let schema = StateSchema::builder("full")
            .field(FieldSpec::optional("a", FieldType::Any))
            .field(FieldSpec::optional("b", FieldType::Any))
            .build()
            .unwrap();
        assert_eq!(schema.output_shape(), ["a", "b"]);
    }
}
