use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::{
    reducers::{AppendList, MergeRecord, OverwriteValue, Reducer, ReducerError},
    types::MergePolicy,
};

/// Maps merge policies to the combinators that implement them.
///
/// The default registry covers the built-in policies (`Overwrite`,
/// `Accumulate`) plus the `merge_record` custom policy. Additional named
/// combinators can be registered for `MergePolicy::Custom` fields, which is
/// how accumulation generalizes beyond list concatenation to any
/// associative operation.
#[derive(Clone)]
pub struct ReducerRegistry {
    reducer_map: FxHashMap<MergePolicy, Arc<dyn Reducer>>,
}

impl Default for ReducerRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry
            .register(MergePolicy::Overwrite, Arc::new(OverwriteValue))
            .register(MergePolicy::Accumulate, Arc::new(AppendList))
            .register(
                MergePolicy::Custom(MergeRecord::POLICY.into()),
                Arc::new(MergeRecord),
            );
        registry
    }
}

impl ReducerRegistry {
    /// Creates an empty registry with no policies bound.
    pub fn new() -> Self {
        Self {
            reducer_map: FxHashMap::default(),
        }
    }

    /// Bind `policy` to `reducer`, replacing any previous binding.
    ///
    /// Returns `&mut Self` for chaining.
    pub fn register(&mut self, policy: MergePolicy, reducer: Arc<dyn Reducer>) -> &mut Self {
        self.reducer_map.insert(policy, reducer);
        self
    }

    /// Builder-style registration for fluent construction.
    ///
    /// # Examples
    /// ```
    /// use std::sync::Arc;
    /// use loomflow::reducers::{AppendList, ReducerRegistry};
    /// use loomflow::types::MergePolicy;
    ///
    /// let registry = ReducerRegistry::new()
    ///     .with_reducer(MergePolicy::Accumulate, Arc::new(AppendList));
    /// ```
    #[must_use]
    pub fn with_reducer(mut self, policy: MergePolicy, reducer: Arc<dyn Reducer>) -> Self {
        self.register(policy, reducer);
        self
    }

    /// Look up the combinator for `policy`.
    pub fn resolve(&self, policy: &MergePolicy) -> Result<&Arc<dyn Reducer>, ReducerError> {
        self.reducer_map
            .get(policy)
            .ok_or_else(|| ReducerError::UnknownPolicy(policy.clone()))
    }
}
