use super::{Reducer, ReducerError};
use serde_json::Value;

/// Combinator for `Overwrite` fields: the incoming write replaces the
/// existing value. Concurrent same-layer writes never reach this reducer;
/// the schema merge rejects them as `ConflictingWrite` first.
#[derive(Debug, PartialEq, Clone, Hash, Eq)]
pub struct OverwriteValue;

impl Reducer for OverwriteValue {
    fn combine(&self, _existing: Option<&Value>, incoming: &Value) -> Result<Value, ReducerError> {
        Ok(incoming.clone())
    }
}
