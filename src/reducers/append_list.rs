use super::{Reducer, ReducerError};
use crate::types::MergePolicy;
use serde_json::Value;

/// Default combinator for `Accumulate` fields: list concatenation.
///
/// The existing list comes first, the incoming list is appended, so folding
/// patches in declared branch order keeps accumulated elements in that
/// order.
#[derive(Debug, PartialEq, Clone, Hash, Eq)]
pub struct AppendList;

impl Reducer for AppendList {
    fn combine(&self, existing: Option<&Value>, incoming: &Value) -> Result<Value, ReducerError> {
        let incoming_items = incoming
            .as_array()
            .ok_or_else(|| ReducerError::Combine {
                policy: MergePolicy::Accumulate,
                message: format!("incoming value is not a list: {incoming}"),
            })?
            .clone();

        match existing {
            None => Ok(Value::Array(incoming_items)),
            Some(Value::Array(items)) => {
                let mut combined = items.clone();
                combined.extend(incoming_items);
                Ok(Value::Array(combined))
            }
            Some(other) => Err(ReducerError::Combine {
                policy: MergePolicy::Accumulate,
                message: format!("existing value is not a list: {other}"),
            }),
        }
    }
}
