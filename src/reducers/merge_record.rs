use super::{Reducer, ReducerError};
use crate::types::MergePolicy;
use serde_json::Value;

/// Shallow record merge: incoming keys are inserted over existing keys.
///
/// Registered under the custom policy name `"merge_record"` by the default
/// [`ReducerRegistry`](super::ReducerRegistry); useful for accumulating
/// keyed metadata maps across branches where per-key overwrite is intended.
#[derive(Debug, PartialEq, Clone, Hash, Eq)]
pub struct MergeRecord;

impl MergeRecord {
    /// Policy name under which the default registry binds this reducer.
    pub const POLICY: &'static str = "merge_record";
}

impl Reducer for MergeRecord {
    fn combine(&self, existing: Option<&Value>, incoming: &Value) -> Result<Value, ReducerError> {
        let incoming_map = incoming
            .as_object()
            .ok_or_else(|| ReducerError::Combine {
                policy: MergePolicy::Custom(Self::POLICY.into()),
                message: format!("incoming value is not a record: {incoming}"),
            })?;

        match existing {
            None => Ok(Value::Object(incoming_map.clone())),
            Some(Value::Object(current)) => {
                let mut combined = current.clone();
                for (k, v) in incoming_map {
                    combined.insert(k.clone(), v.clone());
                }
                Ok(Value::Object(combined))
            }
            Some(other) => Err(ReducerError::Combine {
                policy: MergePolicy::Custom(Self::POLICY.into()),
                message: format!("existing value is not a record: {other}"),
            }),
        }
    }
}
