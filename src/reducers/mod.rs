mod append_list;
mod merge_record;
mod overwrite_value;
mod registry;

pub use append_list::AppendList;
pub use merge_record::MergeRecord;
pub use overwrite_value::OverwriteValue;
pub use registry::ReducerRegistry;

use crate::types::MergePolicy;
use serde_json::Value;
use std::fmt;

/// Unified reducer trait: every reducer combines an existing field value
/// with one incoming write, producing the new field value.
///
/// Combinators used for `Accumulate` fields must be associative and must
/// preserve the order of their inputs, so folding a layer's patches in
/// declared branch order yields one canonical result.
pub trait Reducer: Send + Sync + fmt::Debug {
    fn combine(&self, existing: Option<&Value>, incoming: &Value) -> Result<Value, ReducerError>;
}

#[derive(Debug)]
pub enum ReducerError {
    UnknownPolicy(MergePolicy),

    Combine {
        policy: MergePolicy,
        message: String,
    },
}

impl fmt::Display for ReducerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReducerError::UnknownPolicy(policy) => {
                write!(f, "no reducer registered for policy: {policy}")
            }
            ReducerError::Combine { policy, message } => {
                write!(f, "reducer combine failed for policy {policy}: {message}")
            }
        }
    }
}

impl std::error::Error for ReducerError {}
