use rustc_hash::FxHashMap;
use serde_json::Value;

/// Construct an empty field map with the hasher used throughout the crate.
pub fn new_field_map() -> FxHashMap<String, Value> {
    FxHashMap::default()
}

/// Construct a field map pre-sized for `capacity` entries.
pub fn field_map_with_capacity(capacity: usize) -> FxHashMap<String, Value> {
    FxHashMap::with_capacity_and_hasher(capacity, Default::default())
}
