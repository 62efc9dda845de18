//! Read-only access to a record's metadata sub-record.
//!
//! Mutation goes through `epm_core::Database` so the session dirty flag
//! stays correct; these helpers only inspect.

use serde_json::{Map, Value};

use crate::keys;

#[must_use]
pub fn sub_record(record: &Value) -> Option<&Map<String, Value>> {
    record.get(keys::META)?.as_object()
}

#[must_use]
pub fn get<'a>(record: &'a Value, key: &str) -> Option<&'a Value> {
    sub_record(record)?.get(key)
}

#[must_use]
pub fn get_str<'a>(record: &'a Value, key: &str) -> Option<&'a str> {
    get(record, key)?.as_str()
}

#[must_use]
pub fn get_u64(record: &Value, key: &str) -> Option<u64> {
    get(record, key)?.as_u64()
}

/// True when the key is present with a non-null value.
#[must_use]
pub fn has(record: &Value, key: &str) -> bool {
    get(record, key).is_some_and(|value| !value.is_null())
}
