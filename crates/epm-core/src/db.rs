//! In-memory store document plus the session-wide dirty flag.
//!
//! All mutation funnels through this type so the dirty flag stays correct:
//! any change marks the session dirty, and only a successful save clears it.

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use epm_domain::{keys, query};

/// Addresses a metadata sub-record: the store root or one series.
#[derive(Clone, Copy, Debug)]
pub enum Target<'a> {
    Root,
    Series(&'a str),
}

#[derive(Debug, Default)]
pub struct Database {
    entries: Map<String, Value>,
    dirty: bool,
}

impl Database {
    pub(crate) fn from_entries(entries: Map<String, Value>) -> Self {
        Self {
            entries,
            dirty: false,
        }
    }

    /// The raw document, reserved metadata entry included.
    #[must_use]
    pub fn entries(&self) -> &Map<String, Value> {
        &self.entries
    }

    /// Number of tracked series, excluding the reserved metadata entry.
    #[must_use]
    pub fn len(&self) -> usize {
        let reserved = usize::from(self.entries.contains_key(keys::META));
        self.entries.len() - reserved
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        query::all_ids(&self.entries)
    }

    #[must_use]
    pub fn series(&self, id: &str) -> Option<&Value> {
        if id == keys::META {
            return None;
        }
        self.entries.get(id)
    }

    /// Mutable access to a record's domain fields. Conservatively marks the
    /// session dirty.
    pub fn series_mut(&mut self, id: &str) -> Option<&mut Value> {
        if id == keys::META {
            return None;
        }
        let record = self.entries.get_mut(id)?;
        self.dirty = true;
        Some(record)
    }

    /// Record access for the migration pipeline, which tracks dirtiness by
    /// what it actually changed.
    pub(crate) fn record_mut_untracked(&mut self, id: &str) -> Option<&mut Value> {
        if id == keys::META {
            return None;
        }
        self.entries.get_mut(id)
    }

    /// Inserts or replaces a record and marks the session dirty.
    pub fn insert_series(&mut self, id: String, record: Value) {
        if id == keys::META {
            warn!("refusing to insert a series under the reserved id");
            return;
        }
        self.dirty = true;
        self.entries.insert(id, record);
    }

    /// Removes a record; marks dirty only when it existed.
    pub fn remove_series(&mut self, id: &str) -> Option<Value> {
        if id == keys::META {
            return None;
        }
        let removed = self.entries.remove(id);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    fn meta_map(&self, target: Target<'_>) -> Option<&Map<String, Value>> {
        match target {
            Target::Root => self.entries.get(keys::META)?.as_object(),
            Target::Series(id) => epm_domain::meta::sub_record(self.entries.get(id)?),
        }
    }

    /// Metadata map for writing, created lazily. `None` only when a series
    /// target does not exist.
    fn meta_map_mut(&mut self, target: Target<'_>) -> Option<&mut Map<String, Value>> {
        let holder = match target {
            Target::Root => Some(&mut self.entries),
            Target::Series(id) => self
                .entries
                .get_mut(id)
                .and_then(Value::as_object_mut),
        }?;
        let slot = holder
            .entry(keys::META.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        slot.as_object_mut()
    }

    #[must_use]
    pub fn meta_get(&self, target: Target<'_>, key: &str) -> Option<&Value> {
        self.meta_map(target)?.get(key)
    }

    /// True when the key is present with a non-null value.
    #[must_use]
    pub fn meta_has(&self, target: Target<'_>, key: &str) -> bool {
        self.meta_get(target, key)
            .is_some_and(|value| !value.is_null())
    }

    /// Sets a metadata key and marks the session dirty, creating the
    /// sub-record when absent.
    pub fn meta_set(&mut self, target: Target<'_>, key: &str, value: Value) {
        self.dirty = true;
        match self.meta_map_mut(target) {
            Some(meta) => {
                meta.insert(key.to_string(), value);
            }
            None => warn!(?target, key, "metadata write to a missing record"),
        }
    }

    /// Deletes a metadata key; marks dirty only if the key existed.
    pub fn meta_delete(&mut self, target: Target<'_>, key: &str) {
        let existed = self
            .meta_map_mut(target)
            .and_then(|meta| meta.remove(key))
            .is_some();
        if existed {
            self.dirty = true;
        }
    }

    /// Wholesale-replaces the destination's metadata sub-record with the
    /// source's and marks the session dirty.
    pub fn meta_copy(&mut self, source_id: &str, destination_id: &str) {
        let copied = self
            .meta_map(Target::Series(source_id))
            .cloned()
            .unwrap_or_default();
        self.dirty = true;
        match self.meta_map_mut(Target::Series(destination_id)) {
            Some(meta) => *meta = copied,
            None => warn!(destination_id, "metadata copy to a missing record"),
        }
    }

    /// Appends `(message, subject)` to the ordered change log.
    pub fn append_change_log(&mut self, target: Target<'_>, message: &str, subject: Option<&str>) {
        let entry = json!([message, subject]);
        let Some(meta) = self.meta_map_mut(target) else {
            warn!(?target, "change log append to a missing record");
            return;
        };
        let log = meta
            .entry(keys::CHANGES_LOG.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Some(items) = log.as_array_mut() {
            items.push(entry);
        }
        self.dirty = true;
        debug!(message, ?subject, "logged change");
    }

    /// Removes the change log without forcing dirtiness either way, so a
    /// peek-and-clear flow does not cause a spurious save.
    pub fn clear_change_log(&mut self, target: Target<'_>) {
        let was_dirty = self.dirty;
        self.meta_delete(target, keys::CHANGES_LOG);
        self.dirty = was_dirty;
    }

    /// The ordered change log as `(message, subject)` pairs.
    #[must_use]
    pub fn change_log(&self, target: Target<'_>) -> Vec<(String, Option<String>)> {
        self.meta_get(target, keys::CHANGES_LOG)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|entry| {
                        let pair = entry.as_array()?;
                        let message = pair.first()?.as_str()?.to_string();
                        let subject = pair.get(1).and_then(Value::as_str).map(ToOwned::to_owned);
                        Some((message, subject))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database_with_series(id: &str) -> Database {
        let mut db = Database::default();
        db.insert_series(id.to_string(), json!({ "title": "Example" }));
        db.clear_dirty();
        db
    }

    #[test]
    fn meta_set_creates_the_sub_record_and_marks_dirty() {
        let mut db = database_with_series("42");
        assert!(!db.is_dirty());

        db.meta_set(Target::Series("42"), keys::RATING, json!(8));
        assert!(db.is_dirty());
        assert_eq!(
            db.meta_get(Target::Series("42"), keys::RATING),
            Some(&json!(8))
        );
    }

    #[test]
    fn meta_delete_marks_dirty_only_when_the_key_existed() {
        let mut db = database_with_series("42");
        db.meta_delete(Target::Series("42"), keys::RATING);
        assert!(!db.is_dirty());

        db.meta_set(Target::Series("42"), keys::RATING, json!(8));
        db.clear_dirty();
        db.meta_delete(Target::Series("42"), keys::RATING);
        assert!(db.is_dirty());
    }

    #[test]
    fn meta_copy_replaces_the_destination_wholesale() {
        let mut db = database_with_series("42");
        db.insert_series("43".to_string(), json!({ "title": "Other" }));
        db.meta_set(Target::Series("42"), keys::RATING, json!(8));
        db.meta_set(Target::Series("43"), keys::ADD_COMMENT, json!("old"));
        db.clear_dirty();

        db.meta_copy("42", "43");
        assert!(db.is_dirty());
        assert_eq!(
            db.meta_get(Target::Series("43"), keys::RATING),
            Some(&json!(8))
        );
        assert!(db.meta_get(Target::Series("43"), keys::ADD_COMMENT).is_none());
    }

    #[test]
    fn clear_change_log_restores_prior_dirtiness() {
        let mut db = database_with_series("42");
        db.append_change_log(Target::Root, "added", Some("42"));
        db.clear_dirty();

        db.clear_change_log(Target::Root);
        assert!(!db.is_dirty());
        assert!(db.change_log(Target::Root).is_empty());

        db.append_change_log(Target::Root, "added", Some("42"));
        assert!(db.is_dirty());
        db.clear_change_log(Target::Root);
        assert!(db.is_dirty());
    }

    #[test]
    fn reserved_id_is_not_a_series() {
        let mut db = database_with_series("42");
        db.meta_set(Target::Root, keys::VERSION, json!(4));
        assert!(db.series(keys::META).is_none());
        assert_eq!(db.len(), 1);
        assert_eq!(db.ids(), vec!["42"]);
    }
}
