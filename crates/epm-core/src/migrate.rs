//! Version-gated, idempotent migration of old store layouts.
//!
//! Runs once per load. Passes are additive and gated on the stored schema
//! version; a pass that finds nothing to do is silent and does not mark the
//! store dirty, so re-running the pipeline on a migrated store is a no-op.

use serde_json::{json, Map, Value};
use tracing::{info, warn};

use epm_domain::keys;

use crate::db::{Database, Target};

/// Current store schema version.
pub const DB_VERSION: u64 = 4;

/// Archived-flag fallback when no watched episode carries a timestamp.
const MIN_TIMESTAMP: &str = "0000-00-00 00:00:00";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: u64,
    pub legacy_meta: usize,
    pub archived_fixed: usize,
    pub history_seeded: usize,
    pub nulls_removed: usize,
    pub history_dups_removed: usize,
    pub indexes_assigned: usize,
}

impl MigrationReport {
    fn record_fixes(&self) -> usize {
        self.legacy_meta
            + self.archived_fixed
            + self.history_seeded
            + self.nulls_removed
            + self.history_dups_removed
    }
}

/// Upgrades every record in place and advances the stored schema version.
pub fn migrate(db: &mut Database) -> MigrationReport {
    if !db.entries().contains_key(keys::META) {
        // no store metadata at all; the version write below creates it
        db.mark_dirty();
    }

    let version = db
        .meta_get(Target::Root, keys::VERSION)
        .and_then(Value::as_u64)
        .unwrap_or(0);

    let mut report = MigrationReport {
        from_version: version,
        ..MigrationReport::default()
    };

    if version > DB_VERSION {
        warn!(version, "store schema is newer than this build; leaving it untouched");
        return report;
    }

    let ids: Vec<String> = db.ids().iter().map(ToString::to_string).collect();
    for id in &ids {
        if let Some(record) = db.record_mut_untracked(id) {
            migrate_record(record, version, &mut report);
        }
    }

    if version < 2 {
        assign_list_indexes(db, &ids, &mut report);
    }

    if version != DB_VERSION {
        info!(from = version, to = DB_VERSION, "set store schema version");
        db.meta_set(Target::Root, keys::VERSION, json!(DB_VERSION));
    }

    if report.record_fixes() > 0 {
        db.mark_dirty();
    }
    report_counts(&report);

    report
}

fn migrate_record(record: &mut Value, version: u64, report: &mut MigrationReport) {
    let Some(body) = record.as_object_mut() else {
        return;
    };

    if version < 1 {
        move_legacy_meta(body, report);
        normalize_archived_flag(body, report);
    }

    if version < 3 {
        rename_update_check(body, report);
        body.remove("id");
    }

    if version < 4 {
        report.nulls_removed += strip_nulls(record);
    }

    // every load: chronological update history with exact duplicates removed
    if let Some(history) = history_mut(record) {
        history.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
        let before = history.len();
        history.dedup();
        report.history_dups_removed += before - history.len();
    }
}

/// Pre-v1 stores kept bookkeeping keys on the record body; fold them into
/// a fresh metadata sub-record.
fn move_legacy_meta(body: &mut Map<String, Value>, report: &mut MigrationReport) {
    if body.contains_key(keys::META) {
        return;
    }
    let mut meta = Map::new();
    for key in keys::LEGACY {
        if let Some(value) = body.remove(*key) {
            meta.insert((*key).to_string(), value);
        }
    }
    body.insert(keys::META.to_string(), Value::Object(meta));
    report.legacy_meta += 1;
}

/// A boolean `archived` flag becomes the latest watched-episode timestamp,
/// or a sentinel minimum when nothing was watched.
fn normalize_archived_flag(body: &mut Map<String, Value>, report: &mut MigrationReport) {
    let Some(meta) = body.get_mut(keys::META).and_then(Value::as_object_mut) else {
        return;
    };
    if meta.get(keys::ARCHIVED) != Some(&Value::Bool(true)) {
        return;
    }

    let last_seen = meta
        .get(keys::SEEN)
        .and_then(Value::as_object)
        .and_then(|seen| seen.values().filter_map(Value::as_str).max())
        .unwrap_or(MIN_TIMESTAMP)
        .to_string();
    meta.insert(keys::ARCHIVED.to_string(), Value::String(last_seen));
    report.archived_fixed += 1;
}

/// The legacy `updated` key becomes `update_check`; a missing update
/// history is seeded with that single value.
fn rename_update_check(body: &mut Map<String, Value>, report: &mut MigrationReport) {
    let Some(meta) = body.get_mut(keys::META).and_then(Value::as_object_mut) else {
        return;
    };
    let Some(last_update) = meta.remove("updated") else {
        return;
    };

    let history_missing = meta
        .get(keys::UPDATE_HISTORY)
        .and_then(Value::as_array)
        .is_none_or(Vec::is_empty);
    if history_missing && !last_update.is_null() {
        meta.insert(
            keys::UPDATE_HISTORY.to_string(),
            Value::Array(vec![last_update.clone()]),
        );
        report.history_seeded += 1;
    }
    meta.insert(keys::UPDATE_CHECK.to_string(), last_update);
}

fn history_mut(record: &mut Value) -> Option<&mut Vec<Value>> {
    record
        .get_mut(keys::META)?
        .get_mut(keys::UPDATE_HISTORY)?
        .as_array_mut()
}

/// Recursively removes explicit nulls anywhere in a value tree, returning
/// the number of keys dropped.
fn strip_nulls(value: &mut Value) -> usize {
    match value {
        Value::Array(items) => items.iter_mut().map(strip_nulls).sum(),
        Value::Object(map) => {
            let before = map.len();
            map.retain(|_, item| !item.is_null());
            let mut removed = before - map.len();
            removed += map.values_mut().map(strip_nulls).sum::<usize>();
            removed
        }
        _ => 0,
    }
}

/// Ordinal list indexes are assigned once, in ascending added-time order,
/// numbered from 1; the next free index is kept on the store metadata.
fn assign_list_indexes(db: &mut Database, ids: &[String], report: &mut MigrationReport) {
    let mut ordered: Vec<(String, String)> = ids
        .iter()
        .map(|id| {
            let added = db
                .meta_get(Target::Series(id), keys::ADDED)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            (added, id.clone())
        })
        .collect();
    ordered.sort();

    let mut next_index: u64 = 1;
    for (_, id) in &ordered {
        db.meta_set(Target::Series(id), keys::LIST_INDEX, json!(next_index));
        next_index += 1;
        report.indexes_assigned += 1;
    }
    db.meta_set(Target::Root, keys::NEXT_LIST_INDEX, json!(next_index));
    info!(series = report.indexes_assigned, next_index, "built list indexes");
}

fn report_counts(report: &MigrationReport) {
    if report.legacy_meta > 0 {
        info!(series = report.legacy_meta, "migrated legacy metadata");
    }
    if report.archived_fixed > 0 {
        info!(series = report.archived_fixed, "normalized archived flags");
    }
    if report.history_seeded > 0 {
        info!(series = report.history_seeded, "seeded empty update histories");
    }
    if report.nulls_removed > 0 {
        info!(values = report.nulls_removed, "removed null values");
    }
    if report.history_dups_removed > 0 {
        info!(
            entries = report.history_dups_removed,
            "removed duplicate update history entries"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v0_database() -> Database {
        let mut db = Database::default();
        // legacy layout: bookkeeping on the record body, boolean archived
        db.insert_series(
            "100".to_string(),
            json!({
                "title": "Older",
                "id": "100",
                "added": "2020-01-01 10:00:00",
                "seen": { "1:1": "2020-02-01 20:00:00", "1:2": "2020-02-02 20:00:00" },
                "archived": true,
                "country": null,
            }),
        );
        db.insert_series(
            "200".to_string(),
            json!({
                "title": "Newer",
                keys::META: {
                    "added": "2021-01-01 10:00:00",
                    "updated": "2021-03-01 10:00:00",
                },
            }),
        );
        db.clear_dirty();
        db
    }

    #[test]
    fn v0_store_is_upgraded_end_to_end() {
        let mut db = v0_database();
        let report = migrate(&mut db);

        assert!(db.is_dirty());
        assert_eq!(report.from_version, 0);
        assert_eq!(report.legacy_meta, 1);
        assert_eq!(report.archived_fixed, 1);
        assert_eq!(report.history_seeded, 1);
        assert!(report.nulls_removed >= 1);

        // archived became the latest watched timestamp
        assert_eq!(
            db.meta_get(Target::Series("100"), keys::ARCHIVED),
            Some(&json!("2020-02-02 20:00:00"))
        );
        // the legacy "updated" key became update_check and seeded history
        assert_eq!(
            db.meta_get(Target::Series("200"), keys::UPDATE_CHECK),
            Some(&json!("2021-03-01 10:00:00"))
        );
        assert_eq!(
            db.meta_get(Target::Series("200"), keys::UPDATE_HISTORY),
            Some(&json!(["2021-03-01 10:00:00"]))
        );
        // list indexes follow added order
        assert_eq!(
            db.meta_get(Target::Series("100"), keys::LIST_INDEX),
            Some(&json!(1))
        );
        assert_eq!(
            db.meta_get(Target::Series("200"), keys::LIST_INDEX),
            Some(&json!(2))
        );
        assert_eq!(
            db.meta_get(Target::Root, keys::NEXT_LIST_INDEX),
            Some(&json!(3))
        );
        assert_eq!(
            db.meta_get(Target::Root, keys::VERSION),
            Some(&json!(DB_VERSION))
        );
        // the redundant id field and the null country are gone
        assert!(db.series("100").unwrap().get("id").is_none());
        assert!(db.series("100").unwrap().get("country").is_none());
    }

    #[test]
    fn migration_is_idempotent() {
        let mut db = v0_database();
        migrate(&mut db);
        db.clear_dirty();

        let report = migrate(&mut db);
        assert!(!db.is_dirty());
        assert_eq!(report.record_fixes(), 0);
        assert_eq!(report.indexes_assigned, 0);
    }

    #[test]
    fn update_history_is_sorted_and_deduplicated_every_run() {
        let mut db = Database::default();
        db.insert_series(
            "100".to_string(),
            json!({
                "title": "Example",
                keys::META: {
                    keys::UPDATE_HISTORY: [
                        "2024-02-01 10:00:00",
                        "2024-01-01 10:00:00",
                        "2024-01-01 10:00:00",
                    ],
                },
            }),
        );
        db.meta_set(Target::Root, keys::VERSION, json!(DB_VERSION));
        db.clear_dirty();

        let report = migrate(&mut db);
        assert_eq!(report.history_dups_removed, 1);
        assert!(db.is_dirty());
        assert_eq!(
            db.meta_get(Target::Series("100"), keys::UPDATE_HISTORY),
            Some(&json!(["2024-01-01 10:00:00", "2024-02-01 10:00:00"]))
        );
    }

    #[test]
    fn newer_schema_versions_are_left_untouched() {
        let mut db = Database::default();
        db.meta_set(Target::Root, keys::VERSION, json!(DB_VERSION + 1));
        db.clear_dirty();

        let report = migrate(&mut db);
        assert!(!db.is_dirty());
        assert_eq!(report.from_version, DB_VERSION + 1);
        assert_eq!(
            db.meta_get(Target::Root, keys::VERSION),
            Some(&json!(DB_VERSION + 1))
        );
    }
}
