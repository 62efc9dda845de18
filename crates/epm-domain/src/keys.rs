//! Metadata key vocabulary shared by the store document and every record.

/// Reserved identifier holding the metadata sub-record, both as a top-level
/// store entry and as a nested key on each record. Never enumerated as a
/// series id.
pub const META: &str = "epm:meta";

pub const ADDED: &str = "added";
pub const SEEN: &str = "seen";
pub const ARCHIVED: &str = "archived";
pub const LIST_INDEX: &str = "list_index";
pub const NEXT_LIST_INDEX: &str = "next_list_index";
pub const UPDATE_CHECK: &str = "update_check";
pub const UPDATE_HISTORY: &str = "update_history";
pub const RATING: &str = "rating";
pub const RATING_COMMENT: &str = "rating_comment";
pub const VERSION: &str = "version";
pub const CHANGES_LOG: &str = "changes_log";
pub const ADD_COMMENT: &str = "add_comment";

/// Record keys that pre-v1 stores kept at the top level instead of inside
/// the metadata sub-record.
pub const LEGACY: &[&str] = &[ADDED, UPDATE_CHECK, SEEN, ARCHIVED];

/// Season marker used in seen-map keys for season-level entries; such keys
/// are excluded from episode arithmetic.
pub const SENTINEL_SEASON: &str = "S";
