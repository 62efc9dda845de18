//! Decides when a record is due for a refresh from the catalog.

use serde_json::Value;
use time::{Duration, PrimitiveDateTime};

use crate::state::{self, SeriesState};
use crate::{dates, keys, meta};

/// Cap on the mean historical update interval.
const MEAN_INTERVAL_CAP: Duration = Duration::weeks(2);
/// Cap when only a single historical update exists; a first miss should be
/// cheap to correct.
const SINGLE_INTERVAL_CAP: Duration = Duration::days(2);

/// Whether `series` should be refreshed from the catalog at `now`.
///
/// Never-checked records are always due. Shelved, completed and
/// ended/canceled records never are. Otherwise the expected re-poll
/// interval is the mean gap between historical updates (capped at two
/// weeks), or the time since the single known update (capped at two days).
#[must_use]
pub fn should_update_at(series: &Value, now: PrimitiveDateTime) -> bool {
    let Some(checked) = meta::get_str(series, keys::UPDATE_CHECK) else {
        return true;
    };

    let current = state::series_state(series);
    if current.is_archived_like() || current == SeriesState::Completed {
        return false;
    }
    // an "ended" status implies the episode list is already complete
    if state::ended_status(series) {
        return false;
    }

    let Some(last_check) = dates::parse_timestamp(checked) else {
        return true;
    };

    let history: Vec<PrimitiveDateTime> = meta::get(series, keys::UPDATE_HISTORY)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().and_then(dates::parse_timestamp))
                .collect()
        })
        .unwrap_or_default();

    let Some(last_update) = history.last() else {
        return true;
    };

    let interval = if history.len() >= 2 {
        let total: Duration = history.windows(2).map(|pair| pair[1] - pair[0]).sum();
        let gaps = i32::try_from(history.len() - 1).unwrap_or(i32::MAX);
        cap(total / gaps, MEAN_INTERVAL_CAP)
    } else {
        cap(now - *last_update, SINGLE_INTERVAL_CAP)
    };

    now > last_check + interval
}

#[must_use]
pub fn should_update(series: &Value) -> bool {
    should_update_at(series, dates::now())
}

fn cap(interval: Duration, limit: Duration) -> Duration {
    if interval >= limit {
        limit
    } else {
        interval
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn at(text: &str) -> PrimitiveDateTime {
        dates::parse_timestamp(text).unwrap()
    }

    fn series(history: &[&str], checked: Option<&str>, status: &str) -> Value {
        let mut meta = serde_json::Map::new();
        if !history.is_empty() {
            meta.insert(keys::UPDATE_HISTORY.into(), json!(history));
        }
        if let Some(checked) = checked {
            meta.insert(keys::UPDATE_CHECK.into(), json!(checked));
        }
        json!({
            "title": "Example",
            "status": status,
            "episodes": [{ "season": 1, "episode": 1 }],
            keys::META: meta,
        })
    }

    #[test]
    fn never_checked_is_always_due() {
        let record = series(&[], None, "returning");
        assert!(should_update_at(&record, at("2024-01-01 00:00:00")));
    }

    #[test]
    fn ended_series_are_never_due() {
        let record = series(&["2024-01-01"], Some("2024-01-02"), "ended");
        assert!(!should_update_at(&record, at("2030-01-01 00:00:00")));
    }

    #[test]
    fn mean_interval_schedules_the_next_poll() {
        // 14-day mean gap, checked 2024-01-16: due strictly after 2024-01-30
        let record = series(
            &["2024-01-01", "2024-01-15"],
            Some("2024-01-16"),
            "returning",
        );
        assert!(!should_update_at(&record, at("2024-01-30 00:00:00")));
        assert!(should_update_at(&record, at("2024-01-30 00:00:01")));
    }

    #[test]
    fn single_entry_interval_is_capped_at_two_days() {
        let record = series(&["2023-06-01"], Some("2024-01-01"), "returning");
        // elapsed time far exceeds the cap, so the cap applies
        assert!(!should_update_at(&record, at("2024-01-02 00:00:00")));
        assert!(should_update_at(&record, at("2024-01-03 00:00:01")));
    }
}
