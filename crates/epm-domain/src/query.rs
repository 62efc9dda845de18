//! Stable ordering, filtered lookup and single-match resolution over the
//! record set.

use serde_json::{Map, Value};
use tracing::debug;

use crate::state::{self, StateSet};
use crate::{keys, meta};

/// The raw store document: record id to record, plus the reserved metadata
/// entry.
pub type Entries = Map<String, Value>;

/// Sort token for the default ordering: case-insensitive title, then years.
pub type SortToken = (String, Vec<i64>);

pub type SortKeyFn<'a> = &'a dyn Fn(&str, &Value) -> SortToken;
pub type FilterFn<'a> = &'a dyn Fn(&str, &Value) -> bool;
pub type MatchFn<'a> = &'a dyn Fn(&Value) -> bool;

/// Every record id; the reserved metadata entry never appears. Enumeration
/// order is unspecified, callers sort explicitly.
#[must_use]
pub fn all_ids(entries: &Entries) -> Vec<&str> {
    entries
        .keys()
        .map(String::as_str)
        .filter(|id| *id != keys::META)
        .collect()
}

#[must_use]
pub fn title_year_key(_id: &str, series: &Value) -> SortToken {
    let title = series
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();
    let years = series
        .get("year")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default();
    (title, years)
}

/// General pipeline over the record set: optional sort, optional filter,
/// projection.
pub fn filter_map<'a, T>(
    entries: &'a Entries,
    sort_key: Option<SortKeyFn<'_>>,
    filter: Option<FilterFn<'_>>,
    map: impl Fn(&'a str, &'a Value) -> T,
) -> Vec<T> {
    let mut items: Vec<(&str, &Value)> = entries
        .iter()
        .filter(|(id, _)| id.as_str() != keys::META)
        .map(|(id, series)| (id.as_str(), series))
        .collect();

    if let Some(key) = sort_key {
        items.sort_by_cached_key(|(id, series)| key(id, series));
    }

    items
        .into_iter()
        .filter(|(id, series)| filter.is_none_or(|accept| accept(id, series)))
        .map(|(id, series)| map(id, series))
        .collect()
}

/// Ordinal list index of a record, 0 when none has been assigned yet.
#[must_use]
pub fn list_index(series: &Value) -> u64 {
    meta::get_u64(series, keys::LIST_INDEX).unwrap_or(0)
}

/// `(list_index, id)` pairs with a predictable sort, filtered by any
/// combination of exact index, predicate and state membership.
#[must_use]
pub fn indexed_series<'a>(
    entries: &'a Entries,
    index: Option<u64>,
    matcher: Option<MatchFn<'_>>,
    states: Option<StateSet>,
    sort_key: Option<SortKeyFn<'_>>,
) -> Vec<(u64, &'a str)> {
    let accept = |_id: &str, series: &Value| -> bool {
        if index.is_some_and(|want| list_index(series) != want) {
            return false;
        }
        if matcher.is_some_and(|matches| !matches(series)) {
            return false;
        }
        if states.is_some_and(|set| !set.contains(state::series_state(series))) {
            return false;
        }
        true
    };

    let default_key: SortKeyFn<'_> = &title_year_key;
    let key = sort_key.unwrap_or(default_key);

    filter_map(entries, Some(key), Some(&accept), |id, series| {
        (list_index(series), id)
    })
}

/// How a [`find_single_series`] needle resolved.
#[derive(Debug)]
pub enum SeriesMatch<'a> {
    One { index: u64, id: &'a str },
    /// More than one record matched; the caller disambiguates.
    Ambiguous(Vec<(u64, &'a str)>),
    NotFound { needle: String },
}

/// Resolves a needle to exactly one record: an integer matches the ordinal
/// list index, a `tt…` needle matches the IMDb id exactly, anything else is
/// a case-insensitive title substring.
#[must_use]
pub fn find_single_series<'a>(
    entries: &'a Entries,
    needle: &str,
    extra: Option<MatchFn<'_>>,
) -> SeriesMatch<'a> {
    if needle.is_empty() {
        return SeriesMatch::NotFound {
            needle: needle.to_string(),
        };
    }

    enum Needle {
        Index(u64),
        ImdbId(String),
        Title(String),
    }

    let wanted = if let Ok(index) = needle.parse::<u64>() {
        Needle::Index(index)
    } else if needle.starts_with("tt") {
        Needle::ImdbId(needle.to_string())
    } else {
        Needle::Title(needle.to_lowercase())
    };

    let accept = |_id: &str, series: &Value| -> bool {
        let hit = match &wanted {
            Needle::Index(want) => list_index(series) == *want,
            Needle::ImdbId(id) => {
                series.get("imdb_id").and_then(Value::as_str) == Some(id.as_str())
            }
            Needle::Title(text) => series
                .get("title")
                .and_then(Value::as_str)
                .is_some_and(|title| title.to_lowercase().contains(text.as_str())),
        };
        hit && extra.is_none_or(|matches| matches(series))
    };

    let mut found = filter_map(entries, None, Some(&accept), |id, series| {
        (list_index(series), id)
    });
    debug!(needle, matched = found.len(), "resolved series needle");

    match found.len() {
        1 => {
            let (index, id) = found.remove(0);
            SeriesMatch::One { index, id }
        }
        0 => SeriesMatch::NotFound {
            needle: needle.to_string(),
        },
        _ => SeriesMatch::Ambiguous(found),
    }
}
