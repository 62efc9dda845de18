//! Episode arithmetic over a record's episode list and watched-episode map.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::PrimitiveDateTime;

use crate::{dates, keys, meta};

/// `(season, episode)` identity of one episode. Ordering is season-major.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct EpisodeKey {
    pub season: u32,
    pub episode: u32,
}

impl EpisodeKey {
    /// Reads the identity fields off a stored episode entry.
    #[must_use]
    pub fn of(episode: &Value) -> Option<Self> {
        Some(Self {
            season: u32::try_from(episode.get("season")?.as_u64()?).ok()?,
            episode: u32::try_from(episode.get("episode")?.as_u64()?).ok()?,
        })
    }

    /// Parses a seen-map key. Season-level sentinel keys (`"S:…"`) yield
    /// `None` and are thereby excluded from episode arithmetic.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let (season, episode) = text.split_once(':')?;
        if season == keys::SENTINEL_SEASON {
            return None;
        }
        Some(Self {
            season: season.parse().ok()?,
            episode: episode.parse().ok()?,
        })
    }

    #[must_use]
    pub fn as_string(self) -> String {
        format!("{}:{}", self.season, self.episode)
    }

    /// True when `self` directly follows `prev` in airing order: the next
    /// episode of the same season, or the first episode of the next season.
    #[must_use]
    pub fn succeeds(self, prev: Self) -> bool {
        self.season == prev.season && self.episode == prev.episode + 1
            || self.season == prev.season + 1 && self.episode == 1
    }
}

/// Typed view of one episode entry as exchanged with the catalog client.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Episode {
    pub season: u32,
    pub episode: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub director: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub writer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cast: Option<String>,
}

impl Episode {
    #[must_use]
    pub fn key(&self) -> EpisodeKey {
        EpisodeKey {
            season: self.season,
            episode: self.episode,
        }
    }
}

#[must_use]
pub fn episode_list(series: &Value) -> &[Value] {
    series
        .get("episodes")
        .and_then(Value::as_array)
        .map_or(&[], Vec::as_slice)
}

fn seen_map(series: &Value) -> Option<&Map<String, Value>> {
    meta::get(series, keys::SEEN)?.as_object()
}

/// Number of watched episodes, not counting season-level sentinel entries.
#[must_use]
pub fn watched_count(series: &Value) -> usize {
    seen_map(series).map_or(0, |seen| {
        seen.keys().filter(|key| EpisodeKey::parse(key).is_some()).count()
    })
}

/// Highest watched `(season, episode)` plus its watch timestamp, if any
/// non-sentinel entry exists.
fn watched_max(series: &Value) -> Option<(EpisodeKey, Option<&str>)> {
    let seen = seen_map(series)?;
    let mut best: Option<(EpisodeKey, Option<&str>)> = None;
    for (key, stamp) in seen {
        let Some(parsed) = EpisodeKey::parse(key) else {
            continue;
        };
        if best.is_none_or(|(current, _)| parsed > current) {
            best = Some((parsed, stamp.as_str()));
        }
    }
    best
}

/// The most recently aired episode that has been watched, with the time it
/// was marked. `None` when nothing has been watched or the watched maximum
/// no longer appears in the episode list.
#[must_use]
pub fn last_seen_episode(series: &Value) -> Option<(&Value, Option<&str>)> {
    let episodes = episode_list(series);
    if episodes.is_empty() {
        return None;
    }
    let (max, seen_at) = watched_max(series)?;
    episodes
        .iter()
        .find(|episode| EpisodeKey::of(episode) == Some(max))
        .map(|episode| (episode, seen_at))
}

/// The first episode after the watched maximum, or the very first episode
/// when nothing has been watched yet.
#[must_use]
pub fn next_unseen_episode(series: &Value) -> Option<&Value> {
    let episodes = episode_list(series);
    if episodes.is_empty() {
        return None;
    }
    let Some((max, _)) = watched_max(series) else {
        return episodes.first();
    };
    episodes
        .iter()
        .find(|episode| EpisodeKey::of(episode).is_some_and(|key| key.succeeds(max)))
}

/// Splits the episode list into watched and unwatched-but-aired. With a
/// cutoff, episodes airing after it are excluded from the unwatched side
/// and undated episodes are excluded entirely.
#[must_use]
pub fn seen_unseen<'a>(
    series: &'a Value,
    before: Option<PrimitiveDateTime>,
) -> (Vec<&'a Value>, Vec<&'a Value>) {
    let seen = seen_map(series);
    let mut seen_eps = Vec::new();
    let mut unseen_eps = Vec::new();

    for episode in episode_list(series) {
        let watched = EpisodeKey::of(episode)
            .is_some_and(|key| seen.is_some_and(|map| map.contains_key(&key.as_string())));
        if watched {
            seen_eps.push(episode);
            continue;
        }
        match episode.get("date").and_then(Value::as_str) {
            Some(text) => {
                if let (Some(cutoff), Some(aired)) = (before, dates::parse_timestamp(text)) {
                    if aired > cutoff {
                        continue;
                    }
                }
                unseen_eps.push(episode);
            }
            None if before.is_some() => {}
            None => unseen_eps.push(episode),
        }
    }

    (seen_eps, unseen_eps)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn series(watched: &[&str]) -> Value {
        let seen: Map<String, Value> = watched
            .iter()
            .map(|key| ((*key).to_string(), json!("2024-01-01 20:00:00")))
            .collect();
        json!({
            "title": "Example",
            "episodes": [
                { "season": 1, "episode": 1 },
                { "season": 1, "episode": 2 },
                { "season": 2, "episode": 1 },
            ],
            keys::META: { keys::SEEN: seen },
        })
    }

    #[test]
    fn next_unseen_walks_successors() {
        let next = |watched: &[&str]| {
            let record = series(watched);
            next_unseen_episode(&record).and_then(EpisodeKey::of)
        };
        assert_eq!(next(&["1:1"]), Some(EpisodeKey { season: 1, episode: 2 }));
        assert_eq!(next(&["1:1", "1:2"]), Some(EpisodeKey { season: 2, episode: 1 }));
        assert_eq!(next(&["1:1", "1:2", "2:1"]), None);
    }

    #[test]
    fn next_unseen_starts_at_the_beginning() {
        let record = series(&[]);
        let first = next_unseen_episode(&record).and_then(EpisodeKey::of);
        assert_eq!(first, Some(EpisodeKey { season: 1, episode: 1 }));
    }

    #[test]
    fn sentinel_season_entries_are_ignored() {
        let record = series(&["S:1", "1:1"]);
        assert_eq!(watched_count(&record), 1);
        let next = next_unseen_episode(&record).and_then(EpisodeKey::of);
        assert_eq!(next, Some(EpisodeKey { season: 1, episode: 2 }));
    }

    #[test]
    fn last_seen_returns_the_watched_maximum() {
        let record = series(&["1:1", "1:2"]);
        let (episode, seen_at) = last_seen_episode(&record).unwrap();
        assert_eq!(EpisodeKey::of(episode), Some(EpisodeKey { season: 1, episode: 2 }));
        assert_eq!(seen_at, Some("2024-01-01 20:00:00"));
    }

    #[test]
    fn seen_unseen_respects_the_cutoff() {
        let record = json!({
            "episodes": [
                { "season": 1, "episode": 1, "date": "2024-01-01" },
                { "season": 1, "episode": 2, "date": "2024-06-01" },
                { "season": 1, "episode": 3 },
            ],
            keys::META: { keys::SEEN: {} },
        });
        let cutoff = crate::dates::parse_timestamp("2024-03-01");
        let (seen, unseen) = seen_unseen(&record, cutoff);
        assert!(seen.is_empty());
        assert_eq!(unseen.len(), 1);

        let (_, unseen_all) = seen_unseen(&record, None);
        assert_eq!(unseen_all.len(), 3);
    }
}
