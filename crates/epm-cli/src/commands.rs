//! Command implementations over the store session and catalog client.
//!
//! Every mutating command starts from a freshly loaded store, clears the
//! previous snapshot's change log, applies its edits through the metadata
//! API and appends its own log entries, so a later `rollback` can show what
//! the discarded snapshot changed.

use anyhow::Result;
use serde_json::{json, Value};

use epm_core::tmdb::API_KEY_HELP;
use epm_core::{Config, Database, StoreError, StoreSession, Target, TmdbClient};
use epm_domain::{dates, episodes, index, keys, query, update};
use epm_domain::{series_state, EpisodeKey, SeriesMatch, StateSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    UserError,
    Failure,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::UserError => "user-error",
            Status::Failure => "failure",
        }
    }
}

/// What a command wants printed: a one-line message, optional human detail
/// lines and a machine-readable details object for `--json`.
#[derive(Debug)]
pub struct Outcome {
    pub status: Status,
    pub message: String,
    pub lines: Vec<String>,
    pub details: Value,
}

impl Outcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            message: message.into(),
            lines: Vec::new(),
            details: json!({}),
        }
    }

    fn user_error(message: impl Into<String>) -> Self {
        Self {
            status: Status::UserError,
            message: message.into(),
            lines: Vec::new(),
            details: json!({}),
        }
    }

    fn with_lines(mut self, lines: Vec<String>) -> Self {
        self.lines = lines;
        self
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Loads, applies and saves in one motion. The previous snapshot's change
/// log is dropped first so the log saved with this snapshot describes only
/// this command.
fn with_store(
    session: &StoreSession,
    apply: impl FnOnce(&mut Database) -> Result<Outcome>,
) -> Result<Outcome> {
    let mut db = session.load()?;
    db.clear_change_log(Target::Root);
    let outcome = apply(&mut db)?;
    if outcome.status == Status::Ok {
        session.save(&mut db)?;
    }
    Ok(outcome)
}

fn catalog_client(config: &Config) -> Result<TmdbClient, Outcome> {
    let Some(api_key) = config.api_key.as_deref() else {
        return Err(Outcome::user_error(format!(
            "no TMDB API key configured. {API_KEY_HELP}"
        )));
    };
    TmdbClient::new(api_key, config.parallel)
        .map_err(|err| Outcome::user_error(err.to_string()))
}

/// Resolves a needle to exactly one tracked series or a displayable
/// user-error outcome.
fn resolve(db: &Database, needle: &str) -> Result<(u64, String), Outcome> {
    match query::find_single_series(db.entries(), needle, None) {
        SeriesMatch::One { index, id } => Ok((index, id.to_string())),
        SeriesMatch::NotFound { needle } => {
            Err(Outcome::user_error(format!("no series matches `{needle}`")))
        }
        SeriesMatch::Ambiguous(found) => {
            let candidates: Vec<String> = found
                .iter()
                .map(|(idx, id)| {
                    let title = db
                        .series(id)
                        .and_then(|series| series.get("title"))
                        .and_then(Value::as_str)
                        .unwrap_or("?");
                    format!("  {:>4}  {title}", index::index_label(*idx))
                })
                .collect();
            Err(Outcome::user_error(format!(
                "`{needle}` matches {} series; pick a list index",
                found.len()
            ))
            .with_lines(candidates))
        }
    }
}

fn title_of(series: &Value) -> &str {
    series.get("title").and_then(Value::as_str).unwrap_or("?")
}

fn episode_label(episode: &Value) -> String {
    let key = EpisodeKey::of(episode)
        .map(EpisodeKey::as_string)
        .unwrap_or_else(|| "?".to_string());
    match episode.get("title").and_then(Value::as_str) {
        Some(title) => format!("{key} {title}"),
        None => key,
    }
}

pub fn list(
    session: &StoreSession,
    needle: Option<&str>,
    all: bool,
    archived: bool,
) -> Result<Outcome> {
    let db = session.load()?;

    let states = if all {
        None
    } else if archived {
        Some(StateSet::ARCHIVED_LIKE)
    } else {
        Some(StateSet::ACTIVE.union(StateSet::COMPLETED))
    };

    let text = needle.map(str::to_lowercase);
    let matches = |series: &Value| {
        text.as_deref().is_none_or(|text| {
            series
                .get("title")
                .and_then(Value::as_str)
                .is_some_and(|title| title.to_lowercase().contains(text))
        })
    };

    let listed = query::indexed_series(db.entries(), None, Some(&matches), states, None);

    let mut lines = Vec::new();
    let mut rows = Vec::new();
    for (idx, id) in &listed {
        let Some(series) = db.series(id) else {
            continue;
        };
        let label = index::index_label(*idx);
        let state = series_state(series).as_str();
        let watched = episodes::watched_count(series);
        let total = episodes::episode_list(series).len();
        let next = episodes::next_unseen_episode(series).map(episode_label);

        let mut line = format!(
            "{label:>4}  {:<40}  {state:<9}  {watched:>3}/{total:<3}",
            title_of(series)
        );
        if let Some(next) = &next {
            line.push_str("  next ");
            line.push_str(next);
        }
        lines.push(line);

        rows.push(json!({
            "index": label,
            "id": id,
            "title": title_of(series),
            "state": state,
            "watched": watched,
            "episodes": total,
            "next": next,
        }));
    }

    let message = match listed.len() {
        1 => "1 series".to_string(),
        n => format!("{n} series"),
    };
    Ok(Outcome::ok(message)
        .with_lines(lines)
        .with_details(json!({ "series": rows })))
}

pub fn search(config: &Config, text: &str, year: Option<i32>) -> Result<Outcome> {
    let client = match catalog_client(config) {
        Ok(client) => client,
        Err(outcome) => return Ok(outcome),
    };

    let hits = client.search(text, year);
    if hits.is_empty() {
        return Ok(Outcome::user_error(format!("nothing found for `{text}`")));
    }

    let lines = hits
        .iter()
        .map(|hit| {
            let id = hit.get("id").and_then(Value::as_str).unwrap_or("?");
            let year = hit
                .get("year")
                .and_then(Value::as_array)
                .and_then(|years| years.first())
                .and_then(Value::as_i64)
                .map(|year| format!(" ({year})"))
                .unwrap_or_default();
            let country = hit
                .get("country")
                .and_then(Value::as_str)
                .map(|country| format!("  [{country}]"))
                .unwrap_or_default();
            format!("{id:>8}  {}{year}{country}", title_of(hit))
        })
        .collect();

    Ok(Outcome::ok(format!("{} candidates", hits.len()))
        .with_lines(lines)
        .with_details(json!({ "candidates": hits })))
}

pub fn add(
    session: &StoreSession,
    config: &Config,
    title_id: &str,
    comment: Option<&str>,
) -> Result<Outcome> {
    let client = match catalog_client(config) {
        Ok(client) => client,
        Err(outcome) => return Ok(outcome),
    };

    with_store(session, |db| {
        let Some(record) = client.details(title_id) else {
            return Ok(Outcome::user_error(format!(
                "`{title_id}` is not in the catalog"
            )));
        };
        let id = record
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or(title_id)
            .to_string();
        if db.series(&id).is_some() {
            return Ok(Outcome::user_error(format!(
                "{} is already tracked",
                title_of(&record)
            )));
        }

        let fetched = client.episodes(&id);
        let title = title_of(&record).to_string();
        let mut record = record;
        if let Some(map) = record.as_object_mut() {
            map.insert("episodes".to_string(), serde_json::to_value(&fetched)?);
        }

        let idx = next_list_index(db);
        let stamp = dates::format_timestamp(dates::now());
        db.insert_series(id.clone(), record);
        let target = Target::Series(&id);
        db.meta_set(target, keys::ADDED, json!(stamp));
        db.meta_set(target, keys::LIST_INDEX, json!(idx));
        db.meta_set(target, keys::UPDATE_CHECK, json!(stamp));
        db.meta_set(target, keys::UPDATE_HISTORY, json!([stamp]));
        if let Some(comment) = comment {
            db.meta_set(target, keys::ADD_COMMENT, json!(comment));
        }
        db.append_change_log(Target::Root, "added", Some(&id));

        Ok(Outcome::ok(format!(
            "added {title} as {} ({} episodes)",
            index::index_label(idx),
            fetched.len()
        ))
        .with_details(json!({ "id": id, "index": idx, "episodes": fetched.len() })))
    })
}

/// Ordinal for the next added series: the stored counter when present,
/// otherwise one past the highest index in use.
fn next_list_index(db: &mut Database) -> u64 {
    let next = db
        .meta_get(Target::Root, keys::NEXT_LIST_INDEX)
        .and_then(Value::as_u64)
        .unwrap_or_else(|| {
            query::indexed_series(db.entries(), None, None, None, None)
                .iter()
                .map(|(idx, _)| *idx)
                .max()
                .unwrap_or(0)
                + 1
        });
    db.meta_set(Target::Root, keys::NEXT_LIST_INDEX, json!(next + 1));
    next
}

pub fn seen(
    session: &StoreSession,
    needle: &str,
    episodes_args: &[String],
    aired: bool,
) -> Result<Outcome> {
    with_store(session, |db| {
        let (_, id) = match resolve(db, needle) {
            Ok(hit) => hit,
            Err(outcome) => return Ok(outcome),
        };
        let series = db.series(&id).cloned().unwrap_or(Value::Null);

        let marks: Vec<EpisodeKey> = if aired {
            let (_, unseen) = episodes::seen_unseen(&series, Some(dates::now()));
            unseen.iter().filter_map(|episode| EpisodeKey::of(episode)).collect()
        } else if episodes_args.is_empty() {
            match episodes::next_unseen_episode(&series).and_then(EpisodeKey::of) {
                Some(key) => vec![key],
                None => {
                    return Ok(Outcome::user_error(format!(
                        "{} has no unseen episodes",
                        title_of(&series)
                    )))
                }
            }
        } else {
            let mut keys = Vec::new();
            for arg in episodes_args {
                match EpisodeKey::parse(arg) {
                    Some(key) => keys.push(key),
                    None => {
                        return Ok(Outcome::user_error(format!(
                            "`{arg}` is not a SEASON:EPISODE key"
                        )))
                    }
                }
            }
            keys
        };

        if marks.is_empty() {
            return Ok(Outcome::user_error(format!(
                "{} has no unseen aired episodes",
                title_of(&series)
            )));
        }

        let stamp = dates::format_timestamp(dates::now());
        let target = Target::Series(&id);
        let mut seen_map = db
            .meta_get(target, keys::SEEN)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        for key in &marks {
            seen_map.insert(key.as_string(), json!(stamp));
        }
        db.meta_set(target, keys::SEEN, Value::Object(seen_map));
        for key in &marks {
            db.append_change_log(
                Target::Root,
                &format!("seen {}", key.as_string()),
                Some(&id),
            );
        }

        let listed: Vec<String> = marks.iter().map(|key| key.as_string()).collect();
        Ok(Outcome::ok(format!(
            "{}: marked {} seen",
            title_of(&series),
            listed.join(", ")
        ))
        .with_details(json!({ "id": id, "seen": listed })))
    })
}

pub fn unseen(session: &StoreSession, needle: &str, episodes_args: &[String]) -> Result<Outcome> {
    with_store(session, |db| {
        let (_, id) = match resolve(db, needle) {
            Ok(hit) => hit,
            Err(outcome) => return Ok(outcome),
        };
        let series = db.series(&id).cloned().unwrap_or(Value::Null);

        let marks: Vec<EpisodeKey> = if episodes_args.is_empty() {
            // default to undoing the most recent mark
            match episodes::last_seen_episode(&series)
                .and_then(|(episode, _)| EpisodeKey::of(episode))
            {
                Some(key) => vec![key],
                None => {
                    return Ok(Outcome::user_error(format!(
                        "{} has no seen episodes",
                        title_of(&series)
                    )))
                }
            }
        } else {
            let mut keys = Vec::new();
            for arg in episodes_args {
                match EpisodeKey::parse(arg) {
                    Some(key) => keys.push(key),
                    None => {
                        return Ok(Outcome::user_error(format!(
                            "`{arg}` is not a SEASON:EPISODE key"
                        )))
                    }
                }
            }
            keys
        };

        let target = Target::Series(&id);
        let mut seen_map = db
            .meta_get(target, keys::SEEN)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let mut removed = Vec::new();
        for key in &marks {
            if seen_map.remove(&key.as_string()).is_some() {
                removed.push(key.as_string());
            }
        }
        if removed.is_empty() {
            return Ok(Outcome::user_error(format!(
                "none of those episodes were marked seen for {}",
                title_of(&series)
            )));
        }
        db.meta_set(target, keys::SEEN, Value::Object(seen_map));
        for key in &removed {
            db.append_change_log(Target::Root, &format!("unseen {key}"), Some(&id));
        }

        Ok(Outcome::ok(format!(
            "{}: unmarked {}",
            title_of(&series),
            removed.join(", ")
        ))
        .with_details(json!({ "id": id, "unseen": removed })))
    })
}

pub fn archive(session: &StoreSession, needle: &str) -> Result<Outcome> {
    with_store(session, |db| {
        let (_, id) = match resolve(db, needle) {
            Ok(hit) => hit,
            Err(outcome) => return Ok(outcome),
        };
        let series = db.series(&id).cloned().unwrap_or(Value::Null);
        if series_state(&series).is_archived_like() {
            return Ok(Outcome::user_error(format!(
                "{} is already archived",
                title_of(&series)
            )));
        }

        let stamp = dates::format_timestamp(dates::now());
        db.meta_set(Target::Series(&id), keys::ARCHIVED, json!(stamp));
        db.append_change_log(Target::Root, "archived", Some(&id));
        Ok(Outcome::ok(format!("archived {}", title_of(&series)))
            .with_details(json!({ "id": id })))
    })
}

pub fn restore(session: &StoreSession, needle: &str) -> Result<Outcome> {
    with_store(session, |db| {
        let (_, id) = match resolve(db, needle) {
            Ok(hit) => hit,
            Err(outcome) => return Ok(outcome),
        };
        let series = db.series(&id).cloned().unwrap_or(Value::Null);
        if !series_state(&series).is_archived_like() {
            return Ok(Outcome::user_error(format!(
                "{} is not archived",
                title_of(&series)
            )));
        }

        db.meta_delete(Target::Series(&id), keys::ARCHIVED);
        db.append_change_log(Target::Root, "restored", Some(&id));
        Ok(Outcome::ok(format!("restored {}", title_of(&series)))
            .with_details(json!({ "id": id })))
    })
}

pub fn rate(
    session: &StoreSession,
    needle: &str,
    rating: u8,
    comment: Option<&str>,
) -> Result<Outcome> {
    with_store(session, |db| {
        let (_, id) = match resolve(db, needle) {
            Ok(hit) => hit,
            Err(outcome) => return Ok(outcome),
        };
        let title = db.series(&id).map(title_of).unwrap_or("?").to_string();

        let target = Target::Series(&id);
        db.meta_set(target, keys::RATING, json!(rating));
        if let Some(comment) = comment {
            db.meta_set(target, keys::RATING_COMMENT, json!(comment));
        }
        db.append_change_log(Target::Root, &format!("rated {rating}"), Some(&id));
        Ok(Outcome::ok(format!("rated {title} {rating}/10"))
            .with_details(json!({ "id": id, "rating": rating })))
    })
}

pub fn refresh(
    session: &StoreSession,
    config: &Config,
    needle: Option<&str>,
    force: bool,
) -> Result<Outcome> {
    let client = match catalog_client(config) {
        Ok(client) => client,
        Err(outcome) => return Ok(outcome),
    };

    with_store(session, |db| {
        let targets: Vec<String> = match needle {
            Some(needle) => match resolve(db, needle) {
                Ok((_, id)) => vec![id],
                Err(outcome) => return Ok(outcome),
            },
            None => db.ids().iter().map(ToString::to_string).collect(),
        };

        let mut refreshed = Vec::new();
        let mut skipped = 0usize;
        for id in targets {
            let Some(series) = db.series(&id) else {
                continue;
            };
            if !force && !update::should_update(series) {
                skipped += 1;
                continue;
            }

            let had_episodes = !episodes::episode_list(series).is_empty();
            let title = title_of(series).to_string();
            let fetched = client.episodes(&id);
            if fetched.is_empty() && had_episodes {
                // a degraded catalog fetch must not wipe a populated list
                tracing::warn!(id, "catalog returned no episodes; keeping the stored list");
                skipped += 1;
                continue;
            }

            let stamp = dates::format_timestamp(dates::now());
            let count = fetched.len();
            let list = serde_json::to_value(&fetched)?;
            if let Some(record) = db.series_mut(&id) {
                record["episodes"] = list;
            }
            let target = Target::Series(&id);
            db.meta_set(target, keys::UPDATE_CHECK, json!(stamp));
            let mut history = db
                .meta_get(target, keys::UPDATE_HISTORY)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            history.push(json!(stamp));
            db.meta_set(target, keys::UPDATE_HISTORY, Value::Array(history));
            db.append_change_log(Target::Root, "refreshed", Some(&id));
            refreshed.push(json!({ "id": id, "title": title, "episodes": count }));
        }

        Ok(Outcome::ok(format!(
            "refreshed {} series, {skipped} not due",
            refreshed.len()
        ))
        .with_details(json!({ "refreshed": refreshed, "skipped": skipped })))
    })
}

pub fn rollback(session: &StoreSession) -> Result<Outcome> {
    match session.rollback() {
        Ok(outcome) => {
            let lines: Vec<String> = outcome
                .change_log
                .iter()
                .map(|(message, subject)| match subject {
                    Some(subject) => format!("  undid: {message} ({subject})"),
                    None => format!("  undid: {message}"),
                })
                .collect();
            let log: Vec<Value> = outcome
                .change_log
                .iter()
                .map(|(message, subject)| json!([message, subject]))
                .collect();
            Ok(Outcome::ok(format!(
                "restored {} ({} backups left)",
                outcome.restored_from.display(),
                outcome.backups_remaining
            ))
            .with_lines(lines)
            .with_details(json!({
                "restored_from": outcome.restored_from.display().to_string(),
                "backups_remaining": outcome.backups_remaining,
                "undone": log,
            })))
        }
        Err(StoreError::NoBackup(path)) => Ok(Outcome::user_error(format!(
            "no backup to roll back to ({path})"
        ))),
        Err(err) => Err(err.into()),
    }
}

pub fn backups(session: &StoreSession) -> Result<Outcome> {
    let found = session.list_backups();
    let lines: Vec<String> = found
        .iter()
        .map(|path| format!("  {}", path.display()))
        .collect();
    let paths: Vec<String> = found
        .iter()
        .map(|path| path.display().to_string())
        .collect();
    let message = match found.len() {
        1 => "1 backup".to_string(),
        n => format!("{n} backups"),
    };
    Ok(Outcome::ok(message)
        .with_lines(lines)
        .with_details(json!({ "backups": paths })))
}
