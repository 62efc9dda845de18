//! Catalog lookup client for TMDB.
//!
//! All four lookups (search, details, episodes, changes) are pure,
//! retryable and possibly empty: a failed request degrades to an empty
//! result instead of aborting the caller. Independent fetches fan out on a
//! bounded worker pool whose width is fixed at construction.

mod values;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde_json::{json, Value};
use time::Date;
use tracing::debug;

use epm_domain::{dates, Episode};

use values::{drop_empty, drop_keys, join_job, join_names, rename_keys};

const BASE_URL: &str = "https://api.themoviedb.org/3";
const USER_AGENT: &str = concat!("epm/", env!("CARGO_PKG_VERSION"));
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub const API_KEY_HELP: &str = "Set the TMDB_API_KEY environment variable for your account.";

/// Statuses that mean the episode list is final.
const ENDED_STATUSES: &[&str] = &["ended", "canceled"];

#[derive(Debug)]
pub struct TmdbClient {
    base_url: String,
    api_key: String,
    http: reqwest::blocking::Client,
    pool: ThreadPool,
    search_cache: Mutex<HashMap<String, Vec<Value>>>,
    details_cache: Mutex<HashMap<String, Value>>,
    imdb_to_tmdb: Mutex<HashMap<String, String>>,
}

impl TmdbClient {
    /// # Errors
    /// Fails without an API key or when the HTTP client or worker pool
    /// cannot be built. `parallel` fixes the pool width for the client's
    /// lifetime.
    pub fn new(api_key: &str, parallel: usize) -> Result<Self> {
        Self::with_base_url(BASE_URL, api_key, parallel)
    }

    /// Same as [`TmdbClient::new`] against a different endpoint; used by
    /// tests to point at a local server.
    ///
    /// # Errors
    /// See [`TmdbClient::new`].
    pub fn with_base_url(base_url: &str, api_key: &str, parallel: usize) -> Result<Self> {
        if api_key.is_empty() {
            bail!("no TMDB API key configured; {API_KEY_HELP}");
        }
        let http = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallel.max(1))
            .thread_name(|index| format!("tmdb-request-{index}"))
            .build()
            .context("failed to build request pool")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http,
            pool,
            search_cache: Mutex::new(HashMap::new()),
            details_cache: Mutex::new(HashMap::new()),
            imdb_to_tmdb: Mutex::new(HashMap::new()),
        })
    }

    /// One GET; any failure (transport, status, body) yields `None`.
    fn fetch(&self, path: &str, query: &[(&str, String)]) -> Option<Value> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(path, "catalog query");
        let response = self
            .http
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .query(query)
            .send()
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.json().ok()
    }

    /// Candidate summaries for a title search, cleaned to store field
    /// names. Empty on failure or no hits.
    pub fn search(&self, text: &str, year: Option<i32>) -> Vec<Value> {
        let cache_key = format!("{text}\u{0}{year:?}");
        if let Some(hits) = self
            .search_cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(&cache_key).cloned())
        {
            return hits;
        }

        let mut query = vec![("query", text.to_string())];
        if let Some(year) = year {
            query.push(("first_air_date_year", year.to_string()));
        }
        let Some(data) = self.fetch("search/tv", &query) else {
            return Vec::new();
        };

        let mut hits = data.get("results").cloned().unwrap_or_else(|| json!([]));
        rename_keys(
            &mut hits,
            &[
                ("name", "title"),
                ("first_air_date", "date"),
                ("original_name", "original_title"),
                ("original_language", "language"),
                ("origin_country", "country"),
            ],
        );
        drop_keys(
            &mut hits,
            &[
                "backdrop_path",
                "popularity",
                "poster_path",
                "vote_average",
                "vote_count",
                "genre_ids",
            ],
        );
        for hit in hits.as_array_mut().into_iter().flatten() {
            normalize_common(hit);
        }
        drop_empty(&mut hits);

        let hits: Vec<Value> = hits.as_array().cloned().unwrap_or_default();
        if let Ok(mut cache) = self.search_cache.lock() {
            cache.insert(cache_key, hits.clone());
        }
        hits
    }

    /// Full record fields for one series, or `None` when the catalog has
    /// nothing. Accepts a TMDB id or an IMDb `tt…` id.
    pub fn details(&self, title_id: &str) -> Option<Value> {
        let tmdb_id = self.to_tmdb_id(title_id)?;

        if let Some(data) = self
            .details_cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(&tmdb_id).cloned())
        {
            return Some(data);
        }

        // details and external ids are independent; fetch them together
        let (detail, external) = self.pool.join(
            || self.fetch(&format!("tv/{tmdb_id}"), &[]),
            || self.fetch(&format!("tv/{tmdb_id}/external_ids"), &[]),
        );
        let mut data = detail?;

        // series-level runtime backfills episodes later; read it before
        // the cleanup below reshapes the payload
        let runtime = data
            .get("episode_run_time")
            .and_then(Value::as_array)
            .and_then(|list| list.first())
            .and_then(Value::as_u64);

        if let Some(imdb_id) = external
            .as_ref()
            .and_then(|ids| ids.get("imdb_id"))
            .and_then(Value::as_str)
        {
            if let Some(map) = data.as_object_mut() {
                map.insert("imdb_id".to_string(), json!(imdb_id));
            }
        }

        rename_keys(
            &mut data,
            &[
                ("name", "title"),
                ("first_air_date", "date"),
                ("last_air_date", "end_date"),
                ("original_name", "original_title"),
                ("original_language", "language"),
                ("origin_country", "country"),
                ("number_of_seasons", "total_seasons"),
                ("number_of_episodes", "total_episodes"),
            ],
        );
        drop_keys(
            &mut data,
            &[
                "backdrop_path",
                "popularity",
                "poster_path",
                "vote_average",
                "vote_count",
                "production_companies",
                "production_countries",
                "homepage",
                "in_production",
                "languages",
                "spoken_languages",
                "last_episode_to_air",
                "next_episode_to_air",
                "networks",
                "type",
                "tagline",
                "seasons",
                "created_by",
                "adult",
                "episode_run_time",
            ],
        );
        normalize_common(&mut data);

        if let Some(map) = data.as_object_mut() {
            if let Some(genres) = map.get("genres") {
                let joined = join_names(genres);
                if !joined.is_empty() {
                    map.insert("genre".to_string(), json!(joined));
                }
                map.remove("genres");
            }
            // the store compares statuses lowercase
            if let Some(status) = map.get("status").and_then(Value::as_str) {
                let status = status.to_lowercase();
                map.insert("status".to_string(), json!(status));
            }
            if let Some(runtime) = runtime {
                map.insert("episode_run_time".to_string(), json!(runtime));
            }

            // ended series carry their end year in the year list
            let ended = map
                .get("status")
                .and_then(Value::as_str)
                .is_some_and(|status| ENDED_STATUSES.contains(&status));
            let end_year = map
                .get("end_date")
                .and_then(Value::as_str)
                .and_then(|date| date.split('-').next())
                .and_then(|year| year.parse::<i64>().ok());
            if let (true, Some(end_year)) = (ended, end_year) {
                if let Some(years) = map.get_mut("year").and_then(Value::as_array_mut) {
                    years.push(json!(end_year));
                }
            } else {
                map.remove("end_date");
            }
        }

        if let Ok(mut cache) = self.details_cache.lock() {
            cache.insert(tmdb_id, data.clone());
        }
        Some(data)
    }

    /// Every episode of a series, fetched season by season on the worker
    /// pool. A failed season degrades to an empty partial result.
    pub fn episodes(&self, series_id: &str) -> Vec<Episode> {
        let Some(tmdb_id) = self.to_tmdb_id(series_id) else {
            return Vec::new();
        };
        let Some(details) = self.details(&tmdb_id) else {
            return Vec::new();
        };

        let seasons = details
            .get("total_seasons")
            .and_then(Value::as_u64)
            .unwrap_or(1);
        let runtime = details
            .get("episode_run_time")
            .and_then(Value::as_u64)
            .and_then(|minutes| u32::try_from(minutes).ok());

        let mut episodes: Vec<Episode> = self.pool.install(|| {
            (1..=seasons)
                .into_par_iter()
                .map(|season| self.fetch_season(&tmdb_id, season))
                .collect::<Vec<_>>()
        })
        .into_iter()
        .flatten()
        .collect();

        if let Some(runtime) = runtime {
            for episode in &mut episodes {
                episode.runtime.get_or_insert(runtime);
            }
        }
        episodes
    }

    fn fetch_season(&self, series_id: &str, season: u64) -> Vec<Episode> {
        let Some(data) = self.fetch(&format!("tv/{series_id}/season/{season}"), &[]) else {
            return Vec::new();
        };

        let mut list = data.get("episodes").cloned().unwrap_or_else(|| json!([]));
        rename_keys(
            &mut list,
            &[
                ("name", "title"),
                ("air_date", "date"),
                ("season_number", "season"),
                ("episode_number", "episode"),
            ],
        );
        for entry in list.as_array_mut().into_iter().flatten() {
            let director = entry
                .get("crew")
                .map_or_else(String::new, |crew| join_job(crew, "Director"));
            let writer = entry
                .get("crew")
                .map_or_else(String::new, |crew| join_job(crew, "Writer"));
            let cast = entry
                .get("guest_stars")
                .map_or_else(String::new, join_names);
            let Some(map) = entry.as_object_mut() else {
                continue;
            };
            if !director.is_empty() {
                map.insert("director".to_string(), json!(director));
            }
            if !writer.is_empty() {
                map.insert("writer".to_string(), json!(writer));
            }
            if !cast.is_empty() {
                map.insert("cast".to_string(), json!(cast));
            }
        }
        drop_keys(
            &mut list,
            &[
                "id",
                "still_path",
                "crew",
                "guest_stars",
                "production_code",
                "vote_average",
                "vote_count",
            ],
        );
        drop_empty(&mut list);

        list.as_array()
            .into_iter()
            .flatten()
            .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
            .collect()
    }

    /// Change entries for a series since `after`, with ignored keys
    /// filtered out. Empty on failure.
    pub fn changes(&self, series_id: &str, after: Date, ignore: &[&str]) -> Vec<Value> {
        let Some(tmdb_id) = self.to_tmdb_id(series_id) else {
            return Vec::new();
        };
        let query = [
            ("start_date", dates::format_date(after)),
            ("end_date", dates::format_date(dates::now().date())),
        ];
        let Some(data) = self.fetch(&format!("tv/{tmdb_id}/changes"), &query) else {
            return Vec::new();
        };
        data.get("changes")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| {
                        entry
                            .get("key")
                            .and_then(Value::as_str)
                            .is_none_or(|key| !ignore.contains(&key))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// IMDb `tt…` ids resolve through the find endpoint; anything else is
    /// assumed to already be a TMDB id.
    fn to_tmdb_id(&self, title_id: &str) -> Option<String> {
        if !title_id.starts_with("tt") {
            return Some(title_id.to_string());
        }
        if let Some(known) = self
            .imdb_to_tmdb
            .lock()
            .ok()
            .and_then(|cache| cache.get(title_id).cloned())
        {
            return Some(known);
        }

        let data = self.fetch(
            &format!("find/{title_id}"),
            &[("external_source", "imdb_id".to_string())],
        )?;
        let tmdb_id = data
            .get("tv_results")
            .and_then(Value::as_array)
            .and_then(|results| results.first())
            .and_then(|hit| hit.get("id"))
            .and_then(Value::as_i64)?
            .to_string();

        if let Ok(mut cache) = self.imdb_to_tmdb.lock() {
            cache.insert(title_id.to_string(), tmdb_id.clone());
        }
        Some(tmdb_id)
    }
}

/// Normalizations shared by search hits and details: `year` derived from
/// the air date, stringly ids, country lists joined.
fn normalize_common(entry: &mut Value) {
    let Some(map) = entry.as_object_mut() else {
        return;
    };
    if let Some(year) = map
        .get("date")
        .and_then(Value::as_str)
        .and_then(|date| date.split('-').next())
        .and_then(|year| year.parse::<i64>().ok())
    {
        map.insert("year".to_string(), json!([year]));
    }
    if let Some(id) = map.get("id").and_then(Value::as_i64) {
        map.insert("id".to_string(), json!(id.to_string()));
    }
    if let Some(country) = map.get("country").and_then(Value::as_array) {
        let joined = country
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        map.insert("country".to_string(), json!(joined));
    }
}

#[cfg(test)]
mod tests {
    use httptest::{matchers::*, responders::*, Expectation, Server};

    use super::*;

    fn client(server: &Server) -> TmdbClient {
        TmdbClient::with_base_url(&server.url_str("/"), "test-key", 2).unwrap()
    }

    #[test]
    fn construction_requires_an_api_key() {
        let err = TmdbClient::new("", 2).unwrap_err();
        assert!(err.to_string().contains("TMDB_API_KEY"));
    }

    #[test]
    fn search_cleans_hits_and_caches_them() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/search/tv"))
                .times(1)
                .respond_with(json_encoded(json!({
                    "results": [{
                        "id": 42,
                        "name": "Foo",
                        "first_air_date": "2010-05-01",
                        "original_language": "en",
                        "origin_country": ["US", "GB"],
                        "popularity": 1.5,
                        "overview": "",
                    }],
                }))),
        );
        let client = client(&server);

        let hits = client.search("foo", Some(2010));
        assert_eq!(
            hits,
            vec![json!({
                "id": "42",
                "title": "Foo",
                "date": "2010-05-01",
                "language": "en",
                "country": "US, GB",
                "year": [2010],
            })]
        );

        // second lookup is served from the cache; the server would fail a
        // second request against the times(1) expectation
        assert_eq!(client.search("foo", Some(2010)), hits);
    }

    #[test]
    fn search_degrades_to_empty_on_server_errors() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/search/tv"))
                .respond_with(status_code(500)),
        );
        assert!(client(&server).search("foo", None).is_empty());
    }

    #[test]
    fn details_reshapes_the_payload() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/tv/7")).respond_with(
                json_encoded(json!({
                    "id": 7,
                    "name": "Foo",
                    "first_air_date": "2010-05-01",
                    "last_air_date": "2015-03-01",
                    "status": "Ended",
                    "genres": [{ "id": 18, "name": "Drama" }, { "id": 80, "name": "Crime" }],
                    "episode_run_time": [45, 60],
                    "number_of_seasons": 2,
                    "number_of_episodes": 20,
                    "popularity": 9.9,
                    "homepage": "",
                })),
            ),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/tv/7/external_ids"))
                .respond_with(json_encoded(json!({ "imdb_id": "tt0700000" }))),
        );
        let client = client(&server);

        let details = client.details("7").unwrap();
        assert_eq!(details["title"], json!("Foo"));
        assert_eq!(details["status"], json!("ended"));
        assert_eq!(details["imdb_id"], json!("tt0700000"));
        assert_eq!(details["genre"], json!("Drama, Crime"));
        assert_eq!(details["episode_run_time"], json!(45));
        assert_eq!(details["total_seasons"], json!(2));
        // ended series keep both the start and the end year
        assert_eq!(details["year"], json!([2010, 2015]));
        assert!(details.get("popularity").is_none());
        assert!(details.get("homepage").is_none());
    }

    #[test]
    fn a_failed_season_degrades_to_a_partial_episode_list() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/tv/7")).respond_with(
                json_encoded(json!({
                    "id": 7,
                    "name": "Foo",
                    "status": "Returning Series",
                    "episode_run_time": [30],
                    "number_of_seasons": 2,
                })),
            ),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/tv/7/external_ids"))
                .respond_with(json_encoded(json!({}))),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/tv/7/season/1")).respond_with(
                json_encoded(json!({
                    "episodes": [
                        {
                            "id": 100,
                            "name": "Pilot",
                            "air_date": "2010-05-01",
                            "season_number": 1,
                            "episode_number": 1,
                            "crew": [
                                { "name": "A", "job": "Director" },
                                { "name": "B", "job": "Writer" },
                            ],
                            "guest_stars": [{ "name": "C" }],
                        },
                        {
                            "id": 101,
                            "name": "Second",
                            "air_date": "2010-05-08",
                            "season_number": 1,
                            "episode_number": 2,
                            "runtime": 25,
                        },
                    ],
                })),
            ),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/tv/7/season/2"))
                .respond_with(status_code(404)),
        );
        let client = client(&server);

        let episodes = client.episodes("7");
        assert_eq!(episodes.len(), 2);
        assert_eq!(episodes[0].title.as_deref(), Some("Pilot"));
        assert_eq!(episodes[0].director.as_deref(), Some("A"));
        assert_eq!(episodes[0].writer.as_deref(), Some("B"));
        assert_eq!(episodes[0].cast.as_deref(), Some("C"));
        // the series-level runtime backfills episodes that lack their own
        assert_eq!(episodes[0].runtime, Some(30));
        assert_eq!(episodes[1].runtime, Some(25));
    }

    #[test]
    fn changes_filters_ignored_keys() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/tv/7/changes")).respond_with(
                json_encoded(json!({
                    "changes": [
                        { "key": "images", "items": [] },
                        { "key": "overview", "items": [{}] },
                    ],
                })),
            ),
        );
        let client = client(&server);

        let after = Date::from_calendar_date(2024, time::Month::January, 1).unwrap();
        let changes = client.changes("7", after, &["images"]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0]["key"], json!("overview"));
    }

    #[test]
    fn imdb_ids_resolve_through_the_find_endpoint() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/find/tt0700000"))
                .times(1)
                .respond_with(json_encoded(json!({ "tv_results": [{ "id": 7 }] }))),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/tv/7/changes"))
                .times(2)
                .respond_with(json_encoded(json!({ "changes": [] }))),
        );
        let client = client(&server);

        let after = Date::from_calendar_date(2024, time::Month::January, 1).unwrap();
        assert!(client.changes("tt0700000", after, &[]).is_empty());
        // the resolved id is cached; find is only hit once
        assert!(client.changes("tt0700000", after, &[]).is_empty());
    }
}
