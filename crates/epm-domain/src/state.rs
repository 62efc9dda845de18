//! Lifecycle state derived from a record's stored facts.

use serde_json::Value;

use crate::{episodes, keys, meta};

/// Lifecycle stage of one tracked series.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeriesState {
    /// Added but nothing watched yet.
    Planned,
    /// Some episodes watched.
    Started,
    /// All episodes watched and the series has ended.
    Completed,
    /// Archived with every episode watched.
    Archived,
    /// Archived while episodes remained unwatched.
    Abandoned,
}

impl SeriesState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SeriesState::Planned => "planned",
            SeriesState::Started => "started",
            SeriesState::Completed => "completed",
            SeriesState::Archived => "archived",
            SeriesState::Abandoned => "abandoned",
        }
    }

    /// Archived and abandoned records are both shelved for querying and
    /// update scheduling.
    #[must_use]
    pub fn is_archived_like(self) -> bool {
        matches!(self, SeriesState::Archived | SeriesState::Abandoned)
    }

    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, SeriesState::Planned | SeriesState::Started)
    }
}

/// Query-side membership set over [`SeriesState`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StateSet(u8);

impl StateSet {
    pub const PLANNED: StateSet = StateSet(0x01);
    pub const STARTED: StateSet = StateSet(0x02);
    pub const COMPLETED: StateSet = StateSet(0x04);
    pub const ARCHIVED: StateSet = StateSet(0x08);
    pub const ABANDONED: StateSet = StateSet(0x10);
    /// Planned or started; only meaningful as a query filter.
    pub const ACTIVE: StateSet = StateSet::PLANNED.union(StateSet::STARTED);
    pub const ARCHIVED_LIKE: StateSet = StateSet::ARCHIVED.union(StateSet::ABANDONED);

    #[must_use]
    pub const fn union(self, other: StateSet) -> StateSet {
        StateSet(self.0 | other.0)
    }

    #[must_use]
    pub fn contains(self, state: SeriesState) -> bool {
        let bit = match state {
            SeriesState::Planned => 0x01,
            SeriesState::Started => 0x02,
            SeriesState::Completed => 0x04,
            SeriesState::Archived => 0x08,
            SeriesState::Abandoned => 0x10,
        };
        self.0 & bit != 0
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// True when the external status says no further episodes are coming.
#[must_use]
pub fn ended_status(series: &Value) -> bool {
    matches!(
        series.get("status").and_then(Value::as_str),
        Some("ended" | "canceled")
    )
}

#[must_use]
pub fn series_state(series: &Value) -> SeriesState {
    let episode_count = episodes::episode_list(series).len();
    let watched = episodes::watched_count(series);
    let unwatched = episode_count.saturating_sub(watched);

    if meta::has(series, keys::ARCHIVED) {
        if unwatched > 0 {
            return SeriesState::Abandoned;
        }
        return SeriesState::Archived;
    }

    if watched > 0 {
        if unwatched == 0 && ended_status(series) {
            return SeriesState::Completed;
        }
        return SeriesState::Started;
    }

    SeriesState::Planned
}
