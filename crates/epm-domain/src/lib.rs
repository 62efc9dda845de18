//! Pure domain logic for the episode-manager store: the metadata key
//! vocabulary, read-only helpers over the stored document model, episode
//! arithmetic, lifecycle state derivation, the update-due heuristic, ordinal
//! index labels and the query pipeline.
//!
//! Nothing in this crate touches the filesystem; all mutation lives in
//! `epm-core`.

pub mod dates;
pub mod episodes;
pub mod index;
pub mod keys;
pub mod meta;
pub mod query;
pub mod state;
pub mod update;

pub use episodes::{Episode, EpisodeKey};
pub use query::SeriesMatch;
pub use state::{series_state, SeriesState, StateSet};
