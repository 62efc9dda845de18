//! Versioned, crash-safe record store for tracked TV series, plus the TMDB
//! catalog client.
//!
//! The store is a single compressed JSON document with rotating backups.
//! Loading migrates old layouts in place; saving is dirty-gated and installs
//! the new snapshot with a single rename so the previous one is never
//! destroyed before the new one is confirmed.

pub mod compress;
pub mod config;
pub mod db;
pub mod error;
pub mod migrate;
pub mod session;
pub mod tmdb;

pub use compress::Compressor;
pub use config::Config;
pub use db::{Database, Target};
pub use error::StoreError;
pub use migrate::{migrate, MigrationReport, DB_VERSION};
pub use session::{RollbackOutcome, StoreSession};
pub use tmdb::TmdbClient;
