//! Store session: load/migrate/save orchestration, atomic persistence with
//! rotating backups, and rollback.
//!
//! The active snapshot lives in slot 0 (`<base>.0<ext>`), backups in slots
//! 1..N. A save never leaves a window where the active path is missing or
//! truncated: the new snapshot is built in temp files and installed with a
//! single rename.

use std::fs;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::compress::Compressor;
use crate::config::Config;
use crate::db::{Database, Target};
use crate::error::StoreError;
use crate::migrate;

/// Result of a [`StoreSession::rollback`], for caller display.
#[derive(Debug)]
pub struct RollbackOutcome {
    pub restored_from: PathBuf,
    pub backups_remaining: u32,
    /// Change log collected from the discarded snapshot before the swap.
    pub change_log: Vec<(String, Option<String>)>,
}

/// Handle to the on-disk store: base path, backup depth and the compressor
/// selected for the process lifetime.
pub struct StoreSession {
    base: PathBuf,
    num_backups: u32,
    compressor: Compressor,
}

impl StoreSession {
    /// # Errors
    /// Fails on an unusable store path, or when compression is enabled but
    /// no compressor executable resolves.
    pub fn new(config: &Config) -> Result<Self, StoreError> {
        if config.series_db.as_os_str().len() < 2 {
            return Err(StoreError::InvalidPath(
                config.series_db.display().to_string(),
            ));
        }
        let compressor = if config.compression {
            Compressor::detect()?
        } else {
            Compressor::disabled()
        };
        Ok(Self {
            base: config.series_db.clone(),
            num_backups: config.num_backups,
            compressor,
        })
    }

    fn slot_path(&self, slot: u32) -> PathBuf {
        PathBuf::from(format!(
            "{}.{}{}",
            self.base.display(),
            slot,
            self.compressor.extension()
        ))
    }

    /// Slot 0, the active snapshot.
    #[must_use]
    pub fn active_path(&self) -> PathBuf {
        self.slot_path(0)
    }

    /// Loads the store, migrating it in place and saving immediately when
    /// migration changed anything. A missing store is a brand-new install
    /// and yields an empty database, not an error.
    ///
    /// # Errors
    /// Returns an error when the snapshot cannot be read or parsed, or a
    /// post-migration save fails.
    pub fn load(&self) -> Result<Database, StoreError> {
        let active = self.active_path();

        if !active.exists() {
            self.recover_missing_active(&active)?;
        }
        if !active.exists() {
            info!("new series database");
            return Ok(Database::default());
        }

        let started = Instant::now();
        let mut db = self.read_snapshot(&active)?;
        debug!(
            entries = db.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "read store"
        );

        migrate::migrate(&mut db);
        if db.is_dirty() {
            debug!("migration changed the store; saving");
            self.save(&mut db)?;
        }

        Ok(db)
    }

    /// Parses one snapshot as-is, with no migration and no side effects on
    /// disk.
    fn read_snapshot(&self, path: &Path) -> Result<Database, StoreError> {
        let reader = self.compressor.compressed_open(path)?;
        let entries: Map<String, Value> =
            serde_json::from_reader(BufReader::new(reader)).map_err(StoreError::Parse)?;
        Ok(Database::from_entries(entries))
    }

    /// Degraded recovery for deployment upgrades: an uncompressed file at
    /// the logical path is installed into the active slot, and a legacy
    /// install directory is tried before that.
    fn recover_missing_active(&self, active: &Path) -> Result<(), StoreError> {
        debug!(path = %active.display(), "active snapshot missing");

        if !self.base.exists() {
            if let Some(legacy) = legacy_base(&self.base) {
                if legacy.exists() {
                    if let Some(parent) = self.base.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::copy(&legacy, &self.base)?;
                    info!(from = %legacy.display(), "copied store from legacy install path");
                }
            }
        }

        if self.base.exists() {
            if self.compressor.is_enabled() {
                let started = Instant::now();
                if let Err(err) = self.compressor.compress_file(&self.base, active) {
                    warn!(error = %err, "could not compress raw store; installing it as-is");
                    fs::rename(&self.base, active)?;
                } else {
                    debug!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "compressed raw store into the active slot"
                    );
                }
            } else {
                fs::rename(&self.base, active)?;
            }
        }

        Ok(())
    }

    /// Writes a new snapshot if the store is dirty. The previous snapshot
    /// is never destroyed before the new one is confirmed; on any failure
    /// the temp artifacts are cleaned up and the store on disk is what it
    /// was (modulo the active file having moved to backup slot 1).
    ///
    /// # Errors
    /// Serialization and compression failures abort the save. The dirty
    /// flag has already been cleared by then and is not restored; the
    /// caller may force a retry.
    pub fn save(&self, db: &mut Database) -> Result<(), StoreError> {
        if !db.is_dirty() {
            debug!("save skipped; store not dirty");
            return Ok(());
        }
        db.clear_dirty();

        let dir = match self.base.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let started = Instant::now();
        let mut tmp = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer(&mut tmp, db.entries()).map_err(StoreError::Serialize)?;
        tmp.flush()?;
        let raw = tmp.into_temp_path();

        let active = self.active_path();
        if active.exists() {
            // the current snapshot becomes backup slot 1; rotation below
            // then shifts it to slot 2, leaving slot 1 empty post-save
            fs::rename(&active, self.slot_path(1))?;
        }

        // both temp paths are deleted on drop if compression fails
        let compressed = NamedTempFile::new_in(&dir)?.into_temp_path();
        self.compressor.compress_file(&raw, &compressed)?;

        self.rotate_backups()?;
        compressed
            .persist(&active)
            .map_err(|err| StoreError::Io(err.error))?;

        debug!(
            entries = db.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "wrote store"
        );
        Ok(())
    }

    /// Shifts backup slots up by one, high-to-low so a shift never
    /// clobbers a not-yet-moved slot. Whatever occupied the deepest slot
    /// is evicted.
    fn rotate_backups(&self) -> Result<(), StoreError> {
        for slot in (1..self.num_backups).rev() {
            let from = self.slot_path(slot);
            if from.exists() {
                fs::rename(&from, self.slot_path(slot + 1))?;
            }
        }
        Ok(())
    }

    /// Existing backups, most recent first.
    #[must_use]
    pub fn list_backups(&self) -> Vec<PathBuf> {
        (1..=self.num_backups)
            .map(|slot| self.slot_path(slot))
            .filter(|path| path.exists())
            .collect()
    }

    /// Restores backup slot 1 into the active slot and shifts the rest
    /// down.
    ///
    /// # Errors
    /// Fails with [`StoreError::NoBackup`] when slot 1 does not exist.
    pub fn rollback(&self) -> Result<RollbackOutcome, StoreError> {
        let first = self.slot_path(1);
        if !first.exists() {
            return Err(StoreError::NoBackup(first.display().to_string()));
        }

        // collect what the discarded snapshot recorded, for display. Read
        // it raw: a full load could migrate-and-save, and that save would
        // rotate the very backup this restore is about to rename.
        let active = self.active_path();
        let change_log = if active.exists() {
            self.read_snapshot(&active)?.change_log(Target::Root)
        } else {
            Vec::new()
        };

        fs::rename(&first, &active)?;

        let mut remaining = 0;
        for slot in 2..=self.num_backups {
            let from = self.slot_path(slot);
            if from.exists() {
                remaining += 1;
                fs::rename(&from, self.slot_path(slot - 1))?;
            }
        }

        Ok(RollbackOutcome {
            restored_from: first,
            backups_remaining: remaining,
            change_log,
        })
    }
}

/// Pre-rename installs kept the store under an `epm` directory.
fn legacy_base(base: &Path) -> Option<PathBuf> {
    let parent = base.parent()?;
    if parent.file_name()? != "episode-manager" {
        return None;
    }
    Some(parent.parent()?.join("epm").join(base.file_name()?))
}
