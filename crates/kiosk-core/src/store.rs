//! On-disk persistence for the ledger and settings.
//!
//! Layout inside the data directory:
//!
//! - `ledger.json`: `{"users": {...}, "session_logs": [...]}`
//! - `settings.json`: `{"billingIntervalMinutes": 1.0}`
//!
//! Writes go to a temporary sibling which is fsynced and renamed over the
//! target, so readers only ever see a complete file.

use crate::error::{KioskError, KioskResult};
use crate::ledger::{Ledger, Settings};
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

pub const LEDGER_FILE: &str = "ledger.json";
pub const SETTINGS_FILE: &str = "settings.json";

/// File locations for one data directory. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    ledger_path: PathBuf,
    settings_path: PathBuf,
}

impl LedgerStore {
    /// Use `data_dir`, creating it if needed.
    pub fn open(data_dir: &Path) -> KioskResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| {
            KioskError::StorageIo(format!("cannot create {}: {e}", data_dir.display()))
        })?;
        Ok(Self {
            ledger_path: data_dir.join(LEDGER_FILE),
            settings_path: data_dir.join(SETTINGS_FILE),
        })
    }

    pub fn ledger_path(&self) -> &Path {
        &self.ledger_path
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Load both files, falling back to empty defaults when absent.
    ///
    /// Plaintext credentials from older ledgers are hashed and the ledger is
    /// rewritten immediately.
    pub fn load(&self) -> KioskResult<(Ledger, Settings)> {
        let mut ledger: Ledger = read_json_or_default(&self.ledger_path)?;
        let settings: Settings = read_json_or_default(&self.settings_path)?;

        if ledger.migrate_plaintext()? > 0 {
            self.save_ledger(&ledger)?;
        }

        info!(
            users = ledger.users.len(),
            logs = ledger.session_logs.len(),
            billing_interval_minutes = settings.billing_interval_minutes,
            "ledger loaded"
        );
        Ok((ledger, settings))
    }

    pub fn save_ledger(&self, ledger: &Ledger) -> KioskResult<()> {
        self.write_ledger(&encode_pretty(ledger)?)
    }

    pub fn save_settings(&self, settings: &Settings) -> KioskResult<()> {
        self.write_settings(&encode_pretty(settings)?)
    }

    /// Write already-encoded ledger bytes.
    pub fn write_ledger(&self, bytes: &[u8]) -> KioskResult<()> {
        atomic_write(&self.ledger_path, bytes)
    }

    /// Write already-encoded settings bytes.
    pub fn write_settings(&self, bytes: &[u8]) -> KioskResult<()> {
        atomic_write(&self.settings_path, bytes)
    }
}

/// Pretty JSON, the format both files are kept in.
pub fn encode_pretty<T: serde::Serialize>(value: &T) -> KioskResult<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(value)?)
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> KioskResult<T> {
    if !path.exists() {
        info!(path = %path.display(), "not found, starting empty");
        return Ok(T::default());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| KioskError::StorageIo(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| KioskError::StorageIo(format!("cannot parse {}: {e}", path.display())))
}

/// Replace `path` with `content` via a fsynced temporary file and rename.
///
/// Each call writes its own uniquely named sibling, so concurrent writers
/// never share a temporary file.
pub fn atomic_write(path: &Path, content: &[u8]) -> KioskResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let storage_err =
        |what: &str, e: std::io::Error| KioskError::StorageIo(format!("{what} {}: {e}", path.display()));

    let mut temp = NamedTempFile::new_in(dir).map_err(|e| storage_err("cannot stage", e))?;
    temp.write_all(content)
        .map_err(|e| storage_err("cannot write", e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| storage_err("cannot sync", e))?;
    temp.persist(path)
        .map_err(|e| storage_err("cannot replace", e.error))?;

    debug!(path = %path.display(), bytes = content.len(), "flushed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{SessionLogEntry, User};
    use crate::password;
    use chrono::Utc;

    #[test]
    fn missing_files_load_as_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::open(&dir.path().join("nested")).unwrap();
        let (ledger, settings) = store.load().unwrap();
        assert!(ledger.users.is_empty());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::open(dir.path()).unwrap();

        let mut ledger = Ledger::default();
        let mut user = User::new("$argon2id$placeholder".into(), 6.0);
        user.balance = 4.2;
        ledger.users.insert("alice".into(), user);
        let now = Utc::now();
        ledger.record_session(SessionLogEntry::closing("alice", now, now, 0.5), 10);
        store.save_ledger(&ledger).unwrap();

        let mut settings = Settings::default();
        settings.set_billing_interval(5.0).unwrap();
        store.save_settings(&settings).unwrap();

        let (loaded, loaded_settings) = store.load().unwrap();
        assert_eq!(loaded.user("alice").unwrap().balance, 4.2);
        assert_eq!(loaded.session_logs.len(), 1);
        assert_eq!(loaded_settings.billing_interval_minutes, 5.0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn concurrent_writers_never_tear_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::open(dir.path()).unwrap();

        let writers: Vec<_> = (0..8)
            .map(|n| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let mut ledger = Ledger::default();
                    for i in 0..200 {
                        let user = User::new(format!("hash-{n}-{i}"), f64::from(n));
                        ledger.users.insert(format!("user{i}"), user);
                    }
                    for _ in 0..20 {
                        store.save_ledger(&ledger).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let (ledger, _) = store.load().unwrap();
        assert_eq!(ledger.users.len(), 200);
        let rate = ledger.user("user0").unwrap().rate;
        assert!(ledger.users.values().all(|u| u.rate == rate));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn legacy_ledger_is_rewritten_hashed() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::open(dir.path()).unwrap();
        std::fs::write(
            store.ledger_path(),
            r#"{"users":{"bob":{"password":"hunter2","balance":3,"rate":6}}}"#,
        )
        .unwrap();

        let (ledger, _) = store.load().unwrap();
        assert!(password::verify_password("hunter2", &ledger.user("bob").unwrap().password_hash));

        let on_disk = std::fs::read_to_string(store.ledger_path()).unwrap();
        assert!(!on_disk.contains("hunter2"));
        assert!(on_disk.contains("passwordHash"));
    }

    #[test]
    fn corrupt_ledger_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::open(dir.path()).unwrap();
        std::fs::write(store.ledger_path(), "{ not json").unwrap();
        assert!(matches!(store.load(), Err(KioskError::StorageIo(_))));
    }
}
