//! JSON file ledger store
//!
//! The whole ledger lives in one pretty-printed JSON file. Saves go to a
//! uniquely named sibling temporary file which is then renamed over the
//! target, so readers never observe a half-written ledger and overlapping
//! saves (e.g. concurrent first reads creating the file) do not collide.

use super::LedgerStore;
use crate::error::LedgerError;
use crate::models::LedgerState;
use crate::Result;
use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct JsonFileLedgerStore {
    path: PathBuf,
}

impl JsonFileLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "ledger.json".into());
        name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
        self.path.with_file_name(name)
    }
}

#[async_trait::async_trait]
impl LedgerStore for JsonFileLedgerStore {
    async fn load(&self) -> Result<LedgerState> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No ledger file found, creating an empty one");
                let mut empty = LedgerState::default();
                self.save(&mut empty).await?;
                return Ok(empty);
            }
            Err(e) => return Err(e.into()),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(LedgerState::default());
        }

        serde_json::from_slice(&bytes).map_err(|e| {
            warn!(path = %self.path.display(), error = %e, "Ledger file could not be parsed");
            LedgerError::CorruptStore(format!("{}: {}", self.path.display(), e))
        })
    }

    async fn save(&self, state: &mut LedgerState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        state.updated_at = Some(Utc::now());
        let json = serde_json::to_vec_pretty(state)?;

        let temp = self.temp_path();
        {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(&json).await?;
            file.sync_all().await?;
        }
        if let Err(e) = fs::rename(&temp, &self.path).await {
            if let Err(cleanup) = fs::remove_file(&temp).await {
                warn!(path = %temp.display(), error = %cleanup, "Temporary ledger file left behind");
            }
            return Err(LedgerError::Storage(format!(
                "failed to replace {}: {}",
                self.path.display(),
                e
            )));
        }

        debug!(path = %self.path.display(), bytes = json.len(), "Ledger file written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cycle, CycleStatus};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_file_is_created_empty() {
        let dir = tempdir().unwrap();
        let store = JsonFileLedgerStore::new(dir.path().join("nested").join("ledger.json"));

        let state = store.load().await.unwrap();
        assert!(state.cycles.is_empty());
        assert!(state.releases.is_empty());
        assert!(store.path().exists());

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value["cycles"].is_object());
        assert!(value["releases"].is_array());
        assert!(value["updatedAt"].is_string());
    }

    #[tokio::test]
    async fn test_round_trip_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let store = JsonFileLedgerStore::new(dir.path().join("ledger.json"));

        let mut state = LedgerState::default();
        let mut cycle = Cycle::new(6, Utc::now());
        cycle.invested_amount = Some(11000.0);
        cycle.status = CycleStatus::InProgress;
        state.cycles.insert(6, cycle.clone());

        store.save(&mut state).await.unwrap();
        assert!(state.updated_at.is_some());
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("ledger.json")]);

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.cycles[&6], cycle);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error_not_a_reset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "{ \"cycles\": [ oops").unwrap();

        let store = JsonFileLedgerStore::new(&path);
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, LedgerError::CorruptStore(_)));
        assert_eq!(err.kind(), "corrupt_store");

        // untouched on disk
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ \"cycles\": [ oops");
    }

    #[tokio::test]
    async fn test_blank_file_loads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "\n").unwrap();

        let state = JsonFileLedgerStore::new(&path).load().await.unwrap();
        assert_eq!(state, LedgerState::default());
    }

    #[tokio::test]
    async fn test_reads_partial_hand_written_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(
            &path,
            r#"{
                "cycles": {
                    "15": {
                        "cycleId": 15,
                        "investedAmount": 500,
                        "exchangeRate1": null,
                        "fee1": null,
                        "intermediateAmount": null,
                        "exchangeRate2": null,
                        "grossDestination": null,
                        "fee2": null,
                        "availableDestination": 100,
                        "createdAt": "2023-08-01T00:00:00Z",
                        "updatedAt": "2023-08-01T00:00:00Z"
                    }
                }
            }"#,
        )
        .unwrap();

        let state = JsonFileLedgerStore::new(&path).load().await.unwrap();
        let cycle = &state.cycles[&15];
        assert_eq!(cycle.available_destination, Some(100.0));
        assert_eq!(cycle.status, CycleStatus::Pending);
        assert!(state.releases.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_loads_all_succeed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = JsonFileLedgerStore::new(&path);
            handles.push(tokio::spawn(async move { store.load().await }));
        }
        for handle in handles {
            let state = handle.await.unwrap().unwrap();
            assert!(state.cycles.is_empty());
        }

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("ledger.json")]);
    }

    #[test]
    fn test_temp_paths_are_unique_siblings() {
        let store = JsonFileLedgerStore::new("data/ledger.json");
        let (a, b) = (store.temp_path(), store.temp_path());
        assert_ne!(a, b);
        assert_eq!(a.parent(), store.path().parent());
        assert!(a.to_string_lossy().ends_with(".tmp"));
    }
}
