//! Ledger persistence layer
//!
//! `LedgerStore` is the load/save contract for the whole ledger. Stores are
//! dumb: they hand out and accept complete snapshots. `LedgerService` wraps a
//! store in a transactional boundary so each request loads, applies exactly
//! one repository operation and saves while holding exclusive access.

mod file;

pub use file::JsonFileLedgerStore;

use crate::models::{Cycle, LedgerState, Payload, Release};
use crate::repository::CycleRepository;
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Trait for ledger persistence
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Full ledger; an empty one when nothing has been saved yet
    async fn load(&self) -> Result<LedgerState>;

    /// Replace the persisted ledger, stamping `updated_at`
    async fn save(&self, state: &mut LedgerState) -> Result<()>;
}

/// In-memory ledger store for development and tests
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::with_state(LedgerState::default())
    }

    pub fn with_state(state: LedgerState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn load(&self) -> Result<LedgerState> {
        Ok(self.state.read().await.clone())
    }

    async fn save(&self, state: &mut LedgerState) -> Result<()> {
        state.updated_at = Some(Utc::now());
        *self.state.write().await = state.clone();
        Ok(())
    }
}

/// Request-level entry points over a store.
///
/// Writers hold the gate exclusively from load to save; readers share it.
/// The guard is dropped on every exit path, and a failed operation never
/// reaches `save`.
pub struct LedgerService {
    store: Box<dyn LedgerStore>,
    gate: RwLock<()>,
}

impl LedgerService {
    pub fn new(store: Box<dyn LedgerStore>) -> Self {
        Self {
            store,
            gate: RwLock::new(()),
        }
    }

    async fn mutate<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut LedgerState) -> Result<T> + Send,
        T: Send,
    {
        let _guard = self.gate.write().await;
        let mut state = self.store.load().await?;
        let out = op(&mut state)?;
        self.store.save(&mut state).await?;
        debug!(cycles = state.cycles.len(), releases = state.releases.len(), "Ledger saved");
        Ok(out)
    }

    /// Reads recalculate in memory only; every mutation already saved
    /// fully derived state.
    async fn read<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut LedgerState) -> Result<T> + Send,
        T: Send,
    {
        let _guard = self.gate.read().await;
        let mut state = self.store.load().await?;
        op(&mut state)
    }

    pub async fn list_cycles(&self) -> Result<Vec<Cycle>> {
        self.read(|state| Ok(CycleRepository::list(state))).await
    }

    pub async fn get_cycle(&self, cycle_id: u64) -> Result<Cycle> {
        self.read(|state| CycleRepository::get(state, cycle_id)).await
    }

    /// Releases recorded against one cycle, oldest first
    pub async fn releases_for(&self, cycle_id: u64) -> Result<Vec<Release>> {
        self.read(|state| {
            CycleRepository::get(state, cycle_id)?;
            Ok(state.releases_for(cycle_id).cloned().collect())
        })
        .await
    }

    pub async fn create_cycle(&self, payload: &Payload) -> Result<Cycle> {
        self.mutate(|state| CycleRepository::create(state, payload)).await
    }

    pub async fn update_cycle(&self, payload: &Payload) -> Result<Cycle> {
        self.mutate(|state| CycleRepository::update(state, payload)).await
    }

    pub async fn add_release(&self, payload: &Payload) -> Result<(Release, Cycle)> {
        self.mutate(|state| CycleRepository::add_release(state, payload)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use serde_json::{json, Value};
    use tokio_test::{assert_err, assert_ok};

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => panic!("payload must be an object"),
        }
    }

    fn cycle_payload(id: u64) -> Payload {
        payload(json!({
            "cycleId": id,
            "investedAmount": 1000,
            "exchangeRate1": 10,
            "fee1": 1,
            "intermediateAmount": 99,
            "exchangeRate2": 5,
            "fee2": 2,
            "grossDestination": 495
        }))
    }

    #[tokio::test]
    async fn test_mutations_are_persisted() {
        let service = LedgerService::new(Box::new(InMemoryLedgerStore::new()));

        assert_ok!(service.create_cycle(&cycle_payload(1)).await);
        assert_ok!(
            service
                .add_release(&payload(json!({ "cycleId": 1, "releasedAmount": 100, "conversionRate": 5 })))
                .await
        );

        let cycle = service.get_cycle(1).await.unwrap();
        assert_eq!(cycle.available_destination, Some(493.0));
        assert_eq!(cycle.pending_destination, Some(393.0));
        assert_eq!(cycle.received_origin, 20.0);

        let releases = service.releases_for(1).await.unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].received_origin_amount, Some(20.0));
    }

    #[tokio::test]
    async fn test_failed_operation_is_not_saved() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let service = LedgerService::new(Box::new(InMemoryLedgerStore {
            state: store.state.clone(),
        }));

        let mut bad = cycle_payload(1);
        bad.remove("fee2");
        let err = assert_err!(service.create_cycle(&bad).await);
        assert!(matches!(err, LedgerError::MissingField("fee2")));

        let persisted = store.load().await.unwrap();
        assert!(persisted.cycles.is_empty());
        assert_eq!(persisted.updated_at, None);
    }

    #[tokio::test]
    async fn test_save_stamps_updated_at() {
        let service = LedgerService::new(Box::new(InMemoryLedgerStore::new()));
        service.create_cycle(&cycle_payload(2)).await.unwrap();

        let state = service.store.load().await.unwrap();
        assert!(state.updated_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_are_serialized() {
        let service = Arc::new(LedgerService::new(Box::new(InMemoryLedgerStore::new())));
        service.create_cycle(&cycle_payload(1)).await.unwrap();

        let mut handles = Vec::new();
        for id in 2..=21 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.create_cycle(&cycle_payload(id)).await.map(|_| ())
            }));
        }
        for _ in 0..20 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service
                    .add_release(&payload(json!({ "cycleId": 1, "releasedAmount": 1 })))
                    .await
                    .map(|_| ())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let cycles = service.list_cycles().await.unwrap();
        assert_eq!(cycles.len(), 21);
        assert_eq!(cycles[0].released_destination, 20.0);
    }

    #[tokio::test]
    async fn test_out_of_range_release_keeps_file_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let service = LedgerService::new(Box::new(JsonFileLedgerStore::new(&path)));

        assert_ok!(service.create_cycle(&cycle_payload(6)).await);
        let err = assert_err!(
            service
                .add_release(&payload(json!({ "cycleId": 6, "releasedAmount": "1e307" })))
                .await
        );
        assert_eq!(err.kind(), "validation_failed");

        let reopened = LedgerService::new(Box::new(JsonFileLedgerStore::new(&path)));
        let cycle = assert_ok!(reopened.get_cycle(6).await);
        assert_eq!(cycle.released_destination, 0.0);
        assert!(assert_ok!(reopened.releases_for(6).await).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reads_on_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(LedgerService::new(Box::new(JsonFileLedgerStore::new(
            dir.path().join("ledger.json"),
        ))));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let service = service.clone();
            handles.push(tokio::spawn(async move { service.list_cycles().await }));
        }
        for handle in handles {
            assert!(assert_ok!(handle.await.unwrap()).is_empty());
        }
    }
}
