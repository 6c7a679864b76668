#![forbid(unsafe_code)]

mod repo;

pub use repo::SqliteLedgerStore;

use crate::domain::{ContainmentRecord, ContainmentState, Signature, TransitionRecord};
use crate::error::Error;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::Mutex;

/// Durable backing of the containment ledger.
///
/// Stores know nothing about per-signature exclusion; the ledger serializes
/// access before calling in. They do guarantee that [`LedgerStore::commit`]
/// is all-or-nothing.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Current record for a signature, if one was ever created.
    async fn load(&self, signature: &Signature) -> Result<Option<ContainmentRecord>, Error>;

    /// Apply a transition: update (or create) the record and append the
    /// history entry in one atomic step.
    ///
    /// The commit is conditional on the stored state still being
    /// `transition.from` (a missing record counts as unblocked). Returns
    /// `false` and changes nothing when it is not.
    async fn commit(&self, transition: &TransitionRecord) -> Result<bool, Error>;

    /// History of a signature, oldest first.
    async fn history(&self, signature: &Signature) -> Result<Vec<TransitionRecord>, Error>;

    /// Every record in the store, ordered by signature.
    async fn records(&self) -> Result<Vec<ContainmentRecord>, Error>;

    /// Flush and release the store. Further calls may fail.
    async fn close(&self) {}
}

#[derive(Debug, Default)]
struct MemoryState {
    records: FxHashMap<Signature, ContainmentRecord>,
    history: Vec<TransitionRecord>,
}

/// Process-local store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    state: Mutex<MemoryState>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn load(&self, signature: &Signature) -> Result<Option<ContainmentRecord>, Error> {
        Ok(self.state.lock().await.records.get(signature).cloned())
    }

    async fn commit(&self, transition: &TransitionRecord) -> Result<bool, Error> {
        let mut state = self.state.lock().await;
        let current = state
            .records
            .get(&transition.signature)
            .map(|record| record.state)
            .unwrap_or(ContainmentState::Unblocked);
        if current != transition.from {
            return Ok(false);
        }
        state
            .records
            .insert(transition.signature, transition.resulting_record());
        state.history.push(transition.clone());
        Ok(true)
    }

    async fn history(&self, signature: &Signature) -> Result<Vec<TransitionRecord>, Error> {
        Ok(self
            .state
            .lock()
            .await
            .history
            .iter()
            .filter(|entry| entry.signature == *signature)
            .cloned()
            .collect())
    }

    async fn records(&self) -> Result<Vec<ContainmentRecord>, Error> {
        let mut records: Vec<_> = self.state.lock().await.records.values().cloned().collect();
        records.sort_by_key(|record| record.signature);
        Ok(records)
    }
}
