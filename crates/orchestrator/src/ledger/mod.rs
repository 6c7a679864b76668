#![forbid(unsafe_code)]

//! Containment ledger: the only owner of containment records.
//!
//! Every mutation goes through a [`SignatureLease`], which holds the
//! per-signature exclusive section. Callers that need to run an external
//! action between deciding and recording a transition keep the lease across
//! both steps; leases on different signatures never block each other.

mod locks;

pub use locks::KeyedLocks;

use crate::clock::Clock;
use crate::domain::{
    ContainmentRecord, ContainmentState, EnforcementHandle, Signature, TransitionRecord,
};
use crate::error::Error;
use crate::persistence::LedgerStore;
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};

/// Result of asking the ledger for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The record moved from `previous` to `applied`.
    Applied {
        previous: ContainmentState,
        applied: ContainmentState,
    },
    /// The record was already in the requested state; nothing was written.
    AlreadyInState(ContainmentState),
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    /// State of the record after the request.
    pub fn state(&self) -> ContainmentState {
        match self {
            Self::Applied { applied, .. } => *applied,
            Self::AlreadyInState(state) => *state,
        }
    }
}

pub struct ContainmentLedger {
    store: Box<dyn LedgerStore>,
    locks: KeyedLocks<Signature>,
    clock: Box<dyn Clock>,
}

impl ContainmentLedger {
    pub fn new(store: Box<dyn LedgerStore>, clock: Box<dyn Clock>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
            clock,
        }
    }

    /// Current record for `signature`, read without taking its lease.
    pub async fn lookup(&self, signature: &Signature) -> Result<Option<ContainmentRecord>, Error> {
        self.store.load(signature).await
    }

    /// Enter the exclusive section for `signature`, waiting for any other
    /// holder to finish.
    pub async fn acquire(&self, signature: Signature) -> SignatureLease<'_> {
        let guard = self.locks.lock(&signature).await;
        SignatureLease {
            ledger: self,
            signature,
            _guard: guard,
        }
    }

    /// Record a block under a lease held only for this call.
    pub async fn transition_to_blocked(
        &self,
        signature: Signature,
        handle: EnforcementHandle,
        diagnostic: impl Into<String>,
    ) -> Result<TransitionOutcome, Error> {
        self.acquire(signature)
            .await
            .transition_to_blocked(handle, diagnostic)
            .await
    }

    /// Record an unblock under a lease held only for this call.
    pub async fn transition_to_unblocked(
        &self,
        signature: Signature,
        diagnostic: impl Into<String>,
    ) -> Result<TransitionOutcome, Error> {
        self.acquire(signature)
            .await
            .transition_to_unblocked(diagnostic)
            .await
    }

    /// Transition history of `signature`, oldest first.
    pub async fn history(&self, signature: &Signature) -> Result<Vec<TransitionRecord>, Error> {
        self.store.history(signature).await
    }

    pub async fn records(&self) -> Result<Vec<ContainmentRecord>, Error> {
        self.store.records().await
    }

    /// Flush and release the durable store.
    pub async fn close(&self) {
        self.store.close().await;
    }
}

/// Exclusive right to read-decide-write the record of one signature.
pub struct SignatureLease<'a> {
    ledger: &'a ContainmentLedger,
    signature: Signature,
    _guard: OwnedMutexGuard<()>,
}

impl SignatureLease<'_> {
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub async fn record(&self) -> Result<Option<ContainmentRecord>, Error> {
        self.ledger.store.load(&self.signature).await
    }

    /// Current state; a signature without a record is unblocked.
    pub async fn state(&self) -> Result<ContainmentState, Error> {
        Ok(self
            .record()
            .await?
            .map(|record| record.state)
            .unwrap_or_default())
    }

    /// Move the record to `Blocked`, creating it if needed. Call only after
    /// the enforcement action has been confirmed.
    pub async fn transition_to_blocked(
        &mut self,
        handle: EnforcementHandle,
        diagnostic: impl Into<String>,
    ) -> Result<TransitionOutcome, Error> {
        let previous = self.state().await?;
        if previous == ContainmentState::Blocked {
            return Ok(TransitionOutcome::AlreadyInState(previous));
        }
        self.apply(previous, ContainmentState::Blocked, Some(handle), diagnostic.into())
            .await
    }

    /// Move the record to `Unblocked`. A signature that was never blocked is
    /// already unblocked and gets no record.
    pub async fn transition_to_unblocked(
        &mut self,
        diagnostic: impl Into<String>,
    ) -> Result<TransitionOutcome, Error> {
        let Some(record) = self.record().await? else {
            return Ok(TransitionOutcome::AlreadyInState(ContainmentState::Unblocked));
        };
        if record.state == ContainmentState::Unblocked {
            return Ok(TransitionOutcome::AlreadyInState(record.state));
        }
        self.apply(
            record.state,
            ContainmentState::Unblocked,
            record.handle,
            diagnostic.into(),
        )
        .await
    }

    async fn apply(
        &mut self,
        previous: ContainmentState,
        applied: ContainmentState,
        handle: Option<EnforcementHandle>,
        diagnostic: String,
    ) -> Result<TransitionOutcome, Error> {
        let transition = TransitionRecord {
            signature: self.signature,
            from: previous,
            to: applied,
            handle,
            diagnostic,
            at: self.ledger.clock.now(),
        };

        if !self.ledger.store.commit(&transition).await? {
            // Another process sharing the store got there first.
            warn!(signature = %self.signature, %applied, "ledger changed underneath lease");
            return Ok(TransitionOutcome::AlreadyInState(applied));
        }

        info!(signature = %self.signature, %previous, %applied, "containment transition recorded");
        Ok(TransitionOutcome::Applied { previous, applied })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::domain::name_size_signature;
    use crate::persistence::MemoryLedgerStore;

    fn ledger() -> ContainmentLedger {
        ContainmentLedger::new(Box::new(MemoryLedgerStore::new()), Box::new(SystemClock))
    }

    fn handle() -> EnforcementHandle {
        EnforcementHandle::new("vg-block-a955e40c7835ec35")
    }

    #[tokio::test]
    async fn block_twice_records_once() {
        let ledger = ledger();
        let signature = name_size_signature("sample.bin", 1024);

        let first = ledger
            .transition_to_blocked(signature, handle(), "started")
            .await
            .unwrap();
        assert_eq!(
            first,
            TransitionOutcome::Applied {
                previous: ContainmentState::Unblocked,
                applied: ContainmentState::Blocked,
            }
        );

        let second = ledger
            .transition_to_blocked(signature, handle(), "started again")
            .await
            .unwrap();
        assert_eq!(
            second,
            TransitionOutcome::AlreadyInState(ContainmentState::Blocked)
        );

        let record = ledger.lookup(&signature).await.unwrap().unwrap();
        assert_eq!(record.diagnostic, "started");
        assert_eq!(ledger.history(&signature).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unblock_without_record_creates_nothing() {
        let ledger = ledger();
        let signature = name_size_signature("never.bin", 1);

        let outcome = ledger
            .transition_to_unblocked(signature, "")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TransitionOutcome::AlreadyInState(ContainmentState::Unblocked)
        );
        assert!(ledger.lookup(&signature).await.unwrap().is_none());
        assert!(ledger.records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unblock_keeps_last_handle() {
        let ledger = ledger();
        let signature = name_size_signature("sample.bin", 1024);
        ledger
            .transition_to_blocked(signature, handle(), "started")
            .await
            .unwrap();

        let outcome = ledger
            .transition_to_unblocked(signature, "removed")
            .await
            .unwrap();
        assert!(outcome.is_applied());
        assert_eq!(outcome.state(), ContainmentState::Unblocked);

        let record = ledger.lookup(&signature).await.unwrap().unwrap();
        assert_eq!(record.handle, Some(handle()));
        assert_eq!(record.diagnostic, "removed");

        let history = ledger.history(&signature).await.unwrap();
        let states: Vec<_> = history.iter().map(|t| (t.from, t.to)).collect();
        assert_eq!(
            states,
            vec![
                (ContainmentState::Unblocked, ContainmentState::Blocked),
                (ContainmentState::Blocked, ContainmentState::Unblocked),
            ]
        );
    }

    #[tokio::test]
    async fn lease_excludes_same_signature_only() {
        use std::time::Duration;
        use tokio::time::timeout;

        let ledger = ledger();
        let a = name_size_signature("a.bin", 1);
        let b = name_size_signature("b.bin", 1);

        let _lease = ledger.acquire(a).await;
        assert!(
            timeout(Duration::from_millis(50), ledger.acquire(a))
                .await
                .is_err()
        );
        assert!(
            timeout(Duration::from_millis(500), ledger.acquire(b))
                .await
                .is_ok()
        );
    }
}
