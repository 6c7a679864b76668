#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::domain::{
    Artifact, ContainmentRecord, EnforcementHandle, HandlePurpose, Signature, SignatureCalculator,
    TransitionRecord,
};
use crate::enforcement::{self, Enforcement, EnforcementResult};
use crate::error::{EnforcementStage, Error};
use crate::ledger::{ContainmentLedger, TransitionOutcome};
use crate::persistence::LedgerStore;
use config::Config;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct Services {
    pub enforcement: Box<dyn Enforcement>,
    pub store: Box<dyn LedgerStore>,
    pub clock: Box<dyn Clock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockResult {
    /// Enforcement started and the record is now `Blocked`.
    Blocked {
        signature: Signature,
        handle: EnforcementHandle,
        diagnostic: String,
    },
    /// The signature was already blocked; nothing was invoked.
    AlreadyBlocked {
        signature: Signature,
        record: Option<ContainmentRecord>,
    },
}

impl BlockResult {
    pub fn signature(&self) -> &Signature {
        match self {
            Self::Blocked { signature, .. } | Self::AlreadyBlocked { signature, .. } => signature,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnblockResult {
    /// Enforcement stopped and the record is now `Unblocked`.
    Unblocked {
        signature: Signature,
        handle: EnforcementHandle,
        diagnostic: String,
    },
    /// The signature was not blocked; nothing was invoked.
    AlreadyClear { signature: Signature },
}

impl UnblockResult {
    pub fn signature(&self) -> &Signature {
        match self {
            Self::Unblocked { signature, .. } | Self::AlreadyClear { signature } => signature,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub signature: Signature,
    pub record: Option<ContainmentRecord>,
    /// Oldest first.
    pub history: Vec<TransitionRecord>,
}

impl StatusReport {
    pub fn is_blocked(&self) -> bool {
        self.record.as_ref().is_some_and(ContainmentRecord::is_blocked)
    }
}

/// Blocks and unblocks samples by signature, keeping the ledger in step with
/// the enforcement mechanism.
///
/// For one signature the external action and the ledger commit happen under
/// the same lease, so no two actions for it ever overlap and the ledger only
/// records actions that were confirmed.
pub struct ContainmentController {
    calculator: SignatureCalculator,
    enforcement: Box<dyn Enforcement>,
    ledger: ContainmentLedger,
    handle_prefix: String,
    timeout: Duration,
}

impl ContainmentController {
    pub fn new(config: &Config, services: Services) -> Self {
        Self {
            calculator: SignatureCalculator::new(config.signature.scheme),
            enforcement: services.enforcement,
            ledger: ContainmentLedger::new(services.store, services.clock),
            handle_prefix: config.enforcement.handle_prefix.clone(),
            timeout: config.enforcement.timeout,
        }
    }

    pub fn ledger(&self) -> &ContainmentLedger {
        &self.ledger
    }

    pub fn handle_for(&self, purpose: HandlePurpose, signature: &Signature) -> EnforcementHandle {
        EnforcementHandle::derive(&self.handle_prefix, purpose, signature)
    }

    /// Inspect the file at `path` and compute its signature.
    pub async fn identify(&self, path: impl Into<PathBuf>) -> Result<(Artifact, Signature), Error> {
        let path = path.into();
        let calculator = self.calculator;
        tokio::task::spawn_blocking(move || {
            let artifact = Artifact::inspect(&path)?;
            let signature = calculator.compute(&artifact)?;
            Ok((artifact, signature))
        })
        .await
        .map_err(|err| Error::Io(std::io::Error::other(err)))?
    }

    pub async fn block(&self, path: impl AsRef<Path>) -> Result<BlockResult, Error> {
        let (artifact, signature) = self.identify(path.as_ref()).await?;
        let mut lease = self.ledger.acquire(signature).await;

        if let Some(record) = lease.record().await?
            && record.is_blocked()
        {
            debug!(%signature, "already blocked");
            return Ok(BlockResult::AlreadyBlocked {
                signature,
                record: Some(record),
            });
        }

        let handle = self.handle_for(HandlePurpose::Block, &signature);
        info!(
            %signature,
            %handle,
            mechanism = self.enforcement.name(),
            artifact = %artifact.path.display(),
            "starting enforcement"
        );
        let diagnostic = match self
            .invoke(
                EnforcementStage::Start,
                self.enforcement.start(&artifact, &handle),
            )
            .await
        {
            Ok(diagnostic) => diagnostic,
            Err(err) => {
                // A failed or timed-out start may still have created the unit.
                warn!(%signature, %handle, %err, "start not confirmed, releasing unit");
                self.compensate(&signature, &handle).await;
                return Err(err);
            }
        };

        match lease
            .transition_to_blocked(handle.clone(), diagnostic.clone())
            .await
        {
            Ok(TransitionOutcome::Applied { .. }) => Ok(BlockResult::Blocked {
                signature,
                handle,
                diagnostic,
            }),
            Ok(TransitionOutcome::AlreadyInState(_)) => {
                let record = lease.record().await?;
                Ok(BlockResult::AlreadyBlocked { signature, record })
            }
            Err(err) => {
                warn!(%signature, %handle, %err, "ledger commit failed, rolling back enforcement");
                self.compensate(&signature, &handle).await;
                Err(err)
            }
        }
    }

    /// Stop the block unit of a signature the ledger does not hold as blocked.
    ///
    /// Used after a block was abandoned midway, e.g. on interrupt, when the
    /// mechanism may have started without the ledger recording it. Returns
    /// `false` without touching the mechanism if the signature is blocked.
    pub async fn release_unrecorded(&self, signature: Signature) -> Result<bool, Error> {
        let lease = self.ledger.acquire(signature).await;
        if lease.record().await?.is_some_and(|record| record.is_blocked()) {
            return Ok(false);
        }
        let handle = self.handle_for(HandlePurpose::Block, &signature);
        info!(%signature, %handle, "releasing unrecorded enforcement");
        self.invoke(EnforcementStage::Stop, self.enforcement.stop(&handle)).await?;
        Ok(true)
    }

    pub async fn unblock(&self, path: impl AsRef<Path>) -> Result<UnblockResult, Error> {
        let (_, signature) = self.identify(path.as_ref()).await?;
        self.unblock_signature(signature).await
    }

    /// Unblock by signature alone, for samples that no longer exist on disk.
    pub async fn unblock_signature(&self, signature: Signature) -> Result<UnblockResult, Error> {
        let mut lease = self.ledger.acquire(signature).await;

        let record = match lease.record().await? {
            Some(record) if record.is_blocked() => record,
            _ => {
                debug!(%signature, "not blocked");
                return Ok(UnblockResult::AlreadyClear { signature });
            }
        };

        let handle = record
            .handle
            .unwrap_or_else(|| self.handle_for(HandlePurpose::Block, &signature));
        info!(
            %signature,
            %handle,
            mechanism = self.enforcement.name(),
            "stopping enforcement"
        );
        let diagnostic = self
            .invoke(EnforcementStage::Stop, self.enforcement.stop(&handle))
            .await?;

        match lease.transition_to_unblocked(diagnostic.clone()).await? {
            TransitionOutcome::Applied { .. } => Ok(UnblockResult::Unblocked {
                signature,
                handle,
                diagnostic,
            }),
            TransitionOutcome::AlreadyInState(_) => Ok(UnblockResult::AlreadyClear { signature }),
        }
    }

    pub async fn status(&self, path: impl AsRef<Path>) -> Result<StatusReport, Error> {
        let (_, signature) = self.identify(path.as_ref()).await?;
        self.status_signature(signature).await
    }

    pub async fn status_signature(&self, signature: Signature) -> Result<StatusReport, Error> {
        Ok(StatusReport {
            signature,
            record: self.ledger.lookup(&signature).await?,
            history: self.ledger.history(&signature).await?,
        })
    }

    pub async fn close(&self) {
        self.ledger.close().await;
    }

    async fn compensate(&self, signature: &Signature, handle: &EnforcementHandle) {
        if let Err(err) = self
            .invoke(EnforcementStage::Stop, self.enforcement.stop(handle))
            .await
        {
            warn!(%signature, %handle, %err, "compensating stop failed");
        }
    }

    async fn invoke(
        &self,
        stage: EnforcementStage,
        action: impl Future<Output = EnforcementResult>,
    ) -> EnforcementResult {
        enforcement::with_timeout(stage, self.timeout, action).await
    }
}
