#![forbid(unsafe_code)]

pub mod command;
mod container;
mod termination;

pub use container::{ContainerEnforcement, ContainerRuntime};
pub use termination::{ProcfsTerminator, TerminationEnforcement, TerminationReport, Terminator};

use crate::domain::{Artifact, EnforcementHandle};
use crate::error::{EnforcementStage, Error};
use async_trait::async_trait;
use config::{Config, Mechanism};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Diagnostic text of a confirmed external action, or why it failed.
pub type EnforcementResult = Result<String, Error>;

/// The external mechanism that actually contains a blocked sample.
///
/// Both calls return only once the outcome is known: `Ok` means the action
/// is confirmed, anything else means it did not take effect.
#[async_trait]
pub trait Enforcement: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start containing `artifact` under the unit name `handle`.
    async fn start(&self, artifact: &Artifact, handle: &EnforcementHandle) -> EnforcementResult;

    /// Release the unit `handle`. Must succeed when the unit is already gone.
    async fn stop(&self, handle: &EnforcementHandle) -> EnforcementResult;
}

/// Build the mechanism selected in the configuration.
pub fn from_config(config: &Config) -> Box<dyn Enforcement> {
    match config.enforcement.mechanism {
        Mechanism::Container => Box::new(ContainerEnforcement::new(ContainerRuntime::new(
            &config.container,
        ))),
        Mechanism::Terminate => Box::new(TerminationEnforcement::new(Box::new(ProcfsTerminator))),
    }
}

/// Run one enforcement invocation, giving up after `limit`.
///
/// Dropping the invocation kills any child process it spawned.
pub async fn with_timeout(
    stage: EnforcementStage,
    limit: Duration,
    action: impl Future<Output = EnforcementResult>,
) -> EnforcementResult {
    match tokio::time::timeout(limit, action).await {
        Ok(result) => result,
        Err(_) => {
            warn!(%stage, timeout = ?limit, "enforcement timed out");
            Err(Error::EnforcementTimeout {
                stage,
                timeout: limit,
            })
        }
    }
}
