use crate::cli::{Action, Request, Target};
use config::Config;
use orchestrator::enforcement::{
    self, ContainerRuntime, ProcfsTerminator, TerminationReport, Terminator,
};
use orchestrator::scanning::{self, ScanReport, YaraMatcher};
use orchestrator::{
    BlockResult, ContainmentController, ContainmentRecord, EnforcementHandle, EnforcementStage,
    Error, HandlePurpose, Signature, StatusReport, UnblockResult,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Result of one dispatched action, ready to be shown to the operator.
#[derive(Debug, Clone)]
pub enum Outcome {
    Scanned {
        signature: Signature,
        rules_dir: PathBuf,
        report: ScanReport,
    },
    Terminated(TerminationReport),
    Isolated {
        handle: EnforcementHandle,
        diagnostic: String,
    },
    Blocked(BlockResult),
    Unblocked(UnblockResult),
    Status(StatusReport),
    Records(Vec<ContainmentRecord>),
}

/// Routes a validated request to the collaborator that carries it out.
pub struct Dispatcher {
    config: Config,
    controller: ContainmentController,
}

impl Dispatcher {
    pub fn new(config: Config, controller: ContainmentController) -> Self {
        Self { config, controller }
    }

    pub async fn run(&self, request: &Request) -> Result<Outcome, Error> {
        debug!(?request, "dispatching");
        match (&request.action, &request.target) {
            (Action::Status, Target::AllRecords) => {
                Ok(Outcome::Records(self.controller.ledger().records().await?))
            }
            (Action::Status, Target::Signature(signature)) => Ok(Outcome::Status(
                self.controller.status_signature(*signature).await?,
            )),
            (Action::Unblock, Target::Signature(signature)) => Ok(Outcome::Unblocked(
                self.controller.unblock_signature(*signature).await?,
            )),
            (action, Target::Artifact(path)) => self.run_on_artifact(*action, path).await,
            (action, target) => Err(Error::UnsupportedRequest {
                action: format!("{action:?}"),
                target: format!("{target:?}"),
            }),
        }
    }

    async fn run_on_artifact(&self, action: Action, path: &Path) -> Result<Outcome, Error> {
        match action {
            Action::Scan => self.scan(path).await,
            Action::Terminate => self.terminate(path).await,
            Action::Isolate => self.isolate(path).await,
            Action::Block | Action::BlockSignature => {
                Ok(Outcome::Blocked(self.controller.block(path).await?))
            }
            Action::Unblock => Ok(Outcome::Unblocked(self.controller.unblock(path).await?)),
            Action::Status => Ok(Outcome::Status(self.controller.status(path).await?)),
        }
    }

    async fn scan(&self, path: &Path) -> Result<Outcome, Error> {
        let (artifact, signature) = self.controller.identify(path).await?;
        let rules_dir = self.config.scan.rules_dir.clone();
        let rules = scanning::discover_rules(&rules_dir)?;
        info!(
            %signature,
            rules = rules.len(),
            rules_dir = %rules_dir.display(),
            "scanning sample"
        );
        let matcher = YaraMatcher::new(&self.config.scan);
        let report =
            scanning::scan_with_rules(&matcher, &artifact.path, &rules, self.config.scan.concurrency)
                .await;
        Ok(Outcome::Scanned {
            signature,
            rules_dir,
            report,
        })
    }

    async fn terminate(&self, path: &Path) -> Result<Outcome, Error> {
        let (artifact, signature) = self.controller.identify(path).await?;
        info!(%signature, "terminating sample processes");
        let limit = self.config.enforcement.timeout;
        let report = tokio::time::timeout(limit, ProcfsTerminator.terminate_all(&artifact))
            .await
            .map_err(|_| Error::EnforcementTimeout {
                stage: EnforcementStage::Start,
                timeout: limit,
            })??;
        if !report.success() {
            return Err(Error::EnforcementFailed {
                stage: EnforcementStage::Start,
                diagnostic: report.diagnostic(),
            });
        }
        Ok(Outcome::Terminated(report))
    }

    /// One-off isolation run. Not recorded in the ledger; `block` is the
    /// tracked form of the same containment.
    async fn isolate(&self, path: &Path) -> Result<Outcome, Error> {
        let (artifact, signature) = self.controller.identify(path).await?;
        let handle = self.controller.handle_for(HandlePurpose::Isolate, &signature);
        let runtime = ContainerRuntime::new(&self.config.container);
        let diagnostic = enforcement::with_timeout(
            EnforcementStage::Start,
            self.config.enforcement.timeout,
            runtime.run_disposable(&artifact, &handle),
        )
        .await?;
        Ok(Outcome::Isolated { handle, diagnostic })
    }

    /// Undo whatever an interrupted `run` of `request` may have started.
    ///
    /// A block whose start was never recorded has its unit stopped, and an
    /// isolation unit is removed. Other actions leave nothing behind.
    pub async fn release_abandoned(&self, request: &Request) -> Result<(), Error> {
        let Target::Artifact(path) = &request.target else {
            return Ok(());
        };
        match request.action {
            Action::Block | Action::BlockSignature => {
                let (_, signature) = self.controller.identify(path).await?;
                if self.controller.release_unrecorded(signature).await? {
                    info!(%signature, "released abandoned block");
                }
            }
            Action::Isolate => {
                let (_, signature) = self.controller.identify(path).await?;
                let handle = self.controller.handle_for(HandlePurpose::Isolate, &signature);
                let runtime = ContainerRuntime::new(&self.config.container);
                enforcement::with_timeout(
                    EnforcementStage::Stop,
                    self.config.enforcement.timeout,
                    runtime.stop_isolation(&handle),
                )
                .await?;
                info!(%handle, "released abandoned isolation");
            }
            Action::Scan | Action::Terminate | Action::Unblock | Action::Status => {}
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.controller.close().await;
    }
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn write_record(f: &mut fmt::Formatter<'_>, record: &ContainmentRecord) -> fmt::Result {
    writeln!(f, "state: {}", record.state)?;
    if let Some(handle) = &record.handle {
        writeln!(f, "handle: {handle}")?;
    }
    writeln!(f, "updated: {} (unix seconds)", unix_seconds(record.updated_at))?;
    if !record.diagnostic.is_empty() {
        writeln!(f, "diagnostic: {}", record.diagnostic)?;
    }
    Ok(())
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scanned {
                signature,
                rules_dir,
                report,
            } => {
                writeln!(f, "signature: {signature}")?;
                if report.verdicts.is_empty() && report.failures.is_empty() {
                    return writeln!(f, "no rules found in {}", rules_dir.display());
                }
                for verdict in report.matches() {
                    writeln!(f, "match: {}", verdict.rule.display())?;
                    if !verdict.verdict.diagnostic.is_empty() {
                        writeln!(f, "{}", verdict.verdict.diagnostic)?;
                    }
                }
                for failure in &report.failures {
                    writeln!(f, "rule failed: {}: {}", failure.rule.display(), failure.reason)?;
                }
                writeln!(
                    f,
                    "{} of {} rule(s) matched",
                    report.matches().count(),
                    report.verdicts.len() + report.failures.len()
                )?;
                writeln!(
                    f,
                    "verdict: {}",
                    if report.is_match() { "malicious" } else { "no match" }
                )
            }
            Self::Terminated(report) => writeln!(f, "{}", report.diagnostic()),
            Self::Isolated { handle, diagnostic } => {
                writeln!(f, "isolated in {handle}")?;
                if !diagnostic.is_empty() {
                    writeln!(f, "{diagnostic}")?;
                }
                Ok(())
            }
            Self::Blocked(BlockResult::Blocked {
                signature,
                handle,
                diagnostic,
            }) => {
                writeln!(f, "blocked {signature} ({handle})")?;
                if !diagnostic.is_empty() {
                    writeln!(f, "{diagnostic}")?;
                }
                Ok(())
            }
            Self::Blocked(BlockResult::AlreadyBlocked { signature, .. }) => {
                writeln!(f, "{signature} is already blocked")
            }
            Self::Unblocked(UnblockResult::Unblocked {
                signature,
                handle,
                diagnostic,
            }) => {
                writeln!(f, "unblocked {signature} ({handle})")?;
                if !diagnostic.is_empty() {
                    writeln!(f, "{diagnostic}")?;
                }
                Ok(())
            }
            Self::Unblocked(UnblockResult::AlreadyClear { signature }) => {
                writeln!(f, "{signature} is not blocked")
            }
            Self::Status(status) => {
                writeln!(f, "signature: {}", status.signature)?;
                match &status.record {
                    Some(record) => write_record(f, record)?,
                    None => writeln!(f, "state: unblocked (no record)")?,
                }
                for transition in &status.history {
                    writeln!(
                        f,
                        "history: {} {} -> {}",
                        unix_seconds(transition.at),
                        transition.from,
                        transition.to
                    )?;
                }
                Ok(())
            }
            Self::Records(records) => {
                if records.is_empty() {
                    return writeln!(f, "ledger is empty");
                }
                for record in records {
                    let handle = record.handle.as_ref().map_or("-", EnforcementHandle::as_str);
                    writeln!(f, "{} {} {}", record.signature, record.state, handle)?;
                }
                Ok(())
            }
        }
    }
}
