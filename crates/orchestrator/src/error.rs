#![forbid(unsafe_code)]

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Which half of an enforcement mechanism was being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementStage {
    Start,
    Stop,
}

impl fmt::Display for EnforcementStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("start"),
            Self::Stop => f.write_str("stop"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("metadata: cannot inspect artifact {path:?}: {source}")]
    MetadataUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("enforcement: {stage} action failed: {diagnostic}")]
    EnforcementFailed {
        stage: EnforcementStage,
        diagnostic: String,
    },

    #[error("enforcement: {stage} action timed out after {timeout:?}")]
    EnforcementTimeout {
        stage: EnforcementStage,
        timeout: Duration,
    },

    #[error("scan: rule {rule:?} failed: {diagnostic}")]
    RuleFailed { rule: PathBuf, diagnostic: String },

    #[error("ledger: store unavailable: {0}")]
    LedgerUnavailable(#[from] sqlx::Error),

    #[error("ledger: migration failed: {0}")]
    LedgerMigration(#[from] sqlx::migrate::MigrateError),

    #[error("ledger: corrupt record: {0}")]
    LedgerCorrupt(String),

    #[error("invalid signature {0:?}: expected 64 hexadecimal characters")]
    InvalidSignature(String),

    #[error("failed to read procfs: {0}")]
    Procfs(#[from] procfs::ProcError),

    #[error("request: {action} cannot act on {target}")]
    UnsupportedRequest { action: String, target: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
