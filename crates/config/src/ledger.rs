use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Ledger {
    /// SQLite database holding containment records and their history. Parent
    /// directories are created on first use.
    pub path: PathBuf,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/virusguard/ledger.db"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Log {
    /// Append log lines to this file instead of writing them to stderr.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}
