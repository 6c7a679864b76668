use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::path::PathBuf;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Scan {
    /// Directory searched recursively for `*.yar` and `*.yara` rule files.
    pub rules_dir: PathBuf,

    /// The `yara` binary used to match a single rule file against a sample.
    pub yara: PathBuf,

    /// Upper bound for matching one rule file. A rule that times out is
    /// reported as failed and scanning continues. **Measured in seconds**.
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub timeout: Duration,

    /// Number of rule files matched in parallel. Zero is treated as one.
    pub concurrency: usize,
}

impl Default for Scan {
    fn default() -> Self {
        Self {
            rules_dir: PathBuf::from("./YaraRules"),
            yara: PathBuf::from("yara"),
            timeout: Duration::from_secs(30),
            concurrency: 4,
        }
    }
}
