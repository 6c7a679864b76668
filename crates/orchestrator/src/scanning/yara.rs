#![forbid(unsafe_code)]

use crate::enforcement::command;
use crate::error::Error;
use crate::scanning::{RuleMatcher, ScanVerdict};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Matches rule files by running the `yara` command line tool once per rule.
#[derive(Debug, Clone)]
pub struct YaraMatcher {
    binary: PathBuf,
    timeout: Duration,
}

impl YaraMatcher {
    pub fn new(config: &config::Scan) -> Self {
        Self {
            binary: config.yara.clone(),
            timeout: config.timeout,
        }
    }
}

#[async_trait]
impl RuleMatcher for YaraMatcher {
    async fn scan(&self, artifact: &Path, rule: &Path) -> Result<ScanVerdict, Error> {
        let failed = |diagnostic: String| Error::RuleFailed {
            rule: rule.to_path_buf(),
            diagnostic,
        };

        let mut cmd = Command::new(&self.binary);
        cmd.arg(rule).arg(artifact);
        let output = timeout(self.timeout, command::run(cmd))
            .await
            .map_err(|_| failed(format!("timed out after {:?}", self.timeout)))?
            .map_err(|err| failed(format!("cannot run {}: {err}", self.binary.display())))?;

        if !output.success() {
            return Err(failed(output.failure_diagnostic()));
        }
        // yara prints one line per matching rule and nothing otherwise.
        Ok(ScanVerdict {
            matched: !output.stdout.trim().is_empty(),
            diagnostic: output.diagnostic(),
        })
    }
}
