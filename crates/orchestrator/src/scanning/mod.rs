#![forbid(unsafe_code)]

mod rules;
mod yara;

pub use rules::discover_rules;
pub use yara::YaraMatcher;

use crate::error::Error;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanVerdict {
    pub matched: bool,
    pub diagnostic: String,
}

#[async_trait]
pub trait RuleMatcher: Send + Sync {
    /// Match one rule file against the artifact.
    async fn scan(&self, artifact: &Path, rule: &Path) -> Result<ScanVerdict, Error>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleVerdict {
    pub rule: PathBuf,
    pub verdict: ScanVerdict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFailure {
    pub rule: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Rules that ran to completion, in rule order.
    pub verdicts: Vec<RuleVerdict>,
    /// Rules that could not be evaluated, in rule order.
    pub failures: Vec<RuleFailure>,
}

impl ScanReport {
    pub fn matches(&self) -> impl Iterator<Item = &RuleVerdict> {
        self.verdicts.iter().filter(|v| v.verdict.matched)
    }

    pub fn is_match(&self) -> bool {
        self.matches().next().is_some()
    }
}

/// Match every rule against the artifact, `concurrency` rules at a time.
///
/// A rule that fails is recorded in the report; the remaining rules still run.
pub async fn scan_with_rules(
    matcher: &dyn RuleMatcher,
    artifact: &Path,
    rules: &[PathBuf],
    concurrency: usize,
) -> ScanReport {
    let mut results: Vec<(usize, Result<ScanVerdict, Error>)> = stream::iter(rules.iter().enumerate())
        .map(|(index, rule)| async move { (index, matcher.scan(artifact, rule).await) })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;
    results.sort_by_key(|(index, _)| *index);

    let mut report = ScanReport::default();
    for (index, result) in results {
        let rule = rules[index].clone();
        match result {
            Ok(verdict) => {
                debug!(rule = %rule.display(), matched = verdict.matched, "rule evaluated");
                report.verdicts.push(RuleVerdict { rule, verdict });
            }
            Err(err) => {
                warn!(rule = %rule.display(), %err, "rule failed");
                report.failures.push(RuleFailure {
                    rule,
                    reason: err.to_string(),
                });
            }
        }
    }
    report
}
