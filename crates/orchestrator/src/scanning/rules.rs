#![forbid(unsafe_code)]

use crate::error::Error;
use std::path::{Path, PathBuf};
use tracing::{trace, warn};

const RULE_EXTENSIONS: [&str; 2] = ["yar", "yara"];

/// Every rule file below `dir`, recursively, in path order.
///
/// A missing directory yields no rules; unreadable entries are skipped.
pub fn discover_rules(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let root = glob::Pattern::escape(&dir.to_string_lossy());
    let mut rules = Vec::new();
    for extension in RULE_EXTENSIONS {
        let pattern = format!("{root}/**/*.{extension}");
        let entries = glob::glob(&pattern).map_err(|err| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                err.to_string(),
            ))
        })?;
        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => rules.push(path),
                Ok(_) => {}
                Err(err) => warn!(%err, "skipping unreadable rule entry"),
            }
        }
    }
    rules.sort();
    rules.dedup();
    trace!(?rules, "rule files discovered");
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn finds_nested_rules_in_order() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("malware/packers")).unwrap();
        std::fs::write(dir.path().join("b.yar"), "").unwrap();
        std::fs::write(dir.path().join("a.yara"), "").unwrap();
        std::fs::write(dir.path().join("malware/packers/upx.yar"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();

        let rules = discover_rules(dir.path()).unwrap();
        assert_eq!(
            rules,
            vec![
                dir.path().join("a.yara"),
                dir.path().join("b.yar"),
                dir.path().join("malware/packers/upx.yar"),
            ]
        );
    }

    #[test]
    fn missing_directory_has_no_rules() {
        let dir = tempdir().unwrap();
        assert!(discover_rules(&dir.path().join("absent")).unwrap().is_empty());
    }
}
