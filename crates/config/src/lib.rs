#![forbid(unsafe_code)]

mod container;
mod enforcement;
mod error;
mod ledger;
mod scan;
mod signature_scheme;

pub use container::Container;
pub use enforcement::{Enforcement, Mechanism};
pub use error::Error;
pub use ledger::{Ledger, Log};
pub use scan::Scan;
pub use signature_scheme::{Signature, SignatureScheme};

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub ledger: Ledger,
    pub signature: Signature,
    pub enforcement: Enforcement,
    pub container: Container,
    pub scan: Scan,
    pub log: Log,
}

impl Config {
    /// Load configuration from a TOML file. Missing fields are filled with defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        let mut config: Config = toml_edit::de::from_str(&text)?;
        config.apply_defaults()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let toml = toml_edit::ser::to_string_pretty(self)?;
        std::fs::write(path, toml)?;
        Ok(())
    }

    /// Load configuration from multiple TOML files. Later files override earlier ones.
    /// Files that do not exist are skipped.
    pub fn load_multiple<T, U>(paths: U) -> Result<Self, Error>
    where
        T: AsRef<Path>,
        U: IntoIterator<Item = T>,
    {
        let mut merged = toml_edit::DocumentMut::new();
        for path in paths {
            let path = path.as_ref();
            if !path.exists() {
                continue;
            }
            let text = std::fs::read_to_string(path)?;
            let doc: toml_edit::DocumentMut = text.parse()?;
            merge_document(&mut merged, doc);
        }
        let mut config: Config = toml_edit::de::from_str(&merged.to_string())?;
        config.apply_defaults()?;
        Ok(config)
    }

    fn apply_defaults(&mut self) -> Result<(), Error> {
        self.scan.concurrency = self.scan.concurrency.max(1);
        if !self.enforcement.handle_prefix_is_valid() {
            return Err(Error::InvalidHandlePrefix(
                self.enforcement.handle_prefix.clone(),
            ));
        }
        Ok(())
    }
}

fn merge_document(target: &mut toml_edit::DocumentMut, source: toml_edit::DocumentMut) {
    for (key, item) in source.iter() {
        merge_item(
            target.entry(key).or_insert(toml_edit::Item::None),
            item.clone(),
        );
    }
}

fn merge_item(target: &mut toml_edit::Item, source: toml_edit::Item) {
    use toml_edit::Item;
    match (target, source) {
        (Item::Table(target_table), Item::Table(source_table)) => {
            for (key, item) in source_table.iter() {
                merge_item(target_table.entry(key).or_insert(Item::None), item.clone());
            }
        }
        (Item::ArrayOfTables(target_array), Item::ArrayOfTables(source_array)) => {
            for table in source_array.iter() {
                target_array.push(table.clone());
            }
        }
        (target_item, source_item) => {
            *target_item = source_item;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::default();
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();

        assert_eq!(config, loaded);
    }

    #[test]
    fn load_multiple_merges() {
        let dir = tempdir().unwrap();
        let path1 = dir.path().join("a.toml");
        let path2 = dir.path().join("b.toml");

        std::fs::write(
            &path1,
            "[enforcement]\nmechanism = \"terminate\"\ntimeout = 5\n[scan]\nrules_dir = \"/srv/rules\"\n",
        )
        .unwrap();
        std::fs::write(&path2, "[enforcement]\ntimeout = 10\n[signature]\nscheme = \"content\"\n")
            .unwrap();

        let cfg = Config::load_multiple([path1, path2]).unwrap();
        assert_eq!(cfg.enforcement.mechanism, Mechanism::Terminate);
        assert_eq!(cfg.enforcement.timeout, Duration::from_secs(10));
        assert_eq!(cfg.scan.rules_dir, PathBuf::from("/srv/rules"));
        assert_eq!(cfg.signature.scheme, SignatureScheme::Content);
        assert_eq!(cfg.container, Container::default());
    }

    #[test]
    fn load_multiple_skips_missing_files() {
        let dir = tempdir().unwrap();
        let cfg = Config::load_multiple([dir.path().join("absent.toml")]).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn zero_concurrency_is_raised_to_one() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[scan]\nconcurrency = 0\n").unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.scan.concurrency, 1);
    }

    #[test]
    fn invalid_handle_prefix_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[enforcement]\nhandle_prefix = \"bad/prefix\"\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, Error::InvalidHandlePrefix(prefix) if prefix == "bad/prefix"));
    }
}
