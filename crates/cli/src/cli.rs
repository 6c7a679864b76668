use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use orchestrator::Signature;
use std::path::{Path, PathBuf};

/// virusguard: malware containment toolkit
///
/// virusguard scans, terminates and isolates malware samples, and keeps a
/// durable ledger of which sample signatures are blocked. Blocking runs the
/// configured enforcement mechanism and records the block only once the
/// mechanism confirms it.
#[derive(Debug, Parser, Clone)]
#[command(about, long_about, version)]
pub struct Cli {
    /// Path of the sample to act on.
    #[arg(short, long, visible_alias = "malware")]
    pub artifact: Option<PathBuf>,

    /// What to do with the sample.
    #[arg(long, value_enum, ignore_case = true)]
    pub action: Action,

    /// With `--action blocksignature`: block the sample.
    #[arg(long, conflicts_with = "unblock")]
    pub block: bool,

    /// With `--action blocksignature`: unblock the sample.
    #[arg(long)]
    pub unblock: bool,

    /// Act on a signature (64 hex characters) instead of a file. Only for
    /// `unblock` and `status`, e.g. when the sample is gone from disk.
    #[arg(long, conflicts_with = "artifact", value_parser = parse_signature)]
    pub signature: Option<Signature>,

    /// With `--action status`: list every ledger record.
    #[arg(long, conflicts_with_all = ["artifact", "signature"])]
    pub all: bool,

    /// Path to configuration file.
    ///
    /// If not provided, the default locations are checked. They are
    /// `/etc/virusguard/config.toml` and `/etc/virusguard/config.d/*.toml`,
    /// where the latter being a glob pattern. If they don't exist, the default
    /// configuration is used.
    #[arg(short, long, value_parser = validate_file)]
    pub config: Option<PathBuf>,

    /// Ledger database file. Overrides `ledger.path` from the configuration.
    #[arg(long)]
    pub ledger: Option<PathBuf>,

    /// Keep the ledger in memory for this run only.
    #[arg(long, conflicts_with = "ledger")]
    pub no_persist: bool,

    /// Path to log file.
    ///
    /// Log lines are appended. If not provided, `log.file` from the
    /// configuration is used, and stderr when that is unset too.
    #[arg(short, long)]
    pub logfile: Option<PathBuf>,

    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Action {
    /// Match the sample against every rule in the rules directory.
    #[value(alias = "yarascan")]
    Scan,
    /// Kill every process running or referencing the sample.
    #[value(alias = "terminateprocess")]
    Terminate,
    /// Run the sample inside a locked-down container.
    #[value(alias = "dockercontainment")]
    Isolate,
    /// Contain the sample and record its signature as blocked.
    Block,
    /// Release the sample and record its signature as unblocked.
    Unblock,
    /// Show the ledger record of the sample.
    Status,
    /// Legacy spelling; requires `--block` or `--unblock`.
    #[value(name = "blocksignature")]
    BlockSignature,
}

impl Action {
    /// Whether the action reads or writes the containment ledger.
    pub fn uses_ledger(&self) -> bool {
        matches!(
            self,
            Self::Block | Self::Unblock | Self::Status | Self::BlockSignature
        )
    }
}

/// What a request acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Artifact(PathBuf),
    Signature(Signature),
    AllRecords,
}

/// A validated command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Never [`Action::BlockSignature`].
    pub action: Action,
    pub target: Target,
}

impl Cli {
    /// Resolve legacy spellings and check the argument combination.
    pub fn request(&self) -> Result<Request, clap::Error> {
        let usage = |kind: ErrorKind, message: &str| Cli::command().error(kind, message);

        let action = match (self.action, self.block, self.unblock) {
            (Action::BlockSignature, true, false) => Action::Block,
            (Action::BlockSignature, false, true) => Action::Unblock,
            (Action::BlockSignature, _, _) => {
                return Err(usage(
                    ErrorKind::MissingRequiredArgument,
                    "`--action blocksignature` requires `--block` or `--unblock`",
                ));
            }
            (action, false, false) => action,
            (_, _, _) => {
                return Err(usage(
                    ErrorKind::ArgumentConflict,
                    "`--block` and `--unblock` only apply to `--action blocksignature`",
                ));
            }
        };

        let target = if self.all {
            if action != Action::Status {
                return Err(usage(
                    ErrorKind::ArgumentConflict,
                    "`--all` only applies to `--action status`",
                ));
            }
            Target::AllRecords
        } else if let Some(signature) = self.signature {
            if !matches!(action, Action::Unblock | Action::Status) {
                return Err(usage(
                    ErrorKind::ArgumentConflict,
                    "`--signature` only applies to `unblock` and `status`",
                ));
            }
            Target::Signature(signature)
        } else if let Some(path) = &self.artifact {
            Target::Artifact(path.clone())
        } else {
            return Err(usage(
                ErrorKind::MissingRequiredArgument,
                "the following required arguments were not provided:\n  --artifact <ARTIFACT>",
            ));
        };

        Ok(Request { action, target })
    }
}

/// Check if the file exists.
#[inline(always)]
fn validate_file(file: &str) -> Result<PathBuf, String> {
    let path = Path::new(file);
    if path.exists() {
        Ok(path.to_owned())
    } else {
        Err(format!("File not found: {:?}", path))
    }
}

fn parse_signature(text: &str) -> Result<Signature, String> {
    text.parse().map_err(|err: orchestrator::Error| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn parse(args: &[&str]) -> Result<Request, clap::Error> {
        Cli::try_parse_from(std::iter::once("virusguard").chain(args.iter().copied()))?.request()
    }

    #[test]
    fn legacy_action_names_are_aliases() {
        for (legacy, action) in [
            ("yarascan", Action::Scan),
            ("terminateprocess", Action::Terminate),
            ("dockercontainment", Action::Isolate),
            ("YaraScan", Action::Scan),
            ("TerminateProcess", Action::Terminate),
            ("DockerContainment", Action::Isolate),
        ] {
            let request = parse(&["--malware", "sample.bin", "--action", legacy]).unwrap();
            assert_eq!(request.action, action);
            assert_eq!(request.target, Target::Artifact("sample.bin".into()));
        }

        let request = parse(&["-a", "s.bin", "--action", "BlockSignature", "--block"]).unwrap();
        assert_eq!(request.action, Action::Block);
        let request = parse(&["-a", "s.bin", "--action", "Status"]).unwrap();
        assert_eq!(request.action, Action::Status);
    }

    #[test]
    fn blocksignature_needs_a_direction() {
        let request = parse(&["-a", "s.bin", "--action", "blocksignature", "--block"]).unwrap();
        assert_eq!(request.action, Action::Block);
        let request = parse(&["-a", "s.bin", "--action", "blocksignature", "--unblock"]).unwrap();
        assert_eq!(request.action, Action::Unblock);

        let err = parse(&["-a", "s.bin", "--action", "blocksignature"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        let err = parse(&["-a", "s.bin", "--action", "blocksignature", "--block", "--unblock"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn missing_artifact_is_usage_error() {
        let err = parse(&["--action", "block"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn missing_action_is_usage_error() {
        let err = parse(&["--artifact", "sample.bin"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn unknown_action_lists_valid_ones() {
        let err = parse(&["-a", "s.bin", "--action", "quarantine"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
        let rendered = err.to_string();
        for name in ["scan", "terminate", "isolate", "block", "unblock", "status"] {
            assert!(rendered.contains(name), "{name} missing from {rendered}");
        }
    }

    #[test]
    fn status_all_needs_no_artifact() {
        let request = parse(&["--action", "status", "--all"]).unwrap();
        assert_eq!(request.target, Target::AllRecords);
        assert!(parse(&["--action", "block", "--all"]).is_err());
    }

    #[test]
    fn signature_target_only_for_unblock_and_status() {
        let hex = "a955e40c7835ec3560fbc70b336ec015f997328241778cd28e95112d9ff101ee";
        let request = parse(&["--action", "unblock", "--signature", hex]).unwrap();
        assert_eq!(request.target, Target::Signature(hex.parse().unwrap()));
        assert!(parse(&["--action", "block", "--signature", hex]).is_err());
        assert!(parse(&["--action", "status", "--signature", "abc"]).is_err());
    }

    #[test]
    fn ledger_actions() {
        assert!(Action::Block.uses_ledger());
        assert!(Action::Status.uses_ledger());
        assert!(!Action::Scan.uses_ledger());
        assert!(!Action::Isolate.uses_ledger());
    }

    proptest! {
        #[test]
        fn signature_argument_roundtrips(bytes in any::<[u8; 32]>()) {
            let signature = Signature::from_bytes(bytes);
            prop_assert_eq!(parse_signature(&signature.to_hex()), Ok(signature));
        }

        #[test]
        fn short_signature_is_rejected(text in "[0-9a-f]{0,63}") {
            prop_assert!(parse_signature(&text).is_err());
        }
    }
}
