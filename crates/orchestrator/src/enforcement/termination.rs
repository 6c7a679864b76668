#![forbid(unsafe_code)]

use crate::domain::{Artifact, EnforcementHandle};
use crate::enforcement::{Enforcement, EnforcementResult};
use crate::error::{EnforcementStage, Error};
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of killing every process that references a sample.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminationReport {
    /// PIDs that were signalled (or had already exited).
    pub terminated: Vec<i32>,
    /// PIDs that could not be signalled, with the reason.
    pub failed: Vec<(i32, String)>,
}

impl TerminationReport {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn diagnostic(&self) -> String {
        let mut text = match self.terminated.len() {
            0 => "no running process references the artifact".to_owned(),
            n => format!("terminated {n} process(es): {:?}", self.terminated),
        };
        for (pid, reason) in &self.failed {
            text.push_str(&format!("\nfailed to terminate {pid}: {reason}"));
        }
        text
    }
}

#[async_trait]
pub trait Terminator: Send + Sync {
    /// Kill every running process associated with the artifact.
    async fn terminate_all(&self, artifact: &Artifact) -> Result<TerminationReport, Error>;
}

/// The two spellings under which a process can reference a sample.
#[derive(Debug, Clone)]
struct ArtifactPaths {
    given: PathBuf,
    canonical: Option<PathBuf>,
}

impl ArtifactPaths {
    fn new(path: &Path) -> Self {
        Self {
            given: path.to_path_buf(),
            canonical: std::fs::canonicalize(path).ok(),
        }
    }

    fn matches(&self, candidate: &Path) -> bool {
        candidate == self.given || self.canonical.as_deref() == Some(candidate)
    }

    /// A process references the artifact if it executes it or names it as
    /// one of its arguments.
    fn referenced_by(&self, exe: Option<&Path>, cmdline: &[String]) -> bool {
        exe.is_some_and(|exe| self.matches(exe))
            || cmdline.iter().any(|arg| self.matches(Path::new(arg)))
    }
}

/// Finds referencing processes through `/proc` and kills them with `SIGKILL`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcfsTerminator;

impl ProcfsTerminator {
    fn terminate_blocking(paths: &ArtifactPaths) -> Result<TerminationReport, Error> {
        let own_pid = std::process::id() as i32;
        let mut report = TerminationReport::default();

        for process in procfs::process::all_processes()? {
            let process = match process {
                Ok(p) => p,
                Err(err) => {
                    debug!(?err, "failed to read process entry");
                    continue;
                }
            };
            if process.pid == own_pid {
                continue;
            }
            let exe = process.exe().ok();
            let cmdline = process.cmdline().unwrap_or_default();
            if !paths.referenced_by(exe.as_deref(), &cmdline) {
                continue;
            }

            match kill(Pid::from_raw(process.pid), Signal::SIGKILL) {
                // Already gone counts as terminated.
                Ok(()) | Err(Errno::ESRCH) => {
                    debug!(pid = process.pid, "process terminated");
                    report.terminated.push(process.pid);
                }
                Err(errno) => {
                    warn!(pid = process.pid, %errno, "failed to terminate process");
                    report.failed.push((process.pid, errno.desc().to_owned()));
                }
            }
        }

        Ok(report)
    }
}

#[async_trait]
impl Terminator for ProcfsTerminator {
    async fn terminate_all(&self, artifact: &Artifact) -> Result<TerminationReport, Error> {
        let path = artifact.path.clone();
        let report =
            tokio::task::spawn_blocking(move || Self::terminate_blocking(&ArtifactPaths::new(&path)))
            .await
            .map_err(|err| Error::Io(std::io::Error::other(err)))??;
        info!(
            artifact = %artifact.path.display(),
            terminated = report.terminated.len(),
            failed = report.failed.len(),
            "termination finished"
        );
        Ok(report)
    }
}

/// Blocks a sample by killing whatever runs it. Unblocking has nothing to
/// restore.
pub struct TerminationEnforcement {
    terminator: Box<dyn Terminator>,
}

impl TerminationEnforcement {
    pub fn new(terminator: Box<dyn Terminator>) -> Self {
        Self { terminator }
    }
}

#[async_trait]
impl Enforcement for TerminationEnforcement {
    fn name(&self) -> &'static str {
        "terminate"
    }

    async fn start(&self, artifact: &Artifact, _handle: &EnforcementHandle) -> EnforcementResult {
        let report = self.terminator.terminate_all(artifact).await?;
        if report.success() {
            Ok(report.diagnostic())
        } else {
            Err(Error::EnforcementFailed {
                stage: EnforcementStage::Start,
                diagnostic: report.diagnostic(),
            })
        }
    }

    async fn stop(&self, _handle: &EnforcementHandle) -> EnforcementResult {
        Ok("nothing to restore after process termination".to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn referenced_by_exe_or_argument() {
        let paths = ArtifactPaths {
            given: PathBuf::from("./sample.bin"),
            canonical: Some(PathBuf::from("/srv/samples/sample.bin")),
        };
        assert!(paths.referenced_by(Some(Path::new("/srv/samples/sample.bin")), &[]));
        assert!(paths.referenced_by(None, &["tail".into(), "./sample.bin".into()]));
        assert!(!paths.referenced_by(
            Some(Path::new("/usr/bin/tail")),
            &["tail".into(), "/srv/samples/other.bin".into()]
        ));
    }

    #[test]
    fn diagnostic_lists_failures() {
        let report = TerminationReport {
            terminated: vec![10],
            failed: vec![(11, "Operation not permitted".to_owned())],
        };
        assert!(!report.success());
        assert_eq!(
            report.diagnostic(),
            "terminated 1 process(es): [10]\nfailed to terminate 11: Operation not permitted"
        );
        assert!(TerminationReport::default().success());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn kills_process_holding_the_artifact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.bin");
        std::fs::write(&path, b"payload").unwrap();

        let mut child = tokio::process::Command::new("tail")
            .arg("-f")
            .arg(&path)
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        // Give the child time to exec so its cmdline is visible.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let artifact = Artifact::inspect(&path).unwrap();
        let report = ProcfsTerminator.terminate_all(&artifact).await.unwrap();
        assert!(report.success());
        assert!(report.terminated.contains(&(child.id().unwrap() as i32)));

        let status = tokio::time::timeout(std::time::Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }
}
