#![forbid(unsafe_code)]

use crate::domain::{Artifact, EnforcementHandle};
use crate::enforcement::command;
use crate::enforcement::{Enforcement, EnforcementResult};
use crate::error::{EnforcementStage, Error};
use async_trait::async_trait;
use std::ffi::OsString;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// Directory inside the container where the sample is mounted.
const SAMPLE_DIR: &str = "/sample";

/// Runtime error text for a unit that does not exist.
const NO_SUCH_CONTAINER: &str = "No such container";

/// Thin client for a docker-compatible container runtime.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    runtime: PathBuf,
    image: String,
    network: String,
    memory: String,
    pids_limit: u32,
}

impl ContainerRuntime {
    pub fn new(config: &config::Container) -> Self {
        Self {
            runtime: config.runtime.clone(),
            image: config.image.clone(),
            network: config.network.clone(),
            memory: config.memory.clone(),
            pids_limit: config.pids_limit,
        }
    }

    /// Arguments of the detached, locked-down `run` that executes the sample
    /// from a read-only bind mount. A disposable unit is removed by the
    /// runtime once the sample exits.
    fn run_args(
        &self,
        host_path: &Path,
        name: &str,
        unit: &EnforcementHandle,
        disposable: bool,
    ) -> Vec<OsString> {
        let target = format!("{SAMPLE_DIR}/{name}");
        let mut mount = OsString::from("type=bind,readonly,source=");
        mount.push(host_path);
        mount.push(format!(",target={target}"));

        let mut args: Vec<OsString> = vec!["run".into()];
        if disposable {
            args.push("--rm".into());
        }
        args.extend(
            [
                "--detach",
                "--name",
                unit.as_str(),
                "--network",
                self.network.as_str(),
                "--cap-drop",
                "ALL",
                "--security-opt",
                "no-new-privileges",
                "--read-only",
                "--memory",
                self.memory.as_str(),
            ]
            .into_iter()
            .map(OsString::from),
        );
        args.push("--pids-limit".into());
        args.push(self.pids_limit.to_string().into());
        args.push("--mount".into());
        args.push(mount);
        args.push(self.image.clone().into());
        args.push(target.into());
        args
    }

    /// Start the sample inside a new container named `unit`.
    ///
    /// Returns once the runtime has acknowledged the container start; its exit
    /// status is the confirmation, so a failure here means nothing is running.
    pub async fn start_isolation(
        &self,
        artifact: &Artifact,
        unit: &EnforcementHandle,
    ) -> EnforcementResult {
        self.launch(artifact, unit, false).await
    }

    /// One-off isolation run that cleans up after itself.
    ///
    /// A unit of the same name left over from an earlier run is removed
    /// first, and the runtime removes this one when the sample exits.
    pub async fn run_disposable(
        &self,
        artifact: &Artifact,
        unit: &EnforcementHandle,
    ) -> EnforcementResult {
        self.stop_isolation(unit)
            .await
            .map_err(|err| Error::EnforcementFailed {
                stage: EnforcementStage::Start,
                diagnostic: format!("cannot clear previous unit {unit}: {err}"),
            })?;
        self.launch(artifact, unit, true).await
    }

    async fn launch(
        &self,
        artifact: &Artifact,
        unit: &EnforcementHandle,
        disposable: bool,
    ) -> EnforcementResult {
        let failed = |diagnostic: String| Error::EnforcementFailed {
            stage: EnforcementStage::Start,
            diagnostic,
        };

        let host_path = tokio::fs::canonicalize(&artifact.path)
            .await
            .map_err(|source| Error::MetadataUnavailable {
                path: artifact.path.clone(),
                source,
            })?;
        if host_path.to_string_lossy().contains(',') || artifact.name.contains(',') {
            return Err(failed(format!(
                "cannot bind-mount {}: path contains ','",
                host_path.display()
            )));
        }
        make_executable(&host_path)
            .await
            .map_err(|err| failed(format!("cannot make sample executable: {err}")))?;

        let mut cmd = Command::new(&self.runtime);
        cmd.args(self.run_args(&host_path, &artifact.name, unit, disposable));
        let output = command::run(cmd)
            .await
            .map_err(|err| failed(format!("cannot run {}: {err}", self.runtime.display())))?;
        if !output.success() {
            return Err(failed(output.failure_diagnostic()));
        }

        info!(%unit, image = %self.image, "isolation started");
        Ok(output.diagnostic())
    }

    /// Remove the container named `unit`, killing it if it still runs.
    ///
    /// A unit that is already gone counts as stopped, so retries are safe.
    pub async fn stop_isolation(&self, unit: &EnforcementHandle) -> EnforcementResult {
        let mut cmd = Command::new(&self.runtime);
        cmd.args(["rm", "--force", unit.as_str()]);
        let output = command::run(cmd)
            .await
            .map_err(|err| Error::EnforcementFailed {
                stage: EnforcementStage::Stop,
                diagnostic: format!("cannot run {}: {err}", self.runtime.display()),
            })?;

        if output.success() {
            info!(%unit, "isolation stopped");
            return Ok(output.diagnostic());
        }
        if output.stderr.contains(NO_SUCH_CONTAINER) {
            debug!(%unit, "isolation unit already gone");
            return Ok(format!("{unit} already removed"));
        }
        Err(Error::EnforcementFailed {
            stage: EnforcementStage::Stop,
            diagnostic: output.failure_diagnostic(),
        })
    }
}

async fn make_executable(path: &Path) -> std::io::Result<()> {
    let mut permissions = tokio::fs::metadata(path).await?.permissions();
    let mode = permissions.mode();
    if mode & 0o111 == 0o111 {
        return Ok(());
    }
    permissions.set_mode(mode | 0o111);
    tokio::fs::set_permissions(path, permissions).await
}

/// Holds a blocked sample inside a container for as long as it is blocked.
#[derive(Debug, Clone)]
pub struct ContainerEnforcement {
    runtime: ContainerRuntime,
}

impl ContainerEnforcement {
    pub fn new(runtime: ContainerRuntime) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl Enforcement for ContainerEnforcement {
    fn name(&self) -> &'static str {
        "container"
    }

    async fn start(&self, artifact: &Artifact, handle: &EnforcementHandle) -> EnforcementResult {
        self.runtime.start_isolation(artifact, handle).await
    }

    async fn stop(&self, handle: &EnforcementHandle) -> EnforcementResult {
        self.runtime.stop_isolation(handle).await
    }
}
