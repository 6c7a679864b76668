use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Container {
    /// Container runtime binary. Anything that speaks the `docker` command
    /// line (`docker`, `podman`) works.
    pub runtime: PathBuf,

    /// Image the sample is executed in. The sample is mounted read-only at
    /// `/sample/<file name>` and used as the container command.
    pub image: String,

    /// Network mode passed as `--network`. Samples should never get network
    /// access, so only change this for controlled analysis setups.
    pub network: String,

    /// Memory limit passed as `--memory`.
    pub memory: String,

    /// Maximum number of processes inside the container.
    pub pids_limit: u32,
}

impl Default for Container {
    fn default() -> Self {
        Self {
            runtime: PathBuf::from("docker"),
            image: "debian:stable-slim".to_owned(),
            network: "none".to_owned(),
            memory: "256m".to_owned(),
            pids_limit: 64,
        }
    }
}
