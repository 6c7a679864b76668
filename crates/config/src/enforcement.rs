use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

/// The mechanism used to hold a blocked sample.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mechanism {
    /// Run the sample inside a disposable container for the whole time it is
    /// blocked. Unblocking removes the container.
    #[default]
    #[serde(rename = "container")]
    Container,

    /// Kill every process that references the sample. There is nothing to
    /// undo on unblock.
    #[serde(rename = "terminate")]
    Terminate,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Enforcement {
    /// See [`Mechanism`] for possible values.
    pub mechanism: Mechanism,

    /// Upper bound on a single start or stop invocation. An invocation that
    /// does not finish in time is killed and reported as a timeout; the
    /// ledger is left untouched. **Measured in seconds**.
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub timeout: Duration,

    /// Prefix of every enforcement unit name. Unit names are derived from the
    /// sample signature, e.g. `virusguard-block-3fa91c0d2e6b7a48`.
    ///
    /// ## Note
    ///
    /// Must start with an ASCII alphanumeric character and contain only ASCII
    /// alphanumerics, `_`, `.` and `-`, since it ends up as a container name.
    pub handle_prefix: String,
}

impl Default for Enforcement {
    fn default() -> Self {
        Self {
            mechanism: Mechanism::default(),
            timeout: Duration::from_secs(60),
            handle_prefix: "virusguard".to_owned(),
        }
    }
}

impl Enforcement {
    pub(crate) fn handle_prefix_is_valid(&self) -> bool {
        let mut chars = self.handle_prefix.chars();
        match chars.next() {
            Some(first) if first.is_ascii_alphanumeric() => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    }
}
