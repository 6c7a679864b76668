#![forbid(unsafe_code)]

use crate::domain::{EnforcementHandle, Signature};
use crate::error::Error;
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ContainmentState {
    #[default]
    Unblocked,
    Blocked,
}

impl ContainmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unblocked => "unblocked",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for ContainmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainmentState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unblocked" => Ok(Self::Unblocked),
            "blocked" => Ok(Self::Blocked),
            other => Err(Error::LedgerCorrupt(format!(
                "unknown containment state {other:?}"
            ))),
        }
    }
}

/// Current containment state of one signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainmentRecord {
    pub signature: Signature,
    pub state: ContainmentState,
    /// Time of the last effective transition.
    pub updated_at: SystemTime,
    /// Unit that enforces (or last enforced) the block.
    pub handle: Option<EnforcementHandle>,
    /// Output of the last external action, verbatim.
    pub diagnostic: String,
}

impl ContainmentRecord {
    pub fn is_blocked(&self) -> bool {
        self.state == ContainmentState::Blocked
    }
}

/// One entry of the append-only transition history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRecord {
    pub signature: Signature,
    pub from: ContainmentState,
    pub to: ContainmentState,
    pub handle: Option<EnforcementHandle>,
    pub diagnostic: String,
    pub at: SystemTime,
}

impl TransitionRecord {
    /// The record as it stands once this transition is applied.
    pub fn resulting_record(&self) -> ContainmentRecord {
        ContainmentRecord {
            signature: self.signature,
            state: self.to,
            updated_at: self.at,
            handle: self.handle.clone(),
            diagnostic: self.diagnostic.clone(),
        }
    }
}
