#![forbid(unsafe_code)]

pub mod clock;
pub mod controller;
pub mod domain;
pub mod enforcement;
pub mod error;
pub mod ledger;
pub mod persistence;
pub mod scanning;

pub use controller::{BlockResult, ContainmentController, Services, StatusReport, UnblockResult};
pub use enforcement::{
    ContainerEnforcement, ContainerRuntime, Enforcement, EnforcementResult, ProcfsTerminator,
    TerminationEnforcement, TerminationReport, Terminator,
};
pub use ledger::{ContainmentLedger, SignatureLease, TransitionOutcome};
pub use persistence::{LedgerStore, MemoryLedgerStore, SqliteLedgerStore};
pub use scanning::{
    RuleFailure, RuleMatcher, RuleVerdict, ScanReport, ScanVerdict, YaraMatcher, discover_rules,
    scan_with_rules,
};

pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::{
    Artifact, ContainmentRecord, ContainmentState, EnforcementHandle, HandlePurpose, Signature,
    SignatureCalculator, TransitionRecord,
};
pub use error::{EnforcementStage, Error};
