#![forbid(unsafe_code)]

mod artifact;
mod handle;
mod record;
mod signature;

pub use artifact::Artifact;
pub use handle::{EnforcementHandle, HandlePurpose};
pub use record::{ContainmentRecord, ContainmentState, TransitionRecord};
pub use signature::{Signature, SignatureCalculator, name_size_signature};
