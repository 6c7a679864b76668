#![forbid(unsafe_code)]

use crate::domain::Signature;
use std::fmt;
use std::sync::Arc;

/// Why an enforcement unit exists. Part of the unit name so that a blocked
/// sample and an ad-hoc isolation run of the same sample never share a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlePurpose {
    Block,
    Isolate,
}

impl HandlePurpose {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Isolate => "isolate",
        }
    }
}

/// Name of the unit running an enforcement action (e.g. a container name).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnforcementHandle(Arc<str>);

impl EnforcementHandle {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Derive a unit name scoped to the signature rather than the file name,
    /// so differently named copies of one sample map to the same unit.
    pub fn derive(prefix: &str, purpose: HandlePurpose, signature: &Signature) -> Self {
        Self::new(format!(
            "{prefix}-{}-{}",
            purpose.as_str(),
            signature.short()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnforcementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for EnforcementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EnforcementHandle").field(&&*self.0).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::name_size_signature;

    #[test]
    fn derive_uses_signature_prefix() {
        let signature = name_size_signature("sample.bin", 1024);
        let handle = EnforcementHandle::derive("virusguard", HandlePurpose::Block, &signature);
        assert_eq!(handle.as_str(), "virusguard-block-a955e40c7835ec35");
    }

    #[test]
    fn purposes_never_share_a_unit() {
        let signature = name_size_signature("sample.bin", 1024);
        let block = EnforcementHandle::derive("vg", HandlePurpose::Block, &signature);
        let isolate = EnforcementHandle::derive("vg", HandlePurpose::Isolate, &signature);
        assert_ne!(block, isolate);
    }
}
