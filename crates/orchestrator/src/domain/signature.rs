#![forbid(unsafe_code)]

use crate::domain::Artifact;
use crate::error::Error;
use config::SignatureScheme;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::str::FromStr;

/// Number of hex characters used when a signature is embedded in unit names.
const SHORT_LEN: usize = 16;

/// Stable identity of a sample: a SHA-256 digest, the sole key of containment
/// state.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Signature([u8; 32]);

impl Signature {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Leading hex characters, for human-facing names.
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(SHORT_LEN);
        hex
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signature").field(&self.to_hex()).finish()
    }
}

impl FromStr for Signature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| Error::InvalidSignature(s.to_owned()))?;
        Ok(Self(bytes))
    }
}

/// Derives signatures for artifacts according to the configured scheme.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureCalculator {
    scheme: SignatureScheme,
}

impl SignatureCalculator {
    pub fn new(scheme: SignatureScheme) -> Self {
        Self { scheme }
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    /// Compute the signature of an inspected artifact.
    ///
    /// The `name-size` scheme is a pure function of the artifact's name and
    /// size. The `content` scheme streams the file through the digest and
    /// fails with [`Error::MetadataUnavailable`] if it can no longer be read.
    pub fn compute(&self, artifact: &Artifact) -> Result<Signature, Error> {
        match self.scheme {
            SignatureScheme::NameSize => Ok(name_size_signature(&artifact.name, artifact.size)),
            SignatureScheme::Content => content_signature(artifact),
        }
    }
}

/// SHA-256 over the name followed by the decimal rendering of the size.
pub fn name_size_signature(name: &str, size: u64) -> Signature {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(size.to_string().as_bytes());
    Signature(hasher.finalize().into())
}

fn content_signature(artifact: &Artifact) -> Result<Signature, Error> {
    let unavailable = |source: std::io::Error| Error::MetadataUnavailable {
        path: artifact.path.clone(),
        source,
    };
    let mut file = File::open(&artifact.path).map_err(unavailable)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(unavailable)?;
    Ok(Signature(hasher.finalize().into()))
}
