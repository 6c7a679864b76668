use serde::{Deserialize, Serialize};

/// How the identity of a sample is derived.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureScheme {
    /// Digest over the file name and its size in bytes. Cheap, but two
    /// different files with the same name and size collide, and renaming a
    /// file changes its signature.
    #[default]
    #[serde(rename = "name-size")]
    NameSize,

    /// Digest over the file contents. Survives renames and never collides for
    /// differing contents, at the cost of reading the whole file.
    #[serde(rename = "content")]
    Content,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Signature {
    /// See [`SignatureScheme`] for possible values.
    pub scheme: SignatureScheme,
}
