use serde::Serialize;

use crate::config::{RenderConfig, ToolConfig};

/// A 32-byte BLAKE3 hash used for content-addressing build inputs.
///
/// Fingerprints serve two purposes:
/// 1. They key the cache artifacts (raw tool output and rendered markup),
///    so identical inputs are never built twice.
/// 2. They key the persisted build queue: a [`TaskId`] covers everything
///    the external tool sees, a [`JobId`] additionally covers the snippet
///    text itself.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Fingerprint([u8; 32]);

impl<T> From<T> for Fingerprint
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Fingerprint(value.into())
    }
}

impl Fingerprint {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = vec![0u8; 64];

        for (i, &byte) in self.0.iter().enumerate() {
            acc[i * 2] = HEX[(byte >> 4) as usize];
            acc[i * 2 + 1] = HEX[(byte & 0xF) as usize];
        }

        String::from_utf8(acc).unwrap()
    }

    /// Parse a 64-character lowercase hex digest back into a fingerprint.
    /// This is how the tool runner recovers cache keys from the output
    /// filenames the external tool derives from its input filenames.
    pub fn parse(hex: &str) -> Option<Self> {
        if hex.len() != 64 {
            return None;
        }

        let mut bytes = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks_exact(2).enumerate() {
            let hi = (chunk[0] as char).to_digit(16)?;
            let lo = (chunk[1] as char).to_digit(16)?;
            bytes[i] = ((hi << 4) | lo) as u8;
        }

        Some(Fingerprint(bytes))
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Identifier of one external-tool execution. Derived from the
/// tool-relevant configuration only, so snippets sharing tag files,
/// config variant, and language share a task.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TaskId(Fingerprint);

impl TaskId {
    /// A fresh random id, used when a job arrives for a task that is
    /// currently executing and must not be disturbed.
    pub(crate) fn random() -> Self {
        TaskId(Fingerprint(rand::random()))
    }

    pub fn fingerprint(self) -> Fingerprint {
        self.0
    }

    pub fn to_hex(self) -> String {
        self.0.to_hex()
    }

    pub fn parse(hex: &str) -> Option<Self> {
        Fingerprint::parse(hex).map(TaskId)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one buildable snippet instance, and at the same time the
/// cache key of its raw tool output. Derived from the tool-relevant
/// configuration plus the snippet text.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct JobId(Fingerprint);

impl JobId {
    pub fn fingerprint(self) -> Fingerprint {
        self.0
    }

    pub fn to_hex(self) -> String {
        self.0.to_hex()
    }

    pub fn parse(hex: &str) -> Option<Self> {
        Fingerprint::parse(hex).map(JobId)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical serialization of a configuration subset. Struct-derived JSON
/// has a fixed field order, so equal values always serialize identically.
fn canonical<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap()
}

/// Fingerprint of the tool-relevant configuration, content excluded.
pub fn task_id(config: &ToolConfig) -> TaskId {
    TaskId(Fingerprint::hash(canonical(config)))
}

/// Fingerprint of the tool-relevant configuration plus the snippet text.
/// Keys both the job row in the store and the raw output artifact.
pub fn job_id(config: &ToolConfig, content: &str) -> JobId {
    let digest = blake3::Hasher::new()
        .update(canonical(config).as_bytes())
        .update(content.as_bytes())
        .finalize();
    JobId(digest.into())
}

/// Fingerprint of the rendering-only configuration plus the snippet text.
/// Keys the rendered markup artifact, which varies with options the tool
/// never sees (line numbering).
pub fn rendered_id(config: &RenderConfig, content: &str) -> Fingerprint {
    let digest = blake3::Hasher::new()
        .update(canonical(config).as_bytes())
        .update(content.as_bytes())
        .finalize();
    digest.into()
}
