use std::fs;
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::CacheError;
use crate::fingerprint::Fingerprint;

/// The two artifact kinds derived from one snippet build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Raw XML as emitted by the external tool.
    RawXml,
    /// Markup produced by the cross-reference renderer.
    Html,
}

impl ArtifactKind {
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::RawXml => "xml",
            ArtifactKind::Html => "html",
        }
    }
}

/// Content-addressed artifact store on the local filesystem.
///
/// Artifacts live at `<root>/<first hex char>/<hex>.<ext>`, bucketed by
/// the first digest character to keep directories small. Validity is
/// judged against a dependency file list by modification time, never by
/// re-reading contents.
#[derive(Clone)]
pub struct ArtifactCache {
    root: Utf8PathBuf,
}

impl ArtifactCache {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self, fingerprint: Fingerprint, kind: ArtifactKind) -> Utf8PathBuf {
        let hex = fingerprint.to_hex();
        self.root
            .join(&hex[..1])
            .join(hex)
            .with_extension(kind.extension())
    }

    pub fn exists(&self, fingerprint: Fingerprint, kind: ArtifactKind) -> bool {
        self.path(fingerprint, kind).exists()
    }

    /// Read an artifact, `None` when absent or unreadable.
    pub fn read(&self, fingerprint: Fingerprint, kind: ArtifactKind) -> Option<String> {
        fs::read_to_string(self.path(fingerprint, kind)).ok()
    }

    pub fn write(
        &self,
        fingerprint: Fingerprint,
        kind: ArtifactKind,
        data: &[u8],
    ) -> Result<Utf8PathBuf, CacheError> {
        let path = self.path(fingerprint, kind);

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, data)?;

        Ok(path)
    }

    /// An artifact is valid iff it exists, every dependency file exists,
    /// and the artifact is at least as new as each dependency. A missing
    /// dependency invalidates: a deleted tag file must force a rebuild
    /// rather than freeze a stale artifact.
    pub fn is_valid(
        &self,
        fingerprint: Fingerprint,
        kind: ArtifactKind,
        dependencies: &[Utf8PathBuf],
    ) -> bool {
        let Some(own) = mtime(&self.path(fingerprint, kind)) else {
            return false;
        };

        dependencies.iter().all(|dep| match mtime(dep) {
            Some(dep_mtime) => own >= dep_mtime,
            None => false,
        })
    }
}

fn mtime(path: &Utf8Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}
