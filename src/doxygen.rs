use std::fs;
use std::io::Write;
use std::process::{Command, Stdio};

use camino::Utf8Path;

use crate::cache::{ArtifactCache, ArtifactKind};
use crate::fingerprint::Fingerprint;
use crate::tags::TagSet;

/// The seam between the scheduler and the external analysis tool.
///
/// Implementations run the tool over a scratch directory and leave each
/// job's raw output in the artifact cache. Failures collapse to `false`
/// here; the scheduler records them as task state, never as errors
/// crossing this boundary.
pub trait ToolRunner: Send + Sync {
    /// True iff the tool's exit status indicates success.
    fn invoke(&self, scratch_dir: &Utf8Path, tags: &TagSet) -> bool;
}

/// Doxygen mangles an input filename by replacing each `.` with this
/// marker in its XML output filename: `abc.c` becomes `abc_8c.xml`.
const MANGLE_MARKER: &str = "_8";

/// Runs doxygen over a scratch directory and harvests its XML output.
pub struct Doxygen {
    executable: camino::Utf8PathBuf,
    base_config: camino::Utf8PathBuf,
    cache: ArtifactCache,
}

impl Doxygen {
    pub fn new(
        executable: impl Into<camino::Utf8PathBuf>,
        base_config: impl Into<camino::Utf8PathBuf>,
        cache: ArtifactCache,
    ) -> Self {
        Self {
            executable: executable.into(),
            base_config: base_config.into(),
            cache,
        }
    }

    /// Feed the base configuration plus the overridden reference-files
    /// parameter through stdin (`doxygen -` reads its config from there)
    /// with the scratch directory as working directory.
    fn run_tool(&self, scratch_dir: &Utf8Path, tags: &TagSet) -> anyhow::Result<bool> {
        let config = fs::read_to_string(&self.base_config)?;

        let tagfiles = tags
            .references()
            .map(|(path, url)| format!("\"{path}={url}\""))
            .collect::<Vec<_>>()
            .join(" ");

        let mut child = Command::new(self.executable.as_str())
            .arg("-")
            .current_dir(scratch_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        {
            let stdin = child
                .stdin
                .as_mut()
                .ok_or(anyhow::anyhow!("stdin not piped"))?;
            stdin.write_all(config.as_bytes())?;
            stdin.write_all(format!("\nTAGFILES={tagfiles}\n").as_bytes())?;
            stdin.flush()?;
        }

        let output = child.wait_with_output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!(
                "doxygen exited with {} in {scratch_dir}:\n{}",
                output.status,
                stderr.trim(),
            );
        }

        Ok(output.status.success())
    }

    /// Copy every recognizable XML output file into the cache, keyed by
    /// the fingerprint recovered from its mangled filename. Files that
    /// don't parse back to a fingerprint are the tool's own index output
    /// and are skipped; a copy failure loses one job's artifact but not
    /// the whole run.
    fn harvest(&self, scratch_dir: &Utf8Path) {
        let pattern = scratch_dir.join("xml").join(format!("*{MANGLE_MARKER}*.xml"));
        let Ok(entries) = glob::glob(pattern.as_str()) else {
            return;
        };

        for entry in entries.flatten() {
            let Some(stem) = entry.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let Some((hex, _)) = stem.split_once(MANGLE_MARKER) else {
                continue;
            };
            let Some(fingerprint) = Fingerprint::parse(hex) else {
                continue;
            };

            let target = self.cache.path(fingerprint, ArtifactKind::RawXml);
            if let Some(dir) = target.parent() {
                let _ = fs::create_dir_all(dir);
            }
            if let Err(err) = fs::copy(&entry, &target) {
                tracing::warn!("couldn't harvest {}: {err}", entry.display());
            }
        }
    }
}

impl ToolRunner for Doxygen {
    fn invoke(&self, scratch_dir: &Utf8Path, tags: &TagSet) -> bool {
        if !scratch_dir.is_dir() {
            return false;
        }

        if !self.executable.exists() {
            tracing::error!("doxygen executable {} not found", self.executable);
            return false;
        }

        let success = match self.run_tool(scratch_dir, tags) {
            Ok(success) => success,
            Err(err) => {
                tracing::error!("doxygen invocation failed: {err:#}");
                false
            }
        };

        // a failed run may still have produced output for some jobs
        self.harvest(scratch_dir);

        success
    }
}
