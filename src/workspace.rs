use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::WorkspaceError;
use crate::fingerprint::{JobId, TaskId};

/// Scratch directories the external tool runs in.
///
/// One directory per task under a temporary root, holding one source file
/// per job named `<job fingerprint>.<language>`. The tool derives its
/// output filenames from these input names, which is how the harvest step
/// later recovers each job's cache key.
pub struct Workspace {
    root: Utf8PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn task_dir(&self, task_id: TaskId) -> Utf8PathBuf {
        self.root.join(task_id.to_hex())
    }

    /// The task's scratch directory, created if absent.
    pub fn create_task_dir(&self, task_id: TaskId) -> Result<Utf8PathBuf, WorkspaceError> {
        let dir = self.task_dir(task_id);
        fs::create_dir_all(&dir).map_err(WorkspaceError::CreateDir)?;
        Ok(dir)
    }

    /// Place a job's snippet text into its task's scratch directory.
    pub fn write_source(
        &self,
        task_id: TaskId,
        job_id: JobId,
        language: &str,
        content: &str,
    ) -> Result<Utf8PathBuf, WorkspaceError> {
        let dir = self.create_task_dir(task_id)?;
        let path = dir.join(job_id.to_hex()).with_extension(language);
        fs::write(&path, content).map_err(WorkspaceError::WriteSource)?;
        Ok(path)
    }

    /// Recursively delete a task's scratch directory. Absence is fine —
    /// cleanup may run after the host already pruned its temp space.
    pub fn remove_task_dir(&self, task_id: TaskId) -> Result<(), WorkspaceError> {
        let dir = self.task_dir(task_id);
        if dir.is_dir() {
            fs::remove_dir_all(&dir).map_err(WorkspaceError::RemoveDir)?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }
}
