use crate::config::SnippetOptions;
use crate::doxygen::ToolRunner;
use crate::fingerprint::{self, JobId, TaskId};
use crate::lock::LockProvider;
use crate::store::{TaskState, TaskStore};
use crate::tags::{TagRegistry, TagSet};
use crate::workspace::Workspace;

/// Decides between building a snippet immediately and queuing it, and
/// owns every transition around an actual tool run.
///
/// Immediate builds are preferred for interactivity; the queue exists
/// purely because the external tool is too heavy to run twice at once.
/// All outcomes are reported as booleans — lock contention and store
/// unavailability are expected operating conditions here, not errors.
pub struct BuildManager {
    store: TaskStore,
    workspace: Workspace,
    lock: Box<dyn LockProvider>,
    runner: Box<dyn ToolRunner>,
    keep_scratch: bool,
}

impl BuildManager {
    pub fn new(
        store: TaskStore,
        workspace: Workspace,
        lock: Box<dyn LockProvider>,
        runner: Box<dyn ToolRunner>,
    ) -> Self {
        Self {
            store,
            workspace,
            lock,
            runner,
            keep_scratch: false,
        }
    }

    /// Keep scratch directories after builds for debugging.
    pub fn keep_scratch(mut self, keep: bool) -> Self {
        self.keep_scratch = keep;
        self
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Queue a job for the periodic driver.
    ///
    /// Creates or refreshes the task row, writes the snippet source into
    /// the effective task's scratch directory, and records the job row.
    /// If the task is currently running, the store forks a fresh task id
    /// and the job lands there — a task being read by the tool is never
    /// touched. False when the store is unavailable or scratch I/O fails.
    pub fn record_job(&self, job_id: JobId, options: &SnippetOptions, content: &str) -> bool {
        let tool = options.tool_config();
        let task_id = fingerprint::task_id(&tool);

        let Some(effective) = self.store.upsert_task(task_id, &tool) else {
            return false;
        };

        if let Err(err) = self
            .workspace
            .write_source(effective, job_id, &tool.language, content)
        {
            tracing::error!("couldn't stage job {job_id} for task {effective}: {err}");
            return false;
        }

        self.store.upsert_job(job_id, effective, &options.render_config())
    }

    /// Build a snippet right now if the tool is idle, otherwise queue it.
    ///
    /// Returns the tool-run outcome on the immediate path, or whatever
    /// [`BuildManager::record_job`] reports on the fallback path.
    pub fn try_build_now(
        &self,
        job_id: JobId,
        options: &SnippetOptions,
        content: &str,
        tags: &TagSet,
    ) -> bool {
        let Some(_guard) = self.lock.try_acquire() else {
            // one tool instance at a time; fall back to the queue
            return self.record_job(job_id, options, content);
        };

        let tool = options.tool_config();
        let task_id = fingerprint::task_id(&tool);

        if let Err(err) = self
            .workspace
            .write_source(task_id, job_id, &tool.language, content)
        {
            tracing::error!("couldn't stage job {job_id}: {err}");
            return false;
        }

        let success = self.runner.invoke(&self.workspace.task_dir(task_id), tags);

        if !self.keep_scratch {
            let _ = self.workspace.remove_task_dir(task_id);
        }

        success
    }

    /// Execute one queued task on behalf of the periodic driver.
    ///
    /// False only for lock contention or a task that is no longer
    /// scheduled — both mean "try again later". A failing tool run still
    /// returns true: the failure is recorded in the task row, where the
    /// status protocol picks it up.
    pub fn run_task(&self, task_id: TaskId, registry: &TagRegistry) -> bool {
        let Some(_guard) = self.lock.try_acquire() else {
            return false;
        };

        if self.store.task_state(task_id) != TaskState::Scheduled {
            return false;
        }

        let Some(tool) = self.store.task_config(task_id) else {
            return false;
        };
        let tags = registry.resolve(&tool.tag_files);

        // recreate the directory if the host pruned its temp space; the
        // runner treats a dir that cannot exist as a failed run
        let dir = self.workspace.task_dir(task_id);
        if let Err(err) = self.workspace.create_task_dir(task_id) {
            tracing::warn!("couldn't create scratch directory {dir}: {err}");
        }

        self.store.mark_running(task_id);
        let success = self.runner.invoke(&dir, &tags);
        self.store.mark_completed(task_id, success);

        if !self.keep_scratch {
            let _ = self.workspace.remove_task_dir(task_id);
        }

        tracing::info!(
            "task {task_id} {}",
            if success { "finished" } else { "failed" },
        );

        true
    }

    /// Scheduled tasks oldest-first, for the periodic driver.
    pub fn scheduled_tasks(&self, limit: usize) -> Vec<TaskId> {
        self.store.next_scheduled(limit)
    }
}
