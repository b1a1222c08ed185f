use std::sync::{Arc, Mutex};

use camino::Utf8Path;
use rusqlite::{Connection, OptionalExtension, params};

use crate::clock::Clock;
use crate::config::{RenderConfig, ToolConfig};
use crate::error::StoreError;
use crate::fingerprint::{JobId, TaskId};

/// Lifecycle of a build task, shared verbatim with the host's status
/// protocol as a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    NonExistent = 1,
    Running = 2,
    Scheduled = 3,
    Finished = 4,
    Error = 5,
}

impl TaskState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(TaskState::NonExistent),
            2 => Some(TaskState::Running),
            3 => Some(TaskState::Scheduled),
            4 => Some(TaskState::Finished),
            5 => Some(TaskState::Error),
            _ => None,
        }
    }
}

/// Durable queue of build tasks and their jobs.
///
/// A task is one external-tool execution; a job is one snippet inside it.
/// The store only persists rows and applies the state transitions — the
/// single-flight guarantee comes from the execution lock, not from here,
/// so a crashed process can leave a stale `Running` row behind. Recovery
/// for that case is the lock's staleness takeover.
///
/// Every operation degrades to a safe default (false, `NonExistent`,
/// empty) when the store was constructed as [`TaskStore::disabled`], so
/// hosts without a database fall back to immediate-only builds without
/// special-casing call sites.
pub struct TaskStore {
    conn: Option<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl TaskStore {
    pub fn open(path: &Utf8Path, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_std_path()).map_err(StoreError::Open)?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Some(Mutex::new(conn)),
            clock,
        })
    }

    pub fn in_memory(clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::Open)?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Some(Mutex::new(conn)),
            clock,
        })
    }

    /// A store without a backend. Queuing is unavailable; every operation
    /// answers its safe default.
    pub fn disabled(clock: Arc<dyn Clock>) -> Self {
        Self { conn: None, clock }
    }

    pub fn is_available(&self) -> bool {
        self.conn.is_some()
    }

    /// Create or refresh the task row a new job belongs to, returning the
    /// id of the task the job must attach to.
    ///
    /// The transition table:
    /// - no row: insert as `Scheduled` with the serialized configuration;
    /// - `Finished` / `Error`: back to `Scheduled`, timestamp refreshed
    ///   (the scratch directory may be long gone, it is recreated when
    ///   the job source is written);
    /// - `Scheduled`: timestamp refreshed only, configuration untouched;
    /// - `Running`: the task must not be disturbed mid-execution, so a
    ///   fresh random id is inserted as `Scheduled` and returned.
    pub fn upsert_task(&self, task_id: TaskId, config: &ToolConfig) -> Option<TaskId> {
        self.with_conn("task upsert", |conn, now| {
            let state = query_task_state(conn, task_id)?;

            match state {
                Some(TaskState::Finished) | Some(TaskState::Error) => {
                    conn.execute(
                        "UPDATE Tasks SET Timestamp = ?1, State = ?2 WHERE TaskID = ?3",
                        params![now, TaskState::Scheduled.as_u8(), task_id.to_hex()],
                    )?;
                    Ok(task_id)
                }
                Some(TaskState::Scheduled) => {
                    conn.execute(
                        "UPDATE Tasks SET Timestamp = ?1 WHERE TaskID = ?2",
                        params![now, task_id.to_hex()],
                    )?;
                    Ok(task_id)
                }
                Some(TaskState::Running) => {
                    let forked = TaskId::random();
                    insert_task(conn, forked, config, now)?;
                    Ok(forked)
                }
                _ => {
                    insert_task(conn, task_id, config, now)?;
                    Ok(task_id)
                }
            }
        })
    }

    /// Insert or update the job row pointing at its task.
    pub fn upsert_job(&self, job_id: JobId, task_id: TaskId, config: &RenderConfig) -> bool {
        self.with_conn("job upsert", |conn, _| {
            conn.execute(
                "INSERT OR REPLACE INTO Jobs (JobID, TaskID, Configuration) VALUES (?1, ?2, ?3)",
                params![
                    job_id.to_hex(),
                    task_id.to_hex(),
                    serde_json::to_string(config).unwrap(),
                ],
            )?;
            Ok(())
        })
        .is_some()
    }

    pub fn task_state(&self, task_id: TaskId) -> TaskState {
        self.with_conn("task state", |conn, _| query_task_state(conn, task_id))
            .flatten()
            .unwrap_or(TaskState::NonExistent)
    }

    /// State of a job, resolved through the task it belongs to.
    pub fn job_state(&self, job_id: JobId) -> TaskState {
        match self.job_task_id(job_id) {
            Some(task_id) => self.task_state(task_id),
            None => TaskState::NonExistent,
        }
    }

    pub fn job_task_id(&self, job_id: JobId) -> Option<TaskId> {
        self.with_conn("job lookup", |conn, _| {
            let hex: Option<String> = conn
                .query_row(
                    "SELECT TaskID FROM Jobs WHERE JobID = ?1",
                    params![job_id.to_hex()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(hex.and_then(|hex| TaskId::parse(&hex)))
        })
        .flatten()
    }

    /// Tool-relevant configuration persisted with a task.
    pub fn task_config(&self, task_id: TaskId) -> Option<ToolConfig> {
        self.with_conn("task config", |conn, _| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT Configuration FROM Tasks WHERE TaskID = ?1",
                    params![task_id.to_hex()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(raw.and_then(|raw| serde_json::from_str(&raw).ok()))
        })
        .flatten()
    }

    /// Tool-relevant configuration of the task a job belongs to. Used
    /// where the original snippet attributes are no longer at hand, e.g.
    /// the deferred delivery path resolving tag files for rendering.
    pub fn job_task_config(&self, job_id: JobId) -> Option<ToolConfig> {
        self.job_task_id(job_id)
            .and_then(|task_id| self.task_config(task_id))
    }

    /// Rendering-only configuration persisted with a job.
    pub fn job_config(&self, job_id: JobId) -> Option<RenderConfig> {
        self.with_conn("job config", |conn, _| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT Configuration FROM Jobs WHERE JobID = ?1",
                    params![job_id.to_hex()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(raw.and_then(|raw| serde_json::from_str(&raw).ok()))
        })
        .flatten()
    }

    /// Scheduled tasks, oldest first. Every caller that enumerates
    /// pending work sees this one ordering, so the periodic driver and
    /// any status display agree on what runs next.
    pub fn next_scheduled(&self, limit: usize) -> Vec<TaskId> {
        self.with_conn("scheduled tasks", |conn, _| {
            let mut stmt = conn.prepare(
                "SELECT TaskID FROM Tasks WHERE State = ?1 ORDER BY Timestamp ASC LIMIT ?2",
            )?;
            let ids = stmt
                .query_map(params![TaskState::Scheduled.as_u8(), limit as i64], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids.iter().filter_map(|hex| TaskId::parse(hex)).collect())
        })
        .unwrap_or_default()
    }

    /// Transition a task into `Running`. The timestamp is left alone so
    /// the task keeps its queue position for status displays.
    pub(crate) fn mark_running(&self, task_id: TaskId) -> bool {
        self.set_state(task_id, TaskState::Running)
    }

    pub(crate) fn mark_completed(&self, task_id: TaskId, success: bool) -> bool {
        let state = if success {
            TaskState::Finished
        } else {
            TaskState::Error
        };
        self.set_state(task_id, state)
    }

    fn set_state(&self, task_id: TaskId, state: TaskState) -> bool {
        self.with_conn("state transition", |conn, _| {
            conn.execute(
                "UPDATE Tasks SET State = ?1 WHERE TaskID = ?2",
                params![state.as_u8(), task_id.to_hex()],
            )?;
            Ok(())
        })
        .is_some()
    }

    fn with_conn<T>(
        &self,
        what: &str,
        op: impl FnOnce(&Connection, i64) -> Result<T, StoreError>,
    ) -> Option<T> {
        let conn = self.conn.as_ref()?.lock().unwrap();

        match op(&conn, self.clock.unix_seconds()) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!("build queue {what} failed: {err}");
                None
            }
        }
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS Tasks (
            TaskID TEXT PRIMARY KEY,
            State INTEGER NOT NULL,
            Timestamp INTEGER NOT NULL,
            Configuration TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS Jobs (
            JobID TEXT PRIMARY KEY,
            TaskID TEXT NOT NULL,
            Configuration TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_state ON Tasks(State, Timestamp)",
        [],
    )?;

    Ok(())
}

fn insert_task(
    conn: &Connection,
    task_id: TaskId,
    config: &ToolConfig,
    now: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR REPLACE INTO Tasks (TaskID, State, Timestamp, Configuration)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            task_id.to_hex(),
            TaskState::Scheduled.as_u8(),
            now,
            serde_json::to_string(config).unwrap(),
        ],
    )?;
    Ok(())
}

fn query_task_state(conn: &Connection, task_id: TaskId) -> Result<Option<TaskState>, StoreError> {
    let state: Option<u8> = conn
        .query_row(
            "SELECT State FROM Tasks WHERE TaskID = ?1",
            params![task_id.to_hex()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(state.and_then(TaskState::from_u8))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::FakeClock;
    use crate::fingerprint;

    fn tool_config() -> ToolConfig {
        ToolConfig {
            tag_files: vec!["libc".into()],
            doxygen_conf: None,
            language: "c".into(),
        }
    }

    fn store_with_clock() -> (TaskStore, FakeClock) {
        let clock = FakeClock::new(1_000);
        let store = TaskStore::in_memory(Arc::new(clock.clone())).unwrap();
        (store, clock)
    }

    fn record(store: &TaskStore, content: &str) -> (JobId, TaskId) {
        let config = tool_config();
        let job = fingerprint::job_id(&config, content);
        let task = fingerprint::task_id(&config);
        let effective = store.upsert_task(task, &config).unwrap();
        assert!(store.upsert_job(job, effective, &RenderConfig::default()));
        (job, effective)
    }

    #[test]
    fn new_task_is_scheduled() {
        let (store, _clock) = store_with_clock();
        let (job, task) = record(&store, "int x;");

        assert_eq!(store.task_state(task), TaskState::Scheduled);
        assert_eq!(store.job_state(job), TaskState::Scheduled);
        assert_eq!(store.task_config(task), Some(tool_config()));
        assert_eq!(store.job_task_config(job), Some(tool_config()));
    }

    #[test]
    fn unknown_ids_answer_non_existent() {
        let (store, _clock) = store_with_clock();
        let config = tool_config();

        let task = fingerprint::task_id(&config);
        let job = fingerprint::job_id(&config, "int x;");
        assert_eq!(store.task_state(task), TaskState::NonExistent);
        assert_eq!(store.job_state(job), TaskState::NonExistent);
        assert_eq!(store.task_config(task), None);
        assert_eq!(store.job_config(job), None);
    }

    #[test]
    fn rescheduling_refreshes_timestamp_only() {
        let (store, clock) = store_with_clock();
        let (_, task) = record(&store, "int x;");
        let before = store.task_config(task);

        clock.advance(60);
        let effective = store.upsert_task(task, &tool_config()).unwrap();

        assert_eq!(effective, task);
        assert_eq!(store.task_state(task), TaskState::Scheduled);
        assert_eq!(store.task_config(task), before);
    }

    #[test]
    fn finished_and_errored_tasks_reschedule() {
        let (store, _clock) = store_with_clock();
        let (_, task) = record(&store, "int x;");

        store.mark_running(task);
        store.mark_completed(task, true);
        assert_eq!(store.task_state(task), TaskState::Finished);
        assert_eq!(store.upsert_task(task, &tool_config()), Some(task));
        assert_eq!(store.task_state(task), TaskState::Scheduled);

        store.mark_running(task);
        store.mark_completed(task, false);
        assert_eq!(store.task_state(task), TaskState::Error);
        assert_eq!(store.upsert_task(task, &tool_config()), Some(task));
        assert_eq!(store.task_state(task), TaskState::Scheduled);
    }

    #[test]
    fn running_task_forks_a_new_id() {
        let (store, _clock) = store_with_clock();
        let (_, task) = record(&store, "int x;");
        store.mark_running(task);

        let config = tool_config();
        let job = fingerprint::job_id(&config, "int y;");
        let forked = store.upsert_task(task, &config).unwrap();
        assert!(store.upsert_job(job, forked, &RenderConfig::default()));

        assert_ne!(forked, task);
        assert_eq!(store.task_state(task), TaskState::Running);
        assert_eq!(store.task_state(forked), TaskState::Scheduled);
        assert_eq!(store.job_state(job), TaskState::Scheduled);
        assert_eq!(store.task_config(forked), Some(config));
    }

    #[test]
    fn scheduled_tasks_come_back_oldest_first() {
        let (store, clock) = store_with_clock();

        let older = ToolConfig {
            language: "c".into(),
            ..ToolConfig::default()
        };
        let newer = ToolConfig {
            language: "cpp".into(),
            ..ToolConfig::default()
        };

        let first = store
            .upsert_task(fingerprint::task_id(&older), &older)
            .unwrap();
        clock.advance(10);
        let second = store
            .upsert_task(fingerprint::task_id(&newer), &newer)
            .unwrap();

        assert_eq!(store.next_scheduled(10), vec![first, second]);

        // refreshing the older task moves it to the back of the queue
        clock.advance(10);
        store.upsert_task(first, &older);
        assert_eq!(store.next_scheduled(10), vec![second, first]);

        store.mark_running(second);
        assert_eq!(store.next_scheduled(10), vec![first]);
    }

    #[test]
    fn disabled_store_answers_safe_defaults() {
        let clock = Arc::new(FakeClock::new(0));
        let store = TaskStore::disabled(clock);
        let config = tool_config();

        let task = fingerprint::task_id(&config);
        let job = fingerprint::job_id(&config, "int x;");

        assert!(!store.is_available());
        assert_eq!(store.upsert_task(task, &config), None);
        assert!(!store.upsert_job(job, task, &RenderConfig::default()));
        assert_eq!(store.task_state(task), TaskState::NonExistent);
        assert_eq!(store.job_state(job), TaskState::NonExistent);
        assert_eq!(store.task_config(task), None);
        assert!(store.next_scheduled(10).is_empty());
    }

    #[test]
    fn job_config_survives_the_roundtrip() {
        let (store, _clock) = store_with_clock();
        let config = tool_config();
        let job = fingerprint::job_id(&config, "int x;");
        let task = store.upsert_task(fingerprint::task_id(&config), &config).unwrap();

        let render = RenderConfig {
            line_numbers: true,
            filename: Some("demo.c".into()),
        };
        assert!(store.upsert_job(job, task, &render));
        assert_eq!(store.job_config(job), Some(render));
    }
}
