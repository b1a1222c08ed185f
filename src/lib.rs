#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod cache;
mod clock;
mod config;
mod doxygen;
mod error;
mod fingerprint;
mod lock;
mod render;
mod scheduler;
mod snippet;
mod store;
mod tags;
mod workspace;

pub use crate::cache::{ArtifactCache, ArtifactKind};
pub use crate::clock::{Clock, FakeClock, SystemClock};
pub use crate::config::{RenderConfig, SnippetOptions, ToolConfig};
pub use crate::doxygen::{Doxygen, ToolRunner};
pub use crate::error::{CacheError, RenderError, StoreError, WorkspaceError};
pub use crate::fingerprint::{Fingerprint, JobId, TaskId, job_id, rendered_id, task_id};
pub use crate::lock::{FileLock, LockGuard, LockProvider};
pub use crate::render::render;
pub use crate::scheduler::BuildManager;
pub use crate::snippet::{SnippetOutput, Snippets, SnippetsConfig};
pub use crate::store::{TaskState, TaskStore};
pub use crate::tags::{TagEntry, TagRegistry, TagSet};
pub use crate::workspace::Workspace;
