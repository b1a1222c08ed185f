use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;

use crate::cache::{ArtifactCache, ArtifactKind};
use crate::clock::SystemClock;
use crate::config::SnippetOptions;
use crate::doxygen::Doxygen;
use crate::fingerprint::{self, Fingerprint, JobId};
use crate::lock::FileLock;
use crate::render;
use crate::scheduler::BuildManager;
use crate::store::{TaskState, TaskStore};
use crate::tags::{TagRegistry, TagSet};
use crate::workspace::Workspace;

/// Everything the host provides to assemble the pipeline.
pub struct SnippetsConfig {
    /// Directory holding the tag files and `tagconfig.json`.
    pub tag_dir: Utf8PathBuf,
    /// Root of the artifact cache.
    pub cache_root: Utf8PathBuf,
    /// Root under which per-task scratch directories are created.
    pub scratch_root: Utf8PathBuf,
    /// Build queue database. `None` disables queuing; snippets then only
    /// build immediately.
    pub store_path: Option<Utf8PathBuf>,
    /// Path of the lock marker enforcing single-flight tool execution.
    pub lock_path: Utf8PathBuf,
    /// Longest a tool run may take before its lock is considered
    /// abandoned and taken over.
    pub max_tool_duration: Duration,
    pub doxygen_executable: Utf8PathBuf,
    /// Base tool configuration, piped to the tool on every run.
    pub doxygen_config: Utf8PathBuf,
    /// Keep scratch directories after builds for debugging.
    pub keep_scratch: bool,
}

/// What one snippet request produced.
#[derive(Debug, PartialEq, Eq)]
pub enum SnippetOutput {
    /// Finished markup, served from cache or rendered just now.
    Html(String),
    /// The build is queued, running, or unavailable. The host shows a
    /// placeholder carrying both fingerprints and polls
    /// [`Snippets::job_status`] / [`Snippets::fetch_rendered`] with them.
    Pending {
        xml: Fingerprint,
        html: Fingerprint,
        state: TaskState,
    },
}

/// The assembled pipeline: fingerprinting, cache lookup, build-or-queue
/// decisions, and rendering behind one entry point per host surface.
pub struct Snippets {
    registry: TagRegistry,
    cache: ArtifactCache,
    manager: BuildManager,
    doxygen_config: Utf8PathBuf,
}

impl Snippets {
    /// Assemble the production pipeline. A queue database that cannot be
    /// opened degrades to immediate-only builds rather than failing —
    /// the host keeps serving snippets either way.
    pub fn new(config: SnippetsConfig) -> Self {
        let clock = Arc::new(SystemClock);

        let store = match &config.store_path {
            Some(path) => TaskStore::open(path, clock.clone()).unwrap_or_else(|err| {
                tracing::warn!("build queue unavailable: {err}");
                TaskStore::disabled(clock.clone())
            }),
            None => TaskStore::disabled(clock.clone()),
        };

        let cache = ArtifactCache::new(config.cache_root);
        let runner = Doxygen::new(
            config.doxygen_executable,
            config.doxygen_config.clone(),
            cache.clone(),
        );
        let lock = FileLock::new(config.lock_path, config.max_tool_duration, clock);

        let manager = BuildManager::new(
            store,
            Workspace::new(config.scratch_root),
            Box::new(lock),
            Box::new(runner),
        )
        .keep_scratch(config.keep_scratch);

        Self {
            registry: TagRegistry::new(config.tag_dir),
            cache,
            manager,
            doxygen_config: config.doxygen_config,
        }
    }

    /// Assemble from pre-built parts, substituting any seam: an in-memory
    /// lock, a fake tool, an alternative store backend.
    pub fn from_parts(
        registry: TagRegistry,
        cache: ArtifactCache,
        manager: BuildManager,
        doxygen_config: Utf8PathBuf,
    ) -> Self {
        Self {
            registry,
            cache,
            manager,
            doxygen_config,
        }
    }

    pub fn manager(&self) -> &BuildManager {
        &self.manager
    }

    /// Serve one snippet: cached markup when valid, otherwise build (or
    /// queue) and render, otherwise a placeholder for the host's poller.
    pub fn render_snippet(&self, options: &SnippetOptions, content: &str) -> SnippetOutput {
        let content = trim_snippet(content);

        let tool = options.tool_config();
        let tags = self.registry.resolve(&tool.tag_files);

        let xml_id = fingerprint::job_id(&tool, content);
        let html_id = fingerprint::rendered_id(&options.render_config(), content);

        // cached markup first
        let html_deps = self.html_dependencies(xml_id, &tags);
        if self.cache.is_valid(html_id, ArtifactKind::Html, &html_deps) {
            if let Some(html) = self.cache.read(html_id, ArtifactKind::Html) {
                return SnippetOutput::Html(html);
            }
        }

        let store = self.manager.store();

        // the queue only helps when there is a queue to put things on
        let deferred = (options.defer_to_runner || tags.force_runner()) && store.is_available();

        let xml_deps = tags.dependency_files(&self.doxygen_config);
        if !self
            .cache
            .is_valid(xml_id.fingerprint(), ArtifactKind::RawXml, &xml_deps)
        {
            // a job already queued or running needs no new build request
            let state = store.job_state(xml_id);
            if matches!(
                state,
                TaskState::Finished | TaskState::NonExistent | TaskState::Error,
            ) {
                if deferred {
                    self.manager.record_job(xml_id, options, content);
                } else {
                    self.manager.try_build_now(xml_id, options, content, &tags);
                }
            }
        }

        if !deferred {
            // render whatever raw output exists by now, even if its
            // dependencies moved on — an aged snippet beats an empty one
            if let Some(xml) = self.cache.read(xml_id.fingerprint(), ArtifactKind::RawXml) {
                match render::render(&xml, options.line_numbers, &tags) {
                    Ok(markup) => {
                        if let Err(err) =
                            self.cache.write(html_id, ArtifactKind::Html, markup.as_bytes())
                        {
                            tracing::warn!("couldn't cache rendered snippet: {err}");
                        }
                        return SnippetOutput::Html(markup);
                    }
                    Err(err) => tracing::error!("couldn't render snippet {xml_id}: {err}"),
                }
            }
        }

        SnippetOutput::Pending {
            xml: xml_id.fingerprint(),
            html: html_id,
            state: store.job_state(xml_id),
        }
    }

    /// Status half of the placeholder protocol: the current state of a
    /// job, as the host's poller asks for it.
    pub fn job_status(&self, job_id: JobId) -> TaskState {
        self.manager.store().job_state(job_id)
    }

    /// Delivery half of the placeholder protocol: previously rendered
    /// markup when the cache holds it, freshly rendered markup once the
    /// raw artifact became valid, `None` while the build is still
    /// pending or failed.
    pub fn fetch_rendered(&self, xml_id: JobId, html_id: Fingerprint) -> Option<String> {
        let store = self.manager.store();

        let tag_names = store
            .job_task_config(xml_id)
            .map(|config| config.tag_files)
            .unwrap_or_default();
        let tags = self.registry.resolve(&tag_names);

        let html_deps = self.html_dependencies(xml_id, &tags);
        if self.cache.is_valid(html_id, ArtifactKind::Html, &html_deps) {
            if let Some(html) = self.cache.read(html_id, ArtifactKind::Html) {
                return Some(html);
            }
        }

        let xml_deps = tags.dependency_files(&self.doxygen_config);
        if !self
            .cache
            .is_valid(xml_id.fingerprint(), ArtifactKind::RawXml, &xml_deps)
        {
            return None;
        }

        let xml = self.cache.read(xml_id.fingerprint(), ArtifactKind::RawXml)?;
        let render_config = store.job_config(xml_id).unwrap_or_default();

        match render::render(&xml, render_config.line_numbers, &tags) {
            Ok(markup) => {
                if let Err(err) = self.cache.write(html_id, ArtifactKind::Html, markup.as_bytes()) {
                    tracing::warn!("couldn't cache rendered snippet: {err}");
                }
                Some(markup)
            }
            Err(err) => {
                tracing::error!("couldn't render snippet {xml_id}: {err}");
                None
            }
        }
    }

    /// One periodic-driver tick: run the oldest scheduled task, if any.
    /// Returns whether a task was actually executed.
    pub fn drain_one(&self) -> bool {
        let Some(task_id) = self.manager.scheduled_tasks(1).into_iter().next() else {
            return false;
        };
        self.manager.run_task(task_id, &self.registry)
    }

    /// The rendered artifact depends on everything the raw artifact
    /// depends on, plus the raw artifact itself.
    fn html_dependencies(&self, xml_id: JobId, tags: &TagSet) -> Vec<Utf8PathBuf> {
        let mut deps = tags.dependency_files(&self.doxygen_config);
        deps.push(self.cache.path(xml_id.fingerprint(), ArtifactKind::RawXml));
        deps
    }
}

/// Strip the single leading and trailing newline the host's markup
/// delimiters introduce, so every surface fingerprints the same text.
fn trim_snippet(content: &str) -> &str {
    let content = content.strip_prefix('\n').unwrap_or(content);
    content.strip_suffix('\n').unwrap_or(content)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};

    use camino::Utf8Path;

    use crate::clock::FakeClock;
    use crate::doxygen::ToolRunner;
    use crate::lock::{LockGuard, LockProvider};

    #[derive(Clone, Default)]
    struct TestLock {
        held: Arc<AtomicBool>,
    }

    impl LockProvider for TestLock {
        fn try_acquire(&self) -> Option<LockGuard> {
            if self.held.swap(true, Ordering::SeqCst) {
                return None;
            }
            let held = self.held.clone();
            Some(LockGuard::new(move || held.store(false, Ordering::SeqCst)))
        }
    }

    /// Stands in for the external tool: wraps every staged source file
    /// into a one-line program listing and stores it like the harvest
    /// step would.
    struct FakeTool {
        cache: ArtifactCache,
    }

    impl ToolRunner for FakeTool {
        fn invoke(&self, scratch_dir: &Utf8Path, _tags: &TagSet) -> bool {
            for entry in fs::read_dir(scratch_dir).unwrap() {
                let path = entry.unwrap().path();
                let stem = path.file_stem().unwrap().to_str().unwrap();
                let Some(fingerprint) = Fingerprint::parse(stem) else {
                    continue;
                };

                let source = fs::read_to_string(&path).unwrap();
                let xml = format!(
                    "<doxygen><compounddef><programlisting>\
                     <codeline><highlight class=\"normal\">{source}</highlight></codeline>\
                     </programlisting></compounddef></doxygen>",
                );
                self.cache
                    .write(fingerprint, ArtifactKind::RawXml, xml.as_bytes())
                    .unwrap();
            }
            true
        }
    }

    struct Setup {
        _tmp: tempfile::TempDir,
        snippets: Snippets,
        lock: TestLock,
    }

    fn setup(with_store: bool) -> Setup {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap().to_owned();
        let clock = Arc::new(FakeClock::new(1_000));

        // dependency files referenced by every artifact validity check
        let tag_dir = root.join("tagfiles");
        fs::create_dir_all(&tag_dir).unwrap();
        fs::write(tag_dir.join("tagconfig.json"), "{}").unwrap();
        let doxygen_config = root.join("doxygen.conf");
        fs::write(&doxygen_config, "QUIET = YES\n").unwrap();

        let store = if with_store {
            TaskStore::in_memory(clock).unwrap()
        } else {
            TaskStore::disabled(clock)
        };

        let cache = ArtifactCache::new(root.join("cache"));
        let lock = TestLock::default();
        let manager = BuildManager::new(
            store,
            Workspace::new(root.join("scratch")),
            Box::new(lock.clone()),
            Box::new(FakeTool {
                cache: cache.clone(),
            }),
        );

        let snippets = Snippets::from_parts(
            TagRegistry::new(tag_dir),
            cache,
            manager,
            doxygen_config,
        );

        Setup {
            _tmp: tmp,
            snippets,
            lock,
        }
    }

    fn options() -> SnippetOptions {
        SnippetOptions {
            language: "c".into(),
            ..SnippetOptions::default()
        }
    }

    #[test]
    fn two_jobs_share_a_task_but_not_artifacts() {
        // no queue available: both must build immediately
        let s = setup(false);

        let first = s.snippets.render_snippet(&options(), "int x;");
        let second = s.snippets.render_snippet(&options(), "int y;");

        let SnippetOutput::Html(first) = first else {
            panic!("expected immediate markup, got {first:?}");
        };
        let SnippetOutput::Html(second) = second else {
            panic!("expected immediate markup, got {second:?}");
        };
        assert_ne!(first, second);
        assert!(first.contains("int x;"));
        assert!(second.contains("int y;"));
    }

    #[test]
    fn second_request_is_served_from_cache() {
        let s = setup(false);

        let first = s.snippets.render_snippet(&options(), "int x;");
        let again = s.snippets.render_snippet(&options(), "int x;");
        assert_eq!(first, again);
    }

    #[test]
    fn snippet_text_is_trimmed_to_one_fingerprint() {
        let s = setup(false);

        let bare = s.snippets.render_snippet(&options(), "int x;");
        let wrapped = s.snippets.render_snippet(&options(), "\nint x;\n");
        assert_eq!(bare, wrapped);
    }

    #[test]
    fn contended_request_queues_and_drains_to_markup() {
        let s = setup(true);
        let held = s.lock.try_acquire().unwrap();

        let tool = options().tool_config();
        let xml_id = fingerprint::job_id(&tool, "int x;");

        let output = s.snippets.render_snippet(&options(), "int x;");
        let SnippetOutput::Pending { xml, html, state } = output else {
            panic!("expected a placeholder, got {output:?}");
        };
        assert_eq!(xml, xml_id.fingerprint());
        assert_eq!(state, TaskState::Scheduled);
        assert_eq!(s.snippets.job_status(xml_id), TaskState::Scheduled);
        // nothing rendered yet
        assert_eq!(s.snippets.fetch_rendered(xml_id, html), None);

        drop(held);
        assert!(s.snippets.drain_one());
        assert_eq!(s.snippets.job_status(xml_id), TaskState::Finished);

        let markup = s.snippets.fetch_rendered(xml_id, html).unwrap();
        assert!(markup.contains("int x;"));

        // drained queue: nothing left to run
        assert!(!s.snippets.drain_one());
    }

    #[test]
    fn deferred_snippets_go_straight_to_the_queue() {
        let s = setup(true);
        let opts = SnippetOptions {
            defer_to_runner: true,
            ..options()
        };

        let output = s.snippets.render_snippet(&opts, "int x;");
        let SnippetOutput::Pending { state, .. } = output else {
            panic!("expected a placeholder, got {output:?}");
        };
        assert_eq!(state, TaskState::Scheduled);
        // the lock was never taken
        assert!(s.lock.try_acquire().is_some());
    }

    #[test]
    fn defer_flag_is_ignored_without_a_queue() {
        let s = setup(false);
        let opts = SnippetOptions {
            defer_to_runner: true,
            ..options()
        };

        let output = s.snippets.render_snippet(&opts, "int x;");
        assert!(matches!(output, SnippetOutput::Html(_)));
    }

    #[test]
    fn placeholder_without_queue_reports_non_existent() {
        let s = setup(false);
        let _held = s.lock.try_acquire().unwrap();

        let output = s.snippets.render_snippet(&options(), "int x;");
        let SnippetOutput::Pending { state, .. } = output else {
            panic!("expected a placeholder, got {output:?}");
        };
        assert_eq!(state, TaskState::NonExistent);
    }

    #[test]
    fn line_numbers_split_the_rendered_artifact() {
        let s = setup(false);

        let plain = s.snippets.render_snippet(&options(), "int x;");
        let numbered = s.snippets.render_snippet(
            &SnippetOptions {
                line_numbers: true,
                ..options()
            },
            "int x;",
        );

        let SnippetOutput::Html(plain) = plain else {
            panic!("expected markup");
        };
        let SnippetOutput::Html(numbered) = numbered else {
            panic!("expected markup");
        };
        assert_ne!(plain, numbered);
        assert!(numbered.starts_with("<ol>"));
    }
}
