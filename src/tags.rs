use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// Configuration file holding all tag entries, kept next to the tag files
/// themselves.
const CONFIG_FILE: &str = "tagconfig.json";

/// One entry of the tag-file configuration.
///
/// A tag file is the symbol index of an external documentation set. The
/// entry pairs it with the base URL under which that documentation is
/// published, which is all the renderer needs to turn a symbol reference
/// into a hyperlink.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagEntry {
    /// Base URL of the published documentation this tag file indexes.
    #[serde(default)]
    pub docu_url: String,
    /// Where the tag file is periodically downloaded from, when it is
    /// remotely managed. Consumed by the host's refresh driver, not here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    /// Refresh period in seconds for remotely managed tag files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_period: Option<u64>,
    #[serde(default)]
    pub enabled: bool,
    /// Unix timestamp of the last remote refresh.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<i64>,
    /// Large documentation sets take the tool minutes to resolve; entries
    /// with this flag force the queued build path for any snippet that
    /// uses them.
    #[serde(default)]
    pub force_runner: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Read-only access to the tag-file directory and its configuration.
pub struct TagRegistry {
    dir: Utf8PathBuf,
}

impl TagRegistry {
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn config_path(&self) -> Utf8PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    /// Full path of a named tag file.
    pub fn file_path(&self, name: &str) -> Utf8PathBuf {
        self.dir.join(name).with_extension("xml")
    }

    /// Load the whole configuration. A missing or unreadable file yields
    /// an empty map; the pipeline degrades to plain highlighting instead
    /// of failing the page.
    pub fn load(&self) -> BTreeMap<String, TagEntry> {
        let Ok(raw) = fs::read_to_string(self.config_path()) else {
            return BTreeMap::new();
        };

        match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!("couldn't parse {}: {err}", self.config_path());
                BTreeMap::new()
            }
        }
    }

    /// Resolve tag names to their enabled configuration entries. An empty
    /// name list selects every enabled entry.
    pub fn resolve(&self, names: &[String]) -> TagSet {
        let mut entries: BTreeMap<String, TagEntry> = self
            .load()
            .into_iter()
            .filter(|(_, entry)| entry.enabled)
            .collect();

        if !names.is_empty() {
            entries.retain(|name, _| names.iter().any(|n| n == name));
        }

        TagSet {
            dir: self.dir.clone(),
            entries,
        }
    }

    /// Names of all tag files present in the directory, configured or
    /// not. Used by host UIs offering tag selection.
    pub fn list_tag_files(&self) -> Vec<String> {
        let pattern = self.dir.join("*.xml");
        let Ok(paths) = glob::glob(pattern.as_str()) else {
            return Vec::new();
        };

        let mut names: Vec<String> = paths
            .flatten()
            .filter_map(|path| {
                let stem = path.file_stem()?.to_str()?;
                Some(stem.to_string())
            })
            .collect();
        names.sort();
        names
    }
}

/// The resolved, enabled subset of tag entries a single build uses.
/// Ordering is deterministic (sorted by name) so that fingerprint inputs
/// and tool invocations built from it are reproducible.
pub struct TagSet {
    dir: Utf8PathBuf,
    entries: BTreeMap<String, TagEntry>,
}

impl TagSet {
    /// An empty set, for pipelines running without cross-referencing.
    pub fn empty() -> Self {
        Self {
            dir: Utf8PathBuf::new(),
            entries: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TagEntry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn file_path(&self, name: &str) -> Utf8PathBuf {
        self.dir.join(name).with_extension("xml")
    }

    /// Pairs of (tag file path, documentation base URL) in name order,
    /// ready to be joined into the tool's reference-files parameter.
    pub fn references(&self) -> impl Iterator<Item = (Utf8PathBuf, &str)> {
        self.entries
            .iter()
            .map(|(name, entry)| (self.file_path(name), entry.docu_url.as_str()))
    }

    /// Find the documentation base URL for the tag file the tool named in
    /// a reference node. The tool echoes back the path it was handed, so
    /// both the literal and the canonicalized form are accepted.
    pub fn base_url_for(&self, external: &str) -> Option<&str> {
        self.entries.iter().find_map(|(name, entry)| {
            let path = self.file_path(name);
            let matches = path.as_str() == external
                || path
                    .canonicalize_utf8()
                    .map(|real| real.as_str() == external)
                    .unwrap_or(false);
            matches.then_some(entry.docu_url.as_str())
        })
    }

    /// Whether any entry forces the queued build path.
    pub fn force_runner(&self) -> bool {
        self.entries.values().any(|entry| entry.force_runner)
    }

    /// Files whose modification invalidates artifacts built against this
    /// set: every tag file, the tag configuration itself, and the tool's
    /// base configuration.
    pub fn dependency_files(&self, base_config: &Utf8Path) -> Vec<Utf8PathBuf> {
        let mut files: Vec<Utf8PathBuf> =
            self.entries.keys().map(|name| self.file_path(name)).collect();
        files.push(self.dir.join(CONFIG_FILE));
        files.push(base_config.to_owned());
        files
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn write_config(dir: &Utf8Path, json: &str) {
        fs::write(dir.join(CONFIG_FILE), json).unwrap();
    }

    fn temp_registry(json: &str) -> (tempfile::TempDir, TagRegistry) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap().to_owned();
        write_config(&dir, json);
        (tmp, TagRegistry::new(dir))
    }

    const CONFIG: &str = r#"{
        "libc": {"docu_url": "https://example.org/libc/", "enabled": true},
        "libfoo": {"docu_url": "https://example.org/libfoo/", "enabled": false},
        "libbar": {"docu_url": "https://example.org/libbar/", "enabled": true, "force_runner": true}
    }"#;

    #[test]
    fn resolve_filters_disabled_and_unnamed() {
        let (_tmp, registry) = temp_registry(CONFIG);

        let set = registry.resolve(&["libc".into(), "libfoo".into()]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().next().unwrap().0, "libc");
    }

    #[test]
    fn resolve_with_empty_names_selects_all_enabled() {
        let (_tmp, registry) = temp_registry(CONFIG);

        let set = registry.resolve(&[]);
        let names: Vec<&str> = set.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["libbar", "libc"]);
    }

    #[test]
    fn missing_config_degrades_to_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap().to_owned();
        let registry = TagRegistry::new(dir);
        assert!(registry.load().is_empty());
        assert!(registry.resolve(&["libc".into()]).is_empty());
    }

    #[test]
    fn force_runner_aggregates_over_entries() {
        let (_tmp, registry) = temp_registry(CONFIG);
        assert!(!registry.resolve(&["libc".into()]).force_runner());
        assert!(registry.resolve(&[]).force_runner());
    }

    #[test]
    fn base_url_matches_tag_file_path() {
        let (_tmp, registry) = temp_registry(CONFIG);
        let set = registry.resolve(&["libc".into()]);

        let path = set.file_path("libc");
        assert_eq!(set.base_url_for(path.as_str()), Some("https://example.org/libc/"));
        assert_eq!(set.base_url_for("/nonexistent/other.xml"), None);
    }

    #[test]
    fn dependency_files_cover_tags_and_config() {
        let (_tmp, registry) = temp_registry(CONFIG);
        let set = registry.resolve(&["libc".into()]);

        let deps = set.dependency_files(Utf8Path::new("/etc/doxygen.conf"));
        assert_eq!(deps.len(), 3);
        assert!(deps[0].as_str().ends_with("libc.xml"));
        assert!(deps[1].as_str().ends_with(CONFIG_FILE));
        assert_eq!(deps[2], Utf8PathBuf::from("/etc/doxygen.conf"));
    }

    #[test]
    fn lists_tag_files_in_directory() {
        let (tmp, registry) = temp_registry(CONFIG);
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        fs::write(dir.join("libc.xml"), "<tagfile/>").unwrap();
        fs::write(dir.join("extra.xml"), "<tagfile/>").unwrap();

        assert_eq!(registry.list_tag_files(), vec!["extra", "libc"]);
    }
}
