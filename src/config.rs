use serde::{Deserialize, Serialize};

/// The full attribute set of one snippet instance, as parsed by the host
/// from its markup. The host owns attribute syntax; this crate only
/// consumes the validated result.
///
/// Two subsets are derived from it and never mutated in place:
/// [`SnippetOptions::tool_config`] for everything the external tool sees,
/// and [`SnippetOptions::render_config`] for options that only affect the
/// rendered markup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnippetOptions {
    /// Source language, doubles as the scratch file extension.
    pub language: String,
    /// Display filename shown by the host around the snippet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Names of the tag files to cross-reference against. Empty means
    /// every enabled tag file.
    #[serde(default)]
    pub tag_files: Vec<String>,
    /// Named tool configuration variant, when the host carries several.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doxygen_conf: Option<String>,
    /// Wrap output lines in an ordered list.
    #[serde(default)]
    pub line_numbers: bool,
    /// Queue the build instead of running the tool inline. Scheduling
    /// metadata only; excluded from every fingerprint.
    #[serde(default)]
    pub defer_to_runner: bool,
}

impl SnippetOptions {
    /// The subset that is passed to the external tool. This determines
    /// the [`TaskId`](crate::TaskId) and, together with the snippet text,
    /// the raw output cache key.
    pub fn tool_config(&self) -> ToolConfig {
        ToolConfig {
            tag_files: self.tag_files.clone(),
            doxygen_conf: self.doxygen_conf.clone(),
            language: self.language.clone(),
        }
    }

    /// The subset that only affects markup generation. Scheduling flags
    /// belong to neither subset.
    pub fn render_config(&self) -> RenderConfig {
        RenderConfig {
            line_numbers: self.line_numbers,
            filename: self.filename.clone(),
        }
    }
}

/// Tool-relevant configuration of a build task. Persisted with the task
/// row and read back verbatim when the queue executes it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(default)]
    pub tag_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doxygen_conf: Option<String>,
    pub language: String,
}

/// Rendering-only configuration of a job. Persisted with the job row so
/// the deferred delivery path can render with the original options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default)]
    pub line_numbers: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}
