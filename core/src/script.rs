use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A single resolved automation script.
///
/// `source` is the raw document text and stays opaque to the orchestrator;
/// executors parse it on demand with [`ScriptDefinition::document`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDefinition {
    pub name: String,
    pub path: PathBuf,
    pub ordinal: usize,
    pub source: String,
}

impl ScriptDefinition {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        ordinal: usize,
        source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            ordinal,
            source: source.into(),
        }
    }

    pub fn document(&self) -> Result<ScriptDocument, ScriptParseError> {
        parse_document(&self.source)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Web,
    Android,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Web => "web",
            Platform::Android => "android",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ScriptDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web: Option<WebTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub android: Option<AndroidTarget>,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WebTarget {
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport_height: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AndroidTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TaskSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default)]
    pub flow: Vec<FlowItem>,
}

/// One flow entry: an action key plus optional modifiers, e.g.
/// `{ aiInput: "rust", locate: "the search box" }`.
pub type FlowItem = BTreeMap<String, serde_yaml::Value>;

impl ScriptDocument {
    /// The platform this document drives, or `None` when it declares zero
    /// or both target sections.
    pub fn platform(&self) -> Option<Platform> {
        match (&self.web, &self.android) {
            (Some(_), None) => Some(Platform::Web),
            (None, Some(_)) => Some(Platform::Android),
            _ => None,
        }
    }

    pub fn total_actions(&self) -> usize {
        self.tasks.iter().map(|task| task.flow.len()).sum()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptParseError {
    #[error("invalid script document: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub fn parse_document(source: &str) -> Result<ScriptDocument, ScriptParseError> {
    Ok(serde_yaml::from_str(source)?)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ResolutionError {
    #[error("script path {} is not accessible: {reason}", .path.display())]
    InvalidPath { path: PathBuf, reason: String },
    #[error("failed to read script {}: {reason}", .path.display())]
    Unreadable { path: PathBuf, reason: String },
    #[error("no scripts to execute")]
    NoScripts,
}

const SCRIPT_EXTENSIONS: &[&str] = &["yaml", "yml"];

/// Resolve a file or directory into ordered script definitions.
///
/// A file yields exactly one script regardless of its extension. A
/// directory is walked recursively without following symlinked
/// directories; every `.yaml`/`.yml` file is included once and ordinals
/// follow lexicographic path order. An empty directory
/// resolves to an empty list.
pub fn resolve_scripts(path: &Path) -> Result<Vec<ScriptDefinition>, ResolutionError> {
    let metadata = fs::metadata(path).map_err(|err| ResolutionError::InvalidPath {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;

    let files = if metadata.is_dir() {
        collect_script_files(path)?
    } else {
        vec![path.to_path_buf()]
    };

    let root = metadata.is_dir().then_some(path);

    files
        .into_iter()
        .enumerate()
        .map(|(ordinal, file)| {
            let source = fs::read_to_string(&file).map_err(|err| ResolutionError::Unreadable {
                path: file.clone(),
                reason: err.to_string(),
            })?;
            let name = script_name(&file, root);
            tracing::debug!(ordinal, name = %name, path = %file.display(), "resolved script");
            Ok(ScriptDefinition::new(name, file, ordinal, source))
        })
        .collect()
}

fn collect_script_files(dir: &Path) -> Result<Vec<PathBuf>, ResolutionError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|err| ResolutionError::InvalidPath {
            path: err.path().unwrap_or(dir).to_path_buf(),
            reason: err.to_string(),
        })?;
        // Symlinked directories are not descended into; symlinked files count.
        if entry.file_type().is_dir() || !entry.path().is_file() {
            continue;
        }
        if has_script_extension(entry.path()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

fn has_script_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SCRIPT_EXTENSIONS
                .iter()
                .any(|candidate| ext.eq_ignore_ascii_case(candidate))
        })
        .unwrap_or(false)
}

fn script_name(file: &Path, root: Option<&Path>) -> String {
    match root.and_then(|root| file.strip_prefix(root).ok()) {
        Some(relative) => relative.to_string_lossy().replace('\\', "/"),
        None => file
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| file.to_string_lossy().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEB_SCRIPT: &str = r#"
web:
  url: https://example.com
  viewport_width: 1024
tasks:
  - name: search
    flow:
      - aiInput: "rust"
        locate: "the search box"
      - aiTap: "search button"
      - sleep: 500
"#;

    #[test]
    fn parses_web_document() {
        let document = parse_document(WEB_SCRIPT).expect("document should parse");
        assert_eq!(document.platform(), Some(Platform::Web));
        let web = document.web.as_ref().expect("web target present");
        assert_eq!(web.url, "https://example.com");
        assert_eq!(web.viewport_width, Some(1024));
        assert_eq!(document.tasks.len(), 1);
        assert_eq!(document.total_actions(), 3);
        assert!(document.tasks[0].flow[0].contains_key("locate"));
    }

    #[test]
    fn platform_is_ambiguous_with_both_targets() {
        let source = r#"
web:
  url: https://example.com
android:
  device_id: emulator-5554
tasks: []
"#;
        let document = parse_document(source).expect("document should parse");
        assert_eq!(document.platform(), None);
    }

    #[test]
    fn rejects_unknown_top_level_keys() {
        let err = parse_document("webb:\n  url: x\n").expect_err("unknown key must fail");
        assert!(err.to_string().contains("invalid script document"));
    }

    #[test]
    fn resolves_single_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("login.yaml");
        fs::write(&file, WEB_SCRIPT).expect("write script");

        let scripts = resolve_scripts(&file).expect("resolution succeeds");
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].name, "login.yaml");
        assert_eq!(scripts[0].ordinal, 0);
        assert_eq!(scripts[0].source, WEB_SCRIPT);
    }

    #[test]
    fn resolves_directory_in_lexicographic_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("nested");
        fs::create_dir_all(&nested).expect("create nested dir");
        fs::write(dir.path().join("b.yaml"), WEB_SCRIPT).expect("write b");
        fs::write(dir.path().join("a.yml"), WEB_SCRIPT).expect("write a");
        fs::write(nested.join("c.yaml"), WEB_SCRIPT).expect("write c");
        fs::write(dir.path().join("notes.txt"), "ignored").expect("write notes");

        let scripts = resolve_scripts(dir.path()).expect("resolution succeeds");
        let names: Vec<&str> = scripts.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a.yml", "b.yaml", "nested/c.yaml"]);
        let ordinals: Vec<usize> = scripts.iter().map(|s| s.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
    }

    #[test]
    fn empty_directory_resolves_to_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let scripts = resolve_scripts(dir.path()).expect("resolution succeeds");
        assert!(scripts.is_empty());
    }

    #[test]
    fn missing_path_is_a_resolution_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing.yaml");
        let err = resolve_scripts(&missing).expect_err("missing path must fail");
        assert!(matches!(err, ResolutionError::InvalidPath { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directory_loop_yields_each_script_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a.yaml"), WEB_SCRIPT).expect("write a");
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).expect("symlink");

        let scripts = resolve_scripts(dir.path()).expect("resolution succeeds");
        let names: Vec<&str> = scripts.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a.yaml"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_script_file_is_included() {
        let dir = tempfile::tempdir().expect("tempdir");
        let shared = tempfile::tempdir().expect("shared tempdir");
        let target = shared.path().join("shared.yaml");
        fs::write(&target, WEB_SCRIPT).expect("write shared");
        std::os::unix::fs::symlink(&target, dir.path().join("linked.yaml")).expect("symlink");

        let scripts = resolve_scripts(dir.path()).expect("resolution succeeds");
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].name, "linked.yaml");
    }
}
