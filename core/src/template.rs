use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const CONFIG_FILE: &str = "marionette.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectTemplate {
    Basic,
    Web,
    Android,
}

impl ProjectTemplate {
    pub const ALL: [ProjectTemplate; 3] = [
        ProjectTemplate::Basic,
        ProjectTemplate::Web,
        ProjectTemplate::Android,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectTemplate::Basic => "basic",
            ProjectTemplate::Web => "web",
            ProjectTemplate::Android => "android",
        }
    }

    fn config(&self) -> &'static str {
        match self {
            ProjectTemplate::Basic => BASIC_CONFIG,
            ProjectTemplate::Web => WEB_CONFIG,
            ProjectTemplate::Android => ANDROID_CONFIG,
        }
    }

    fn example_script(&self) -> &'static str {
        match self {
            ProjectTemplate::Basic | ProjectTemplate::Web => WEB_EXAMPLE,
            ProjectTemplate::Android => ANDROID_EXAMPLE,
        }
    }
}

impl fmt::Display for ProjectTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|template| template.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TemplateError::UnknownTemplate(s.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("unknown template '{0}' (expected basic, web or android)")]
    UnknownTemplate(String),
    #[error("invalid project name '{0}'")]
    InvalidName(String),
    #[error("{} already exists", .0.display())]
    AlreadyExists(PathBuf),
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Scaffold `<parent>/<name>` with a config file, an example script and a
/// reports directory. Never overwrites an existing path.
pub fn create_project(
    parent: &Path,
    name: &str,
    template: ProjectTemplate,
) -> Result<PathBuf, TemplateError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(['/', '\\'])
    {
        return Err(TemplateError::InvalidName(name.to_string()));
    }

    let root = parent.join(trimmed);
    if root.exists() {
        return Err(TemplateError::AlreadyExists(root));
    }

    let scripts = root.join("scripts");
    create_dir(&scripts)?;
    create_dir(&root.join("reports"))?;
    write_file(&root.join(CONFIG_FILE), template.config())?;
    write_file(&scripts.join("example.yaml"), template.example_script())?;
    write_file(&root.join(".gitignore"), "reports/\n")?;

    tracing::info!(path = %root.display(), template = %template, "created project");
    Ok(root)
}

fn create_dir(path: &Path) -> Result<(), TemplateError> {
    fs::create_dir_all(path).map_err(|source| TemplateError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, contents: &str) -> Result<(), TemplateError> {
    fs::write(path, contents).map_err(|source| TemplateError::Io {
        path: path.to_path_buf(),
        source,
    })
}

const BASIC_CONFIG: &str = "\
execution:
  concurrent: 1
  continue_on_error: false
  generate_report: true
  report_format: html
  report_dir: reports
";

const WEB_CONFIG: &str = "\
web:
  headless: true
  viewport_width: 1280
  viewport_height: 720
  driver: marionette-web
execution:
  concurrent: 2
  continue_on_error: true
  generate_report: true
  report_format: html
  report_dir: reports
";

const ANDROID_CONFIG: &str = "\
android:
  # device_id: emulator-5554
  driver: marionette-android
  adb: adb
execution:
  concurrent: 1
  continue_on_error: false
  generate_report: true
  report_format: junit
  report_dir: reports
";

const WEB_EXAMPLE: &str = "\
web:
  url: https://www.example.com
tasks:
  - name: open the landing page
    flow:
      - aiWaitFor: the page heading is visible
        timeout: 10000
      - aiAssert: the heading mentions Example Domain
      - logScreenshot: landing page
";

const ANDROID_EXAMPLE: &str = "\
android:
  launch: com.android.settings
tasks:
  - name: open settings
    flow:
      - aiWaitFor: the settings list is visible
      - aiTap: the search icon
      - aiInput: battery
        locate: the search field
      - sleep: 1000
      - aiAssert: a battery entry is listed
";
