use crate::policy::{AndroidSettings, ExecutionPolicy, WebSettings};
use crate::script::{Platform, ScriptDefinition, ScriptDocument};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

/// What a script reported about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptVerdict {
    Passed,
    Failed(String),
}

/// A fault raised while trying to execute a script, as opposed to the
/// script reporting failure.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("invalid script document {}: {reason}", .path.display())]
    InvalidScript {
        path: std::path::PathBuf,
        reason: String,
    },
    #[error("failed to parse driver command '{command}': {reason}")]
    DriverCommand { command: String, reason: String },
    #[error("failed to launch driver '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn execute(&self, script: &ScriptDefinition) -> Result<ScriptVerdict, ExecutorError>;
}

/// Pick the executor for a run: Android when the policy names a device,
/// Web otherwise.
pub fn select_executor(policy: &ExecutionPolicy) -> Arc<dyn ScriptExecutor> {
    match policy.platform() {
        Platform::Android => Arc::new(AndroidExecutor::new(policy.android.clone())),
        Platform::Web => Arc::new(WebExecutor::new(policy.web.clone())),
    }
}

#[derive(Debug, Clone)]
pub struct WebExecutor {
    settings: WebSettings,
}

impl WebExecutor {
    pub fn new(settings: WebSettings) -> Self {
        Self { settings }
    }

    fn driver_args(&self, document: &ScriptDocument) -> Vec<String> {
        let mut args = Vec::new();
        if self.settings.headless {
            args.push("--headless".to_string());
        }
        let target = document.web.as_ref();
        let width = target
            .and_then(|web| web.viewport_width)
            .unwrap_or(self.settings.viewport_width);
        let height = target
            .and_then(|web| web.viewport_height)
            .unwrap_or(self.settings.viewport_height);
        args.push("--viewport".to_string());
        args.push(format!("{width}x{height}"));
        args
    }
}

#[async_trait]
impl ScriptExecutor for WebExecutor {
    async fn execute(&self, script: &ScriptDefinition) -> Result<ScriptVerdict, ExecutorError> {
        let document = load_document(script)?;
        if let Some(mismatch) = check_platform(&document, Platform::Web) {
            return Ok(mismatch);
        }
        let args = self.driver_args(&document);
        run_driver(&self.settings.driver, args, &script.path).await
    }
}

#[derive(Debug, Clone)]
pub struct AndroidExecutor {
    settings: AndroidSettings,
}

impl AndroidExecutor {
    pub fn new(settings: AndroidSettings) -> Self {
        Self { settings }
    }

    fn driver_args(&self, document: &ScriptDocument) -> Vec<String> {
        let device = self.settings.device_id.clone().or_else(|| {
            document
                .android
                .as_ref()
                .and_then(|android| android.device_id.clone())
        });
        match device {
            Some(device) => vec!["--device".to_string(), device],
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl ScriptExecutor for AndroidExecutor {
    async fn execute(&self, script: &ScriptDefinition) -> Result<ScriptVerdict, ExecutorError> {
        let document = load_document(script)?;
        if let Some(mismatch) = check_platform(&document, Platform::Android) {
            return Ok(mismatch);
        }
        let args = self.driver_args(&document);
        run_driver(&self.settings.driver, args, &script.path).await
    }
}

fn load_document(script: &ScriptDefinition) -> Result<ScriptDocument, ExecutorError> {
    script
        .document()
        .map_err(|err| ExecutorError::InvalidScript {
            path: script.path.clone(),
            reason: err.to_string(),
        })
}

fn check_platform(document: &ScriptDocument, expected: Platform) -> Option<ScriptVerdict> {
    match document.platform() {
        Some(platform) if platform == expected => None,
        Some(platform) => Some(ScriptVerdict::Failed(format!(
            "script targets {platform}, but this run drives {expected}"
        ))),
        None => Some(ScriptVerdict::Failed(
            "script must declare exactly one of 'web' or 'android'".to_string(),
        )),
    }
}

async fn run_driver(
    command: &str,
    extra_args: Vec<String>,
    script_path: &Path,
) -> Result<ScriptVerdict, ExecutorError> {
    let mut parts = shell_words::split(command)
        .map_err(|err| ExecutorError::DriverCommand {
            command: command.to_string(),
            reason: err.to_string(),
        })?
        .into_iter();
    let program = parts.next().ok_or_else(|| ExecutorError::DriverCommand {
        command: command.to_string(),
        reason: "command is empty".to_string(),
    })?;

    let mut cmd = Command::new(&program);
    cmd.args(parts)
        .args(&extra_args)
        .arg(script_path)
        .stdin(Stdio::null())
        .kill_on_drop(true);

    debug!(%program, args = ?extra_args, script = %script_path.display(), "invoking driver");
    let timer = Instant::now();
    let output = cmd.output().await.map_err(|source| ExecutorError::Spawn {
        program: program.clone(),
        source,
    })?;
    debug!(
        %program,
        exit = ?output.status.code(),
        elapsed_ms = timer.elapsed().as_millis() as u64,
        "driver finished"
    );

    if output.status.success() {
        return Ok(ScriptVerdict::Passed);
    }

    let stderr = truncate_output(&output.stderr);
    let status = match output.status.code() {
        Some(code) => format!("driver exited with status {code}"),
        None => "driver terminated by signal".to_string(),
    };
    if stderr.trim().is_empty() {
        Ok(ScriptVerdict::Failed(status))
    } else {
        Ok(ScriptVerdict::Failed(format!("{status}: {}", stderr.trim())))
    }
}

fn truncate_output(bytes: &[u8]) -> String {
    const MAX: usize = 512;
    let text = String::from_utf8_lossy(bytes);
    if text.len() > MAX {
        let mut end = MAX;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &text[..end])
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEB_SCRIPT: &str = "web:\n  url: https://example.com\ntasks: []\n";
    const ANDROID_SCRIPT: &str = "android:\n  device_id: from-script\ntasks: []\n";

    fn script(source: &str) -> ScriptDefinition {
        ScriptDefinition::new("case.yaml", "case.yaml", 0, source)
    }

    fn web_with_driver(driver: &str) -> WebExecutor {
        WebExecutor::new(WebSettings {
            driver: driver.to_string(),
            ..WebSettings::default()
        })
    }

    #[test]
    fn web_args_prefer_script_viewport() {
        let executor = WebExecutor::new(WebSettings {
            headless: true,
            ..WebSettings::default()
        });
        let document = crate::script::parse_document(
            "web:\n  url: https://example.com\n  viewport_width: 800\ntasks: []\n",
        )
        .expect("parse");
        assert_eq!(
            executor.driver_args(&document),
            vec!["--headless", "--viewport", "800x720"]
        );
    }

    #[test]
    fn android_args_prefer_policy_device() {
        let document = crate::script::parse_document(ANDROID_SCRIPT).expect("parse");
        let configured = AndroidExecutor::new(AndroidSettings {
            device_id: Some("emulator-5554".to_string()),
            ..AndroidSettings::default()
        });
        assert_eq!(
            configured.driver_args(&document),
            vec!["--device", "emulator-5554"]
        );
        let unconfigured = AndroidExecutor::new(AndroidSettings::default());
        assert_eq!(
            unconfigured.driver_args(&document),
            vec!["--device", "from-script"]
        );
    }

    #[test]
    fn selection_follows_policy_device() {
        let mut policy = ExecutionPolicy::default();
        assert_eq!(policy.platform(), Platform::Web);
        policy.android.device_id = Some("emulator-5554".to_string());
        assert_eq!(policy.platform(), Platform::Android);
        let _executor = select_executor(&policy);
    }

    #[tokio::test]
    async fn platform_mismatch_is_a_script_failure() {
        let executor = web_with_driver("true");
        let verdict = executor
            .execute(&script(ANDROID_SCRIPT))
            .await
            .expect("mismatch is not a fault");
        assert_eq!(
            verdict,
            ScriptVerdict::Failed("script targets android, but this run drives web".to_string())
        );
    }

    #[tokio::test]
    async fn malformed_document_is_a_fault() {
        let executor = web_with_driver("true");
        let err = executor
            .execute(&script("tasks: [unterminated"))
            .await
            .expect_err("parse failure is a fault");
        assert!(matches!(err, ExecutorError::InvalidScript { .. }));
    }

    #[tokio::test]
    async fn missing_driver_program_is_a_fault() {
        let executor = web_with_driver("marionette-driver-that-does-not-exist");
        let err = executor
            .execute(&script(WEB_SCRIPT))
            .await
            .expect_err("spawn failure is a fault");
        assert!(matches!(err, ExecutorError::Spawn { .. }));
    }

    #[tokio::test]
    async fn unbalanced_driver_quotes_are_a_fault() {
        let executor = web_with_driver("node \"driver.js");
        let err = executor
            .execute(&script(WEB_SCRIPT))
            .await
            .expect_err("bad command is a fault");
        assert!(matches!(err, ExecutorError::DriverCommand { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn driver_exit_status_maps_to_verdict() {
        let passing = web_with_driver("true");
        assert_eq!(
            passing.execute(&script(WEB_SCRIPT)).await.expect("runs"),
            ScriptVerdict::Passed
        );

        let failing = web_with_driver("sh -c 'echo boom >&2; exit 3' driver");
        match failing.execute(&script(WEB_SCRIPT)).await.expect("runs") {
            ScriptVerdict::Failed(message) => {
                assert!(message.contains("status 3"), "{message}");
                assert!(message.contains("boom"), "{message}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn truncates_long_output_on_char_boundary() {
        let long = "é".repeat(400);
        let truncated = truncate_output(long.as_bytes());
        assert!(truncated.ends_with('…'));
        assert!(truncated.len() <= 512 + '…'.len_utf8());
    }
}
