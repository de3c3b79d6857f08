use crate::policy::PolicyError;
use crate::script::{ResolutionError, ScriptDefinition};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScriptStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl ScriptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptStatus::Succeeded => "succeeded",
            ScriptStatus::Failed => "failed",
            ScriptStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ScriptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one scheduled script. Skipped outcomes carry no
/// timestamps because the script never started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptOutcome {
    pub ordinal: usize,
    pub name: String,
    pub path: PathBuf,
    pub status: ScriptStatus,
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
}

impl ScriptOutcome {
    pub fn succeeded(
        script: &ScriptDefinition,
        started_at: OffsetDateTime,
        finished_at: OffsetDateTime,
    ) -> Self {
        Self::finished(script, ScriptStatus::Succeeded, None, started_at, finished_at)
    }

    pub fn failed(
        script: &ScriptDefinition,
        error: impl Into<String>,
        started_at: OffsetDateTime,
        finished_at: OffsetDateTime,
    ) -> Self {
        Self::finished(
            script,
            ScriptStatus::Failed,
            Some(error.into()),
            started_at,
            finished_at,
        )
    }

    pub fn skipped(script: &ScriptDefinition) -> Self {
        Self {
            ordinal: script.ordinal,
            name: script.name.clone(),
            path: script.path.clone(),
            status: ScriptStatus::Skipped,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    fn finished(
        script: &ScriptDefinition,
        status: ScriptStatus,
        error: Option<String>,
        started_at: OffsetDateTime,
        finished_at: OffsetDateTime,
    ) -> Self {
        Self {
            ordinal: script.ordinal,
            name: script.name.clone(),
            path: script.path.clone(),
            status,
            error,
            started_at: Some(started_at),
            finished_at: Some(finished_at),
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        let (start, end) = (self.started_at?, self.finished_at?);
        Duration::try_from(end - start).ok()
    }
}

/// Run-level failure that prevented any script from being scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    pub outcomes: Vec<ScriptOutcome>,
    pub error: Option<RunError>,
    pub report_path: Option<PathBuf>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunResult {
    /// A run that never scheduled anything.
    pub fn rejected(error: impl Into<RunError>, at: OffsetDateTime) -> Self {
        Self {
            success: false,
            outcomes: Vec::new(),
            error: Some(error.into()),
            report_path: None,
            started_at: at,
            finished_at: at,
        }
    }

    /// Assemble the final result. `outcomes` must already be in ordinal
    /// order. Success requires at least one outcome and every outcome to
    /// have succeeded.
    pub fn completed(
        outcomes: Vec<ScriptOutcome>,
        started_at: OffsetDateTime,
        finished_at: OffsetDateTime,
    ) -> Self {
        let success = !outcomes.is_empty()
            && outcomes
                .iter()
                .all(|outcome| outcome.status == ScriptStatus::Succeeded);
        Self {
            success,
            outcomes,
            error: None,
            report_path: None,
            started_at,
            finished_at,
        }
    }

    pub fn with_report_path(self, path: impl Into<PathBuf>) -> Self {
        Self {
            report_path: Some(path.into()),
            ..self
        }
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            total: self.outcomes.len(),
            ..RunSummary::default()
        };
        for outcome in &self.outcomes {
            match outcome.status {
                ScriptStatus::Succeeded => summary.succeeded += 1,
                ScriptStatus::Failed => summary.failed += 1,
                ScriptStatus::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes
            .iter()
            .any(|outcome| outcome.status == ScriptStatus::Failed)
    }

    /// The message a caller should surface on failure: the top-level error
    /// when present, otherwise the first failed script in ordinal order.
    pub fn first_error(&self) -> Option<String> {
        if let Some(error) = &self.error {
            return Some(error.to_string());
        }
        self.outcomes
            .iter()
            .find(|outcome| outcome.status == ScriptStatus::Failed)
            .map(|outcome| match &outcome.error {
                Some(message) => format!("{}: {}", outcome.name, message),
                None => format!("{} failed", outcome.name),
            })
    }

    pub fn duration(&self) -> Duration {
        Duration::try_from(self.finished_at - self.started_at).unwrap_or_default()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} script(s): {} succeeded, {} failed, {} skipped",
            self.total, self.succeeded, self.failed, self.skipped
        )
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(error) = &self.error {
            writeln!(f, "Run aborted: {error}")?;
            return Ok(());
        }

        writeln!(f, "Execution results:")?;
        for outcome in &self.outcomes {
            writeln!(f, "  - [{}] {}", outcome.status, outcome.name)?;
            if let Some(message) = &outcome.error {
                for line in message.lines() {
                    writeln!(f, "      {}", line)?;
                }
            }
        }
        writeln!(f, "{}", self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(ordinal: usize) -> ScriptDefinition {
        ScriptDefinition::new(
            format!("script-{ordinal}.yaml"),
            format!("scripts/script-{ordinal}.yaml"),
            ordinal,
            "",
        )
    }

    fn at(seconds: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000 + seconds).expect("valid timestamp")
    }

    #[test]
    fn all_succeeded_is_success() {
        let outcomes = vec![
            ScriptOutcome::succeeded(&script(0), at(0), at(1)),
            ScriptOutcome::succeeded(&script(1), at(0), at(2)),
        ];
        let result = RunResult::completed(outcomes, at(0), at(2));
        assert!(result.success);
        assert!(!result.has_failures());
        assert_eq!(result.first_error(), None);
        assert_eq!(result.duration(), Duration::from_secs(2));
    }

    #[test]
    fn failure_or_skip_fails_the_run() {
        let outcomes = vec![
            ScriptOutcome::failed(&script(0), "element not found", at(0), at(1)),
            ScriptOutcome::skipped(&script(1)),
        ];
        let result = RunResult::completed(outcomes, at(0), at(1));
        assert!(!result.success);
        assert_eq!(
            result.summary(),
            RunSummary {
                total: 2,
                succeeded: 0,
                failed: 1,
                skipped: 1
            }
        );
        assert_eq!(
            result.first_error().as_deref(),
            Some("script-0.yaml: element not found")
        );
    }

    #[test]
    fn empty_completion_is_not_success() {
        let result = RunResult::completed(Vec::new(), at(0), at(0));
        assert!(!result.success);
    }

    #[test]
    fn rejected_run_reports_top_level_error() {
        let result = RunResult::rejected(ResolutionError::NoScripts, at(0));
        assert!(!result.success);
        assert!(result.outcomes.is_empty());
        assert_eq!(result.first_error().as_deref(), Some("no scripts to execute"));
        assert!(result.to_string().contains("Run aborted: no scripts to execute"));
    }

    #[test]
    fn skipped_outcome_has_no_duration() {
        assert_eq!(ScriptOutcome::skipped(&script(3)).duration(), None);
        let done = ScriptOutcome::succeeded(&script(3), at(0), at(5));
        assert_eq!(done.duration(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn report_path_does_not_change_success() {
        let result = RunResult::completed(
            vec![ScriptOutcome::succeeded(&script(0), at(0), at(1))],
            at(0),
            at(1),
        )
        .with_report_path("reports/run.html");
        assert!(result.success);
        assert_eq!(result.report_path, Some(PathBuf::from("reports/run.html")));
    }

    #[test]
    fn serializes_with_rfc3339_timestamps() {
        let result = RunResult::completed(
            vec![ScriptOutcome::succeeded(&script(0), at(0), at(1))],
            at(0),
            at(1),
        );
        let json = serde_json::to_value(&result).expect("serialize");
        assert_eq!(json["outcomes"][0]["status"], "succeeded");
        assert_eq!(json["started_at"], "2023-11-14T22:13:20Z");
    }
}
