use crate::outcome::{RunResult, ScriptOutcome, ScriptStatus};
use crate::policy::ReportSettings;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Html,
    Markdown,
    Json,
    Junit,
}

impl ReportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFormat::Html => "html",
            ReportFormat::Markdown => "markdown",
            ReportFormat::Json => "json",
            ReportFormat::Junit => "junit",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Html => "html",
            ReportFormat::Markdown => "md",
            ReportFormat::Json => "json",
            ReportFormat::Junit => "xml",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to render {format} report: {reason}")]
    Render {
        format: ReportFormat,
        reason: String,
    },
    #[error("failed to create report directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write report {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Renders a finished run into a persisted artifact and returns where it
/// was written. Implementations must not depend on anything but the result.
pub trait ReportBuilder {
    fn build(&self, result: &RunResult) -> Result<PathBuf, ReportError>;
}

#[derive(Debug, Clone)]
pub struct FileReportBuilder {
    output_dir: PathBuf,
    format: ReportFormat,
}

impl FileReportBuilder {
    pub fn new(output_dir: impl Into<PathBuf>, format: ReportFormat) -> Self {
        Self {
            output_dir: output_dir.into(),
            format,
        }
    }

    pub fn from_settings(settings: &ReportSettings) -> Self {
        Self::new(settings.dir.clone(), settings.format)
    }

    pub fn report_path(&self, result: &RunResult) -> PathBuf {
        let millis = result.started_at.unix_timestamp_nanos() / 1_000_000;
        self.output_dir
            .join(format!("run-{millis}.{}", self.format.extension()))
    }

    pub fn render(&self, result: &RunResult) -> Result<String, ReportError> {
        match self.format {
            ReportFormat::Html => Ok(render_html_report(result)),
            ReportFormat::Markdown => Ok(render_markdown_report(result)),
            ReportFormat::Json => {
                serde_json::to_string_pretty(result).map_err(|err| ReportError::Render {
                    format: self.format,
                    reason: err.to_string(),
                })
            }
            ReportFormat::Junit => render_junit_report(result).map_err(|reason| {
                ReportError::Render {
                    format: self.format,
                    reason,
                }
            }),
        }
    }
}

impl ReportBuilder for FileReportBuilder {
    fn build(&self, result: &RunResult) -> Result<PathBuf, ReportError> {
        let contents = self.render(result)?;
        let path = self.report_path(result);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ReportError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut file = fs::File::create(&path).map_err(|source| ReportError::Write {
            path: path.clone(),
            source,
        })?;
        file.write_all(contents.as_bytes())
            .map_err(|source| ReportError::Write {
                path: path.clone(),
                source,
            })?;
        tracing::info!(path = %path.display(), format = %self.format, "report written");
        Ok(path)
    }
}

fn timestamp(value: OffsetDateTime) -> String {
    value
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

fn optional_timestamp(value: Option<OffsetDateTime>) -> String {
    value.map(timestamp).unwrap_or_else(|| "-".to_string())
}

fn duration_label(outcome: &ScriptOutcome) -> String {
    outcome
        .duration()
        .map(|duration| format!("{} ms", duration.as_millis()))
        .unwrap_or_else(|| "-".to_string())
}

fn render_html_report(result: &RunResult) -> String {
    let summary = result.summary();
    let verdict = if result.success { "passed" } else { "failed" };

    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\" />\n");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\" />\n");
    html.push_str(&format!(
        "<title>Marionette Run – {}</title>\n",
        escape_html(&timestamp(result.started_at))
    ));
    html.push_str("<style>");
    html.push_str(
        "body{font-family:system-ui,-apple-system,\"Segoe UI\",sans-serif;background:#0f172a;color:#e2e8f0;margin:0;padding:0;}\
        header{background:#1e293b;padding:24px 32px;border-bottom:1px solid rgba(148,163,184,0.2);}\
        h1{margin:0;font-size:28px;}\
        h2{margin-top:32px;margin-bottom:12px;font-size:22px;}\
        main{padding:32px;}\
        section{margin-bottom:40px;background:#111c34;padding:24px;border-radius:12px;border:1px solid rgba(148,163,184,0.1);}\
        table{width:100%;border-collapse:collapse;margin-top:16px;font-size:14px;}\
        th,td{border:1px solid rgba(148,163,184,0.2);padding:8px 10px;text-align:left;}\
        th{background:#1e293b;font-weight:600;}\
        tr:nth-child(even){background:rgba(148,163,184,0.05);}\
        .succeeded{color:#4ade80;}.failed{color:#f87171;}.skipped{color:#facc15;}\
        pre{font-family:\"Fira Code\",Consolas,monospace;background:#0b1120;color:#f8fafc;border-radius:8px;padding:16px;overflow:auto;}\
        footer{padding:16px 32px;border-top:1px solid rgba(148,163,184,0.2);color:#94a3b8;font-size:13px;}",
    );
    html.push_str("</style>\n</head>\n<body>\n");
    html.push_str("<header>");
    html.push_str(&format!(
        "<h1>Marionette Run: <span class=\"{}\">{}</span></h1>",
        if result.success { "succeeded" } else { "failed" },
        verdict
    ));
    html.push_str(&format!(
        "<p>Started {} · finished {} · {}</p>",
        escape_html(&timestamp(result.started_at)),
        escape_html(&timestamp(result.finished_at)),
        escape_html(&summary.to_string())
    ));
    html.push_str("</header>\n<main>\n");

    if let Some(error) = &result.error {
        html.push_str("<section><h2>Run error</h2>");
        html.push_str(&format!("<pre>{}</pre>", escape_html(&error.to_string())));
        html.push_str("</section>\n");
    }

    html.push_str("<section><h2>Scripts</h2>");
    if result.outcomes.is_empty() {
        html.push_str("<p>No scripts were executed.</p>");
    } else {
        html.push_str("<table><thead><tr>");
        for column in ["#", "Script", "Status", "Duration", "Started", "Error"] {
            html.push_str(&format!("<th>{column}</th>"));
        }
        html.push_str("</tr></thead><tbody>");
        for outcome in &result.outcomes {
            html.push_str("<tr>");
            html.push_str(&format!("<td>{}</td>", outcome.ordinal + 1));
            html.push_str(&format!("<td>{}</td>", escape_html(&outcome.name)));
            html.push_str(&format!(
                "<td class=\"{status}\">{status}</td>",
                status = outcome.status
            ));
            html.push_str(&format!("<td>{}</td>", duration_label(outcome)));
            html.push_str(&format!(
                "<td>{}</td>",
                escape_html(&optional_timestamp(outcome.started_at))
            ));
            html.push_str(&format!(
                "<td>{}</td>",
                escape_html(outcome.error.as_deref().unwrap_or(""))
            ));
            html.push_str("</tr>");
        }
        html.push_str("</tbody></table>");
    }
    html.push_str("</section>\n");

    html.push_str("</main>\n<footer>Generated by marionette-core</footer>\n</body>\n</html>");
    html
}

fn render_markdown_report(result: &RunResult) -> String {
    let mut md = String::new();
    md.push_str("# Marionette Run\n\n");
    md.push_str(&format!(
        "**Result:** {}\n\n",
        if result.success { "passed" } else { "failed" }
    ));
    md.push_str(&format!(
        "_Started {} · finished {}_\n\n",
        timestamp(result.started_at),
        timestamp(result.finished_at)
    ));
    md.push_str(&format!("{}\n\n", result.summary()));

    if let Some(error) = &result.error {
        md.push_str(&format!("## Run error\n\n{}\n", error));
        return md;
    }

    md.push_str("| # | Script | Status | Duration | Error |\n");
    md.push_str("| --- | --- | --- | --- | --- |\n");
    for outcome in &result.outcomes {
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            outcome.ordinal + 1,
            sanitize_markdown_cell(&outcome.name),
            outcome.status,
            duration_label(outcome),
            sanitize_markdown_cell(outcome.error.as_deref().unwrap_or(""))
        ));
    }
    md
}

fn sanitize_markdown_cell(value: &str) -> String {
    let replaced = value.replace('\n', "<br>");
    replaced.replace('|', "\\|")
}

fn render_junit_report(result: &RunResult) -> Result<String, String> {
    let summary = result.summary();
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    emit(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;

    let total = summary.total.to_string();
    let failures = summary.failed.to_string();
    let skipped = summary.skipped.to_string();
    let seconds = format!("{:.3}", result.duration().as_secs_f64());
    let started = timestamp(result.started_at);

    let mut suite = BytesStart::new("testsuite");
    suite.push_attribute(("name", "marionette"));
    suite.push_attribute(("tests", total.as_str()));
    suite.push_attribute(("failures", failures.as_str()));
    suite.push_attribute(("errors", if result.error.is_some() { "1" } else { "0" }));
    suite.push_attribute(("skipped", skipped.as_str()));
    suite.push_attribute(("time", seconds.as_str()));
    suite.push_attribute(("timestamp", started.as_str()));
    emit(&mut writer, Event::Start(suite))?;

    if let Some(error) = &result.error {
        let message = error.to_string();
        let mut element = BytesStart::new("error");
        element.push_attribute(("message", message.as_str()));
        emit(&mut writer, Event::Empty(element))?;
    }

    for outcome in &result.outcomes {
        let path = outcome.path.to_string_lossy().to_string();
        let case_seconds = outcome
            .duration()
            .map(|duration| format!("{:.3}", duration.as_secs_f64()))
            .unwrap_or_else(|| "0.000".to_string());
        let mut case = BytesStart::new("testcase");
        case.push_attribute(("name", outcome.name.as_str()));
        case.push_attribute(("classname", path.as_str()));
        case.push_attribute(("time", case_seconds.as_str()));

        match outcome.status {
            ScriptStatus::Succeeded => emit(&mut writer, Event::Empty(case))?,
            ScriptStatus::Failed => {
                emit(&mut writer, Event::Start(case))?;
                let message = outcome.error.clone().unwrap_or_default();
                let mut failure = BytesStart::new("failure");
                failure.push_attribute(("message", message.as_str()));
                emit(&mut writer, Event::Start(failure))?;
                emit(&mut writer, Event::Text(BytesText::new(&message)))?;
                emit(&mut writer, Event::End(BytesEnd::new("failure")))?;
                emit(&mut writer, Event::End(BytesEnd::new("testcase")))?;
            }
            ScriptStatus::Skipped => {
                emit(&mut writer, Event::Start(case))?;
                emit(&mut writer, Event::Empty(BytesStart::new("skipped")))?;
                emit(&mut writer, Event::End(BytesEnd::new("testcase")))?;
            }
        }
    }

    emit(&mut writer, Event::End(BytesEnd::new("testsuite")))?;
    String::from_utf8(writer.into_inner().into_inner()).map_err(|err| err.to_string())
}

fn emit(writer: &mut Writer<Cursor<Vec<u8>>>, event: Event<'_>) -> Result<(), String> {
    writer.write_event(event).map_err(|err| err.to_string())
}

fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{ResolutionError, ScriptDefinition};

    fn at(seconds: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000 + seconds).expect("valid timestamp")
    }

    fn mixed_result() -> RunResult {
        let login = ScriptDefinition::new("login.yaml", "scripts/login.yaml", 0, "");
        let search = ScriptDefinition::new("search.yaml", "scripts/search.yaml", 1, "");
        let checkout = ScriptDefinition::new("checkout.yaml", "scripts/checkout.yaml", 2, "");
        RunResult::completed(
            vec![
                ScriptOutcome::succeeded(&login, at(0), at(2)),
                ScriptOutcome::failed(&search, "assertion <results> | missing", at(2), at(3)),
                ScriptOutcome::skipped(&checkout),
            ],
            at(0),
            at(3),
        )
    }

    #[test]
    fn html_report_lists_outcomes_escaped() {
        let builder = FileReportBuilder::new("unused", ReportFormat::Html);
        let html = builder.render(&mixed_result()).expect("render");
        assert!(html.contains("Marionette Run"));
        assert!(html.contains("login.yaml"));
        assert!(html.contains("assertion &lt;results&gt; | missing"));
        assert!(html.contains("<td class=\"skipped\">skipped</td>"));
    }

    #[test]
    fn markdown_report_escapes_pipes() {
        let builder = FileReportBuilder::new("unused", ReportFormat::Markdown);
        let md = builder.render(&mixed_result()).expect("render");
        assert!(md.contains("**Result:** failed"));
        assert!(md.contains("assertion <results> \\| missing"));
        assert!(md.contains("| 3 | checkout.yaml | skipped | - |  |"));
    }

    #[test]
    fn json_report_round_trips() {
        let result = mixed_result();
        let builder = FileReportBuilder::new("unused", ReportFormat::Json);
        let json = builder.render(&result).expect("render");
        let parsed: RunResult = serde_json::from_str(&json).expect("parse back");
        assert_eq!(parsed, result);
    }

    #[test]
    fn junit_report_counts_statuses() {
        let builder = FileReportBuilder::new("unused", ReportFormat::Junit);
        let xml = builder.render(&mixed_result()).expect("render");
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("tests=\"3\""));
        assert!(xml.contains("failures=\"1\""));
        assert!(xml.contains("skipped=\"1\""));
        assert!(xml.contains("<skipped/>"));
        assert!(xml.contains("assertion &lt;results&gt; | missing"));
    }

    #[test]
    fn junit_report_carries_run_error() {
        let result = RunResult::rejected(ResolutionError::NoScripts, at(0));
        let builder = FileReportBuilder::new("unused", ReportFormat::Junit);
        let xml = builder.render(&result).expect("render");
        assert!(xml.contains("errors=\"1\""));
        assert!(xml.contains("no scripts to execute"));
    }

    #[test]
    fn build_writes_deterministic_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let builder = FileReportBuilder::new(dir.path().join("reports"), ReportFormat::Html);
        let result = mixed_result();

        let first = builder.build(&result).expect("build");
        let second = builder.build(&result).expect("build again");
        assert_eq!(first, second);
        assert_eq!(
            first,
            dir.path().join("reports").join("run-1700000000000.html")
        );
        let contents = fs::read_to_string(&first).expect("report readable");
        assert_eq!(contents, builder.render(&result).expect("render"));
        assert!(!result.success, "building never alters the result");
    }

    #[test]
    fn build_failure_is_a_report_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("blocked");
        fs::write(&blocker, "not a directory").expect("write blocker");
        let builder = FileReportBuilder::new(blocker.join("nested"), ReportFormat::Markdown);

        let err = builder.build(&mixed_result()).expect_err("must fail");
        assert!(matches!(err, ReportError::CreateDir { .. }));
    }
}
