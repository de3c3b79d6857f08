use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use comfy_table::{presets::ASCII_FULL, Table};
use marionette_core::template::CONFIG_FILE;
use marionette_core::{
    builtin_actions, create_project, list_devices, orchestrator, resolve_policy, resolve_scripts,
    select_executor, validate_path, Config, Diagnostic, DiagnosticLevel, FileReportBuilder,
    PolicyOverrides, ProjectTemplate, ReportBuilder, ReportFormat, RunResult, ScriptValidation,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use time::OffsetDateTime;

#[derive(Debug, Parser)]
#[command(author, version, about = "Marionette script execution orchestrator")]
struct MarionetteCli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute a script file or every script in a directory
    Run(RunArgs),
    /// Check scripts for structural problems without executing them
    Validate {
        /// Script file or directory
        path: PathBuf,
        /// Output JSON instead of a human-readable listing
        #[arg(long)]
        json: bool,
    },
    /// List attached Android devices
    Devices {
        /// Configuration file (used for the adb command)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Create a new project directory
    Init {
        /// Project directory name
        name: String,
        /// Project template (basic, web, android)
        #[arg(short, long, default_value = "basic")]
        template: ProjectTemplate,
    },
    /// Print version information
    Version,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Script file or directory
    script_path: PathBuf,
    /// Configuration file (defaults to ./marionette.yaml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Run the browser without a visible window
    #[arg(long)]
    headless: bool,
    /// Android device id; selects the Android executor
    #[arg(short, long)]
    device: Option<String>,
    /// Maximum number of scripts executing at once
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    concurrent: Option<i64>,
    /// Keep dispatching scripts after a failure
    #[arg(long)]
    continue_on_error: bool,
    /// Write a report after the run
    #[arg(long, overrides_with = "no_report")]
    report: bool,
    /// Do not write a report
    #[arg(long, overrides_with = "report")]
    no_report: bool,
    /// Report format
    #[arg(long)]
    format: Option<FormatArg>,
    /// Print the run result as JSON
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn overrides(&self) -> PolicyOverrides {
        let generate_report = match (self.report, self.no_report) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        PolicyOverrides {
            concurrency: self.concurrent,
            continue_on_error: self.continue_on_error.then_some(true),
            generate_report,
            headless: self.headless.then_some(true),
            device_id: self.device.clone(),
            report_format: self.format.map(ReportFormat::from),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Html,
    Markdown,
    Json,
    Junit,
}

impl From<FormatArg> for ReportFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Html => ReportFormat::Html,
            FormatArg::Markdown => ReportFormat::Markdown,
            FormatArg::Json => ReportFormat::Json,
            FormatArg::Junit => ReportFormat::Junit,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = MarionetteCli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Run(args) => run_scripts(args).await,
        Command::Validate { path, json } => validate_scripts(&path, json),
        Command::Devices { config } => show_devices(config.as_deref()).await,
        Command::Init { name, template } => init_project(&name, template),
        Command::Version => {
            println!("marionette {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    match explicit {
        Some(path) => Ok(Config::load(path)?),
        None => {
            let default = Path::new(CONFIG_FILE);
            if default.is_file() {
                Ok(Config::load(default)?)
            } else {
                Ok(Config::default())
            }
        }
    }
}

async fn run_scripts(args: RunArgs) -> anyhow::Result<ExitCode> {
    let config = load_config(args.config.as_deref())?;

    let policy = match resolve_policy(&config, &args.overrides()) {
        Ok(policy) => policy,
        Err(err) => {
            let result = RunResult::rejected(err, OffsetDateTime::now_utc());
            return output_run(&result, args.json);
        }
    };
    tracing::debug!(?policy, "resolved execution policy");

    let scripts = match resolve_scripts(&args.script_path) {
        Ok(scripts) => scripts,
        Err(err) => {
            let result = RunResult::rejected(err, OffsetDateTime::now_utc());
            return output_run(&result, args.json);
        }
    };

    let executor = select_executor(&policy);
    let mut result = orchestrator::run(scripts, &policy, executor).await;

    if policy.generate_report && result.error.is_none() {
        let builder = FileReportBuilder::from_settings(&policy.report);
        match builder.build(&result) {
            Ok(path) => result = result.with_report_path(path),
            Err(err) => {
                tracing::error!(%err, "report generation failed");
                eprintln!("{} {err}", "Report error:".red());
            }
        }
    }

    output_run(&result, args.json)
}

fn output_run(result: &RunResult, json: bool) -> anyhow::Result<ExitCode> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        if !result.outcomes.is_empty() {
            println!("{}", render_outcome_table(result));
        }
        println!("{}", result.summary());
        if let Some(path) = &result.report_path {
            println!("{} {}", "Report:".green(), path.display());
        }
        if result.success {
            println!("{}", "✅ Execution completed successfully".green());
        } else {
            println!("{}", "❌ Execution failed".red());
            if let Some(error) = result.first_error() {
                println!("{} {error}", "Error:".red());
            }
        }
    }

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn render_outcome_table(result: &RunResult) -> String {
    let mut display = Table::new();
    display.load_preset(ASCII_FULL);
    display.set_header(vec!["#", "Script", "Status", "Duration", "Error"]);

    for outcome in &result.outcomes {
        let duration = outcome
            .duration()
            .map(|elapsed| format!("{:.2}s", elapsed.as_secs_f64()))
            .unwrap_or_else(|| "-".to_string());
        display.add_row(vec![
            (outcome.ordinal + 1).to_string(),
            outcome.name.clone(),
            outcome.status.to_string(),
            duration,
            outcome.error.clone().unwrap_or_default(),
        ]);
    }

    display.to_string()
}

fn validate_scripts(path: &Path, json: bool) -> anyhow::Result<ExitCode> {
    let validations = validate_path(path)
        .with_context(|| format!("failed to validate {}", path.display()))?;
    let invalid = validations.iter().filter(|v| !v.is_valid()).count();

    if json {
        println!("{}", serde_json::to_string_pretty(&validations)?);
    } else {
        for validation in &validations {
            print_validation(validation);
        }
        if let Some(hint) = known_actions_hint(&validations) {
            println!("{hint}");
        }
        if invalid == 0 {
            println!(
                "{}",
                format!("✅ {} script(s) valid", validations.len()).green()
            );
        } else {
            println!(
                "{}",
                format!("❌ {invalid} of {} script(s) invalid", validations.len()).red()
            );
        }
    }

    Ok(if invalid == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Listed after the diagnostics so a misspelled action can be corrected
/// without looking anything up.
fn known_actions_hint(validations: &[ScriptValidation]) -> Option<String> {
    validations
        .iter()
        .any(|validation| !validation.diagnostics.is_empty())
        .then(|| format!("Known actions: {}", builtin_actions().join(", ")))
}

fn print_validation(validation: &ScriptValidation) {
    let marker = if validation.is_valid() {
        "ok".green()
    } else {
        "invalid".red()
    };
    println!("[{marker}] {}", validation.name);
    print_diagnostics(&validation.diagnostics);
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        let level = match diagnostic.level {
            DiagnosticLevel::Error => "error".red(),
            DiagnosticLevel::Warning => "warn".yellow(),
        };
        match &diagnostic.location {
            Some(location) => println!("  - [{level}] {location}: {}", diagnostic.message),
            None => println!("  - [{level}] {}", diagnostic.message),
        }
    }
}

async fn show_devices(config: Option<&Path>) -> anyhow::Result<ExitCode> {
    let config = load_config(config)?;
    let devices = list_devices(config.adb_command())
        .await
        .context("failed to list Android devices")?;

    if devices.is_empty() {
        println!("{}", "No Android devices found".yellow());
        return Ok(ExitCode::SUCCESS);
    }

    let mut display = Table::new();
    display.load_preset(ASCII_FULL);
    display.set_header(vec!["Device ID", "Status"]);
    for device in &devices {
        display.add_row(vec![device.id.clone(), device.state.to_string()]);
    }
    println!("{display}");
    Ok(ExitCode::SUCCESS)
}

fn init_project(name: &str, template: ProjectTemplate) -> anyhow::Result<ExitCode> {
    let root = create_project(Path::new("."), name, template)
        .with_context(|| format!("failed to create project '{name}'"))?;

    println!(
        "{} {} ({} template)",
        "Created project".green(),
        root.display(),
        template
    );
    println!("Next steps:");
    println!("  cd {name}");
    println!("  marionette validate scripts");
    println!("  marionette run scripts");
    Ok(ExitCode::SUCCESS)
}
