pub mod config;
pub mod device;
pub mod executor;
pub mod orchestrator;
pub mod outcome;
pub mod policy;
pub mod report;
pub mod script;
pub mod template;
pub mod validation;

pub use config::{AndroidConfig, Config, ConfigError, ExecutionConfig, WebConfig};
pub use device::{list_devices, parse_device_list, AndroidDevice, DeviceError, DeviceState};
pub use executor::{
    select_executor, AndroidExecutor, ExecutorError, ScriptExecutor, ScriptVerdict, WebExecutor,
};
pub use outcome::{RunError, RunResult, RunSummary, ScriptOutcome, ScriptStatus};
pub use policy::{
    resolve_policy, AndroidSettings, ExecutionPolicy, PolicyError, PolicyOverrides,
    ReportSettings, WebSettings,
};
pub use report::{FileReportBuilder, ReportBuilder, ReportError, ReportFormat};
pub use script::{
    parse_document, resolve_scripts, AndroidTarget, FlowItem, Platform, ResolutionError,
    ScriptDefinition, ScriptDocument, ScriptParseError, TaskSpec, WebTarget,
};
pub use template::{create_project, ProjectTemplate, TemplateError};
pub use validation::{
    builtin_actions, validate_document, validate_path, validate_source, Diagnostic,
    DiagnosticLevel, ScriptValidation,
};
