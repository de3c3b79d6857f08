use crate::script::{
    parse_document, resolve_scripts, AndroidTarget, FlowItem, ResolutionError, ScriptDocument,
    TaskSpec, WebTarget,
};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub location: Option<String>,
    pub message: String,
}

impl Diagnostic {
    fn error(location: Option<String>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            location,
            message: message.into(),
        }
    }

    fn warning(location: Option<String>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            location,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.level, DiagnosticLevel::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptValidation {
    pub name: String,
    pub path: PathBuf,
    pub diagnostics: Vec<Diagnostic>,
}

impl ScriptValidation {
    pub fn is_valid(&self) -> bool {
        !self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

/// Validate every script reachable from `path`.
pub fn validate_path(path: &Path) -> Result<Vec<ScriptValidation>, ResolutionError> {
    let scripts = resolve_scripts(path)?;
    if scripts.is_empty() {
        return Err(ResolutionError::NoScripts);
    }
    Ok(scripts
        .into_iter()
        .map(|script| ScriptValidation {
            diagnostics: validate_source(&script.source),
            name: script.name,
            path: script.path,
        })
        .collect())
}

pub fn validate_source(source: &str) -> Vec<Diagnostic> {
    match parse_document(source) {
        Ok(document) => validate_document(&document),
        Err(err) => vec![Diagnostic::error(None, err.to_string())],
    }
}

pub fn validate_document(document: &ScriptDocument) -> Vec<Diagnostic> {
    let mut ctx = ValidationContext::new();

    match (&document.web, &document.android) {
        (Some(_), Some(_)) => {
            ctx.error("script declares both 'web' and 'android'; choose exactly one target")
        }
        (None, None) => ctx.error("script must declare a 'web' or 'android' target"),
        _ => {}
    }
    if let Some(web) = &document.web {
        ctx.push("web".to_string());
        validate_web(web, &mut ctx);
        ctx.pop();
    }
    if let Some(android) = &document.android {
        ctx.push("android".to_string());
        validate_android(android, &mut ctx);
        ctx.pop();
    }

    if document.tasks.is_empty() {
        ctx.error("script has no tasks");
    }
    for (index, task) in document.tasks.iter().enumerate() {
        let label = if task.name.trim().is_empty() {
            format!("task #{}", index + 1)
        } else {
            format!("task {}", task.name)
        };
        ctx.push(label);
        validate_task(task, &mut ctx);
        ctx.pop();
    }

    ctx.finish()
}

struct ValidationContext {
    stack: Vec<String>,
    diagnostics: Vec<Diagnostic>,
}

impl ValidationContext {
    fn new() -> Self {
        Self {
            stack: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn push(&mut self, label: String) {
        self.stack.push(label);
    }

    fn pop(&mut self) {
        self.stack.pop();
    }

    fn location(&self) -> Option<String> {
        if self.stack.is_empty() {
            None
        } else {
            Some(self.stack.join(" > "))
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        let diag = Diagnostic::error(self.location(), message);
        self.diagnostics.push(diag);
    }

    fn warning(&mut self, message: impl Into<String>) {
        let diag = Diagnostic::warning(self.location(), message);
        self.diagnostics.push(diag);
    }

    fn finish(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

fn validate_web(web: &WebTarget, ctx: &mut ValidationContext) {
    let url = web.url.trim();
    if url.is_empty() {
        ctx.error("parameter 'url' is required");
    } else if !(url.starts_with("http://")
        || url.starts_with("https://")
        || url.starts_with("file://"))
    {
        ctx.warning(format!(
            "url '{url}' has no http(s):// or file:// scheme; the driver may reject it"
        ));
    }
    if web.viewport_width == Some(0) || web.viewport_height == Some(0) {
        ctx.error("viewport dimensions must be greater than zero");
    }
}

fn validate_android(android: &AndroidTarget, ctx: &mut ValidationContext) {
    if let Some(device) = &android.device_id {
        if device.trim().is_empty() {
            ctx.error("parameter 'device_id' cannot be empty");
        }
    }
    if let Some(launch) = &android.launch {
        if launch.trim().is_empty() {
            ctx.error("parameter 'launch' cannot be empty");
        }
    }
}

fn validate_task(task: &TaskSpec, ctx: &mut ValidationContext) {
    if task.name.trim().is_empty() {
        ctx.error("task name cannot be empty");
    }
    if task.flow.is_empty() {
        ctx.warning("task has an empty flow");
    }
    for (index, item) in task.flow.iter().enumerate() {
        ctx.push(format!("step #{}", index + 1));
        validate_flow_item(item, ctx);
        ctx.pop();
    }
}

fn validate_flow_item(item: &FlowItem, ctx: &mut ValidationContext) {
    let actions: Vec<&ActionDef> = item.keys().filter_map(|key| lookup_action(key)).collect();

    let action = match actions.as_slice() {
        [single] => *single,
        [] => {
            if item.len() == 1 {
                if let Some(key) = item.keys().next() {
                    ctx.warning(format!(
                        "unknown action '{key}'; it is passed to the driver unchecked"
                    ));
                }
            } else {
                ctx.error("step does not contain a recognised action");
            }
            return;
        }
        several => {
            let names: Vec<&str> = several.iter().map(|def| def.name).collect();
            ctx.error(format!(
                "step contains several actions ({}); use one action per step",
                names.join(", ")
            ));
            return;
        }
    };

    if let Some(value) = item.get(action.name) {
        check_value(action, value, ctx);
    }

    for key in item.keys() {
        if key != action.name && !action.options.contains(&key.as_str()) {
            ctx.warning(format!(
                "unknown option '{}' for action '{}'; it will be ignored",
                key, action.name
            ));
        }
    }
}

fn check_value(action: &ActionDef, value: &Value, ctx: &mut ValidationContext) {
    match action.value {
        ValueKind::Prompt => match value {
            Value::String(prompt) if prompt.trim().is_empty() => {
                ctx.error(format!("action '{}' needs a non-empty prompt", action.name))
            }
            Value::String(_) => {}
            _ => ctx.error(format!("action '{}' expects a text prompt", action.name)),
        },
        ValueKind::Millis => match value.as_u64() {
            Some(_) => {}
            None => ctx.error(format!(
                "action '{}' expects a non-negative number of milliseconds",
                action.name
            )),
        },
        ValueKind::Any => {}
    }
}

#[derive(Debug, Clone, Copy)]
enum ValueKind {
    Prompt,
    Millis,
    Any,
}

struct ActionDef {
    name: &'static str,
    value: ValueKind,
    options: &'static [&'static str],
}

const BUILTIN_ACTIONS: &[ActionDef] = &[
    ActionDef {
        name: "ai",
        value: ValueKind::Prompt,
        options: &[],
    },
    ActionDef {
        name: "aiAction",
        value: ValueKind::Prompt,
        options: &[],
    },
    ActionDef {
        name: "aiTap",
        value: ValueKind::Prompt,
        options: &["deepThink"],
    },
    ActionDef {
        name: "aiHover",
        value: ValueKind::Prompt,
        options: &["deepThink"],
    },
    ActionDef {
        name: "aiInput",
        value: ValueKind::Any,
        options: &["locate", "deepThink"],
    },
    ActionDef {
        name: "aiKeyboardPress",
        value: ValueKind::Prompt,
        options: &["locate"],
    },
    ActionDef {
        name: "aiScroll",
        value: ValueKind::Any,
        options: &["locate", "direction", "scrollType", "distance"],
    },
    ActionDef {
        name: "aiAssert",
        value: ValueKind::Prompt,
        options: &["errorMessage"],
    },
    ActionDef {
        name: "aiQuery",
        value: ValueKind::Any,
        options: &["name"],
    },
    ActionDef {
        name: "aiWaitFor",
        value: ValueKind::Prompt,
        options: &["timeout"],
    },
    ActionDef {
        name: "sleep",
        value: ValueKind::Millis,
        options: &[],
    },
    ActionDef {
        name: "logScreenshot",
        value: ValueKind::Any,
        options: &["content"],
    },
    ActionDef {
        name: "javascript",
        value: ValueKind::Prompt,
        options: &["name"],
    },
];

fn lookup_action(name: &str) -> Option<&'static ActionDef> {
    BUILTIN_ACTIONS.iter().find(|action| action.name == name)
}

/// Names of the flow actions the validator understands.
pub fn builtin_actions() -> Vec<&'static str> {
    BUILTIN_ACTIONS.iter().map(|action| action.name).collect()
}
