use crate::config::Config;
use crate::report::ReportFormat;
use crate::script::Platform;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_CONCURRENCY: usize = 1;
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 720;
pub const DEFAULT_WEB_DRIVER: &str = "marionette-web";
pub const DEFAULT_ANDROID_DRIVER: &str = "marionette-android";
pub const DEFAULT_REPORT_DIR: &str = "reports";

/// Resolved, immutable parameters for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    pub concurrency: usize,
    pub continue_on_error: bool,
    pub generate_report: bool,
    pub web: WebSettings,
    pub android: AndroidSettings,
    pub report: ReportSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSettings {
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub driver: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AndroidSettings {
    pub device_id: Option<String>,
    pub driver: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSettings {
    pub format: ReportFormat,
    pub dir: PathBuf,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            continue_on_error: false,
            generate_report: true,
            web: WebSettings::default(),
            android: AndroidSettings::default(),
            report: ReportSettings::default(),
        }
    }
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            headless: false,
            viewport_width: DEFAULT_VIEWPORT_WIDTH,
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
            driver: DEFAULT_WEB_DRIVER.to_string(),
        }
    }
}

impl Default for AndroidSettings {
    fn default() -> Self {
        Self {
            device_id: None,
            driver: DEFAULT_ANDROID_DRIVER.to_string(),
        }
    }
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            format: ReportFormat::Html,
            dir: PathBuf::from(DEFAULT_REPORT_DIR),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum PolicyError {
    #[error("concurrency must be at least 1, got {0}")]
    InvalidConcurrency(i64),
    #[error("viewport must be non-zero, got {width}x{height}")]
    InvalidViewport { width: u32, height: u32 },
    #[error("{0} driver command cannot be empty")]
    EmptyDriver(Platform),
}

impl ExecutionPolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.concurrency == 0 {
            return Err(PolicyError::InvalidConcurrency(0));
        }
        if self.web.viewport_width == 0 || self.web.viewport_height == 0 {
            return Err(PolicyError::InvalidViewport {
                width: self.web.viewport_width,
                height: self.web.viewport_height,
            });
        }
        if self.web.driver.trim().is_empty() {
            return Err(PolicyError::EmptyDriver(Platform::Web));
        }
        if self.android.driver.trim().is_empty() {
            return Err(PolicyError::EmptyDriver(Platform::Android));
        }
        Ok(())
    }

    /// The platform whose executor this policy selects.
    pub fn platform(&self) -> Platform {
        if self.android.device_id.is_some() {
            Platform::Android
        } else {
            Platform::Web
        }
    }
}

/// Per-run overrides, usually from command line flags. `None` means the
/// flag was not given and the configured value applies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_on_error: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generate_report: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headless: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_format: Option<ReportFormat>,
}

impl PolicyOverrides {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.concurrency.is_none()
            && self.continue_on_error.is_none()
            && self.generate_report.is_none()
            && self.headless.is_none()
            && self.device_id.is_none()
            && self.report_format.is_none()
    }
}

/// Merge overrides over the configuration over built-in defaults, field by
/// field, then validate the result.
pub fn resolve_policy(
    config: &Config,
    overrides: &PolicyOverrides,
) -> Result<ExecutionPolicy, PolicyError> {
    let defaults = ExecutionPolicy::default();

    let requested = overrides
        .concurrency
        .or(config.execution.concurrent)
        .unwrap_or(DEFAULT_CONCURRENCY as i64);
    let concurrency = usize::try_from(requested)
        .ok()
        .filter(|value| *value >= 1)
        .ok_or(PolicyError::InvalidConcurrency(requested))?;

    let policy = ExecutionPolicy {
        concurrency,
        continue_on_error: overrides
            .continue_on_error
            .or(config.execution.continue_on_error)
            .unwrap_or(defaults.continue_on_error),
        generate_report: overrides
            .generate_report
            .or(config.execution.generate_report)
            .unwrap_or(defaults.generate_report),
        web: WebSettings {
            headless: overrides
                .headless
                .or(config.web.headless)
                .unwrap_or(defaults.web.headless),
            viewport_width: config
                .web
                .viewport_width
                .unwrap_or(defaults.web.viewport_width),
            viewport_height: config
                .web
                .viewport_height
                .unwrap_or(defaults.web.viewport_height),
            driver: config.web.driver.clone().unwrap_or(defaults.web.driver),
        },
        android: AndroidSettings {
            device_id: overrides
                .device_id
                .clone()
                .or_else(|| config.android.device_id.clone()),
            driver: config
                .android
                .driver
                .clone()
                .unwrap_or(defaults.android.driver),
        },
        report: ReportSettings {
            format: overrides
                .report_format
                .or(config.execution.report_format)
                .unwrap_or(defaults.report.format),
            dir: config
                .execution
                .report_dir
                .clone()
                .unwrap_or(defaults.report.dir),
        },
    };

    policy.validate()?;
    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AndroidConfig, ExecutionConfig, WebConfig};

    fn configured() -> Config {
        Config {
            web: WebConfig {
                headless: Some(true),
                viewport_width: Some(1920),
                viewport_height: Some(1080),
                driver: Some("node driver.js".to_string()),
            },
            android: AndroidConfig {
                device_id: Some("emulator-5554".to_string()),
                driver: None,
                adb: None,
            },
            execution: ExecutionConfig {
                concurrent: Some(4),
                continue_on_error: Some(true),
                generate_report: Some(false),
                report_format: Some(ReportFormat::Markdown),
                report_dir: Some(PathBuf::from("out")),
            },
        }
    }

    #[test]
    fn empty_sources_yield_builtin_defaults() {
        let policy = resolve_policy(&Config::default(), &PolicyOverrides::none())
            .expect("defaults are valid");
        assert_eq!(policy, ExecutionPolicy::default());
        assert_eq!(policy.concurrency, 1);
        assert!(!policy.continue_on_error);
        assert!(policy.generate_report);
        assert!(!policy.web.headless);
        assert_eq!(policy.platform(), Platform::Web);
    }

    #[test]
    fn config_values_replace_defaults() {
        let policy =
            resolve_policy(&configured(), &PolicyOverrides::none()).expect("config is valid");
        assert_eq!(policy.concurrency, 4);
        assert!(policy.continue_on_error);
        assert!(!policy.generate_report);
        assert!(policy.web.headless);
        assert_eq!(policy.web.viewport_width, 1920);
        assert_eq!(policy.web.driver, "node driver.js");
        assert_eq!(policy.android.driver, DEFAULT_ANDROID_DRIVER);
        assert_eq!(policy.report.format, ReportFormat::Markdown);
        assert_eq!(policy.report.dir, PathBuf::from("out"));
        assert_eq!(policy.platform(), Platform::Android);
    }

    #[test]
    fn overrides_win_per_field() {
        let overrides = PolicyOverrides {
            concurrency: Some(2),
            headless: Some(false),
            ..PolicyOverrides::none()
        };
        let policy = resolve_policy(&configured(), &overrides).expect("valid");
        assert_eq!(policy.concurrency, 2);
        assert!(!policy.web.headless);
        // untouched fields still come from the config
        assert!(policy.continue_on_error);
        assert!(!policy.generate_report);
        assert_eq!(policy.android.device_id.as_deref(), Some("emulator-5554"));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let overrides = PolicyOverrides {
            concurrency: Some(0),
            ..PolicyOverrides::none()
        };
        let err = resolve_policy(&Config::default(), &overrides).expect_err("must fail");
        assert_eq!(err, PolicyError::InvalidConcurrency(0));
    }

    #[test]
    fn negative_concurrency_from_config_is_rejected() {
        let mut config = Config::default();
        config.execution.concurrent = Some(-3);
        let err = resolve_policy(&config, &PolicyOverrides::none()).expect_err("must fail");
        assert_eq!(err, PolicyError::InvalidConcurrency(-3));
    }

    #[test]
    fn empty_driver_is_rejected() {
        let mut config = Config::default();
        config.web.driver = Some("   ".to_string());
        let err = resolve_policy(&config, &PolicyOverrides::none()).expect_err("must fail");
        assert_eq!(err, PolicyError::EmptyDriver(Platform::Web));
    }

    #[test]
    fn validate_catches_hand_built_policies() {
        let policy = ExecutionPolicy {
            concurrency: 0,
            ..ExecutionPolicy::default()
        };
        assert_eq!(policy.validate(), Err(PolicyError::InvalidConcurrency(0)));
    }
}
