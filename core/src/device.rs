use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AndroidDevice {
    pub id: String,
    pub state: DeviceState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Connected,
    Offline,
    Unauthorized,
    Other(String),
}

impl DeviceState {
    fn parse(raw: &str) -> Self {
        match raw {
            "device" => DeviceState::Connected,
            "offline" => DeviceState::Offline,
            "unauthorized" => DeviceState::Unauthorized,
            other => DeviceState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Connected => f.write_str("Connected"),
            DeviceState::Offline => f.write_str("Offline"),
            DeviceState::Unauthorized => f.write_str("Unauthorized"),
            DeviceState::Other(raw) => f.write_str(raw),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to run '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{program} devices' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

/// Query `adb devices` for attached devices.
pub async fn list_devices(adb: &str) -> Result<Vec<AndroidDevice>, DeviceError> {
    let output = Command::new(adb)
        .arg("devices")
        .output()
        .await
        .map_err(|source| DeviceError::Launch {
            program: adb.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(DeviceError::Failed {
            program: adb.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let devices = parse_device_list(&String::from_utf8_lossy(&output.stdout));
    tracing::debug!(count = devices.len(), "listed android devices");
    Ok(devices)
}

pub fn parse_device_list(output: &str) -> Vec<AndroidDevice> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty() && !line.starts_with("List of devices") && !line.starts_with('*')
        })
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let id = fields.next()?;
            let state = fields.next()?;
            Some(AndroidDevice {
                id: id.to_string(),
                state: DeviceState::parse(state),
            })
        })
        .collect()
}
