use crate::bluetooth::BtAddr;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};
use thiserror::Error;
use uuid::Uuid;

/// `ce025ea4-00d6-44f3-ae1c-a5cba97381fd`, the turret control service.
pub const DEFAULT_SERVICE_UUID: Uuid = Uuid::from_u128(0xce02_5ea4_00d6_44f3_ae1c_a5cb_a973_81fd);
pub const DEFAULT_SERVICE_NAME: &str = "DMG Turret Control";
pub const DEFAULT_PAYLOADS: [&str; 2] = ["This is a test message.", "This is another test message."];
/// Eight inquiry units of 1.28 s.
pub const DEFAULT_INQUIRY_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything one probe run needs. Missing fields take the built-in defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
    pub service_uuid: Uuid,
    pub service_name: String,
    /// Devices to query directly; an inquiry is run when empty.
    pub addresses: Vec<BtAddr>,
    pub inquiry_secs: u64,
    pub payloads: Vec<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            service_uuid: DEFAULT_SERVICE_UUID,
            service_name: DEFAULT_SERVICE_NAME.to_owned(),
            addresses: Vec::new(),
            inquiry_secs: DEFAULT_INQUIRY_SECS,
            payloads: DEFAULT_PAYLOADS.iter().map(|&p| p.to_owned()).collect(),
        }
    }
}

impl ProbeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    pub fn inquiry(&self) -> Duration {
        Duration::from_secs(self.inquiry_secs)
    }
}
