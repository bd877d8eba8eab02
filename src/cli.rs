use crate::bluetooth::BtAddr;
use crate::config::{ConfigError, ProbeConfig};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use uuid::Uuid;

/// Find a Bluetooth RFCOMM service by UUID and name, then send it test messages.
///
/// Without arguments this probes the turret control service with the two standard
/// test messages.
#[derive(Debug, Parser)]
#[command(name = "rfcomm-probe", version)]
pub struct Cli {
    /// JSON file with probe settings; flags override it
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Service UUID to look up over SDP
    #[arg(long, value_name = "UUID")]
    pub uuid: Option<Uuid>,

    /// Exact service name to connect to
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,

    /// Query this device instead of scanning (repeatable)
    #[arg(long = "address", value_name = "ADDR")]
    pub addresses: Vec<BtAddr>,

    /// How long to scan for devices
    #[arg(long, value_name = "SECONDS")]
    pub inquiry_secs: Option<u64>,

    /// Message to send, replacing the defaults (repeatable)
    #[arg(long = "message", value_name = "TEXT")]
    pub messages: Vec<String>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Layers the flags over the config file over the defaults.
    pub fn resolve(&self) -> Result<ProbeConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ProbeConfig::load(path)?,
            None => ProbeConfig::default(),
        };
        if let Some(uuid) = self.uuid {
            config.service_uuid = uuid;
        }
        if let Some(name) = &self.name {
            config.service_name = name.clone();
        }
        if !self.addresses.is_empty() {
            config.addresses = self.addresses.clone();
        }
        if let Some(secs) = self.inquiry_secs {
            config.inquiry_secs = secs;
        }
        if !self.messages.is_empty() {
            config.payloads = self.messages.clone();
        }
        Ok(config)
    }
}
