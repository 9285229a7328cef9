use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Which hardware channel a dispense session drives.
///
/// An explicit choice from configuration; channels are never picked by
/// sniffing device-id strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelConfig {
    UsbSerial,
    BridgeUart,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig::UsbSerial
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct UsbConfig {
    /// Explicit port path, skipping discovery (e.g. a cached operator pick).
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default = "UsbConfig::default_baud")]
    pub baud_rate: u32,
    /// USB vendor ids accepted during discovery; empty accepts any USB port.
    #[serde(default)]
    pub allowed_vids: Vec<u16>,
}

impl UsbConfig {
    fn default_baud() -> u32 {
        9600
    }
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: Self::default_baud(),
            allowed_vids: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "BridgeConfig::default_socket")]
    pub socket: PathBuf,
}

impl BridgeConfig {
    fn default_socket() -> PathBuf {
        PathBuf::from("/run/vend/uart-bridge.sock")
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            socket: Self::default_socket(),
        }
    }
}

/// Uniform open-retry policy for acquiring a channel.
///
/// One knob for every caller; individual screens do not carry their own
/// retry loops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Wait between consecutive frames so a motor can finish one physical
    /// dispense cycle. Uniform across motor types.
    #[serde(default = "EngineConfig::default_settle_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "EngineConfig::default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "EngineConfig::default_open_attempts")]
    pub open_retry_attempts: u32,
    #[serde(default = "EngineConfig::default_open_backoff_ms")]
    pub open_retry_backoff_ms: u64,
    #[serde(default)]
    pub usb: UsbConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

impl EngineConfig {
    fn default_settle_ms() -> u64 {
        5000
    }
    fn default_send_timeout_ms() -> u64 {
        10_000
    }
    fn default_open_attempts() -> u32 {
        3
    }
    fn default_open_backoff_ms() -> u64 {
        1000
    }

    /// Load from a TOML file; a missing file yields the defaults, and zero
    /// values fall back to the defaults rather than disabling timing.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let txt = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg: EngineConfig =
            toml::from_str(&txt).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if cfg.settle_delay_ms == 0 {
            cfg.settle_delay_ms = Self::default_settle_ms();
        }
        if cfg.send_timeout_ms == 0 {
            cfg.send_timeout_ms = Self::default_send_timeout_ms();
        }
        if cfg.open_retry_attempts == 0 {
            cfg.open_retry_attempts = Self::default_open_attempts();
        }
        if cfg.usb.baud_rate == 0 {
            cfg.usb.baud_rate = UsbConfig::default_baud();
        }
        Ok(cfg)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.open_retry_attempts,
            backoff: Duration::from_millis(self.open_retry_backoff_ms),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            settle_delay_ms: Self::default_settle_ms(),
            send_timeout_ms: Self::default_send_timeout_ms(),
            open_retry_attempts: Self::default_open_attempts(),
            open_retry_backoff_ms: Self::default_open_backoff_ms(),
            usb: UsbConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}
