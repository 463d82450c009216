//! Configuration file support for cxlfw.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (CXLFW_*)
//! 3. Local config file (./cxlfw.toml)
//! 4. Global config file (~/.config/cxlfw/config.toml)

use cxlfw::EmulatorConfig;
use cxlfw::firmware::{
    ActivationConfig, DEFAULT_ACTIVATE_ATTEMPTS, DEFAULT_ACTIVATE_INTERVAL, DEFAULT_POLL_ATTEMPTS,
    DEFAULT_POLL_INTERVAL, DEFAULT_STEP_ATTEMPTS, DEFAULT_STEP_DELAY, FW_BLOCK_SIZE,
    TransferConfig, TransferKind,
};
use cxlfw::retry::RetryPolicy;
use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local configuration file name.
const LOCAL_CONFIG: &str = "cxlfw.toml";

/// Device selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Default memory device (e.g., "mem0").
    pub name: Option<String>,
    /// File holding the emulated device state.
    pub emulator_state: Option<PathBuf>,
}

/// Transfer tuning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Bytes per transfer block (multiple of 128).
    pub block_size: Option<usize>,
    /// Attempts per block while the device is busy.
    pub step_attempts: Option<u32>,
    /// Delay between block attempts, in milliseconds.
    pub step_delay_ms: Option<u64>,
    /// Background status polls per block.
    pub poll_attempts: Option<u32>,
    /// Delay between status polls, in milliseconds.
    pub poll_interval_ms: Option<u64>,
    /// Wall-clock limit for each retry or poll loop, in seconds.
    pub deadline_secs: Option<u64>,
}

/// Activation tuning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivateSettings {
    /// Attempts (and polls) while the device is busy.
    pub attempts: Option<u32>,
    /// Delay between attempts, in milliseconds.
    pub interval_ms: Option<u64>,
}

/// Emulated device behaviour.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmulatorSettings {
    /// Busy replies before each mutating command is accepted.
    pub busy_replies: Option<u32>,
    /// Status polls each transfer block stays in progress.
    pub processing_polls: Option<u32>,
    /// Status polls an activation stays in progress.
    pub activation_polls: Option<u32>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Device selection.
    #[serde(default)]
    pub device: DeviceConfig,
    /// Transfer tuning.
    #[serde(default)]
    pub transfer: TransferSettings,
    /// Activation tuning.
    #[serde(default)]
    pub activate: ActivateSettings,
    /// Emulated device behaviour.
    #[serde(default)]
    pub emulator: EmulatorSettings,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                if let Some(global_config) = Self::load_from_file(&global_path) {
                    debug!("Loaded global config from {}", global_path.display());
                    config.merge(global_config);
                }
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "cxlfw").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one. Set fields in `other` win.
    fn merge(&mut self, other: Self) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.device.name, other.device.name);
        take(&mut self.device.emulator_state, other.device.emulator_state);

        take(&mut self.transfer.block_size, other.transfer.block_size);
        take(&mut self.transfer.step_attempts, other.transfer.step_attempts);
        take(&mut self.transfer.step_delay_ms, other.transfer.step_delay_ms);
        take(&mut self.transfer.poll_attempts, other.transfer.poll_attempts);
        take(
            &mut self.transfer.poll_interval_ms,
            other.transfer.poll_interval_ms,
        );
        take(&mut self.transfer.deadline_secs, other.transfer.deadline_secs);

        take(&mut self.activate.attempts, other.activate.attempts);
        take(&mut self.activate.interval_ms, other.activate.interval_ms);

        take(&mut self.emulator.busy_replies, other.emulator.busy_replies);
        take(
            &mut self.emulator.processing_polls,
            other.emulator.processing_polls,
        );
        take(
            &mut self.emulator.activation_polls,
            other.emulator.activation_polls,
        );
    }

    /// Transfer parameters for one run.
    pub fn transfer_config(&self, kind: TransferKind, slot: u8, mock: bool) -> TransferConfig {
        let t = &self.transfer;
        let mut step_retry = RetryPolicy::new(
            t.step_attempts.unwrap_or(DEFAULT_STEP_ATTEMPTS),
            t.step_delay_ms
                .map_or(DEFAULT_STEP_DELAY, Duration::from_millis),
        );
        let mut poll = RetryPolicy::new(
            t.poll_attempts.unwrap_or(DEFAULT_POLL_ATTEMPTS),
            t.poll_interval_ms
                .map_or(DEFAULT_POLL_INTERVAL, Duration::from_millis),
        );
        if let Some(secs) = t.deadline_secs {
            step_retry = step_retry.with_deadline(Duration::from_secs(secs));
            poll = poll.with_deadline(Duration::from_secs(secs));
        }

        TransferConfig::new(kind, slot)
            .with_block_size(t.block_size.unwrap_or(FW_BLOCK_SIZE))
            .with_mock(mock)
            .with_step_retry(step_retry)
            .with_poll(poll)
    }

    /// Activation budget.
    pub fn activation_config(&self) -> ActivationConfig {
        ActivationConfig {
            policy: RetryPolicy::new(
                self.activate
                    .attempts
                    .unwrap_or(DEFAULT_ACTIVATE_ATTEMPTS),
                self.activate
                    .interval_ms
                    .map_or(DEFAULT_ACTIVATE_INTERVAL, Duration::from_millis),
            ),
        }
    }

    /// Behaviour of the emulated device.
    pub fn emulator_config(&self) -> EmulatorConfig {
        let defaults = EmulatorConfig::default();
        let e = &self.emulator;
        EmulatorConfig {
            busy_replies: e.busy_replies.unwrap_or(defaults.busy_replies),
            processing_polls: e.processing_polls.unwrap_or(defaults.processing_polls),
            activation_polls: e.activation_polls.unwrap_or(defaults.activation_polls),
            ..defaults
        }
    }
}
