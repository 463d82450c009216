//! Device backend for the CLI.
//!
//! Commands run against an [`EmulatedDevice`] whose persistent state lives
//! in a JSON file, so consecutive invocations see the same slots.

use anyhow::{Context, Result};
use cxlfw::{Device, EmulatedDevice, EmulatorConfig, EmulatorState};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::CliError;

/// An opened device plus where to save its state.
pub(crate) struct Backend {
    device: Device<EmulatedDevice>,
    state_path: Option<PathBuf>,
}

impl Backend {
    /// Open `name`, restoring state from `state_path` when the file exists.
    pub(crate) fn open(
        name: &str,
        state_path: Option<&Path>,
        emulator: EmulatorConfig,
    ) -> Result<Self> {
        let state = match state_path {
            Some(path) if path.exists() => load_state(path)?,
            Some(path) => {
                debug!("No emulator state at {}, starting fresh", path.display());
                EmulatorState::default()
            },
            None => EmulatorState::default(),
        };

        let emulated = EmulatedDevice::with_state(name, state).with_config(emulator);
        let gate = emulated.activity_gate();
        let device = Device::new(device_id(name), name, emulated).with_gate(gate);

        Ok(Self {
            device,
            state_path: state_path.map(Path::to_path_buf),
        })
    }

    pub(crate) fn device_mut(&mut self) -> &mut Device<EmulatedDevice> {
        &mut self.device
    }

    /// Write the device state back, if it came from a file.
    pub(crate) fn save(self) -> Result<()> {
        let Some(path) = self.state_path else {
            return Ok(());
        };
        let state = self.device.into_transport().into_state();
        let json =
            serde_json::to_string_pretty(&state).context("Failed to encode emulator state")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write emulator state {}", path.display()))?;
        debug!("Saved emulator state to {}", path.display());
        Ok(())
    }

    /// Save after a workflow ran, keeping the workflow's own error.
    ///
    /// A save failure is returned only when the workflow succeeded;
    /// otherwise it is logged and the workflow error is handed back.
    pub(crate) fn save_after<T, E>(
        self,
        result: std::result::Result<T, E>,
    ) -> Result<std::result::Result<T, E>> {
        match (self.save(), result) {
            (Ok(()), result) => Ok(result),
            (Err(save_err), Ok(_)) => Err(save_err),
            (Err(save_err), Err(err)) => {
                warn!("{save_err:#}");
                Ok(Err(err))
            },
        }
    }
}

fn load_state(path: &Path) -> Result<EmulatorState> {
    let content = fs::read_to_string(path).map_err(|e| {
        CliError::Config(format!(
            "Failed to read emulator state {}: {e}",
            path.display()
        ))
    })?;
    let state = serde_json::from_str(&content).map_err(|e| {
        CliError::Config(format!("Invalid emulator state {}: {e}", path.display()))
    })?;
    debug!("Loaded emulator state from {}", path.display());
    Ok(state)
}

/// Numeric suffix of a device name ("mem3" -> 3).
fn device_id(name: &str) -> u32 {
    let digits = name.trim_start_matches(|c: char| !c.is_ascii_digit());
    digits.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxlfw::firmware::FirmwareUpdater;

    #[test]
    fn test_device_id() {
        assert_eq!(device_id("mem0"), 0);
        assert_eq!(device_id("mem12"), 12);
        assert_eq!(device_id("emulated"), 0);
    }

    #[test]
    fn test_open_without_state_file() {
        let mut backend = Backend::open("mem1", None, EmulatorConfig::default()).unwrap();
        assert_eq!(backend.device_mut().id(), 1);
        assert_eq!(backend.device_mut().name(), "mem1");
        backend.save().unwrap();
    }

    #[test]
    fn test_state_persists_between_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mem0.json");

        let mut state = EmulatorState::default();
        state.staged_slot = 1;
        fs::write(&path, serde_json::to_string(&state).unwrap()).unwrap();

        let backend = Backend::open("mem0", Some(&path), EmulatorConfig::default()).unwrap();
        backend.save().unwrap();

        let saved: EmulatorState =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved, state);
    }

    #[test]
    fn test_missing_state_file_is_created_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.json");

        let backend = Backend::open("mem0", Some(&path), EmulatorConfig::default()).unwrap();
        backend.save().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_invalid_state_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "not json").unwrap();

        let err = Backend::open("mem0", Some(&path), EmulatorConfig::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("Invalid emulator state"));
        assert!(err.to_string().contains("bad.json"));
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Config(_))
        ));
    }

    #[test]
    fn test_unreadable_state_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();

        let err = Backend::open("mem0", Some(dir.path()), EmulatorConfig::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("Failed to read emulator state"));
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Config(_))
        ));
    }

    #[test]
    fn test_save_after_keeps_workflow_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("mem0.json");

        let backend = Backend::open("mem0", Some(&path), EmulatorConfig::default()).unwrap();
        let result = backend
            .save_after(Err::<(), _>("activation failed"))
            .unwrap();
        assert_eq!(result, Err("activation failed"));
    }

    #[test]
    fn test_save_after_reports_save_failure_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("mem0.json");

        let backend = Backend::open("mem0", Some(&path), EmulatorConfig::default()).unwrap();
        let err = backend.save_after(Ok::<_, String>(7)).unwrap_err();
        assert!(err.to_string().contains("Failed to write emulator state"));
    }

    #[test]
    fn test_save_after_passes_result_through() {
        let backend = Backend::open("mem0", None, EmulatorConfig::default()).unwrap();
        assert_eq!(backend.save_after(Ok::<_, String>(7)).unwrap(), Ok(7));
    }

    #[test]
    fn test_busy_state_blocks_claim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("busy.json");
        let state = EmulatorState {
            busy: true,
            ..EmulatorState::default()
        };
        fs::write(&path, serde_json::to_string(&state).unwrap()).unwrap();

        let mut backend = Backend::open("mem0", Some(&path), EmulatorConfig::default()).unwrap();
        assert!(FirmwareUpdater::new(backend.device_mut()).is_err());
    }
}
