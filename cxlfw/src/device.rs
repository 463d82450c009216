//! Device handles and the pre-flight activity guard.
//!
//! A [`Device`] bundles a mailbox transport with an [`ActivityGate`] that
//! reports whether the device is already executing a command. Mutating
//! workflows start by acquiring a [`DeviceGuard`], which fails fast when the
//! gate reports activity and otherwise holds the device exclusively until
//! dropped.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;

use crate::error::{Error, Result};
use crate::mailbox::{MailboxClient, Transport};

/// Reports whether a device is mid-command.
pub trait ActivityGate {
    /// `true` if the device is currently executing a command.
    fn is_active(&self) -> Result<bool>;
}

/// Gate that never reports activity.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleGate;

impl ActivityGate for IdleGate {
    fn is_active(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Gate backed by a shared flag.
#[derive(Debug, Default, Clone)]
pub struct FlagGate {
    flag: Arc<AtomicBool>,
}

impl FlagGate {
    /// Create a gate in the idle state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the activity flag.
    pub fn set_active(&self, active: bool) {
        self.flag.store(active, Ordering::SeqCst);
    }
}

impl ActivityGate for FlagGate {
    fn is_active(&self) -> Result<bool> {
        Ok(self.flag.load(Ordering::SeqCst))
    }
}

/// A CXL memory device reachable through a mailbox transport.
pub struct Device<T: Transport> {
    id: u32,
    name: String,
    transport: T,
    gate: Box<dyn ActivityGate + Send>,
}

impl<T: Transport> Device<T> {
    /// Create a device with an always-idle gate.
    pub fn new(id: u32, name: impl Into<String>, transport: T) -> Self {
        Self {
            id,
            name: name.into(),
            transport,
            gate: Box::new(IdleGate),
        }
    }

    /// Replace the activity gate.
    #[must_use]
    pub fn with_gate(mut self, gate: impl ActivityGate + Send + 'static) -> Self {
        self.gate = Box::new(gate);
        self
    }

    /// Numeric device id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Device name (e.g. "mem0").
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the device reports itself mid-command.
    pub fn is_active(&self) -> Result<bool> {
        self.gate.is_active()
    }

    /// Get a reference to the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Get a mutable reference to the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the device and return the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Check the device is idle and claim it for one workflow.
    pub fn claim(&mut self) -> Result<DeviceGuard<'_, T>> {
        DeviceGuard::acquire(self)
    }
}

impl<T: Transport> fmt::Debug for Device<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Exclusive claim on an idle device for the duration of one workflow.
pub struct DeviceGuard<'a, T: Transport> {
    device: &'a mut Device<T>,
}

impl<'a, T: Transport> DeviceGuard<'a, T> {
    /// Claim the device, failing with `Error::DeviceBusy` if it is active.
    pub fn acquire(device: &'a mut Device<T>) -> Result<Self> {
        if device.is_active()? {
            return Err(Error::DeviceBusy {
                device: device.name.clone(),
            });
        }
        debug!("{}: claimed (id {})", device.name, device.id);
        Ok(Self { device })
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.device.name
    }

    /// Numeric device id.
    pub fn id(&self) -> u32 {
        self.device.id
    }

    /// Mailbox client over the claimed device's transport.
    pub fn client(&mut self) -> MailboxClient<'_, T> {
        MailboxClient::new(&mut self.device.transport)
    }
}

impl<T: Transport> fmt::Debug for DeviceGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceGuard")
            .field("device", &self.device)
            .finish()
    }
}

impl<T: Transport> Drop for DeviceGuard<'_, T> {
    fn drop(&mut self) {
        debug!("{}: released", self.device.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::RawResponse;
    use crate::mailbox::testing::ScriptedTransport;

    fn device() -> Device<ScriptedTransport> {
        Device::new(3, "mem3", ScriptedTransport::new(RawResponse::success(Vec::new())))
    }

    #[test]
    fn test_idle_device_can_be_claimed() {
        let mut dev = device();
        let guard = dev.claim().unwrap();
        assert_eq!(guard.name(), "mem3");
        assert_eq!(guard.id(), 3);
    }

    #[test]
    fn test_active_device_is_refused() {
        let gate = FlagGate::new();
        let mut dev = device().with_gate(gate.clone());
        gate.set_active(true);

        let err = dev.claim().unwrap_err();
        assert!(matches!(err, Error::DeviceBusy { ref device } if device == "mem3"));
        assert!(dev.transport().submitted.is_empty());

        gate.set_active(false);
        assert!(dev.claim().is_ok());
    }

    #[test]
    fn test_guard_debug_names_device() {
        let mut dev = device();
        let guard = dev.claim().unwrap();
        let shown = format!("{guard:?}");
        assert!(shown.contains("DeviceGuard"));
        assert!(shown.contains("mem3"));
    }

    #[test]
    fn test_guard_client_uses_device_transport() {
        let mut dev = device();
        {
            let mut guard = dev.claim().unwrap();
            guard
                .client()
                .submit(crate::mailbox::Opcode::GetFwInfo, &[])
                .unwrap();
        }
        assert_eq!(dev.transport().opcodes(), vec![0x0200]);
    }
}
