//! Driver binding reconciler
//!
//! Each target interface walks a small state machine:
//!
//! ```text
//! Unknown --present--> Present --link down--> Down --bind--> Rebound
//!    \                    \                     \
//!     +--------------------+---------------------+--> Failed
//! ```
//!
//! The steps are exposed separately so the orchestrator can run one step
//! across every interface before moving on to the next.

use super::modules::ModuleManager;
use crate::error::{HostPrepError, Result};
use crate::system::{CommandRunner, SystemProbe};
use std::fmt;

/// Where an interface is in its rebind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    /// Not examined yet
    Unknown,
    /// Listed in the link table
    Present,
    /// Administratively down
    Down,
    /// Bound to the target driver
    Rebound,
    /// A step failed
    Failed,
}

impl fmt::Display for BindingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Present => "present",
            Self::Down => "down",
            Self::Rebound => "rebound",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One interface being moved to a poll-mode driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceBinding {
    /// Kernel interface name
    pub name: String,
    /// Current state
    pub state: BindingState,
    /// Bus address, once resolved
    pub bus_address: Option<String>,
}

impl InterfaceBinding {
    /// Start tracking `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: BindingState::Unknown,
            bus_address: None,
        }
    }

    fn advance<T>(&mut self, next: BindingState, result: Result<T>) -> Result<T> {
        self.state = match &result {
            Ok(_) => next,
            Err(_) => BindingState::Failed,
        };
        result
    }
}

/// Moves devices between kernel and poll-mode drivers
pub struct BindingReconciler<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> BindingReconciler<'a> {
    /// Create a reconciler
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    fn probe(&self) -> SystemProbe<'a> {
        SystemProbe::new(self.runner)
    }

    /// Unknown -> Present
    pub fn check_present(&self, iface: &mut InterfaceBinding) -> Result<()> {
        debug_assert_eq!(iface.state, BindingState::Unknown);
        let result = self.probe().links().and_then(|links| match links.find(&iface.name) {
            Some(_) => Ok(()),
            None => Err(HostPrepError::InterfaceNotFound(iface.name.clone())),
        });
        iface.advance(BindingState::Present, result)
    }

    /// Present -> Down
    pub fn bring_down(&self, iface: &mut InterfaceBinding) -> Result<()> {
        debug_assert_eq!(iface.state, BindingState::Present);
        let result = self.link_down(&iface.name);
        iface.advance(BindingState::Down, result)
    }

    fn link_down(&self, name: &str) -> Result<()> {
        tracing::info!(interface = name, "link down");
        self.runner.link_down(name)?;

        match self.probe().links()?.find(name) {
            Some(link) if link.is_up() => Err(HostPrepError::InterfaceDownFailed(name.to_string())),
            Some(_) => Ok(()),
            None => Err(HostPrepError::InterfaceNotFound(name.to_string())),
        }
    }

    /// Down -> Rebound
    pub fn rebind(&self, iface: &mut InterfaceBinding, driver: &str) -> Result<()> {
        debug_assert_eq!(iface.state, BindingState::Down);
        let result = self.rebind_kernel_device(&iface.name, driver);
        if let Ok(bus_address) = &result {
            iface.bus_address = Some(bus_address.clone());
        }
        iface.advance(BindingState::Rebound, result.map(|_| ()))
    }

    fn rebind_kernel_device(&self, name: &str, driver: &str) -> Result<String> {
        let status = self.probe().bindings()?;
        let bus_address = status
            .kernel_device_for(name)
            .map(|d| d.bus_address.clone())
            .ok_or_else(|| HostPrepError::BindingTargetNotFound(name.to_string()))?;

        self.bind(&bus_address, driver)?;
        Ok(bus_address)
    }

    /// Run the whole state machine for one interface
    pub fn reconcile(&self, name: &str, driver: &str) -> Result<InterfaceBinding> {
        let mut iface = InterfaceBinding::new(name);
        self.check_present(&mut iface)?;
        self.bring_down(&mut iface)?;
        self.rebind(&mut iface, driver)?;
        Ok(iface)
    }

    /// Bind a device to `driver` and confirm the binding took.
    ///
    /// The driver module must already be loaded; nothing is issued otherwise.
    pub fn bind(&self, bus_address: &str, driver: &str) -> Result<()> {
        if !ModuleManager::new(self.runner).is_loaded(driver)? {
            return Err(HostPrepError::DriverUnavailable(driver.to_string()));
        }

        tracing::info!(bus_address, driver, "bind");
        self.runner.bind_device(driver, bus_address)?;

        let status = self.probe().bindings()?;
        match status.find(bus_address) {
            Some((_, device)) if device.driver.as_deref() == Some(driver) => Ok(()),
            _ => Err(HostPrepError::BindFailed {
                bus_address: bus_address.to_string(),
                driver: driver.to_string(),
            }),
        }
    }

    /// Return every poll-mode-bound device to `kernel_driver`, in listing
    /// order. Returns the bus addresses that were rebound.
    pub fn recovery_sweep(&self, kernel_driver: &str) -> Result<Vec<String>> {
        let status = self.probe().bindings()?;
        let devices: Vec<String> = status
            .poll_mode
            .iter()
            .map(|d| d.bus_address.clone())
            .collect();

        for bus_address in &devices {
            tracing::info!(bus_address = %bus_address, kernel_driver, "recovering device");
            self.bind(bus_address, kernel_driver)?;
        }
        Ok(devices)
    }
}
