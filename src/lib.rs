//! # HostPrep - Host Provisioning for User-Space Packet Processing
//!
//! HostPrep brings a Linux host into the state a poll-mode packet-processing
//! runtime expects before it starts:
//!
//! - **Hugepages**: reserve a page count on each NUMA node
//! - **Hugetlbfs**: exactly one huge-page filesystem at the mount point
//! - **Kernel modules**: load the framework and poll-mode driver modules
//! - **NIC binding**: move target interfaces from their kernel driver to a
//!   poll-mode driver, after returning stale bindings to the kernel
//!
//! Every step probes the host, acts only when the state differs, and
//! re-probes to confirm the effect. The first failure aborts the run.
//!
//! ## Quick Start
//!
//! ```no_run
//! use hostprep::config::ProvisionConfig;
//! use hostprep::progress::StepReporter;
//! use hostprep::provision::Provisioner;
//! use hostprep::system::{RunLock, SystemCommandRunner};
//!
//! let config = ProvisionConfig::default();
//! let _lock = RunLock::acquire(&config.lock_file)?;
//!
//! let runner = SystemCommandRunner::new(&config.devbind)
//!     .with_timeout(config.command_timeout());
//! let reporter = StepReporter::new();
//!
//! let report = Provisioner::new(&config, &runner, &reporter).run()?;
//! println!("{} interface(s) bound", report.interfaces.len());
//! # Ok::<(), hostprep::HostPrepError>(())
//! ```
//!
//! ## Inspecting a Host
//!
//! ```no_run
//! use hostprep::system::{SystemCommandRunner, SystemProbe};
//!
//! let runner = SystemCommandRunner::new("bin/dpdk-devbind.py");
//! let probe = SystemProbe::new(&runner);
//!
//! for device in probe.bindings()?.poll_mode {
//!     println!("{} -> {:?}", device.bus_address, device.driver);
//! }
//! # Ok::<(), hostprep::HostPrepError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod progress;
pub mod provision;
pub mod system;

// Re-export commonly used types
pub use config::{CliArgs, ProvisionConfig};
pub use error::{HostPrepError, Result};
pub use provision::{ProvisionReport, Provisioner};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use hostprep::prelude::*;
    //! ```

    pub use crate::config::{FrameworkModule, ModuleSpec, NodeReservation, ProvisionConfig};
    pub use crate::error::{HostPrepError, Result};
    pub use crate::progress::StepReporter;
    pub use crate::provision::{
        BindingReconciler, HugepageProvisioner, ModuleManager, MountManager, ProvisionReport,
        Provisioner,
    };
    pub use crate::system::{CommandRunner, RunLock, SystemCommandRunner, SystemProbe};
}
