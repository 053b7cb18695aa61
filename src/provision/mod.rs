//! Resource reconciliation
//!
//! Each manager brings one kind of host resource into its desired state and
//! verifies the result against a fresh probe. [`Provisioner`] sequences them.

mod binding;
mod hugepages;
mod modules;
mod mount;
mod orchestrator;

pub use binding::{BindingReconciler, BindingState, InterfaceBinding};
pub use hugepages::{HugepageProvisioner, ReservationOutcome};
pub use modules::{LoadOutcome, ModuleManager};
pub use mount::{MountManager, MountOutcome};
pub use orchestrator::{ProvisionReport, Provisioner};
