//! Host access layer
//!
//! Everything HostPrep knows about the machine comes through here: the
//! command runner that executes queries and actions, the parsers that turn
//! tool output into structured views, NUMA/huge-page helpers and the
//! single-instance run lock.

pub mod lock;
pub mod numa;
pub mod probe;
pub mod runner;

#[cfg(test)]
pub(crate) mod fake;

pub use lock::{RunLock, DEFAULT_LOCK_PATH};
pub use numa::{hugepage_control_path, HugepageSummary, NumaTopology, DEFAULT_HUGEPAGE_SIZE_KB};
pub use probe::{
    BindingClass, BindingStatus, DeviceBinding, LinkEntry, LinkTable, ModuleEntry, ModuleTable,
    MountEntry, MountTable, SystemProbe, HUGETLBFS,
};
pub use runner::{CommandRunner, SystemCommandRunner, DEFAULT_COMMAND_TIMEOUT};
