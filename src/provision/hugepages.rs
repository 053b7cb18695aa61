//! NUMA hugepage provisioner

use crate::error::{HostPrepError, Result};
use crate::system::{hugepage_control_path, CommandRunner, SystemProbe};

/// What [`HugepageProvisioner::ensure`] had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationOutcome {
    /// The node already had the desired count
    AlreadyReserved,
    /// The count was changed from `previous`
    Reserved { previous: u64 },
}

/// Brings per-node hugepage reservations to a target count
pub struct HugepageProvisioner<'a> {
    runner: &'a dyn CommandRunner,
    page_size_kb: u64,
}

impl<'a> HugepageProvisioner<'a> {
    /// Create a provisioner for pages of `page_size_kb`
    pub fn new(runner: &'a dyn CommandRunner, page_size_kb: u64) -> Self {
        Self {
            runner,
            page_size_kb,
        }
    }

    /// Ensure `node` has exactly `desired` pages reserved.
    ///
    /// The kernel may grant fewer pages than requested when memory is
    /// fragmented; the count is read back after the write and any shortfall
    /// fails the run.
    pub fn ensure(&self, node: u32, desired: u64) -> Result<ReservationOutcome> {
        let probe = SystemProbe::new(self.runner);
        let current = probe.hugepages(node, self.page_size_kb)?;

        if current == desired {
            tracing::debug!(node, pages = desired, "hugepages already reserved");
            return Ok(ReservationOutcome::AlreadyReserved);
        }

        tracing::info!(
            node,
            current,
            desired,
            memory = %self.describe(desired),
            "reserving hugepages"
        );
        let path = hugepage_control_path(node, self.page_size_kb);
        self.runner.write_control(&path, &desired.to_string())?;

        let actual = probe.hugepages(node, self.page_size_kb)?;
        if actual != desired {
            return Err(HostPrepError::HugepageReservationFailed {
                node,
                desired,
                actual,
            });
        }

        Ok(ReservationOutcome::Reserved { previous: current })
    }

    /// Human-readable size of `pages` pages, e.g. `1024 x 2048kB (2 GiB)`
    pub fn describe(&self, pages: u64) -> String {
        format!(
            "{} x {}kB ({})",
            pages,
            self.page_size_kb,
            humansize::format_size(
                pages.saturating_mul(self.page_size_kb).saturating_mul(1024),
                humansize::BINARY
            )
        )
    }
}
