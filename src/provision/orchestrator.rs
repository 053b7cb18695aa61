//! Provisioning orchestrator
//!
//! Runs every step in dependency order and stops at the first failure:
//! recovery, framework build check, hugepages, mount, module install,
//! interface rebind. The console handoff itself is left to the caller.

use super::binding::{BindingReconciler, InterfaceBinding};
use super::hugepages::{HugepageProvisioner, ReservationOutcome};
use super::modules::{LoadOutcome, ModuleManager};
use super::mount::{MountManager, MountOutcome};
use crate::config::{ModuleSpec, ProvisionConfig};
use crate::error::Result;
use crate::progress::StepReporter;
use crate::system::CommandRunner;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    /// Framework module was removed during recovery
    pub unloaded_framework: bool,
    /// Devices returned to the kernel driver during recovery
    pub recovered: Vec<String>,
    /// Framework module had to be built
    pub built_framework: bool,
    /// Final state of each target interface
    pub interfaces: Vec<InterfaceBinding>,
    /// Program to hand off to
    pub console: Option<PathBuf>,
    /// Time spent provisioning
    pub duration: Duration,
}

/// Drives a complete provisioning run
pub struct Provisioner<'a> {
    config: &'a ProvisionConfig,
    runner: &'a dyn CommandRunner,
    reporter: &'a StepReporter,
}

impl<'a> Provisioner<'a> {
    /// Create a provisioner
    pub fn new(
        config: &'a ProvisionConfig,
        runner: &'a dyn CommandRunner,
        reporter: &'a StepReporter,
    ) -> Self {
        Self {
            config,
            runner,
            reporter,
        }
    }

    /// Bring the host into the configured state
    pub fn run(&self) -> Result<ProvisionReport> {
        let start = Instant::now();
        let config = self.config;
        let modules = ModuleManager::new(self.runner);
        let binder = BindingReconciler::new(self.runner);

        // Recovery
        let framework = &config.framework.name;
        let unloaded_framework = self.step(&format!("Remove {} module", framework), || {
            let removed = modules.ensure_unloaded(framework)?;
            let detail = if removed { "removed" } else { "not loaded" };
            Ok((removed, detail.to_string()))
        })?;
        let recovered = self.step(
            &format!("Return poll-mode devices to {}", config.kernel_driver),
            || {
                let recovered = binder.recovery_sweep(&config.kernel_driver)?;
                let detail = match recovered.len() {
                    0 => "none bound".to_string(),
                    n => format!("{} device(s): {}", n, recovered.join(", ")),
                };
                Ok((recovered, detail))
            },
        )?;

        // Install
        let built_framework = self.step(&format!("Check {} build", framework), || {
            let built = modules.ensure_built(&config.framework)?;
            let detail = if built {
                format!("built {}", config.framework.artifact.display())
            } else {
                format!("{} present", config.framework.artifact.display())
            };
            Ok((built, detail))
        })?;

        let hugepages = HugepageProvisioner::new(self.runner, config.hugepage_size_kb);
        for reservation in &config.hugepages {
            self.step(&format!("Hugepages on NUMA node {}", reservation.node), || {
                let outcome = hugepages.ensure(reservation.node, reservation.pages)?;
                let size = hugepages.describe(reservation.pages);
                let detail = match outcome {
                    ReservationOutcome::AlreadyReserved => format!("{} already reserved", size),
                    ReservationOutcome::Reserved { previous } => {
                        format!("{} reserved (was {})", size, previous)
                    }
                };
                Ok(((), detail))
            })?;
        }

        let mounts = MountManager::new(self.runner);
        self.step(
            &format!("Mount hugetlbfs at {}", config.mount_path.display()),
            || {
                let detail = match mounts.ensure_mounted(&config.mount_path)? {
                    MountOutcome::AlreadyMounted => "already mounted".to_string(),
                    MountOutcome::Mounted { removed: 0, .. } => "mounted".to_string(),
                    MountOutcome::Mounted { removed, .. } => {
                        format!("mounted after removing {} stale mount(s)", removed)
                    }
                };
                Ok(((), detail))
            },
        )?;

        let framework_spec = config.framework.module_spec();
        for spec in std::iter::once(&framework_spec).chain(config.modules.iter()) {
            self.load(&modules, spec)?;
        }

        let delay = config.settle_delay();
        if !delay.is_zero() {
            self.reporter.note(&format!(
                "Waiting {} for interfaces to settle",
                humantime::format_duration(delay)
            ));
            std::thread::sleep(delay);
        }

        // Interfaces: every step runs across all targets before the next begins
        let mut interfaces: Vec<InterfaceBinding> = config
            .interfaces
            .iter()
            .map(InterfaceBinding::new)
            .collect();

        for iface in interfaces.iter_mut() {
            self.step(&format!("Detect {}", iface.name), || {
                binder.check_present(iface)?;
                Ok(((), "present".to_string()))
            })?;
        }
        for iface in interfaces.iter_mut() {
            self.step(&format!("Bring {} down", iface.name), || {
                binder.bring_down(iface)?;
                Ok(((), "link down".to_string()))
            })?;
        }
        for iface in interfaces.iter_mut() {
            self.step(&format!("Bind {} to {}", iface.name, config.pmd_driver), || {
                binder.rebind(iface, &config.pmd_driver)?;
                let bus = iface.bus_address.clone().unwrap_or_default();
                Ok(((), bus))
            })?;
        }

        Ok(ProvisionReport {
            unloaded_framework,
            recovered,
            built_framework,
            interfaces,
            console: config.console.clone(),
            duration: start.elapsed(),
        })
    }

    fn load(&self, modules: &ModuleManager<'_>, spec: &ModuleSpec) -> Result<()> {
        self.step(&format!("Load {} module", spec.name), || {
            let detail = match modules.ensure_loaded(spec)? {
                LoadOutcome::AlreadyLoaded => "already loaded",
                LoadOutcome::Loaded => "loaded",
            };
            Ok(((), detail.to_string()))
        })
    }

    /// Run one reported step; `f` returns its value and a detail line
    fn step<T>(&self, title: &str, f: impl FnOnce() -> Result<(T, String)>) -> Result<T> {
        self.reporter.begin(title);
        match f() {
            Ok((value, detail)) => {
                self.reporter.success(&detail);
                Ok(value)
            }
            Err(e) => {
                self.reporter.failure(&e.to_string());
                Err(e)
            }
        }
    }
}
