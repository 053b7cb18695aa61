//! Simulated host for tests
//!
//! `FakeHost` keeps a model of modules, mounts, links, devices and huge-page
//! control files, renders it in the same text formats the real tools print,
//! and records every action issued against it.

use super::numa::hugepage_control_path;
use super::probe::MountEntry;
use super::runner::CommandRunner;
use crate::error::{HostPrepError, Result};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Drivers the binding tool files under the DPDK-compatible section
const POLL_MODE_DRIVERS: &[&str] = &["igb_uio", "vfio-pci", "uio_pci_generic"];

/// An action issued against the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    WriteControl { path: PathBuf, value: String },
    CreateDir(PathBuf),
    Mount(PathBuf),
    Unmount(PathBuf),
    Modprobe(String),
    Insmod(PathBuf),
    Rmmod(String),
    RunProgram(PathBuf),
    LinkDown(String),
    Bind { driver: String, bus_address: String },
}

#[derive(Debug, Clone)]
pub struct FakeDevice {
    pub bus_address: String,
    pub interface: Option<String>,
    pub driver: Option<String>,
    pub up: bool,
}

#[derive(Debug, Default)]
pub struct HostState {
    /// Loaded modules, load order
    pub modules: Vec<String>,
    /// Files present on disk
    pub files: BTreeSet<PathBuf>,
    /// Directories present on disk
    pub dirs: BTreeSet<PathBuf>,
    /// `nr_hugepages` files and their values
    pub hugepages: BTreeMap<PathBuf, u64>,
    /// Largest reservation the kernel will grant per node
    pub hugepage_limit: Option<u64>,
    pub mounts: Vec<MountEntry>,
    /// Links not backed by a listed device (lo and friends)
    pub links: Vec<(String, bool)>,
    pub devices: Vec<FakeDevice>,
    /// Programs that load a module when run
    pub installers: HashMap<PathBuf, String>,
    /// Programs that produce a file when run
    pub builders: HashMap<PathBuf, PathBuf>,
    /// Query that fails as if its binary were missing
    pub broken_query: Option<&'static str>,
    /// Link down exits 0 but leaves the link up
    pub sticky_links: bool,
    /// Bind exits 0 but changes nothing
    pub inert_bind: bool,
    /// Mount exits 0 but mounts nothing
    pub inert_mount: bool,
    /// Modprobe exits 1 without loading anything
    pub failing_modprobe: bool,
    pub actions: Vec<Action>,
}

/// Test double for [`CommandRunner`]
#[derive(Debug, Default)]
pub struct FakeHost {
    state: RefCell<HostState>,
}

impl FakeHost {
    /// An empty host with only a loopback link
    pub fn new() -> Self {
        let host = Self::default();
        host.with(|s| s.links.push(("lo".to_string(), true)));
        host
    }

    /// Two-node host with two 10G ports up on the kernel driver
    pub fn two_port() -> Self {
        let host = Self::new();
        host.with(|s| {
            s.hugepages.insert(hugepage_control_path(0, 2048), 0);
            s.hugepages.insert(hugepage_control_path(1, 2048), 0);
            s.modules.push("ixgbe".to_string());
            s.devices.push(FakeDevice {
                bus_address: "0000:01:00.0".to_string(),
                interface: Some("eno1".to_string()),
                driver: Some("igb".to_string()),
                up: true,
            });
            s.devices.push(FakeDevice {
                bus_address: "0000:05:00.0".to_string(),
                interface: Some("xe1".to_string()),
                driver: Some("ixgbe".to_string()),
                up: true,
            });
            s.devices.push(FakeDevice {
                bus_address: "0000:05:00.1".to_string(),
                interface: Some("xe2".to_string()),
                driver: Some("ixgbe".to_string()),
                up: true,
            });
        });
        host
    }

    /// Mutate or inspect the simulated state
    pub fn with<T>(&self, f: impl FnOnce(&mut HostState) -> T) -> T {
        f(&mut self.state.borrow_mut())
    }

    /// Snapshot of recorded actions
    pub fn actions(&self) -> Vec<Action> {
        self.state.borrow().actions.clone()
    }

    /// Number of recorded actions matching `pred`
    pub fn count(&self, pred: impl Fn(&Action) -> bool) -> usize {
        self.state.borrow().actions.iter().filter(|a| pred(a)).count()
    }

    /// Driver currently bound to a device
    pub fn driver_of(&self, bus_address: &str) -> Option<String> {
        self.with(|s| {
            s.devices
                .iter()
                .find(|d| d.bus_address == bus_address)
                .and_then(|d| d.driver.clone())
        })
    }

    fn query(&self, what: &'static str) -> Result<()> {
        if self.state.borrow().broken_query == Some(what) {
            return Err(HostPrepError::probe(what, "No such file or directory"));
        }
        Ok(())
    }

    fn failed(command: String, stderr: &str) -> HostPrepError {
        HostPrepError::CommandFailed {
            command,
            status: "exit status: 1".to_string(),
            stderr: stderr.to_string(),
        }
    }
}

fn is_poll_mode(driver: Option<&str>) -> bool {
    driver.map_or(false, |d| POLL_MODE_DRIVERS.contains(&d))
}

impl CommandRunner for FakeHost {
    fn module_table(&self) -> Result<String> {
        self.query("module table")?;
        let state = self.state.borrow();
        let mut out = String::from("Module                  Size  Used by\n");
        for name in &state.modules {
            let _ = writeln!(out, "{:<24}{:>6}  0", name, 16384);
        }
        Ok(out)
    }

    fn mount_table(&self) -> Result<String> {
        self.query("mount table")?;
        let state = self.state.borrow();
        let mut out = String::from("proc on /proc type proc (rw,nosuid,nodev,noexec,relatime)\n");
        for m in &state.mounts {
            let _ = writeln!(
                out,
                "{} on {} type {} ({})",
                m.device,
                m.mount_point.display(),
                m.fs_type,
                m.options.join(",")
            );
        }
        Ok(out)
    }

    fn link_table(&self) -> Result<String> {
        self.query("network links")?;
        let state = self.state.borrow();

        let standalone = state.links.iter().map(|(name, up)| (name.clone(), *up));
        let devices = state
            .devices
            .iter()
            .filter(|d| !is_poll_mode(d.driver.as_deref()) && d.driver.is_some())
            .filter_map(|d| d.interface.clone().map(|name| (name, d.up)));

        let mut out = String::new();
        for (idx, (name, up)) in standalone.chain(devices).enumerate() {
            let flags = if up { "BROADCAST,MULTICAST,UP,LOWER_UP" } else { "BROADCAST,MULTICAST" };
            let _ = writeln!(
                out,
                "{}: {}: <{}> mtu 1500 qdisc mq state {} mode DEFAULT group default qlen 1000\\    link/ether 90:e2:ba:00:00:{:02x} brd ff:ff:ff:ff:ff:ff",
                idx + 1,
                name,
                flags,
                if up { "UP" } else { "DOWN" },
                idx
            );
        }
        Ok(out)
    }

    fn binding_status(&self) -> Result<String> {
        self.query("device binding status")?;
        let state = self.state.borrow();
        const DESC: &str = "'82599ES 10-Gigabit SFI/SFP+ Network Connection 10fb'";

        let mut poll = String::new();
        let mut kernel = String::new();
        let mut other = String::new();
        for d in &state.devices {
            match d.driver.as_deref() {
                Some(drv) if is_poll_mode(Some(drv)) => {
                    let _ = writeln!(poll, "{} {} drv={} unused=ixgbe", d.bus_address, DESC, drv);
                }
                Some(drv) => {
                    let iface = d
                        .interface
                        .as_ref()
                        .map(|i| format!("if={} ", i))
                        .unwrap_or_default();
                    let _ = writeln!(
                        kernel,
                        "{} {} {}drv={} unused=igb_uio",
                        d.bus_address, DESC, iface, drv
                    );
                }
                None => {
                    let _ = writeln!(other, "{} {} unused=ixgbe,igb_uio", d.bus_address, DESC);
                }
            }
        }

        let section = |title: &str, body: &str| {
            let body = if body.is_empty() { "<none>\n" } else { body };
            format!("\n{}\n{}\n{}", title, "=".repeat(title.len()), body)
        };

        Ok(format!(
            "{}{}{}",
            section("Network devices using DPDK-compatible driver", &poll),
            section("Network devices using kernel driver", &kernel),
            section("Other Network devices", &other),
        ))
    }

    fn read_control(&self, path: &Path) -> Result<String> {
        self.state
            .borrow()
            .hugepages
            .get(path)
            .map(|v| format!("{}\n", v))
            .ok_or_else(|| {
                HostPrepError::probe(
                    "nr_hugepages",
                    format!("cannot read {}: No such file or directory", path.display()),
                )
            })
    }

    fn write_control(&self, path: &Path, value: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.actions.push(Action::WriteControl {
            path: path.to_path_buf(),
            value: value.to_string(),
        });

        let requested: u64 = value.trim().parse().map_err(|_| {
            HostPrepError::io(path, std::io::Error::from(std::io::ErrorKind::InvalidInput))
        })?;
        let granted = state.hugepage_limit.map_or(requested, |limit| requested.min(limit));
        match state.hugepages.get_mut(path) {
            Some(current) => {
                *current = granted;
                Ok(())
            }
            None => Err(HostPrepError::io(
                path,
                std::io::Error::from(std::io::ErrorKind::NotFound),
            )),
        }
    }

    fn path_exists(&self, path: &Path) -> bool {
        let state = self.state.borrow();
        state.files.contains(path) || state.dirs.contains(path) || state.hugepages.contains_key(path)
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.actions.push(Action::CreateDir(path.to_path_buf()));
        state.dirs.insert(path.to_path_buf());
        Ok(())
    }

    fn mount_hugetlbfs(&self, path: &Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.actions.push(Action::Mount(path.to_path_buf()));
        if !state.dirs.contains(path) {
            return Err(Self::failed(
                format!("mount -t hugetlbfs nodev {}", path.display()),
                "mount point does not exist",
            ));
        }
        if !state.inert_mount {
            state.mounts.push(MountEntry {
                device: "nodev".to_string(),
                mount_point: path.to_path_buf(),
                fs_type: "hugetlbfs".to_string(),
                options: vec!["rw".to_string(), "relatime".to_string()],
            });
        }
        Ok(())
    }

    fn unmount(&self, path: &Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.actions.push(Action::Unmount(path.to_path_buf()));
        match state.mounts.iter().rposition(|m| m.mount_point == path) {
            Some(pos) => {
                state.mounts.remove(pos);
                Ok(())
            }
            None => Err(Self::failed(format!("umount {}", path.display()), "not mounted")),
        }
    }

    fn load_module(&self, name: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.actions.push(Action::Modprobe(name.to_string()));
        if state.failing_modprobe {
            return Err(Self::failed(
                format!("modprobe {}", name),
                &format!("modprobe: FATAL: Module {} not found", name),
            ));
        }
        state.modules.push(name.to_string());
        Ok(())
    }

    fn insert_module(&self, artifact: &Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.actions.push(Action::Insmod(artifact.to_path_buf()));
        if !state.files.contains(artifact) {
            return Err(Self::failed(
                format!("insmod {}", artifact.display()),
                "could not load module: No such file or directory",
            ));
        }
        let name = artifact
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        state.modules.push(name);
        Ok(())
    }

    fn remove_module(&self, name: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.actions.push(Action::Rmmod(name.to_string()));
        state.modules.retain(|m| m != name);
        Ok(())
    }

    fn run_program(&self, program: &Path, _args: &[String], workdir: Option<&Path>) -> Result<()> {
        let key = match workdir {
            Some(dir) => dir.join(program),
            None => program.to_path_buf(),
        };
        let mut state = self.state.borrow_mut();
        state.actions.push(Action::RunProgram(key.clone()));

        if let Some(module) = state.installers.get(&key).cloned() {
            state.modules.push(module);
        }
        if let Some(artifact) = state.builders.get(&key).cloned() {
            state.files.insert(artifact);
        }
        Ok(())
    }

    fn link_down(&self, interface: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.actions.push(Action::LinkDown(interface.to_string()));
        let sticky = state.sticky_links;

        if let Some(link) = state.links.iter_mut().find(|(name, _)| name == interface) {
            link.1 = link.1 && sticky;
            return Ok(());
        }
        match state
            .devices
            .iter_mut()
            .find(|d| d.interface.as_deref() == Some(interface) && !is_poll_mode(d.driver.as_deref()))
        {
            Some(device) => {
                device.up = device.up && sticky;
                Ok(())
            }
            None => Err(Self::failed(
                format!("ip link set dev {} down", interface),
                "Cannot find device",
            )),
        }
    }

    fn bind_device(&self, driver: &str, bus_address: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.actions.push(Action::Bind {
            driver: driver.to_string(),
            bus_address: bus_address.to_string(),
        });
        if state.inert_bind {
            return Ok(());
        }
        match state.devices.iter_mut().find(|d| d.bus_address == bus_address) {
            Some(device) => {
                device.driver = Some(driver.to_string());
                device.up = false;
                Ok(())
            }
            None => Err(Self::failed(
                format!("dpdk-devbind.py -b {} {}", driver, bus_address),
                "Unknown device",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::probe::{BindingStatus, LinkTable, ModuleTable, MountTable};

    #[test]
    fn test_rendered_output_parses() {
        let host = FakeHost::two_port();
        host.with(|s| {
            s.devices[1].driver = Some("igb_uio".to_string());
            s.mounts.push(MountEntry {
                device: "tmpfs".to_string(),
                mount_point: PathBuf::from("/mnt/huge"),
                fs_type: "tmpfs".to_string(),
                options: vec!["rw".to_string()],
            });
        });

        let modules = ModuleTable::parse(&host.module_table().unwrap()).unwrap();
        assert!(modules.contains("ixgbe"));

        let mounts = MountTable::parse(&host.mount_table().unwrap()).unwrap();
        assert_eq!(mounts.at(Path::new("/mnt/huge")).len(), 1);

        let links = LinkTable::parse(&host.link_table().unwrap()).unwrap();
        assert!(links.find("xe1").is_none());
        assert!(links.find("xe2").unwrap().is_up());

        let status = BindingStatus::parse(&host.binding_status().unwrap()).unwrap();
        assert_eq!(status.poll_mode.len(), 1);
        assert_eq!(status.kernel.len(), 2);
        assert!(status.kernel_device_for("xe2").is_some());
    }
}
