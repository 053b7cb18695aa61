//! System probe
//!
//! Read-only views of host state. Each view is parsed fresh from the output
//! of the corresponding tool; nothing here is cached, since every
//! provisioning step may change what the next one observes.
//!
//! Parsers are strict: a line that does not match the documented layout is
//! reported as [`HostPrepError::Parse`] with its 1-based line number instead
//! of being skipped.

use super::numa::{hugepage_control_path, parse_nr_hugepages};
use super::runner::CommandRunner;
use crate::error::{HostPrepError, Result};
use std::path::{Path, PathBuf};

/// Filesystem type of a huge-page mount
pub const HUGETLBFS: &str = "hugetlbfs";

const DPDK_SECTION: &str = "Network devices using DPDK-compatible driver";
const KERNEL_SECTION: &str = "Network devices using kernel driver";

// ============================================================================
// Module table
// ============================================================================

/// One loaded kernel module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleEntry {
    /// Module name
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Reference count; negative when the kernel does not track it
    pub use_count: i32,
    /// Modules using this one
    pub users: Vec<String>,
}

/// Parsed `lsmod` output
#[derive(Debug, Clone, Default)]
pub struct ModuleTable {
    /// Loaded modules in listing order
    pub modules: Vec<ModuleEntry>,
}

impl ModuleTable {
    /// Parse `lsmod` output.
    ///
    /// Layout: a `Module Size Used by` header, then
    /// `<name> <size> <use-count> [<user>,<user>...]` per line. The use
    /// count is printed as-is by kmod and may be negative (`-2`) on kernels
    /// built without module unloading.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines().enumerate();

        match lines.next() {
            Some((_, header)) if header.split_whitespace().next() == Some("Module") => {}
            _ => return Err(HostPrepError::parse("module table", 1, "missing 'Module' header")),
        }

        let mut modules = Vec::new();
        for (idx, line) in lines {
            if line.trim().is_empty() {
                continue;
            }
            let lineno = idx + 1;
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 3 {
                return Err(HostPrepError::parse(
                    "module table",
                    lineno,
                    format!("expected at least 3 columns, got {}", fields.len()),
                ));
            }

            let size = fields[1].parse::<u64>().map_err(|_| {
                HostPrepError::parse("module table", lineno, format!("bad size '{}'", fields[1]))
            })?;
            let use_count = fields[2].parse::<i32>().map_err(|_| {
                HostPrepError::parse("module table", lineno, format!("bad use count '{}'", fields[2]))
            })?;
            let users = fields
                .get(3)
                .map(|list| {
                    list.split(',')
                        .filter(|u| !u.is_empty() && *u != "-")
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();

            modules.push(ModuleEntry {
                name: fields[0].to_string(),
                size,
                use_count,
                users,
            });
        }

        Ok(Self { modules })
    }

    /// Whether a module with this name is loaded (`-` and `_` are equivalent)
    pub fn contains(&self, name: &str) -> bool {
        let wanted = canonical_module_name(name);
        self.modules
            .iter()
            .any(|m| canonical_module_name(&m.name) == wanted)
    }
}

fn canonical_module_name(name: &str) -> String {
    name.replace('-', "_")
}

// ============================================================================
// Mount table
// ============================================================================

/// One mounted filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Source device (`nodev` for hugetlbfs)
    pub device: String,
    /// Mount point
    pub mount_point: PathBuf,
    /// Filesystem type
    pub fs_type: String,
    /// Mount options
    pub options: Vec<String>,
}

impl MountEntry {
    /// Whether this is a huge-page filesystem
    pub fn is_hugetlbfs(&self) -> bool {
        self.fs_type == HUGETLBFS
    }
}

/// Parsed `mount` output
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    /// Mounts in the order the kernel lists them (later entries stack on top)
    pub entries: Vec<MountEntry>,
}

impl MountTable {
    /// Parse `mount` output.
    ///
    /// Layout: `<device> on <mount-point> type <fstype> (<opt>,<opt>...)`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = Vec::new();

        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let lineno = idx + 1;

            let (device, rest) = line
                .split_once(" on ")
                .ok_or_else(|| HostPrepError::parse("mount table", lineno, "missing ' on '"))?;
            let (mount_point, rest) = rest
                .rsplit_once(" type ")
                .ok_or_else(|| HostPrepError::parse("mount table", lineno, "missing ' type '"))?;

            let mut parts = rest.splitn(2, ' ');
            let fs_type = parts
                .next()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| HostPrepError::parse("mount table", lineno, "missing filesystem type"))?;
            let options = parts
                .next()
                .map(|opts| {
                    opts.trim()
                        .trim_start_matches('(')
                        .trim_end_matches(')')
                        .split(',')
                        .filter(|o| !o.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();

            entries.push(MountEntry {
                device: device.to_string(),
                mount_point: PathBuf::from(mount_point),
                fs_type: fs_type.to_string(),
                options,
            });
        }

        Ok(Self { entries })
    }

    /// All mounts at exactly `path`, bottom first
    pub fn at(&self, path: &Path) -> Vec<&MountEntry> {
        self.entries
            .iter()
            .filter(|e| e.mount_point == path)
            .collect()
    }
}

// ============================================================================
// Link table
// ============================================================================

/// One network link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry {
    /// Interface index
    pub index: u32,
    /// Interface name (without any `@peer` suffix)
    pub name: String,
    /// Flags between the angle brackets
    pub flags: Vec<String>,
}

impl LinkEntry {
    /// Administratively up
    pub fn is_up(&self) -> bool {
        self.flags.iter().any(|f| f == "UP")
    }
}

/// Parsed `ip -o link show` output
#[derive(Debug, Clone, Default)]
pub struct LinkTable {
    /// Links in listing order
    pub links: Vec<LinkEntry>,
}

impl LinkTable {
    /// Parse `ip -o link show` output.
    ///
    /// Layout: `<index>: <name>[@<peer>]: <FLAG,...> ...`, one link per line.
    pub fn parse(text: &str) -> Result<Self> {
        let mut links = Vec::new();

        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let lineno = idx + 1;

            let (index, rest) = line
                .split_once(": ")
                .ok_or_else(|| HostPrepError::parse("link table", lineno, "missing index"))?;
            let index = index.trim().parse::<u32>().map_err(|_| {
                HostPrepError::parse("link table", lineno, format!("bad index '{}'", index))
            })?;

            let (name, rest) = rest
                .split_once(": ")
                .ok_or_else(|| HostPrepError::parse("link table", lineno, "missing name"))?;
            let name = name.split('@').next().unwrap_or(name).trim();
            if name.is_empty() {
                return Err(HostPrepError::parse("link table", lineno, "empty name"));
            }

            let flags = rest
                .trim_start()
                .strip_prefix('<')
                .and_then(|r| r.split_once('>'))
                .map(|(flags, _)| flags)
                .ok_or_else(|| HostPrepError::parse("link table", lineno, "missing flag set"))?;

            links.push(LinkEntry {
                index,
                name: name.to_string(),
                flags: flags
                    .split(',')
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect(),
            });
        }

        Ok(Self { links })
    }

    /// Look up a link by name
    pub fn find(&self, name: &str) -> Option<&LinkEntry> {
        self.links.iter().find(|l| l.name == name)
    }
}

// ============================================================================
// Device binding status
// ============================================================================

/// Which partition of the binding listing a device appeared in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingClass {
    /// Bound to a poll-mode (DPDK-compatible) driver
    PollMode,
    /// Bound to a standard kernel driver
    Kernel,
}

/// One device from the binding listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceBinding {
    /// PCI bus address (`DDDD:BB:DD.F`)
    pub bus_address: String,
    /// Vendor/device description
    pub description: String,
    /// Kernel interface name, only for kernel-bound devices
    pub interface: Option<String>,
    /// Driver currently managing the device
    pub driver: Option<String>,
    /// Other drivers that could claim the device
    pub unused: Vec<String>,
    /// Device carries an active route
    pub active: bool,
}

/// Parsed binding-status listing
#[derive(Debug, Clone, Default)]
pub struct BindingStatus {
    /// Devices bound to poll-mode drivers, listing order
    pub poll_mode: Vec<DeviceBinding>,
    /// Devices bound to kernel drivers, listing order
    pub kernel: Vec<DeviceBinding>,
}

#[derive(Clone, Copy)]
enum Section {
    PollMode,
    Kernel,
    Ignored,
}

impl BindingStatus {
    /// Parse `dpdk-devbind.py --status` output.
    ///
    /// Sections start with a title line underlined by `=`. Only the
    /// DPDK-compatible and kernel driver network sections are kept; a section
    /// body of `<none>` is empty. Entries look like
    /// `<bus> '<description>' [if=<name>] [drv=<driver>] [unused=<a>,<b>] [*Active*]`.
    pub fn parse(text: &str) -> Result<Self> {
        let lines: Vec<&str> = text.lines().collect();
        let mut status = Self::default();
        let mut section: Option<Section> = None;
        let mut idx = 0;

        while idx < lines.len() {
            let line = lines[idx].trim();
            let lineno = idx + 1;
            idx += 1;

            if line.is_empty() {
                continue;
            }

            if lines.get(idx).map_or(false, |next| is_underline(next)) {
                section = Some(if line.starts_with(DPDK_SECTION) {
                    Section::PollMode
                } else if line.starts_with(KERNEL_SECTION) {
                    Section::Kernel
                } else {
                    Section::Ignored
                });
                idx += 1;
                continue;
            }

            let current = section.ok_or_else(|| {
                HostPrepError::parse("binding status", lineno, "device listed before any section")
            })?;
            if line == "<none>" {
                continue;
            }

            match current {
                Section::Ignored => {}
                Section::PollMode => {
                    let device = parse_device_line(line, lineno)?;
                    if device.driver.is_none() {
                        return Err(HostPrepError::parse(
                            "binding status",
                            lineno,
                            format!("{} has no drv= field", device.bus_address),
                        ));
                    }
                    status.poll_mode.push(device);
                }
                Section::Kernel => status.kernel.push(parse_device_line(line, lineno)?),
            }
        }

        Ok(status)
    }

    /// Kernel-bound device carrying interface `name`
    pub fn kernel_device_for(&self, name: &str) -> Option<&DeviceBinding> {
        self.kernel
            .iter()
            .find(|d| d.interface.as_deref() == Some(name))
    }

    /// Find a device by bus address in either partition
    pub fn find(&self, bus_address: &str) -> Option<(BindingClass, &DeviceBinding)> {
        self.poll_mode
            .iter()
            .find(|d| d.bus_address == bus_address)
            .map(|d| (BindingClass::PollMode, d))
            .or_else(|| {
                self.kernel
                    .iter()
                    .find(|d| d.bus_address == bus_address)
                    .map(|d| (BindingClass::Kernel, d))
            })
    }
}

fn is_underline(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty() && line.chars().all(|c| c == '=')
}

fn parse_device_line(line: &str, lineno: usize) -> Result<DeviceBinding> {
    let (bus_address, rest) = line
        .split_once(char::is_whitespace)
        .unwrap_or((line, ""));
    if !is_bus_address(bus_address) {
        return Err(HostPrepError::parse(
            "binding status",
            lineno,
            format!("'{}' is not a bus address", bus_address),
        ));
    }

    let rest = rest.trim_start();
    let (description, tail) = match rest.strip_prefix('\'') {
        Some(quoted) => {
            let end = quoted.rfind('\'').ok_or_else(|| {
                HostPrepError::parse("binding status", lineno, "unterminated description")
            })?;
            (&quoted[..end], &quoted[end + 1..])
        }
        None => ("", rest),
    };

    let mut device = DeviceBinding {
        bus_address: bus_address.to_string(),
        description: description.to_string(),
        interface: None,
        driver: None,
        unused: Vec::new(),
        active: false,
    };

    for token in tail.split_whitespace() {
        match token.split_once('=') {
            Some(("if", value)) => device.interface = Some(value.to_string()),
            Some(("drv", value)) => device.driver = Some(value.to_string()),
            Some(("unused", value)) => {
                device.unused = value
                    .split(',')
                    .filter(|d| !d.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            // numa_node= and friends are informational
            Some(_) => {}
            None if token == "*Active*" => device.active = true,
            None => {}
        }
    }

    Ok(device)
}

/// `DDDD:BB:DD.F` in hex
fn is_bus_address(s: &str) -> bool {
    let hex = |part: &str, len: usize| part.len() == len && part.chars().all(|c| c.is_ascii_hexdigit());

    let mut parts = s.split(':');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(domain), Some(bus), Some(slot), None) => match slot.split_once('.') {
            Some((device, function)) => {
                hex(domain, 4)
                    && hex(bus, 2)
                    && hex(device, 2)
                    && function.len() == 1
                    && matches!(function.as_bytes()[0], b'0'..=b'7')
            }
            None => false,
        },
        _ => false,
    }
}

// ============================================================================
// Probe
// ============================================================================

/// Fresh, parsed views of host state
pub struct SystemProbe<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> SystemProbe<'a> {
    /// Create a probe over a runner
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Current module table
    pub fn modules(&self) -> Result<ModuleTable> {
        ModuleTable::parse(&self.runner.module_table()?)
    }

    /// Whether `name` is in the module table
    pub fn is_module_loaded(&self, name: &str) -> Result<bool> {
        Ok(self.modules()?.contains(name))
    }

    /// Current mount table
    pub fn mounts(&self) -> Result<MountTable> {
        MountTable::parse(&self.runner.mount_table()?)
    }

    /// Current link table
    pub fn links(&self) -> Result<LinkTable> {
        LinkTable::parse(&self.runner.link_table()?)
    }

    /// Current binding status
    pub fn bindings(&self) -> Result<BindingStatus> {
        BindingStatus::parse(&self.runner.binding_status()?)
    }

    /// Huge pages currently reserved on `node`
    pub fn hugepages(&self, node: u32, page_size_kb: u64) -> Result<u64> {
        let path = hugepage_control_path(node, page_size_kb);
        if !self.runner.path_exists(&path) {
            return Err(HostPrepError::NumaNodeNotFound(node));
        }
        parse_nr_hugepages(&self.runner.read_control(&path)?)
    }
}
