//! Configuration settings for HostPrep
//!
//! Defines CLI arguments, the on-disk JSON configuration and the defaults
//! for a two-port poll-mode deployment.

use crate::error::{HostPrepError, IoResultExt, Result};
use crate::system::{DEFAULT_HUGEPAGE_SIZE_KB, DEFAULT_LOCK_PATH};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// HostPrep - prepare a host for user-space packet processing
#[derive(Parser, Debug, Clone)]
#[command(name = "hostprep")]
#[command(author = "HostPrep Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Reserve hugepages, mount hugetlbfs, load modules and bind NICs to a poll-mode driver")]
#[command(long_about = r#"
HostPrep brings a host into a known-good state before a user-space
packet-processing runtime starts.

Steps (in order):
  1. Recovery: unload the framework module, return poll-mode devices to the kernel driver
  2. Build the framework module if its object is missing
  3. Reserve hugepages on each NUMA node
  4. Mount hugetlbfs
  5. Load kernel modules
  6. Bring target interfaces down and bind them to the poll-mode driver
  7. Hand off to the management console

Examples:
  hostprep                                    # Provision with defaults
  hostprep -c /etc/hostprep.json              # Provision from a config file
  hostprep --hugepages 0=2048 -i xe1          # Override nodes and interfaces
  hostprep status                             # Show current host state
"#)]
pub struct CliArgs {
    /// JSON configuration file
    #[arg(short = 'c', long, env = "HOSTPREP_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Hugepages to reserve per NUMA node (repeatable)
    #[arg(long = "hugepages", value_name = "NODE=COUNT")]
    pub hugepages: Vec<String>,

    /// Hugepage size in kB
    #[arg(long, value_name = "KB")]
    pub hugepage_size_kb: Option<u64>,

    /// Hugetlbfs mount point
    #[arg(long, value_name = "PATH")]
    pub mount_path: Option<PathBuf>,

    /// Interface to bind to the poll-mode driver (repeatable, ordered)
    #[arg(short = 'i', long = "interface", value_name = "NAME")]
    pub interfaces: Vec<String>,

    /// Poll-mode driver to bind interfaces to
    #[arg(long, value_name = "DRIVER")]
    pub pmd_driver: Option<String>,

    /// Kernel driver that recovered devices are returned to
    #[arg(long, value_name = "DRIVER")]
    pub kernel_driver: Option<String>,

    /// Path to the device binding tool
    #[arg(long, env = "HOSTPREP_DEVBIND", value_name = "PATH")]
    pub devbind: Option<PathBuf>,

    /// Console program to exec after provisioning
    #[arg(long, value_name = "PATH", conflicts_with = "no_console")]
    pub console: Option<PathBuf>,

    /// Exit after provisioning instead of starting the console
    #[arg(long)]
    pub no_console: bool,

    /// Timeout for each external command (e.g., 30s, 2m)
    #[arg(long, value_name = "DURATION")]
    pub timeout: Option<String>,

    /// Wait before checking interfaces after modules load (e.g., 1s)
    #[arg(long, value_name = "DURATION")]
    pub settle_delay: Option<String>,

    /// Lock file guarding against concurrent runs
    #[arg(long, env = "HOSTPREP_LOCK", value_name = "PATH")]
    pub lock_file: Option<PathBuf>,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress step output)
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Provision the host (default)
    #[command(name = "provision")]
    Provision,

    /// Show current modules, mounts, bindings and hugepages
    #[command(name = "status")]
    Status,

    /// Print the effective configuration as JSON
    #[command(name = "show-config")]
    ShowConfig,
}

/// Log output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// How a kernel module gets loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModuleSource {
    /// Shipped with the kernel, loaded with `modprobe`
    InTree,
    /// Prebuilt object, loaded with `insmod`
    Artifact {
        /// Path to the `.ko` file
        path: PathBuf,
    },
    /// Project-provided install program
    Installer {
        /// Program to run
        script: PathBuf,
        /// Directory to run it in
        workdir: PathBuf,
    },
}

/// A kernel module that must be loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Module name as listed by `lsmod`
    pub name: String,
    /// Load method
    #[serde(flatten)]
    pub source: ModuleSource,
}

impl ModuleSpec {
    /// In-tree module
    pub fn in_tree(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: ModuleSource::InTree,
        }
    }

    /// Module loaded from a prebuilt object
    pub fn artifact(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: ModuleSource::Artifact { path: path.into() },
        }
    }
}

/// The packet-processing framework's own kernel module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkModule {
    /// Module name
    pub name: String,
    /// Built module object; its absence triggers a build
    pub artifact: PathBuf,
    /// Build command, program first
    pub build_command: Vec<String>,
    /// Install program
    pub install_script: PathBuf,
    /// Directory the install program runs in
    pub install_dir: PathBuf,
}

impl FrameworkModule {
    /// Load spec for this module
    pub fn module_spec(&self) -> ModuleSpec {
        ModuleSpec {
            name: self.name.clone(),
            source: ModuleSource::Installer {
                script: self.install_script.clone(),
                workdir: self.install_dir.clone(),
            },
        }
    }
}

impl Default for FrameworkModule {
    fn default() -> Self {
        Self {
            name: "bess".to_string(),
            artifact: PathBuf::from("core/kmod/bess.ko"),
            build_command: vec!["./build.py".to_string()],
            install_script: PathBuf::from("./install"),
            install_dir: PathBuf::from("core/kmod"),
        }
    }
}

/// Desired hugepage count for one NUMA node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReservation {
    /// NUMA node ID
    pub node: u32,
    /// Pages to reserve
    pub pages: u64,
}

/// Effective provisioning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Hugepage reservations, applied in order
    pub hugepages: Vec<NodeReservation>,
    /// Hugepage size in kB
    pub hugepage_size_kb: u64,
    /// Hugetlbfs mount point
    pub mount_path: PathBuf,
    /// Framework kernel module
    pub framework: FrameworkModule,
    /// Further modules, loaded in order after the framework module
    pub modules: Vec<ModuleSpec>,
    /// Interfaces to bind, in order
    pub interfaces: Vec<String>,
    /// Poll-mode driver
    pub pmd_driver: String,
    /// Default kernel driver for recovered devices
    pub kernel_driver: String,
    /// Device binding tool
    pub devbind: PathBuf,
    /// Console program started after provisioning
    pub console: Option<PathBuf>,
    /// Per-command timeout in milliseconds
    pub command_timeout_ms: u64,
    /// Settle delay in milliseconds
    pub settle_delay_ms: u64,
    /// Run lock file
    pub lock_file: PathBuf,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            hugepages: vec![
                NodeReservation { node: 0, pages: 1024 },
                NodeReservation { node: 1, pages: 1024 },
            ],
            hugepage_size_kb: DEFAULT_HUGEPAGE_SIZE_KB,
            mount_path: PathBuf::from("/mnt/huge"),
            framework: FrameworkModule::default(),
            modules: vec![
                ModuleSpec::in_tree("uio"),
                ModuleSpec::artifact("igb_uio", "deps/dpdk-17.05/build/kmod/igb_uio.ko"),
            ],
            interfaces: vec!["xe1".to_string(), "xe2".to_string()],
            pmd_driver: "igb_uio".to_string(),
            kernel_driver: "ixgbe".to_string(),
            devbind: PathBuf::from("bin/dpdk-devbind.py"),
            console: Some(PathBuf::from("bessctl/bessctl")),
            command_timeout_ms: 60_000,
            settle_delay_ms: 1000,
            lock_file: PathBuf::from(DEFAULT_LOCK_PATH),
        }
    }
}

/// Parse a `NODE=COUNT` hugepage reservation
pub fn parse_node_reservation(s: &str) -> std::result::Result<NodeReservation, String> {
    let (node, pages) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid reservation '{}', expected NODE=COUNT", s))?;
    let node = node
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("Invalid NUMA node '{}'", node))?;
    let pages = pages
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("Invalid page count '{}'", pages))?;
    Ok(NodeReservation { node, pages })
}

/// Parse a duration such as `30s` or `1500ms`
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    humantime::parse_duration(s.trim()).map_err(|e| format!("Invalid duration '{}': {}", s, e))
}

/// Parse a duration into whole milliseconds
pub fn parse_duration_ms(s: &str) -> std::result::Result<u64, String> {
    let duration = parse_duration(s)?;
    u64::try_from(duration.as_millis()).map_err(|_| format!("Duration '{}' is too large", s))
}

impl ProvisionConfig {
    /// Load configuration from a JSON file; missing fields take defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| HostPrepError::config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Build configuration from CLI arguments (file first, then flags)
    pub fn from_cli(args: &CliArgs) -> std::result::Result<Self, String> {
        let mut config = match &args.config {
            Some(path) => Self::load(path).map_err(|e| e.to_string())?,
            None => Self::default(),
        };

        if !args.hugepages.is_empty() {
            config.hugepages = args
                .hugepages
                .iter()
                .map(|s| parse_node_reservation(s))
                .collect::<std::result::Result<_, _>>()?;
        }
        if let Some(size) = args.hugepage_size_kb {
            config.hugepage_size_kb = size;
        }
        if let Some(ref path) = args.mount_path {
            config.mount_path = path.clone();
        }
        if !args.interfaces.is_empty() {
            config.interfaces = args.interfaces.clone();
        }
        if let Some(ref driver) = args.pmd_driver {
            config.pmd_driver = driver.clone();
        }
        if let Some(ref driver) = args.kernel_driver {
            config.kernel_driver = driver.clone();
        }
        if let Some(ref devbind) = args.devbind {
            config.devbind = devbind.clone();
        }
        if args.no_console {
            config.console = None;
        } else if let Some(ref console) = args.console {
            config.console = Some(console.clone());
        }
        if let Some(ref timeout) = args.timeout {
            config.command_timeout_ms = parse_duration_ms(timeout)?;
        }
        if let Some(ref delay) = args.settle_delay {
            config.settle_delay_ms = parse_duration_ms(delay)?;
        }
        if let Some(ref lock) = args.lock_file {
            config.lock_file = lock.clone();
        }

        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency
    pub fn validate(&self) -> std::result::Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for r in &self.hugepages {
            if !seen.insert(r.node) {
                return Err(format!("NUMA node {} listed more than once", r.node));
            }
        }
        if self.hugepage_size_kb == 0 {
            return Err("Hugepage size must be non-zero".to_string());
        }
        if !self.mount_path.is_absolute() {
            return Err(format!(
                "Mount path must be absolute: {}",
                self.mount_path.display()
            ));
        }
        if self.pmd_driver.is_empty() || self.kernel_driver.is_empty() {
            return Err("Driver names must not be empty".to_string());
        }
        if self.framework.build_command.is_empty() {
            return Err("Framework build command must not be empty".to_string());
        }
        let mut names = std::collections::HashSet::new();
        for iface in &self.interfaces {
            if !names.insert(iface.as_str()) {
                return Err(format!("Interface {} listed more than once", iface));
            }
        }
        if self.command_timeout_ms == 0 {
            return Err("Command timeout must be non-zero".to_string());
        }
        Ok(())
    }

    /// Per-command timeout
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Delay before interfaces are checked
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
