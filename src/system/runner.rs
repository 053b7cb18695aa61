//! Command runner
//!
//! Every query and every action HostPrep performs against the host goes
//! through [`CommandRunner`]. The production implementation shells out to
//! the standard Linux tools with a bounded timeout per call; tests substitute
//! a simulated host.

use crate::error::{HostPrepError, IoResultExt, Result};
use crossbeam::channel::{self, RecvTimeoutError};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Duration;

/// Default time budget for a single external command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Capability interface for host queries and actions
///
/// Query methods return the raw text of the corresponding tool so the
/// parsers in [`super::probe`] stay the single place that understands each
/// format. Action methods return `Ok(())` once the command exited
/// successfully; callers verify the effect themselves.
pub trait CommandRunner {
    /// Loaded module table (`lsmod`)
    fn module_table(&self) -> Result<String>;

    /// Mounted filesystems (`mount`)
    fn mount_table(&self) -> Result<String>;

    /// Network links, one per line (`ip -o link show`)
    fn link_table(&self) -> Result<String>;

    /// Device binding status listing (`dpdk-devbind.py --status`)
    fn binding_status(&self) -> Result<String>;

    /// Read a kernel control file
    fn read_control(&self, path: &Path) -> Result<String>;

    /// Write a value to a kernel control file
    fn write_control(&self, path: &Path, value: &str) -> Result<()>;

    /// Whether a path exists on the host
    fn path_exists(&self, path: &Path) -> bool;

    /// Create a directory (and its parents)
    fn create_dir(&self, path: &Path) -> Result<()>;

    /// Mount a hugetlbfs instance at `path`
    fn mount_hugetlbfs(&self, path: &Path) -> Result<()>;

    /// Unmount the topmost filesystem at `path`
    fn unmount(&self, path: &Path) -> Result<()>;

    /// Load an in-tree module (`modprobe`)
    fn load_module(&self, name: &str) -> Result<()>;

    /// Insert a prebuilt module object (`insmod`)
    fn insert_module(&self, artifact: &Path) -> Result<()>;

    /// Remove a loaded module (`rmmod`)
    fn remove_module(&self, name: &str) -> Result<()>;

    /// Run a build or install program, optionally inside `workdir`
    fn run_program(&self, program: &Path, args: &[String], workdir: Option<&Path>) -> Result<()>;

    /// Administratively disable a link
    fn link_down(&self, interface: &str) -> Result<()>;

    /// Bind the device at `bus_address` to `driver`
    fn bind_device(&self, driver: &str, bus_address: &str) -> Result<()>;
}

/// Why a command did not produce output
enum ExecFailure {
    Spawn(io::Error),
    Wait(io::Error),
    Timeout,
}

/// Runs real system commands
#[derive(Debug, Clone)]
pub struct SystemCommandRunner {
    /// Path to the device binding tool
    devbind: PathBuf,
    /// Budget for each external command
    timeout: Duration,
}

impl SystemCommandRunner {
    /// Create a runner using the given binding tool
    pub fn new(devbind: impl Into<PathBuf>) -> Self {
        Self {
            devbind: devbind.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Set the per-command timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Spawn `command` and wait for it, killing it when the budget runs out
    fn execute(&self, mut command: Command) -> std::result::Result<Output, ExecFailure> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = command.spawn().map_err(ExecFailure::Spawn)?;
        let pid = child.id();

        let (tx, rx) = channel::bounded(1);
        std::thread::Builder::new()
            .name("hostprep-wait".to_string())
            .spawn(move || {
                let _ = tx.send(child.wait_with_output());
            })
            .map_err(ExecFailure::Wait)?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result.map_err(ExecFailure::Wait),
            Err(RecvTimeoutError::Timeout) => {
                kill_child(pid);
                Err(ExecFailure::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => Err(ExecFailure::Wait(io::Error::new(
                io::ErrorKind::Other,
                "waiter thread exited without a result",
            ))),
        }
    }

    /// Run a read-only query and return its stdout
    fn query(&self, what: &str, program: &Path, args: &[&str]) -> Result<String> {
        let label = describe(program, args);
        tracing::debug!(command = %label, "query");

        let mut command = Command::new(program);
        command.args(args);

        match self.execute(command) {
            Ok(output) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(output) => Err(HostPrepError::probe(
                what,
                format!(
                    "'{}' exited with {}: {}",
                    label,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            )),
            Err(ExecFailure::Spawn(e)) | Err(ExecFailure::Wait(e)) => {
                Err(HostPrepError::probe(what, format!("cannot run '{}': {}", label, e)))
            }
            Err(ExecFailure::Timeout) => Err(HostPrepError::ExternalCommandTimeout {
                command: label,
                timeout: self.timeout,
            }),
        }
    }

    /// Run an action; a non-zero exit status is an error
    fn act(&self, program: &Path, args: &[&str], workdir: Option<&Path>) -> Result<()> {
        let label = describe(program, args);
        tracing::info!(command = %label, "exec");

        let mut command = Command::new(program);
        command.args(args);
        if let Some(dir) = workdir {
            command.current_dir(dir);
        }

        match self.execute(command) {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => Err(HostPrepError::CommandFailed {
                command: label,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            Err(ExecFailure::Spawn(e)) | Err(ExecFailure::Wait(e)) => {
                Err(HostPrepError::CommandFailed {
                    command: label,
                    status: "not started".to_string(),
                    stderr: e.to_string(),
                })
            }
            Err(ExecFailure::Timeout) => Err(HostPrepError::ExternalCommandTimeout {
                command: label,
                timeout: self.timeout,
            }),
        }
    }
}

impl CommandRunner for SystemCommandRunner {
    fn module_table(&self) -> Result<String> {
        self.query("module table", Path::new("lsmod"), &[])
    }

    fn mount_table(&self) -> Result<String> {
        self.query("mount table", Path::new("mount"), &[])
    }

    fn link_table(&self) -> Result<String> {
        self.query("network links", Path::new("ip"), &["-o", "link", "show"])
    }

    fn binding_status(&self) -> Result<String> {
        self.query("device binding status", &self.devbind, &["--status"])
    }

    fn read_control(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path).map_err(|e| {
            HostPrepError::probe("nr_hugepages", format!("cannot read {}: {}", path.display(), e))
        })
    }

    fn write_control(&self, path: &Path, value: &str) -> Result<()> {
        tracing::info!(path = %path.display(), value, "write");
        std::fs::write(path, value).with_path(path)
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        tracing::info!(path = %path.display(), "mkdir");
        std::fs::create_dir_all(path).with_path(path)
    }

    fn mount_hugetlbfs(&self, path: &Path) -> Result<()> {
        let target = path.to_string_lossy();
        self.act(
            Path::new("mount"),
            &["-t", "hugetlbfs", "nodev", target.as_ref()],
            None,
        )
    }

    fn unmount(&self, path: &Path) -> Result<()> {
        let target = path.to_string_lossy();
        self.act(Path::new("umount"), &[target.as_ref()], None)
    }

    fn load_module(&self, name: &str) -> Result<()> {
        self.act(Path::new("modprobe"), &[name], None)
    }

    fn insert_module(&self, artifact: &Path) -> Result<()> {
        let artifact = artifact.to_string_lossy();
        self.act(Path::new("insmod"), &[artifact.as_ref()], None)
    }

    fn remove_module(&self, name: &str) -> Result<()> {
        self.act(Path::new("rmmod"), &[name], None)
    }

    fn run_program(&self, program: &Path, args: &[String], workdir: Option<&Path>) -> Result<()> {
        // Relative programs are resolved against the working directory they run in.
        let program = match workdir {
            Some(dir) if program.is_relative() && program.components().count() > 1 => {
                let cwd = std::env::current_dir().with_path(".")?;
                cwd.join(dir).join(program)
            }
            _ => program.to_path_buf(),
        };
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.act(&program, &args, workdir)
    }

    fn link_down(&self, interface: &str) -> Result<()> {
        self.act(Path::new("ip"), &["link", "set", "dev", interface, "down"], None)
    }

    fn bind_device(&self, driver: &str, bus_address: &str) -> Result<()> {
        self.act(&self.devbind, &["-b", driver, bus_address], None)
    }
}

fn describe(program: &Path, args: &[&str]) -> String {
    let mut label = program.display().to_string();
    for arg in args {
        label.push(' ');
        label.push_str(arg);
    }
    label
}

#[cfg(unix)]
fn kill_child(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        tracing::debug!("failed to kill timed-out child {}: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn kill_child(_pid: u32) {}
