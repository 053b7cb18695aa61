//! Error types for HostPrep
//!
//! Every failure in a provisioning run is fatal. The variants below name the
//! resource that could not be brought into its desired state so the operator
//! can see exactly which step stopped the run.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for HostPrep operations
#[derive(Error, Debug)]
pub enum HostPrepError {
    /// I/O error on a local file or directory
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A system query could not be executed
    #[error("Cannot observe {what}: {message}")]
    Probe { what: String, message: String },

    /// A system query produced output we do not understand
    #[error("Malformed {what} output at line {line}: {message}")]
    Parse {
        what: &'static str,
        line: usize,
        message: String,
    },

    /// No huge-page control file exists for the requested NUMA node
    #[error("NUMA node {0} not found (no huge-page control file)")]
    NumaNodeNotFound(u32),

    /// Hugepage reservation did not reach the requested count
    #[error("Failed to reserve hugepages on NUMA node {node}: wanted {desired}, kernel reports {actual}")]
    HugepageReservationFailed { node: u32, desired: u64, actual: u64 },

    /// Hugetlbfs could not be mounted (or a foreign mount could not be removed)
    #[error("Failed to mount hugetlbfs at '{path}': {message}")]
    MountFailed { path: PathBuf, message: String },

    /// A prebuilt module object is not on disk
    #[error("Module artifact does not exist: {0}")]
    ArtifactMissing(PathBuf),

    /// A module was loaded but does not show up in the module table
    #[error("Kernel module '{0}' is not loaded after install")]
    ModuleLoadFailed(String),

    /// The driver a device should be bound to is not loaded
    #[error("[{0}] Driver does not exist")]
    DriverUnavailable(String),

    /// Target network interface is missing
    #[error("{0} interface is not detected")]
    InterfaceNotFound(String),

    /// Target network interface is still administratively up
    #[error("{0} interface is still up after link down")]
    InterfaceDownFailed(String),

    /// No kernel-bound device matches the interface name
    #[error("Cannot find {0} among kernel-bound devices")]
    BindingTargetNotFound(String),

    /// Device is not bound to the requested driver after bind
    #[error("Device {bus_address} is not bound to {driver} after bind")]
    BindFailed { bus_address: String, driver: String },

    /// External command exceeded its time budget
    #[error("Command '{command}' timed out after {}", format_timeout(.timeout))]
    ExternalCommandTimeout { command: String, timeout: Duration },

    /// External action exited with a failure status
    #[error("Command '{command}' failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// Another provisioning run holds the lock
    #[error("Another run holds the lock at '{0}'")]
    LockHeld(PathBuf),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<HostPrepError>,
    },
}

impl HostPrepError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a probe error
    pub fn probe(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Probe {
            what: what.into(),
            message: message.into(),
        }
    }

    /// Create a parse error for a 1-based line number
    pub fn parse(what: &'static str, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            what,
            line,
            message: message.into(),
        }
    }

    /// Create a mount error
    pub fn mount(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::MountFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Check if this error stems from a missing privilege
    pub fn is_permission_error(&self) -> bool {
        match self {
            Self::Io { source, .. } => source.kind() == std::io::ErrorKind::PermissionDenied,
            Self::CommandFailed { stderr, .. } => {
                stderr.contains("Operation not permitted") || stderr.contains("Permission denied")
            }
            Self::WithContext { source, .. } => source.is_permission_error(),
            _ => false,
        }
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. }
            | Self::MountFailed { path, .. }
            | Self::ArtifactMissing(path)
            | Self::LockHeld(path) => Some(path),
            Self::WithContext { source, .. } => source.path(),
            _ => None,
        }
    }
}

fn format_timeout(timeout: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*timeout)
}

/// Result type alias for HostPrep operations
pub type Result<T> = std::result::Result<T, HostPrepError>;

impl From<serde_json::Error> for HostPrepError {
    fn from(err: serde_json::Error) -> Self {
        HostPrepError::ConfigError(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| HostPrepError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = HostPrepError::io("/test/path", io_err);
        assert_eq!(err.path(), Some(&PathBuf::from("/test/path")));
    }

    #[test]
    fn test_permission_detection() {
        let err = HostPrepError::CommandFailed {
            command: "rmmod bess".to_string(),
            status: "exit status: 1".to_string(),
            stderr: "rmmod: ERROR: ... Operation not permitted".to_string(),
        };
        assert!(err.is_permission_error());
        assert!(err.with_context("recovery").is_permission_error());

        assert!(!HostPrepError::NumaNodeNotFound(3).is_permission_error());
    }

    #[test]
    fn test_messages_name_the_resource() {
        let err = HostPrepError::HugepageReservationFailed {
            node: 1,
            desired: 1024,
            actual: 512,
        };
        let msg = err.to_string();
        assert!(msg.contains("node 1"));
        assert!(msg.contains("1024"));
        assert!(msg.contains("512"));

        let err = HostPrepError::ExternalCommandTimeout {
            command: "lsmod".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "Command 'lsmod' timed out after 5s");
    }
}
