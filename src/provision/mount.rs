//! Hugetlbfs mount manager

use crate::error::{HostPrepError, Result};
use crate::system::{CommandRunner, SystemProbe};
use std::path::Path;

/// What [`MountManager::ensure_mounted`] had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    /// A single hugetlbfs mount was already in place
    AlreadyMounted,
    /// A fresh hugetlbfs was mounted
    Mounted {
        /// Mounts removed from the path first
        removed: usize,
        /// The mount point directory had to be created
        created_dir: bool,
    },
}

/// Keeps exactly one hugetlbfs mounted at a path
pub struct MountManager<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> MountManager<'a> {
    /// Create a mount manager
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Ensure `path` carries exactly one hugetlbfs mount.
    ///
    /// Anything else mounted there (another filesystem type, or stacked
    /// duplicates) is unmounted before the fresh mount.
    pub fn ensure_mounted(&self, path: &Path) -> Result<MountOutcome> {
        let probe = SystemProbe::new(self.runner);
        let table = probe.mounts()?;
        let existing: Vec<String> = table.at(path).iter().map(|m| m.fs_type.clone()).collect();

        if let [fs_type] = existing.as_slice() {
            if fs_type == crate::system::HUGETLBFS {
                tracing::debug!(path = %path.display(), "hugetlbfs already mounted");
                return Ok(MountOutcome::AlreadyMounted);
            }
        }

        for fs_type in existing.iter().rev() {
            tracing::warn!(path = %path.display(), fs_type = %fs_type, "unmounting");
            self.runner.unmount(path)?;
        }
        if !existing.is_empty() && !probe.mounts()?.at(path).is_empty() {
            return Err(HostPrepError::mount(path, "still mounted after unmount"));
        }

        let created_dir = !self.runner.path_exists(path);
        if created_dir {
            self.runner.create_dir(path)?;
        }

        tracing::info!(path = %path.display(), "mounting hugetlbfs");
        self.runner.mount_hugetlbfs(path)?;

        let after = probe.mounts()?;
        match after.at(path).as_slice() {
            [entry] if entry.is_hugetlbfs() => Ok(MountOutcome::Mounted {
                removed: existing.len(),
                created_dir,
            }),
            [] => Err(HostPrepError::mount(path, "no mount present after mount")),
            entries => Err(HostPrepError::mount(
                path,
                format!(
                    "expected one hugetlbfs mount, found {}",
                    entries
                        .iter()
                        .map(|e| e.fs_type.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::fake::{Action, FakeHost};
    use crate::system::MountEntry;
    use std::path::PathBuf;

    const MNT: &str = "/mnt/huge";

    fn mount_entry(fs_type: &str) -> MountEntry {
        MountEntry {
            device: "nodev".to_string(),
            mount_point: PathBuf::from(MNT),
            fs_type: fs_type.to_string(),
            options: vec!["rw".to_string()],
        }
    }

    fn mount_actions(host: &FakeHost) -> (usize, usize) {
        (
            host.count(|a| matches!(a, Action::Mount(_))),
            host.count(|a| matches!(a, Action::Unmount(_))),
        )
    }

    #[test]
    fn test_fresh_mount_creates_directory() {
        let host = FakeHost::two_port();
        let manager = MountManager::new(&host);

        let outcome = manager.ensure_mounted(Path::new(MNT)).unwrap();
        assert_eq!(
            outcome,
            MountOutcome::Mounted {
                removed: 0,
                created_dir: true
            }
        );
        assert_eq!(
            host.actions(),
            vec![
                Action::CreateDir(PathBuf::from(MNT)),
                Action::Mount(PathBuf::from(MNT)),
            ]
        );
    }

    #[test]
    fn test_existing_hugetlbfs_is_noop() {
        let host = FakeHost::two_port();
        host.with(|s| {
            s.dirs.insert(PathBuf::from(MNT));
            s.mounts.push(mount_entry("hugetlbfs"));
        });

        let manager = MountManager::new(&host);
        assert_eq!(
            manager.ensure_mounted(Path::new(MNT)).unwrap(),
            MountOutcome::AlreadyMounted
        );
        assert_eq!(mount_actions(&host), (0, 0));
    }

    #[test]
    fn test_foreign_mount_is_replaced() {
        let host = FakeHost::two_port();
        host.with(|s| {
            s.dirs.insert(PathBuf::from(MNT));
            s.mounts.push(mount_entry("tmpfs"));
        });

        let manager = MountManager::new(&host);
        let outcome = manager.ensure_mounted(Path::new(MNT)).unwrap();
        assert_eq!(
            outcome,
            MountOutcome::Mounted {
                removed: 1,
                created_dir: false
            }
        );
        assert_eq!(mount_actions(&host), (1, 1));

        let mounts = host.with(|s| s.mounts.clone());
        assert_eq!(mounts.len(), 1);
        assert!(mounts[0].is_hugetlbfs());
    }

    #[test]
    fn test_stacked_mounts_are_collapsed() {
        let host = FakeHost::two_port();
        host.with(|s| {
            s.dirs.insert(PathBuf::from(MNT));
            s.mounts.push(mount_entry("hugetlbfs"));
            s.mounts.push(mount_entry("hugetlbfs"));
        });

        let manager = MountManager::new(&host);
        manager.ensure_mounted(Path::new(MNT)).unwrap();
        assert_eq!(mount_actions(&host), (1, 2));
        assert_eq!(host.with(|s| s.mounts.len()), 1);
    }

    #[test]
    fn test_mount_without_effect_is_fatal() {
        let host = FakeHost::two_port();
        host.with(|s| s.inert_mount = true);

        let manager = MountManager::new(&host);
        let err = manager.ensure_mounted(Path::new(MNT)).unwrap_err();
        assert!(matches!(err, HostPrepError::MountFailed { .. }));
    }

    #[test]
    fn test_unreadable_mount_table_is_probe_error() {
        let host = FakeHost::two_port();
        host.with(|s| s.broken_query = Some("mount table"));

        let manager = MountManager::new(&host);
        let err = manager.ensure_mounted(Path::new(MNT)).unwrap_err();
        assert!(matches!(err, HostPrepError::Probe { .. }));
        assert!(host.actions().is_empty());
    }
}
