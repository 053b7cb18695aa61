//! Kernel module lifecycle manager
//!
//! Modules are loaded only when absent and always verified against a fresh
//! module table afterwards. Unloading is used once, during recovery, and is
//! not verified.

use crate::config::{FrameworkModule, ModuleSource, ModuleSpec};
use crate::error::{HostPrepError, Result};
use crate::system::{CommandRunner, SystemProbe};
use std::path::Path;

/// What [`ModuleManager::ensure_loaded`] had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Module was already in the module table
    AlreadyLoaded,
    /// Module was loaded by this call
    Loaded,
}

/// Loads, unloads and builds kernel modules
pub struct ModuleManager<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> ModuleManager<'a> {
    /// Create a module manager
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Whether the module table currently lists `name`
    pub fn is_loaded(&self, name: &str) -> Result<bool> {
        SystemProbe::new(self.runner).is_module_loaded(name)
    }

    /// Ensure `spec` is loaded
    pub fn ensure_loaded(&self, spec: &ModuleSpec) -> Result<LoadOutcome> {
        if self.is_loaded(&spec.name)? {
            tracing::debug!(module = %spec.name, "already loaded");
            return Ok(LoadOutcome::AlreadyLoaded);
        }

        match &spec.source {
            ModuleSource::InTree => {
                tracing::info!(module = %spec.name, "modprobe");
                self.runner.load_module(&spec.name)?;
            }
            ModuleSource::Artifact { path } => {
                if !self.runner.path_exists(path) {
                    return Err(HostPrepError::ArtifactMissing(path.clone()));
                }
                tracing::info!(module = %spec.name, artifact = %path.display(), "insmod");
                self.runner.insert_module(path)?;
            }
            ModuleSource::Installer { script, workdir } => {
                tracing::info!(
                    module = %spec.name,
                    script = %script.display(),
                    workdir = %workdir.display(),
                    "running installer"
                );
                self.runner.run_program(script, &[], Some(workdir))?;
            }
        }

        if !self.is_loaded(&spec.name)? {
            return Err(HostPrepError::ModuleLoadFailed(spec.name.clone()));
        }
        Ok(LoadOutcome::Loaded)
    }

    /// Remove `name` if it is loaded. Returns whether `rmmod` was issued.
    pub fn ensure_unloaded(&self, name: &str) -> Result<bool> {
        if !self.is_loaded(name)? {
            return Ok(false);
        }
        tracing::info!(module = name, "rmmod");
        self.runner.remove_module(name)?;
        Ok(true)
    }

    /// Build the framework module when its object is missing.
    /// Returns whether a build ran.
    pub fn ensure_built(&self, framework: &FrameworkModule) -> Result<bool> {
        if self.runner.path_exists(&framework.artifact) {
            return Ok(false);
        }

        let (program, args) = framework
            .build_command
            .split_first()
            .ok_or_else(|| HostPrepError::config("framework build command is empty"))?;

        tracing::info!(
            module = %framework.name,
            command = %framework.build_command.join(" "),
            "building"
        );
        self.runner.run_program(Path::new(program), args, None)?;

        if !self.runner.path_exists(&framework.artifact) {
            return Err(HostPrepError::ArtifactMissing(framework.artifact.clone()));
        }
        Ok(true)
    }
}
