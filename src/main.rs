//! HostPrep CLI - prepare a host for a user-space packet runtime

use clap::Parser;
use console::style;
use hostprep::config::{CliArgs, Commands, LogFormat, ProvisionConfig};
use hostprep::error::{HostPrepError, Result};
use hostprep::progress::StepReporter;
use hostprep::provision::Provisioner;
use hostprep::system::{
    HugepageSummary, NumaTopology, RunLock, SystemCommandRunner, SystemProbe,
};
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Initialize logging
    init_logging(&args);

    // Handle result
    if let Err(e) = run(&args) {
        if e.is_permission_error() {
            eprintln!("{} provisioning needs root privileges", style("hint:").cyan());
        }
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(args: &CliArgs) {
    let filter = match args.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("hostprep=info"),
        2 => EnvFilter::new("hostprep=debug"),
        _ => EnvFilter::new("trace"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match args.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn run(args: &CliArgs) -> Result<()> {
    let config = ProvisionConfig::from_cli(args).map_err(HostPrepError::ConfigError)?;

    match args.command.unwrap_or(Commands::Provision) {
        Commands::Provision => cmd_provision(&config, args.quiet),
        Commands::Status => cmd_status(&config),
        Commands::ShowConfig => cmd_show_config(&config),
    }
}

fn cmd_provision(config: &ProvisionConfig, quiet: bool) -> Result<()> {
    warn_if_unprivileged();

    let lock = RunLock::acquire(&config.lock_file)?;
    let runner = SystemCommandRunner::new(&config.devbind).with_timeout(config.command_timeout());
    let reporter = if quiet {
        StepReporter::disabled()
    } else {
        StepReporter::new()
    };

    let report = Provisioner::new(config, &runner, &reporter).run()?;
    reporter.print_summary();
    tracing::info!(
        recovered = report.recovered.len(),
        interfaces = report.interfaces.len(),
        duration = %humantime::format_duration(report.duration),
        "provisioning complete"
    );

    drop(lock);
    match report.console {
        Some(console) => hand_off(&console),
        None => Ok(()),
    }
}

/// Replace this process with the management console
#[cfg(unix)]
fn hand_off(console: &Path) -> Result<()> {
    use std::os::unix::process::CommandExt;

    tracing::info!(console = %console.display(), "starting console");
    let err = std::process::Command::new(console).exec();
    Err(HostPrepError::CommandFailed {
        command: console.display().to_string(),
        status: "not started".to_string(),
        stderr: err.to_string(),
    })
}

#[cfg(not(unix))]
fn hand_off(console: &Path) -> Result<()> {
    let status = std::process::Command::new(console)
        .status()
        .map_err(|e| HostPrepError::io(console, e))?;
    if !status.success() {
        return Err(HostPrepError::CommandFailed {
            command: console.display().to_string(),
            status: status.to_string(),
            stderr: String::new(),
        });
    }
    Ok(())
}

fn warn_if_unprivileged() {
    #[cfg(unix)]
    if !nix::unistd::geteuid().is_root() {
        tracing::warn!("not running as root; host changes will likely be refused");
        eprintln!(
            "{} not running as root; host changes will likely be refused",
            style("warning:").yellow().bold()
        );
    }
}

fn cmd_status(config: &ProvisionConfig) -> Result<()> {
    let runner = SystemCommandRunner::new(&config.devbind).with_timeout(config.command_timeout());
    let probe = SystemProbe::new(&runner);

    println!("=== Kernel Modules ===");
    match probe.modules() {
        Ok(table) => {
            let mut names = vec![config.framework.name.as_str()];
            names.extend(config.modules.iter().map(|m| m.name.as_str()));
            names.push(config.kernel_driver.as_str());
            if !names.contains(&config.pmd_driver.as_str()) {
                names.push(config.pmd_driver.as_str());
            }
            for name in names {
                println!("  {:<12} {}", name, loaded_label(table.contains(name)));
            }
        }
        Err(e) => println!("  unavailable: {}", e),
    }

    println!("\n=== Hugetlbfs ===");
    match probe.mounts() {
        Ok(table) => {
            let entries = table.at(&config.mount_path);
            if entries.is_empty() {
                println!("  {}: not mounted", config.mount_path.display());
            }
            for entry in entries {
                println!(
                    "  {}: {} ({})",
                    config.mount_path.display(),
                    entry.fs_type,
                    entry.options.join(",")
                );
            }
        }
        Err(e) => println!("  unavailable: {}", e),
    }

    println!("\n=== Interfaces ===");
    match probe.links() {
        Ok(links) => {
            for name in &config.interfaces {
                let state = match links.find(name) {
                    Some(link) if link.is_up() => "up",
                    Some(_) => "down",
                    None => "absent",
                };
                println!("  {:<12} {}", name, state);
            }
        }
        Err(e) => println!("  unavailable: {}", e),
    }

    println!("\n=== Device Bindings ===");
    match probe.bindings() {
        Ok(status) => {
            println!("  Poll-mode driver:");
            print_devices(&status.poll_mode);
            println!("  Kernel driver:");
            print_devices(&status.kernel);
        }
        Err(e) => println!("  unavailable: {}", e),
    }

    println!();
    NumaTopology::detect(config.hugepage_size_kb).print_summary(config.hugepage_size_kb);
    if let Some(summary) = HugepageSummary::collect() {
        println!();
        summary.print_summary();
    }

    Ok(())
}

fn loaded_label(loaded: bool) -> console::StyledObject<&'static str> {
    if loaded {
        style("loaded").green()
    } else {
        style("not loaded").dim()
    }
}

fn print_devices(devices: &[hostprep::system::DeviceBinding]) {
    if devices.is_empty() {
        println!("    <none>");
    }
    for device in devices {
        println!(
            "    {} {:<10} drv={} {}",
            device.bus_address,
            device.interface.as_deref().unwrap_or("-"),
            device.driver.as_deref().unwrap_or("-"),
            if device.active { "*Active*" } else { "" }
        );
    }
}

fn cmd_show_config(config: &ProvisionConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
