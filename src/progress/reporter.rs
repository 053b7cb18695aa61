//! Step reporter implementation
//!
//! Uses indicatif for a spinner while a provisioning step runs and console
//! for the per-step confirmation lines:
//! - `✓ <step>: <detail>` once a step reached its desired state
//! - `✗ <step>` when a step aborts the run

use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Outcome of one reported step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    /// Step title
    pub title: String,
    /// What the step did (or why it failed)
    pub detail: String,
    /// Step succeeded
    pub ok: bool,
    /// Time spent in the step
    pub elapsed: Duration,
}

struct ActiveStep {
    title: String,
    started: Instant,
    spinner: ProgressBar,
}

/// Reports provisioning steps to the operator
pub struct StepReporter {
    /// Step in progress
    active: Mutex<Option<ActiveStep>>,
    /// Finished steps, in order
    records: Mutex<Vec<StepRecord>>,
    /// Start time
    start_time: Instant,
    /// Is output enabled
    enabled: AtomicBool,
}

impl StepReporter {
    /// Create a new reporter
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
            records: Mutex::new(Vec::new()),
            start_time: Instant::now(),
            enabled: AtomicBool::new(true),
        }
    }

    /// Create a reporter that prints nothing (quiet mode, tests)
    pub fn disabled() -> Self {
        let reporter = Self::new();
        reporter.enabled.store(false, Ordering::SeqCst);
        reporter
    }

    /// Check if output is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Start a step
    pub fn begin(&self, title: &str) {
        tracing::info!(step = title, "begin");

        let spinner = if self.is_enabled() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.cyan} {msg}")
                    .expect("Invalid template"),
            );
            spinner.enable_steady_tick(Duration::from_millis(100));
            spinner
        } else {
            ProgressBar::with_draw_target(None, ProgressDrawTarget::hidden())
        };
        spinner.set_message(format!("{}...", title));

        let previous = self.lock_active().replace(ActiveStep {
            title: title.to_string(),
            started: Instant::now(),
            spinner,
        });
        if let Some(step) = previous {
            step.spinner.finish_and_clear();
        }
    }

    /// Print an informational line under the current step
    pub fn note(&self, message: &str) {
        tracing::info!("{}", message);
        if !self.is_enabled() {
            return;
        }
        match self.lock_active().as_ref() {
            Some(step) => step.spinner.println(format!("  {}", style(message).dim())),
            None => println!("  {}", style(message).dim()),
        }
    }

    /// Finish the current step successfully
    pub fn success(&self, detail: &str) {
        let Some(step) = self.lock_active().take() else {
            return;
        };
        step.spinner.finish_and_clear();
        tracing::info!(step = %step.title, detail, "done");

        if self.is_enabled() {
            println!(
                "{} {}: {}",
                style("✓").green().bold(),
                style(&step.title).bold(),
                detail
            );
        }
        self.record(step, detail.to_string(), true);
    }

    /// Finish the current step with a failure
    pub fn failure(&self, reason: &str) {
        let Some(step) = self.lock_active().take() else {
            return;
        };
        step.spinner.abandon();
        tracing::error!(step = %step.title, reason, "failed");

        if self.is_enabled() {
            eprintln!("{} {}", style("✗").red().bold(), style(&step.title).bold());
        }
        self.record(step, reason.to_string(), false);
    }

    /// Finished steps so far
    pub fn steps(&self) -> Vec<StepRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Print the closing summary line
    pub fn print_summary(&self) {
        if !self.is_enabled() {
            return;
        }
        let steps = self.steps();
        let ok = steps.iter().filter(|s| s.ok).count();
        let elapsed = self.elapsed();
        println!();
        println!(
            "{} {}/{} steps in {}",
            style("Provisioned").green().bold(),
            ok,
            steps.len(),
            humantime::format_duration(Duration::new(
                elapsed.as_secs(),
                elapsed.subsec_millis() * 1_000_000
            ))
        );
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveStep>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, step: ActiveStep, detail: String, ok: bool) {
        let record = StepRecord {
            title: step.title,
            detail,
            ok,
            elapsed: step.started.elapsed(),
        };
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}

impl Default for StepReporter {
    fn default() -> Self {
        Self::new()
    }
}
