//! Operator-facing progress output
//!
//! Each provisioning step is announced, and confirmed or failed, through
//! [`StepReporter`].

mod reporter;

pub use reporter::{StepRecord, StepReporter};
