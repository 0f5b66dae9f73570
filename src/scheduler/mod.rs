//! Per-task timers and the check cycle they drive
mod cycle;
mod detector;
mod engine;

pub use cycle::{CycleOutcome, CycleRunner};
pub use detector::{content_hash, detect, Detection};
pub use engine::{FireResult, SchedulerEngine, TaskState};

#[cfg(test)]
pub(crate) use cycle::testing as cycle_testing;
