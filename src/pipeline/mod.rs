//! Run lifecycle: filtering, the per-URL state machine and the scheduler.
//!
//! - `Orchestrator::run`: one pass over every configured search URL
//! - `run_forever`: repeat passes until cancelled

pub mod control;
pub mod filter;
pub mod orchestrator;
pub mod schedule;
#[cfg(test)]
mod testkit;

pub use control::{RunControl, RunState};
pub use filter::{AdFilterPipeline, DedupCheck, Stage};
pub use orchestrator::{COMPLETION_MESSAGE, Orchestrator, RunError, RunReport};
pub use schedule::run_forever;
