//! Worker-side queue consumer.
//!
//! [`JobRunner`] claims jobs from the [`JobQueue`](codearena_queue::JobQueue),
//! hands them to an opaque [`Executor`], and turns the result into store
//! updates and status events. Execution itself (sandboxing, compilation,
//! resource limits) lives behind the [`Executor`] trait.

pub mod executor;
pub mod runner;

pub use executor::{ExecutionError, ExecutionOutcome, Executor};
pub use runner::{next_idle_delay, JobRunner, RunOutcome, RunReport, RunnerConfig, RunnerError};
