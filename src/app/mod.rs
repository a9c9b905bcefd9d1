//! Binary-side orchestration: tracing setup, run wiring, summary, exit codes.

pub(crate) mod exit_handler;
pub(crate) mod runtime;
pub(crate) mod summary;
pub(crate) mod terminal;
