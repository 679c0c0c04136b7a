//! Core domain types
//!
//! These types describe a cluster job from submission to its final result.
//! They are shared between the orchestrator (which persists them), the
//! backends (which execute them) and the CLI (which displays them).

pub mod commands;
pub mod container;
pub mod failure;
pub mod job;
pub mod log;
pub mod result;
pub mod status;
