//! Data Transfer Objects
//!
//! Request and response bodies exchanged between the orchestrator's HTTP
//! API and its clients (the CLI and the notification calls made by
//! generated batch scripts).

pub mod health;
pub mod job;
pub mod owner;
