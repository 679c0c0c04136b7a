//! Herd Core
//!
//! Core types and abstractions for the Herd cluster-job engine.
//!
//! This crate contains:
//! - Domain types: job specs, persisted logs and results
//! - Backend port: the interface every execution backend implements
//! - DTOs: request/response bodies shared by the HTTP API and the CLI

pub mod backend;
pub mod domain;
pub mod dto;
