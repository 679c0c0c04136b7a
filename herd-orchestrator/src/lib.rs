//! Herd Orchestrator
//!
//! Submits jobs to an execution backend, tracks each one through its
//! persisted lifecycle, and tells owners when all of their jobs are done.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod listener;
pub mod render;
pub mod repository;
pub mod service;
