//! Service Module
//!
//! The orchestrator state machine. Operations are split by concern:
//! - `submit`: validation, persistence, dependency resolution and launch
//! - `lifecycle`: started/ended callbacks and owner aggregation
//! - `cancel`: owner-wide cancellation and deletion

mod cancel;
mod lifecycle;
pub mod log_stream;
mod orchestrator;
mod submit;


pub use log_stream::{LogStream, TracingLogStream};
pub use orchestrator::Orchestrator;
