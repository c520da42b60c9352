//! Debug Adapter Protocol (DAP) implementation
//!
//! This module implements the adapter side of DAP: framing, message types
//! and typed requests.

pub mod codec;
pub mod request;
pub mod types;

pub use request::{Command, Request, StepKind};
pub use types::*;
