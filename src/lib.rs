//! luadebug - A Debug Adapter Protocol server for Lua programs
//!
//! The adapter talks DAP to an IDE over stdin/stdout and drives an embedded
//! Lua 5.4 interpreter through its debug hook.

pub mod adapter;
pub mod bridge;
pub mod common;
pub mod dap;

// Re-export commonly used types for tests
pub use adapter::{Session, SessionState};
pub use bridge::{Interpreter, LuaInterpreter};
pub use common::{Error, Result};
