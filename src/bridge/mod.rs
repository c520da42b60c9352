//! Interpreter bridge
//!
//! The narrow surface the adapter needs from an embedded interpreter:
//! load and run a program, install a hook, and introspect a paused stack.
//! Nothing interpreter-specific crosses this boundary; the adapter only
//! sees the descriptor types below.

pub mod lua;
#[cfg(test)]
pub mod scripted;

use std::ops::ControlFlow;
use thiserror::Error;

pub use lua::LuaInterpreter;

/// Errors reported by the interpreter
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("{0}")]
    Load(String),

    #[error("{0}")]
    Run(String),

    #[error("No program loaded")]
    NoProgram,

    #[error("Stack introspection failed: {0}")]
    Introspection(String),

    #[error("Interpreter start-up failed: {0}")]
    Startup(String),
}

/// A live activation record, addressed by depth (0 = innermost)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRef {
    pub depth: usize,
}

/// Which fields of a [`FrameInfo`] to populate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InfoFlags {
    pub source: bool,
    pub line: bool,
    pub name: bool,
    pub upvalues: bool,
}

impl InfoFlags {
    pub const ALL: InfoFlags = InfoFlags {
        source: true,
        line: true,
        name: true,
        upvalues: true,
    };
}

/// Frame descriptor; fields not requested stay at their defaults
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameInfo {
    /// Source origin as the interpreter reports it (`@path` for files)
    pub source: Option<String>,
    pub line: Option<i64>,
    pub name: Option<String>,
    pub upvalues: usize,
}

/// Stack introspection on a paused interpreter
pub trait Frames {
    /// `None` when the stack is shallower than `depth`
    fn get_frame(&self, depth: usize) -> Option<FrameRef>;

    fn frame_info(&self, frame: FrameRef, flags: InfoFlags) -> Result<FrameInfo, BridgeError>;

    /// Name of the local at a 1-based index, `None` past the last one
    fn local_name(&self, frame: FrameRef, index: usize) -> Option<String>;
}

/// Interpreter events delivered to a hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    Call,
    Return,
    Line,
}

/// Which events a hook receives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookMask {
    pub call: bool,
    pub ret: bool,
    pub line: bool,
}

impl HookMask {
    pub const ALL: HookMask = HookMask {
        call: true,
        ret: true,
        line: true,
    };

    pub fn admits(self, event: HookEvent) -> bool {
        match event {
            HookEvent::Call => self.call,
            HookEvent::Return => self.ret,
            HookEvent::Line => self.line,
        }
    }
}

/// Receiver of interpreter call-backs while a program runs
///
/// Returning `ControlFlow::Break` aborts the running program.
pub trait DebugHook: 'static {
    fn on_event(&mut self, event: HookEvent, frames: &dyn Frames) -> ControlFlow<()>;

    /// Text the program printed, already newline-terminated
    fn on_output(&mut self, text: &str) -> ControlFlow<()>;
}

/// An embedded interpreter that can be debugged
pub trait Interpreter {
    /// Parse and prepare a program without executing it
    fn load_program(&mut self, path: &str) -> Result<(), BridgeError>;

    /// Hand ownership of the hook to the interpreter
    fn install_hook<H: DebugHook>(&mut self, hook: H, mask: HookMask);

    /// Execute the previously loaded program
    fn run_loaded(&mut self) -> Result<(), BridgeError>;

    /// Take the hook back, `None` if no hook of that type is installed
    fn remove_hook<H: DebugHook>(&mut self) -> Option<H>;
}
