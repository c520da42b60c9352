//! Variable references
//!
//! A `variablesReference` encodes the scope kind and frame depth directly,
//! so decoding needs no table and nothing has to be invalidated on resume.

use crate::common::{Error, Result};

/// Frames at or beyond this depth cannot be encoded
pub const MAX_ENCODED_DEPTH: usize = 1_000_000;

/// The kinds of scope a frame exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Locals,
    Upvalues,
    Globals,
}

impl ScopeKind {
    const ALL: [ScopeKind; 3] = [ScopeKind::Locals, ScopeKind::Upvalues, ScopeKind::Globals];

    fn base(self) -> i64 {
        match self {
            ScopeKind::Locals => 1_000_000,
            ScopeKind::Upvalues => 2_000_000,
            ScopeKind::Globals => 3_000_000,
        }
    }

    /// Scope name shown by the client
    pub fn label(self) -> &'static str {
        match self {
            ScopeKind::Locals => "Locals",
            ScopeKind::Upvalues => "Upvalues",
            ScopeKind::Globals => "Globals",
        }
    }

    pub fn expensive(self) -> bool {
        matches!(self, ScopeKind::Globals)
    }
}

/// A decoded variables reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarRef {
    pub kind: ScopeKind,
    pub depth: usize,
}

impl VarRef {
    pub fn new(kind: ScopeKind, depth: usize) -> Self {
        Self { kind, depth }
    }

    /// `None` when the depth is too large to encode
    pub fn encode(self) -> Option<i64> {
        (self.depth < MAX_ENCODED_DEPTH).then(|| self.kind.base() + self.depth as i64)
    }

    pub fn decode(handle: i64) -> Result<Self> {
        ScopeKind::ALL
            .into_iter()
            .find_map(|kind| {
                let offset = handle.checked_sub(kind.base())?;
                (0..MAX_ENCODED_DEPTH as i64)
                    .contains(&offset)
                    .then(|| VarRef::new(kind, offset as usize))
            })
            .ok_or(Error::UnknownVariablesReference(handle))
    }
}
