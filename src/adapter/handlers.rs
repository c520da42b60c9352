//! Request dispatcher and handlers
//!
//! Translates DAP requests into bridge queries and session updates.

use std::io::{BufRead, Write};

use serde_json::Value;

use crate::bridge::{Frames, HookMask, InfoFlags, Interpreter};
use crate::common::{Error, Result};
use crate::dap::types::{
    Capabilities, OutputCategory, Scope, ScopesArguments, ScopesResponseBody, Source, StackFrame,
    StackTraceArguments, StackTraceResponseBody, Thread, ThreadsResponseBody, Variable,
    VariablesArguments, VariablesResponseBody,
};
use crate::dap::{Command, Request};

use super::session::Session;
use super::state::SessionState;
use super::varref::{ScopeKind, VarRef};

/// Id of the single interpreter thread
pub const THREAD_ID: i64 = 1;

/// Name the client shows for that thread
pub const THREAD_NAME: &str = "Lua Thread";

/// Most frames a stackTrace response carries
pub const MAX_STACK_FRAMES: usize = 20;

/// Local slots are queried at indices `1..MAX_VARIABLES`
pub const MAX_VARIABLES: usize = 100;

const UNEXPECTED_STATE: &str = "not initialized or unexpected state";
const NO_FRAME: &str = "Error retrieving stack frame";

/// What the caller of [`dispatch`] has to do next
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    /// Read the next request
    Continue,
    /// Let the paused program run on
    Resume,
    /// Load and run a program; the launch response is still owed
    Launch(LaunchPlan),
    /// End the session
    Disconnect,
}

/// A validated launch request
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchPlan {
    pub request_seq: i64,
    pub program: String,
}

/// Serve one request
///
/// Recoverable errors become error responses here; only fatal errors are
/// returned to the caller.
pub fn dispatch<R: BufRead, W: Write>(
    session: &mut Session<R, W>,
    request: Request,
    frames: Option<&dyn Frames>,
) -> Result<Flow> {
    let seq = request.seq;
    let command = request.command.name().to_string();

    match dispatch_inner(session, request, frames) {
        Ok(flow) => Ok(flow),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            tracing::warn!(seq, command = %command, error = %e, "Request failed");
            session.send_error_response(seq, &command, &e.response_message())?;
            Ok(Flow::Continue)
        }
    }
}

fn dispatch_inner<R: BufRead, W: Write>(
    session: &mut Session<R, W>,
    request: Request,
    frames: Option<&dyn Frames>,
) -> Result<Flow> {
    let seq = request.seq;
    let name = request.command.name().to_string();
    tracing::debug!(seq, command = %name, state = %session.state(), "Dispatching request");

    match &request.command {
        Command::Unknown(command) => {
            return Err(Error::protocol(command, format!("{} not yet implemented", command)));
        }
        Command::Invalid { command, reason } => {
            return Err(Error::protocol(command, reason.clone()));
        }
        Command::Initialize if session.state() != SessionState::Birth => {
            return Err(Error::protocol(&name, "already initialized"));
        }
        command if !session.state().admits(command) => {
            return Err(Error::protocol(&name, UNEXPECTED_STATE));
        }
        _ => {}
    }

    match request.command {
        Command::Initialize => {
            initialize(session, seq)?;
            Ok(Flow::Continue)
        }

        Command::Launch(args) => Ok(Flow::Launch(LaunchPlan {
            request_seq: seq,
            program: args.program,
        })),

        Command::ConfigurationDone | Command::SetExceptionBreakpoints => {
            session.send_response::<Value>(seq, &name, None)?;
            Ok(Flow::Continue)
        }

        Command::Threads => {
            let body = ThreadsResponseBody {
                threads: vec![Thread {
                    id: THREAD_ID,
                    name: THREAD_NAME.to_string(),
                }],
            };
            session.send_response(seq, &name, Some(body))?;
            Ok(Flow::Continue)
        }

        Command::StackTrace(args) => {
            let body = stack_trace(paused(frames)?, &args)?;
            session.send_response(seq, &name, Some(body))?;
            Ok(Flow::Continue)
        }

        Command::Scopes(args) => {
            let body = scopes(paused(frames)?, &args)?;
            session.send_response(seq, &name, Some(body))?;
            Ok(Flow::Continue)
        }

        Command::Variables(args) => {
            let body = variables(paused(frames)?, &args)?;
            session.send_response(seq, &name, Some(body))?;
            Ok(Flow::Continue)
        }

        Command::Step(kind) => {
            tracing::debug!(step = kind.command(), "Resuming to the next line");
            session.last_step = Some(kind);
            session.send_response::<Value>(seq, &name, None)?;
            Ok(Flow::Resume)
        }

        Command::Disconnect => {
            tracing::info!("Client requested disconnect");
            session.send_response::<Value>(seq, &name, None)?;
            Ok(Flow::Disconnect)
        }

        Command::Invalid { .. } | Command::Unknown(_) => {
            Err(Error::Internal(format!("'{}' passed request validation", name)))
        }
    }
}

fn paused(frames: Option<&dyn Frames>) -> Result<&dyn Frames> {
    frames.ok_or_else(|| Error::Internal("stack requested while no program is paused".to_string()))
}

fn initialize<R: BufRead, W: Write>(session: &mut Session<R, W>, seq: i64) -> Result<()> {
    session.transition(SessionState::Initialized)?;
    session.send_event::<Value>("initialized", None)?;
    session.send_response(
        seq,
        "initialize",
        Some(Capabilities {
            supports_configuration_done_request: true,
        }),
    )?;
    session.send_output(OutputCategory::Console, "Debugger initialized")
}

/// Split an interpreter source origin into a DAP source
///
/// File chunks are reported as `@path`; the name is the final path segment.
fn source_from_origin(origin: &str) -> Source {
    let path = origin.strip_prefix('@').unwrap_or(origin);
    let name = path.rsplit('/').next().unwrap_or(path);
    Source {
        name: Some(name.to_string()),
        path: Some(path.to_string()),
    }
}

fn stack_trace(frames: &dyn Frames, args: &StackTraceArguments) -> Result<StackTraceResponseBody> {
    let limit = match args.levels {
        Some(levels) if levels > 0 => (levels as u64).min(MAX_STACK_FRAMES as u64) as usize,
        _ => MAX_STACK_FRAMES,
    };
    let flags = InfoFlags {
        source: true,
        line: true,
        name: true,
        upvalues: false,
    };

    let mut stack_frames = Vec::new();
    for depth in 0..limit {
        let Some(frame) = frames.get_frame(depth) else {
            break;
        };
        let info = frames.frame_info(frame, flags)?;
        stack_frames.push(StackFrame {
            id: depth as i64,
            name: info.name.unwrap_or_else(|| "?".to_string()),
            source: info.source.as_deref().map(source_from_origin),
            line: info.line.unwrap_or(0),
            column: 0,
        });
    }

    Ok(StackTraceResponseBody {
        total_frames: stack_frames.len() as i64,
        stack_frames,
    })
}

fn scope(kind: ScopeKind, depth: usize) -> Result<Scope> {
    let variables_reference = VarRef::new(kind, depth)
        .encode()
        .ok_or_else(|| Error::protocol("scopes", format!("frame {} is too deep", depth)))?;
    Ok(Scope {
        name: kind.label().to_string(),
        variables_reference,
        expensive: kind.expensive(),
    })
}

fn scopes(frames: &dyn Frames, args: &ScopesArguments) -> Result<ScopesResponseBody> {
    let frame = usize::try_from(args.frame_id)
        .ok()
        .and_then(|depth| frames.get_frame(depth))
        .ok_or_else(|| Error::protocol("scopes", NO_FRAME))?;
    let info = frames.frame_info(
        frame,
        InfoFlags {
            upvalues: true,
            ..Default::default()
        },
    )?;

    let mut scopes = vec![scope(ScopeKind::Locals, frame.depth)?];
    if info.upvalues > 0 {
        scopes.push(scope(ScopeKind::Upvalues, frame.depth)?);
    }
    scopes.push(scope(ScopeKind::Globals, frame.depth)?);

    Ok(ScopesResponseBody { scopes })
}

fn variables(frames: &dyn Frames, args: &VariablesArguments) -> Result<VariablesResponseBody> {
    let VarRef { kind, depth } = VarRef::decode(args.variables_reference)?;
    let frame = frames
        .get_frame(depth)
        .ok_or_else(|| Error::protocol("variables", NO_FRAME))?;

    let variables = match kind {
        ScopeKind::Locals => (1..MAX_VARIABLES)
            .map_while(|index| frames.local_name(frame, index))
            .map(|name| Variable {
                name,
                value: String::new(),
                type_name: None,
                variables_reference: 0,
            })
            .collect(),
        ScopeKind::Upvalues | ScopeKind::Globals => Vec::new(),
    };

    Ok(VariablesResponseBody { variables })
}

/// Run a launch request to completion
///
/// The session is handed to the interpreter as its hook for the duration of
/// the run and taken back afterwards.
pub fn launch<I, R, W>(
    interp: &mut I,
    mut session: Session<R, W>,
    plan: LaunchPlan,
) -> Result<(Session<R, W>, Flow)>
where
    I: Interpreter,
    R: BufRead + 'static,
    W: Write + 'static,
{
    let LaunchPlan {
        request_seq,
        program,
    } = plan;
    tracing::info!(program = %program, "Launching program");

    if let Err(e) = interp.load_program(&program) {
        tracing::warn!(program = %program, error = %e, "Launch failed");
        session.send_output(
            OutputCategory::Console,
            &format!("Failed to launch {} due to error: {}", program, e),
        )?;
        session.send_error_response(request_seq, "launch", "Launch failed")?;
        return Ok((session, Flow::Continue));
    }

    session.transition(SessionState::ProgramLaunched)?;
    session.send_response::<Value>(request_seq, "launch", None)?;
    session.transition(SessionState::ProgramRunning)?;

    interp.install_hook(session, HookMask::ALL);
    let outcome = interp.run_loaded();
    let mut session = interp
        .remove_hook::<Session<R, W>>()
        .ok_or_else(|| Error::Internal("debug session lost while the program ran".to_string()))?;

    if let Some(reason) = session.take_abort() {
        if reason.is_clean_exit() {
            tracing::info!(reason = %reason, "Program abandoned");
            return Ok((session, Flow::Disconnect));
        }
        return Err(reason);
    }

    match outcome {
        Ok(()) => tracing::info!(program = %program, "Program finished"),
        Err(e) => {
            tracing::warn!(program = %program, error = %e, "Program terminated with error");
            session.send_output(OutputCategory::Console, "Program terminated with error")?;
            session.send_output(OutputCategory::Console, &e.to_string())?;
        }
    }
    session.send_event::<Value>("terminated", None)?;
    session.transition(SessionState::ProgramTerminated)?;

    Ok((session, Flow::Continue))
}
