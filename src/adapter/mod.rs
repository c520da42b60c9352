//! The debug adapter core
//!
//! [`run`] serves requests until the client disconnects or closes the
//! stream. A launch request hands control to the interpreter; from then on
//! requests are served from inside the hook while the program is paused.

pub mod handlers;
mod hook;
pub mod session;
pub mod state;
pub mod varref;

use std::io::{BufRead, Write};

use crate::bridge::Interpreter;
use crate::common::Result;

pub use handlers::{Flow, LaunchPlan};
pub use session::Session;
pub use state::SessionState;
pub use varref::{ScopeKind, VarRef};

/// Drive a debug session to completion
///
/// Returns the session once the client disconnects or closes the request
/// stream. Framing and transport failures are returned as errors.
pub fn run<I, R, W>(interp: &mut I, mut session: Session<R, W>) -> Result<Session<R, W>>
where
    I: Interpreter,
    R: BufRead + 'static,
    W: Write + 'static,
{
    tracing::info!("Debug session started");

    loop {
        let Some(request) = session.read_request()? else {
            tracing::info!("Client closed the request stream");
            break;
        };

        match handlers::dispatch(&mut session, request, None)? {
            Flow::Continue => {}
            Flow::Launch(plan) => {
                let (returned, flow) = handlers::launch(interp, session, plan)?;
                session = returned;
                if flow == Flow::Disconnect {
                    break;
                }
            }
            Flow::Disconnect => break,
            Flow::Resume => tracing::warn!("Resume requested with no program paused"),
        }
    }

    tracing::info!(state = %session.state(), "Debug session ended");
    Ok(session)
}
