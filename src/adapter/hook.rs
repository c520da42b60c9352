//! The session as interpreter hook
//!
//! A line event pauses the program: the hook announces the stop and then
//! serves requests itself until the client asks for a step.

use std::io::{BufRead, Write};
use std::ops::ControlFlow;

use crate::bridge::{DebugHook, Frames, HookEvent};
use crate::common::{Error, Result};
use crate::dap::types::{OutputCategory, StoppedEventBody, ThreadEventBody};

use super::handlers::{self, Flow, THREAD_ID};
use super::session::Session;
use super::state::SessionState;

impl<R: BufRead, W: Write> Session<R, W> {
    /// Announce the stop, then serve requests until the client resumes
    fn pause(&mut self, frames: &dyn Frames) -> Result<()> {
        let reason = if self.thread_started {
            "step"
        } else {
            self.thread_started = true;
            self.send_event(
                "thread",
                Some(ThreadEventBody {
                    reason: "started".to_string(),
                    thread_id: THREAD_ID,
                }),
            )?;
            "entry"
        };
        self.send_event(
            "stopped",
            Some(StoppedEventBody {
                reason: reason.to_string(),
                thread_id: THREAD_ID,
            }),
        )?;
        self.transition(SessionState::ProgramStopped)?;

        loop {
            let Some(request) = self.read_request()? else {
                return Err(Error::EndOfStream);
            };
            match handlers::dispatch(self, request, Some(frames))? {
                Flow::Continue => {}
                Flow::Resume => break,
                Flow::Disconnect => return Err(Error::Disconnected),
                Flow::Launch(plan) => {
                    return Err(Error::Internal(format!(
                        "launch of {} requested while stopped",
                        plan.program
                    )));
                }
            }
        }

        self.transition(SessionState::ProgramRunning)
    }

    fn abandon(&mut self, reason: Error) -> ControlFlow<()> {
        if reason.is_clean_exit() {
            tracing::info!(reason = %reason, "Abandoning the running program");
        } else {
            tracing::error!(error = %reason, "Session failed while the program ran");
        }
        self.set_abort(reason);
        ControlFlow::Break(())
    }
}

impl<R: BufRead + 'static, W: Write + 'static> DebugHook for Session<R, W> {
    fn on_event(&mut self, event: HookEvent, frames: &dyn Frames) -> ControlFlow<()> {
        if self.abort.is_some() {
            return ControlFlow::Break(());
        }
        if event != HookEvent::Line || self.state() != SessionState::ProgramRunning {
            return ControlFlow::Continue(());
        }

        match self.pause(frames) {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => self.abandon(e),
        }
    }

    fn on_output(&mut self, text: &str) -> ControlFlow<()> {
        if self.abort.is_some() {
            return ControlFlow::Break(());
        }
        match self.send_output(OutputCategory::Stdout, text) {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => self.abandon(e),
        }
    }
}
