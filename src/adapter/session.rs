//! The debug session
//!
//! One owned value carries everything the adapter needs across requests and
//! hook call-backs: the request source, the message sink, the outgoing
//! sequence counter, the lifecycle state and the first-stop flag. While the
//! program runs the session lives inside the interpreter and comes back out
//! when the run ends.

use std::io::{BufRead, Write};

use serde::Serialize;
use serde_json::Value;

use crate::common::{Error, Result};
use crate::dap::codec;
use crate::dap::types::{
    EventMessage, OutputCategory, OutputEventBody, ProtocolMessage, ResponseMessage,
};
use crate::dap::{Request, StepKind};

use super::state::SessionState;

/// Debug session over a request source `R` and a message sink `W`
pub struct Session<R, W> {
    reader: R,
    writer: W,
    /// Sequence number of the next message the adapter sends
    next_seq: i64,
    state: SessionState,
    max_message_size: usize,
    /// Set once the first stop has announced the thread
    pub(crate) thread_started: bool,
    /// The step kind of the most recent resume
    pub(crate) last_step: Option<StepKind>,
    /// Why the running program must be abandoned, recorded by the hook
    pub(crate) abort: Option<Error>,
}

impl<R: BufRead, W: Write> Session<R, W> {
    pub fn new(reader: R, writer: W, max_message_size: usize) -> Self {
        Self {
            reader,
            writer,
            next_seq: 1,
            state: SessionState::Birth,
            max_message_size,
            thread_started: false,
            last_step: None,
            abort: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_step(&self) -> Option<StepKind> {
        self.last_step
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow
    pub fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(from = %self.state, to = %next, "Session state change");
        self.state = next;
        Ok(())
    }

    /// Read the next request, `None` once the client closes the stream
    ///
    /// Responses and events sent by the client are logged and skipped.
    pub fn read_request(&mut self) -> Result<Option<Request>> {
        loop {
            match codec::read_message(&mut self.reader, self.max_message_size)? {
                None => return Ok(None),
                Some(ProtocolMessage::Request(message)) => {
                    tracing::trace!(seq = message.seq, command = %message.command, "<- request");
                    return Ok(Some(Request::from(message)));
                }
                Some(other) => {
                    tracing::warn!(message = ?other, "Ignoring non-request message from client");
                }
            }
        }
    }

    fn take_seq(&mut self) -> i64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn send(&mut self, message: ProtocolMessage) -> Result<()> {
        codec::write_message(&mut self.writer, &message)
    }

    pub fn send_response<B: Serialize>(
        &mut self,
        request_seq: i64,
        command: &str,
        body: Option<B>,
    ) -> Result<()> {
        let body = body.map(serde_json::to_value).transpose()?;
        let seq = self.take_seq();
        tracing::trace!(seq, request_seq, command, "-> response");
        self.send(ProtocolMessage::Response(ResponseMessage {
            seq,
            request_seq,
            success: true,
            command: command.to_string(),
            message: None,
            body,
        }))
    }

    pub fn send_error_response(
        &mut self,
        request_seq: i64,
        command: &str,
        message: &str,
    ) -> Result<()> {
        let seq = self.take_seq();
        tracing::warn!(seq, request_seq, command, message, "-> error response");
        self.send(ProtocolMessage::Response(ResponseMessage {
            seq,
            request_seq,
            success: false,
            command: command.to_string(),
            message: Some(message.to_string()),
            body: None,
        }))
    }

    pub fn send_event<B: Serialize>(&mut self, event: &str, body: Option<B>) -> Result<()> {
        let body: Option<Value> = body.map(serde_json::to_value).transpose()?;
        let seq = self.take_seq();
        tracing::trace!(seq, event, "-> event");
        self.send(ProtocolMessage::Event(EventMessage {
            seq,
            event: event.to_string(),
            body,
        }))
    }

    pub fn send_output(&mut self, category: OutputCategory, output: &str) -> Result<()> {
        self.send_event(
            "output",
            Some(OutputEventBody {
                category: category.as_str().to_string(),
                output: output.to_string(),
            }),
        )
    }

    /// Record why the running program has to stop; the first reason wins
    pub(crate) fn set_abort(&mut self, reason: Error) {
        if self.abort.is_none() {
            self.abort = Some(reason);
        }
    }

    pub(crate) fn take_abort(&mut self) -> Option<Error> {
        self.abort.take()
    }

    /// Give back the request source and message sink
    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }
}
