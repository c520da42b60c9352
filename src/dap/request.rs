//! Typed DAP requests
//!
//! Incoming request messages are lifted into [`Command`] variants so the
//! dispatcher can match on the command instead of comparing strings.

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::types::{
    LaunchArguments, RequestMessage, ScopesArguments, StackTraceArguments, VariablesArguments,
};

/// The kind of step the client asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    In,
    Out,
    Over,
}

impl StepKind {
    /// Wire name of the request that asks for this step
    pub fn command(self) -> &'static str {
        match self {
            StepKind::In => "stepIn",
            StepKind::Out => "stepOut",
            StepKind::Over => "next",
        }
    }
}

/// A request command together with its parsed arguments
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Initialize,
    Launch(LaunchArguments),
    ConfigurationDone,
    Threads,
    StackTrace(StackTraceArguments),
    Scopes(ScopesArguments),
    Variables(VariablesArguments),
    SetExceptionBreakpoints,
    Step(StepKind),
    Disconnect,
    /// A recognised command whose arguments could not be parsed
    Invalid { command: String, reason: String },
    /// A command the adapter does not implement
    Unknown(String),
}

impl Command {
    /// Wire name of the command, echoed in the response
    pub fn name(&self) -> &str {
        match self {
            Command::Initialize => "initialize",
            Command::Launch(_) => "launch",
            Command::ConfigurationDone => "configurationDone",
            Command::Threads => "threads",
            Command::StackTrace(_) => "stackTrace",
            Command::Scopes(_) => "scopes",
            Command::Variables(_) => "variables",
            Command::SetExceptionBreakpoints => "setExceptionBreakpoints",
            Command::Step(kind) => kind.command(),
            Command::Disconnect => "disconnect",
            Command::Invalid { command, .. } => command,
            Command::Unknown(command) => command,
        }
    }

    /// Parse a command name and its raw arguments
    pub fn parse(command: &str, arguments: Option<Value>) -> Self {
        match command {
            "initialize" => Command::Initialize,
            "launch" => parse_args(command, arguments, Command::Launch),
            "configurationDone" => Command::ConfigurationDone,
            "threads" => Command::Threads,
            "stackTrace" => parse_args(command, arguments, Command::StackTrace),
            "scopes" => parse_args(command, arguments, Command::Scopes),
            "variables" => parse_args(command, arguments, Command::Variables),
            "setExceptionBreakpoints" => Command::SetExceptionBreakpoints,
            "stepIn" => Command::Step(StepKind::In),
            "stepOut" => Command::Step(StepKind::Out),
            "next" => Command::Step(StepKind::Over),
            "disconnect" => Command::Disconnect,
            other => Command::Unknown(other.to_string()),
        }
    }
}

fn parse_args<T: DeserializeOwned>(
    command: &str,
    arguments: Option<Value>,
    wrap: fn(T) -> Command,
) -> Command {
    let arguments = arguments.unwrap_or_else(|| Value::Object(Default::default()));
    match serde_json::from_value(arguments) {
        Ok(args) => wrap(args),
        Err(e) => Command::Invalid {
            command: command.to_string(),
            reason: format!("invalid arguments: {}", e),
        },
    }
}

/// A request read from the client
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub seq: i64,
    pub command: Command,
}

impl From<RequestMessage> for Request {
    fn from(message: RequestMessage) -> Self {
        Self {
            seq: message.seq,
            command: Command::parse(&message.command, message.arguments),
        }
    }
}
