//! End-to-end integration tests for the Lua debug adapter
//!
//! These tests verify the complete debugging workflow by:
//! 1. Scripting the DAP requests an IDE would send
//! 2. Running the adapter against Lua fixtures in a real interpreter
//! 3. Checking the responses and events that come back, in order

use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use serde_json::{json, Value};

use luadebug::dap::codec;
use luadebug::dap::types::{EventMessage, ProtocolMessage, ResponseMessage};
use luadebug::{adapter, LuaInterpreter, Session, SessionState};

const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Test context with fixture paths and the scripted requests
struct TestContext {
    /// Path to fixtures directory
    fixtures_dir: PathBuf,
    /// Requests to send, already framed
    input: Vec<u8>,
    /// Next request sequence number
    next_seq: i64,
}

/// What the adapter sent back
struct Transcript {
    messages: Vec<ProtocolMessage>,
    final_state: SessionState,
}

impl TestContext {
    fn new() -> Self {
        let manifest_dir = env!("CARGO_MANIFEST_DIR");
        Self {
            fixtures_dir: PathBuf::from(manifest_dir).join("tests").join("fixtures"),
            input: Vec::new(),
            next_seq: 1,
        }
    }

    fn fixture(&self, name: &str) -> String {
        self.fixtures_dir.join(name).to_str().unwrap().to_string()
    }

    /// Queue a request and return its sequence number
    fn request(&mut self, command: &str, arguments: Option<Value>) -> i64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let mut message = json!({ "seq": seq, "type": "request", "command": command });
        if let Some(arguments) = arguments {
            message["arguments"] = arguments;
        }
        codec::write_frame(&mut self.input, message.to_string().as_bytes()).unwrap();
        seq
    }

    fn launch(&mut self, fixture: &str) -> i64 {
        let program = self.fixture(fixture);
        self.request("launch", Some(json!({ "program": program })))
    }

    /// Run the adapter in-process against a real Lua interpreter
    fn run(self) -> Transcript {
        let mut interp = LuaInterpreter::new().expect("Failed to start Lua");
        let session = Session::new(Cursor::new(self.input), Vec::new(), MAX_MESSAGE_SIZE);
        let session = adapter::run(&mut interp, session).expect("Adapter failed");
        let final_state = session.state();
        let (_, written) = session.into_parts();
        Transcript {
            messages: parse_messages(written),
            final_state,
        }
    }
}

fn parse_messages(bytes: Vec<u8>) -> Vec<ProtocolMessage> {
    let mut reader = Cursor::new(bytes);
    let mut messages = Vec::new();
    while let Some(message) = codec::read_message(&mut reader, usize::MAX).unwrap() {
        messages.push(message);
    }
    messages
}

impl Transcript {
    /// Compact `event:<name>` / `<command>:ok|err` view of the transcript
    fn summary(&self) -> Vec<String> {
        self.messages
            .iter()
            .map(|m| match m {
                ProtocolMessage::Event(e) => format!("event:{}", e.event),
                ProtocolMessage::Response(r) => {
                    format!("{}:{}", r.command, if r.success { "ok" } else { "err" })
                }
                ProtocolMessage::Request(r) => format!("request:{}", r.command),
            })
            .collect()
    }

    fn response(&self, request_seq: i64) -> &ResponseMessage {
        let mut matching = self.messages.iter().filter_map(|m| match m {
            ProtocolMessage::Response(r) if r.request_seq == request_seq => Some(r),
            _ => None,
        });
        let response = matching
            .next()
            .unwrap_or_else(|| panic!("No response to request {}", request_seq));
        assert!(
            matching.next().is_none(),
            "More than one response to request {}",
            request_seq
        );
        response
    }

    fn events(&self, name: &str) -> Vec<&EventMessage> {
        self.messages
            .iter()
            .filter_map(|m| match m {
                ProtocolMessage::Event(e) if e.event == name => Some(e),
                _ => None,
            })
            .collect()
    }

    fn outputs(&self, category: &str) -> Vec<String> {
        self.events("output")
            .into_iter()
            .filter_map(|e| e.body.as_ref())
            .filter(|body| body["category"] == category)
            .filter_map(|body| body["output"].as_str().map(str::to_string))
            .collect()
    }
}

// ============== Tests ==============

#[test]
fn test_initialize_handshake() {
    let mut ctx = TestContext::new();
    let init = ctx.request("initialize", Some(json!({ "adapterID": "lua" })));
    let transcript = ctx.run();

    assert_eq!(
        transcript.summary(),
        vec!["event:initialized", "initialize:ok", "event:output"]
    );
    let response = transcript.response(init);
    assert_eq!(
        response.body,
        Some(json!({ "supportsConfigurationDoneRequest": true }))
    );
    assert_eq!(transcript.outputs("console"), vec!["Debugger initialized"]);
    assert_eq!(transcript.final_state, SessionState::Initialized);
}

#[test]
fn test_request_before_initialize_rejected() {
    let mut ctx = TestContext::new();
    let threads = ctx.request("threads", None);
    let init = ctx.request("initialize", None);
    let transcript = ctx.run();

    let response = transcript.response(threads);
    assert!(!response.success);
    assert_eq!(
        response.message.as_deref(),
        Some("not initialized or unexpected state")
    );
    assert!(transcript.response(init).success);
}

#[test]
fn test_launch_nonexistent_file() {
    let mut ctx = TestContext::new();
    ctx.request("initialize", None);
    let launch = ctx.request("launch", Some(json!({ "program": "nope.lua" })));
    let transcript = ctx.run();

    let response = transcript.response(launch);
    assert!(!response.success);
    assert_eq!(response.message.as_deref(), Some("Launch failed"));

    let console = transcript.outputs("console");
    assert!(
        console[1].starts_with("Failed to launch nope.lua due to error: "),
        "diagnostic: {}",
        console[1]
    );
    assert_eq!(transcript.final_state, SessionState::Initialized);
}

#[test]
fn test_launch_syntax_error() {
    let mut ctx = TestContext::new();
    ctx.request("initialize", None);
    let launch = ctx.launch("syntax_error.lua");
    let transcript = ctx.run();

    assert!(!transcript.response(launch).success);
    assert!(transcript.events("thread").is_empty());
    assert_eq!(transcript.final_state, SessionState::Initialized);
}

#[test]
fn test_first_stop_after_launch() {
    let mut ctx = TestContext::new();
    ctx.request("initialize", None);
    ctx.launch("assign.lua");
    let transcript = ctx.run();

    // The client closed the stream while the program was paused at entry
    assert_eq!(
        transcript.summary(),
        vec![
            "event:initialized",
            "initialize:ok",
            "event:output",
            "launch:ok",
            "event:thread",
            "event:stopped",
        ]
    );
    assert_eq!(
        transcript.events("thread")[0].body,
        Some(json!({ "reason": "started", "threadId": 1 }))
    );
    assert_eq!(
        transcript.events("stopped")[0].body,
        Some(json!({ "reason": "entry", "threadId": 1 }))
    );
    assert_eq!(transcript.final_state, SessionState::ProgramStopped);
}

#[test]
fn test_inspect_entry_then_step_to_termination() {
    let mut ctx = TestContext::new();
    let program = ctx.fixture("assign.lua");
    ctx.request("initialize", None);
    ctx.launch("assign.lua");
    let threads = ctx.request("threads", None);
    let stack = ctx.request("stackTrace", Some(json!({ "threadId": 1, "levels": 20 })));
    let scopes = ctx.request("scopes", Some(json!({ "frameId": 0 })));
    let next = ctx.request("next", None);
    let late_stack = ctx.request("stackTrace", Some(json!({ "threadId": 1 })));
    let disconnect = ctx.request("disconnect", None);
    let transcript = ctx.run();

    assert_eq!(
        transcript.response(threads).body,
        Some(json!({ "threads": [{ "id": 1, "name": "Lua Thread" }] }))
    );

    assert_eq!(
        transcript.response(stack).body,
        Some(json!({
            "stackFrames": [{
                "id": 0,
                "name": "?",
                "source": { "name": "assign.lua", "path": program },
                "line": 1,
                "column": 0
            }],
            "totalFrames": 1
        }))
    );

    // The main chunk always carries `_ENV` as an upvalue
    assert_eq!(
        transcript.response(scopes).body,
        Some(json!({
            "scopes": [
                { "name": "Locals", "variablesReference": 1000000, "expensive": false },
                { "name": "Upvalues", "variablesReference": 2000000, "expensive": false },
                { "name": "Globals", "variablesReference": 3000000, "expensive": true }
            ]
        }))
    );

    assert!(transcript.response(next).success);
    assert_eq!(transcript.events("terminated").len(), 1);

    let late = transcript.response(late_stack);
    assert!(!late.success);
    assert!(transcript.response(disconnect).success);
    assert_eq!(transcript.final_state, SessionState::ProgramTerminated);

    // terminated comes after the step response and before the late request's answer
    let summary = transcript.summary();
    let terminated_at = summary.iter().position(|s| s == "event:terminated").unwrap();
    let next_at = summary.iter().position(|s| s == "next:ok").unwrap();
    assert!(next_at < terminated_at);
    assert_eq!(summary[terminated_at + 1], "stackTrace:err");
}

#[test]
fn test_step_into_function() {
    let mut ctx = TestContext::new();
    ctx.request("initialize", None);
    ctx.launch("stepping.lua");

    // More rounds than the program has lines; requests past the end are rejected
    let mut rounds = Vec::new();
    for _ in 0..12 {
        let stack = ctx.request("stackTrace", Some(json!({ "levels": 20 })));
        let locals = ctx.request("variables", Some(json!({ "variablesReference": 1000000 })));
        ctx.request("stepIn", None);
        rounds.push((stack, locals));
    }
    ctx.request("disconnect", None);
    let transcript = ctx.run();

    let inside_add = rounds
        .iter()
        .find(|(stack, _)| {
            let body = transcript.response(*stack).body.as_ref();
            body.map(|b| b["stackFrames"][0]["name"] == "add" && b["stackFrames"][0]["line"] == 4)
                .unwrap_or(false)
        })
        .expect("never stopped inside add");

    let stack = transcript.response(inside_add.0).body.clone().unwrap();
    assert_eq!(stack["totalFrames"], 2);
    assert_eq!(stack["stackFrames"][1]["name"], "?");
    assert_eq!(stack["stackFrames"][1]["line"], 7);
    assert_eq!(stack["stackFrames"][0]["source"]["name"], "stepping.lua");

    let locals = transcript.response(inside_add.1).body.clone().unwrap();
    let names: Vec<&str> = locals["variables"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v["name"].as_str())
        .collect();
    assert!(names.contains(&"a"), "locals: {:?}", names);
    assert!(names.contains(&"b"), "locals: {:?}", names);
    assert!(!names.contains(&"sum"), "locals: {:?}", names);

    let stops = transcript.events("stopped");
    assert_eq!(stops[0].body.as_ref().unwrap()["reason"], "entry");
    assert!(stops[1..]
        .iter()
        .all(|e| e.body.as_ref().unwrap()["reason"] == "step"));
    assert_eq!(transcript.events("thread").len(), 1);

    assert_eq!(transcript.outputs("stdout"), vec!["3\n"]);
    assert_eq!(transcript.events("terminated").len(), 1);
    assert_eq!(transcript.final_state, SessionState::ProgramTerminated);
}

#[test]
fn test_program_output_is_an_event() {
    let mut ctx = TestContext::new();
    ctx.request("initialize", None);
    ctx.launch("output.lua");
    ctx.request("next", None);
    ctx.request("disconnect", None);
    let transcript = ctx.run();

    assert_eq!(transcript.outputs("stdout"), vec!["hello\t2\n"]);
    let summary = transcript.summary();
    let output_at = summary
        .iter()
        .rposition(|s| s == "event:output")
        .unwrap();
    let terminated_at = summary.iter().position(|s| s == "event:terminated").unwrap();
    assert!(output_at < terminated_at);
}

#[test]
fn test_runtime_error_terminates() {
    let mut ctx = TestContext::new();
    ctx.request("initialize", None);
    ctx.launch("error.lua");
    for _ in 0..4 {
        ctx.request("next", None);
    }
    let transcript = ctx.run();

    let console = transcript.outputs("console");
    let at = console
        .iter()
        .position(|line| line == "Program terminated with error")
        .expect("no termination notice");
    assert!(
        console[at + 1].contains("attempt to index a nil value"),
        "error text: {}",
        console[at + 1]
    );
    assert_eq!(transcript.events("terminated").len(), 1);
    assert_eq!(transcript.final_state, SessionState::ProgramTerminated);
}

#[test]
fn test_disconnect_while_stopped() {
    let mut ctx = TestContext::new();
    ctx.request("initialize", None);
    ctx.launch("stepping.lua");
    let disconnect = ctx.request("disconnect", None);
    let threads = ctx.request("threads", None);
    let transcript = ctx.run();

    assert!(transcript.response(disconnect).success);
    assert!(transcript
        .messages
        .iter()
        .all(|m| !matches!(m, ProtocolMessage::Response(r) if r.request_seq == threads)));
    assert!(transcript.events("terminated").is_empty());
}

#[test]
fn test_unknown_command_while_stopped() {
    let mut ctx = TestContext::new();
    ctx.request("initialize", None);
    ctx.launch("assign.lua");
    let evaluate = ctx.request("evaluate", Some(json!({ "expression": "x" })));
    let next = ctx.request("next", None);
    let transcript = ctx.run();

    let response = transcript.response(evaluate);
    assert!(!response.success);
    assert_eq!(
        response.message.as_deref(),
        Some("evaluate not yet implemented")
    );
    assert!(transcript.response(next).success);
}

#[test]
fn test_step_into_coroutine_body() {
    let mut ctx = TestContext::new();
    ctx.request("initialize", None);
    ctx.launch("coroutine.lua");
    let mut stacks = Vec::new();
    for _ in 0..14 {
        stacks.push(ctx.request("stackTrace", None));
        ctx.request("next", None);
    }
    let transcript = ctx.run();

    let lines: Vec<i64> = stacks
        .iter()
        .filter_map(|seq| transcript.response(*seq).body.as_ref())
        .filter_map(|body| body["stackFrames"][0]["line"].as_i64())
        .collect();
    assert!(lines.contains(&2), "stopped at lines {:?}", lines);
    assert!(lines.contains(&3), "stopped at lines {:?}", lines);
    assert!(lines.contains(&6), "stopped at lines {:?}", lines);

    assert_eq!(transcript.outputs("stdout"), vec!["true\t5\n"]);
    assert_eq!(transcript.events("terminated").len(), 1);
}

// ============== Binary ==============

fn frame_requests(requests: &[Value]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for request in requests {
        codec::write_frame(&mut bytes, request.to_string().as_bytes()).unwrap();
    }
    bytes
}

fn run_binary(input: &[u8], dir: &tempfile::TempDir) -> std::process::Output {
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "[log]\nfilter = \"luadebug=trace\"\n").unwrap();

    let mut child = Command::new(env!("CARGO_BIN_EXE_luadebug"))
        .arg("--config")
        .arg(&config)
        .arg("--log-file")
        .arg(dir.path().join("adapter.log"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to start luadebug");

    child
        .stdin
        .take()
        .unwrap()
        .write_all(input)
        .expect("Failed to write requests");
    child.wait_with_output().expect("luadebug did not exit")
}

#[test]
fn test_binary_session_over_stdio() {
    let dir = tempfile::tempdir().unwrap();
    let program = TestContext::new().fixture("assign.lua");
    let input = frame_requests(&[
        json!({ "seq": 1, "type": "request", "command": "initialize" }),
        json!({ "seq": 2, "type": "request", "command": "launch", "arguments": { "program": program } }),
        json!({ "seq": 3, "type": "request", "command": "next" }),
        json!({ "seq": 4, "type": "request", "command": "disconnect" }),
    ]);

    let output = run_binary(&input, &dir);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let messages = parse_messages(output.stdout);
    let events: Vec<&str> = messages
        .iter()
        .filter_map(|m| match m {
            ProtocolMessage::Event(e) => Some(e.event.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(
        events,
        vec!["initialized", "output", "thread", "stopped", "terminated"]
    );

    let log = std::fs::read_to_string(dir.path().join("adapter.log")).unwrap();
    assert!(log.contains("initialize"), "log: {}", log);
}

#[test]
fn test_binary_framing_error_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_binary(b"Content-Length: lots\r\n\r\n{}", &dir);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn test_binary_rejects_unknown_arguments() {
    let output = Command::new(env!("CARGO_BIN_EXE_luadebug"))
        .arg("--no-such-flag")
        .stdin(Stdio::null())
        .output()
        .expect("Failed to start luadebug");
    assert!(!output.status.success());
}

#[test]
fn test_binary_io_write_stays_off_the_protocol_stream() {
    let dir = tempfile::tempdir().unwrap();
    let program = TestContext::new().fixture("io_write.lua");
    let mut requests = vec![
        json!({ "seq": 1, "type": "request", "command": "initialize" }),
        json!({ "seq": 2, "type": "request", "command": "launch", "arguments": { "program": program } }),
    ];
    for seq in 3..6 {
        requests.push(json!({ "seq": seq, "type": "request", "command": "next" }));
    }
    requests.push(json!({ "seq": 6, "type": "request", "command": "disconnect" }));

    let output = run_binary(&frame_requests(&requests), &dir);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    // Every byte on stdout belongs to a frame
    let messages = parse_messages(output.stdout);
    let written: Vec<&str> = messages
        .iter()
        .filter_map(|m| match m {
            ProtocolMessage::Event(e) if e.event == "output" => e.body.as_ref(),
            _ => None,
        })
        .filter(|body| body["category"] == "stdout")
        .filter_map(|body| body["output"].as_str())
        .collect();
    assert_eq!(written, vec!["RAW-BYTES", " and more\n"]);
}
