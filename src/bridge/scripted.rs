//! Scripted interpreter for unit tests
//!
//! A program is a list of line stops, each carrying a snapshot of the call
//! stack. Running the program fires one line event per stop.

use std::any::Any;
use std::ops::ControlFlow;

use super::{
    BridgeError, DebugHook, FrameInfo, FrameRef, Frames, HookEvent, HookMask, InfoFlags,
    Interpreter,
};

/// One frame of a scripted stack
#[derive(Debug, Clone, Default)]
pub struct ScriptedFrame {
    pub source: Option<String>,
    pub line: i64,
    pub name: Option<String>,
    pub upvalues: usize,
    pub locals: Vec<String>,
}

impl ScriptedFrame {
    pub fn new(path: &str, line: i64) -> Self {
        Self {
            source: Some(format!("@{}", path)),
            line,
            ..Default::default()
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn upvalues(mut self, count: usize) -> Self {
        self.upvalues = count;
        self
    }

    pub fn locals(mut self, names: &[&str]) -> Self {
        self.locals = names.iter().map(|n| n.to_string()).collect();
        self
    }
}

/// What a scripted program does when run
#[derive(Debug, Clone, Default)]
pub struct ScriptedProgram {
    /// Innermost frame first
    pub stops: Vec<Vec<ScriptedFrame>>,
    /// Lines printed before the first stop
    pub output: Vec<String>,
    /// Error raised after the last stop
    pub error: Option<String>,
}

/// Frame view over one scripted stop
pub struct StackSnapshot<'a>(pub &'a [ScriptedFrame]);

impl Frames for StackSnapshot<'_> {
    fn get_frame(&self, depth: usize) -> Option<FrameRef> {
        (depth < self.0.len()).then_some(FrameRef { depth })
    }

    fn frame_info(&self, frame: FrameRef, flags: InfoFlags) -> Result<FrameInfo, BridgeError> {
        let scripted = self
            .0
            .get(frame.depth)
            .ok_or_else(|| BridgeError::Introspection("no such frame".to_string()))?;
        Ok(FrameInfo {
            source: if flags.source { scripted.source.clone() } else { None },
            line: flags.line.then_some(scripted.line),
            name: if flags.name { scripted.name.clone() } else { None },
            upvalues: if flags.upvalues { scripted.upvalues } else { 0 },
        })
    }

    fn local_name(&self, frame: FrameRef, index: usize) -> Option<String> {
        let scripted = self.0.get(frame.depth)?;
        index.checked_sub(1).and_then(|i| scripted.locals.get(i).cloned())
    }
}

type EventFn = fn(&mut dyn Any, HookEvent, &dyn Frames) -> ControlFlow<()>;
type OutputFn = fn(&mut dyn Any, &str) -> ControlFlow<()>;

fn forward_event<H: DebugHook>(
    hook: &mut dyn Any,
    event: HookEvent,
    frames: &dyn Frames,
) -> ControlFlow<()> {
    match hook.downcast_mut::<H>() {
        Some(hook) => hook.on_event(event, frames),
        None => ControlFlow::Continue(()),
    }
}

fn forward_output<H: DebugHook>(hook: &mut dyn Any, text: &str) -> ControlFlow<()> {
    match hook.downcast_mut::<H>() {
        Some(hook) => hook.on_output(text),
        None => ControlFlow::Continue(()),
    }
}

struct InstalledHook {
    hook: Box<dyn Any>,
    mask: HookMask,
    on_event: EventFn,
    on_output: OutputFn,
}

/// Interpreter whose programs are registered by path ahead of time
#[derive(Default)]
pub struct ScriptedInterpreter {
    programs: Vec<(String, ScriptedProgram)>,
    loaded: Option<ScriptedProgram>,
    hook: Option<InstalledHook>,
    /// Number of line events delivered so far
    pub events_fired: usize,
}

impl ScriptedInterpreter {
    pub fn with_program(mut self, path: &str, program: ScriptedProgram) -> Self {
        self.programs.push((path.to_string(), program));
        self
    }
}

impl Interpreter for ScriptedInterpreter {
    fn load_program(&mut self, path: &str) -> Result<(), BridgeError> {
        let program = self
            .programs
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, program)| program.clone())
            .ok_or_else(|| BridgeError::Load(format!("cannot open {}", path)))?;
        self.loaded = Some(program);
        Ok(())
    }

    fn install_hook<H: DebugHook>(&mut self, hook: H, mask: HookMask) {
        self.hook = Some(InstalledHook {
            hook: Box::new(hook),
            mask,
            on_event: forward_event::<H>,
            on_output: forward_output::<H>,
        });
    }

    fn run_loaded(&mut self) -> Result<(), BridgeError> {
        let program = self.loaded.take().ok_or(BridgeError::NoProgram)?;
        let aborted = || BridgeError::Run("debug session aborted".to_string());

        if let Some(installed) = self.hook.as_mut() {
            for line in &program.output {
                let text = format!("{}\n", line);
                if (installed.on_output)(&mut *installed.hook, &text).is_break() {
                    return Err(aborted());
                }
            }
        }

        for stack in &program.stops {
            let Some(installed) = self.hook.as_mut() else {
                break;
            };
            if !installed.mask.admits(HookEvent::Line) {
                continue;
            }
            self.events_fired += 1;
            let frames = StackSnapshot(stack);
            if (installed.on_event)(&mut *installed.hook, HookEvent::Line, &frames).is_break()
            {
                return Err(aborted());
            }
        }

        match program.error {
            Some(message) => Err(BridgeError::Run(message)),
            None => Ok(()),
        }
    }

    fn remove_hook<H: DebugHook>(&mut self) -> Option<H> {
        let installed = self.hook.take()?;
        installed.hook.downcast::<H>().ok().map(|hook| *hook)
    }
}
