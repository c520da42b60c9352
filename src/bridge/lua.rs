//! Bridge over an embedded Lua 5.4 VM
//!
//! Stack introspection goes through the `debug` library functions captured
//! when the VM is created, so a program that reassigns `debug` cannot blind
//! the adapter. The hook owns no state of its own: the installed
//! [`DebugHook`] lives in the VM's app-data slot and the hook trampoline
//! takes it out for the duration of each call-back.
//!
//! While a hook is installed, the library entries that would write to the
//! process stdout or start coroutines are replaced, and restored on removal.

use std::ops::ControlFlow;

use mlua::{
    Debug, DebugEvent, Function, HookTriggers, Lua, MultiValue, Table, Thread, Value, VmState,
};

use super::{
    BridgeError, DebugHook, FrameInfo, FrameRef, Frames, HookEvent, HookMask, InfoFlags,
    Interpreter,
};

/// Message of the Lua error raised when a hook asks to abort the program
const ABORT_MESSAGE: &str = "debug session aborted";

/// Start of the traceback mlua appends to errors raised in a resumed thread
const TRACEBACK_MARKER: &str = "\nstack traceback:";

/// `debug` library functions captured at start-up
#[derive(Clone)]
struct Introspection {
    getinfo: Function,
    getlocal: Function,
    tostring: Function,
}

impl Introspection {
    fn capture(lua: &Lua) -> mlua::Result<Self> {
        let globals = lua.globals();
        let debug: Table = globals.get("debug")?;
        Ok(Self {
            getinfo: debug.get("getinfo")?,
            getlocal: debug.get("getlocal")?,
            tostring: globals.get("tostring")?,
        })
    }
}

/// Frame view handed to the hook while the VM is paused
///
/// Calls into `debug.getinfo`/`debug.getlocal` from here add one level
/// (the C function itself) above the paused function, hence `depth + 1`.
struct LuaFrames<'a> {
    introspection: &'a Introspection,
}

impl LuaFrames<'_> {
    fn level(depth: usize) -> i64 {
        depth as i64 + 1
    }

    fn getinfo(&self, depth: usize, what: &str) -> mlua::Result<Option<Table>> {
        self.introspection
            .getinfo
            .call((Self::level(depth), what))
    }
}

impl Frames for LuaFrames<'_> {
    fn get_frame(&self, depth: usize) -> Option<FrameRef> {
        match self.getinfo(depth, "S") {
            Ok(Some(_)) => Some(FrameRef { depth }),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(depth, error = %e, "debug.getinfo failed");
                None
            }
        }
    }

    fn frame_info(&self, frame: FrameRef, flags: InfoFlags) -> Result<FrameInfo, BridgeError> {
        let mut what = String::new();
        if flags.source {
            what.push('S');
        }
        if flags.line {
            what.push('l');
        }
        if flags.name {
            what.push('n');
        }
        if flags.upvalues {
            what.push('u');
        }

        let introspection_error = |e: mlua::Error| BridgeError::Introspection(e.to_string());
        let info = self
            .getinfo(frame.depth, &what)
            .map_err(introspection_error)?
            .ok_or_else(|| {
                BridgeError::Introspection(format!("no frame at depth {}", frame.depth))
            })?;

        let mut result = FrameInfo::default();
        if flags.source {
            result.source = info.get("source").map_err(introspection_error)?;
        }
        if flags.line {
            let line: Option<i64> = info.get("currentline").map_err(introspection_error)?;
            result.line = line.filter(|l| *l >= 0);
        }
        if flags.name {
            result.name = info.get("name").map_err(introspection_error)?;
        }
        if flags.upvalues {
            let nups: Option<i64> = info.get("nups").map_err(introspection_error)?;
            result.upvalues = nups.unwrap_or(0).max(0) as usize;
        }
        Ok(result)
    }

    fn local_name(&self, frame: FrameRef, index: usize) -> Option<String> {
        self.introspection
            .getlocal
            .call::<Option<String>>((Self::level(frame.depth), index as i64))
            .unwrap_or_else(|e| {
                tracing::warn!(depth = frame.depth, index, error = %e, "debug.getlocal failed");
                None
            })
    }
}

fn abort_error() -> mlua::Error {
    mlua::Error::RuntimeError(ABORT_MESSAGE.to_string())
}

fn is_abort(error: &mlua::Error) -> bool {
    error.to_string().contains(ABORT_MESSAGE)
}

fn to_vm_state(flow: ControlFlow<()>) -> mlua::Result<VmState> {
    match flow {
        ControlFlow::Continue(()) => Ok(VmState::Continue),
        ControlFlow::Break(()) => Err(abort_error()),
    }
}

/// Hook trampoline: recover the installed hook from app data and forward the event
fn dispatch_event<H: DebugHook>(
    lua: &Lua,
    introspection: &Introspection,
    event: HookEvent,
) -> mlua::Result<VmState> {
    let Some(mut hook) = lua.remove_app_data::<H>() else {
        return Ok(VmState::Continue);
    };
    let frames = LuaFrames { introspection };
    let flow = hook.on_event(event, &frames);
    lua.set_app_data(hook);
    to_vm_state(flow)
}

/// Output trampoline: forward program output to the installed hook
fn dispatch_output<H: DebugHook>(lua: &Lua, text: &str) -> mlua::Result<()> {
    let Some(mut hook) = lua.remove_app_data::<H>() else {
        return Ok(());
    };
    let flow = hook.on_output(text);
    lua.set_app_data(hook);
    match flow {
        ControlFlow::Continue(()) => Ok(()),
        ControlFlow::Break(()) => Err(abort_error()),
    }
}

/// The VM-level hook function forwarding to [`dispatch_event`]
fn hook_function<H: DebugHook>(
    introspection: Introspection,
) -> impl Fn(&Lua, Debug<'_>) -> mlua::Result<VmState> + 'static {
    move |lua: &Lua, debug: Debug<'_>| {
        let event = match debug.event() {
            DebugEvent::Call | DebugEvent::TailCall => HookEvent::Call,
            DebugEvent::Ret => HookEvent::Return,
            DebugEvent::Line => HookEvent::Line,
            _ => return Ok(VmState::Continue),
        };
        dispatch_event::<H>(lua, &introspection, event)
    }
}

/// Hook settings shared by every thread the program runs on
///
/// mlua keeps a single hooked thread per VM, so the hook follows control:
/// it moves onto a coroutine when it is resumed and back onto the resumer
/// when the coroutine yields, returns or fails.
#[derive(Clone)]
struct ThreadHook {
    triggers: HookTriggers,
    introspection: Introspection,
}

impl ThreadHook {
    fn attach<H: DebugHook>(&self, thread: &Thread) {
        thread.set_hook(self.triggers, hook_function::<H>(self.introspection.clone()));
    }

    fn resume<H: DebugHook>(
        &self,
        lua: &Lua,
        thread: &Thread,
        args: MultiValue,
    ) -> mlua::Result<MultiValue> {
        let resumer = lua.current_thread();
        self.attach::<H>(thread);
        let result = thread.resume::<MultiValue>(args);
        self.attach::<H>(&resumer);
        result
    }
}

/// Concatenate `io.write` arguments the way Lua does: strings and numbers only
fn write_text(tostring: &Function, args: MultiValue) -> mlua::Result<String> {
    let mut text = String::new();
    for (index, value) in args.into_iter().enumerate() {
        match value {
            Value::String(s) => text.push_str(&s.to_string_lossy()),
            Value::Integer(_) | Value::Number(_) => text.push_str(&tostring.call::<String>(value)?),
            other => {
                return Err(mlua::Error::RuntimeError(format!(
                    "bad argument #{} to 'write' (string expected, got {})",
                    index + 1,
                    other.type_name()
                )))
            }
        }
    }
    Ok(text)
}

/// A library entry replaced while a hook is installed
struct Replaced {
    table: Table,
    key: &'static str,
    previous: Value,
}

/// Lua 5.4 interpreter with the full standard library, `debug` included
pub struct LuaInterpreter {
    lua: Lua,
    introspection: Introspection,
    loaded: Option<Function>,
    replaced: Vec<Replaced>,
}

impl LuaInterpreter {
    pub fn new() -> Result<Self, BridgeError> {
        // SAFETY: the `debug` library is required for stack introspection;
        // programs run here are the user's own scripts under a debugger.
        let lua = unsafe { Lua::unsafe_new() };
        let introspection =
            Introspection::capture(&lua).map_err(|e| BridgeError::Startup(e.to_string()))?;
        Ok(Self {
            lua,
            introspection,
            loaded: None,
            replaced: Vec::new(),
        })
    }

    fn replace(&mut self, table: &Table, key: &'static str, value: Value) -> mlua::Result<()> {
        let previous = table.get(key)?;
        table.set(key, value)?;
        self.replaced.push(Replaced {
            table: table.clone(),
            key,
            previous,
        });
        Ok(())
    }

    fn restore_replaced(&mut self) {
        while let Some(entry) = self.replaced.pop() {
            if let Err(e) = entry.table.set(entry.key, entry.previous) {
                tracing::warn!(key = entry.key, error = %e, "Could not restore library entry");
            }
        }
    }

    /// Send `print`, `io.write` and `io.stdout` to the hook instead of the
    /// process stdout, which carries the protocol
    fn redirect_output<H: DebugHook>(&mut self) -> mlua::Result<()> {
        let lua = self.lua.clone();
        let globals = lua.globals();

        let tostring = self.introspection.tostring.clone();
        let print = lua.create_function(move |lua, args: MultiValue| {
            let parts = args
                .into_iter()
                .map(|value| tostring.call::<String>(value))
                .collect::<mlua::Result<Vec<_>>>()?;
            let mut line = parts.join("\t");
            line.push('\n');
            dispatch_output::<H>(lua, &line)
        })?;
        self.replace(&globals, "print", Value::Function(print))?;

        let io: Table = globals.get("io")?;
        let stdout: Value = io.get("stdout")?;
        let output: Function = io.get("output")?;
        let write: Function = io.get("write")?;

        let proxy = lua.create_table()?;
        let tostring = self.introspection.tostring.clone();
        let emit = lua.create_function(move |lua, args: MultiValue| {
            let text = write_text(&tostring, args)?;
            if !text.is_empty() {
                dispatch_output::<H>(lua, &text)?;
            }
            Ok(())
        })?;
        {
            let emit = emit.clone();
            proxy.set(
                "write",
                lua.create_function(move |_, (this, args): (Table, MultiValue)| {
                    emit.call::<()>(args)?;
                    Ok(this)
                })?,
            )?;
        }
        proxy.set("flush", lua.create_function(|_, this: Table| Ok(this))?)?;
        proxy.set("setvbuf", lua.create_function(|_, _: MultiValue| Ok(true))?)?;
        proxy.set(
            "close",
            lua.create_function(|_, _: MultiValue| {
                Ok((Value::Nil, "cannot close standard file"))
            })?,
        )?;

        let io_write = {
            let (proxy, stdout, output) = (proxy.clone(), stdout.clone(), output.clone());
            lua.create_function(move |_, args: MultiValue| {
                let current: Value = output.call(())?;
                if current != stdout {
                    return write.call::<MultiValue>(args);
                }
                emit.call::<()>(args)?;
                Ok(MultiValue::from_vec(vec![Value::Table(proxy.clone())]))
            })?
        };
        let io_output = {
            let proxy = proxy.clone();
            lua.create_function(move |_, file: Option<Value>| {
                let file = match file {
                    Some(Value::Table(t)) if t == proxy => Some(stdout.clone()),
                    other => other,
                };
                let current: Value = output.call(file)?;
                Ok(if current == stdout {
                    Value::Table(proxy.clone())
                } else {
                    current
                })
            })?
        };

        self.replace(&io, "write", Value::Function(io_write))?;
        self.replace(&io, "output", Value::Function(io_output))?;
        self.replace(&io, "stdout", Value::Table(proxy))
    }

    /// Carry the hook into coroutines started through `coroutine.resume`
    /// and `coroutine.wrap`
    fn follow_coroutines<H: DebugHook>(&mut self, hook: ThreadHook) -> mlua::Result<()> {
        let lua = self.lua.clone();
        let coroutine: Table = lua.globals().get("coroutine")?;

        let resume = {
            let hook = hook.clone();
            lua.create_function(move |lua, (thread, args): (Thread, MultiValue)| {
                match hook.resume::<H>(lua, &thread, args) {
                    Ok(mut values) => {
                        values.push_front(Value::Boolean(true));
                        Ok(values)
                    }
                    Err(e) if is_abort(&e) => Err(e),
                    Err(mlua::Error::RuntimeError(message)) => {
                        // Lua's own resume reports the bare error value
                        let message = message
                            .split(TRACEBACK_MARKER)
                            .next()
                            .unwrap_or_default();
                        Ok(MultiValue::from_vec(vec![
                            Value::Boolean(false),
                            Value::String(lua.create_string(message)?),
                        ]))
                    }
                    Err(e) => Ok(MultiValue::from_vec(vec![
                        Value::Boolean(false),
                        Value::String(lua.create_string(e.to_string())?),
                    ])),
                }
            })?
        };

        let wrap = lua.create_function(move |lua, function: Function| {
            let thread = lua.create_thread(function)?;
            let hook = hook.clone();
            lua.create_function(move |lua, args: MultiValue| hook.resume::<H>(lua, &thread, args))
        })?;

        self.replace(&coroutine, "resume", Value::Function(resume))?;
        self.replace(&coroutine, "wrap", Value::Function(wrap))
    }
}

impl Interpreter for LuaInterpreter {
    fn load_program(&mut self, path: &str) -> Result<(), BridgeError> {
        let code = std::fs::read(path)
            .map_err(|e| BridgeError::Load(format!("cannot open {}: {}", path, e)))?;
        let function = self
            .lua
            .load(code)
            .set_name(format!("@{}", path))
            .into_function()
            .map_err(|e| BridgeError::Load(e.to_string()))?;

        tracing::debug!(path, "Program loaded");
        self.loaded = Some(function);
        Ok(())
    }

    fn install_hook<H: DebugHook>(&mut self, hook: H, mask: HookMask) {
        self.lua.set_app_data(hook);

        if let Err(e) = self.redirect_output::<H>() {
            tracing::warn!(error = %e, "Could not redirect program output; dropping it");
            if let Err(e) = self.lua.globals().set("print", Value::Nil) {
                tracing::warn!(error = %e, "Could not disable print");
            }
        }

        let mut triggers = HookTriggers::new();
        if mask.call {
            triggers = triggers.on_calls();
        }
        if mask.ret {
            triggers = triggers.on_returns();
        }
        if mask.line {
            triggers = triggers.every_line();
        }

        let thread_hook = ThreadHook {
            triggers,
            introspection: self.introspection.clone(),
        };
        if let Err(e) = self.follow_coroutines::<H>(thread_hook) {
            tracing::warn!(error = %e, "Coroutines will run without the hook");
        }

        self.lua
            .set_hook(triggers, hook_function::<H>(self.introspection.clone()));
    }

    fn run_loaded(&mut self) -> Result<(), BridgeError> {
        let function = self.loaded.take().ok_or(BridgeError::NoProgram)?;
        function
            .call::<()>(())
            .map_err(|e| BridgeError::Run(e.to_string()))
    }

    fn remove_hook<H: DebugHook>(&mut self) -> Option<H> {
        self.lua.remove_hook();
        self.restore_replaced();
        self.lua.remove_app_data::<H>()
    }
}
