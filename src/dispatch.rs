//! Action request dispatcher: the bounded FIFO queue, the worker loop and
//! request execution.
//!
//! Requests arrive from a transport plugin carrying an action name and
//! parameter values.  Ownership transfers to the dispatcher at enqueue;
//! workers pop in FIFO order, match the name against the registry,
//! validate parameters against the schema, execute the callback or shell
//! command, and hand the completed request back to the plugins.

use std::collections::VecDeque;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Condvar, Mutex, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::action::{
    ActionFlags, ActionSnapshot, ExecMethod, ParamDirection, FORBIDDEN_NAME_CHARS,
};
use crate::agent::{Agent, AgentCore};
use crate::log::{agent_log, LogLevel};
use crate::options::OptionsMap;
use crate::plugins::Operation;
use crate::status::Status;
use crate::util::{name_cmp, Deadline};
use crate::value::{ConversionLevel, Value, ValueType};
use crate::{ACTION_QUEUE_MAX, COMMAND_LINE_MAX, COMMAND_OUTPUT_MAX, ID_MAX, NAME_MAX, PARAMETER_MAX};

/// One parameter carried by a request.  `matched` records whether
/// validation found a schema entry claiming this parameter; anything
/// still unclaimed afterwards is an unknown parameter.
#[derive(Debug, Clone)]
pub(crate) struct RequestParameter {
    pub(crate) name: String,
    pub(crate) direction: ParamDirection,
    pub(crate) matched: bool,
    pub(crate) value: Option<Value>,
}

/// One invocation of an action.
///
/// Built by the transport (or a test), filled with parameter values, then
/// handed to [`Agent::request_execute`]; the dispatcher owns it from that
/// point on and reports the outcome through the ACTION_COMPLETE pipeline
/// operation.
#[derive(Debug)]
pub struct ActionRequest {
    name: String,
    source: Option<String>,
    pub(crate) parameters: Vec<RequestParameter>,
    options: OptionsMap,
    pub(crate) error: Option<String>,
    pub(crate) result: Option<Status>,
}

impl ActionRequest {
    /// Create a request for the named action.  `source` identifies the
    /// originating device/session and is truncated to `ID_MAX`.
    pub fn new(name: &str, source: Option<&str>) -> Result<Self, Status> {
        if name.is_empty() {
            return Err(Status::BadParameter);
        }
        if name.len() > NAME_MAX {
            return Err(Status::OutOfRange);
        }
        let source = source.map(|s| {
            let mut owned = s.to_string();
            if owned.len() > ID_MAX {
                let mut cut = ID_MAX;
                while !owned.is_char_boundary(cut) {
                    cut -= 1;
                }
                owned.truncate(cut);
            }
            owned
        });
        Ok(ActionRequest {
            name: name.to_string(),
            source,
            parameters: Vec::new(),
            options: OptionsMap::new(),
            error: None,
            result: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Set a parameter value, replacing an existing entry of the same
    /// (case-insensitive) name or appending a new one.
    pub fn parameter_set(&mut self, name: &str, value: Value) -> Result<(), Status> {
        if name.is_empty() {
            return Err(Status::BadParameter);
        }
        if name.contains(&FORBIDDEN_NAME_CHARS[..]) {
            return Err(Status::BadRequest);
        }
        if name.len() > NAME_MAX {
            return Err(Status::OutOfRange);
        }
        if let Some(param) = self
            .parameters
            .iter_mut()
            .find(|p| name_cmp(&p.name, name) == std::cmp::Ordering::Equal)
        {
            param.value = Some(value);
            return Ok(());
        }
        if self.parameters.len() >= PARAMETER_MAX {
            return Err(Status::Full);
        }
        self.parameters.push(RequestParameter {
            name: name.to_string(),
            direction: ParamDirection::OUT,
            matched: false,
            value: Some(value),
        });
        Ok(())
    }

    /// Read a parameter value as `ty`, converting when allowed.
    pub fn parameter_get(&self, name: &str, convert: bool, ty: ValueType) -> Result<Value, Status> {
        let param = self
            .parameters
            .iter()
            .find(|p| name_cmp(&p.name, name) == std::cmp::Ordering::Equal)
            .ok_or(Status::NotFound)?;
        match &param.value {
            Some(value) => value.coerce(ty, convert),
            None => Err(Status::NotFound),
        }
    }

    /// Names of all parameters currently on the request.
    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }

    /// All parameters with their current values; a `None` value means the
    /// parameter is declared but unset.
    pub fn parameters(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.parameters
            .iter()
            .map(|p| (p.name.as_str(), p.value.as_ref()))
    }

    pub fn option_set(&mut self, name: &str, value: Value) -> Result<(), Status> {
        self.options.set(name, value)
    }

    pub fn options(&self) -> &OptionsMap {
        &self.options
    }

    /// Final status, present once the dispatcher completed the request.
    pub fn result(&self) -> Option<Status> {
        self.result
    }

    /// Diagnostic message accompanying a failed request.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

#[derive(Default)]
struct QueueState {
    wait: VecDeque<ActionRequest>,
    in_flight: usize,
}

/// Bounded FIFO of pending requests plus the worker wakeup signal.  The
/// capacity covers waiting and in-flight requests together.
pub(crate) struct RequestQueue {
    state: Mutex<QueueState>,
    signal: Condvar,
}

impl RequestQueue {
    pub(crate) fn new() -> Self {
        RequestQueue {
            state: Mutex::new(QueueState::default()),
            signal: Condvar::new(),
        }
    }

    pub(crate) fn enqueue(&self, request: ActionRequest) -> Result<(), Status> {
        let mut state = self.state.lock().map_err(|_| Status::Failure)?;
        if state.wait.len() + state.in_flight >= ACTION_QUEUE_MAX {
            return Err(Status::Full);
        }
        state.wait.push_back(request);
        drop(state);
        self.signal.notify_one();
        Ok(())
    }

    /// Non-blocking pop used in single-thread mode.
    fn try_pop(&self) -> Option<ActionRequest> {
        let mut state = self.state.lock().ok()?;
        let request = state.wait.pop_front()?;
        state.in_flight += 1;
        Some(request)
    }

    fn release_slot(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.in_flight = state.in_flight.saturating_sub(1);
        }
    }

    /// Wake every worker, e.g. so they observe the quit flag.  Taking the
    /// queue mutex first closes the window where a worker has checked the
    /// flag but not yet started waiting.
    pub(crate) fn wake_all(&self) {
        let _state = self.state.lock();
        self.signal.notify_all();
    }
}

impl Agent {
    /// Hand a request to the dispatcher.  Ownership transfers here; the
    /// outcome is reported through the ACTION_COMPLETE pipeline
    /// operation.  `Full` when the queue capacity is reached.
    pub fn request_execute(
        &self,
        request: ActionRequest,
        _max_time_out_ms: u64,
    ) -> Result<(), Status> {
        self.core().queue.enqueue(request)
    }
}

/// Worker thread body: sleep on the queue signal, drain requests in FIFO
/// order, exit once the library is shutting down.
pub(crate) fn worker_main(core: Arc<AgentCore>) {
    loop {
        let request = {
            let mut state = match core.queue.state.lock() {
                Ok(state) => state,
                Err(_) => return,
            };
            loop {
                if let Some(request) = state.wait.pop_front() {
                    state.in_flight += 1;
                    break Some(request);
                }
                if core.quitting() {
                    break None;
                }
                state = match core.queue.signal.wait(state) {
                    Ok(state) => state,
                    Err(_) => return,
                };
            }
        };
        match request {
            Some(request) => process_request(&core, request, 0),
            None => return,
        }
    }
}

/// Single-thread mode: process at most one pending request.  `NotFound`
/// when the queue is empty.
pub(crate) fn process_pending(core: &Arc<AgentCore>, max_time_out_ms: u64) -> Status {
    match core.queue.try_pop() {
        Some(request) => {
            process_request(core, request, max_time_out_ms);
            Status::Success
        }
        None => Status::NotFound,
    }
}

enum ExclusivityGuard<'a> {
    #[allow(dead_code)]
    Shared(RwLockReadGuard<'a, ()>),
    #[allow(dead_code)]
    Exclusive(RwLockWriteGuard<'a, ()>),
}

fn process_request(core: &Arc<AgentCore>, mut request: ActionRequest, max_time_out_ms: u64) {
    let action = core.actions.lock().ok().and_then(|actions| {
        actions
            .iter()
            .find(|body| name_cmp(body.name(), request.name()) == std::cmp::Ordering::Equal)
            .cloned()
    });

    let status = match action {
        Some(body) if !core.quitting() => {
            let snapshot = body.snapshot();
            // exclusive actions take the write side, so they exclude every
            // other action; non-exclusive actions share the read side
            let _guard = if snapshot.flags.contains(ActionFlags::EXCLUSIVE_APP) {
                core.exclusive.write().ok().map(ExclusivityGuard::Exclusive)
            } else {
                core.exclusive.read().ok().map(ExclusivityGuard::Shared)
            };
            agent_log!(
                core.log,
                LogLevel::Debug,
                "executing action: {}",
                snapshot.name
            );
            execute(core, &snapshot, &mut request, max_time_out_ms)
        }
        _ => {
            if !core.quitting() {
                agent_log!(
                    core.log,
                    LogLevel::Notice,
                    "not executing action: {}; reason: {}",
                    request.name(),
                    Status::NotFound
                );
            }
            Status::NotFound
        }
    };

    request.result = Some(status);
    core.plugins.perform(
        &Operation::ActionComplete { request: &request },
        None,
        max_time_out_ms,
    );
    core.queue.release_slot();
}

fn fail(core: &AgentCore, request: &mut ActionRequest, status: Status, message: String) -> Status {
    agent_log!(core.log, LogLevel::Error, "{message}");
    request.error = Some(message);
    request.result = Some(status);
    status
}

/// Validate the request against the schema and run the execution method.
fn execute(
    core: &AgentCore,
    snapshot: &ActionSnapshot,
    request: &mut ActionRequest,
    max_time_out_ms: u64,
) -> Status {
    // single pass over the schema: match request parameters by name,
    // enforce required inputs, convert values to the declared types
    let mut param_required: Option<String> = None;
    let mut param_bad_type: Option<String> = None;
    for reg in &snapshot.parameters {
        if param_required.is_some() || param_bad_type.is_some() {
            break;
        }
        let matched = request
            .parameters
            .iter_mut()
            .find(|p| name_cmp(&p.name, &reg.name) == std::cmp::Ordering::Equal);
        match matched {
            Some(param) => {
                param.direction = reg.direction;
                param.matched = true;
                if reg.direction.contains(ParamDirection::IN_REQUIRED) && param.value.is_none() {
                    param_required = Some(reg.name.clone());
                } else if let Some(value) = &mut param.value {
                    if !value.convert(ConversionLevel::Basic, reg.ty) {
                        param_bad_type = Some(reg.name.clone());
                    }
                }
            }
            None => {
                if reg.direction.contains(ParamDirection::IN_REQUIRED) {
                    param_required = Some(reg.name.clone());
                }
            }
        }
    }

    // anything no schema entry claimed is unknown
    let param_unknown = request
        .parameters
        .iter()
        .find(|p| !p.matched)
        .map(|p| p.name.clone());

    if let Some(name) = param_required {
        return fail(
            core,
            request,
            Status::BadRequest,
            format!("required IN parameter missing: {name}"),
        );
    }
    if let Some(name) = param_bad_type {
        return fail(
            core,
            request,
            Status::BadRequest,
            format!("invalid value for parameter: {name}"),
        );
    }
    if let Some(name) = param_unknown {
        return fail(
            core,
            request,
            Status::BadRequest,
            format!("unknown parameter: {name}"),
        );
    }

    let mut result = match &snapshot.exec {
        ExecMethod::Callback(callback) => callback(request),
        ExecMethod::Command(template) => {
            execute_command(core, snapshot, template, request, max_time_out_ms)
        }
        ExecMethod::None => fail(
            core,
            request,
            Status::Failure,
            format!("no execution method registered for: {}", snapshot.name),
        ),
    };

    // required outputs must have been filled in by the execution
    if result == Status::Success {
        for reg in &snapshot.parameters {
            if !reg.direction.contains(ParamDirection::OUT_REQUIRED) {
                continue;
            }
            let filled = request
                .parameters
                .iter()
                .any(|p| {
                    name_cmp(&p.name, &reg.name) == std::cmp::Ordering::Equal
                        && p.value.is_some()
                });
            if !filled {
                result = fail(
                    core,
                    request,
                    Status::BadRequest,
                    format!("required OUT parameter missing: {}", reg.name),
                );
                break;
            }
        }
    }
    result
}

/// Render the `--name=value` token for one parameter.
fn render_value(line: &mut String, value: Option<&Value>) {
    match value {
        None | Some(Value::Null) => line.push_str("[NULL]"),
        Some(Value::Bool(v)) => line.push(if *v { '1' } else { '0' }),
        Some(Value::Float32(v)) => line.push_str(&format!("{v:.6}")),
        Some(Value::Float64(v)) => line.push_str(&format!("{v:.6}")),
        Some(Value::Int8(v)) => line.push_str(&v.to_string()),
        Some(Value::Int16(v)) => line.push_str(&v.to_string()),
        Some(Value::Int32(v)) => line.push_str(&v.to_string()),
        Some(Value::Int64(v)) => line.push_str(&v.to_string()),
        Some(Value::UInt8(v)) => line.push_str(&v.to_string()),
        Some(Value::UInt16(v)) => line.push_str(&v.to_string()),
        Some(Value::UInt32(v)) => line.push_str(&v.to_string()),
        Some(Value::UInt64(v)) => line.push_str(&v.to_string()),
        Some(Value::Location(loc)) => {
            line.push_str(&format!("[{:.6},{:.6}]", loc.longitude(), loc.latitude()))
        }
        Some(Value::Raw(bytes)) => line.push_str(&crate::base64::encode(bytes)),
        Some(Value::String(s)) => {
            line.push('"');
            for c in s.chars() {
                if c == '"' || c == '\\' {
                    line.push('\\');
                }
                line.push(c);
            }
            line.push('"');
        }
    }
}

/// Append every request parameter to the command template.  `OutOfRange`
/// when the rendered line would exceed the maximum command length.
pub(crate) fn render_command(
    template: &str,
    parameters: &[RequestParameter],
) -> Result<String, Status> {
    let mut line = String::with_capacity(template.len());
    line.push_str(template);
    for param in parameters {
        line.push(' ');
        if !param.name.is_empty() {
            line.push_str("--");
            line.push_str(&param.name);
            line.push('=');
        }
        render_value(&mut line, param.value.as_ref());
        if line.len() > COMMAND_LINE_MAX {
            return Err(Status::OutOfRange);
        }
    }
    Ok(line)
}

fn spawn_output_reader(
    stream: Option<impl Read + Send + 'static>,
) -> Option<std::thread::JoinHandle<Vec<u8>>> {
    stream.map(|mut stream| {
        std::thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = stream.read_to_end(&mut buffer);
            buffer
        })
    })
}

fn collect_output(handle: Option<std::thread::JoinHandle<Vec<u8>>>) -> String {
    let mut bytes = handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();
    bytes.truncate(COMMAND_OUTPUT_MAX);
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Poll the child until it exits or the deadline lapses; `None` means the
/// child was killed for overrunning.
fn wait_with_deadline(child: &mut Child, deadline: &Deadline) -> Option<std::process::ExitStatus> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {
                if deadline.exceeded() {
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
        }
    }
}

fn execute_command(
    core: &AgentCore,
    snapshot: &ActionSnapshot,
    template: &str,
    request: &mut ActionRequest,
    max_time_out_ms: u64,
) -> Status {
    let line = match render_command(template, &request.parameters) {
        Ok(line) => line,
        Err(status) => {
            return fail(
                core,
                request,
                status,
                format!(
                    "command line for \"{}\" exceeds {} bytes",
                    snapshot.name, COMMAND_LINE_MAX
                ),
            )
        }
    };
    // some hosts treat an embedded CRLF as end-of-command
    let line = line.replace("\r\n", "");
    agent_log!(core.log, LogLevel::Debug, "executing command: {line}");

    // the action's own limit caps the caller's budget
    let mut effective_ms = max_time_out_ms;
    if !snapshot.flags.contains(ActionFlags::NO_TIME_LIMIT)
        && (effective_ms == 0 || effective_ms > snapshot.time_limit_ms)
    {
        effective_ms = snapshot.time_limit_ms;
    }

    let mut command = Command::new("sh");
    command.arg("-c").arg(&line).stdin(Stdio::null());

    if snapshot.flags.contains(ActionFlags::NO_RETURN) {
        command.stdout(Stdio::null()).stderr(Stdio::null());
        return match command.spawn() {
            Ok(mut child) => {
                // reap in the background so fire-and-forget children do
                // not linger as zombies
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
                agent_log!(
                    core.log,
                    LogLevel::Info,
                    "command \"{}\" has been invoked",
                    snapshot.name
                );
                Status::Invoked
            }
            Err(err) => fail(
                core,
                request,
                Status::Failure,
                format!("command \"{}\" failed, reason: {err}", snapshot.name),
            ),
        };
    }

    command.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            return fail(
                core,
                request,
                Status::Failure,
                format!("command \"{}\" failed, reason: {err}", snapshot.name),
            )
        }
    };
    let stdout = spawn_output_reader(child.stdout.take());
    let stderr = spawn_output_reader(child.stderr.take());
    let deadline = Deadline::new_ms(effective_ms);
    let exit = wait_with_deadline(&mut child, &deadline);
    let out = collect_output(stdout);
    let err = collect_output(stderr);

    match exit {
        Some(exit) => {
            let code = exit.code().unwrap_or(-1);
            let _ = request.parameter_set("retval", Value::Int32(code));
            if !out.is_empty() {
                let _ = request.parameter_set("stdout", Value::String(out));
            }
            if !err.is_empty() {
                let _ = request.parameter_set("stderr", Value::String(err));
            }
            agent_log!(
                core.log,
                LogLevel::Info,
                "command \"{}\" exited with: {code}",
                snapshot.name
            );
            if code == 0 {
                Status::Success
            } else {
                Status::ExecutionError
            }
        }
        None => fail(
            core,
            request,
            Status::TimedOut,
            format!(
                "command \"{}\" timed out after {effective_ms} ms",
                snapshot.name
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Location;

    fn param(name: &str, value: Option<Value>) -> RequestParameter {
        RequestParameter {
            name: name.to_string(),
            direction: ParamDirection::OUT,
            matched: false,
            value,
        }
    }

    #[test]
    fn command_rendering_covers_every_type() {
        let params = vec![
            param("flag", Some(Value::Bool(true))),
            param("count", Some(Value::Int32(-5))),
            param("ratio", Some(Value::Float64(1.5))),
            param("label", Some(Value::String("say \"hi\"".into()))),
            param("blob", Some(Value::Raw(b"Man".to_vec()))),
            param(
                "where",
                Some(Value::Location(Location::new(45.0, -75.0).unwrap())),
            ),
            param("empty", None),
        ];
        let line = render_command("/bin/run", &params).unwrap();
        assert_eq!(
            line,
            "/bin/run --flag=1 --count=-5 --ratio=1.500000 \
             --label=\"say \\\"hi\\\"\" --blob=TWFu \
             --where=[-75.000000,45.000000] --empty=[NULL]"
        );
    }

    #[test]
    fn unnamed_parameters_render_bare() {
        let params = vec![param("", Some(Value::String("arg".into())))];
        let line = render_command("echo", &params).unwrap();
        assert_eq!(line, "echo \"arg\"");
    }

    #[test]
    fn oversize_command_is_rejected() {
        let params = vec![param("data", Some(Value::String("x".repeat(8192))))];
        assert_eq!(
            render_command("run", &params),
            Err(Status::OutOfRange)
        );
    }

    #[test]
    fn request_parameter_round_trip() {
        let mut request = ActionRequest::new("demo", Some("unit-test")).unwrap();
        request.parameter_set("x", Value::Int32(3)).unwrap();
        assert_eq!(
            request.parameter_get("X", false, ValueType::Int32).unwrap(),
            Value::Int32(3)
        );
        assert_eq!(
            request.parameter_get("x", true, ValueType::Int64).unwrap(),
            Value::Int64(3)
        );
        assert_eq!(
            request.parameter_get("missing", false, ValueType::Int32),
            Err(Status::NotFound)
        );
    }

    #[test]
    fn request_rejects_bad_parameter_names() {
        let mut request = ActionRequest::new("demo", None).unwrap();
        assert_eq!(
            request.parameter_set("a=b", Value::Bool(true)),
            Err(Status::BadRequest)
        );
        assert_eq!(
            request.parameter_set("", Value::Bool(true)),
            Err(Status::BadParameter)
        );
    }
}
