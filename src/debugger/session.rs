use std::fmt;

use tracing::{debug, error, info, warn};

use super::frames::{is_user_script, BacktraceExtractor};
use super::resolver::resolve;
use super::stepping::StepAction;
use crate::config::InspectorConfig;
use crate::error::{Error, Result};
use crate::protocol::{BreakEvent, Debugger, DebuggerEvent};
use crate::trace::{format_record, ReferenceParser, TraceEvent, TraceRecord, TraceSequence};

/// Lifecycle of a tracing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the protocol handshake.
    Attaching,
    /// Target executing.
    Running,
    /// Deciding whether the break is in user code.
    Breaking,
    /// Pulling bindings and resolving handles.
    Resolving,
    /// Something went wrong; logged, then the session carries on.
    Errored,
    /// Connection gone. Terminal.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attaching => write!(f, "attaching"),
            Self::Running => write!(f, "running"),
            Self::Breaking => write!(f, "breaking"),
            Self::Resolving => write!(f, "resolving"),
            Self::Errored => write!(f, "errored"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Drives the break → extract → step cycle and owns the trace it produces.
pub struct TraceSession<D, P> {
    debugger: D,
    parser: P,
    extractor: BacktraceExtractor,
    max_steps: Option<usize>,
    step_on_connect: bool,
    state: SessionState,
    traces: TraceSequence,
}

impl<D: Debugger, P: ReferenceParser> TraceSession<D, P> {
    pub fn new(debugger: D, parser: P, config: &InspectorConfig) -> Self {
        Self {
            debugger,
            parser,
            extractor: BacktraceExtractor::new(
                config.target_filename.clone(),
                config.excluded_arguments.clone(),
            ),
            max_steps: config.max_steps,
            step_on_connect: config.step_on_connect,
            state: SessionState::Attaching,
            traces: TraceSequence::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn traces(&self) -> &TraceSequence {
        &self.traces
    }

    /// Process events until the connection closes, then hand over the trace.
    pub fn run(mut self) -> TraceSequence {
        info!(script = %self.extractor.target_filename(), "tracing session started");
        while self.state != SessionState::Closed {
            let event = self.debugger.next_event();
            self.handle_event(event);
        }
        info!(records = self.traces.len(), "tracing session closed");
        self.traces
    }

    pub fn handle_event(&mut self, event: DebuggerEvent) {
        if self.state == SessionState::Closed {
            debug!(?event, "event after close ignored");
            return;
        }
        match event {
            DebuggerEvent::Connect => {
                info!("debugger connected");
                self.transition(SessionState::Running);
                if self.step_on_connect {
                    self.resume(Some(StepAction::In));
                }
            }
            DebuggerEvent::Break(brk) => {
                if self.state == SessionState::Attaching {
                    warn!("break before handshake; treating the session as connected");
                }
                self.on_break(brk);
            }
            DebuggerEvent::Exception(body) => {
                let resume_to = self.settled_state();
                self.transition(SessionState::Errored);
                warn!(exception = %body, "target raised an exception");
                self.transition(resume_to);
            }
            DebuggerEvent::Error(message) => {
                let resume_to = self.settled_state();
                self.transition(SessionState::Errored);
                error!(%message, "debugger transport error");
                self.transition(resume_to);
            }
            DebuggerEvent::Other(name) => debug!(event = %name, "ignoring event"),
            DebuggerEvent::Close => self.transition(SessionState::Closed),
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "state change");
            self.state = next;
        }
    }

    /// State to fall back to once an error has been logged. Mid-break states settle to running.
    fn settled_state(&self) -> SessionState {
        match self.state {
            SessionState::Attaching => SessionState::Attaching,
            _ => SessionState::Running,
        }
    }

    fn limit_reached(&self) -> bool {
        self.max_steps.is_some_and(|max| self.traces.len() >= max)
    }

    fn on_break(&mut self, brk: BreakEvent) {
        self.transition(SessionState::Breaking);
        let script = brk.script_name.as_deref().unwrap_or_default();
        debug!(script, line = ?brk.source_line, "break");

        if !is_user_script(script, self.extractor.target_filename()) {
            self.resume(Some(StepAction::Out));
            return;
        }

        if self.limit_reached() {
            debug!(records = self.traces.len(), "step limit reached; break not recorded");
            self.resume(None);
            return;
        }

        self.transition(SessionState::Resolving);
        match self.capture_step() {
            Ok(record) => {
                debug!(line = record.line, func = %record.func_name, "recorded step");
                self.traces.push(record);
            }
            Err(e) => {
                self.report(e);
                if self.state == SessionState::Closed {
                    return;
                }
            }
        }

        if self.limit_reached() {
            info!(records = self.traces.len(), "step limit reached; running to completion");
            self.resume(None);
        } else {
            self.resume(Some(StepAction::In));
        }
    }

    /// Backtrace, resolve and format the state at the current break.
    fn capture_step(&mut self) -> Result<TraceRecord> {
        let Self {
            debugger,
            parser,
            extractor,
            ..
        } = self;

        let backtrace = debugger.backtrace()?;
        let frames = backtrace.captured();
        let innermost = frames
            .first()
            .ok_or_else(|| Error::protocol("backtrace", "no frames captured"))?;

        let (variables, pending) = extractor.extract(frames);
        let store = resolve(
            pending,
            |handles| debugger.lookup(handles),
            |object| parser.extract_nested_refs(object),
        )?;

        Ok(format_record(
            &*parser,
            TraceEvent::StepLine,
            innermost,
            &variables,
            &store,
        ))
    }

    fn resume(&mut self, action: Option<StepAction>) {
        match self.debugger.continue_with(action) {
            Ok(()) => self.transition(SessionState::Running),
            Err(e) => self.report(e),
        }
    }

    fn report(&mut self, e: Error) {
        if e.is_fatal() {
            error!(error = %e, "lost the debugger connection");
            self.transition(SessionState::Closed);
        } else {
            let resume_to = self.settled_state();
            self.transition(SessionState::Errored);
            warn!(error = %e, "request failed");
            self.transition(resume_to);
        }
    }
}
