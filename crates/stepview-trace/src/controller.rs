//! The per-run state machine.
//!
//! A [`Controller`] owns one live [`DebugSession`] and turns its event stream
//! into [`Step`]s. It processes one event completely (classify, inspect, flush
//! prints) before the target is resumed again.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use stepview_config::TraceConfig;
use stepview_session::{
    DebugEvent, DebugSession, EventKind, EventPump, Pumped, SessionHooks, StallCause,
};
use tokio_util::sync::CancellationToken;

use crate::crash::parse_crash_report;
use crate::error::TraceError;
use crate::inspector;
use crate::model::{Step, StepEvent, Termination};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Running,
    Stepping,
    /// A step is blocked on an input request nobody has answered yet.
    AwaitingInput,
    Finished,
    Error,
    Stopped,
}

impl ControllerState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ControllerState::Finished | ControllerState::Error | ControllerState::Stopped
        )
    }
}

/// Shared view of a run's state, readable while a step is in flight.
///
/// `Stopped` is sticky: once set, later transitions are ignored.
#[derive(Clone, Debug)]
pub struct StateCell(Arc<Mutex<ControllerState>>);

impl StateCell {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(ControllerState::Idle)))
    }

    pub fn get(&self) -> ControllerState {
        *self.0.lock()
    }

    pub fn set(&self, state: ControllerState) {
        let mut current = self.0.lock();
        if *current != ControllerState::Stopped {
            *current = state;
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Input supplied by the caller, shared with the run that consumes it.
#[derive(Clone, Debug, Default)]
pub struct InputQueue(Arc<Mutex<VecDeque<String>>>);

impl InputQueue {
    pub fn push(&self, text: impl Into<String>) {
        self.0.lock().push_back(text.into());
    }

    /// Everything queued so far, concatenated, or `None` if nothing is queued.
    pub fn take(&self) -> Option<String> {
        let mut queue = self.0.lock();
        if queue.is_empty() {
            return None;
        }
        Some(queue.drain(..).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/// Print cache and input plumbing handed to the [`EventPump`].
struct RunBuffers {
    prints: Vec<String>,
    input: InputQueue,
    state: StateCell,
}

impl SessionHooks for RunBuffers {
    fn on_input(&mut self) -> Option<String> {
        let text = self.input.take();
        if text.is_some() {
            self.state.set(ControllerState::Stepping);
        } else {
            self.state.set(ControllerState::AwaitingInput);
        }
        text
    }

    fn on_print(&mut self, text: String) {
        self.prints.push(text);
    }

    fn on_stall(&mut self, cause: StallCause) {
        tracing::debug!(target: "stepview.trace", cause = cause.describe(), "run stalled");
    }
}

pub struct Controller<S> {
    session: S,
    pump: EventPump,
    buffers: RunBuffers,
    config: TraceConfig,
    steps_taken: usize,
    resume_pending: bool,
    last_step: Option<Step>,
    state: StateCell,
}

impl<S: DebugSession> Controller<S> {
    pub fn new(
        session: S,
        config: TraceConfig,
        input: InputQueue,
        cancel: CancellationToken,
        state: StateCell,
    ) -> Self {
        let pump = EventPump::new(config.quiescence_timeout(), config.poll_interval(), cancel);
        Self {
            session,
            pump,
            buffers: RunBuffers {
                prints: Vec::new(),
                input,
                state: state.clone(),
            },
            config,
            steps_taken: 0,
            resume_pending: false,
            last_step: None,
            state,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state.get()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Advance by up to `n` steps. Fewer are returned if the run ends (the last
    /// one is then the terminal step) or is cancelled.
    pub fn advance(&mut self, n: usize) -> Vec<Step> {
        let mut steps = Vec::new();
        while steps.len() < n && !self.is_terminal() {
            self.state.set(ControllerState::Stepping);
            let step = match self.next_step() {
                Ok(Some(step)) => step,
                Ok(None) => {
                    self.state.set(ControllerState::Stopped);
                    break;
                }
                Err(err) => self.internal_failure(err),
            };

            if step.finished {
                let state = match step.threw {
                    Some(Termination::Internal { .. }) => ControllerState::Error,
                    _ => ControllerState::Finished,
                };
                self.state.set(state);
                self.shutdown();
            } else {
                self.state.set(ControllerState::Running);
            }
            steps.push(step);
        }
        steps
    }

    /// Terminate the session. Failures are logged and otherwise ignored.
    pub fn shutdown(&mut self) {
        if let Err(err) = self.session.terminate() {
            tracing::debug!(target: "stepview.trace", error = %err, "session teardown failed");
        }
    }

    fn next_step(&mut self) -> Result<Option<Step>, TraceError> {
        loop {
            if self.resume_pending {
                self.session.resume()?;
                self.resume_pending = false;
            }

            let event = match self.pump.next(&mut self.session, &mut self.buffers)? {
                Pumped::Event(event) => event,
                Pumped::Stalled(cause) => {
                    return Ok(Some(self.aborted(Termination::Stall { cause })));
                }
                Pumped::Cancelled => return Ok(None),
            };
            self.resume_pending = true;
            tracing::trace!(target: "stepview.trace", %event, "debug event");

            if let Some(step) = self.handle(event)? {
                return Ok(Some(step));
            }
        }
    }

    /// Turn one event into a step, or `None` if it is only drained.
    fn handle(&mut self, event: DebugEvent) -> Result<Option<Step>, TraceError> {
        if event.kind.is_lifecycle() && !self.buffers.prints.is_empty() {
            if let Some(report) = parse_crash_report(&self.buffers.prints.concat()) {
                tracing::debug!(
                    target: "stepview.trace",
                    exception = %report.type_name,
                    "uncaught exception reported on output"
                );
                return Ok(Some(self.aborted(Termination::DebuggeeCrash {
                    type_name: report.type_name,
                    traceback: report.traceback,
                })));
            }
        }

        let on_primary = event.is_on_thread(&self.config.primary_thread);
        match event.kind {
            EventKind::VmDeath | EventKind::VmDisconnect => return Ok(Some(self.completion())),
            EventKind::ThreadDeath if on_primary => return Ok(Some(self.completion())),
            ref kind if kind.is_locatable() && on_primary => {}
            _ => return Ok(None),
        }

        self.steps_taken += 1;
        if self.steps_taken > self.config.max_steps {
            return Ok(Some(self.aborted(Termination::StepBudgetExceeded {
                max_steps: self.config.max_steps,
            })));
        }

        let snapshot = inspector::inspect(&mut self.session, &event)?;
        let (event_kind, args, threw) = match event.kind {
            EventKind::MethodEntry => (StepEvent::Call, None, None),
            EventKind::MethodExit => (StepEvent::Return, None, None),
            EventKind::Exception { exception } => {
                let args = inspector::exception_args(&mut self.session, exception)?;
                let threw = Termination::DebuggeeException {
                    type_name: args.type_name.clone(),
                    message: args.message.clone(),
                };
                (StepEvent::Exception, Some(args), Some(threw))
            }
            _ => (StepEvent::Line, None, None),
        };

        let step = Step {
            event: Some(event_kind),
            line: snapshot.stack_lines.last().map(|frame| frame.line),
            args,
            snapshot: Some(snapshot),
            prints: self.take_prints(),
            finished: threw.is_some(),
            threw,
        };
        self.last_step = Some(step.clone());
        Ok(Some(step))
    }

    /// Normal end of the run. The last snapshot is repeated as a `return`.
    fn completion(&mut self) -> Step {
        let prints = self.take_prints();
        let (line, snapshot) = match self.last_step.take() {
            Some(previous) => (previous.line, previous.snapshot),
            None => (None, None),
        };
        Step {
            event: Some(StepEvent::Return),
            line,
            args: None,
            snapshot,
            prints,
            finished: true,
            threw: None,
        }
    }

    fn aborted(&mut self, threw: Termination) -> Step {
        tracing::debug!(target: "stepview.trace", cause = %threw, "run aborted");
        Step::aborted(threw, self.take_prints())
    }

    fn internal_failure(&mut self, err: TraceError) -> Step {
        tracing::warn!(target: "stepview.trace", error = %err, "run failed");
        self.aborted(Termination::Internal {
            type_name: err.type_name().to_string(),
            message: err.to_string(),
        })
    }

    fn take_prints(&mut self) -> Vec<String> {
        std::mem::take(&mut self.buffers.prints)
    }
}
