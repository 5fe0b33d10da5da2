//! The command surface: `start`, `step`, `input` and `stop` over one run.
//!
//! Every method takes `&self`, so a [`TracerBroker`] can sit in an `Arc` and be
//! driven from several tasks. `step` holds the run lock for as long as the
//! target takes; `input` and `stop` never wait on it.

use std::sync::Arc;

use parking_lot::Mutex;
use stepview_config::TraceConfig;
use stepview_session::{DebugSession, Launcher, Program, Terminate};
use tokio_util::sync::CancellationToken;

use crate::controller::{Controller, ControllerState, InputQueue, StateCell};
use crate::error::{CommandError, CommandResult};
use crate::result::ResultRecord;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Created,
    Started,
    Finished,
    Stopped,
}

pub struct TracerBroker<L: Launcher> {
    launcher: L,
    program: Program,
    config: TraceConfig,
    input: InputQueue,
    cancel: CancellationToken,
    state: StateCell,
    phase: Mutex<Phase>,
    run: Mutex<Option<Controller<L::Session>>>,
    terminator: Mutex<Option<Arc<dyn Terminate>>>,
}

impl<L: Launcher> TracerBroker<L> {
    pub fn new(launcher: L, program: Program, config: TraceConfig) -> Self {
        Self {
            launcher,
            program,
            config,
            input: InputQueue::default(),
            cancel: CancellationToken::new(),
            state: StateCell::new(),
            phase: Mutex::new(Phase::Created),
            run: Mutex::new(None),
            terminator: Mutex::new(None),
        }
    }

    /// Current run state. Readable while a step is in flight.
    pub fn state(&self) -> ControllerState {
        self.state.get()
    }

    /// Launch the program and advance to the first step.
    ///
    /// A launch failure (including a compile failure) is not an error of the
    /// call: it comes back as a single `ERROR` record and the run is over.
    pub fn start(&self) -> CommandResult<Vec<ResultRecord>> {
        {
            let mut phase = self.phase.lock();
            match *phase {
                Phase::Created => *phase = Phase::Started,
                Phase::Stopped => return Err(CommandError::InvalidState("tracer stopped")),
                Phase::Started | Phase::Finished => {
                    return Err(CommandError::InvalidState("tracer already started"))
                }
            }
        }

        let session = match self.launcher.launch(&self.program) {
            Ok(session) => session,
            Err(err) => {
                tracing::info!(
                    target: "stepview.broker",
                    program = %self.program.name,
                    error = %err,
                    "launch failed"
                );
                self.finish();
                self.state.set(ControllerState::Error);
                return Ok(vec![ResultRecord::error(err.to_string())]);
            }
        };
        tracing::debug!(target: "stepview.broker", program = %self.program.name, "session launched");

        *self.terminator.lock() = Some(session.terminator());
        *self.run.lock() = Some(Controller::new(
            session,
            self.config.clone(),
            self.input.clone(),
            self.cancel.clone(),
            self.state.clone(),
        ));
        self.advance(1)
    }

    /// Advance `n` more steps.
    pub fn step(&self, n: usize) -> CommandResult<Vec<ResultRecord>> {
        if n == 0 {
            return Err(CommandError::InvalidArgument(
                "step count must be at least 1".to_string(),
            ));
        }
        match *self.phase.lock() {
            Phase::Started => {}
            Phase::Created => return Err(CommandError::InvalidState("tracer not started")),
            Phase::Finished => return Err(CommandError::InvalidState("tracer finished")),
            Phase::Stopped => return Err(CommandError::InvalidState("tracer stopped")),
        }
        self.advance(n)
    }

    /// Queue `text` for the program's next read of standard input.
    pub fn input(&self, text: impl Into<String>) -> CommandResult<()> {
        if *self.phase.lock() == Phase::Stopped {
            return Err(CommandError::InvalidState("tracer stopped"));
        }
        self.input.push(text);
        Ok(())
    }

    /// Tear the run down. Idempotent, never fails, safe during a step.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.phase.lock(), Phase::Stopped);
        self.state.set(ControllerState::Stopped);
        self.cancel.cancel();

        if let Some(terminator) = self.terminator.lock().take() {
            if let Err(err) = terminator.terminate() {
                tracing::debug!(target: "stepview.broker", error = %err, "terminate failed");
            }
        }
        // A step in flight owns the run lock and shuts the session down itself
        // once it notices the cancellation.
        if let Some(mut run) = self.run.try_lock() {
            if let Some(mut controller) = run.take() {
                controller.shutdown();
            }
        }
        if previous != Phase::Stopped {
            tracing::debug!(target: "stepview.broker", ?previous, "tracer stopped");
        }
    }

    fn advance(&self, n: usize) -> CommandResult<Vec<ResultRecord>> {
        let mut run = self.run.lock();
        let Some(controller) = run.as_mut() else {
            return Err(CommandError::InvalidState("tracer stopped"));
        };

        let steps = controller.advance(n);
        if controller.is_terminal() || self.cancel.is_cancelled() {
            controller.shutdown();
            *run = None;
            self.finish();
        }
        Ok(steps.into_iter().map(ResultRecord::from).collect())
    }

    fn finish(&self) {
        let mut phase = self.phase.lock();
        if *phase != Phase::Stopped {
            *phase = Phase::Finished;
        }
        self.terminator.lock().take();
    }
}

impl<L: Launcher> Drop for TracerBroker<L> {
    fn drop(&mut self) {
        if let Some(controller) = self.run.get_mut().as_mut() {
            controller.shutdown();
        }
    }
}
