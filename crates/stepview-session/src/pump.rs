use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::{DebugEvent, DebugSession, SessionError, SessionSignal};

/// Stand-in deadline for windows too large to add to an `Instant`.
const UNBOUNDED_WINDOW: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Callbacks the [`EventPump`] invokes while it waits for the next event.
pub trait SessionHooks {
    /// Text to deliver to a target blocked on standard input. Returning `None`
    /// leaves the request outstanding; it is asked again on the next slice.
    fn on_input(&mut self) -> Option<String>;

    /// A chunk of stdout/stderr text, in arrival order.
    fn on_print(&mut self, text: String);

    /// No event arrived within the quiescence window.
    fn on_stall(&mut self, cause: StallCause);
}

/// Best guess at why the target went quiet. The two are indistinguishable from
/// outside the VM; an unanswered input request is the only hint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StallCause {
    AwaitingInput,
    SlowCall,
}

impl StallCause {
    pub fn describe(self) -> &'static str {
        match self {
            StallCause::AwaitingInput => "program requires input",
            StallCause::SlowCall => "program requires input or slow function call",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Pumped {
    Event(DebugEvent),
    Stalled(StallCause),
    Cancelled,
}

/// Waits on a [`DebugSession`] one event at a time, forwarding output and
/// input through [`SessionHooks`].
pub struct EventPump {
    quiescence: Duration,
    poll_interval: Duration,
    cancel: CancellationToken,
    input_outstanding: bool,
}

impl EventPump {
    pub fn new(quiescence: Duration, poll_interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            quiescence,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            cancel,
            input_outstanding: false,
        }
    }

    /// True while the target has asked for input that has not been supplied.
    pub fn is_awaiting_input(&self) -> bool {
        self.input_outstanding
    }

    /// Block until the next event, a stall, or cancellation.
    ///
    /// Output produced before an event is handed to [`SessionHooks::on_print`]
    /// before the event is returned.
    pub fn next<S, H>(&mut self, session: &mut S, hooks: &mut H) -> Result<Pumped, SessionError>
    where
        S: DebugSession + ?Sized,
        H: SessionHooks + ?Sized,
    {
        let deadline = quiescence_deadline(Instant::now(), self.quiescence);
        loop {
            if self.cancel.is_cancelled() {
                return Ok(Pumped::Cancelled);
            }
            self.feed_input(session, hooks)?;

            let now = Instant::now();
            if now >= deadline {
                self.drain_output(session, hooks)?;
                let cause = if self.input_outstanding {
                    StallCause::AwaitingInput
                } else {
                    StallCause::SlowCall
                };
                tracing::debug!(
                    target: "stepview.session",
                    ?cause,
                    window_ms = self.quiescence.as_millis() as u64,
                    "no debug event within quiescence window"
                );
                hooks.on_stall(cause);
                return Ok(Pumped::Stalled(cause));
            }

            let slice = self.poll_interval.min(deadline - now);
            let signal = match session.poll(slice) {
                Ok(signal) => signal,
                Err(_) if self.cancel.is_cancelled() => return Ok(Pumped::Cancelled),
                Err(err) => return Err(err),
            };
            match signal {
                Some(SessionSignal::Event(event)) => {
                    self.drain_output(session, hooks)?;
                    return Ok(Pumped::Event(event));
                }
                Some(SessionSignal::InputRequested) => {
                    tracing::trace!(target: "stepview.session", "target requested input");
                    self.input_outstanding = true;
                }
                None => self.drain_output(session, hooks)?,
            }
        }
    }

    fn feed_input<S, H>(&mut self, session: &mut S, hooks: &mut H) -> Result<(), SessionError>
    where
        S: DebugSession + ?Sized,
        H: SessionHooks + ?Sized,
    {
        if !self.input_outstanding {
            return Ok(());
        }
        if let Some(text) = hooks.on_input() {
            session.write_input(&text)?;
            self.input_outstanding = false;
        }
        Ok(())
    }

    fn drain_output<S, H>(&mut self, session: &mut S, hooks: &mut H) -> Result<(), SessionError>
    where
        S: DebugSession + ?Sized,
        H: SessionHooks + ?Sized,
    {
        let text = session.read_output()?;
        if !text.is_empty() {
            hooks.on_print(text);
        }
        Ok(())
    }
}

fn quiescence_deadline(now: Instant, window: Duration) -> Instant {
    now.checked_add(window)
        .or_else(|| now.checked_add(UNBOUNDED_WINDOW))
        .unwrap_or(now)
}
