//! Debug Session boundary for stepview.
//!
//! `stepview-trace` drives a traced program through the [`DebugSession`] trait
//! defined here. The trait mirrors what a JDI-style debugger exposes: a live
//! event stream, per-thread stack frames, frame-local values, object fields and
//! remote invocation of no-argument methods on a suspended target.
//!
//! Launching and attaching to a real VM is not part of this crate. The
//! [`ScriptedSession`] is a deterministic, in-memory implementation used by the
//! test suites and by the `stepview` binary's replay launcher.

mod pump;
mod scripted;

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use pump::{EventPump, Pumped, SessionHooks, StallCause};
pub use scripted::{
    MockFrame, MockObject, ReplayLauncher, ScriptItem, ScriptedEvent, ScriptedSession,
    SessionScript,
};

pub type ThreadId = u64;
pub type FrameId = u64;
pub type ObjectId = u64;

/// A raw value read out of the suspended target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteValue {
    Null,
    Boolean(bool),
    Byte(i8),
    Char(char),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Object(ObjectId),
}

impl RemoteValue {
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            Self::Object(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeCategory {
    Class,
    Array,
    String,
}

/// Where a reference type was declared.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeOrigin {
    /// Compiled from the traced program's own sources.
    Program,
    #[default]
    Library,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceTypeInfo {
    pub name: String,
    pub category: TypeCategory,
    /// Every superclass and implemented interface, transitively.
    #[serde(default)]
    pub supertypes: Vec<String>,
    #[serde(default)]
    pub origin: TypeOrigin,
}

impl ReferenceTypeInfo {
    pub fn is_subtype_of(&self, name: &str) -> bool {
        self.name == name || self.supertypes.iter().any(|s| s == name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub method: String,
    /// Source line from debug info (1-based).
    pub line: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    pub id: FrameId,
    pub location: Location,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EventKind {
    VmStart,
    VmDeath,
    VmDisconnect,
    ThreadStart,
    ThreadDeath,
    ClassPrepare,
    MethodEntry,
    MethodExit,
    Step,
    Breakpoint,
    Exception { exception: ObjectId },
}

impl EventKind {
    /// VM and thread lifecycle boundaries.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::VmStart | Self::VmDeath | Self::VmDisconnect | Self::ThreadStart | Self::ThreadDeath
        )
    }

    /// Events that carry a code location on a suspended thread.
    pub fn is_locatable(&self) -> bool {
        matches!(
            self,
            Self::MethodEntry | Self::MethodExit | Self::Step | Self::Breakpoint | Self::Exception { .. }
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugEvent {
    #[serde(flatten)]
    pub kind: EventKind,
    #[serde(default)]
    pub thread: Option<ThreadInfo>,
    #[serde(default)]
    pub location: Option<Location>,
}

impl DebugEvent {
    pub fn is_on_thread(&self, name: &str) -> bool {
        self.thread.as_ref().is_some_and(|t| t.name == name)
    }
}

impl fmt::Display for DebugEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(thread) = &self.thread {
            write!(f, " on {}", thread.name)?;
        }
        if let Some(location) = &self.location {
            write!(f, " at {}:{}", location.method, location.line)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionSignal {
    Event(DebugEvent),
    /// The target blocked reading standard input.
    InputRequested,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("debug session disconnected")]
    Disconnected,
    #[error("debug session was terminated")]
    Terminated,
    #[error("absent debug information for `{method}`")]
    AbsentInformation { method: String },
    #[error("invalid frame id {0}")]
    InvalidFrame(FrameId),
    #[error("invalid object id {0}")]
    InvalidObjectId(ObjectId),
    #[error("invalid thread id {0}")]
    InvalidThread(ThreadId),
    #[error("remote invocation of `{method}` failed: {message}")]
    InvocationFailed { method: String, message: String },
    #[error("debug protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("compilation failed:\n{diagnostics}")]
    Compile { diagnostics: String },
    #[error("invalid program: {0}")]
    InvalidProgram(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// A program to be traced: a main type name and its source body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program {
    pub name: String,
    pub source: String,
}

impl Program {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }
}

/// Thread-safe handle that force-terminates a session from outside the
/// thread currently driving it.
pub trait Terminate: Send + Sync {
    fn terminate(&self) -> Result<(), SessionError>;
}

/// Live introspection of a traced program.
///
/// All frame and object accessors require the target to be suspended. Remote
/// invocation resumes the target thread for the duration of the call, which can
/// invalidate frame handles obtained before the call.
pub trait DebugSession: Send {
    /// Wait up to `timeout` for the next event or input request.
    fn poll(&mut self, timeout: Duration) -> Result<Option<SessionSignal>, SessionError>;

    fn resume(&mut self) -> Result<(), SessionError>;
    /// Pause a running target. Every event already arrives suspended, so the
    /// tracer never calls this while stepping. It is here for hosts that attach
    /// to a free-running target and need it stopped before inspection.
    fn suspend(&mut self) -> Result<(), SessionError>;

    /// Active frames of `thread`, innermost first.
    fn stack_frames(&mut self, thread: ThreadId) -> Result<Vec<FrameInfo>, SessionError>;
    fn visible_variable_names(&mut self, frame: FrameId) -> Result<Vec<String>, SessionError>;
    fn values(&mut self, frame: FrameId, names: &[String]) -> Result<Vec<RemoteValue>, SessionError>;

    fn reference_type(&mut self, object: ObjectId) -> Result<ReferenceTypeInfo, SessionError>;
    /// Instance fields, inherited ones included, in declaration order.
    fn fields(&mut self, object: ObjectId) -> Result<Vec<(String, RemoteValue)>, SessionError>;
    fn string_value(&mut self, object: ObjectId) -> Result<String, SessionError>;
    fn array_values(&mut self, object: ObjectId) -> Result<Vec<RemoteValue>, SessionError>;
    fn invoke_no_arg(
        &mut self,
        thread: ThreadId,
        object: ObjectId,
        method: &str,
    ) -> Result<RemoteValue, SessionError>;

    fn write_input(&mut self, text: &str) -> Result<(), SessionError>;
    /// Text written to stdout/stderr since the previous call.
    fn read_output(&mut self) -> Result<String, SessionError>;
    fn terminate(&mut self) -> Result<(), SessionError>;
    fn terminator(&self) -> Arc<dyn Terminate>;
}

/// Starts a [`DebugSession`] for a [`Program`].
pub trait Launcher: Send + Sync {
    type Session: DebugSession + 'static;

    fn launch(&self, program: &Program) -> Result<Self::Session, LaunchError>;
}
