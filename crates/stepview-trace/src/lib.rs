//! Step-by-step execution tracer.
//!
//! This crate provides:
//! - The heap/stack [`inspector`], which turns a suspended debug event into a
//!   cycle-safe [`Snapshot`].
//! - The per-run [`Controller`] state machine: event classification, step
//!   budget, stall detection, print buffering and terminal-step semantics.
//! - The [`TracerBroker`] command surface (`start`, `step`, `input`, `stop`)
//!   and the line-oriented front ends in [`repl`].

pub mod broker;
pub mod controller;
pub mod crash;
pub mod error;
pub mod hardening;
pub mod inspector;
pub mod model;
pub mod repl;
pub mod result;

use stepview_session::Program;

pub use crate::broker::TracerBroker;
pub use crate::controller::{Controller, ControllerState, InputQueue, StateCell};
pub use crate::error::{CommandError, CommandResult, InspectError, TraceError};
pub use crate::model::{
    ExceptionArgs, FrameLine, HeapGraph, Literal, ObjectKind, ObjectRecord, Snapshot, Step,
    StepEvent, Termination, Value,
};
pub use crate::result::{ResultKind, ResultPayload, ResultRecord};

/// Session script traced when the command line cannot be used.
pub const SAMPLE_SESSION: &str = include_str!("../res/sample-session.json");

pub fn sample_program() -> Program {
    Program::new("Sample", SAMPLE_SESSION)
}
