//! Records produced by one traced run.
//!
//! Everything here is plain data. A [`Step`] owns its [`Snapshot`] outright, so
//! nothing is shared between steps once they leave the controller.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use stepview_session::{ObjectId, StallCause};

/// A scalar read out of the target.
///
/// Non-finite floats serialise as the strings `"NaN"`, `"Infinity"` and
/// `"-Infinity"`, since JSON has no literal for them.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Boolean(bool),
    Char(char),
    Int(i64),
    Float(f64),
}

impl Serialize for Literal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            Literal::Boolean(value) => serializer.serialize_bool(value),
            Literal::Char(value) => serializer.serialize_char(value),
            Literal::Int(value) => serializer.serialize_i64(value),
            Literal::Float(value) if value.is_nan() => serializer.serialize_str("NaN"),
            Literal::Float(value) if value.is_infinite() => {
                serializer.serialize_str(if value > 0.0 { "Infinity" } else { "-Infinity" })
            }
            Literal::Float(value) => serializer.serialize_f64(value),
        }
    }
}

/// Any resolved program value.
///
/// Serialises compactly: `null`, the bare literal, the quoted string text, or a
/// one-element array holding the referenced object id.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Primitive(Literal),
    /// String contents, rendered with surrounding double quotes.
    StringLiteral(String),
    Reference(ObjectId),
}

impl Value {
    pub fn string(text: &str) -> Self {
        Value::StringLiteral(format!("\"{text}\""))
    }

    pub fn int(value: i64) -> Self {
        Value::Primitive(Literal::Int(value))
    }

    pub fn as_reference(&self) -> Option<ObjectId> {
        match self {
            Value::Reference(id) => Some(*id),
            _ => None,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Primitive(literal) => literal.serialize(serializer),
            Value::StringLiteral(text) => serializer.serialize_str(text),
            Value::Reference(id) => {
                let mut seq = serializer.serialize_seq(Some(1))?;
                seq.serialize_element(id)?;
                seq.end()
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    List,
    Set,
    Map,
    UserObject,
    Opaque,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ObjectRecord {
    pub kind: ObjectKind,
    #[serde(rename = "type")]
    pub language_type: String,
    /// Index/field/key to value, in enumeration order.
    pub members: Vec<(Value, Value)>,
}

/// Objects reachable from one step's stack, keyed by object id.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct HeapGraph(BTreeMap<ObjectId, ObjectRecord>);

impl HeapGraph {
    pub fn get(&self, id: ObjectId) -> Option<&ObjectRecord> {
        self.0.get(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.0.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &ObjectRecord)> {
        self.0.iter().map(|(id, record)| (*id, record))
    }

    pub(crate) fn insert(&mut self, id: ObjectId, record: ObjectRecord) {
        self.0.insert(id, record);
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameLine {
    pub name: String,
    /// 0-based.
    pub line: u32,
}

/// Stack and heap at one suspended event.
///
/// `stack_lines` and `stack_references` are ordered outermost frame first and
/// have the same length.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub stack_lines: Vec<FrameLine>,
    pub stack_references: Vec<Vec<(String, Value)>>,
    pub heap_graph: HeapGraph,
    pub user_classes: BTreeSet<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepEvent {
    Call,
    Return,
    Line,
    Exception,
}

/// Type and message of an exception raised through the debug protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExceptionArgs {
    #[serde(rename = "type")]
    pub type_name: String,
    pub message: Option<String>,
}

/// Why a run ended, when it did not simply complete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    StepBudgetExceeded { max_steps: usize },
    Stall { cause: StallCause },
    DebuggeeException { type_name: String, message: Option<String> },
    DebuggeeCrash { type_name: String, traceback: String },
    Internal { type_name: String, message: String },
}

impl Termination {
    fn reason(&self) -> &'static str {
        match self {
            Termination::StepBudgetExceeded { .. } => "step_budget_exceeded",
            Termination::Stall { .. } => "stall",
            Termination::DebuggeeException { .. } => "debuggee_exception",
            Termination::DebuggeeCrash { .. } => "debuggee_crash",
            Termination::Internal { .. } => "internal",
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::StepBudgetExceeded { max_steps } => {
                write!(f, "reached maximum step: {max_steps}")
            }
            Termination::Stall { cause } => f.write_str(cause.describe()),
            Termination::DebuggeeException { type_name, message: Some(message) } => {
                write!(f, "{type_name}: {message}")
            }
            Termination::DebuggeeException { type_name, message: None } => f.write_str(type_name),
            Termination::DebuggeeCrash { type_name, .. } => f.write_str(type_name),
            Termination::Internal { type_name, message } => write!(f, "{type_name}: {message}"),
        }
    }
}

#[derive(Serialize)]
struct ThrownException<'a> {
    #[serde(rename = "type")]
    type_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    traceback: Option<&'a str>,
}

impl Serialize for Termination {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("reason", self.reason())?;
        match self {
            Termination::StepBudgetExceeded { .. } | Termination::Stall { .. } => {
                map.serialize_entry("cause", &self.to_string())?;
            }
            Termination::DebuggeeException { type_name, message } => {
                let thrown = ThrownException {
                    type_name,
                    message: message.as_deref(),
                    traceback: None,
                };
                map.serialize_entry("exception", &thrown)?;
            }
            Termination::DebuggeeCrash { type_name, traceback } => {
                let thrown = ThrownException {
                    type_name,
                    message: None,
                    traceback: Some(traceback.as_str()),
                };
                map.serialize_entry("exception", &thrown)?;
            }
            Termination::Internal { type_name, message } => {
                let thrown = ThrownException {
                    type_name,
                    message: None,
                    traceback: Some(message.as_str()),
                };
                map.serialize_entry("exception", &thrown)?;
            }
        }
        map.end()
    }
}

/// One unit of the visible trace.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Step {
    pub event: Option<StepEvent>,
    /// 0-based line of the innermost frame.
    pub line: Option<u32>,
    pub args: Option<ExceptionArgs>,
    #[serde(flatten)]
    pub snapshot: Option<Snapshot>,
    pub prints: Vec<String>,
    pub finished: bool,
    /// Set on a terminal step unless the run completed normally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threw: Option<Termination>,
}

impl Step {
    /// Terminal step that carries no snapshot.
    pub(crate) fn aborted(threw: Termination, prints: Vec<String>) -> Self {
        Step {
            event: None,
            line: None,
            args: None,
            snapshot: None,
            prints,
            finished: true,
            threw: Some(threw),
        }
    }

    pub fn is_completion(&self) -> bool {
        self.finished && self.threw.is_none()
    }
}
