use serde::Serialize;

use crate::model::{Step, StepEvent, Termination};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultKind {
    Line,
    Call,
    Return,
    Exception,
    Locked,
    Finished,
    Error,
}

impl ResultKind {
    pub fn of(step: &Step) -> Self {
        match &step.threw {
            Some(Termination::DebuggeeException { .. } | Termination::DebuggeeCrash { .. }) => {
                ResultKind::Exception
            }
            Some(Termination::Stall { .. }) => ResultKind::Locked,
            Some(Termination::StepBudgetExceeded { .. } | Termination::Internal { .. }) => {
                ResultKind::Error
            }
            None if step.finished => ResultKind::Finished,
            None => match step.event {
                Some(StepEvent::Call) => ResultKind::Call,
                Some(StepEvent::Return) => ResultKind::Return,
                Some(StepEvent::Exception) => ResultKind::Exception,
                Some(StepEvent::Line) | None => ResultKind::Line,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResultPayload {
    Step(Box<Step>),
    Error { cause: String },
}

/// One externally visible record: `{"result": KIND, "value": payload}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResultRecord {
    pub result: ResultKind,
    pub value: ResultPayload,
}

impl ResultRecord {
    pub fn error(cause: impl Into<String>) -> Self {
        Self {
            result: ResultKind::Error,
            value: ResultPayload::Error { cause: cause.into() },
        }
    }

    pub fn step(&self) -> Option<&Step> {
        match &self.value {
            ResultPayload::Step(step) => Some(&**step),
            ResultPayload::Error { .. } => None,
        }
    }

    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<Step> for ResultRecord {
    fn from(step: Step) -> Self {
        Self {
            result: ResultKind::of(&step),
            value: ResultPayload::Step(Box::new(step)),
        }
    }
}
