//! Typed attempt events and the ingestion boundary that produces them.
//!
//! Transports deliver a [`RawStep`]: a step identifier plus the named event
//! variables the source system records. [`AttemptEvent::classify`] turns a raw
//! step into exactly one tagged event, resolving ambiguity with a fixed
//! priority so routing is deterministic even for malformed input that carries
//! variables for several event kinds.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use proctor_types::{ProctorError, ResponseData, Result};

use crate::collaborators::FileSaver;

/// A step as delivered by the transport, before classification.
///
/// `vars` holds the behaviour-level event variables (`comment`, `submit`,
/// `finish`, `gradingresult`, `graderunavailable`, plus their payload
/// variables such as `score` and `gradeprocessid`); `response` holds the
/// student-visible response variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawStep {
    pub id: Uuid,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    #[serde(default)]
    pub response: ResponseData,
}

impl RawStep {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            vars: BTreeMap::new(),
            response: ResponseData::new(),
        }
    }

    pub fn has_var(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    fn required_uuid(&self, name: &str) -> Result<Uuid> {
        let raw = self.var(name).ok_or_else(|| ProctorError::MalformedEvent {
            step: self.id,
            message: format!("missing variable '{name}'"),
        })?;
        raw.parse().map_err(|_| ProctorError::MalformedEvent {
            step: self.id,
            message: format!("variable '{name}' is not a valid id: {raw}"),
        })
    }

    fn required_f64(&self, name: &str) -> Result<f64> {
        let raw = self.var(name).ok_or_else(|| ProctorError::MalformedEvent {
            step: self.id,
            message: format!("missing variable '{name}'"),
        })?;
        raw.parse().map_err(|_| ProctorError::MalformedEvent {
            step: self.id,
            message: format!("variable '{name}' is not numeric: {raw}"),
        })
    }

    fn optional_f64(&self, name: &str) -> Result<Option<f64>> {
        match self.var(name) {
            None => Ok(None),
            Some(_) => self.required_f64(name).map(Some),
        }
    }
}

/// One event for the attempt state machine, carrying only its own payload.
pub enum AttemptEvent {
    /// Manual grader comment, optionally overriding the mark.
    Comment { text: String, mark: Option<f64> },
    /// Explicit submission of the pending response. The file saver handle is
    /// only present on a live in-process submission; during a regrade replay
    /// it is gone and files are re-read from storage.
    Submit {
        response: ResponseData,
        saver: Option<Arc<dyn FileSaver>>,
    },
    /// Finish the attempt using whatever response was last saved.
    Finish,
    /// Asynchronous grading callback reporting a score for a dispatched job.
    GradingResult { job: Uuid, score: f64 },
    /// Asynchronous callback reporting the grading backend gave up.
    GraderUnavailable { job: Uuid },
    /// Autosave of in-progress response data.
    Save { response: ResponseData },
}

impl AttemptEvent {
    /// Classify a raw step into exactly one event.
    ///
    /// Priority when several event variables are present:
    /// comment > submit > finish > gradingresult > graderunavailable > save.
    pub fn classify(raw: &RawStep) -> Result<AttemptEvent> {
        if raw.has_var("comment") {
            Ok(AttemptEvent::Comment {
                text: raw.var("comment").unwrap_or_default().to_string(),
                mark: raw.optional_f64("mark")?,
            })
        } else if raw.has_var("submit") {
            Ok(AttemptEvent::Submit {
                response: raw.response.clone(),
                // A classified raw step never carries a live saver handle;
                // fresh submissions construct Submit directly.
                saver: None,
            })
        } else if raw.has_var("finish") {
            Ok(AttemptEvent::Finish)
        } else if raw.has_var("gradingresult") {
            Ok(AttemptEvent::GradingResult {
                job: raw.required_uuid("gradeprocessid")?,
                score: raw.required_f64("score")?,
            })
        } else if raw.has_var("graderunavailable") {
            Ok(AttemptEvent::GraderUnavailable {
                job: raw.required_uuid("gradeprocessid")?,
            })
        } else {
            Ok(AttemptEvent::Save {
                response: raw.response.clone(),
            })
        }
    }

    /// Short identifier of the event kind, for logging and step tables.
    pub fn kind(&self) -> &'static str {
        match self {
            AttemptEvent::Comment { .. } => "comment",
            AttemptEvent::Submit { .. } => "submit",
            AttemptEvent::Finish => "finish",
            AttemptEvent::GradingResult { .. } => "gradingresult",
            AttemptEvent::GraderUnavailable { .. } => "graderunavailable",
            AttemptEvent::Save { .. } => "save",
        }
    }
}

impl fmt::Debug for AttemptEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptEvent::Comment { text, mark } => f
                .debug_struct("Comment")
                .field("text", text)
                .field("mark", mark)
                .finish(),
            AttemptEvent::Submit { response, saver } => f
                .debug_struct("Submit")
                .field("response", response)
                .field("saver", &saver.as_ref().map(|_| "<live>"))
                .finish(),
            AttemptEvent::Finish => f.write_str("Finish"),
            AttemptEvent::GradingResult { job, score } => f
                .debug_struct("GradingResult")
                .field("job", job)
                .field("score", score)
                .finish(),
            AttemptEvent::GraderUnavailable { job } => f
                .debug_struct("GraderUnavailable")
                .field("job", job)
                .finish(),
            AttemptEvent::Save { response } => f
                .debug_struct("Save")
                .field("response", response)
                .finish(),
        }
    }
}
