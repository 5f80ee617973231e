//! Shared types, errors, and the attempt/step model for the Proctor behaviour engine.
//!
//! This crate provides the foundational types used across the other Proctor crates:
//! - `ProctorError` — unified error taxonomy
//! - `AttemptState` — the interaction state enum and its active/finished partition
//! - `Decision` — the keep/discard verdict every event handler produces
//! - `Attempt` / `Step` — the append-only attempt history
//! - `ScorePolicy` — how out-of-range reported scores are normalised

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Unified error type for all Proctor subsystems.
#[derive(Debug, thiserror::Error)]
pub enum ProctorError {
    // === Collaborator failures (fatal to the triggering request) ===
    #[error("Record store failure: {0}")]
    Store(String),

    #[error("Grading dispatch failed for attempt {attempt}: {message}")]
    Dispatch { attempt: Uuid, message: String },

    #[error("Could not resolve response files for step {step}: {message}")]
    FileResolution { step: Uuid, message: String },

    // === Event ingestion ===
    #[error("Malformed event on step {step}: {message}")]
    MalformedEvent { step: Uuid, message: String },

    // === Score normalisation ===
    #[error("Reported score {score} outside [0, {max_mark}]")]
    ScoreOutOfRange { score: f64, max_mark: f64 },

    #[error("Attempt max mark {max_mark} is not positive; cannot normalise a score")]
    InvalidMaxMark { max_mark: f64 },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// A convenience alias for `Result<T, ProctorError>`.
pub type Result<T> = std::result::Result<T, ProctorError>;

// ---------------------------------------------------------------------------
// AttemptState — lifecycle state of a graded interaction
// ---------------------------------------------------------------------------

/// Tolerance used when mapping a fraction onto a graded state, matching the
/// source system's grade comparison threshold.
pub const FRACTION_EPSILON: f64 = 1e-6;

/// Lifecycle state of an attempt, as recorded on each kept step.
///
/// States partition into *active* (the response is still editable) and
/// *finished* (no further submit/finish events are accepted). `NotStarted`
/// belongs to neither set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    NotStarted,
    InProgress,
    Complete,
    Invalid,
    Finished,
    NeedsGrading,
    GaveUp,
    GradedWrong,
    GradedPartial,
    GradedRight,
}

impl AttemptState {
    /// The response can still be edited.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            AttemptState::InProgress | AttemptState::Complete | AttemptState::Invalid
        )
    }

    /// No further submit or finish events are accepted.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            AttemptState::Finished
                | AttemptState::NeedsGrading
                | AttemptState::GaveUp
                | AttemptState::GradedWrong
                | AttemptState::GradedPartial
                | AttemptState::GradedRight
        )
    }

    /// A grading result (automatic or manual) has been recorded.
    pub fn is_graded(self) -> bool {
        matches!(
            self,
            AttemptState::GradedWrong | AttemptState::GradedPartial | AttemptState::GradedRight
        )
    }

    /// Map a fraction in `[0, 1]` onto the graded state it deserves.
    pub fn graded_state_for(fraction: f64) -> AttemptState {
        if fraction < FRACTION_EPSILON {
            AttemptState::GradedWrong
        } else if fraction > 1.0 - FRACTION_EPSILON {
            AttemptState::GradedRight
        } else {
            AttemptState::GradedPartial
        }
    }
}

// ---------------------------------------------------------------------------
// Decision — keep or discard a pending step
// ---------------------------------------------------------------------------

/// The verdict an event handler returns for a pending step.
///
/// `Keep` appends the step permanently to the attempt history; `Discard`
/// drops the event with no state or score mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Keep,
    Discard,
}

impl Decision {
    pub fn is_keep(self) -> bool {
        self == Decision::Keep
    }
}

// ---------------------------------------------------------------------------
// ResponseData — named response variables
// ---------------------------------------------------------------------------

/// The student's submitted content: a mapping of named response variables to
/// values. Ordered so summaries are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseData(BTreeMap<String, String>);

impl ResponseData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty() || self.0.values().all(|v| v.trim().is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Overlay `other` onto `self`, later values winning.
    pub fn merge(&mut self, other: &ResponseData) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }
}

impl FromIterator<(String, String)> for ResponseData {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One file attached to a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl ResponseFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Step — one immutable recorded event in the attempt history
// ---------------------------------------------------------------------------

/// A manual grader comment, optionally carrying a mark override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub text: String,
    pub mark: Option<f64>,
}

/// One recorded event plus its resulting state within an attempt's history.
///
/// A step is created pending, filled in by exactly one event handler, and is
/// then either discarded or appended permanently. Kept steps are immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub state: AttemptState,
    pub fraction: Option<f64>,
    pub summary: Option<String>,
    pub response: ResponseData,
    pub files: Vec<ResponseFile>,
    pub comment: Option<Comment>,
    /// Idempotency flag for manual comments. A typed field, not a specially
    /// named variable: the separation from user-visible response data must be
    /// structural, not a naming convention.
    pub comment_applied: bool,
}

impl Step {
    /// Create a pending step awaiting its event handler.
    pub fn pending(id: Uuid) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            state: AttemptState::InProgress,
            fraction: None,
            summary: None,
            response: ResponseData::new(),
            files: Vec::new(),
            comment: None,
            comment_applied: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Attempt — the enclosing interaction
// ---------------------------------------------------------------------------

/// One student's ongoing or completed interaction with a question.
///
/// Owns the append-only step sequence exclusively; the attempt's current
/// state is always the state of its most recently kept step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub id: Uuid,
    /// Identifier of the enclosing attempt usage (the serialisation scope).
    pub usage_id: Uuid,
    /// Question slot within the usage.
    pub slot: u32,
    /// Maximum achievable mark; reported scores are normalised against this.
    pub max_mark: f64,
    steps: Vec<Step>,
}

impl Attempt {
    pub fn new(usage_id: Uuid, slot: u32, max_mark: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            usage_id,
            slot,
            max_mark,
            steps: Vec::new(),
        }
    }

    /// Current state: the last kept step's state, or `NotStarted`.
    pub fn state(&self) -> AttemptState {
        self.steps
            .last()
            .map(|s| s.state)
            .unwrap_or(AttemptState::NotStarted)
    }

    pub fn last_step(&self) -> Option<&Step> {
        self.steps.last()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Most recent recorded fraction, if any step carries one.
    pub fn fraction(&self) -> Option<f64> {
        self.steps.iter().rev().find_map(|s| s.fraction)
    }

    /// Append a kept step. Steps are immutable once applied.
    pub fn apply(&mut self, step: Step) {
        self.steps.push(step);
    }

    /// The full accumulated response: every kept step's response data
    /// overlaid in order, later steps winning.
    pub fn accumulated_response(&self) -> ResponseData {
        let mut merged = ResponseData::new();
        for step in &self.steps {
            merged.merge(&step.response);
        }
        merged
    }
}

// ---------------------------------------------------------------------------
// RegradeOverride — result record for an in-flight regrade review
// ---------------------------------------------------------------------------

/// Regrade review record keyed by (usage id, slot). Created by external
/// regrade tooling; the behaviour only ever updates the fraction on an
/// existing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegradeOverride {
    pub usage_id: Uuid,
    pub slot: u32,
    pub new_fraction: Option<f64>,
}

// ---------------------------------------------------------------------------
// ScorePolicy — normalising reported scores against the max mark
// ---------------------------------------------------------------------------

/// How a reported score outside `[0, max_mark]` is handled when computing
/// the fraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorePolicy {
    /// Confine the score to `[0, max_mark]` and log a warning.
    #[default]
    Clamp,
    /// Refuse out-of-range scores with [`ProctorError::ScoreOutOfRange`].
    Reject,
    /// Divide unconditionally, as the source system did.
    PassThrough,
}

impl ScorePolicy {
    /// Normalise `score` to a fraction of `max_mark` under this policy.
    pub fn normalise(self, score: f64, max_mark: f64) -> Result<f64> {
        if max_mark <= 0.0 {
            return Err(ProctorError::InvalidMaxMark { max_mark });
        }
        let in_range = (0.0..=max_mark).contains(&score);
        match self {
            ScorePolicy::Clamp => {
                if !in_range {
                    tracing::warn!(score, max_mark, "Reported score out of range, clamping");
                }
                Ok(score.clamp(0.0, max_mark) / max_mark)
            }
            ScorePolicy::Reject => {
                if !in_range {
                    return Err(ProctorError::ScoreOutOfRange { score, max_mark });
                }
                Ok(score / max_mark)
            }
            ScorePolicy::PassThrough => Ok(score / max_mark),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- error display ---

    #[test]
    fn error_display_store() {
        let err = ProctorError::Store("connection refused".into());
        assert_eq!(err.to_string(), "Record store failure: connection refused");
    }

    #[test]
    fn error_display_dispatch() {
        let id = Uuid::nil();
        let err = ProctorError::Dispatch {
            attempt: id,
            message: "backend gone".into(),
        };
        assert_eq!(
            err.to_string(),
            format!("Grading dispatch failed for attempt {id}: backend gone")
        );
    }

    #[test]
    fn error_display_score_out_of_range() {
        let err = ProctorError::ScoreOutOfRange {
            score: 12.0,
            max_mark: 10.0,
        };
        assert_eq!(err.to_string(), "Reported score 12 outside [0, 10]");
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ProctorError = io_err.into();
        assert!(matches!(err, ProctorError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: ProctorError = json_err.into();
        assert!(matches!(err, ProctorError::Json(_)));
    }

    // --- state partition ---

    #[test]
    fn active_states() {
        assert!(AttemptState::InProgress.is_active());
        assert!(AttemptState::Complete.is_active());
        assert!(AttemptState::Invalid.is_active());
        assert!(!AttemptState::NotStarted.is_active());
        assert!(!AttemptState::Finished.is_active());
    }

    #[test]
    fn finished_states() {
        for state in [
            AttemptState::Finished,
            AttemptState::NeedsGrading,
            AttemptState::GaveUp,
            AttemptState::GradedWrong,
            AttemptState::GradedPartial,
            AttemptState::GradedRight,
        ] {
            assert!(state.is_finished(), "{state:?} should be finished");
            assert!(!state.is_active(), "{state:?} should not be active");
        }
    }

    #[test]
    fn graded_states() {
        assert!(AttemptState::GradedWrong.is_graded());
        assert!(AttemptState::GradedPartial.is_graded());
        assert!(AttemptState::GradedRight.is_graded());
        assert!(!AttemptState::NeedsGrading.is_graded());
    }

    #[test]
    fn graded_state_for_thresholds() {
        assert_eq!(
            AttemptState::graded_state_for(0.0),
            AttemptState::GradedWrong
        );
        assert_eq!(
            AttemptState::graded_state_for(1.0),
            AttemptState::GradedRight
        );
        assert_eq!(
            AttemptState::graded_state_for(0.7),
            AttemptState::GradedPartial
        );
    }

    #[test]
    fn graded_state_for_tolerates_float_noise() {
        // A fraction computed as 7.0/10.0*10.0/7.0 style arithmetic can land
        // a hair off the boundary; the epsilon absorbs that.
        assert_eq!(
            AttemptState::graded_state_for(1.0 - 1e-9),
            AttemptState::GradedRight
        );
        assert_eq!(
            AttemptState::graded_state_for(1e-9),
            AttemptState::GradedWrong
        );
    }

    #[test]
    fn state_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_string(&AttemptState::NeedsGrading).unwrap(),
            "\"needs_grading\""
        );
        let state: AttemptState = serde_json::from_str("\"graded_partial\"").unwrap();
        assert_eq!(state, AttemptState::GradedPartial);
    }

    // --- decision ---

    #[test]
    fn decision_is_keep() {
        assert!(Decision::Keep.is_keep());
        assert!(!Decision::Discard.is_keep());
    }

    // --- response data ---

    #[test]
    fn response_data_set_get() {
        let mut data = ResponseData::new();
        data.set("answer", "42");
        assert_eq!(data.get("answer"), Some("42"));
        assert_eq!(data.get("missing"), None);
    }

    #[test]
    fn response_data_empty_when_all_blank() {
        let mut data = ResponseData::new();
        assert!(data.is_empty());
        data.set("answer", "   ");
        assert!(data.is_empty());
        data.set("answer", "x");
        assert!(!data.is_empty());
    }

    #[test]
    fn response_data_merge_later_wins() {
        let mut base = ResponseData::new();
        base.set("a", "1");
        base.set("b", "1");
        let mut overlay = ResponseData::new();
        overlay.set("b", "2");
        overlay.set("c", "3");
        base.merge(&overlay);
        assert_eq!(base.get("a"), Some("1"));
        assert_eq!(base.get("b"), Some("2"));
        assert_eq!(base.get("c"), Some("3"));
    }

    // --- attempt / step ---

    #[test]
    fn empty_attempt_is_not_started() {
        let attempt = Attempt::new(Uuid::new_v4(), 1, 10.0);
        assert_eq!(attempt.state(), AttemptState::NotStarted);
        assert!(attempt.last_step().is_none());
        assert!(attempt.fraction().is_none());
    }

    #[test]
    fn attempt_state_follows_last_step() {
        let mut attempt = Attempt::new(Uuid::new_v4(), 1, 10.0);
        let mut step = Step::pending(Uuid::new_v4());
        step.state = AttemptState::Complete;
        attempt.apply(step);
        assert_eq!(attempt.state(), AttemptState::Complete);

        let mut step = Step::pending(Uuid::new_v4());
        step.state = AttemptState::NeedsGrading;
        attempt.apply(step);
        assert_eq!(attempt.state(), AttemptState::NeedsGrading);
        assert_eq!(attempt.steps().len(), 2);
    }

    #[test]
    fn attempt_fraction_searches_back() {
        let mut attempt = Attempt::new(Uuid::new_v4(), 1, 10.0);
        let mut graded = Step::pending(Uuid::new_v4());
        graded.state = AttemptState::GradedPartial;
        graded.fraction = Some(0.7);
        attempt.apply(graded);

        // A later step without a fraction does not erase the recorded one.
        let mut ungraded = Step::pending(Uuid::new_v4());
        ungraded.state = AttemptState::NeedsGrading;
        attempt.apply(ungraded);

        assert_eq!(attempt.fraction(), Some(0.7));
    }

    #[test]
    fn accumulated_response_merges_in_order() {
        let mut attempt = Attempt::new(Uuid::new_v4(), 1, 10.0);
        let mut first = Step::pending(Uuid::new_v4());
        first.response.set("answer", "draft");
        first.response.set("language", "rust");
        attempt.apply(first);

        let mut second = Step::pending(Uuid::new_v4());
        second.response.set("answer", "final");
        attempt.apply(second);

        let merged = attempt.accumulated_response();
        assert_eq!(merged.get("answer"), Some("final"));
        assert_eq!(merged.get("language"), Some("rust"));
    }

    #[test]
    fn pending_step_defaults() {
        let id = Uuid::new_v4();
        let step = Step::pending(id);
        assert_eq!(step.id, id);
        assert_eq!(step.state, AttemptState::InProgress);
        assert!(step.fraction.is_none());
        assert!(step.summary.is_none());
        assert!(!step.comment_applied);
    }

    // --- score policy ---

    #[test]
    fn clamp_in_range_divides() {
        let fraction = ScorePolicy::Clamp.normalise(7.0, 10.0).unwrap();
        assert!((fraction - 0.7).abs() < 1e-12);
    }

    #[test]
    fn clamp_confines_out_of_range() {
        assert_eq!(ScorePolicy::Clamp.normalise(12.0, 10.0).unwrap(), 1.0);
        assert_eq!(ScorePolicy::Clamp.normalise(-3.0, 10.0).unwrap(), 0.0);
    }

    #[test]
    fn reject_refuses_out_of_range() {
        let err = ScorePolicy::Reject.normalise(12.0, 10.0).unwrap_err();
        assert!(matches!(err, ProctorError::ScoreOutOfRange { .. }));
        assert_eq!(ScorePolicy::Reject.normalise(10.0, 10.0).unwrap(), 1.0);
    }

    #[test]
    fn pass_through_divides_unconditionally() {
        let fraction = ScorePolicy::PassThrough.normalise(12.0, 10.0).unwrap();
        assert!((fraction - 1.2).abs() < 1e-12);
    }

    #[test]
    fn zero_max_mark_is_an_error() {
        for policy in [ScorePolicy::Clamp, ScorePolicy::Reject, ScorePolicy::PassThrough] {
            let err = policy.normalise(5.0, 0.0).unwrap_err();
            assert!(matches!(err, ProctorError::InvalidMaxMark { .. }));
        }
    }

    #[test]
    fn default_policy_is_clamp() {
        assert_eq!(ScorePolicy::default(), ScorePolicy::Clamp);
    }
}
