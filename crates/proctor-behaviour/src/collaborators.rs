//! Collaborator traits the behaviour is built against, plus built-in
//! implementations for simple questions and scripted grading.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use proctor_types::{
    Attempt, AttemptState, RegradeOverride, ResponseData, ResponseFile, Result,
};

// ---------------------------------------------------------------------------
// RecordStore
// ---------------------------------------------------------------------------

/// Existence checks and updates over grading-job and regrade records.
///
/// The `job_exists` check is the regrade-safety guard: it must be read with
/// at least the same consistency as the write that revoked the job, or a
/// just-superseded job can still appear live.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// True iff the grading job is still the authoritative one for its step.
    async fn job_exists(&self, job: Uuid) -> Result<bool>;

    /// True iff a manual comment step with this id was already processed.
    async fn comment_applied(&self, step_id: Uuid) -> Result<bool>;

    /// Current regrade override record for (usage, slot), if one exists.
    async fn regrade_override(&self, usage_id: Uuid, slot: u32) -> Result<Option<RegradeOverride>>;

    /// Persist a new fraction onto an existing override record.
    async fn update_override(&self, record: &RegradeOverride) -> Result<()>;
}

// ---------------------------------------------------------------------------
// GradingDispatcher
// ---------------------------------------------------------------------------

/// Starts asynchronous grading for a response.
///
/// Fire-and-forget from the behaviour's perspective: the returned state is
/// either a placeholder (`NeedsGrading`) while grading happens out of
/// process, or an immediate graded state when the backend short-circuits
/// synchronously. The eventual result arrives later as a separate event.
#[async_trait]
pub trait GradingDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        attempt: &Attempt,
        response: &ResponseData,
        files: &[ResponseFile],
    ) -> Result<AttemptState>;
}

// ---------------------------------------------------------------------------
// Question
// ---------------------------------------------------------------------------

/// Question-specific rules the behaviour consults. Pure predicates and
/// formatting; anything slow lives behind the dispatcher instead.
pub trait Question: Send + Sync {
    /// Can this response be submitted for grading?
    fn is_complete(&self, response: &ResponseData, files: &[ResponseFile]) -> bool;

    /// Can this response be graded at all when finishing without a submit?
    fn is_gradable(&self, response: &ResponseData) -> bool;

    /// Human-readable summary of a response.
    fn summarize(&self, response: &ResponseData) -> String;

    /// Fraction awarded when the student gives up.
    fn min_fraction(&self) -> f64;
}

// ---------------------------------------------------------------------------
// FileSaver / FileStore
// ---------------------------------------------------------------------------

/// Live handle to the files attached to a pending submission. Only exists
/// in-process on a fresh submit; gone during a regrade replay.
pub trait FileSaver: Send + Sync {
    fn files(&self) -> Result<Vec<ResponseFile>>;
}

/// Fallback file source for regrade replays: re-reads the files persisted
/// for a step from storage, looked up by the attempt's usage context.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn load_files(&self, usage_id: Uuid, step_id: Uuid) -> Result<Vec<ResponseFile>>;
}

/// Trivial in-memory file saver for fresh submissions and tests.
pub struct InMemoryFileSaver(Vec<ResponseFile>);

impl InMemoryFileSaver {
    pub fn new(files: Vec<ResponseFile>) -> Self {
        Self(files)
    }
}

impl FileSaver for InMemoryFileSaver {
    fn files(&self) -> Result<Vec<ResponseFile>> {
        Ok(self.0.clone())
    }
}

// ---------------------------------------------------------------------------
// BasicQuestion
// ---------------------------------------------------------------------------

/// A minimal question definition: complete when the `answer` variable or an
/// attached file is present, gradable when the response is non-empty.
pub struct BasicQuestion {
    min_fraction: f64,
}

impl BasicQuestion {
    pub fn new(min_fraction: f64) -> Self {
        Self { min_fraction }
    }
}

impl Default for BasicQuestion {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Question for BasicQuestion {
    fn is_complete(&self, response: &ResponseData, files: &[ResponseFile]) -> bool {
        response
            .get("answer")
            .is_some_and(|a| !a.trim().is_empty())
            || !files.is_empty()
    }

    fn is_gradable(&self, response: &ResponseData) -> bool {
        !response.is_empty()
    }

    fn summarize(&self, response: &ResponseData) -> String {
        let mut parts: Vec<String> = response
            .iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(k, v)| format!("{k}: {v}"))
            .collect();
        if parts.is_empty() {
            parts.push("(no response)".to_string());
        }
        parts.join("; ")
    }

    fn min_fraction(&self) -> f64 {
        self.min_fraction
    }
}

// ---------------------------------------------------------------------------
// ScriptedDispatcher
// ---------------------------------------------------------------------------

/// Dispatcher that plays back a preset sequence of states, recording what it
/// was asked to grade. Used by the replay driver and in tests.
pub struct ScriptedDispatcher {
    states: Mutex<VecDeque<AttemptState>>,
    dispatched: Mutex<Vec<ResponseData>>,
}

impl ScriptedDispatcher {
    pub fn new(states: Vec<AttemptState>) -> Self {
        Self {
            states: Mutex::new(states.into()),
            dispatched: Mutex::new(Vec::new()),
        }
    }

    /// One placeholder `NeedsGrading` per dispatch, indefinitely.
    pub fn always_pending() -> Self {
        Self::new(Vec::new())
    }

    /// The responses dispatched so far, in order.
    pub fn dispatched(&self) -> Vec<ResponseData> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatched.lock().unwrap().len()
    }
}

#[async_trait]
impl GradingDispatcher for ScriptedDispatcher {
    async fn dispatch(
        &self,
        _attempt: &Attempt,
        response: &ResponseData,
        _files: &[ResponseFile],
    ) -> Result<AttemptState> {
        self.dispatched.lock().unwrap().push(response.clone());
        let state = self
            .states
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(AttemptState::NeedsGrading);
        Ok(state)
    }
}
