//! The interaction state machine: one entry point per attempt, one handler
//! per event, each producing a keep/discard decision.

use std::sync::Arc;

use uuid::Uuid;

use proctor_types::{
    Attempt, AttemptState, Decision, ResponseData, ResponseFile, Result, ScorePolicy, Step,
};

use crate::base;
use crate::collaborators::{FileSaver, FileStore, GradingDispatcher, Question, RecordStore};
use crate::event::AttemptEvent;
use crate::events::{BehaviourEvent, EventEmitter};

/// Behaviour for questions graded by an external, possibly asynchronous
/// backend, with full feedback on submit and regrade-safe result handling.
///
/// The behaviour owns no storage: the record store, grading dispatcher,
/// question rules, and file store are injected. Events for one attempt must
/// be processed serially; the enclosing usage transaction provides that
/// guarantee.
pub struct ImmediateBehaviour {
    store: Arc<dyn RecordStore>,
    dispatcher: Arc<dyn GradingDispatcher>,
    question: Arc<dyn Question>,
    files: Arc<dyn FileStore>,
    score_policy: ScorePolicy,
    emitter: EventEmitter,
}

impl ImmediateBehaviour {
    pub fn new(
        store: Arc<dyn RecordStore>,
        dispatcher: Arc<dyn GradingDispatcher>,
        question: Arc<dyn Question>,
        files: Arc<dyn FileStore>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            question,
            files,
            score_policy: ScorePolicy::default(),
            emitter: EventEmitter::default(),
        }
    }

    pub fn with_score_policy(mut self, policy: ScorePolicy) -> Self {
        self.score_policy = policy;
        self
    }

    /// Subscribe to behaviour observability events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<BehaviourEvent> {
        self.emitter.subscribe()
    }

    /// Process one event against the attempt.
    ///
    /// Creates a pending step with the transport-supplied `step_id`, routes
    /// the event to exactly one handler, and on `Keep` appends the finished
    /// step to the attempt. A `Discard` leaves the attempt untouched.
    pub async fn process(
        &self,
        attempt: &mut Attempt,
        step_id: Uuid,
        event: AttemptEvent,
    ) -> Result<Decision> {
        let kind = event.kind();
        tracing::debug!(attempt = %attempt.id, step = %step_id, kind, "Processing attempt event");

        let mut step = Step::pending(step_id);
        let decision = match event {
            AttemptEvent::Comment { text, mark } => {
                self.process_comment(attempt, &mut step, &text, mark).await?
            }
            AttemptEvent::Submit { response, saver } => {
                self.process_submit(attempt, &mut step, response, saver.as_deref())
                    .await?
            }
            AttemptEvent::Finish => self.process_finish(attempt, &mut step).await?,
            AttemptEvent::GradingResult { job, score } => {
                self.process_grading_result(attempt, &mut step, job, score)
                    .await?
            }
            AttemptEvent::GraderUnavailable { job } => {
                self.process_grader_unavailable(attempt, &mut step, job)
                    .await?
            }
            AttemptEvent::Save { response } => self.process_save(attempt, &mut step, response),
        };

        match decision {
            Decision::Keep => {
                tracing::info!(
                    attempt = %attempt.id,
                    step = %step_id,
                    kind,
                    state = ?step.state,
                    "Step kept"
                );
                self.emitter.emit(BehaviourEvent::StepKept {
                    attempt_id: attempt.id,
                    step_id,
                    event_kind: kind.to_string(),
                    state: step.state,
                });
                attempt.apply(step);
            }
            Decision::Discard => {
                tracing::info!(attempt = %attempt.id, step = %step_id, kind, "Step discarded");
                self.emitter.emit(BehaviourEvent::StepDiscarded {
                    attempt_id: attempt.id,
                    step_id,
                    event_kind: kind.to_string(),
                });
            }
        }
        Ok(decision)
    }

    /// Human-readable one-line description of an event, for attempt logs.
    pub fn summarise_action(&self, event: &AttemptEvent) -> String {
        match event {
            AttemptEvent::Comment { text, mark: Some(mark) } => {
                format!("Commented (mark {mark}): {text}")
            }
            AttemptEvent::Comment { text, mark: None } => format!("Commented: {text}"),
            AttemptEvent::Submit { response, .. } => {
                format!("Submitted: {}", self.question.summarize(response))
            }
            AttemptEvent::Finish => "Attempt finished".to_string(),
            AttemptEvent::GradingResult { score, .. } => {
                format!("Graded automatically: score {score}")
            }
            AttemptEvent::GraderUnavailable { .. } => {
                "Grading backend unavailable; manual grading required".to_string()
            }
            AttemptEvent::Save { response } => {
                format!("Saved: {}", self.question.summarize(response))
            }
        }
    }

    // --- handlers -----------------------------------------------------------

    async fn process_submit(
        &self,
        attempt: &Attempt,
        step: &mut Step,
        response: ResponseData,
        saver: Option<&dyn FileSaver>,
    ) -> Result<Decision> {
        if attempt.state().is_finished() {
            return Ok(Decision::Discard);
        }

        step.response = response;
        step.files = self.resolve_files(attempt, step.id, saver).await?;

        if !self.question.is_complete(&step.response, &step.files) {
            step.state = AttemptState::Invalid;
            return Ok(Decision::Keep);
        }

        let state = self
            .dispatcher
            .dispatch(attempt, &step.response, &step.files)
            .await?;
        tracing::info!(attempt = %attempt.id, step = %step.id, ?state, "Grading dispatched");
        self.emitter.emit(BehaviourEvent::GradingDispatched {
            attempt_id: attempt.id,
            step_id: step.id,
            state,
        });
        step.state = state;
        step.summary = Some(self.question.summarize(&step.response));
        Ok(Decision::Keep)
    }

    async fn process_finish(&self, attempt: &Attempt, step: &mut Step) -> Result<Decision> {
        if attempt.state().is_finished() {
            return Ok(Decision::Discard);
        }

        // Finishing grades whatever was last saved, not new input.
        let (response, files) = attempt
            .last_step()
            .map(|s| (s.response.clone(), s.files.clone()))
            .unwrap_or_default();

        if !self.question.is_gradable(&response) {
            step.state = AttemptState::GaveUp;
            step.fraction = Some(self.question.min_fraction());
            return Ok(Decision::Keep);
        }

        let state = self.dispatcher.dispatch(attempt, &response, &files).await?;
        tracing::info!(attempt = %attempt.id, step = %step.id, ?state, "Grading dispatched on finish");
        self.emitter.emit(BehaviourEvent::GradingDispatched {
            attempt_id: attempt.id,
            step_id: step.id,
            state,
        });
        step.state = state;
        step.summary = Some(self.question.summarize(&response));
        Ok(Decision::Keep)
    }

    async fn process_grading_result(
        &self,
        attempt: &Attempt,
        step: &mut Step,
        job: Uuid,
        score: f64,
    ) -> Result<Decision> {
        if !self.store.job_exists(job).await? {
            // A regrade has superseded this dispatch; the old result must
            // never overwrite the newer outcome.
            tracing::info!(attempt = %attempt.id, %job, "Dropping stale grading result");
            self.emitter.emit(BehaviourEvent::StaleResultDropped {
                attempt_id: attempt.id,
                job,
            });
            return Ok(Decision::Discard);
        }

        let fraction = self.score_policy.normalise(score, attempt.max_mark)?;
        step.fraction = Some(fraction);
        step.state = AttemptState::graded_state_for(fraction);
        step.summary = Some(self.question.summarize(&attempt.accumulated_response()));

        // Surface the new result to an in-flight regrade review, if one exists.
        if let Some(mut record) = self
            .store
            .regrade_override(attempt.usage_id, attempt.slot)
            .await?
        {
            record.new_fraction = Some(fraction);
            self.store.update_override(&record).await?;
            self.emitter.emit(BehaviourEvent::OverrideUpdated {
                usage_id: attempt.usage_id,
                slot: attempt.slot,
                fraction,
            });
        }

        Ok(Decision::Keep)
    }

    async fn process_grader_unavailable(
        &self,
        attempt: &Attempt,
        step: &mut Step,
        job: Uuid,
    ) -> Result<Decision> {
        if !self.store.job_exists(job).await? {
            tracing::info!(attempt = %attempt.id, %job, "Dropping stale grader-unavailable event");
            self.emitter.emit(BehaviourEvent::StaleResultDropped {
                attempt_id: attempt.id,
                job,
            });
            return Ok(Decision::Discard);
        }

        step.state = AttemptState::NeedsGrading;
        Ok(Decision::Keep)
    }

    async fn process_comment(
        &self,
        attempt: &Attempt,
        step: &mut Step,
        text: &str,
        mark: Option<f64>,
    ) -> Result<Decision> {
        // Across a regrade the comment and mark refer to the superseded
        // grading result, so a replayed comment step must not be reapplied.
        if self.store.comment_applied(step.id).await? {
            tracing::info!(attempt = %attempt.id, step = %step.id, "Comment already applied");
            return Ok(Decision::Discard);
        }

        let decision = base::process_comment(attempt, step, text, mark, self.score_policy)?;
        step.comment_applied = true;
        Ok(decision)
    }

    fn process_save(
        &self,
        attempt: &Attempt,
        step: &mut Step,
        response: ResponseData,
    ) -> Decision {
        step.response = response;
        let decision = base::process_save(attempt, &*self.question, step);
        // An autosave never completes the attempt: only an explicit submit
        // can mark a response ready for grading.
        if decision.is_keep() && step.state == AttemptState::Complete {
            step.state = AttemptState::InProgress;
        }
        decision
    }

    async fn resolve_files(
        &self,
        attempt: &Attempt,
        step_id: Uuid,
        saver: Option<&dyn FileSaver>,
    ) -> Result<Vec<ResponseFile>> {
        match saver {
            Some(saver) => saver.files(),
            // Regrade replay: the live saver is gone, re-read from storage.
            None => self.files.load_files(attempt.usage_id, step_id).await,
        }
    }
}
