//! Base save and comment operations.
//!
//! The source system reached these through base-class inheritance; here they
//! are named functions the wrapping handlers call explicitly, so the guard and
//! downgrade steps around them stay visible at the call site.

use proctor_types::{Attempt, AttemptState, Comment, Decision, Result, ScorePolicy, Step};

/// Base autosave: record in-progress response data.
///
/// Discards when the attempt is already finished or the response is
/// unchanged from the last kept step; otherwise the step lands in `Complete`
/// or `InProgress` depending on response completeness.
pub fn process_save(
    attempt: &Attempt,
    question: &dyn crate::collaborators::Question,
    step: &mut Step,
) -> Decision {
    if attempt.state().is_finished() {
        return Decision::Discard;
    }
    if let Some(last) = attempt.last_step() {
        if last.response == step.response {
            return Decision::Discard;
        }
    }
    step.state = if question.is_complete(&step.response, &step.files) {
        AttemptState::Complete
    } else {
        AttemptState::InProgress
    };
    Decision::Keep
}

/// Base manual comment: attach the comment and, when a mark is supplied,
/// override the fraction and graded state. Without a mark the step carries
/// the attempt's current state and fraction forward.
pub fn process_comment(
    attempt: &Attempt,
    step: &mut Step,
    text: &str,
    mark: Option<f64>,
    policy: ScorePolicy,
) -> Result<Decision> {
    step.comment = Some(Comment {
        text: text.to_string(),
        mark,
    });
    match mark {
        Some(mark) => {
            let fraction = policy.normalise(mark, attempt.max_mark)?;
            step.fraction = Some(fraction);
            step.state = AttemptState::graded_state_for(fraction);
        }
        None => {
            step.state = attempt.state();
            step.fraction = attempt.fraction();
        }
    }
    Ok(Decision::Keep)
}
