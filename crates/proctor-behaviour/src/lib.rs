//! Regrade-safe event-processing state machine for asynchronously graded attempts.
//!
//! This crate implements the core Proctor behaviour: typed attempt events, the
//! event router, the six handlers (submit, finish, grading result, grader
//! unavailable, manual comment, autosave), the staleness guards that keep
//! asynchronous results from overwriting a newer regrade, and the collaborator
//! traits the behaviour is built against.

pub mod base;
pub mod behaviour;
pub mod collaborators;
pub mod event;
pub mod events;

pub use behaviour::ImmediateBehaviour;
pub use collaborators::{
    BasicQuestion, FileSaver, FileStore, GradingDispatcher, InMemoryFileSaver, Question,
    RecordStore, ScriptedDispatcher,
};
pub use event::{AttemptEvent, RawStep};
pub use events::{BehaviourEvent, EventEmitter};
