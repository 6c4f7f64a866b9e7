//! Staged pipeline engine.
//!
//! A [`Pipeline`] runs an ordered list of [`Stage`]s over a per-height payload.
//! Each stage holds [`Task`]s that read the payload and return a [`Patch`]
//! describing their writes; the stage applies patches once its tasks return.

pub mod engine;
pub mod retry;
pub mod selection;
pub mod source;
pub mod stage;
pub mod task;

pub use engine::{PayloadFactory, Pipeline, PipelineOptions};
pub use retry::{RetryPolicy, RetryingTask, TransientPredicate};
pub use selection::{SkipReason, TaskSelection};
pub use source::{HeightRange, Sink, Source};
pub use stage::{Stage, StageName, StageTasks};
pub use task::{Patch, RunContext, Task};
