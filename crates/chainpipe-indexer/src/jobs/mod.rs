//! Background prefetching of raw height data.
//!
//! The [`JobManager`] queues one job per height and hands them to a
//! [`FetchWorker`]; the fetch tasks of the pipeline read the cached data
//! instead of hitting the chain again.

pub mod manager;
pub mod worker;

pub use manager::{JobManager, RoundSummary};
pub use worker::{ClientFetchWorker, FetchWorker};
