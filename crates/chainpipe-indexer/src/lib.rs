//! chainpipe-indexer — validator-chain indexer built on the chainpipe pipeline.
//!
//! Concrete tasks for every stage, the height sources and sink, the run
//! report tracker, version eligibility checks, fetch jobs and the system
//! event analyzer, tied together by [`Indexer`].

pub mod analyzer;
pub mod builder;
pub mod client;
pub mod indexer;
pub mod jobs;
pub mod metrics;
pub mod payload;
pub mod report;
pub mod sink;
pub mod source;
pub mod status;
pub mod tasks;

pub use analyzer::{Analyzer, HeightView};
pub use builder::IndexerBuilder;
pub use client::{HttpChainClient, HttpClientConfig};
pub use indexer::{
    BackfillRequest, IndexRequest, Indexer, IndexerStatus, PurgeSummary, RunHeightRequest, RunSummary,
};
pub use jobs::{ClientFetchWorker, FetchWorker, JobManager, RoundSummary};
pub use metrics::{IndexerMetrics, MetricsSnapshot};
pub use payload::Payload;
pub use report::ReportTracker;
pub use sink::IndexSink;
pub use source::{DiffSource, RangeSource};
pub use status::VersionStatus;
