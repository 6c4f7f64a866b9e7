//! chainpipe-core — foundation for the staged, versioned chain indexer.
//!
//! # Architecture
//!
//! ```text
//! Source (heights) → Pipeline
//!                      ├── Stage: Setup → Fetch → Parse → Sync
//!                      ├── Stage: Sequence → Aggregate → Analyze → Persist
//!                      └── Sink (commit per height)
//!
//! VersionConfig  — which tasks each index version runs
//! Store          — persistence contracts (memory / SQLite backends)
//! ChainClient    — node access contract
//! ```

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod store;
pub mod types;
pub mod version;

pub use backoff::{Backoff, BackoffConfig};
pub use client::ChainClient;
pub use config::{AnalyzerConfig, IndexerConfig, JobsConfig, LogConfig, PurgeConfig};
pub use error::IndexerError;
pub use model::{Job, Report, ReportKind, Syncable, SystemEvent, SystemEventKind};
pub use pipeline::{Pipeline, Stage, StageName, Task, TaskSelection};
pub use store::{Store, StoreBackend};
pub use types::{ChainParams, ChainStatus, Height, HeightMeta, RawHeightData};
pub use version::{Target, Version, VersionConfig};
