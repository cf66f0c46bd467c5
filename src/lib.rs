//! A Rust client for the Minder research platform's bulk-export API.
//!
//! The export API is asynchronous: a request for one or more datasets schedules a
//! server-side job, the client polls the job until it resolves, and the finished
//! job lists CSV files to download. This crate implements that flow and keeps a
//! local directory of per-dataset CSV files in sync with it:
//!
//! - [`Client::export_all`] exports a selection of datasets over one time range.
//! - [`Client::refresh`] resumes every dataset from its last persisted row, one
//!   job per dataset, and drops the duplicated boundary row before appending.
//!
//! ## Quick start
//! - Configure authentication via environment variables (`MINDER_API_URL`,
//!   `MINDER_TOKEN`) or a `.minderrc` file (current directory or home directory).
//! - Call [`Client::refresh`] with the datasets to keep up to date.
//!
//! ```no_run
//! use anyhow::Result;
//! use minder_export::Client;
//! use std::path::Path;
//!
//! fn main() -> Result<()> {
//!     let client = Client::from_env()?;
//!     let datasets = vec!["raw_activity_pir".to_string(), "raw_door_sensor".to_string()];
//!     let report = client.refresh(None, &datasets, Path::new("./data/raw_data"))?;
//!     for dataset in report.failed() {
//!         eprintln!("{} was not refreshed", dataset);
//!     }
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

mod catalog;
mod client;
mod config;
mod error;
mod export;
mod fetch;
mod job;
pub mod merge;
pub mod poller;
pub mod request;
mod util;

pub use catalog::{ALL_GROUPS, Catalog};
pub use client::Client;
pub use config::{ClientConfig, CredentialProvider, DEFAULT_API_URL, StaticToken, TokenFile};
pub use error::{ExportError, Result};
pub use export::{DatasetOutcome, ExportReport};
pub use fetch::{Chunks, FetchedChunk};
pub use job::{JobHandle, JobRecord, JobStatus, JobSummary, OutputEntry, OutputManifest};
pub use merge::{RowKey, append_chunk, append_chunks, read_anchor};
pub use poller::{DEFAULT_POLL_INTERVAL, Sleeper, StatusSource, ThreadSleeper};
pub use request::{DatasetOptions, DatasetSelection, ExportRequest, TimeRange};
pub use util::parse_timestamp;
