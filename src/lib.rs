//! Pelter: concurrent HTTP request fuzzer.
//!
//! A run substitutes every value of a source (integer range or wordlist) into a request
//! template and pushes the results through a threaded pipeline:
//!
//! producer → skip/limit → rate limiter → worker pool → mark → [recorder] → reporter
//!
//! Stages talk over bounded crossbeam channels and share one [`CancelToken`].

pub mod engine;
pub mod error;
pub mod pipeline;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use error::PipelineError;
pub use pipeline::context::CancelToken;
pub use pipeline::reporter::{CollectSink, ReportSink, ReportStats};
pub use types::*;

use log::debug;

/// Result alias used by public pelter API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Single entry point: run the whole pipeline described by `opts`, rendering into `sink`.
///
/// Configuration errors are returned before any request is sent. Raising `cancel` from
/// another thread (e.g. a Ctrl-C handler) shuts the run down; it then returns
/// [`PipelineError::Cancelled`] after every stage has closed.
pub fn fuzz(opts: &FuzzOpts, sink: &mut dyn ReportSink, cancel: &CancelToken) -> Result<ReportStats> {
    debug!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_string().to_uppercase(),
        opts
    );
    pipeline::run_pipeline(opts, sink, cancel)
}
