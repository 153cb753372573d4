//! Pipeline stages and orchestration.
//!
//! producer → skip → limit → rate → workers → mark → [recorder] → reporter

pub mod context;
pub mod error_handler;
pub mod filters;
pub mod mark;
pub mod orchestrator;
pub mod producer;
pub mod rate;
pub mod recorder;
pub mod reporter;
pub mod runner;

pub use context::{
    CancelToken, CountSender, Delivery, FirstError, StageHandle, recv_or_cancel, send_or_cancel,
    sleep_or_cancel, spawn_stage,
};
pub use error_handler::{finish_run, join_stages};
pub use orchestrator::{PipelineConfig, run_pipeline};
