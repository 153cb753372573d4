//! Error kinds surfaced by configuration and the pipeline.
//!
//! Everything public returns [`crate::Result`] (anyhow); these variants are wrapped
//! inside it and can be recovered with `err.downcast_ref::<PipelineError>()`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid range {first}-{last}: first must not be greater than last")]
    InvalidRange { first: i64, last: i64 },

    #[error("wrong format for range {0:?}, expected: first-last")]
    RangeSyntax(String),

    #[error("invalid range format {format:?}: {reason}")]
    RangeFormat { format: String, reason: String },

    #[error("invalid size spec {spec:?}, expected N, A-B, A- or -B")]
    InvalidSizeSpec { spec: String },

    #[error("regexp {pattern:?} failed to compile: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid command {0:?}")]
    InvalidCommand(String),

    #[error("body buffer size of {0} MiB is too large")]
    BodyBufferSize(usize),

    #[error("invalid HTTP method {0:?}")]
    InvalidMethod(String),

    #[error("invalid header {0:?}, expected \"Name: value\"")]
    InvalidHeader(String),

    #[error("placeholder {placeholder} {reason}")]
    Placeholder {
        placeholder: &'static str,
        reason: &'static str,
    },

    #[error("only one source allowed but both range and filename specified")]
    SourceConflict,

    #[error("neither file nor range specified, nothing to do")]
    NoSource,

    #[error("{0} stage panicked")]
    StagePanicked(&'static str),

    #[error("{0} stage lost its downstream before the run finished")]
    Disconnected(&'static str),

    #[error("run cancelled")]
    Cancelled,
}
