//! Public and internal types for the pelter API and pipeline.

use std::path::PathBuf;
use std::time::Duration;

use crate::engine::request::RequestTemplate;
use crate::utils::config::Defaults;

/// Where the values substituted into the request come from.
#[derive(Clone, Debug)]
pub enum ValueSource {
    /// Inclusive integer range rendered through a printf-style `format` (e.g. `%05d`).
    Range {
        first: i64,
        last: i64,
        format: String,
    },
    /// Newline-delimited values read from a file.
    File(PathBuf),
    /// Newline-delimited values read from standard input.
    Stdin,
}

/// Outcome of one executed request.
///
/// `status` is 0 when the request failed before a response arrived; `error` then says why.
/// `raw_header` and `body` hold what the filters match against: the rendered header block and
/// at most `body_buffer_size` bytes of the body. `body_bytes` is always the full transferred length.
#[derive(Clone, Debug, Default)]
pub struct Response {
    pub value: String,
    pub status: u16,
    pub header_bytes: usize,
    pub body_bytes: usize,
    pub duration: Duration,
    pub extract: Vec<String>,
    /// One note per failed extraction command; the matching `extract` slot is empty.
    pub extract_errors: Vec<String>,
    pub error: Option<String>,
    pub hidden: bool,
    pub raw_header: String,
    pub body: Vec<u8>,
}

impl Response {
    /// Record for a value whose request never produced a response.
    pub fn failed(value: String, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            value,
            duration,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Full options for one run. The CLI fills this from flags, `.pelter.toml` and env;
/// library callers build it directly.
#[derive(Clone, Debug)]
pub struct FuzzOpts {
    pub source: ValueSource,
    pub template: RequestTemplate,
    /// Number of concurrent request workers (at least 1).
    pub threads: usize,
    /// Capacity of the value channel; the producer blocks once it is full.
    pub buffer_size: usize,
    /// Drop this many values from the start of the source (0 = none).
    pub skip: usize,
    /// Stop after this many values (0 = unlimited).
    pub limit: usize,
    /// Values per second released to the workers (<= 0 = unpaced).
    pub requests_per_second: f64,
    /// Bytes of each body kept for extraction and pattern filters.
    pub body_buffer_size: usize,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Route every request through this proxy. System proxy settings are ignored otherwise.
    pub proxy: Option<String>,

    pub hide_status: Vec<u16>,
    pub hide_header_size: Vec<String>,
    pub hide_body_size: Vec<String>,
    pub hide_pattern: Vec<String>,
    pub show_pattern: Vec<String>,

    pub extract: Vec<String>,
    pub extract_pipe: Vec<String>,

    /// Durable JSON-lines record of every response. `None` disables the recorder stage.
    pub record_path: Option<PathBuf>,
}

impl FuzzOpts {
    /// Options with defaults for everything but the source and the template.
    pub fn new(source: ValueSource, template: RequestTemplate) -> Self {
        Self {
            source,
            template,
            threads: Defaults::THREADS,
            buffer_size: Defaults::BUFFER_SIZE,
            skip: 0,
            limit: 0,
            requests_per_second: 0.0,
            body_buffer_size: Defaults::BODY_BUFFER_MIB * 1024 * 1024,
            request_timeout: Duration::from_secs(Defaults::REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(Defaults::CONNECT_TIMEOUT_SECS),
            proxy: None,
            hide_status: Vec::new(),
            hide_header_size: Vec::new(),
            hide_body_size: Vec::new(),
            hide_pattern: Vec::new(),
            show_pattern: Vec::new(),
            extract: Vec::new(),
            extract_pipe: Vec::new(),
            record_path: None,
        }
    }
}
