use clap::Parser;
use std::path::PathBuf;

use crate::utils::config::Defaults;

/// Concurrent HTTP request fuzzer.
///
/// Every occurrence of FUZZ in the URL, the headers and the body is replaced by one value
/// from the range or the file.
#[derive(Clone, Debug, Parser)]
#[command(name = "pelter")]
#[command(about = "Send a request for every value of a range or wordlist and filter the responses.")]
pub struct Cli {
    /// Target URL, e.g. https://example.com/item/FUZZ
    #[arg(value_name = "URL")]
    pub url: String,

    /// Inclusive range of integers to use as values: FIRST-LAST.
    #[arg(long, short = 'r', value_name = "FIRST-LAST")]
    pub range: Option<String>,

    /// printf-style format for range values (%d, %x, %X, %o, %b with optional 0/- flags and width).
    #[arg(long, value_name = "FORMAT", default_value = Defaults::RANGE_FORMAT)]
    pub range_format: String,

    /// Read values from FILE, one per line. `-` reads standard input.
    #[arg(long, short = 'f', value_name = "FILE")]
    pub file: Option<String>,

    /// Write a copy of printed messages to PREFIX.log and every response to PREFIX.json.
    #[arg(long, value_name = "PREFIX")]
    pub logfile: Option<PathBuf>,

    /// Log every run to a timestamped file in DIR (default: $PELTER_LOG_DIR).
    #[arg(long, value_name = "DIR")]
    pub logdir: Option<PathBuf>,

    /// Number of parallel requests.
    #[arg(long, short = 't', value_name = "N")]
    pub threads: Option<usize>,

    /// Number of buffered values.
    #[arg(long, value_name = "N")]
    pub buffer_size: Option<usize>,

    /// Skip the first N values.
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub skip: usize,

    /// Only run N requests, then exit.
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub limit: usize,

    /// Send at most N requests per second (fractions allowed, e.g. 0.5).
    #[arg(long, value_name = "N")]
    pub requests_per_second: Option<f64>,

    /// HTTP method. Default: GET, or POST when --data is given.
    #[arg(long = "request", short = 'X', value_name = "METHOD")]
    pub method: Option<String>,

    /// Add a header, "Name: value". Can be repeated.
    #[arg(long, short = 'H', value_name = "HEADER")]
    pub header: Vec<String>,

    /// Request body.
    #[arg(long, short = 'd', value_name = "DATA")]
    pub data: Option<String>,

    /// Do not verify TLS certificates.
    #[arg(long, short = 'k', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub insecure: Option<bool>,

    /// Follow up to N redirects; the last response is reported as-is.
    #[arg(long, value_name = "N")]
    pub follow_redirect: Option<usize>,

    /// Request timeout in seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Send every request through this proxy.
    #[arg(long, value_name = "URL")]
    pub proxy: Option<String>,

    /// Hide responses with these status codes: code,[code],...
    #[arg(long, value_name = "CODES", value_delimiter = ',')]
    pub hide_status: Vec<u16>,

    /// Hide responses with this header size: size,from-to,from-,-to
    #[arg(long, value_name = "SIZES", value_delimiter = ',')]
    pub hide_header_size: Vec<String>,

    /// Hide responses with this body size: size,from-to,from-,-to
    #[arg(long, value_name = "SIZES", value_delimiter = ',')]
    pub hide_body_size: Vec<String>,

    /// Hide responses whose header or body matches REGEX. Can be repeated.
    #[arg(long, value_name = "REGEX")]
    pub hide_pattern: Vec<String>,

    /// Show only responses whose header or body matches REGEX. Can be repeated.
    #[arg(long, value_name = "REGEX")]
    pub show_pattern: Vec<String>,

    /// Extract REGEX matches from the response body. Can be repeated.
    #[arg(long, value_name = "REGEX")]
    pub extract: Vec<String>,

    /// Pipe the response body to CMD and record its output. Can be repeated.
    #[arg(long, value_name = "CMD")]
    pub extract_pipe: Vec<String>,

    /// MiB of each response body kept for extraction and pattern filters.
    #[arg(long, value_name = "MIB")]
    pub body_buffer_size: Option<usize>,

    /// Verbose output.
    #[arg(long, short = 'v', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,
}

impl Cli {
    pub fn verbose(&self) -> bool {
        self.verbose.unwrap_or(false)
    }
}
