//! Engine module: CLI, request building, transport, extraction and terminal output

pub mod arg_parser;
pub mod cli;
pub mod extract;
pub mod progress;
pub mod request;
pub mod tools;
pub mod transport;

// Re-export commonly used functions
pub use arg_parser::Cli;
pub use cli::handle_run;
pub use extract::{Extraction, Extractor};
pub use progress::TerminalSink;
pub use request::{ConcreteRequest, RequestTemplate, parse_header};
pub use tools::{RangeFormat, join_command, mib_to_bytes, parse_range, split_command};
pub use transport::{TransportSettings, build_client};
