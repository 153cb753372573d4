pub mod config;
pub mod logfile;
pub mod logger;
pub mod pelter_toml;

pub use config::*;
pub use logfile::{TextLog, logdir_from_env, logfile_prefix, with_extension};
pub use logger::setup_logging;
pub use pelter_toml::{PelterToml, apply_file_to_opts, load_pelter_toml};
