//! Application configuration constants.
//! Defaults and tuning in one place.

use std::sync::OnceLock;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    config_filename: String,
    log_dir_env: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache names from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                config_filename: format!(".{pkg}.toml"),
                log_dir_env: format!("{}_LOG_DIR", pkg.to_uppercase()),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// `.pelter.toml`, looked up in the working directory.
    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    /// `PELTER_LOG_DIR`: default for `--logdir`.
    pub fn log_dir_env(&self) -> &str {
        &self.log_dir_env
    }
}

// ---- Run defaults ----

/// Defaults applied before `.pelter.toml` and CLI flags.
pub struct Defaults;

impl Defaults {
    pub const THREADS: usize = 5;
    /// Value channel capacity (the producer runs ahead of the workers by at most this much).
    pub const BUFFER_SIZE: usize = 100_000;
    /// MiB of each response body kept for extraction and pattern matching.
    pub const BODY_BUFFER_MIB: usize = 5;
    pub const REQUEST_TIMEOUT_SECS: u64 = 30;
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;
    pub const RANGE_FORMAT: &'static str = "%d";
    pub const METHOD: &'static str = "GET";
}

/// Token replaced by each value in URL, headers and body.
pub const PLACEHOLDER: &str = "FUZZ";

// ---- Channels ----

/// Capacity of the channels between stages after the value buffer. Small on purpose:
/// the value buffer is the one place work is allowed to pile up.
pub const STAGE_CHANNEL_CAP: usize = 16;

/// Count channels carry the latest total only.
pub const COUNT_CHANNEL_CAP: usize = 1;

// ---- Logfile ----

/// Timestamp suffix for logfiles derived from `--logdir`.
pub const LOGFILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
