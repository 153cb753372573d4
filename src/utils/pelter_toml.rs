//! Load `.pelter.toml` from the working directory (CLI only). Lib does not use this; the
//! consuming program injects config via FuzzOpts.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::FuzzOpts;
use crate::engine::tools::mib_to_bytes;
use crate::error::PipelineError;
use crate::utils::config::PackagePaths;

#[derive(Debug, Default, Deserialize)]
pub struct PelterToml {
    #[serde(default)]
    settings: RunSection,
}

#[derive(Debug, Default, Deserialize)]
struct RunSection {
    threads: Option<usize>,
    buffer_size: Option<usize>,
    body_buffer_size: Option<usize>,
    requests_per_second: Option<f64>,
    follow_redirect: Option<usize>,
    insecure: Option<bool>,
    timeout: Option<u64>,
    proxy: Option<String>,
    logdir: Option<String>,
    hide_status: Option<Vec<u16>>,
    hide_pattern: Option<Vec<String>>,
    headers: Option<Vec<String>>,
}

impl PelterToml {
    /// Log directory from the file, if any. Consumed by logfile prefix resolution, not by opts.
    pub fn logdir(&self) -> Option<PathBuf> {
        self.settings.logdir.as_ref().map(PathBuf::from)
    }

    /// Extra `Name: value` headers from the file, added before CLI headers.
    pub fn headers(&self) -> &[String] {
        self.settings.headers.as_deref().unwrap_or_default()
    }
}

/// Load `.pelter.toml` from `dir` if present. Returns None if file missing or unreadable. CLI only.
pub fn load_pelter_toml(dir: &Path) -> Option<PelterToml> {
    let path = dir.join(PackagePaths::get().config_filename());
    let s = std::fs::read_to_string(&path).ok()?;
    parse_pelter_toml(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok()
}

pub fn parse_pelter_toml(s: &str) -> Result<PelterToml, toml::de::Error> {
    toml::from_str(s)
}

/// Overwrite opts field from file when present.
macro_rules! apply_file_opt {
    ($run:expr, $opts:expr, $run_field:ident => $opts_field:ident) => {
        if let Some(v) = $run.$run_field.clone() {
            $opts.$opts_field = v;
        }
    };
}

/// Apply file config to opts (only set fields present in the file). Call before applying CLI.
pub fn apply_file_to_opts(file: &PelterToml, opts: &mut FuzzOpts) -> Result<(), PipelineError> {
    let run = &file.settings;
    apply_file_opt!(run, opts, threads => threads);
    apply_file_opt!(run, opts, buffer_size => buffer_size);
    apply_file_opt!(run, opts, requests_per_second => requests_per_second);
    apply_file_opt!(run, opts, hide_status => hide_status);
    apply_file_opt!(run, opts, hide_pattern => hide_pattern);
    if let Some(mib) = run.body_buffer_size {
        opts.body_buffer_size = mib_to_bytes(mib)?;
    }
    if let Some(secs) = run.timeout {
        opts.request_timeout = std::time::Duration::from_secs(secs);
    }
    if run.proxy.is_some() {
        opts.proxy = run.proxy.clone();
    }
    if let Some(n) = run.follow_redirect {
        opts.template.follow_redirect = n;
    }
    if let Some(insecure) = run.insecure {
        opts.template.insecure = insecure;
    }
    Ok(())
}
