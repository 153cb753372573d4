//! Logfile naming and the plain-text copy of everything printed during a run.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::utils::config::{LOGFILE_TIMESTAMP_FORMAT, PackagePaths};

/// Prefix for `<prefix>.log` and `<prefix>.json`, if logging was requested.
///
/// An explicit `logfile` wins. Otherwise, with a `logdir`, the name is derived from the
/// target host and the current time: `<logdir>/pelter_<host>_<YYYYMMDD_HHMMSS>`.
pub fn logfile_prefix(
    logfile: Option<&Path>,
    logdir: Option<&Path>,
    input_url: &str,
) -> Result<Option<PathBuf>> {
    if let Some(p) = logfile {
        return Ok(Some(p.to_path_buf()));
    }
    let Some(dir) = logdir else {
        return Ok(None);
    };
    // The placeholder may sit in the host itself; it is still a valid host label.
    let url = reqwest::Url::parse(input_url).with_context(|| format!("parse URL {input_url}"))?;
    let host = url.host_str().unwrap_or("unknown");
    let ts = chrono::Local::now().format(LOGFILE_TIMESTAMP_FORMAT);
    let name = format!("{}_{}_{}", PackagePaths::get().pkg_name(), host, ts);
    Ok(Some(dir.join(name)))
}

/// `PELTER_LOG_DIR` from the environment, or from `.env` in `dir` when unset.
pub fn logdir_from_env(dir: &Path) -> Option<PathBuf> {
    let key = PackagePaths::get().log_dir_env();
    let read = || {
        std::env::var(key)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    };
    if let Some(p) = read() {
        return Some(p);
    }
    let env_path = dir.join(".env");
    if env_path.is_file() {
        let _ = dotenvy::from_path(&env_path);
        return read();
    }
    None
}

/// Append `ext` to a logfile prefix without touching dots already in it.
pub fn with_extension(prefix: &Path, ext: &str) -> PathBuf {
    let mut s = prefix.as_os_str().to_owned();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

/// Text copy of printed output. The first line is the invoking command.
pub struct TextLog {
    out: BufWriter<File>,
    path: PathBuf,
}

impl TextLog {
    pub fn create(path: &Path, command_line: &str) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("create logfile {}", path.display()))?;
        let mut out = BufWriter::new(file);
        writeln!(out, "{command_line}")?;
        Ok(Self {
            out,
            path: path.to_path_buf(),
        })
    }

    pub fn line(&mut self, line: &str) {
        if let Err(e) = writeln!(self.out, "{line}") {
            log::warn!("write {}: {}", self.path.display(), e);
        }
    }

    pub fn flush(&mut self) {
        let _ = self.out.flush();
    }
}

impl Drop for TextLog {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_logfile_wins_over_logdir() {
        let p = logfile_prefix(
            Some(Path::new("/tmp/run1")),
            Some(Path::new("/var/log")),
            "http://example.com/FUZZ",
        )
        .unwrap();
        assert_eq!(p, Some(PathBuf::from("/tmp/run1")));
    }

    #[test]
    fn logdir_name_contains_host() {
        let p = logfile_prefix(None, Some(Path::new("/logs")), "https://api.example.com:8443/x")
            .unwrap()
            .unwrap();
        let name = p.file_name().unwrap().to_string_lossy().to_string();
        assert!(p.starts_with("/logs"));
        assert!(name.starts_with("pelter_api.example.com_"), "{name}");
    }

    #[test]
    fn no_logging_without_file_or_dir() {
        assert!(logfile_prefix(None, None, "not even a url").unwrap().is_none());
    }

    #[test]
    fn extension_is_appended() {
        assert_eq!(
            with_extension(Path::new("out/run.v2"), "json"),
            PathBuf::from("out/run.v2.json")
        );
    }
}
