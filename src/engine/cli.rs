//! CLI command handler: layer the configuration, set up logfiles and Ctrl-C, run, summarize.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::engine::arg_parser::Cli;
use crate::engine::progress::{TerminalSink, format_summary};
use crate::engine::request::RequestTemplate;
use crate::engine::tools::{join_command, mib_to_bytes, parse_range};
use crate::error::PipelineError;
use crate::utils::{
    PelterToml, TextLog, apply_file_to_opts, load_pelter_toml, logdir_from_env, logfile_prefix,
    setup_logging, with_extension,
};
use crate::{CancelToken, FuzzOpts, ValueSource};

/// Exactly one of `--range` and `--file`.
pub fn value_source(cli: &Cli) -> Result<ValueSource, PipelineError> {
    match (cli.range.as_deref(), cli.file.as_deref()) {
        (Some(_), Some(_)) => Err(PipelineError::SourceConflict),
        (Some(range), None) => {
            let (first, last) = parse_range(range)?;
            Ok(ValueSource::Range {
                first,
                last,
                format: cli.range_format.clone(),
            })
        }
        (None, Some("-")) => Ok(ValueSource::Stdin),
        (None, Some(path)) => Ok(ValueSource::File(path.into())),
        (None, None) => Err(PipelineError::NoSource),
    }
}

fn request_template(cli: &Cli, file: &PelterToml) -> Result<RequestTemplate> {
    let mut template = RequestTemplate::new(cli.url.clone());
    for line in file.headers().iter().chain(cli.header.iter()) {
        template.add_header_line(line)?;
    }
    template.body = cli.data.clone();
    if let Some(m) = &cli.method {
        template.method = m.to_uppercase();
    } else if template.body.is_some() {
        template.method = "POST".to_string();
    }
    Ok(template)
}

/// Defaults, then `.pelter.toml`, then flags.
pub fn build_opts(cli: &Cli, file: &PelterToml) -> Result<FuzzOpts> {
    let mut opts = FuzzOpts::new(value_source(cli)?, request_template(cli, file)?);
    apply_file_to_opts(file, &mut opts)?;

    if let Some(n) = cli.threads {
        opts.threads = n;
    }
    if let Some(n) = cli.buffer_size {
        opts.buffer_size = n;
    }
    if let Some(r) = cli.requests_per_second {
        opts.requests_per_second = r;
    }
    if let Some(mib) = cli.body_buffer_size {
        opts.body_buffer_size = mib_to_bytes(mib)?;
    }
    if let Some(secs) = cli.timeout {
        opts.request_timeout = Duration::from_secs(secs);
    }
    if cli.proxy.is_some() {
        opts.proxy = cli.proxy.clone();
    }
    if let Some(n) = cli.follow_redirect {
        opts.template.follow_redirect = n;
    }
    if let Some(k) = cli.insecure {
        opts.template.insecure = k;
    }
    if !cli.hide_status.is_empty() {
        opts.hide_status = cli.hide_status.clone();
    }
    if !cli.hide_pattern.is_empty() {
        opts.hide_pattern = cli.hide_pattern.clone();
    }
    opts.skip = cli.skip;
    opts.limit = cli.limit;
    opts.hide_header_size = cli.hide_header_size.clone();
    opts.hide_body_size = cli.hide_body_size.clone();
    opts.show_pattern = cli.show_pattern.clone();
    opts.extract = cli.extract.clone();
    opts.extract_pipe = cli.extract_pipe.clone();
    Ok(opts)
}

/// Resolve `--logfile`/`--logdir` and open the text log. Sets `opts.record_path`.
fn setup_logfiles(cli: &Cli, file: &PelterToml, opts: &mut FuzzOpts) -> Result<Option<TextLog>> {
    let logdir = cli
        .logdir
        .clone()
        .or_else(|| logdir_from_env(Path::new(".")))
        .or_else(|| file.logdir());
    let Some(prefix) = logfile_prefix(cli.logfile.as_deref(), logdir.as_deref(), &cli.url)? else {
        return Ok(None);
    };
    if let Some(parent) = prefix.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    let log_path = with_extension(&prefix, "log");
    info!("logfile is {}", log_path.display());
    opts.record_path = Some(with_extension(&prefix, "json"));
    let args: Vec<String> = std::env::args().collect();
    TextLog::create(&log_path, &join_command(&args)).map(Some)
}

fn install_interrupt_handler(cancel: &CancelToken) -> Result<()> {
    let token = cancel.clone();
    ctrlc::set_handler(move || {
        if !token.is_cancelled() {
            eprintln!();
            warn!("interrupted, shutting down");
        }
        token.cancel();
    })
    .context("set Ctrl+C handler")
}

pub fn handle_run(cli: &Cli) -> Result<()> {
    setup_logging(cli.verbose());
    let file = load_pelter_toml(Path::new(".")).unwrap_or_default();
    let mut opts = build_opts(cli, &file)?;
    let log = setup_logfiles(cli, &file, &mut opts)?;

    let cancel = CancelToken::new();
    install_interrupt_handler(&cancel)?;

    let started = Instant::now();
    let mut sink = TerminalSink::new(log);
    match crate::fuzz(&opts, &mut sink, &cancel) {
        Ok(stats) => {
            info!("{}", format_summary(&stats, started.elapsed()));
            Ok(())
        }
        Err(e) => {
            if matches!(e.downcast_ref::<PipelineError>(), Some(PipelineError::Cancelled)) {
                debug!("run cancelled after {:.2?}", started.elapsed());
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("pelter").chain(args.iter().copied()))
    }

    #[test]
    fn range_and_file_conflict() {
        let c = cli(&["-r", "1-2", "-f", "words.txt", "http://h/FUZZ"]);
        assert!(matches!(value_source(&c), Err(PipelineError::SourceConflict)));
    }

    #[test]
    fn no_source_is_an_error() {
        let c = cli(&["http://h/FUZZ"]);
        assert!(matches!(value_source(&c), Err(PipelineError::NoSource)));
    }

    #[test]
    fn dash_reads_stdin() {
        let c = cli(&["-f", "-", "http://h/FUZZ"]);
        assert!(matches!(value_source(&c), Ok(ValueSource::Stdin)));
    }

    #[test]
    fn data_implies_post_unless_method_given() {
        let file = PelterToml::default();
        let c = cli(&["-r", "1-2", "-d", "id=FUZZ", "http://h/"]);
        assert_eq!(build_opts(&c, &file).unwrap().template.method, "POST");
        let c = cli(&["-r", "1-2", "-X", "put", "-d", "id=FUZZ", "http://h/"]);
        assert_eq!(build_opts(&c, &file).unwrap().template.method, "PUT");
    }

    #[test]
    fn oversized_body_buffer_is_a_config_error() {
        let c = cli(&[
            "-r",
            "1-2",
            "--body-buffer-size",
            "18446744073709551615",
            "http://h/FUZZ",
        ]);
        let err = build_opts(&c, &PelterToml::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::BodyBufferSize(_))
        ));
    }

    #[test]
    fn flags_override_defaults() {
        let c = cli(&[
            "-r",
            "0-9",
            "-t",
            "2",
            "--hide-status",
            "404,500",
            "--hide-body-size",
            "0,10-20",
            "-H",
            "X-Test: FUZZ",
            "http://h/",
        ]);
        let o = build_opts(&c, &PelterToml::default()).unwrap();
        assert_eq!(o.threads, 2);
        assert_eq!(o.hide_status, vec![404, 500]);
        assert_eq!(o.hide_body_size, vec!["0", "10-20"]);
        assert_eq!(
            o.template.headers,
            vec![("X-Test".to_string(), "FUZZ".to_string())]
        );
    }
}
