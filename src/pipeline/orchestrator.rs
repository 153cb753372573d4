use anyhow::Result;
use crossbeam_channel::{Receiver, bounded};
use log::debug;
use std::sync::Arc;

use crate::engine::extract::Extractor;
use crate::engine::transport::{TransportSettings, build_client};
use crate::pipeline::{self, CancelToken, CountSender, FirstError, StageHandle, spawn_stage};
use crate::utils::config::{COUNT_CHANNEL_CAP, STAGE_CHANNEL_CAP};
use crate::{FuzzOpts, Response};

use super::filters::{Limit, Position, Skip, run_position_filter};
use super::mark::Classifier;
use super::producer::{Producer, open_source};
use super::rate::RateLimiter;
use super::recorder::Recorder;
use super::reporter::{ReportSink, ReportStats, Reporter};
use super::runner::{Runner, spawn_workers};

/// Everything a run needs, validated. Building this is where every configuration error
/// surfaces; no request has been sent yet.
pub struct PipelineConfig {
    producer: Box<dyn Producer>,
    skip: usize,
    limit: usize,
    rate: Option<RateLimiter>,
    threads: usize,
    buffer_size: usize,
    runner: Arc<Runner>,
    classifier: Classifier,
    recorder: Option<Recorder>,
}

impl PipelineConfig {
    pub fn compile(opts: &FuzzOpts) -> Result<Self> {
        opts.template.validate()?;
        let classifier = Classifier::compile(
            &opts.hide_status,
            &opts.hide_header_size,
            &opts.hide_body_size,
            &opts.hide_pattern,
            &opts.show_pattern,
        )?;
        let extractor = Extractor::compile(&opts.extract, &opts.extract_pipe)?
            .with_timeout(opts.request_timeout);
        let client = build_client(&TransportSettings {
            follow_redirect: opts.template.follow_redirect,
            insecure: opts.template.insecure,
            request_timeout: opts.request_timeout,
            connect_timeout: opts.connect_timeout,
            proxy: opts.proxy.clone(),
        })?;
        let runner = Runner::new(
            client,
            opts.template.clone(),
            extractor,
            opts.body_buffer_size,
        )?;
        let producer = open_source(&opts.source)?;
        // Last: the store is created on disk, so only once everything else is known good.
        let recorder = opts
            .record_path
            .as_deref()
            .map(|p| Recorder::create(p, &opts.template, &opts.extract, &opts.extract_pipe))
            .transpose()?;

        Ok(Self {
            producer,
            skip: opts.skip,
            limit: opts.limit,
            rate: RateLimiter::new(opts.requests_per_second),
            threads: opts.threads.max(1),
            buffer_size: opts.buffer_size.max(1),
            runner: Arc::new(runner),
            classifier,
            recorder,
        })
    }
}

type Streams = (Receiver<Response>, Receiver<usize>);

/// Insert a position filter between `values`/`counts` and a fresh pair of channels.
fn spawn_position<P: Position + 'static>(
    pos: P,
    values: Receiver<String>,
    counts: Receiver<usize>,
    cancel: &CancelToken,
    first_error: &FirstError,
    handles: &mut Vec<StageHandle>,
) -> Result<(Receiver<String>, Receiver<usize>)> {
    let name = pos.name();
    let (vtx, vrx) = bounded(STAGE_CHANNEL_CAP);
    let (ctx, crx) = bounded(COUNT_CHANNEL_CAP);
    let token = cancel.clone();
    handles.push(spawn_stage(name, cancel, first_error, move || {
        run_position_filter(pos, values, counts, vtx, CountSender::new(ctx), &token)
    })?);
    Ok((vrx, crx))
}

/// Spawn every stage from producer to recorder. Returns what the reporter consumes.
fn spawn_stages(
    config: PipelineConfig,
    cancel: &CancelToken,
    first_error: &FirstError,
    handles: &mut Vec<StageHandle>,
) -> Result<Streams> {
    let PipelineConfig {
        producer,
        skip,
        limit,
        rate,
        threads,
        buffer_size,
        runner,
        classifier,
        recorder,
    } = config;

    // The value buffer is the one deep channel: the producer runs ahead by at most this much.
    let (value_tx, mut values) = bounded(buffer_size);
    let (count_tx, mut counts) = bounded(COUNT_CHANNEL_CAP);
    let uninterruptible = producer.uninterruptible();
    let token = cancel.clone();
    let mut stage = spawn_stage("producer", cancel, first_error, move || {
        producer.run(value_tx, CountSender::new(count_tx), &token)
    })?;
    stage.uninterruptible = uninterruptible;
    handles.push(stage);

    if skip > 0 {
        (values, counts) =
            spawn_position(Skip::new(skip), values, counts, cancel, first_error, handles)?;
    }
    if limit > 0 {
        (values, counts) =
            spawn_position(Limit::new(limit), values, counts, cancel, first_error, handles)?;
    }

    if let Some(limiter) = rate {
        debug!("rate: one value every {:?}", limiter.interval());
        let (tx, rx) = bounded(STAGE_CHANNEL_CAP);
        let token = cancel.clone();
        let input = values;
        handles.push(spawn_stage("rate", cancel, first_error, move || {
            limiter.run(input, tx, &token)
        })?);
        values = rx;
    }

    let (response_tx, response_rx) = bounded(STAGE_CHANNEL_CAP);
    handles.extend(spawn_workers(
        runner,
        threads,
        &values,
        &response_tx,
        cancel,
        first_error,
    )?);
    debug!("runner: {} workers", threads);
    // Dropping the last sender closes the channel once every worker is done.
    drop(response_tx);
    drop(values);

    let (marked_tx, marked_rx) = bounded(STAGE_CHANNEL_CAP);
    let token = cancel.clone();
    handles.push(spawn_stage("mark", cancel, first_error, move || {
        classifier.run(response_rx, marked_tx, &token)
    })?);

    let Some(recorder) = recorder else {
        return Ok((marked_rx, counts));
    };
    let (recorded_tx, recorded_rx) = bounded(STAGE_CHANNEL_CAP);
    let (rcount_tx, rcount_rx) = bounded(COUNT_CHANNEL_CAP);
    let token = cancel.clone();
    handles.push(spawn_stage("recorder", cancel, first_error, move || {
        recorder.run(
            marked_rx,
            recorded_tx,
            counts,
            CountSender::new(rcount_tx),
            &token,
        )
    })?);
    Ok((recorded_rx, rcount_rx))
}

/// Run the whole pipeline. The reporter runs on the calling thread; this returns once
/// every stage has closed.
pub fn run_pipeline(
    opts: &FuzzOpts,
    sink: &mut dyn ReportSink,
    cancel: &CancelToken,
) -> Result<ReportStats> {
    let config = PipelineConfig::compile(opts)?;
    let first_error = FirstError::default();
    let mut handles = Vec::new();

    let (responses, counts) = match spawn_stages(config, cancel, &first_error, &mut handles) {
        Ok(streams) => streams,
        Err(e) => {
            cancel.cancel();
            pipeline::join_stages(handles, &first_error);
            return Err(e);
        }
    };

    let stats = Reporter::new(sink).display(responses, counts, cancel);
    debug!("reporter: {} records, joining stages", stats.processed);
    pipeline::join_stages(handles, &first_error);
    pipeline::finish_run(stats, cancel, &first_error)
}
