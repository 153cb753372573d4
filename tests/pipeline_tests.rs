use crossbeam_channel::{Receiver, bounded};
use mockito::{Matcher, Server};
use pelter::engine::{Extractor, RequestTemplate, TransportSettings, build_client};
use pelter::pipeline::filters::{Limit, Skip, run_position_filter};
use pelter::pipeline::producer::{LineProducer, Producer, RangeProducer};
use pelter::pipeline::recorder::{Recorder, read_log};
use pelter::pipeline::runner::{Runner, spawn_workers};
use pelter::pipeline::{CancelToken, CountSender, FirstError, join_stages};
use pelter::{CollectSink, FuzzOpts, PipelineError, Response, ValueSource};
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const CAP: usize = 4096;

fn drain<T>(rx: Receiver<T>) -> Vec<T> {
    rx.iter().collect()
}

fn run_producer(p: Box<dyn Producer>) -> (Receiver<String>, Receiver<usize>) {
    let cancel = CancelToken::new();
    let (vtx, vrx) = bounded(CAP);
    let (ctx, crx) = bounded(CAP);
    p.run(vtx, CountSender::new(ctx), &cancel).unwrap();
    (vrx, crx)
}

// --- producer ---

#[test]
fn test_range_values_ascending_with_final_count() {
    let p = RangeProducer::new(8, 12, "%03d").unwrap();
    let (vrx, crx) = run_producer(Box::new(p));
    assert_eq!(drain(vrx), vec!["008", "009", "010", "011", "012"]);
    assert_eq!(drain(crx).last(), Some(&5));
}

#[test]
fn test_range_single_value() {
    let (vrx, crx) = run_producer(Box::new(RangeProducer::new(-1, -1, "%d").unwrap()));
    assert_eq!(drain(vrx), vec!["-1"]);
    assert_eq!(drain(crx).last(), Some(&1));
}

#[test]
fn test_line_source_counts_every_value() {
    let p = LineProducer::new(Cursor::new(b"admin\nroot\nguest".to_vec()));
    let (vrx, crx) = run_producer(Box::new(p));
    assert_eq!(drain(vrx), vec!["admin", "root", "guest"]);
    assert_eq!(drain(crx), vec![1, 2, 3]);
}

// --- skip / limit ---

/// Values and final count of range 0..n through skip then limit, each in its own thread.
fn skip_limit(n: usize, skip: usize, limit: usize) -> (Vec<String>, Option<usize>) {
    let cancel = CancelToken::new();
    let (vtx, vrx) = bounded(CAP);
    let (ctx, crx) = bounded(CAP);
    if n > 0 {
        let p = RangeProducer::new(0, n as i64 - 1, "%d").unwrap();
        let c = cancel.clone();
        thread::spawn(move || Box::new(p).run(vtx, CountSender::new(ctx), &c));
    } else {
        drop((vtx, ctx));
    }

    let (stx, srx) = bounded(CAP);
    let (sctx, scrx) = bounded(CAP);
    let c = cancel.clone();
    thread::spawn(move || {
        run_position_filter(Skip::new(skip), vrx, crx, stx, CountSender::new(sctx), &c)
    });

    let (ltx, lrx) = bounded(CAP);
    let (lctx, lcrx) = bounded(CAP);
    let c = cancel.clone();
    let h = thread::spawn(move || {
        run_position_filter(Limit::new(limit), srx, scrx, ltx, CountSender::new(lctx), &c)
    });

    let values = drain(lrx);
    let counts = drain(lcrx);
    h.join().unwrap().unwrap();
    (values, counts.last().copied())
}

#[test]
fn test_skip_then_limit_yields_expected_slice() {
    for n in 0..=12usize {
        for skip in 0..=n + 2 {
            for limit in 1..=n.max(1) {
                let (values, count) = skip_limit(n, skip, limit);
                let expected: Vec<String> =
                    (skip..n).take(limit).map(|i| i.to_string()).collect();
                assert_eq!(values, expected, "n={n} skip={skip} limit={limit}");
                if n > 0 {
                    assert_eq!(count, Some(expected.len()), "n={n} skip={skip} limit={limit}");
                }
            }
        }
    }
}

#[test]
fn test_limit_stops_an_endless_upstream() {
    let (values, count) = skip_limit(100_000, 0, 3);
    assert_eq!(values, vec!["0", "1", "2"]);
    assert_eq!(count, Some(3));
}

// --- worker pool ---

fn client() -> reqwest::blocking::Client {
    build_client(&TransportSettings {
        follow_redirect: 0,
        insecure: false,
        request_timeout: Duration::from_secs(10),
        connect_timeout: Duration::from_secs(5),
        proxy: None,
    })
    .unwrap()
}

fn pool_output(url: &str, threads: usize, n: usize) -> Vec<Response> {
    let runner = Runner::new(client(), RequestTemplate::new(url), Extractor::default(), 1024).unwrap();
    let cancel = CancelToken::new();
    let first_error = FirstError::default();
    let (vtx, vrx) = bounded(CAP);
    for i in 0..n {
        vtx.send(i.to_string()).unwrap();
    }
    drop(vtx);
    let (rtx, rrx) = bounded(4);
    let handles = spawn_workers(Arc::new(runner), threads, &vrx, &rtx, &cancel, &first_error).unwrap();
    drop(rtx);
    drop(vrx);
    let out = drain(rrx);
    join_stages(handles, &first_error);
    assert!(first_error.take().is_none());
    out
}

#[test]
fn test_worker_pool_one_record_per_value() {
    let mut server = Server::new();
    let _m = server
        .mock("GET", Matcher::Regex(r"^/item/\d+$".into()))
        .with_status(200)
        .with_body("ok")
        .create();
    let url = format!("{}/item/FUZZ", server.url());
    for threads in [1, 3, 8] {
        let out = pool_output(&url, threads, 25);
        assert_eq!(out.len(), 25, "threads={threads}");
        let values: HashSet<_> = out.iter().map(|r| r.value.clone()).collect();
        assert_eq!(values.len(), 25);
        assert!(out.iter().all(|r| r.status == 200 && r.body_bytes == 2));
        assert!(out.iter().all(|r| r.header_bytes > 0));
    }
}

#[test]
fn test_worker_pool_records_transport_errors() {
    // Nothing listens on the discard port.
    let out = pool_output("http://127.0.0.1:9/FUZZ", 2, 4);
    assert_eq!(out.len(), 4);
    assert!(out.iter().all(|r| r.status == 0 && r.error.is_some()));
}

#[test]
fn test_body_is_truncated_for_extraction_only() {
    let mut server = Server::new();
    let body = format!("{}TAIL", "a".repeat(100));
    let _m = server
        .mock("GET", "/x")
        .with_status(200)
        .with_body(&body)
        .create();
    let extractor = Extractor::compile(&["TAIL".into(), "a+".into()], &[]).unwrap();
    let runner = Runner::new(
        client(),
        RequestTemplate::new(format!("{}/FUZZ", server.url())),
        extractor,
        10,
    )
    .unwrap();
    let r = runner.execute("x");
    assert_eq!(r.body_bytes, 104);
    assert_eq!(r.body.len(), 10);
    assert_eq!(r.extract, vec!["aaaaaaaaaa"]);
}

#[test]
fn test_redirects_followed_up_to_limit() {
    let mut server = Server::new();
    let _r = server
        .mock("GET", "/start")
        .with_status(302)
        .with_header("location", "/final")
        .create();
    let _f = server
        .mock("GET", "/final")
        .with_status(200)
        .with_body("landed")
        .create();
    let url = format!("{}/FUZZ", server.url());

    let runner = Runner::new(client(), RequestTemplate::new(&url), Extractor::default(), 64).unwrap();
    assert_eq!(runner.execute("start").status, 302);

    let follow = build_client(&TransportSettings {
        follow_redirect: 1,
        insecure: false,
        request_timeout: Duration::from_secs(10),
        connect_timeout: Duration::from_secs(5),
        proxy: None,
    })
    .unwrap();
    let runner = Runner::new(follow, RequestTemplate::new(&url), Extractor::default(), 64).unwrap();
    let r = runner.execute("start");
    assert_eq!(r.status, 200);
    assert_eq!(r.body, b"landed");
}

#[test]
fn test_headers_and_body_are_substituted() {
    let mut server = Server::new();
    let m = server
        .mock("POST", "/login")
        .match_header("x-user", "bob")
        .match_body("name=bob")
        .with_status(201)
        .create();
    let mut t = RequestTemplate::new(format!("{}/login", server.url()));
    t.method = "POST".into();
    t.add_header_line("X-User: FUZZ").unwrap();
    t.body = Some("name=FUZZ".into());
    let runner = Runner::new(client(), t, Extractor::default(), 64).unwrap();
    assert_eq!(runner.execute("bob").status, 201);
    m.assert();
}

// --- recorder ---

#[test]
fn test_recorder_relays_and_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.json");
    let template = RequestTemplate::new("http://example.com/FUZZ");
    let recorder = Recorder::create(&path, &template, &["id=\\d+".into()], &[]).unwrap();

    let input: Vec<Response> = (0..5)
        .map(|i| Response {
            value: format!("v{i}"),
            status: 200 + i,
            header_bytes: 10 * i as usize,
            body_bytes: 100 + i as usize,
            duration: Duration::from_millis(u64::from(i)),
            extract: vec![format!("id={i}")],
            hidden: i % 2 == 0,
            ..Response::default()
        })
        .collect();

    let cancel = CancelToken::new();
    let (itx, irx) = bounded(CAP);
    let (otx, orx) = bounded(CAP);
    let (ctx, crx) = bounded(CAP);
    let (octx, ocrx) = bounded(CAP);
    for r in &input {
        itx.send(r.clone()).unwrap();
    }
    ctx.send(5).unwrap();
    drop((itx, ctx));
    recorder
        .run(irx, otx, crx, CountSender::new(octx), &cancel)
        .unwrap();

    let relayed = drain(orx);
    assert_eq!(relayed.len(), 5);
    for (a, b) in input.iter().zip(&relayed) {
        assert_eq!(a.value, b.value);
        assert_eq!(a.hidden, b.hidden);
    }
    assert_eq!(drain(ocrx), vec![5]);

    let log = read_log(&path).unwrap();
    assert_eq!(log.meta.template, template);
    assert_eq!(log.meta.extract, vec!["id=\\d+"]);
    assert_eq!(log.responses.len(), 5);
    for (a, b) in input.iter().zip(&log.responses) {
        assert_eq!(a.value, b.value);
        assert_eq!(a.status, b.status);
        assert_eq!(a.header_bytes, b.header_bytes);
        assert_eq!(a.body_bytes, b.body_bytes);
        assert_eq!(a.extract, b.extract);
        assert_eq!(a.hidden, b.hidden);
    }
    let summary = log.summary.unwrap();
    assert_eq!((summary.records, summary.hidden), (5, 3));
    assert!(!summary.cancelled);
}

// --- full runs ---

fn range_opts(url: String, first: i64, last: i64) -> FuzzOpts {
    let mut opts = FuzzOpts::new(
        ValueSource::Range {
            first,
            last,
            format: "%d".into(),
        },
        RequestTemplate::new(url),
    );
    opts.threads = 4;
    opts.buffer_size = 16;
    opts
}

#[test]
fn test_full_run_hides_and_records() {
    let mut server = Server::new();
    let _miss = server
        .mock("GET", Matcher::Regex(r"^/user/[0-4]$".into()))
        .with_status(404)
        .with_body("no such user")
        .create();
    let _hit = server
        .mock("GET", Matcher::Regex(r"^/user/[5-9]$".into()))
        .with_status(200)
        .with_body("token=abc123")
        .create();

    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("run.json");
    let mut opts = range_opts(format!("{}/user/FUZZ", server.url()), 0, 9);
    opts.hide_status = vec![404];
    opts.extract = vec!["token=[a-z0-9]+".into()];
    opts.record_path = Some(store.clone());

    let mut sink = CollectSink::default();
    let stats = pelter::fuzz(&opts, &mut sink, &CancelToken::new()).unwrap();
    assert_eq!(stats.total, 10);
    assert_eq!(stats.processed, 10);
    assert_eq!((stats.shown, stats.hidden, stats.errors), (5, 5, 0));
    assert!(sink.finished);
    let mut shown: Vec<_> = sink.shown.iter().map(|r| r.value.clone()).collect();
    shown.sort();
    assert_eq!(shown, vec!["5", "6", "7", "8", "9"]);
    assert!(sink.shown.iter().all(|r| r.extract == vec!["token=abc123"]));

    let log = read_log(&store).unwrap();
    assert_eq!(log.responses.len(), 10);
    assert_eq!(log.responses.iter().filter(|r| r.hidden).count(), 5);
    assert_eq!(log.summary.map(|s| s.records), Some(10));
}

#[test]
fn test_full_run_with_skip_and_limit() {
    let mut server = Server::new();
    let _m = server
        .mock("GET", Matcher::Regex(r"^/p/\d+$".into()))
        .with_status(200)
        .create();
    let mut opts = range_opts(format!("{}/p/FUZZ", server.url()), 1, 100);
    opts.skip = 10;
    opts.limit = 5;

    let mut sink = CollectSink::default();
    let stats = pelter::fuzz(&opts, &mut sink, &CancelToken::new()).unwrap();
    assert_eq!(stats.processed, 5);
    assert_eq!(stats.total, 5);
    let mut values: Vec<i64> = sink.shown.iter().map(|r| r.value.parse().unwrap()).collect();
    values.sort();
    assert_eq!(values, vec![11, 12, 13, 14, 15]);
}

#[test]
fn test_empty_wordlist_finishes_with_zero() {
    let dir = tempfile::tempdir().unwrap();
    let words = dir.path().join("empty.txt");
    std::fs::write(&words, "").unwrap();
    let opts = FuzzOpts::new(
        ValueSource::File(words),
        RequestTemplate::new("http://127.0.0.1:9/FUZZ"),
    );
    let mut sink = CollectSink::default();
    let stats = pelter::fuzz(&opts, &mut sink, &CancelToken::new()).unwrap();
    assert_eq!(stats, pelter::ReportStats::default());
    assert!(sink.finished);
}

#[test]
fn test_config_error_before_any_request() {
    let mut server = Server::new();
    let m = server.mock("GET", Matcher::Any).expect(0).create();
    let mut opts = range_opts(format!("{}/FUZZ", server.url()), 0, 3);
    opts.hide_pattern = vec!["(unclosed".into()];
    let err = pelter::fuzz(&opts, &mut CollectSink::default(), &CancelToken::new()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::Pattern { .. })
    ));
    m.assert();
}

#[test]
fn test_missing_wordlist_is_a_config_error() {
    let opts = FuzzOpts::new(
        ValueSource::File("/nonexistent/pelter/words.txt".into()),
        RequestTemplate::new("http://127.0.0.1:9/FUZZ"),
    );
    assert!(pelter::fuzz(&opts, &mut CollectSink::default(), &CancelToken::new()).is_err());
}

#[test]
fn test_cancel_shuts_down_every_stage() {
    let mut server = Server::new();
    let _m = server
        .mock("GET", Matcher::Regex(r"^/slow/\d+$".into()))
        .with_status(200)
        .create();
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("run.json");
    let mut opts = range_opts(format!("{}/slow/FUZZ", server.url()), 0, 1_000_000);
    opts.requests_per_second = 2.0;
    opts.skip = 1;
    opts.limit = 500_000;
    opts.record_path = Some(store.clone());

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        trigger.cancel();
    });

    let started = Instant::now();
    let err = pelter::fuzz(&opts, &mut CollectSink::default(), &cancel).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::Cancelled)
    ));
    assert!(started.elapsed() < Duration::from_secs(5));

    let log = read_log(&store).unwrap();
    assert!(log.responses.len() <= 2);
    assert!(log.summary.unwrap().cancelled);
}
