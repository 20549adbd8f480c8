//! Integration tests for the submission and retrieval phases.
//!
//! The processing service is replaced by [`ScriptedClient`], an in-memory
//! `SessionClient` whose answers are scripted per test and which records
//! every call it receives. No network access is needed.
//!
//! Run with:
//!   cargo test --test batch -- --nocapture

use async_trait::async_trait;
use htr_batch::models::ModelId;
use htr_batch::session::ImagePayload;
use htr_batch::{
    retrieve_batch, submit_batch, BatchConfig, BatchProgressCallback, HtrError, ImageSource,
    ImageOutcome, JobError, JobId, JobRecord, JobState, Manifest, ProcessRequest,
    RetrievalOutcome, Session, SessionClient, SessionError, SkipReason,
};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

// ── Scripted session client ──────────────────────────────────────────────────

/// Scripted answer: `Ok(value)` or `Err(http status)`.
type Answer<T> = Result<T, u16>;

fn to_session_error(status: u16) -> SessionError {
    match status {
        401 | 403 => SessionError::Unauthorized { status },
        404 => SessionError::NotFound {
            what: "scripted".into(),
        },
        _ => SessionError::Status {
            status,
            body: "scripted failure".into(),
        },
    }
}

#[derive(Default)]
struct ScriptedClient {
    refuse_login: bool,
    refuse_refresh: bool,
    submissions: Mutex<VecDeque<Answer<String>>>,
    statuses: HashMap<String, Answer<String>>,
    results: HashMap<String, Answer<Vec<u8>>>,

    requests: Mutex<Vec<ProcessRequest>>,
    polled: Mutex<Vec<String>>,
    fetched: Mutex<Vec<String>>,
    /// Access token presented with each submit / poll, in call order.
    tokens: Mutex<Vec<String>>,
    refreshes: AtomicUsize,
    teardowns: AtomicUsize,
    teardown_token: Mutex<Option<String>>,
}

impl ScriptedClient {
    fn submitting(answers: Vec<Answer<&str>>) -> Self {
        Self {
            submissions: Mutex::new(
                answers
                    .into_iter()
                    .map(|a| a.map(str::to_string))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn status(mut self, id: &str, answer: Answer<&str>) -> Self {
        self.statuses
            .insert(id.to_string(), answer.map(str::to_string));
        self
    }

    fn result(mut self, id: &str, answer: Answer<&[u8]>) -> Self {
        self.results.insert(id.to_string(), answer.map(<[u8]>::to_vec));
        self
    }

    fn requests(&self) -> Vec<ProcessRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn polled(&self) -> Vec<String> {
        self.polled.lock().unwrap().clone()
    }

    fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }

    fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionClient for ScriptedClient {
    async fn authenticate(&self) -> Result<Session, SessionError> {
        if self.refuse_login {
            return Err(SessionError::Unauthorized { status: 401 });
        }
        Ok(Session::new("access", Some("refresh".into())))
    }

    async fn refresh(&self, session: &Session) -> Result<Session, SessionError> {
        if self.refuse_refresh {
            return Err(SessionError::Unauthorized { status: 400 });
        }
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Session::new(
            format!("access-{n}"),
            session.refresh_token().map(str::to_string),
        ))
    }

    async fn submit(
        &self,
        session: &Session,
        request: &ProcessRequest,
    ) -> Result<String, SessionError> {
        self.tokens.lock().unwrap().push(session.access_token().to_string());
        self.requests.lock().unwrap().push(request.clone());
        self.submissions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(500))
            .map_err(to_session_error)
    }

    async fn poll_status(
        &self,
        session: &Session,
        process_id: &str,
    ) -> Result<String, SessionError> {
        self.tokens.lock().unwrap().push(session.access_token().to_string());
        self.polled.lock().unwrap().push(process_id.to_string());
        self.statuses
            .get(process_id)
            .cloned()
            .unwrap_or(Err(404))
            .map_err(to_session_error)
    }

    async fn fetch_result(
        &self,
        _session: &Session,
        process_id: &str,
    ) -> Result<Vec<u8>, SessionError> {
        self.fetched.lock().unwrap().push(process_id.to_string());
        self.results
            .get(process_id)
            .cloned()
            .unwrap_or(Err(404))
            .map_err(to_session_error)
    }

    async fn teardown(&self, session: Session) -> Result<(), SessionError> {
        *self.teardown_token.lock().unwrap() = Some(session.access_token().to_string());
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

const NS: &str = "http://schema.primaresearch.org/PAGE/gts/pagecontent/2013-07-15";

fn page_xml(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<PcGts xmlns="{NS}"><Page imageFilename="x.jpg" imageWidth="100" imageHeight="100">{body}</Page></PcGts>"#
    )
}

const GOOD_LAYOUT: &str = r#"<TextRegion id="r1"><Coords points="0,0 100,0 100,50 0,50"/>
<TextLine id="l1"><Coords points="0,0 100,0 100,20 0,20"/><Baseline points="0,18 100,18"/></TextLine>
</TextRegion>"#;

const LINE_WITHOUT_BASELINE: &str = r#"<TextRegion id="r1"><Coords points="0,0 100,0 100,50 0,50"/>
<TextLine id="l1"><Coords points="0,0 100,0 100,20 0,20"/></TextLine>
</TextRegion>"#;

/// Write `names` as tiny images into `dir`; returns their sources in order.
fn images(dir: &Path, names: &[&str]) -> Vec<ImageSource> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            std::fs::write(&path, [0xFFu8, 0xD8, 0xFF, 0xE0]).unwrap();
            ImageSource::Path(path)
        })
        .collect()
}

fn write_layout(dir: &Path, stem: &str, body: &str) -> PathBuf {
    let path = dir.join("xml").join(format!("{stem}.xml"));
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, page_xml(body)).unwrap();
    path
}

fn config() -> BatchConfig {
    BatchConfig::builder().htr_model("Text Titan").build().unwrap()
}

fn record(status: JobState) -> JobRecord {
    JobRecord {
        status,
        source: ImageSource::Path(PathBuf::from("images/p.jpg")),
        htr_model: ModelId::Numeric(309593),
        layout_xml: None,
        line_detection_model: Some(ModelId::Numeric(51962)),
        error: None,
    }
}

fn url_record(url: String) -> JobRecord {
    JobRecord {
        source: ImageSource::Url(url),
        ..record(JobState::Reported("CREATED".into()))
    }
}

fn reported(status: &str) -> JobState {
    JobState::Reported(status.into())
}

/// Serve `routes` (path → body) on a local port; other paths answer 404.
/// Returns the base URL.
async fn serve(routes: Vec<(&'static str, &'static str)>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let routes = routes.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let path = request.split_whitespace().nth(1).unwrap_or("/");
                let response = match routes.iter().find(|(p, _)| *p == path) {
                    Some((_, body)) => format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\n\
                         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    ),
                    None => "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\
                             Connection: close\r\n\r\n"
                        .to_string(),
                };
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    format!("http://{addr}")
}

// ── Submission ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_submission_is_recorded_and_batch_continues() {
    let dir = TempDir::new().unwrap();
    let sources = images(dir.path(), &["a.jpg", "b.jpg", "c.jpg"]);
    let client = ScriptedClient::submitting(vec![Ok("101"), Err(500), Ok("103")])
        .status("101", Ok("CREATED"))
        .status("103", Ok("WAITING"));

    let output = submit_batch(&client, &sources, &config()).await.unwrap();

    let keys: Vec<_> = output.manifest.iter().map(|(id, _)| id.key()).collect();
    assert_eq!(keys, vec!["101", "unsubmitted-1", "103"]);

    let failed = output
        .manifest
        .get(&JobId::Unsubmitted { ordinal: 1 })
        .unwrap();
    assert_eq!(failed.status, JobState::NotSubmitted);
    assert_eq!(failed.source, sources[1]);
    assert!(matches!(failed.error, Some(JobError::Submission { .. })));

    assert_eq!(
        output.manifest.get(&JobId::Remote("103".into())).unwrap().status,
        JobState::Reported("WAITING".into())
    );
    assert_eq!(output.stats.total, 3);
    assert_eq!(output.stats.submitted, 2);
    assert_eq!(output.stats.failed, 1);
    assert_eq!(client.requests().len(), 3);
    // Exactly one status check per accepted submission.
    assert_eq!(client.polled(), vec!["101", "103"]);
    assert_eq!(client.teardowns(), 1);
}

#[tokio::test]
async fn several_failures_keep_distinct_entries() {
    let dir = TempDir::new().unwrap();
    let sources = images(dir.path(), &["a.jpg", "b.jpg", "c.jpg"]);
    let client = ScriptedClient::submitting(vec![Err(503), Err(500), Err(401)]);

    let output = submit_batch(&client, &sources, &config()).await.unwrap();

    assert_eq!(output.manifest.len(), 3);
    let recorded: Vec<_> = output.manifest.iter().map(|(_, r)| r.source.clone()).collect();
    assert_eq!(recorded, sources);
    assert!(client.polled().is_empty());
}

#[tokio::test]
async fn layout_hint_replaces_line_detection() {
    let dir = TempDir::new().unwrap();
    let sources = images(dir.path(), &["with.jpg", "without.jpg"]);
    let layout = write_layout(dir.path(), "with", GOOD_LAYOUT);
    let client = ScriptedClient::submitting(vec![Ok("1"), Ok("2")])
        .status("1", Ok("CREATED"))
        .status("2", Ok("CREATED"));

    let output = submit_batch(&client, &sources, &config()).await.unwrap();

    let requests = client.requests();
    let hint = requests[0].content.as_ref().expect("layout hint sent");
    assert_eq!(hint.regions[0].id, "r1");
    assert_eq!(hint.regions[0].lines[0].baseline.points, "0,18 100,18");
    assert!(requests[0].config.line_detection.is_none());

    assert!(requests[1].content.is_none());
    assert_eq!(
        requests[1].config.line_detection.as_ref().unwrap().model_id,
        ModelId::Numeric(51962)
    );
    for r in &requests {
        assert_eq!(r.config.text_recognition.htr_id, ModelId::Numeric(309593));
        assert!(matches!(r.image, ImagePayload::Base64(_)));
    }

    let with = output.manifest.get(&JobId::Remote("1".into())).unwrap();
    assert_eq!(with.layout_xml.as_deref(), Some(layout.as_path()));
    assert_eq!(with.line_detection_model, None);
    let without = output.manifest.get(&JobId::Remote("2".into())).unwrap();
    assert_eq!(without.layout_xml, None);
    assert_eq!(without.line_detection_model, Some(ModelId::Numeric(51962)));
    assert_eq!(output.stats.with_layout, 1);
}

#[tokio::test]
async fn incomplete_layout_is_not_submitted() {
    let dir = TempDir::new().unwrap();
    let sources = images(dir.path(), &["p.jpg"]);
    write_layout(dir.path(), "p", LINE_WITHOUT_BASELINE);
    let client = ScriptedClient::submitting(vec![Ok("1")]);

    let output = submit_batch(&client, &sources, &config()).await.unwrap();

    let (id, rec) = output.manifest.iter().next().unwrap();
    assert_eq!(id, &JobId::Unsubmitted { ordinal: 0 });
    assert_eq!(rec.status, JobState::NotSubmitted);
    match &rec.error {
        Some(JobError::Layout { detail, .. }) => assert!(detail.contains("l1"), "{detail}"),
        other => panic!("expected layout error, got {other:?}"),
    }
    assert!(client.requests().is_empty());
}

#[tokio::test]
async fn unreadable_image_is_recorded() {
    let dir = TempDir::new().unwrap();
    let missing = ImageSource::Path(dir.path().join("gone.jpg"));
    let client = ScriptedClient::submitting(vec![Ok("1")]);

    let output = submit_batch(&client, &[missing], &config()).await.unwrap();

    let (_, rec) = output.manifest.iter().next().unwrap();
    assert_eq!(rec.status, JobState::NotSubmitted);
    assert!(matches!(rec.error, Some(JobError::Source { .. })));
    assert!(client.requests().is_empty());
}

#[tokio::test]
async fn url_sources_are_passed_by_reference() {
    let url = "https://example.org/scans/0001.jpg";
    let client = ScriptedClient::submitting(vec![Ok("7")]).status("7", Ok("CREATED"));

    let output = submit_batch(&client, &[ImageSource::Url(url.into())], &config())
        .await
        .unwrap();

    assert_eq!(
        client.requests()[0].image,
        ImagePayload::ImageUrl(url.into())
    );
    let rec = output.manifest.get(&JobId::Remote("7".into())).unwrap();
    assert_eq!(rec.source, ImageSource::Url(url.into()));
}

#[tokio::test]
async fn failed_status_check_leaves_state_unknown() {
    let dir = TempDir::new().unwrap();
    let sources = images(dir.path(), &["a.jpg"]);
    let client = ScriptedClient::submitting(vec![Ok("55")]).status("55", Err(502));

    let output = submit_batch(&client, &sources, &config()).await.unwrap();

    let rec = output.manifest.get(&JobId::Remote("55".into())).unwrap();
    assert_eq!(rec.status, JobState::Unknown);
    assert!(matches!(rec.error, Some(JobError::Poll { .. })));
    assert_eq!(output.stats.submitted, 1);
    assert_eq!(output.stats.status_unknown, 1);
}

#[tokio::test]
async fn rejected_token_is_refreshed_before_the_next_source() {
    let dir = TempDir::new().unwrap();
    let sources = images(dir.path(), &["a.jpg", "b.jpg", "c.jpg"]);
    let client = ScriptedClient::submitting(vec![Ok("1"), Err(401), Ok("3")])
        .status("1", Ok("CREATED"))
        .status("3", Ok("CREATED"));

    let output = submit_batch(&client, &sources, &config()).await.unwrap();

    // The rejected source is recorded, not submitted a second time.
    assert_eq!(client.requests().len(), 3);
    let failed = output
        .manifest
        .get(&JobId::Unsubmitted { ordinal: 1 })
        .unwrap();
    assert!(matches!(failed.error, Some(JobError::Submission { .. })));

    assert_eq!(client.refreshes(), 1);
    // submit 1, poll 1, submit 2, then submit 3 and poll 3 with the new token
    assert_eq!(
        client.tokens(),
        vec!["access", "access", "access", "access-1", "access-1"]
    );
    assert_eq!(
        client.teardown_token.lock().unwrap().as_deref(),
        Some("access-1")
    );
    assert_eq!(output.stats.submitted, 2);
}

#[tokio::test]
async fn failed_refresh_keeps_the_batch_going() {
    let dir = TempDir::new().unwrap();
    let sources = images(dir.path(), &["a.jpg", "b.jpg"]);
    let client = ScriptedClient {
        refuse_refresh: true,
        ..ScriptedClient::submitting(vec![Err(401), Ok("2")]).status("2", Ok("CREATED"))
    };

    let output = submit_batch(&client, &sources, &config()).await.unwrap();

    assert_eq!(client.tokens(), vec!["access", "access", "access"]);
    assert_eq!(output.stats.submitted, 1);
    assert_eq!(output.stats.failed, 1);
    assert_eq!(client.teardowns(), 1);
}

#[tokio::test]
async fn other_failures_do_not_refresh() {
    let dir = TempDir::new().unwrap();
    let sources = images(dir.path(), &["a.jpg", "b.jpg"]);
    let client = ScriptedClient::submitting(vec![Err(500), Ok("2")]).status("2", Err(404));

    submit_batch(&client, &sources, &config()).await.unwrap();

    assert_eq!(client.refreshes(), 0);
}

#[tokio::test]
async fn refused_login_submits_nothing() {
    let dir = TempDir::new().unwrap();
    let sources = images(dir.path(), &["a.jpg", "b.jpg"]);
    let client = ScriptedClient {
        refuse_login: true,
        ..ScriptedClient::submitting(vec![Ok("1"), Ok("2")])
    };

    let err = submit_batch(&client, &sources, &config()).await.unwrap_err();

    assert!(matches!(err, HtrError::AuthenticationFailed { .. }));
    assert!(client.requests().is_empty());
    assert_eq!(client.teardowns(), 0);
}

#[tokio::test]
async fn checkpoint_matches_final_manifest() {
    let dir = TempDir::new().unwrap();
    let sources = images(dir.path(), &["a.jpg", "b.jpg"]);
    let checkpoint = dir.path().join("jobs").join("run.json");
    let config = BatchConfig::builder()
        .checkpoint_path(&checkpoint)
        .build()
        .unwrap();
    let client = ScriptedClient::submitting(vec![Ok("1"), Err(500)]).status("1", Ok("CREATED"));

    let output = submit_batch(&client, &sources, &config).await.unwrap();

    assert_eq!(Manifest::load(&checkpoint).unwrap(), output.manifest);
}

#[tokio::test]
async fn progress_events_follow_each_source() {
    #[derive(Default)]
    struct Counts {
        started: AtomicUsize,
        submitted: AtomicUsize,
        failed: AtomicUsize,
        complete: AtomicUsize,
    }
    impl BatchProgressCallback for Counts {
        fn on_job_start(&self, _: usize, _: usize, _: &str) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
        fn on_job_submitted(&self, _: usize, _: usize, _: &str, _: &str) {
            self.submitted.fetch_add(1, Ordering::SeqCst);
        }
        fn on_job_failed(&self, _: usize, _: usize, _: &str) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_batch_complete(&self, _: usize, submitted: usize) {
            self.complete.store(submitted, Ordering::SeqCst);
        }
    }

    let dir = TempDir::new().unwrap();
    let sources = images(dir.path(), &["a.jpg", "b.jpg", "c.jpg"]);
    let counts = Arc::new(Counts::default());
    let config = BatchConfig::builder()
        .progress_callback(counts.clone())
        .build()
        .unwrap();
    let client = ScriptedClient::submitting(vec![Ok("1"), Err(500), Ok("3")])
        .status("1", Ok("CREATED"))
        .status("3", Ok("CREATED"));

    submit_batch(&client, &sources, &config).await.unwrap();

    assert_eq!(counts.started.load(Ordering::SeqCst), 3);
    assert_eq!(counts.submitted.load(Ordering::SeqCst), 2);
    assert_eq!(counts.failed.load(Ordering::SeqCst), 1);
    assert_eq!(counts.complete.load(Ordering::SeqCst), 2);
}

// ── Retrieval ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn only_finished_jobs_are_fetched() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("results");
    let mut manifest = Manifest::new();
    manifest.record_submission(JobId::Remote("201".into()), record(reported("CREATED")));
    manifest.record_submission(JobId::Remote("202".into()), record(reported("CREATED")));
    manifest.record_submission(
        JobId::Unsubmitted { ordinal: 2 },
        record(JobState::NotSubmitted),
    );

    let client = ScriptedClient::default()
        .status("201", Ok("FINISHED"))
        .status("202", Ok("RUNNING"))
        .result("201", Ok(b"<PcGts/>"));

    let report = retrieve_batch(&client, &manifest, &out, &config()).await.unwrap();

    assert_eq!(client.polled(), vec!["201", "202"]);
    assert_eq!(client.fetched(), vec!["201"]);
    assert_eq!(std::fs::read(out.join("201.xml")).unwrap(), b"<PcGts/>");
    assert!(!out.join("202.xml").exists());

    let outcomes: Vec<_> = report.entries.iter().map(|e| e.outcome.clone()).collect();
    assert_eq!(
        outcomes,
        vec![
            RetrievalOutcome::Retrieved {
                path: out.join("201.xml")
            },
            RetrievalOutcome::Skipped {
                reason: SkipReason::NotFinished
            },
            RetrievalOutcome::Skipped {
                reason: SkipReason::NotSubmitted
            },
        ]
    );
    assert_eq!(report.entries[1].state, JobState::Reported("RUNNING".into()));
    assert_eq!((report.retrieved(), report.skipped(), report.failed()), (1, 2, 0));
    assert_eq!(client.teardowns(), 1);
}

#[tokio::test]
async fn stored_state_is_not_trusted() {
    let dir = TempDir::new().unwrap();
    let mut manifest = Manifest::new();
    // Stale "FINISHED" must not trigger a fetch; stale "CREATED" must not block one.
    manifest.record_submission(JobId::Remote("1".into()), record(reported("FINISHED")));
    manifest.record_submission(JobId::Remote("2".into()), record(reported("CREATED")));

    let client = ScriptedClient::default()
        .status("1", Ok("FAILED"))
        .status("2", Ok("FINISHED"))
        .result("2", Ok(b"<PcGts/>"));

    let report = retrieve_batch(&client, &manifest, dir.path(), &config())
        .await
        .unwrap();

    assert_eq!(client.fetched(), vec!["2"]);
    assert_eq!(report.retrieved(), 1);
    assert_eq!(report.entries[0].state, JobState::Reported("FAILED".into()));
}

#[tokio::test]
async fn fetch_and_poll_failures_do_not_stop_retrieval() {
    let dir = TempDir::new().unwrap();
    let mut manifest = Manifest::new();
    for id in ["301", "302", "303"] {
        manifest.record_submission(JobId::Remote(id.into()), record(JobState::Unknown));
    }

    let client = ScriptedClient::default()
        .status("301", Ok("FINISHED"))
        .status("302", Err(500))
        .status("303", Ok("FINISHED"))
        .result("301", Err(404))
        .result("303", Ok(b"<PcGts/>"));

    let report = retrieve_batch(&client, &manifest, dir.path(), &config())
        .await
        .unwrap();

    assert!(matches!(
        &report.entries[0].outcome,
        RetrievalOutcome::Failed { error: JobError::Fetch { job_id, .. } } if job_id == "301"
    ));
    assert!(matches!(
        &report.entries[1].outcome,
        RetrievalOutcome::Failed { error: JobError::Poll { .. } }
    ));
    // The stored state stands in when polling fails.
    assert_eq!(report.entries[1].state, JobState::Unknown);
    assert!(matches!(
        report.entries[2].outcome,
        RetrievalOutcome::Retrieved { .. }
    ));
    assert_eq!((report.retrieved(), report.failed()), (1, 2));
}

#[tokio::test]
async fn refused_login_retrieves_nothing() {
    let dir = TempDir::new().unwrap();
    let mut manifest = Manifest::new();
    manifest.record_submission(JobId::Remote("1".into()), record(JobState::Unknown));
    let client = ScriptedClient {
        refuse_login: true,
        ..ScriptedClient::default().status("1", Ok("FINISHED"))
    };

    let err = retrieve_batch(&client, &manifest, dir.path(), &config())
        .await
        .unwrap_err();

    assert!(matches!(err, HtrError::AuthenticationFailed { .. }));
    assert!(client.polled().is_empty());
}

#[tokio::test]
async fn submitted_manifest_round_trips_into_retrieval() {
    let dir = TempDir::new().unwrap();
    let sources = images(dir.path(), &["a.jpg", "b.jpg"]);
    let path = dir.path().join("jobs/run.json");

    let submit = ScriptedClient::submitting(vec![Ok("11"), Err(500)]).status("11", Ok("CREATED"));
    submit_batch(&submit, &sources, &config())
        .await
        .unwrap()
        .manifest
        .persist(&path)
        .unwrap();

    let manifest = Manifest::load(&path).unwrap();
    let client = ScriptedClient::default()
        .status("11", Ok("FINISHED"))
        .result("11", Ok(b"<PcGts/>"));
    let report = retrieve_batch(&client, &manifest, &dir.path().join("results"), &config())
        .await
        .unwrap();

    assert_eq!(report.entries.len(), 2);
    assert_eq!(report.entries[0].job_id, "11");
    assert_eq!(report.entries[1].job_id, "unsubmitted-1");
    assert!(dir.path().join("results/11.xml").is_file());
}

#[tokio::test]
async fn rejected_poll_refreshes_before_the_next_entry() {
    let dir = TempDir::new().unwrap();
    let mut manifest = Manifest::new();
    manifest.record_submission(JobId::Remote("1".into()), record(reported("CREATED")));
    manifest.record_submission(JobId::Remote("2".into()), record(reported("CREATED")));

    let client = ScriptedClient::default()
        .status("1", Err(401))
        .status("2", Ok("FINISHED"))
        .result("2", Ok(b"<PcGts/>"));

    let report = retrieve_batch(&client, &manifest, dir.path(), &config())
        .await
        .unwrap();

    assert!(matches!(
        &report.entries[0].outcome,
        RetrievalOutcome::Failed { error: JobError::Poll { .. } }
    ));
    assert!(matches!(
        report.entries[1].outcome,
        RetrievalOutcome::Retrieved { .. }
    ));
    // Entry 1 is not polled again.
    assert_eq!(client.polled(), vec!["1", "2"]);
    assert_eq!(client.tokens(), vec!["access", "access-1"]);
    assert_eq!(client.refreshes(), 1);
}

// ── Image downloads ──────────────────────────────────────────────────────────

fn saving_images() -> BatchConfig {
    BatchConfig::builder()
        .save_images(true)
        .download_timeout_secs(5)
        .build()
        .unwrap()
}

#[tokio::test]
async fn images_with_the_same_url_name_are_kept_apart() {
    let base = serve(vec![
        ("/iiif/p1/full/max/0/default.jpg", "IMAGE-ONE"),
        ("/iiif/p2/full/max/0/default.jpg", "IMAGE-TWO"),
    ])
    .await;
    let dir = TempDir::new().unwrap();
    let mut manifest = Manifest::new();
    for (id, page) in [("101", "p1"), ("102", "p2")] {
        let url = format!("{base}/iiif/{page}/full/max/0/default.jpg");
        manifest.record_submission(JobId::Remote(id.into()), url_record(url));
    }
    let client = ScriptedClient::default()
        .status("101", Ok("RUNNING"))
        .status("102", Ok("RUNNING"));

    let report = retrieve_batch(&client, &manifest, dir.path(), &saving_images())
        .await
        .unwrap();

    let images = dir.path().join("images");
    let expected = [
        (images.join("101_default.jpg"), "IMAGE-ONE"),
        (images.join("102_default.jpg"), "IMAGE-TWO"),
    ];
    for (entry, (path, body)) in report.entries.iter().zip(expected) {
        assert_eq!(entry.image, Some(ImageOutcome::Saved { path: path.clone() }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), body);
    }
}

#[tokio::test]
async fn failed_image_download_leaves_the_result_alone() {
    let base = serve(vec![("/scans/a.jpg", "IMAGE-A")]).await;
    let dir = TempDir::new().unwrap();
    let mut manifest = Manifest::new();
    manifest.record_submission(
        JobId::Remote("1".into()),
        url_record(format!("{base}/scans/a.jpg")),
    );
    manifest.record_submission(
        JobId::Remote("2".into()),
        url_record(format!("{base}/scans/missing.jpg")),
    );
    manifest.record_submission(
        JobId::Remote("3".into()),
        url_record(format!("{base}/scans/gone.jpg")),
    );
    manifest.record_submission(JobId::Remote("4".into()), record(reported("CREATED")));

    let client = ScriptedClient::default()
        .status("1", Ok("FINISHED"))
        .status("2", Ok("FINISHED"))
        .status("3", Ok("RUNNING"))
        .status("4", Ok("RUNNING"))
        .result("1", Ok(b"<PcGts/>"))
        .result("2", Ok(b"<PcGts/>"));

    let report = retrieve_batch(&client, &manifest, dir.path(), &saving_images())
        .await
        .unwrap();

    let e = &report.entries;
    assert_eq!(
        e[0].image,
        Some(ImageOutcome::Saved {
            path: dir.path().join("images/1_a.jpg")
        })
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join("images/1_a.jpg")).unwrap(),
        "IMAGE-A"
    );
    assert!(matches!(e[0].outcome, RetrievalOutcome::Retrieved { .. }));

    assert!(matches!(
        &e[1].image,
        Some(ImageOutcome::Failed { error: JobError::ImageDownload { detail, .. } })
            if detail.contains("404")
    ));
    assert!(matches!(e[1].outcome, RetrievalOutcome::Retrieved { .. }));
    assert!(dir.path().join("2.xml").is_file());
    assert!(!dir.path().join("images/2_missing.jpg").exists());

    assert!(matches!(
        e[2].image,
        Some(ImageOutcome::Failed { .. })
    ));
    assert_eq!(
        e[2].outcome,
        RetrievalOutcome::Skipped {
            reason: SkipReason::NotFinished
        }
    );

    // Local sources have nothing to download.
    assert_eq!(e[3].image, None);
    assert_eq!((report.retrieved(), report.skipped(), report.failed()), (2, 2, 0));
}

#[tokio::test]
async fn images_are_not_downloaded_by_default() {
    let base = serve(vec![("/scans/a.jpg", "IMAGE-A")]).await;
    let dir = TempDir::new().unwrap();
    let mut manifest = Manifest::new();
    manifest.record_submission(
        JobId::Remote("1".into()),
        url_record(format!("{base}/scans/a.jpg")),
    );
    let client = ScriptedClient::default().status("1", Ok("RUNNING"));

    let report = retrieve_batch(&client, &manifest, dir.path(), &config())
        .await
        .unwrap();

    assert_eq!(report.entries[0].image, None);
    assert!(!dir.path().join("images").exists());
}
