use super::*;
use crate::{
    connector::{ConnectorOptions, EventSource, FrameStream},
    error::TransportError,
    reducer::{EnrichmentCount, Outcome, QueryEntry},
};
use async_trait::async_trait;
use serde_json::json;
use shared::domain::{Category, Phase};
use std::{collections::HashMap, sync::Mutex as StdMutex, time::Duration};

type FrameSender = mpsc::Sender<Result<String, TransportError>>;

struct SequentialSubmitter {
    issued: Mutex<u32>,
    requests: Mutex<Vec<ResearchRequest>>,
}

impl SequentialSubmitter {
    fn new() -> Self {
        Self {
            issued: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl JobSubmitter for SequentialSubmitter {
    async fn submit_job(&self, request: &ResearchRequest) -> Result<JobId> {
        self.requests.lock().await.push(request.clone());
        let mut issued = self.issued.lock().await;
        *issued += 1;
        Ok(JobId(format!("job-{}", *issued)))
    }
}

struct FailingSubmitter;

#[async_trait]
impl JobSubmitter for FailingSubmitter {
    async fn submit_job(&self, _request: &ResearchRequest) -> Result<JobId> {
        Err(anyhow!("HTTP error! status: 503 Service Unavailable"))
    }
}

struct CloseGuard {
    job_id: String,
    log: Arc<StdMutex<Vec<String>>>,
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.log
            .lock()
            .expect("log")
            .push(format!("close {}", self.job_id));
    }
}

/// Serves one scripted frame channel per job id and records opens and closes.
#[derive(Default)]
struct ScriptedSource {
    pending: StdMutex<HashMap<String, mpsc::Receiver<Result<String, TransportError>>>>,
    log: Arc<StdMutex<Vec<String>>>,
}

impl ScriptedSource {
    fn script(&self, job_id: &str) -> FrameSender {
        let (tx, rx) = mpsc::channel(64);
        self.pending
            .lock()
            .expect("pending")
            .insert(job_id.to_string(), rx);
        tx
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().expect("log").clone()
    }

    async fn wait_for_log(&self, entry: &str) {
        for _ in 0..200 {
            if self.log().iter().any(|e| e == entry) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("log never contained {entry:?}: {:?}", self.log());
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn open(&self, job_id: &JobId) -> std::result::Result<FrameStream, TransportError> {
        let rx = self
            .pending
            .lock()
            .expect("pending")
            .remove(job_id.as_str())
            .ok_or_else(|| TransportError::Connect(format!("no script for {job_id}")))?;
        self.log
            .lock()
            .expect("log")
            .push(format!("open {job_id}"));
        let guard = CloseGuard {
            job_id: job_id.to_string(),
            log: Arc::clone(&self.log),
        };
        Ok(Box::pin(ReceiverStream::new(rx).map(move |item| {
            let _keep_open = &guard;
            item
        })))
    }
}

fn controller_with(source: Arc<ScriptedSource>) -> ResearchController {
    ResearchController::new(
        Arc::new(SequentialSubmitter::new()),
        StreamConnector::new(source),
    )
}

fn acme_request() -> ResearchRequest {
    ResearchRequest::from_form("Acme", Some("acme.com"), None, None)
}

async fn send(tx: &FrameSender, value: serde_json::Value) {
    tx.send(Ok(value.to_string())).await.expect("frame accepted");
}

async fn send_raw(tx: &FrameSender, raw: &str) {
    tx.send(Ok(raw.to_string())).await.expect("frame accepted");
}

async fn wait_for<F>(controller: &ResearchController, mut check: F) -> ResearchSession
where
    F: FnMut(&ResearchSession) -> bool,
{
    for _ in 0..200 {
        let session = controller.snapshot().await;
        if check(&session) {
            return session;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached: {:?}", controller.snapshot().await);
}

#[tokio::test]
async fn acme_stream_reaches_complete_and_closes_connection() {
    let source = Arc::new(ScriptedSource::default());
    let tx = source.script("job-1");
    let controller = controller_with(Arc::clone(&source));

    let job_id = controller.submit(acme_request()).await.expect("submit");
    assert_eq!(job_id, JobId::from("job-1"));
    assert_eq!(controller.company_name().await.as_deref(), Some("Acme"));

    send(&tx, json!({"type": "research_init", "company": "Acme"})).await;
    send(
        &tx,
        json!({"type": "query_generating", "category": "company", "query_number": 1, "query": "Acme revenue"}),
    )
    .await;
    send(
        &tx,
        json!({"type": "query_generated", "category": "company", "query_number": 1, "query": "Acme revenue 2023"}),
    )
    .await;
    send(&tx, json!({"type": "curation", "category": "company", "total": 5})).await;
    send(&tx, json!({"type": "enrichment", "category": "company", "enriched": 3})).await;
    send(&tx, json!({"type": "briefing_start", "category": "company", "total_docs": 5})).await;
    send(
        &tx,
        json!({"type": "briefing_complete", "category": "company", "content_length": 1200}),
    )
    .await;
    send(&tx, json!({"type": "report_chunk", "chunk": "# Report\n"})).await;
    send(&tx, json!({"type": "report_chunk", "chunk": "intro..."})).await;
    send(&tx, json!({"type": "complete", "report": "# Report\nintro...final"})).await;

    let session = wait_for(&controller, |s| s.outcome.is_terminal()).await;
    assert_eq!(session.outcome, Outcome::Complete);
    assert_eq!(session.phase, Some(Phase::Complete));
    assert_eq!(
        session.queries,
        vec![QueryEntry {
            category: "company".to_string(),
            number: 1,
            text: "Acme revenue 2023".to_string(),
            complete: true,
        }]
    );
    assert!(session.pending_queries.is_empty());
    assert_eq!(
        session.enrichment_counts[&Category::Company],
        EnrichmentCount {
            total: 5,
            enriched: 3
        }
    );
    assert!(session.briefing_status.company);
    assert_eq!(session.report, "# Report\nintro...final");

    assert_eq!(source.log(), vec!["open job-1", "close job-1"]);
    assert!(!controller.is_streaming().await);
    assert!(tx
        .send(Ok(json!({"type": "report_chunk", "chunk": "late"}).to_string()))
        .await
        .is_err());
}

#[tokio::test]
async fn error_event_is_terminal_and_closes_stream() {
    let source = Arc::new(ScriptedSource::default());
    let tx = source.script("job-1");
    let controller = controller_with(Arc::clone(&source));
    let mut events = controller.subscribe_events();

    controller.submit(acme_request()).await.expect("submit");
    send(&tx, json!({"type": "research_init", "company": "Acme"})).await;
    send(&tx, json!({"type": "error", "error": "rate limited"})).await;

    let session = wait_for(&controller, |s| s.outcome.is_terminal()).await;
    assert_eq!(session.outcome, Outcome::Error("rate limited".to_string()));
    assert_eq!(source.log(), vec!["open job-1", "close job-1"]);
    assert!(tx
        .send(Ok(json!({"type": "progress", "step": "collector"}).to_string()))
        .await
        .is_err());
    assert_eq!(controller.snapshot().await, session);

    let mut saw_closed = false;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::StreamClosed { job_id } = event {
            assert_eq!(job_id, JobId::from("job-1"));
            saw_closed = true;
        }
    }
    assert!(saw_closed);
}

#[tokio::test]
async fn undecodable_payloads_do_not_interrupt_the_stream() {
    let source = Arc::new(ScriptedSource::default());
    let tx = source.script("job-1");
    let controller = controller_with(Arc::clone(&source));
    let mut events = controller.subscribe_events();

    controller.submit(acme_request()).await.expect("submit");
    send(&tx, json!({"type": "curation", "category": "news", "total": 4})).await;
    send_raw(&tx, "{this is not json").await;
    send(&tx, json!({"kind": "enrichment"})).await;
    send(&tx, json!({"type": "heartbeat"})).await;
    send(&tx, json!({"type": "enrichment", "category": "news", "enriched": 2})).await;

    let session = wait_for(&controller, |s| {
        s.enrichment_counts
            .get(&Category::News)
            .is_some_and(|count| count.enriched == 2)
    })
    .await;
    assert_eq!(session.enrichment_counts[&Category::News].total, 4);
    assert_eq!(session.outcome, Outcome::Pending);
    assert!(controller.is_streaming().await);

    let mut reasons = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::DecodeFailed { reason, .. } = event {
            reasons.push(reason);
        }
    }
    assert_eq!(
        reasons,
        vec!["malformed", "missing_discriminant", "unknown_kind"]
    );
}

#[tokio::test]
async fn second_submit_closes_first_stream_before_attaching() {
    let source = Arc::new(ScriptedSource::default());
    let first = source.script("job-1");
    let _second = source.script("job-2");
    let controller = controller_with(Arc::clone(&source));

    controller.submit(acme_request()).await.expect("first submit");
    source.wait_for_log("open job-1").await;
    send(&first, json!({"type": "report_chunk", "chunk": "old run"})).await;
    wait_for(&controller, |s| s.report == "old run").await;

    let job_id = controller
        .submit(ResearchRequest::from_form("Globex", None, None, None))
        .await
        .expect("second submit");
    assert_eq!(job_id, JobId::from("job-2"));
    source.wait_for_log("open job-2").await;

    assert_eq!(
        source.log(),
        vec!["open job-1", "close job-1", "open job-2"]
    );
    let session = controller.snapshot().await;
    assert!(session.report.is_empty());
    assert_eq!(session.status.message, "Starting research...");
    assert_eq!(controller.company_name().await.as_deref(), Some("Globex"));
    assert!(first
        .send(Ok(json!({"type": "report_chunk", "chunk": "stale"}).to_string()))
        .await
        .is_err());
}

#[tokio::test]
async fn reset_discards_state_and_cancels_in_flight_events() {
    let source = Arc::new(ScriptedSource::default());
    let tx = source.script("job-1");
    let controller = controller_with(Arc::clone(&source));

    controller.submit(acme_request()).await.expect("submit");
    send(&tx, json!({"type": "crawl_start"})).await;
    wait_for(&controller, |s| s.phase == Some(Phase::Search)).await;

    for n in 0..10 {
        send(&tx, json!({"type": "report_chunk", "chunk": format!("chunk {n}")})).await;
    }
    controller.reset().await;

    assert_eq!(controller.snapshot().await, ResearchSession::default());
    assert_eq!(controller.job_id().await, None);
    assert!(!controller.is_streaming().await);
    assert_eq!(source.log(), vec!["open job-1", "close job-1"]);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(controller.snapshot().await, ResearchSession::default());

    controller.reset().await;
    assert_eq!(source.log().len(), 2);
}

#[tokio::test]
async fn stream_end_without_terminal_event_is_a_transport_failure() {
    let source = Arc::new(ScriptedSource::default());
    let tx = source.script("job-1");
    let controller = controller_with(Arc::clone(&source));

    controller.submit(acme_request()).await.expect("submit");
    send(&tx, json!({"type": "progress", "step": "curator"})).await;
    drop(tx);

    let session = wait_for(&controller, |s| s.outcome.is_terminal()).await;
    assert_eq!(
        session.outcome,
        Outcome::Error(TRANSPORT_FAILURE_MESSAGE.to_string())
    );
    assert_eq!(session.phase, Some(Phase::Enrichment));
    source.wait_for_log("close job-1").await;
}

#[tokio::test]
async fn transport_error_uses_generic_message() {
    let source = Arc::new(ScriptedSource::default());
    let tx = source.script("job-1");
    let controller = controller_with(Arc::clone(&source));

    controller.submit(acme_request()).await.expect("submit");
    tx.send(Err(TransportError::Read("connection reset".to_string())))
        .await
        .expect("error accepted");

    let session = wait_for(&controller, |s| s.outcome.is_terminal()).await;
    assert_eq!(
        session.outcome.error_message(),
        Some(TRANSPORT_FAILURE_MESSAGE)
    );
}

#[tokio::test]
async fn stream_that_cannot_open_fails_the_session() {
    let source = Arc::new(ScriptedSource::default());
    let controller = controller_with(Arc::clone(&source));

    controller.submit(acme_request()).await.expect("submit");
    let session = wait_for(&controller, |s| s.outcome.is_terminal()).await;
    assert_eq!(
        session.outcome.error_message(),
        Some(TRANSPORT_FAILURE_MESSAGE)
    );
    assert!(!controller.is_streaming().await);
}

#[tokio::test]
async fn idle_stream_times_out_when_configured() {
    let source = Arc::new(ScriptedSource::default());
    let _tx = source.script("job-1");
    let controller = ResearchController::new(
        Arc::new(SequentialSubmitter::new()),
        StreamConnector::with_options(
            Arc::clone(&source) as Arc<dyn EventSource>,
            ConnectorOptions {
                buffer: 8,
                idle_timeout: Some(Duration::from_millis(50)),
            },
        ),
    );

    controller.submit(acme_request()).await.expect("submit");
    let session = wait_for(&controller, |s| s.outcome.is_terminal()).await;
    assert_eq!(
        session.outcome.error_message(),
        Some(TRANSPORT_FAILURE_MESSAGE)
    );
}

#[tokio::test]
async fn failed_submission_marks_session_error() {
    let source = Arc::new(ScriptedSource::default());
    let controller =
        ResearchController::new(Arc::new(FailingSubmitter), StreamConnector::new(source));

    let err = controller
        .submit(acme_request())
        .await
        .expect_err("must fail");
    assert!(err.to_string().contains("503"));

    let session = controller.snapshot().await;
    assert!(session
        .outcome
        .error_message()
        .is_some_and(|message| message.contains("503")));
    assert_eq!(controller.job_id().await, None);
    assert!(!controller.is_streaming().await);
}

#[tokio::test]
async fn blank_company_is_rejected_before_submission() {
    let source = Arc::new(ScriptedSource::default());
    let submitter = Arc::new(SequentialSubmitter::new());
    let controller = ResearchController::new(
        Arc::clone(&submitter) as Arc<dyn JobSubmitter>,
        StreamConnector::new(source),
    );

    assert!(controller
        .submit(ResearchRequest::from_form("   ", None, None, None))
        .await
        .is_err());
    assert!(submitter.requests.lock().await.is_empty());
}

#[tokio::test]
async fn attach_replaces_live_stream_with_fresh_session() {
    let source = Arc::new(ScriptedSource::default());
    let first = source.script("job-a");
    let second = source.script("job-b");
    let controller = controller_with(Arc::clone(&source));

    controller.attach(JobId::from("job-a")).await;
    send(&first, json!({"type": "progress", "step": "briefing"})).await;
    wait_for(&controller, |s| s.phase == Some(Phase::Briefing)).await;

    controller.attach(JobId::from("job-b")).await;
    assert_eq!(controller.job_id().await, Some(JobId::from("job-b")));
    assert_eq!(controller.snapshot().await.phase, None);

    send(&second, json!({"type": "progress", "step": "grounding"})).await;
    wait_for(&controller, |s| s.phase == Some(Phase::Search)).await;
    let log = source.log();
    assert_eq!(&log[..2], &["open job-a", "close job-a"]);
}

#[tokio::test]
async fn dropping_controller_releases_connection() {
    let source = Arc::new(ScriptedSource::default());
    let _tx = source.script("job-1");
    let controller = controller_with(Arc::clone(&source));

    controller.submit(acme_request()).await.expect("submit");
    source.wait_for_log("open job-1").await;
    drop(controller);

    source.wait_for_log("close job-1").await;
}
