use super::*;
use futures::stream;
use std::sync::atomic::{AtomicUsize, Ordering};

struct FixedFrames {
    frames: Vec<Result<String, TransportError>>,
}

#[async_trait]
impl EventSource for FixedFrames {
    async fn open(&self, _job_id: &JobId) -> Result<FrameStream, TransportError> {
        let frames: Vec<_> = self
            .frames
            .iter()
            .map(|frame| match frame {
                Ok(payload) => Ok(payload.clone()),
                Err(err) => Err(TransportError::Read(err.to_string())),
            })
            .collect();
        Ok(Box::pin(stream::iter(frames)))
    }
}

struct UnreachableSource;

#[async_trait]
impl EventSource for UnreachableSource {
    async fn open(&self, job_id: &JobId) -> Result<FrameStream, TransportError> {
        Err(TransportError::Connect(format!("no route to stream for job {job_id}")))
    }
}

/// Never yields a frame; counts how many live streams it has handed out.
#[derive(Default)]
struct SilentSource {
    live: Arc<AtomicUsize>,
}

struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventSource for SilentSource {
    async fn open(&self, _job_id: &JobId) -> Result<FrameStream, TransportError> {
        self.live.fetch_add(1, Ordering::SeqCst);
        let guard = LiveGuard(Arc::clone(&self.live));
        Ok(Box::pin(stream::pending::<Result<String, TransportError>>().map(
            move |item| {
                let _keep_open = &guard;
                item
            },
        )))
    }
}

async fn wait_until_live(live: &AtomicUsize, expected: usize) {
    for _ in 0..200 {
        if live.load(Ordering::SeqCst) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("live stream count never reached {expected}");
}

#[tokio::test]
async fn forwards_payloads_then_ended() {
    let connector = StreamConnector::new(Arc::new(FixedFrames {
        frames: vec![Ok("one".to_string()), Ok("two".to_string())],
    }));
    let (_handle, mut rx) = connector.attach(JobId::from("job-1"));

    assert!(matches!(rx.recv().await, Some(StreamMessage::Payload(p)) if p == "one"));
    assert!(matches!(rx.recv().await, Some(StreamMessage::Payload(p)) if p == "two"));
    assert!(matches!(rx.recv().await, Some(StreamMessage::Ended)));
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn read_failure_is_the_last_message() {
    let connector = StreamConnector::new(Arc::new(FixedFrames {
        frames: vec![
            Ok("one".to_string()),
            Err(TransportError::Read("reset".to_string())),
            Ok("unreachable".to_string()),
        ],
    }));
    let (_handle, mut rx) = connector.attach(JobId::from("job-1"));

    assert!(matches!(rx.recv().await, Some(StreamMessage::Payload(_))));
    assert!(matches!(
        rx.recv().await,
        Some(StreamMessage::Failed(TransportError::Read(_)))
    ));
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn open_failure_is_reported() {
    let connector = StreamConnector::new(Arc::new(UnreachableSource));
    let (_handle, mut rx) = connector.attach(JobId::from("job-9"));

    match rx.recv().await {
        Some(StreamMessage::Failed(TransportError::Connect(message))) => {
            assert!(message.contains("job-9"))
        }
        other => panic!("unexpected message: {other:?}"),
    }
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn idle_timeout_fails_silent_stream() {
    let source = Arc::new(SilentSource::default());
    let connector = StreamConnector::with_options(
        Arc::clone(&source) as Arc<dyn EventSource>,
        ConnectorOptions {
            buffer: 4,
            idle_timeout: Some(Duration::from_millis(40)),
        },
    );
    let (_handle, mut rx) = connector.attach(JobId::from("job-1"));

    match rx.recv().await {
        Some(StreamMessage::Failed(err @ TransportError::IdleTimeout { .. })) => {
            assert_eq!(err.to_string(), "event stream idle for 40ms");
        }
        other => panic!("unexpected message: {other:?}"),
    }
    assert!(rx.recv().await.is_none());
    wait_until_live(&source.live, 0).await;
}

#[tokio::test]
async fn close_releases_connection_and_is_idempotent() {
    let source = Arc::new(SilentSource::default());
    let connector = StreamConnector::new(Arc::clone(&source) as Arc<dyn EventSource>);
    let (mut handle, mut rx) = connector.attach(JobId::from("job-1"));
    wait_until_live(&source.live, 1).await;

    assert!(!handle.is_closed());
    handle.close().await;
    assert!(handle.is_closed());
    assert_eq!(source.live.load(Ordering::SeqCst), 0);
    assert!(rx.recv().await.is_none());

    handle.close().await;
    assert!(handle.is_closed());
    assert_eq!(handle.job_id(), &JobId::from("job-1"));
}

#[tokio::test]
async fn dropping_handle_aborts_producer() {
    let source = Arc::new(SilentSource::default());
    let connector = StreamConnector::new(Arc::clone(&source) as Arc<dyn EventSource>);
    let (handle, _rx) = connector.attach(JobId::from("job-1"));
    wait_until_live(&source.live, 1).await;

    drop(handle);
    wait_until_live(&source.live, 0).await;
}
