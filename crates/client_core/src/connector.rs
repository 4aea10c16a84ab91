use std::{pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use shared::domain::JobId;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::error::TransportError;

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

const DEFAULT_EVENT_BUFFER: usize = 256;

/// Opens the server-to-client progress stream of one job.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn open(&self, job_id: &JobId) -> Result<FrameStream, TransportError>;
}

/// What the producer task hands to the consumer, in arrival order.
#[derive(Debug)]
pub enum StreamMessage {
    Payload(String),
    Failed(TransportError),
    Ended,
}

#[derive(Debug, Clone)]
pub struct ConnectorOptions {
    pub buffer: usize,
    pub idle_timeout: Option<Duration>,
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        Self {
            buffer: DEFAULT_EVENT_BUFFER,
            idle_timeout: None,
        }
    }
}

pub struct StreamConnector {
    source: Arc<dyn EventSource>,
    options: ConnectorOptions,
}

impl StreamConnector {
    pub fn new(source: Arc<dyn EventSource>) -> Self {
        Self::with_options(source, ConnectorOptions::default())
    }

    pub fn with_options(source: Arc<dyn EventSource>, options: ConnectorOptions) -> Self {
        Self { source, options }
    }

    /// Spawns the producer for `job_id`. Payloads arrive on the returned receiver; the
    /// receiver closes after a `Failed` or `Ended` message or once the handle is closed.
    pub fn attach(&self, job_id: JobId) -> (StreamHandle, mpsc::Receiver<StreamMessage>) {
        let (tx, rx) = mpsc::channel(self.options.buffer.max(1));
        let task = tokio::spawn(forward_frames(
            Arc::clone(&self.source),
            job_id.clone(),
            tx,
            self.options.idle_timeout,
        ));
        info!(job_id = %job_id, "research stream attached");
        (
            StreamHandle {
                job_id,
                task: Some(task),
            },
            rx,
        )
    }
}

/// Exclusive owner of one live stream connection.
pub struct StreamHandle {
    job_id: JobId,
    task: Option<JoinHandle<()>>,
}

impl StreamHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_none()
    }

    /// Cancels the producer and waits until its connection has been dropped.
    /// Closing an already closed handle does nothing.
    pub async fn close(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        task.abort();
        let _ = task.await;
        info!(job_id = %self.job_id, "research stream closed");
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn forward_frames(
    source: Arc<dyn EventSource>,
    job_id: JobId,
    tx: mpsc::Sender<StreamMessage>,
    idle_timeout: Option<Duration>,
) {
    let mut frames = match source.open(&job_id).await {
        Ok(frames) => frames,
        Err(err) => {
            warn!(job_id = %job_id, error = %err, "failed to open research stream");
            let _ = tx.send(StreamMessage::Failed(err)).await;
            return;
        }
    };
    debug!(job_id = %job_id, "research stream open");

    loop {
        let next = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, frames.next()).await {
                Ok(next) => next,
                Err(_) => Some(Err(TransportError::IdleTimeout { after: limit })),
            },
            None => frames.next().await,
        };

        let (message, last) = match next {
            Some(Ok(payload)) => (StreamMessage::Payload(payload), false),
            Some(Err(err)) => (StreamMessage::Failed(err), true),
            None => (StreamMessage::Ended, true),
        };
        if tx.send(message).await.is_err() {
            debug!(job_id = %job_id, "stream consumer gone; stopping producer");
            return;
        }
        if last {
            return;
        }
    }
}

#[cfg(test)]
#[path = "tests/connector_tests.rs"]
mod tests;
