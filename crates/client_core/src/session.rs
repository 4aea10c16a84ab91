use std::sync::{Arc, Weak};

use anyhow::{anyhow, Result};
use shared::{domain::JobId, protocol::ResearchRequest};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::{debug, info, warn};

use crate::{
    api::JobSubmitter,
    connector::{StreamConnector, StreamHandle, StreamMessage},
    decoder::decode_payload,
    reducer::{reduce, Directive, ResearchSession},
};

/// Outcome message when the transport fails or closes before a terminal event.
pub const TRANSPORT_FAILURE_MESSAGE: &str = "Connection lost or server error";

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Updated(Box<ResearchSession>),
    DecodeFailed {
        job_id: JobId,
        reason: &'static str,
        detail: String,
    },
    StreamClosed {
        job_id: JobId,
    },
    Reset,
}

/// Owns the single research session and the one live stream feeding it.
///
/// Every attach, reset and event application happens under one lock and bumps or checks
/// a generation counter, so a superseded stream can never touch the current session.
pub struct ResearchController {
    submitter: Arc<dyn JobSubmitter>,
    connector: StreamConnector,
    inner: Arc<Mutex<ControllerState>>,
    events: broadcast::Sender<SessionEvent>,
}

#[derive(Default)]
struct ControllerState {
    generation: u64,
    session: ResearchSession,
    job_id: Option<JobId>,
    company_name: Option<String>,
    active: Option<ActiveStream>,
}

struct ActiveStream {
    connection: StreamHandle,
    pump: JoinHandle<()>,
}

impl ActiveStream {
    async fn shutdown(self) {
        let ActiveStream {
            mut connection,
            pump,
        } = self;
        connection.close().await;
        pump.abort();
        let _ = pump.await;
    }
}

impl ResearchController {
    pub fn new(submitter: Arc<dyn JobSubmitter>, connector: StreamConnector) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            submitter,
            connector,
            inner: Arc::new(Mutex::new(ControllerState::default())),
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> ResearchSession {
        self.inner.lock().await.session.clone()
    }

    pub async fn job_id(&self) -> Option<JobId> {
        self.inner.lock().await.job_id.clone()
    }

    pub async fn company_name(&self) -> Option<String> {
        self.inner.lock().await.company_name.clone()
    }

    pub async fn is_streaming(&self) -> bool {
        self.inner.lock().await.active.is_some()
    }

    /// Starts a new research job, discarding the current session and closing its stream
    /// before the job is created.
    pub async fn submit(&self, request: ResearchRequest) -> Result<JobId> {
        if request.company.trim().is_empty() {
            return Err(anyhow!("company name is required"));
        }

        let generation = {
            let mut guard = self.inner.lock().await;
            let generation = begin_generation(&mut guard).await;
            guard.session = ResearchSession::started();
            guard.company_name = Some(request.company.clone());
            self.publish(&guard.session);
            generation
        };

        match self.submitter.submit_job(&request).await {
            Ok(job_id) => {
                let mut guard = self.inner.lock().await;
                if guard.generation != generation {
                    return Err(anyhow!(
                        "research request for {} was superseded",
                        request.company
                    ));
                }
                self.attach_locked(&mut guard, job_id.clone()).await;
                Ok(job_id)
            }
            Err(err) => {
                warn!(company = %request.company, error = %err, "research submission failed");
                let mut guard = self.inner.lock().await;
                if guard.generation == generation && guard.session.fail(err.to_string()) {
                    self.publish(&guard.session);
                }
                Err(err)
            }
        }
    }

    /// Attaches a stream for an existing job with a fresh session. Any live stream is
    /// closed first.
    pub async fn attach(&self, job_id: JobId) {
        let mut guard = self.inner.lock().await;
        self.attach_locked(&mut guard, job_id).await;
    }

    /// Clears the session and closes the live stream. Events already in flight for the
    /// closed stream are never applied.
    pub async fn reset(&self) {
        let mut guard = self.inner.lock().await;
        begin_generation(&mut guard).await;
        guard.session = ResearchSession::default();
        guard.company_name = None;
        info!("research session reset");
        let _ = self.events.send(SessionEvent::Reset);
    }

    async fn attach_locked(&self, guard: &mut ControllerState, job_id: JobId) {
        let generation = begin_generation(guard).await;
        guard.session = ResearchSession::started();
        guard.job_id = Some(job_id.clone());

        let (connection, messages) = self.connector.attach(job_id.clone());
        let pump = tokio::spawn(apply_stream(
            Arc::downgrade(&self.inner),
            self.events.clone(),
            generation,
            job_id,
            messages,
        ));
        guard.active = Some(ActiveStream { connection, pump });
        self.publish(&guard.session);
    }

    fn publish(&self, session: &ResearchSession) {
        let _ = self
            .events
            .send(SessionEvent::Updated(Box::new(session.clone())));
    }
}

/// Invalidates the current generation and tears down its stream.
async fn begin_generation(guard: &mut ControllerState) -> u64 {
    guard.generation += 1;
    guard.job_id = None;
    if let Some(previous) = guard.active.take() {
        let job_id = previous.connection.job_id().clone();
        previous.shutdown().await;
        debug!(job_id = %job_id, "previous research stream released");
    }
    guard.generation
}

async fn apply_stream(
    inner: Weak<Mutex<ControllerState>>,
    events: broadcast::Sender<SessionEvent>,
    generation: u64,
    job_id: JobId,
    messages: mpsc::Receiver<StreamMessage>,
) {
    let mut messages = ReceiverStream::new(messages);
    while let Some(message) = messages.next().await {
        let Some(state) = inner.upgrade() else {
            return;
        };
        let mut guard = state.lock().await;
        if guard.generation != generation {
            debug!(job_id = %job_id, "dropping message for superseded stream");
            return;
        }

        let close = match message {
            StreamMessage::Payload(raw) => match decode_payload(&raw) {
                Ok(event) => {
                    let kind = event.kind();
                    let directive = reduce(&mut guard.session, event);
                    debug!(
                        job_id = %job_id,
                        kind,
                        phase = ?guard.session.phase,
                        "applied progress event"
                    );
                    let _ = events.send(SessionEvent::Updated(Box::new(guard.session.clone())));
                    directive == Directive::Close
                }
                Err(err) => {
                    warn!(
                        job_id = %job_id,
                        reason = err.reason(),
                        error = %err,
                        "dropping undecodable progress payload"
                    );
                    let _ = events.send(SessionEvent::DecodeFailed {
                        job_id: job_id.clone(),
                        reason: err.reason(),
                        detail: err.to_string(),
                    });
                    false
                }
            },
            StreamMessage::Failed(err) => {
                warn!(job_id = %job_id, error = %err, "research stream failed");
                if guard.session.fail(TRANSPORT_FAILURE_MESSAGE) {
                    let _ = events.send(SessionEvent::Updated(Box::new(guard.session.clone())));
                }
                true
            }
            StreamMessage::Ended => {
                warn!(job_id = %job_id, "research stream ended before completion");
                if guard.session.fail(TRANSPORT_FAILURE_MESSAGE) {
                    let _ = events.send(SessionEvent::Updated(Box::new(guard.session.clone())));
                }
                true
            }
        };

        if close {
            if let Some(active) = guard.active.take() {
                let ActiveStream {
                    mut connection,
                    pump: _own_task,
                } = active;
                connection.close().await;
            }
            info!(job_id = %job_id, outcome = ?guard.session.outcome, "research stream finished");
            let _ = events.send(SessionEvent::StreamClosed { job_id });
            return;
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
