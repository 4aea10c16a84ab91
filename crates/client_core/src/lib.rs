//! Client-side tracking of remote research jobs.
//!
//! A [`ResearchController`] submits a job through a [`JobSubmitter`], attaches exactly one
//! progress stream through the [`StreamConnector`], decodes each payload and folds it into
//! the [`ResearchSession`] with [`reduce`].

pub mod api;
pub mod connector;
pub mod decoder;
pub mod error;
pub mod reducer;
pub mod session;
pub mod sse;

pub use api::{pdf_file_name, JobSubmitter, ReportExporter, ResearchApi, DEFAULT_API_URL};
pub use connector::{
    ConnectorOptions, EventSource, FrameStream, StreamConnector, StreamHandle, StreamMessage,
};
pub use decoder::{decode_payload, decode_value};
pub use error::{ApiClientError, DecodeError, TransportError};
pub use reducer::{
    reduce, step_display_name, BriefingStatus, Directive, EnrichmentCount, Outcome, QueryEntry,
    ResearchSession, StatusLine,
};
pub use session::{ResearchController, SessionEvent, TRANSPORT_FAILURE_MESSAGE};
