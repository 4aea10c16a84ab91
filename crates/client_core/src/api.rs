use anyhow::Result;
use async_trait::async_trait;
use reqwest::{header, Client, Response};
use shared::{
    domain::JobId,
    error::ApiError,
    protocol::{JobCreated, PdfRequest, ResearchRequest},
};
use tracing::{debug, info};
use url::Url;

use crate::{
    connector::{EventSource, FrameStream},
    error::{ApiClientError, TransportError},
    sse::sse_frames,
};

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
const FALLBACK_REPORT_NAME: &str = "research_report";

/// Creates research jobs on the remote service.
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    async fn submit_job(&self, request: &ResearchRequest) -> Result<JobId>;
}

/// Renders a finished report into a downloadable document.
#[async_trait]
pub trait ReportExporter: Send + Sync {
    async fn export_pdf(&self, report: &str, company_name: &str) -> Result<Vec<u8>>;
}

/// HTTP client for the research service: job submission, progress streams and PDF export.
#[derive(Clone)]
pub struct ResearchApi {
    http: Client,
    base_url: Url,
}

impl ResearchApi {
    pub fn new(base_url: &str) -> std::result::Result<Self, ApiClientError> {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: &str) -> std::result::Result<Self, ApiClientError> {
        let base_url = Url::parse(base_url.trim())?;
        if base_url.cannot_be_a_base() {
            return Err(ApiClientError::NotABaseUrl(base_url.to_string()));
        }
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub fn stream_url(&self, job_id: &JobId) -> Url {
        self.endpoint(&["research", job_id.as_str(), "stream"])
    }
}

async fn ensure_success(response: Response) -> std::result::Result<Response, ApiClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ApiError>(&body)
        .map(|err| err.message)
        .ok()
        .or_else(|| Some(body.trim().to_string()).filter(|b| !b.is_empty()));
    Err(ApiClientError::Status { status, detail })
}

#[async_trait]
impl JobSubmitter for ResearchApi {
    async fn submit_job(&self, request: &ResearchRequest) -> Result<JobId> {
        let url = self.endpoint(&["research"]);
        debug!(%url, company = %request.company, "submitting research job");
        let response = self
            .http
            .post(url)
            .header(header::ACCEPT, "application/json")
            .json(request)
            .send()
            .await
            .map_err(ApiClientError::from)?;
        let created: JobCreated = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(ApiClientError::from)?;
        let job_id = created
            .job_id
            .filter(|id| !id.as_str().is_empty())
            .ok_or(ApiClientError::MissingJobId)?;
        info!(job_id = %job_id, company = %request.company, "research job created");
        Ok(job_id)
    }
}

#[async_trait]
impl EventSource for ResearchApi {
    async fn open(&self, job_id: &JobId) -> std::result::Result<FrameStream, TransportError> {
        let url = self.stream_url(job_id);
        let response = self
            .http
            .get(url.clone())
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|err| TransportError::Connect(format!("{url}: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status { status });
        }
        Ok(sse_frames(response.bytes_stream()))
    }
}

#[async_trait]
impl ReportExporter for ResearchApi {
    async fn export_pdf(&self, report: &str, company_name: &str) -> Result<Vec<u8>> {
        if report.trim().is_empty() {
            return Err(ApiClientError::EmptyReport.into());
        }
        let body = PdfRequest {
            report_content: report.to_string(),
            company_name: if company_name.trim().is_empty() {
                FALLBACK_REPORT_NAME.to_string()
            } else {
                company_name.trim().to_string()
            },
        };
        let response = self
            .http
            .post(self.endpoint(&["generate-pdf"]))
            .json(&body)
            .send()
            .await
            .map_err(ApiClientError::from)?;
        let bytes = ensure_success(response)
            .await?
            .bytes()
            .await
            .map_err(ApiClientError::from)?;
        Ok(bytes.to_vec())
    }
}

/// File name for an exported report: `{company}.pdf`, with path separators replaced.
pub fn pdf_file_name(company_name: &str) -> String {
    let name = company_name.trim();
    let name = if name.is_empty() {
        FALLBACK_REPORT_NAME.to_string()
    } else {
        name.replace(['/', '\\'], "_")
    };
    format!("{name}.pdf")
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
