use serde::{Deserialize, Serialize};

use crate::domain::{JobId, SavedCompany};

/// Industry sent for a saved company that has none recorded.
pub const DEFAULT_INDUSTRY: &str = "Construction";

/// One frame of the research progress stream.
///
/// The service tags every frame with a snake_case `type` field. Query events use the
/// service's `query`/`query_number` names on the wire, with `text`/`number` accepted as
/// aliases; briefing counters accept both snake_case and camelCase spellings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress {
        #[serde(default)]
        step: String,
    },
    QueryGenerating {
        category: String,
        #[serde(rename = "query_number", alias = "number")]
        number: u32,
        #[serde(rename = "query", alias = "text")]
        text: String,
    },
    QueryGenerated {
        category: String,
        #[serde(rename = "query_number", alias = "number")]
        number: u32,
        #[serde(rename = "query", alias = "text")]
        text: String,
    },
    ResearchInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default)]
        company: String,
    },
    CrawlStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Curation {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Enrichment {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        enriched: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    BriefingStart {
        category: String,
        #[serde(default, alias = "totalDocs")]
        total_docs: u64,
    },
    BriefingComplete {
        category: String,
        #[serde(default, alias = "contentLength")]
        content_length: u64,
    },
    ReportCompilation {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    ReportChunk {
        #[serde(default)]
        chunk: String,
    },
    Complete {
        #[serde(default)]
        report: String,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ProgressEvent {
    /// Every discriminant this build understands, in wire spelling.
    pub const KINDS: [&'static str; 13] = [
        "progress",
        "query_generating",
        "query_generated",
        "research_init",
        "crawl_start",
        "curation",
        "enrichment",
        "briefing_start",
        "briefing_complete",
        "report_compilation",
        "report_chunk",
        "complete",
        "error",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::QueryGenerating { .. } => "query_generating",
            ProgressEvent::QueryGenerated { .. } => "query_generated",
            ProgressEvent::ResearchInit { .. } => "research_init",
            ProgressEvent::CrawlStart { .. } => "crawl_start",
            ProgressEvent::Curation { .. } => "curation",
            ProgressEvent::Enrichment { .. } => "enrichment",
            ProgressEvent::BriefingStart { .. } => "briefing_start",
            ProgressEvent::BriefingComplete { .. } => "briefing_complete",
            ProgressEvent::ReportCompilation { .. } => "report_compilation",
            ProgressEvent::ReportChunk { .. } => "report_chunk",
            ProgressEvent::Complete { .. } => "complete",
            ProgressEvent::Error { .. } => "error",
        }
    }

    pub fn is_known_kind(kind: &str) -> bool {
        Self::KINDS.contains(&kind)
    }
}

/// Body of `POST /research`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub company: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hq_location: Option<String>,
}

impl ResearchRequest {
    /// Builds a request from free-form input. Blank optional fields are dropped and a
    /// company URL without a scheme gets `https://` prepended.
    pub fn from_form(
        company: &str,
        company_url: Option<&str>,
        industry: Option<&str>,
        hq_location: Option<&str>,
    ) -> Self {
        Self {
            company: company.trim().to_string(),
            company_url: non_blank(company_url).map(normalize_company_url),
            industry: non_blank(industry).map(str::to_string),
            hq_location: non_blank(hq_location).map(str::to_string),
        }
    }

    pub fn from_saved(company: &SavedCompany) -> Self {
        let mut request = Self::from_form(
            &company.name,
            company.url.as_deref(),
            company.industry.as_deref(),
            company.hq.as_deref(),
        );
        if request.industry.is_none() {
            request.industry = Some(DEFAULT_INDUSTRY.to_string());
        }
        request
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn normalize_company_url(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

/// Response of `POST /research`. `job_id` is optional on the wire so a missing id can be
/// reported as such rather than as a generic parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCreated {
    #[serde(default)]
    pub job_id: Option<JobId>,
}

/// Body of `POST /generate-pdf`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdfRequest {
    pub report_content: String,
    pub company_name: String,
}
