//! Research session state and the phase reducer.
//!
//! [`reduce`] folds one decoded [`ProgressEvent`] into a [`ResearchSession`]. It has no
//! hidden state: everything that influences a transition (sticky enrichment totals,
//! pending queries, the report buffer) lives in the session itself, so applying the same
//! events in the same order always yields the same session.

use std::collections::BTreeMap;

use serde::Serialize;
use shared::{
    domain::{Category, Phase},
    protocol::ProgressEvent,
};
use tracing::debug;

const SEARCH_STEPS: [&str; 6] = [
    "grounding",
    "financial_analyst",
    "news_scanner",
    "industry_analyst",
    "company_analyst",
    "collector",
];
const ENRICHMENT_STEPS: [&str; 2] = ["curator", "enricher"];
const BRIEFING_STEP: &str = "briefing";

/// Message used when an `error` event carries no text.
pub const GENERIC_RESEARCH_FAILURE: &str = "Research failed";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatusLine {
    pub step: String,
    pub message: String,
}

impl StatusLine {
    pub fn new(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn starting() -> Self {
        Self::new("Processing", "Starting research...")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum Outcome {
    #[default]
    Pending,
    Complete,
    Error(String),
}

impl Outcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Pending)
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Outcome::Error(message) => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct QueryKey {
    pub category: String,
    pub number: u32,
}

impl QueryKey {
    pub fn new(category: impl Into<String>, number: u32) -> Self {
        Self {
            category: category.into(),
            number,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryEntry {
    pub category: String,
    pub number: u32,
    pub text: String,
    pub complete: bool,
}

impl QueryEntry {
    pub fn key(&self) -> QueryKey {
        QueryKey::new(self.category.clone(), self.number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EnrichmentCount {
    pub total: u64,
    pub enriched: u64,
}

/// Per-category briefing completion. Flags only ever go from `false` to `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BriefingStatus {
    pub company: bool,
    pub industry: bool,
    pub financial: bool,
    pub news: bool,
}

impl BriefingStatus {
    pub fn get(&self, category: Category) -> bool {
        match category {
            Category::Company => self.company,
            Category::Industry => self.industry,
            Category::Financial => self.financial,
            Category::News => self.news,
        }
    }

    fn mark_complete(&mut self, category: Category) {
        let flag = match category {
            Category::Company => &mut self.company,
            Category::Industry => &mut self.industry,
            Category::Financial => &mut self.financial,
            Category::News => &mut self.news,
        };
        *flag = true;
    }

    pub fn all_complete(&self) -> bool {
        Category::ALL.iter().all(|category| self.get(*category))
    }
}

/// Projected state of one research job.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ResearchSession {
    pub phase: Option<Phase>,
    pub status: StatusLine,
    pub outcome: Outcome,
    pub queries: Vec<QueryEntry>,
    pub pending_queries: BTreeMap<QueryKey, QueryEntry>,
    pub enrichment_counts: BTreeMap<Category, EnrichmentCount>,
    pub briefing_status: BriefingStatus,
    pub report: String,
    pub is_streaming_report: bool,
}

impl ResearchSession {
    /// Fresh session for a just-submitted job.
    pub fn started() -> Self {
        Self {
            status: StatusLine::starting(),
            ..Self::default()
        }
    }

    pub fn all_briefings_complete(&self) -> bool {
        self.briefing_status.all_complete()
    }

    /// Records a session-fatal failure unless an outcome is already set.
    /// Returns `true` when the outcome changed.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.outcome.is_terminal() {
            return false;
        }
        self.outcome = Outcome::Error(message.into());
        true
    }
}

/// What the stream owner must do after an event was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Continue,
    Close,
}

/// Applies one event. Once the session has an outcome no further event changes it.
pub fn reduce(session: &mut ResearchSession, event: ProgressEvent) -> Directive {
    if session.outcome.is_terminal() {
        debug!(kind = event.kind(), "ignoring event for finished session");
        return Directive::Close;
    }

    match event {
        ProgressEvent::Progress { step } => handle_progress(session, step),
        ProgressEvent::ResearchInit { message, company } => {
            session.phase = Some(Phase::Search);
            session.status = StatusLine::new(
                "Initializing",
                message.unwrap_or_else(|| format!("Initiating research for {company}")),
            );
        }
        ProgressEvent::CrawlStart { message } => {
            session.phase = Some(Phase::Search);
            session.status = StatusLine::new(
                "Website Crawl",
                message.unwrap_or_else(|| "Crawling company website".to_string()),
            );
        }
        ProgressEvent::QueryGenerating {
            category,
            number,
            text,
        } => {
            session.phase = Some(Phase::Search);
            session.status = StatusLine::new("Search", format!("Query {number}: {text}"));
            let entry = QueryEntry {
                category,
                number,
                text,
                complete: false,
            };
            session.pending_queries.insert(entry.key(), entry);
        }
        ProgressEvent::QueryGenerated {
            category,
            number,
            text,
        } => {
            session.phase = Some(Phase::Search);
            session.status = StatusLine::new("Search", format!("Generated: {text}"));
            let entry = QueryEntry {
                category,
                number,
                text,
                complete: true,
            };
            session.pending_queries.remove(&entry.key());
            session.queries.push(entry);
        }
        ProgressEvent::Curation {
            category,
            total,
            message,
        } => handle_curation(session, category, total, message),
        ProgressEvent::Enrichment {
            category,
            enriched,
            total,
            message,
        } => handle_enrichment(session, category, enriched, total, message),
        ProgressEvent::BriefingStart {
            category,
            total_docs,
        } => {
            session.phase = Some(Phase::Briefing);
            session.status = StatusLine::new(
                "Generating briefings",
                format!("Creating {category} briefing from {total_docs} documents"),
            );
        }
        ProgressEvent::BriefingComplete {
            category,
            content_length,
        } => {
            session.phase = Some(Phase::Briefing);
            session.status = StatusLine::new(
                "Briefing complete",
                format!("{category} briefing generated ({content_length} characters)"),
            );
            match category.parse::<Category>() {
                Ok(category) => session.briefing_status.mark_complete(category),
                Err(err) => debug!(%err, "briefing completion for untracked category"),
            }
        }
        ProgressEvent::ReportCompilation { message } => {
            session.phase = Some(Phase::Briefing);
            session.status = StatusLine::new(
                "Finalizing report",
                message.unwrap_or_else(|| "Compiling final report".to_string()),
            );
        }
        ProgressEvent::ReportChunk { chunk } => {
            if chunk.is_empty() {
                return Directive::Continue;
            }
            session.is_streaming_report = true;
            session.report.push_str(&chunk);
            session.status = StatusLine::new("Finalizing report", "Generating final report...");
        }
        ProgressEvent::Complete { report } => {
            if report.is_empty() {
                debug!("ignoring completion without report body");
                return Directive::Continue;
            }
            session.is_streaming_report = false;
            session.report = report;
            session.status = StatusLine::new("Complete", "Research completed successfully");
            session.phase = Some(Phase::Complete);
            session.outcome = Outcome::Complete;
            return Directive::Close;
        }
        ProgressEvent::Error { error } => {
            session.outcome =
                Outcome::Error(error.unwrap_or_else(|| GENERIC_RESEARCH_FAILURE.to_string()));
            return Directive::Close;
        }
    }

    Directive::Continue
}

fn handle_progress(session: &mut ResearchSession, step: String) {
    if step.is_empty() {
        return;
    }

    let step = step.as_str();
    if SEARCH_STEPS.contains(&step) {
        session.phase = Some(Phase::Search);
    } else if ENRICHMENT_STEPS.contains(&step) {
        session.phase = Some(Phase::Enrichment);
    } else if step == BRIEFING_STEP {
        session.phase = Some(Phase::Briefing);
    }
    session.status = StatusLine::new(step_display_name(step), format!("Processing {step}..."));
}

/// User-facing label for a pipeline node name.
pub fn step_display_name(step: &str) -> &str {
    if SEARCH_STEPS.contains(&step) {
        "Search"
    } else if ENRICHMENT_STEPS.contains(&step) {
        "Enriching"
    } else if step == BRIEFING_STEP {
        "Briefing"
    } else if step == "editor" {
        "Finalizing"
    } else {
        step
    }
}

fn handle_curation(
    session: &mut ResearchSession,
    category: Option<String>,
    total: Option<u64>,
    message: Option<String>,
) {
    session.phase = Some(Phase::Enrichment);
    let message = message.unwrap_or_else(|| match &category {
        Some(category) => format!("Curating {category} documents"),
        None => "Curating documents".to_string(),
    });
    session.status = StatusLine::new("Curating data", message);

    let Some(category) = category else {
        return;
    };
    match category.parse::<Category>() {
        // A curation pass restarts the category's counters, total included.
        Ok(category) => {
            session.enrichment_counts.insert(
                category,
                EnrichmentCount {
                    total: total.unwrap_or(0),
                    enriched: 0,
                },
            );
        }
        Err(err) => debug!(%err, "curation for untracked category"),
    }
}

fn handle_enrichment(
    session: &mut ResearchSession,
    category: Option<String>,
    enriched: Option<u64>,
    total: Option<u64>,
    message: Option<String>,
) {
    session.phase = Some(Phase::Enrichment);
    session.status = StatusLine::new(
        "Enriching",
        message.unwrap_or_else(|| "Enriching documents with additional content".to_string()),
    );

    let (Some(category), Some(enriched)) = (category, enriched) else {
        return;
    };
    // Counts only exist once some curation pass has started.
    if session.enrichment_counts.is_empty() {
        debug!(%category, "enrichment progress before any curation");
        return;
    }
    let category = match category.parse::<Category>() {
        Ok(category) => category,
        Err(err) => {
            debug!(%err, "enrichment for untracked category");
            return;
        }
    };

    let count = session.enrichment_counts.entry(category).or_default();
    if count.total == 0 {
        count.total = total.unwrap_or(0);
    }
    count.enriched = enriched;
}

#[cfg(test)]
#[path = "tests/reducer_tests.rs"]
mod tests;
