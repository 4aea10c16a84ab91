use client_core::{QueryEntry, ResearchSession, StatusLine};
use shared::domain::{Category, Phase};

/// Turns successive session snapshots into the lines that changed since the last one.
#[derive(Debug, Default)]
pub struct ProgressPrinter {
    phase: Option<Phase>,
    status: Option<StatusLine>,
    printed_queries: usize,
    last_query: Option<QueryEntry>,
}

impl ProgressPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets everything printed so far.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn update(&mut self, session: &ResearchSession) -> Vec<String> {
        let mut lines = Vec::new();

        if session.phase != self.phase {
            if let Some(phase) = session.phase {
                lines.push(format!("== {phase} =="));
            }
            self.phase = session.phase;
        }

        // A different entry at the last printed position means a new session.
        let seen = self
            .printed_queries
            .checked_sub(1)
            .and_then(|last| session.queries.get(last));
        if self.printed_queries > 0 && seen != self.last_query.as_ref() {
            self.printed_queries = 0;
        }
        for query in &session.queries[self.printed_queries..] {
            lines.push(format!(
                "  [{} #{}] {}",
                query.category, query.number, query.text
            ));
        }
        self.printed_queries = session.queries.len();
        self.last_query = session.queries.last().cloned();

        if self.status.as_ref() != Some(&session.status) && !session.status.step.is_empty() {
            lines.push(format!(
                "{}: {}",
                session.status.step, session.status.message
            ));
            self.status = Some(session.status.clone());
        }

        lines
    }
}

pub fn summary(session: &ResearchSession) -> Vec<String> {
    let mut lines = vec![format!("{} queries generated", session.queries.len())];
    for category in Category::ALL {
        let briefing = if session.briefing_status.get(category) {
            "briefed"
        } else {
            "no briefing"
        };
        match session.enrichment_counts.get(&category) {
            Some(count) => lines.push(format!(
                "{category}: {}/{} documents enriched, {briefing}",
                count.enriched, count.total
            )),
            None => lines.push(format!("{category}: {briefing}")),
        }
    }
    lines
}

#[cfg(test)]
#[path = "tests/render_tests.rs"]
mod tests;
