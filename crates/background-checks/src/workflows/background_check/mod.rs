//! Background-check orchestration.
//!
//! A check moves through the candidate's consent, an SSN trace and a
//! tier-dependent fan-out of verification searches. Every externally visible
//! step is journaled under a key so a restarted engine replays finished steps
//! instead of repeating them. Candidates and researchers address the run they
//! act on through opaque decision tokens.

pub(crate) mod context;
mod decision;
pub mod domain;
pub mod engine;
pub mod journal;
pub mod mailbox;
pub mod notify;
pub(crate) mod orchestrator;
pub mod router;
pub mod search;
pub mod token;

#[cfg(test)]
mod tests;

use std::time::Duration;

pub use context::{Cancellation, WorkflowError};
pub use domain::{
    AcceptSubmission, BackgroundCheckState, BackgroundCheckStatus, CandidateDetails, CheckSummary,
    CheckTier, EmploymentVerificationSubmission, FederalCriminalSearchResult, InstanceId,
    MotorVehicleIncidentSearchResult, RunId, RunKey, SearchKind, SearchResult, SsnTraceResult,
    StateCriminalSearchResult,
};
pub use engine::{CheckEngine, CheckFilter, CreatedCheck, EngineError, RecoveryReport};
pub use journal::{FileJournal, InMemoryJournal, Journal, JournalError, JournalEvent, StepRecord};
pub use mailbox::{DecisionKind, DeliveryError};
pub use notify::{InMemoryNotifier, LogNotifier, Notification, Notifier, NotifyError, TemplateKind};
pub use router::check_router;
pub use search::{HttpSearchBackend, SearchBackend, SearchError, SearchRunner, StubSearchBackend};
pub use token::{DecisionToken, TokenError};

const WEEK: Duration = Duration::from_secs(60 * 60 * 24 * 7);

/// Timing and routing knobs shared by every run of an engine.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub accept_grace_period: Duration,
    pub research_deadline: Duration,
    pub search_timeout: Duration,
    pub hiring_manager_email: String,
    pub researchers: Vec<String>,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            accept_grace_period: WEEK,
            research_deadline: WEEK,
            search_timeout: Duration::from_secs(60),
            hiring_manager_email: "Hiring Manager <hiring@company.local>".to_string(),
            researchers: vec![
                "researcher1@example.com".to_string(),
                "researcher2@example.com".to_string(),
                "researcher3@example.com".to_string(),
            ],
        }
    }
}
