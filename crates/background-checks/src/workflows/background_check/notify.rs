use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::domain::{BackgroundCheckState, CandidateDetails};
use super::token::DecisionToken;

const TOKEN_KEY: &str = "token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemplateKind {
    AcceptRequest,
    DeclineNotice,
    EmploymentVerificationRequest,
    FinalReport,
}

impl TemplateKind {
    pub const fn name(self) -> &'static str {
        match self {
            TemplateKind::AcceptRequest => "accept_request",
            TemplateKind::DeclineNotice => "decline_notice",
            TemplateKind::EmploymentVerificationRequest => "employment_verification_request",
            TemplateKind::FinalReport => "final_report",
        }
    }
}

/// Outbound message addressed to one party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub template: TemplateKind,
    pub recipient: String,
    pub data: BTreeMap<String, String>,
}

impl Notification {
    pub fn accept_request(candidate_email: &str, token: &DecisionToken) -> Self {
        let mut data = BTreeMap::new();
        data.insert("candidate_email".to_string(), candidate_email.to_string());
        data.insert(TOKEN_KEY.to_string(), token.to_string());
        Self {
            template: TemplateKind::AcceptRequest,
            recipient: candidate_email.to_string(),
            data,
        }
    }

    pub fn decline_notice(hiring_manager: &str, candidate_email: &str) -> Self {
        let mut data = BTreeMap::new();
        data.insert("candidate_email".to_string(), candidate_email.to_string());
        Self {
            template: TemplateKind::DeclineNotice,
            recipient: hiring_manager.to_string(),
            data,
        }
    }

    pub fn employment_verification_request(
        researcher: &str,
        candidate_email: &str,
        candidate: &CandidateDetails,
        token: &DecisionToken,
    ) -> Self {
        let mut data = BTreeMap::new();
        data.insert("candidate_email".to_string(), candidate_email.to_string());
        data.insert("full_name".to_string(), candidate.full_name.clone());
        data.insert("employer".to_string(), candidate.employer.clone());
        data.insert(TOKEN_KEY.to_string(), token.to_string());
        Self {
            template: TemplateKind::EmploymentVerificationRequest,
            recipient: researcher.to_string(),
            data,
        }
    }

    /// Report for the requesting party: one `result.<search>` entry per
    /// completed search and one `error.<search>` entry per failed search.
    pub fn final_report(
        hiring_manager: &str,
        state: &BackgroundCheckState,
        report_token: &DecisionToken,
    ) -> Self {
        let mut data = BTreeMap::new();
        data.insert("candidate_email".to_string(), state.email.clone());
        data.insert("tier".to_string(), state.tier.label().to_string());
        data.insert(TOKEN_KEY.to_string(), report_token.to_string());
        if let Some(trace) = &state.ssn_trace {
            data.insert("ssn_valid".to_string(), trace.ssn_is_valid.to_string());
        }
        for (name, result) in &state.search_results {
            data.insert(format!("result.{name}"), result.summary());
        }
        for (name, error) in &state.search_errors {
            data.insert(format!("error.{name}"), error.clone());
        }
        Self {
            template: TemplateKind::FinalReport,
            recipient: hiring_manager.to_string(),
            data,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.data.get(TOKEN_KEY).map(String::as_str)
    }

    fn value(&self, key: &str) -> &str {
        self.data.get(key).map(String::as_str).unwrap_or_default()
    }

    pub fn subject(&self) -> String {
        match self.template {
            TemplateKind::AcceptRequest => "Background Check Request".to_string(),
            TemplateKind::DeclineNotice => format!(
                "Background Check Declined: {}",
                self.value("candidate_email")
            ),
            TemplateKind::EmploymentVerificationRequest => format!(
                "Employment Verification Request: {}",
                self.value("full_name")
            ),
            TemplateKind::FinalReport => format!(
                "Background Check Report: {}",
                self.value("candidate_email")
            ),
        }
    }

    pub fn render_body(&self) -> String {
        let mut body = String::new();
        match self.template {
            TemplateKind::AcceptRequest => {
                let _ = writeln!(
                    body,
                    "A background check has been requested for {}.",
                    self.value("candidate_email")
                );
                let _ = writeln!(
                    body,
                    "Accept or decline it using token: {}",
                    self.value(TOKEN_KEY)
                );
            }
            TemplateKind::DeclineNotice => {
                let _ = writeln!(
                    body,
                    "{} declined the background check or did not respond in time.",
                    self.value("candidate_email")
                );
            }
            TemplateKind::EmploymentVerificationRequest => {
                let _ = writeln!(
                    body,
                    "Please verify that {} ({}) is employed by {}.",
                    self.value("full_name"),
                    self.value("candidate_email"),
                    self.value("employer")
                );
                let _ = writeln!(body, "Submit your findings using token: {}", self.value(TOKEN_KEY));
            }
            TemplateKind::FinalReport => {
                let _ = writeln!(
                    body,
                    "Background check for {} ({} tier) is complete.",
                    self.value("candidate_email"),
                    self.value("tier")
                );
                if let Some(valid) = self.data.get("ssn_valid") {
                    let verdict = if valid == "true" { "valid" } else { "invalid" };
                    let _ = writeln!(body, "SSN trace: {verdict}");
                }
                for (key, value) in &self.data {
                    if let Some(name) = key.strip_prefix("result.") {
                        let _ = writeln!(body, "{name}: {value}");
                    }
                }
                for (key, value) in &self.data {
                    if let Some(name) = key.strip_prefix("error.") {
                        let _ = writeln!(body, "{name}: FAILED ({value})");
                    }
                }
                let _ = writeln!(body, "Full report token: {}", self.value(TOKEN_KEY));
            }
        }
        body
    }
}

/// Outbound delivery of notifications (mail, chat, ...).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
    #[error("recipient {recipient} rejected: {reason}")]
    Rejected { recipient: String, reason: String },
}

/// Writes notifications to the tracing subscriber instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            template = notification.template.name(),
            recipient = %notification.recipient,
            subject = %notification.subject(),
            "notification sent"
        );
        debug!(body = %notification.render_body(), "notification body");
        Ok(())
    }
}

/// Captures notifications in memory; optionally fails selected templates.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: Mutex<HashSet<TemplateKind>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, template: TemplateKind) {
        self.failing
            .lock()
            .expect("notifier mutex poisoned")
            .insert(template);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("notifier mutex poisoned").clone()
    }

    pub fn count(&self, template: TemplateKind) -> usize {
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .iter()
            .filter(|notification| notification.template == template)
            .count()
    }

    pub fn latest(&self, template: TemplateKind, recipient: &str) -> Option<Notification> {
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .iter()
            .rev()
            .find(|notification| {
                notification.template == template && notification.recipient == recipient
            })
            .cloned()
    }

    pub fn latest_of(&self, template: TemplateKind) -> Option<Notification> {
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .iter()
            .rev()
            .find(|notification| notification.template == template)
            .cloned()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let failing = self
            .failing
            .lock()
            .expect("notifier mutex poisoned")
            .contains(&notification.template);
        if failing {
            return Err(NotifyError::Transport(format!(
                "{} delivery disabled",
                notification.template.name()
            )));
        }
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .push(notification.clone());
        Ok(())
    }
}
