use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

use super::context::{Cancellation, WorkflowContext};
use super::domain::{
    AcceptSubmission, BackgroundCheckState, BackgroundCheckStatus, CandidateDetails,
    CheckSummary, CheckTier, EmploymentVerificationSubmission, InstanceId, RunId, RunKey,
};
use super::journal::{Journal, JournalError, JournalEvent, StepRecord};
use super::mailbox::{DecisionKind, DecisionSignal, DeliveryError, Mailboxes};
use super::notify::Notifier;
use super::orchestrator::{BackgroundCheckWorkflow, WorkflowDeps};
use super::search::{SearchBackend, SearchRunner};
use super::token::{self, DecisionToken, TokenError};
use super::WorkflowSettings;

/// Errors surfaced to callers of the engine, classified for HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl EngineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::InvalidRequest(_) | EngineError::Token(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::Journal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<DeliveryError> for EngineError {
    fn from(value: DeliveryError) -> Self {
        match value {
            DeliveryError::Unknown => EngineError::NotFound(value.to_string()),
            DeliveryError::Closed => EngineError::Conflict(value.to_string()),
            DeliveryError::WrongKind { .. } => EngineError::InvalidRequest(value.to_string()),
        }
    }
}

/// Response to a successful `create`.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedCheck {
    pub id: InstanceId,
    pub run_id: RunId,
    pub status: &'static str,
    pub report_token: DecisionToken,
}

/// Optional filters for `list`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckFilter {
    pub email: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Finished runs loaded as read-only history.
    pub restored: usize,
    /// Unfinished runs picked up where they stopped.
    pub resumed: usize,
    /// Runs whose journal could not be read.
    pub skipped: usize,
}

struct CheckHandle {
    state: watch::Receiver<BackgroundCheckState>,
    cancellation: Cancellation,
    task: Option<JoinHandle<BackgroundCheckState>>,
}

#[derive(Default)]
struct Registry {
    latest: HashMap<InstanceId, RunId>,
    runs: HashMap<RunKey, CheckHandle>,
}

impl Registry {
    fn latest_handle(&self, instance_id: &InstanceId) -> Result<&CheckHandle, EngineError> {
        self.latest
            .get(instance_id)
            .and_then(|run_id| {
                self.runs
                    .get(&RunKey::new(instance_id.clone(), run_id.clone()))
            })
            .ok_or_else(|| EngineError::NotFound(instance_id.to_string()))
    }
}

struct EngineInner {
    deps: Arc<WorkflowDeps>,
    journal: Arc<dyn Journal>,
    registry: Mutex<Registry>,
}

/// Hosts background-check runs: starts them, routes decisions to them,
/// answers status queries and resumes journaled runs after a restart.
#[derive(Clone)]
pub struct CheckEngine {
    inner: Arc<EngineInner>,
}

impl CheckEngine {
    pub fn new(
        settings: WorkflowSettings,
        backend: Arc<dyn SearchBackend>,
        notifier: Arc<dyn Notifier>,
        journal: Arc<dyn Journal>,
    ) -> Self {
        let searches = SearchRunner::new(backend, settings.search_timeout);
        let deps = WorkflowDeps {
            settings,
            searches,
            notifier,
            mailboxes: Arc::new(Mailboxes::new()),
        };
        Self {
            inner: Arc::new(EngineInner {
                deps: Arc::new(deps),
                journal,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.inner.deps.settings
    }

    /// Starts a new run for `email`. Must be called inside a tokio runtime.
    pub fn create(&self, email: &str, tier: CheckTier) -> Result<CreatedCheck, EngineError> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(EngineError::InvalidRequest(format!(
                "'{email}' is not an email address"
            )));
        }

        let instance_id = InstanceId::background_check(email);
        let mut registry = self.lock_registry();
        if let Ok(handle) = registry.latest_handle(&instance_id) {
            if !handle.state.borrow().is_terminal() {
                return Err(EngineError::Conflict(format!(
                    "{instance_id} is already running"
                )));
            }
        }

        let run_id = RunId::generate();
        let created_at = Utc::now();
        let key = RunKey::new(instance_id.clone(), run_id.clone());
        self.inner.journal.append(
            &key,
            &JournalEvent::Started {
                run: key.clone(),
                email: email.to_string(),
                tier: tier.clone(),
                created_at,
            },
        )?;

        let state = BackgroundCheckState::new(instance_id.clone(), run_id.clone(), email, tier, created_at);
        info!(instance_id = %instance_id, run_id = %run_id, tier = state.tier.label(), "background check created");
        self.launch(&mut registry, state, HashMap::new());

        Ok(CreatedCheck {
            report_token: token::issue(&instance_id, &run_id),
            id: instance_id,
            run_id,
            status: BackgroundCheckStatus::PendingAccept.label(),
        })
    }

    /// Snapshot of the latest run of `instance_id`.
    pub fn status(&self, instance_id: &InstanceId) -> Result<BackgroundCheckState, EngineError> {
        let registry = self.lock_registry();
        let handle = registry.latest_handle(instance_id)?;
        let state = handle.state.borrow().clone();
        Ok(state)
    }

    /// Snapshot of the run a token addresses. Sub-process tokens resolve to
    /// the background check that owns them.
    pub fn status_by_token(&self, token: &str) -> Result<BackgroundCheckState, EngineError> {
        let key = token::resolve_key(token)?;
        let registry = self.lock_registry();
        let handle = match registry.runs.get(&key) {
            Some(handle) => handle,
            None => self
                .inner
                .deps
                .mailboxes
                .parent_of(&key)
                .and_then(|parent| registry.runs.get(&parent))
                .ok_or_else(|| EngineError::NotFound(format!("no run for {key}")))?,
        };
        let state = handle.state.borrow().clone();
        Ok(state)
    }

    pub fn report_token(&self, instance_id: &InstanceId) -> Result<DecisionToken, EngineError> {
        let registry = self.lock_registry();
        let run_id = registry
            .latest
            .get(instance_id)
            .ok_or_else(|| EngineError::NotFound(instance_id.to_string()))?;
        Ok(token::issue(instance_id, run_id))
    }

    /// Every known run, oldest first.
    pub fn list(&self, filter: &CheckFilter) -> Result<Vec<CheckSummary>, EngineError> {
        let status = filter
            .status
            .as_deref()
            .filter(|status| !status.trim().is_empty())
            .map(|status| status.parse::<BackgroundCheckStatus>())
            .transpose()
            .map_err(|err| EngineError::InvalidRequest(err.to_string()))?;
        let email = filter
            .email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty());

        let registry = self.lock_registry();
        let mut summaries: Vec<CheckSummary> = registry
            .runs
            .values()
            .map(|handle| handle.state.borrow().summary())
            .filter(|summary| email.map_or(true, |email| summary.email == email))
            .filter(|summary| status.map_or(true, |status| summary.status == status.label()))
            .collect();
        summaries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(summaries)
    }

    pub fn accept(&self, token: &str, candidate: CandidateDetails) -> Result<(), EngineError> {
        self.signal(token, DecisionSignal::Accept(AcceptSubmission::accepted(candidate)))
    }

    pub fn decline(&self, token: &str) -> Result<(), EngineError> {
        self.signal(token, DecisionSignal::Accept(AcceptSubmission::declined()))
    }

    pub fn verify_employment(
        &self,
        token: &str,
        submission: EmploymentVerificationSubmission,
    ) -> Result<(), EngineError> {
        self.signal(token, DecisionSignal::EmploymentVerification(submission))
    }

    /// Candidate details a researcher needs to verify employment.
    pub fn employment_verification_details(
        &self,
        token: &str,
    ) -> Result<CandidateDetails, EngineError> {
        let key = token::resolve_key(token)?;
        let details = self
            .inner
            .deps
            .mailboxes
            .details(&key, DecisionKind::EmploymentVerification)?;
        Ok(details)
    }

    pub fn cancel(&self, instance_id: &InstanceId, reason: &str) -> Result<(), EngineError> {
        let registry = self.lock_registry();
        let handle = registry.latest_handle(instance_id)?;
        let status = handle.state.borrow().status;
        if status.is_terminal() {
            return Err(EngineError::Conflict(format!(
                "{instance_id} is already {status}"
            )));
        }
        if handle.task.is_none() {
            return Err(EngineError::Unavailable(format!(
                "{instance_id} is not running in this engine"
            )));
        }

        let reason = if reason.trim().is_empty() {
            "cancelled by operator"
        } else {
            reason.trim()
        };
        info!(instance_id = %instance_id, reason, "cancelling background check");
        handle.cancellation.cancel(reason);
        Ok(())
    }

    /// Waits until the latest run of `instance_id` has finished, final
    /// notifications included.
    pub async fn wait(&self, instance_id: &InstanceId) -> Result<BackgroundCheckState, EngineError> {
        let mut receiver = {
            let registry = self.lock_registry();
            registry.latest_handle(instance_id)?.state.clone()
        };
        // The sender lives as long as the run task, past its final notifications.
        while receiver.changed().await.is_ok() {}
        let state = receiver.borrow().clone();
        if !state.is_terminal() {
            return Err(EngineError::Unavailable(format!(
                "{instance_id} stopped before finishing"
            )));
        }
        Ok(state)
    }

    /// Loads every journaled run this engine does not know yet. Finished runs
    /// become read-only history; unfinished runs resume from their journal.
    pub fn recover(&self) -> Result<RecoveryReport, EngineError> {
        let mut report = RecoveryReport::default();
        let mut loaded = Vec::new();
        {
            let registry = self.lock_registry();
            for key in self.inner.journal.runs()? {
                if registry.runs.contains_key(&key) {
                    continue;
                }
                match self.load_run(&key) {
                    Ok(Some(run)) => loaded.push(run),
                    Ok(None) => warn!(run = %key, "journal has no start event, skipping"),
                    Err(err) => {
                        error!(run = %key, error = %err, "journal is unreadable, skipping run");
                        report.skipped += 1;
                    }
                }
            }
        }
        loaded.sort_by(|a, b| a.state.created_at.cmp(&b.state.created_at));

        let mut registry = self.lock_registry();
        for run in loaded {
            self.restore_mailboxes(&run);
            match run.finished {
                Some(state) => {
                    let key = state.run_key();
                    let (_, receiver) = watch::channel(state);
                    registry
                        .latest
                        .insert(key.instance_id.clone(), key.run_id.clone());
                    registry.runs.insert(
                        key,
                        CheckHandle {
                            state: receiver,
                            cancellation: Cancellation::new(),
                            task: None,
                        },
                    );
                    report.restored += 1;
                }
                None => {
                    info!(run = %run.state.run_key(), steps = run.history.len(), "resuming background check");
                    self.launch(&mut registry, run.state, run.history);
                    report.resumed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Re-registers the sub-processes a journaled run had started, so their
    /// tokens keep resolving. Undecided ones whose deadline has not passed
    /// take signals again straight away.
    fn restore_mailboxes(&self, run: &LoadedRun) {
        let parent = run.state.run_key();
        let mailboxes = &self.inner.deps.mailboxes;
        for kind in DecisionKind::ALL {
            let step = kind.step();
            let Some(run_id) = recorded::<RunId>(&run.history, &format!("{step}/run")) else {
                continue;
            };
            let key = RunKey::new(kind.instance_id(&run.state.email), run_id);

            let decided = run.finished.is_some()
                || run.history.contains_key(&format!("{step}/decision"));
            let expired = recorded::<DateTime<Utc>>(&run.history, &format!("{step}/deadline"))
                .is_some_and(|deadline| deadline <= Utc::now());
            if decided || expired {
                mailboxes.restore_closed(key, kind, parent.clone());
                continue;
            }

            let details = match kind {
                DecisionKind::Accept => CandidateDetails::default(),
                DecisionKind::EmploymentVerification => {
                    let accept = format!("{}/decision", DecisionKind::Accept.step());
                    recorded::<AcceptSubmission>(&run.history, &accept)
                        .map(|accepted| accepted.candidate)
                        .unwrap_or_default()
                }
            };
            mailboxes.reserve(key, kind, parent.clone(), details);
        }
    }

    /// Stops every running workflow without journaling a terminal state, as
    /// if the process had crashed. Journaled runs can resume elsewhere.
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<BackgroundCheckState>> = {
            let mut registry = self.lock_registry();
            registry
                .runs
                .values_mut()
                .filter_map(|handle| handle.task.take())
                .collect()
        };
        for task in &tasks {
            task.abort();
        }
        futures::future::join_all(tasks).await;
    }

    fn signal(&self, token: &str, signal: DecisionSignal) -> Result<(), EngineError> {
        let key = token::resolve_key(token)?;
        let kind = signal.kind();
        self.inner
            .deps
            .mailboxes
            .deliver_with(&key, signal, |parent, signal| {
                self.journal_decision(parent, signal)
            })?;
        info!(run = %key, %kind, "decision delivered");
        Ok(())
    }

    /// Journals a decision on the owning run before it is acknowledged, so
    /// a restart replays it instead of waiting again.
    fn journal_decision(&self, parent: &RunKey, signal: &DecisionSignal) -> Result<(), EngineError> {
        let output = signal.to_record().map_err(JournalError::Encode)?;
        self.inner.journal.append(
            parent,
            &JournalEvent::Step {
                key: format!("{}/decision", signal.kind().step()),
                record: StepRecord::Completed { output },
                recorded_at: Utc::now(),
            },
        )?;
        Ok(())
    }

    fn launch(
        &self,
        registry: &mut Registry,
        state: BackgroundCheckState,
        history: HashMap<String, StepRecord>,
    ) {
        let key = state.run_key();
        let cancellation = Cancellation::new();
        let ctx = WorkflowContext::new(
            key.clone(),
            Arc::clone(&self.inner.journal),
            history,
            cancellation.clone(),
        );
        let (sender, receiver) = watch::channel(state.clone());
        let workflow = BackgroundCheckWorkflow::new(Arc::clone(&self.inner.deps), ctx, state, sender);

        let span = info_span!(
            "background_check",
            instance_id = %key.instance_id,
            run_id = %key.run_id
        );
        let task = tokio::spawn(workflow.run().instrument(span));

        registry
            .latest
            .insert(key.instance_id.clone(), key.run_id.clone());
        registry.runs.insert(
            key,
            CheckHandle {
                state: receiver,
                cancellation,
                task: Some(task),
            },
        );
    }

    fn load_run(&self, key: &RunKey) -> Result<Option<LoadedRun>, JournalError> {
        let mut start: Option<(String, CheckTier, DateTime<Utc>)> = None;
        let mut history = HashMap::new();
        let mut finished = None;

        for event in self.inner.journal.load(key)? {
            match event {
                JournalEvent::Started {
                    email,
                    tier,
                    created_at,
                    ..
                } => start = Some((email, tier, created_at)),
                JournalEvent::Step { key, record, .. } => {
                    history.entry(key).or_insert(record);
                }
                JournalEvent::Finished { state } => finished = Some(*state),
            }
        }

        Ok(start.map(|(email, tier, created_at)| LoadedRun {
            state: BackgroundCheckState::new(
                key.instance_id.clone(),
                key.run_id.clone(),
                email,
                tier,
                created_at,
            ),
            history,
            finished,
        }))
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.inner.registry.lock().expect("registry mutex poisoned")
    }
}

fn recorded<T: DeserializeOwned>(history: &HashMap<String, StepRecord>, key: &str) -> Option<T> {
    match history.get(key) {
        Some(StepRecord::Completed { output }) => serde_json::from_value(output.clone()).ok(),
        _ => None,
    }
}

struct LoadedRun {
    state: BackgroundCheckState,
    history: HashMap<String, StepRecord>,
    finished: Option<BackgroundCheckState>,
}
