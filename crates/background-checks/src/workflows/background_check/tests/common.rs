use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::to_bytes;
use axum::response::Response;
use serde_json::Value;

use crate::workflows::background_check::domain::{
    CandidateDetails, FederalCriminalSearchInput, FederalCriminalSearchResult, InstanceId,
    MotorVehicleIncidentSearchInput, MotorVehicleIncidentSearchResult, StateCriminalSearchQuery,
    StateCriminalSearchResult, SsnTraceInput, SsnTraceResult,
};
use crate::workflows::background_check::{
    CheckEngine, InMemoryJournal, InMemoryNotifier, Journal, Notification, SearchBackend,
    SearchError, TemplateKind, WorkflowSettings,
};

pub(super) const EMAIL: &str = "a@x.com";
pub(super) const VALID_SSN: &str = "111-11-1111";
pub(super) const INVALID_SSN: &str = "000-11-1111";

/// Record provider whose answers, failures and hangs are set per search.
#[derive(Default)]
pub(super) struct ScriptedBackend {
    failing: Mutex<HashMap<&'static str, String>>,
    hanging: Mutex<HashSet<&'static str>>,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedBackend {
    pub(super) fn fail(&self, search: &'static str, message: &str) {
        self.failing
            .lock()
            .expect("backend mutex poisoned")
            .insert(search, message.to_string());
    }

    pub(super) fn hang(&self, search: &'static str) {
        self.hanging
            .lock()
            .expect("backend mutex poisoned")
            .insert(search);
    }

    pub(super) fn calls(&self, search: &str) -> usize {
        self.calls
            .lock()
            .expect("backend mutex poisoned")
            .iter()
            .filter(|call| **call == search)
            .count()
    }

    pub(super) fn total_calls(&self) -> usize {
        self.calls.lock().expect("backend mutex poisoned").len()
    }

    async fn script(&self, search: &'static str) -> Result<(), SearchError> {
        self.calls
            .lock()
            .expect("backend mutex poisoned")
            .push(search);
        let hanging = self
            .hanging
            .lock()
            .expect("backend mutex poisoned")
            .contains(search);
        if hanging {
            std::future::pending::<()>().await;
        }
        let failure = self
            .failing
            .lock()
            .expect("backend mutex poisoned")
            .get(search)
            .cloned();
        match failure {
            Some(message) => Err(SearchError::Unavailable { search, message }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SearchBackend for ScriptedBackend {
    async fn ssn_trace(&self, input: &SsnTraceInput) -> Result<SsnTraceResult, SearchError> {
        self.script("SsnTrace").await?;
        if input.ssn.starts_with("000") {
            return Ok(SsnTraceResult::default());
        }
        Ok(SsnTraceResult {
            ssn_is_valid: true,
            known_addresses: vec!["1 Chestnut Avenue".to_string(), "9 Elm Street".to_string()],
        })
    }

    async fn federal_criminal_search(
        &self,
        _input: &FederalCriminalSearchInput,
    ) -> Result<FederalCriminalSearchResult, SearchError> {
        self.script("FederalCriminalSearch").await?;
        Ok(FederalCriminalSearchResult::default())
    }

    async fn state_criminal_search(
        &self,
        query: &StateCriminalSearchQuery,
    ) -> Result<StateCriminalSearchResult, SearchError> {
        self.script("StateCriminalSearch").await?;
        Ok(StateCriminalSearchResult {
            crimes: vec![format!("trespass near {}", query.address)],
        })
    }

    async fn motor_vehicle_incident_search(
        &self,
        input: &MotorVehicleIncidentSearchInput,
    ) -> Result<MotorVehicleIncidentSearchResult, SearchError> {
        self.script("MotorVehicleIncidentSearch").await?;
        Ok(MotorVehicleIncidentSearchResult {
            current_license_state: "CA".to_string(),
            license_valid: !input.address.is_empty(),
            motor_vehicle_incidents: Vec::new(),
        })
    }
}

pub(super) struct Harness {
    pub(super) engine: CheckEngine,
    pub(super) notifier: Arc<InMemoryNotifier>,
    pub(super) backend: Arc<ScriptedBackend>,
}

pub(super) fn settings() -> WorkflowSettings {
    WorkflowSettings::default()
}

pub(super) fn harness() -> Harness {
    harness_on(Arc::new(InMemoryJournal::new()))
}

pub(super) fn harness_on(journal: Arc<dyn Journal>) -> Harness {
    let notifier = Arc::new(InMemoryNotifier::new());
    let backend = Arc::new(ScriptedBackend::default());
    let engine = CheckEngine::new(settings(), backend.clone(), notifier.clone(), journal);
    Harness {
        engine,
        notifier,
        backend,
    }
}

pub(super) fn candidate(employer: &str) -> CandidateDetails {
    CandidateDetails {
        full_name: "John Smith".to_string(),
        address: "1 Chestnut Avenue".to_string(),
        ssn: VALID_SSN.to_string(),
        dob: "1980-01-01".to_string(),
        employer: employer.to_string(),
    }
}

pub(super) fn check_id() -> InstanceId {
    InstanceId::background_check(EMAIL)
}

/// Polls `attempt` until it yields a value, giving spawned runs time to progress.
pub(super) async fn eventually<T>(mut attempt: impl FnMut() -> Option<T>) -> T {
    for _ in 0..500 {
        if let Some(value) = attempt() {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

pub(super) async fn notification(
    notifier: &InMemoryNotifier,
    template: TemplateKind,
) -> Notification {
    eventually(|| notifier.latest_of(template)).await
}

pub(super) async fn accept_token(notifier: &InMemoryNotifier) -> String {
    token_of(notification(notifier, TemplateKind::AcceptRequest).await)
}

pub(super) async fn verification_token(notifier: &InMemoryNotifier) -> String {
    token_of(notification(notifier, TemplateKind::EmploymentVerificationRequest).await)
}

fn token_of(notification: Notification) -> String {
    notification
        .token()
        .expect("notification carries a token")
        .to_string()
}

pub(super) async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    serde_json::from_slice(&bytes).expect("json body")
}
