use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identity of a background check or one of its sub-processes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn background_check(email: &str) -> Self {
        Self(format!("BackgroundCheck:{email}"))
    }

    pub fn accept(email: &str) -> Self {
        Self(format!("Accept:{email}"))
    }

    pub fn employment_verification(email: &str) -> Self {
        Self(format!("EmploymentVerification:{email}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one execution of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Addresses exactly one run of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunKey {
    pub instance_id: InstanceId,
    pub run_id: RunId,
}

impl RunKey {
    pub fn new(instance_id: InstanceId, run_id: RunId) -> Self {
        Self {
            instance_id,
            run_id,
        }
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.instance_id, self.run_id)
    }
}

/// Check package requested by the hiring party. Unknown tiers are kept verbatim
/// and simply run the standard set of searches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CheckTier {
    Standard,
    Full,
    Other(String),
}

impl CheckTier {
    pub fn label(&self) -> &str {
        match self {
            CheckTier::Standard => "standard",
            CheckTier::Full => "full",
            CheckTier::Other(raw) => raw,
        }
    }
}

impl From<String> for CheckTier {
    fn from(value: String) -> Self {
        match value.as_str() {
            "standard" => CheckTier::Standard,
            "full" => CheckTier::Full,
            _ => CheckTier::Other(value),
        }
    }
}

impl From<&str> for CheckTier {
    fn from(value: &str) -> Self {
        CheckTier::from(value.to_string())
    }
}

impl From<CheckTier> for String {
    fn from(value: CheckTier) -> Self {
        value.label().to_string()
    }
}

/// Lifecycle of a background check as exposed through the status projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundCheckStatus {
    PendingAccept,
    Running,
    Completed,
    Declined,
    Failed,
    Cancelled,
}

impl BackgroundCheckStatus {
    pub const fn label(self) -> &'static str {
        match self {
            BackgroundCheckStatus::PendingAccept => "pending_accept",
            BackgroundCheckStatus::Running => "running",
            BackgroundCheckStatus::Completed => "completed",
            BackgroundCheckStatus::Declined => "declined",
            BackgroundCheckStatus::Failed => "failed",
            BackgroundCheckStatus::Cancelled => "cancelled",
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(
            self,
            BackgroundCheckStatus::PendingAccept | BackgroundCheckStatus::Running
        )
    }
}

impl fmt::Display for BackgroundCheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for BackgroundCheckStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "pending_accept" => Ok(Self::PendingAccept),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "declined" => Ok(Self::Declined),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Personal data the candidate supplies when accepting the check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateDetails {
    pub full_name: String,
    pub address: String,
    pub ssn: String,
    pub dob: String,
    pub employer: String,
}

/// The candidate's decision, either signalled or synthesized on timeout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptSubmission {
    pub accepted: bool,
    #[serde(default, flatten)]
    pub candidate: CandidateDetails,
}

impl AcceptSubmission {
    pub fn accepted(candidate: CandidateDetails) -> Self {
        Self {
            accepted: true,
            candidate,
        }
    }

    pub fn declined() -> Self {
        Self::default()
    }
}

/// The researcher's verdict on the candidate's stated employer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmploymentVerificationSubmission {
    pub employment_verification_complete: bool,
    pub employer_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsnTraceInput {
    pub full_name: String,
    pub ssn: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsnTraceResult {
    pub ssn_is_valid: bool,
    #[serde(default)]
    pub known_addresses: Vec<String>,
}

impl SsnTraceResult {
    /// First known address, or empty when validation found none.
    pub fn primary_address(&self) -> String {
        self.known_addresses.first().cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederalCriminalSearchInput {
    pub full_name: String,
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederalCriminalSearchResult {
    #[serde(default)]
    pub crimes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCriminalSearchInput {
    pub full_name: String,
    pub known_addresses: Vec<String>,
}

/// Single-address request sent to the state records backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCriminalSearchQuery {
    pub full_name: String,
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCriminalSearchResult {
    #[serde(default)]
    pub crimes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorVehicleIncidentSearchInput {
    pub full_name: String,
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorVehicleIncidentSearchResult {
    pub current_license_state: String,
    pub license_valid: bool,
    pub motor_vehicle_incidents: Vec<String>,
}

/// Verification searches an instance can start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SearchKind {
    FederalCriminalSearch,
    StateCriminalSearch,
    MotorVehicleIncidentSearch,
    EmploymentVerification,
}

impl SearchKind {
    pub const fn name(self) -> &'static str {
        match self {
            SearchKind::FederalCriminalSearch => "FederalCriminalSearch",
            SearchKind::StateCriminalSearch => "StateCriminalSearch",
            SearchKind::MotorVehicleIncidentSearch => "MotorVehicleIncidentSearch",
            SearchKind::EmploymentVerification => "EmploymentVerification",
        }
    }

    /// Name used in logs for the task run on behalf of `email`.
    pub fn task_id(self, email: &str) -> String {
        format!("{}:{email}", self.name())
    }
}

impl fmt::Display for SearchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed outcome of a completed search task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchResult {
    FederalCriminalSearch(FederalCriminalSearchResult),
    StateCriminalSearch(StateCriminalSearchResult),
    MotorVehicleIncidentSearch(MotorVehicleIncidentSearchResult),
    EmploymentVerification(EmploymentVerificationSubmission),
}

impl SearchResult {
    /// One-line rendering used in the final report.
    pub fn summary(&self) -> String {
        match self {
            SearchResult::FederalCriminalSearch(result) => crimes_summary(&result.crimes),
            SearchResult::StateCriminalSearch(result) => crimes_summary(&result.crimes),
            SearchResult::MotorVehicleIncidentSearch(result) => {
                let license = if result.license_valid {
                    format!("valid license ({})", result.current_license_state)
                } else {
                    "no valid license".to_string()
                };
                if result.motor_vehicle_incidents.is_empty() {
                    format!("{license}, no incidents")
                } else {
                    format!(
                        "{license}, incidents: {}",
                        result.motor_vehicle_incidents.join("; ")
                    )
                }
            }
            SearchResult::EmploymentVerification(result) => {
                match (
                    result.employment_verification_complete,
                    result.employer_verified,
                ) {
                    (false, _) => "verification not completed".to_string(),
                    (true, true) => "employer verified".to_string(),
                    (true, false) => "employer could not be verified".to_string(),
                }
            }
        }
    }
}

fn crimes_summary(crimes: &[String]) -> String {
    if crimes.is_empty() {
        "no records found".to_string()
    } else {
        format!("records: {}", crimes.join("; "))
    }
}

/// Projection of one background check, exposed read-only to queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundCheckState {
    pub instance_id: InstanceId,
    pub run_id: RunId,
    pub email: String,
    pub tier: CheckTier,
    pub status: BackgroundCheckStatus,
    pub accept: Option<AcceptSubmission>,
    pub ssn_trace: Option<SsnTraceResult>,
    pub requested_searches: BTreeSet<String>,
    pub search_results: BTreeMap<String, SearchResult>,
    pub search_errors: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackgroundCheckState {
    pub fn new(
        instance_id: InstanceId,
        run_id: RunId,
        email: impl Into<String>,
        tier: CheckTier,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            instance_id,
            run_id,
            email: email.into(),
            tier,
            status: BackgroundCheckStatus::PendingAccept,
            accept: None,
            ssn_trace: None,
            requested_searches: BTreeSet::new(),
            search_results: BTreeMap::new(),
            search_errors: BTreeMap::new(),
            failure: None,
            cancellation_reason: None,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn run_key(&self) -> RunKey {
        RunKey::new(self.instance_id.clone(), self.run_id.clone())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the candidate accepted; `None` until a decision is recorded.
    pub fn accepted(&self) -> Option<bool> {
        self.accept.as_ref().map(|decision| decision.accepted)
    }

    /// Records the first outcome for `name`. Later outcomes for the same search
    /// are ignored so a name never lands in both maps.
    pub fn record_search(&mut self, name: &str, outcome: Result<SearchResult, String>) -> bool {
        if self.search_results.contains_key(name) || self.search_errors.contains_key(name) {
            return false;
        }
        match outcome {
            Ok(result) => {
                self.search_results.insert(name.to_string(), result);
            }
            Err(message) => {
                self.search_errors.insert(name.to_string(), message);
            }
        }
        true
    }

    /// Requested searches that have not resolved yet.
    pub fn outstanding_searches(&self) -> Vec<&str> {
        self.requested_searches
            .iter()
            .filter(|name| {
                !self.search_results.contains_key(name.as_str())
                    && !self.search_errors.contains_key(name.as_str())
            })
            .map(String::as_str)
            .collect()
    }

    pub fn summary(&self) -> CheckSummary {
        CheckSummary {
            id: self.instance_id.clone(),
            run_id: self.run_id.clone(),
            email: self.email.clone(),
            tier: self.tier.clone(),
            status: self.status.label(),
            created_at: self.created_at,
        }
    }
}

/// Compact listing entry for a background check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckSummary {
    pub id: InstanceId,
    pub run_id: RunId,
    pub email: String,
    pub tier: CheckTier,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
}
