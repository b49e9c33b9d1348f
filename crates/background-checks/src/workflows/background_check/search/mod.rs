//! Verification searches run against third-party record providers.

mod http;
mod stub;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::domain::{
    FederalCriminalSearchInput, FederalCriminalSearchResult, MotorVehicleIncidentSearchInput,
    MotorVehicleIncidentSearchResult, StateCriminalSearchInput, StateCriminalSearchQuery,
    StateCriminalSearchResult, SsnTraceInput, SsnTraceResult,
};

pub use http::HttpSearchBackend;
pub use stub::StubSearchBackend;

/// One call per record provider. Implementations hold no per-check state and
/// are called concurrently.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn ssn_trace(&self, input: &SsnTraceInput) -> Result<SsnTraceResult, SearchError>;

    async fn federal_criminal_search(
        &self,
        input: &FederalCriminalSearchInput,
    ) -> Result<FederalCriminalSearchResult, SearchError>;

    async fn state_criminal_search(
        &self,
        query: &StateCriminalSearchQuery,
    ) -> Result<StateCriminalSearchResult, SearchError>;

    async fn motor_vehicle_incident_search(
        &self,
        input: &MotorVehicleIncidentSearchInput,
    ) -> Result<MotorVehicleIncidentSearchResult, SearchError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchError {
    #[error("{search} timed out after {after:?}")]
    Timeout {
        search: &'static str,
        after: Duration,
    },
    #[error("{search} transport failure: {message}")]
    Transport {
        search: &'static str,
        message: String,
    },
    #[error("{search} returned status {status}: {body}")]
    Status {
        search: &'static str,
        status: u16,
        body: String,
    },
    #[error("{search} returned a malformed response: {message}")]
    Decode {
        search: &'static str,
        message: String,
    },
    #[error("{search} is unavailable: {message}")]
    Unavailable {
        search: &'static str,
        message: String,
    },
}

/// Bounds every backend call with the configured timeout.
#[derive(Clone)]
pub struct SearchRunner {
    backend: Arc<dyn SearchBackend>,
    timeout: Duration,
}

impl SearchRunner {
    pub fn new(backend: Arc<dyn SearchBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn ssn_trace(&self, input: &SsnTraceInput) -> Result<SsnTraceResult, SearchError> {
        self.bounded("SsnTrace", self.backend.ssn_trace(input)).await
    }

    pub async fn federal_criminal_search(
        &self,
        input: &FederalCriminalSearchInput,
    ) -> Result<FederalCriminalSearchResult, SearchError> {
        self.bounded(
            "FederalCriminalSearch",
            self.backend.federal_criminal_search(input),
        )
        .await
    }

    /// Queries every known address in order. One failing address fails the
    /// whole search; no addresses means no records.
    pub async fn state_criminal_search(
        &self,
        input: &StateCriminalSearchInput,
    ) -> Result<StateCriminalSearchResult, SearchError> {
        let mut crimes = Vec::new();
        for address in &input.known_addresses {
            let query = StateCriminalSearchQuery {
                full_name: input.full_name.clone(),
                address: address.clone(),
            };
            let result = self
                .bounded(
                    "StateCriminalSearch",
                    self.backend.state_criminal_search(&query),
                )
                .await?;
            crimes.extend(result.crimes);
        }
        Ok(StateCriminalSearchResult { crimes })
    }

    pub async fn motor_vehicle_incident_search(
        &self,
        input: &MotorVehicleIncidentSearchInput,
    ) -> Result<MotorVehicleIncidentSearchResult, SearchError> {
        self.bounded(
            "MotorVehicleIncidentSearch",
            self.backend.motor_vehicle_incident_search(input),
        )
        .await
    }

    async fn bounded<T, Fut>(&self, search: &'static str, call: Fut) -> Result<T, SearchError>
    where
        Fut: Future<Output = Result<T, SearchError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(result)) => {
                debug!(search, "search completed");
                Ok(result)
            }
            Ok(Err(err)) => {
                warn!(search, error = %err, "search failed");
                Err(err)
            }
            Err(_) => {
                warn!(search, timeout = ?self.timeout, "search timed out");
                Err(SearchError::Timeout {
                    search,
                    after: self.timeout,
                })
            }
        }
    }
}
