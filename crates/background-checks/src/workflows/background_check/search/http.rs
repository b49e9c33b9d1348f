use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{SearchBackend, SearchError};
use crate::workflows::background_check::domain::{
    FederalCriminalSearchInput, FederalCriminalSearchResult, MotorVehicleIncidentSearchInput,
    MotorVehicleIncidentSearchResult, StateCriminalSearchQuery, StateCriminalSearchResult,
    SsnTraceInput, SsnTraceResult,
};

/// Record providers reached over HTTP: one JSON POST per search.
#[derive(Debug, Clone)]
pub struct HttpSearchBackend {
    client: Client,
    base_url: String,
}

impl HttpSearchBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| SearchError::Unavailable {
                search: "HttpSearchBackend",
                message: err.to_string(),
            })?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<I, O>(&self, search: &'static str, path: &str, input: &I) -> Result<O, SearchError>
    where
        I: Serialize + Sync,
        O: DeserializeOwned,
    {
        let url = format!("{}/{path}", self.base_url);
        debug!(search, %url, "calling record provider");

        let response = self
            .client
            .post(&url)
            .json(input)
            .send()
            .await
            .map_err(|err| transport_error(search, err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Status {
                search,
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        response.json::<O>().await.map_err(|err| {
            if err.is_timeout() {
                transport_error(search, err)
            } else {
                SearchError::Decode {
                    search,
                    message: err.to_string(),
                }
            }
        })
    }
}

fn transport_error(search: &'static str, err: reqwest::Error) -> SearchError {
    SearchError::Transport {
        search,
        message: if err.is_timeout() {
            "request timed out".to_string()
        } else {
            err.to_string()
        },
    }
}

#[async_trait]
impl SearchBackend for HttpSearchBackend {
    async fn ssn_trace(&self, input: &SsnTraceInput) -> Result<SsnTraceResult, SearchError> {
        self.post("SsnTrace", "ssntrace", input).await
    }

    async fn federal_criminal_search(
        &self,
        input: &FederalCriminalSearchInput,
    ) -> Result<FederalCriminalSearchResult, SearchError> {
        self.post("FederalCriminalSearch", "federalcriminalsearch", input)
            .await
    }

    async fn state_criminal_search(
        &self,
        query: &StateCriminalSearchQuery,
    ) -> Result<StateCriminalSearchResult, SearchError> {
        self.post("StateCriminalSearch", "statecriminalsearch", query)
            .await
    }

    async fn motor_vehicle_incident_search(
        &self,
        input: &MotorVehicleIncidentSearchInput,
    ) -> Result<MotorVehicleIncidentSearchResult, SearchError> {
        self.post("MotorVehicleIncidentSearch", "motorvehiclesearch", input)
            .await
    }
}
