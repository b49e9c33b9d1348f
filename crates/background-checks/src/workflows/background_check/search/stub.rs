use async_trait::async_trait;

use super::{SearchBackend, SearchError};
use crate::workflows::background_check::domain::{
    FederalCriminalSearchInput, FederalCriminalSearchResult, MotorVehicleIncidentSearchInput,
    MotorVehicleIncidentSearchResult, StateCriminalSearchQuery, StateCriminalSearchResult,
    SsnTraceInput, SsnTraceResult,
};

const CANNED_ADDRESS: &str = "1 Chestnut Avenue, Springfield";
const CANNED_LICENSE_STATE: &str = "CA";

/// In-process stand-in for the record providers, used when no third-party
/// endpoint is configured.
#[derive(Debug, Clone)]
pub struct StubSearchBackend {
    known_address: String,
}

impl Default for StubSearchBackend {
    fn default() -> Self {
        Self {
            known_address: CANNED_ADDRESS.to_string(),
        }
    }
}

impl StubSearchBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_known_address(address: impl Into<String>) -> Self {
        Self {
            known_address: address.into(),
        }
    }
}

/// `AAA-GG-SSSS` digits, excluding the ranges never issued.
pub(crate) fn ssn_is_valid(ssn: &str) -> bool {
    let parts: Vec<&str> = ssn.trim().split('-').collect();
    let [area, group, serial] = parts.as_slice() else {
        return false;
    };
    if !all_digits(area, 3) || !all_digits(group, 2) || !all_digits(serial, 4) {
        return false;
    }
    !(*area == "000"
        || *area == "666"
        || area.starts_with('9')
        || *group == "00"
        || *serial == "0000")
}

fn all_digits(part: &str, len: usize) -> bool {
    part.len() == len && part.bytes().all(|byte| byte.is_ascii_digit())
}

#[async_trait]
impl SearchBackend for StubSearchBackend {
    async fn ssn_trace(&self, input: &SsnTraceInput) -> Result<SsnTraceResult, SearchError> {
        if !ssn_is_valid(&input.ssn) {
            return Ok(SsnTraceResult::default());
        }
        Ok(SsnTraceResult {
            ssn_is_valid: true,
            known_addresses: vec![self.known_address.clone()],
        })
    }

    async fn federal_criminal_search(
        &self,
        _input: &FederalCriminalSearchInput,
    ) -> Result<FederalCriminalSearchResult, SearchError> {
        Ok(FederalCriminalSearchResult::default())
    }

    async fn state_criminal_search(
        &self,
        _query: &StateCriminalSearchQuery,
    ) -> Result<StateCriminalSearchResult, SearchError> {
        Ok(StateCriminalSearchResult::default())
    }

    async fn motor_vehicle_incident_search(
        &self,
        _input: &MotorVehicleIncidentSearchInput,
    ) -> Result<MotorVehicleIncidentSearchResult, SearchError> {
        Ok(MotorVehicleIncidentSearchResult {
            current_license_state: CANNED_LICENSE_STATE.to_string(),
            license_valid: true,
            motor_vehicle_incidents: Vec::new(),
        })
    }
}
