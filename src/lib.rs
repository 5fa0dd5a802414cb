pub mod actors;
pub mod config;
pub mod correlation;
pub mod poller;
pub mod util;

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata key carrying the customer account number of a scan report
pub const CUSTOMER_ACCOUNT_NUMBER_KEY: &str = "customer-account-number";

/// Metadata key carrying the customer name of a scan report
pub const CUSTOMER_NAME_KEY: &str = "customer-name";

/// Metadata key carrying the reference id of a scan report
pub const REFERENCE_ID_KEY: &str = "reference-id";

/// A service the remote poller checks during a scan pass.
///
/// Owned by the backend configuration; the coordinator only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolledService {
    pub service_id: u32,
    pub node_id: u32,
    pub node_label: Option<String>,
    pub address: IpAddr,
    pub service_name: String,

    /// Check parameters (url, port, path, method, expected_status, body_pattern, ...)
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Up,
    Down,
    Unknown,
}

impl StatusCode {
    pub fn name(&self) -> &'static str {
        match self {
            StatusCode::Up => "Up",
            StatusCode::Down => "Down",
            StatusCode::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of a single service check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollStatus {
    pub service_id: u32,
    pub status: StatusCode,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: Option<u64>,
}

impl PollStatus {
    pub fn up(service_id: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            service_id,
            status: StatusCode::Up,
            reason: None,
            timestamp,
            response_time_ms: None,
        }
    }

    pub fn down(service_id: u32, reason: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            service_id,
            status: StatusCode::Down,
            reason: Some(reason.into()),
            timestamp,
            response_time_ms: None,
        }
    }

    pub fn unknown(service_id: u32, reason: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            service_id,
            status: StatusCode::Unknown,
            reason: Some(reason.into()),
            timestamp,
            response_time_ms: None,
        }
    }

    pub fn with_response_time(mut self, response_time_ms: u64) -> Self {
        self.response_time_ms = Some(response_time_ms);
        self
    }
}

/// Aggregate of all poll results of one scan pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub customer_account_number: Option<String>,
    pub customer_name: Option<String>,
    pub reference_id: Option<String>,
    pub poll_statuses: Vec<PollStatus>,
}

impl ScanReport {
    /// Create an empty report carrying the customer/reference metadata
    pub fn from_metadata(metadata: &HashMap<String, String>) -> Self {
        Self {
            customer_account_number: metadata.get(CUSTOMER_ACCOUNT_NUMBER_KEY).cloned(),
            customer_name: metadata.get(CUSTOMER_NAME_KEY).cloned(),
            reference_id: metadata.get(REFERENCE_ID_KEY).cloned(),
            poll_statuses: vec![],
        }
    }

    pub fn add_poll_status(&mut self, status: PollStatus) {
        self.poll_statuses.push(status);
    }

    pub fn len(&self) -> usize {
        self.poll_statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poll_statuses.is_empty()
    }
}
