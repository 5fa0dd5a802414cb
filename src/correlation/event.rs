//! Inbound signals and outbound correlated events
//!
//! Both directions use the same tuple shape: event kind (UEI), node,
//! interface address, service name, location monitor and timestamp.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const NODE_LOST_SERVICE_UEI: &str = "uei.opennms.org/remote/nodes/nodeLostService";
pub const NODE_REGAINED_SERVICE_UEI: &str = "uei.opennms.org/remote/nodes/nodeRegainedService";

pub const WIDE_SPREAD_OUTAGE_UEI: &str =
    "uei.opennms.org/correlation/locationMonitors/wideSpreadOutage";
pub const WIDE_SPREAD_OUTAGE_RESOLVED_UEI: &str =
    "uei.opennms.org/correlation/locationMonitors/wideSpreadOutageResolved";
pub const SERVICE_FLAPPING_UEI: &str =
    "uei.opennms.org/correlation/locationMonitors/serviceFlapping";

/// Serialized as `lost`/`regained`; deserialization also accepts the UEIs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum SignalKind {
    Lost,
    Regained,
}

impl SignalKind {
    pub fn uei(&self) -> &'static str {
        match self {
            SignalKind::Lost => NODE_LOST_SERVICE_UEI,
            SignalKind::Regained => NODE_REGAINED_SERVICE_UEI,
        }
    }

    pub fn from_uei(uei: &str) -> Option<Self> {
        match uei {
            NODE_LOST_SERVICE_UEI => Some(SignalKind::Lost),
            NODE_REGAINED_SERVICE_UEI => Some(SignalKind::Regained),
            _ => None,
        }
    }
}

impl TryFrom<String> for SignalKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "lost" => Ok(SignalKind::Lost),
            "regained" => Ok(SignalKind::Regained),
            uei => SignalKind::from_uei(uei).ok_or_else(|| format!("unknown signal kind '{uei}'")),
        }
    }
}

/// A monitored service on one interface of one node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceId {
    pub node_id: u32,
    pub address: IpAddr,
    pub service_name: String,
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.node_id, self.address, self.service_name)
    }
}

/// Raw lost/regained report from one location monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(alias = "uei")]
    pub kind: SignalKind,
    pub node_id: u32,
    pub address: IpAddr,
    pub service_name: String,
    pub location_monitor_id: u32,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn lost(
        node_id: u32,
        address: IpAddr,
        service_name: impl Into<String>,
        location_monitor_id: u32,
    ) -> Self {
        Self {
            kind: SignalKind::Lost,
            node_id,
            address,
            service_name: service_name.into(),
            location_monitor_id,
            timestamp: Utc::now(),
        }
    }

    pub fn regained(
        node_id: u32,
        address: IpAddr,
        service_name: impl Into<String>,
        location_monitor_id: u32,
    ) -> Self {
        Self {
            kind: SignalKind::Regained,
            ..Self::lost(node_id, address, service_name, location_monitor_id)
        }
    }

    pub fn service_id(&self) -> ServiceId {
        ServiceId {
            node_id: self.node_id,
            address: self.address,
            service_name: self.service_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelatedEventKind {
    WideSpreadOutage,
    WideSpreadOutageResolved,
    ServiceFlapping,
}

impl CorrelatedEventKind {
    pub fn uei(&self) -> &'static str {
        match self {
            CorrelatedEventKind::WideSpreadOutage => WIDE_SPREAD_OUTAGE_UEI,
            CorrelatedEventKind::WideSpreadOutageResolved => WIDE_SPREAD_OUTAGE_RESOLVED_UEI,
            CorrelatedEventKind::ServiceFlapping => SERVICE_FLAPPING_UEI,
        }
    }
}

/// Event emitted by the correlation engine
///
/// Wide-spread events concern the service as a whole and carry no location
/// monitor; flapping events name the monitor that flaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelatedEvent {
    pub kind: CorrelatedEventKind,
    pub uei: String,
    pub node_id: u32,
    pub address: IpAddr,
    pub service_name: String,
    pub location_monitor_id: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

impl CorrelatedEvent {
    pub fn new(
        kind: CorrelatedEventKind,
        service: &ServiceId,
        location_monitor_id: Option<u32>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            uei: kind.uei().to_string(),
            node_id: service.node_id,
            address: service.address,
            service_name: service.service_name.clone(),
            location_monitor_id,
            timestamp,
        }
    }

    pub fn service_id(&self) -> ServiceId {
        ServiceId {
            node_id: self.node_id,
            address: self.address,
            service_name: self.service_name.clone(),
        }
    }
}
