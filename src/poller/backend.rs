//! Poller backend collaborator
//!
//! The backend hands out monitoring system ids, receives the "poller
//! starting" announcement and serves the configuration a scan pass works on.
//!
//! ## HTTP endpoints used by [`HttpPollerBackend`]
//!
//! ```text
//! POST {base}/monitors                        {"location"}  -> {"monitoring_system_id"}
//! POST {base}/monitors/{id}/starting          details map
//! GET  {base}/monitors/{id}/configuration     -> {"services", "server_time"}
//! GET  {base}/monitors/{id}/name              -> {"name"}
//! GET  {base}/locators?context=remote_monitor -> [{"service_name", "monitor"}]
//! ```

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{instrument, trace};

use crate::PolledService;

/// Which kind of poller a locator set is requested for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionContext {
    RemoteMonitor,
}

impl DistributionContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionContext::RemoteMonitor => "remote_monitor",
        }
    }
}

/// Maps a service name to the monitor implementation that checks it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMonitorLocator {
    pub service_name: String,
    pub monitor: String,
}

/// Configuration served to a poller for one scan pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerConfiguration {
    /// Services in the order they must be checked
    pub services: Vec<PolledService>,

    /// Backend reference time at the moment the configuration was built
    pub server_time: DateTime<Utc>,
}

#[async_trait]
pub trait PollerBackend: Send + Sync {
    /// Create a location monitor entry and return its monitoring system id
    async fn register_location_monitor(&self, location: &str) -> Result<String>;

    /// Announce that the poller is available
    async fn poller_starting(
        &self,
        monitoring_system_id: &str,
        details: &HashMap<String, String>,
    ) -> Result<()>;

    async fn poller_configuration(&self, monitoring_system_id: &str) -> Result<PollerConfiguration>;

    async fn service_monitor_locators(
        &self,
        context: DistributionContext,
    ) -> Result<Vec<ServiceMonitorLocator>>;

    async fn monitor_name(&self, monitoring_system_id: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct RegistrationRequest<'a> {
    location: &'a str,
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    monitoring_system_id: String,
}

#[derive(Debug, Deserialize)]
struct MonitorNameResponse {
    name: String,
}

/// Backend reached over HTTP with JSON bodies
#[derive(Debug, Clone)]
pub struct HttpPollerBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPollerBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if !response.status().is_success() {
            anyhow::bail!("HTTP error: {}", response.status());
        }
        Ok(response)
    }
}

#[async_trait]
impl PollerBackend for HttpPollerBackend {
    #[instrument(skip(self))]
    async fn register_location_monitor(&self, location: &str) -> Result<String> {
        let response = self
            .client
            .post(self.url("/monitors"))
            .json(&RegistrationRequest { location })
            .send()
            .await
            .context("failed to send registration request")?;

        let registration: RegistrationResponse = Self::check(response)?
            .json()
            .await
            .context("failed to parse registration response")?;

        trace!("registered as {}", registration.monitoring_system_id);
        Ok(registration.monitoring_system_id)
    }

    #[instrument(skip(self, details))]
    async fn poller_starting(
        &self,
        monitoring_system_id: &str,
        details: &HashMap<String, String>,
    ) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/monitors/{monitoring_system_id}/starting")))
            .json(details)
            .send()
            .await
            .context("failed to send poller starting announcement")?;

        Self::check(response)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn poller_configuration(&self, monitoring_system_id: &str) -> Result<PollerConfiguration> {
        let response = self
            .client
            .get(self.url(&format!("/monitors/{monitoring_system_id}/configuration")))
            .send()
            .await
            .context("failed to request poller configuration")?;

        Self::check(response)?
            .json()
            .await
            .context("failed to parse poller configuration")
    }

    #[instrument(skip(self))]
    async fn service_monitor_locators(
        &self,
        context: DistributionContext,
    ) -> Result<Vec<ServiceMonitorLocator>> {
        let response = self
            .client
            .get(self.url("/locators"))
            .query(&[("context", context.as_str())])
            .send()
            .await
            .context("failed to request service monitor locators")?;

        Self::check(response)?
            .json()
            .await
            .context("failed to parse service monitor locators")
    }

    #[instrument(skip(self))]
    async fn monitor_name(&self, monitoring_system_id: &str) -> Result<String> {
        let response = self
            .client
            .get(self.url(&format!("/monitors/{monitoring_system_id}/name")))
            .send()
            .await
            .context("failed to request monitor name")?;

        let name: MonitorNameResponse = Self::check(response)?
            .json()
            .await
            .context("failed to parse monitor name")?;

        Ok(name.name)
    }
}
