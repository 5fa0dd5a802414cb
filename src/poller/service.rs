//! Service check execution
//!
//! [`PollService`] is the seam between the coordinator and whatever actually
//! talks to a device. [`HttpPollService`] checks HTTP and HTTPS services.
//!
//! ## Check parameters
//!
//! | key               | default                                   |
//! |-------------------|-------------------------------------------|
//! | `url`             | `{scheme}://{address}:{port}{path}`       |
//! | `port`            | 80 (HTTP) / 443 (HTTPS)                   |
//! | `path`            | `/`                                       |
//! | `method`          | `GET` (`GET`, `POST`, `HEAD`)             |
//! | `expected_status` | any 2xx (comma separated list otherwise)  |
//! | `body_pattern`    | none (regex the body must match)          |

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, instrument, trace, warn};

use super::backend::ServiceMonitorLocator;
use super::time::TimeAdjustment;
use crate::{PollStatus, PolledService};

#[async_trait]
pub trait PollService: Send + Sync {
    /// Replace the locator set that decides which services this executor claims
    fn set_service_monitor_locators(&self, locators: Vec<ServiceMonitorLocator>);

    /// Prepare the check for a service before it is polled
    async fn initialize(&self, service: &PolledService) -> Result<()>;

    /// Run the check; `None` means the service produced no result
    async fn poll(&self, service: &PolledService) -> Result<Option<PollStatus>>;
}

/// Monitor name in a locator that maps a service to [`HttpPollService`]
pub const HTTP_MONITOR: &str = "http";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Head,
}

impl HttpMethod {
    fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "HEAD" => Ok(HttpMethod::Head),
            other => anyhow::bail!("unsupported HTTP method '{other}'"),
        }
    }
}

/// A prepared HTTP check
#[derive(Debug, Clone)]
pub struct HttpCheck {
    pub url: String,
    pub method: HttpMethod,
    pub expected_status: Option<Vec<u16>>,
    pub body_pattern: Option<Regex>,
}

impl HttpCheck {
    pub fn from_service(service: &PolledService) -> Result<Self> {
        let params = &service.parameters;
        let https = service.service_name.eq_ignore_ascii_case("HTTPS");

        let url = match params.get("url") {
            Some(url) => url.clone(),
            None => {
                let port = match params.get("port") {
                    Some(port) => port
                        .parse::<u16>()
                        .with_context(|| format!("invalid port '{port}'"))?,
                    None if https => 443,
                    None => 80,
                };
                let path = params.get("path").map(String::as_str).unwrap_or("/");
                let scheme = if https { "https" } else { "http" };
                format!("{scheme}://{}{path}", SocketAddr::new(service.address, port))
            }
        };

        let method = params
            .get("method")
            .map(String::as_str)
            .map(HttpMethod::parse)
            .transpose()?
            .unwrap_or(HttpMethod::Get);

        let expected_status = params
            .get("expected_status")
            .map(|codes| {
                codes
                    .split(',')
                    .map(|code| {
                        code.trim()
                            .parse::<u16>()
                            .with_context(|| format!("invalid status code '{code}'"))
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?;

        let body_pattern = params
            .get("body_pattern")
            .map(|pattern| {
                Regex::new(pattern).with_context(|| format!("invalid body pattern '{pattern}'"))
            })
            .transpose()?;

        Ok(Self {
            url,
            method,
            expected_status,
            body_pattern,
        })
    }

    /// Returns the reason the response is considered down, if any
    ///
    /// Checks:
    /// 1. Status code matches expected codes (or is 2xx if not specified)
    /// 2. Body matches pattern (if configured)
    fn evaluate_response(&self, status_code: u16, body: &str) -> Option<String> {
        let status_ok = if let Some(ref expected) = self.expected_status {
            expected.contains(&status_code)
        } else {
            (200..300).contains(&status_code)
        };

        if !status_ok {
            return Some(format!("Unexpected status code: {status_code}"));
        }

        if let Some(ref pattern) = self.body_pattern
            && !pattern.is_match(body)
        {
            return Some(format!("Response body does not match '{pattern}'"));
        }

        None
    }
}

/// Checks HTTP/HTTPS services
pub struct HttpPollService {
    /// HTTP client (reused across checks)
    client: reqwest::Client,

    /// Clock aligned with the backend, used to stamp results
    time: Arc<dyn TimeAdjustment>,

    locators: Mutex<Vec<ServiceMonitorLocator>>,

    /// Prepared checks by service id
    checks: Mutex<HashMap<u32, HttpCheck>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl HttpPollService {
    pub fn new(time: Arc<dyn TimeAdjustment>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            time,
            locators: Mutex::new(vec![]),
            checks: Mutex::new(HashMap::new()),
        })
    }

    /// Whether this executor is responsible for the service
    ///
    /// A locator for the service name decides; services no locator mentions
    /// are claimed if they are called HTTP or HTTPS.
    pub fn claims(&self, service: &PolledService) -> bool {
        let locators = lock(&self.locators);
        match locators
            .iter()
            .find(|locator| locator.service_name == service.service_name)
        {
            Some(locator) => locator.monitor.eq_ignore_ascii_case(HTTP_MONITOR),
            None => {
                service.service_name.eq_ignore_ascii_case("HTTP")
                    || service.service_name.eq_ignore_ascii_case("HTTPS")
            }
        }
    }

    /// Execute the HTTP request
    ///
    /// Returns (status_code, body) on success
    async fn execute_request(&self, check: &HttpCheck) -> Result<(u16, String)> {
        let method = match check.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Head => reqwest::Method::HEAD,
        };

        let response = self
            .client
            .request(method, &check.url)
            .send()
            .await
            .context("HTTP request failed")?;

        let status_code = response.status().as_u16();

        // HEAD responses carry no body
        let body = if matches!(check.method, HttpMethod::Head) {
            String::new()
        } else {
            response
                .text()
                .await
                .context("Failed to read response body")?
        };

        Ok((status_code, body))
    }
}

#[async_trait]
impl PollService for HttpPollService {
    fn set_service_monitor_locators(&self, locators: Vec<ServiceMonitorLocator>) {
        trace!("received {} service monitor locators", locators.len());
        *lock(&self.locators) = locators;
    }

    #[instrument(skip(self, service), fields(service_id = service.service_id))]
    async fn initialize(&self, service: &PolledService) -> Result<()> {
        if !self.claims(service) {
            debug!("no HTTP monitor for service {}", service.service_name);
            lock(&self.checks).remove(&service.service_id);
            return Ok(());
        }

        let check = HttpCheck::from_service(service)
            .with_context(|| format!("invalid parameters for service {}", service.service_id))?;

        trace!("prepared check for {}", check.url);
        lock(&self.checks).insert(service.service_id, check);
        Ok(())
    }

    #[instrument(skip(self, service), fields(service_id = service.service_id))]
    async fn poll(&self, service: &PolledService) -> Result<Option<PollStatus>> {
        let check = lock(&self.checks).get(&service.service_id).cloned();
        let Some(check) = check else {
            if !self.claims(service) {
                return Ok(None);
            }
            // ours, but initialize never prepared a check for it
            return Ok(Some(PollStatus::unknown(
                service.service_id,
                "Service check was not initialized",
                self.time.now(),
            )));
        };

        let start = Instant::now();
        let result = self.execute_request(&check).await;
        let response_time_ms = start.elapsed().as_millis() as u64;
        let timestamp = self.time.now();

        let status = match result {
            Ok((status_code, body)) => match check.evaluate_response(status_code, &body) {
                None => PollStatus::up(service.service_id, timestamp),
                Some(reason) => PollStatus::down(service.service_id, reason, timestamp),
            },
            Err(e) => {
                warn!("service check failed: {:#}", e);
                return Ok(Some(PollStatus::down(
                    service.service_id,
                    format!("{e:#}"),
                    timestamp,
                )));
            }
        };

        Ok(Some(status.with_response_time(response_time_ms)))
    }
}
