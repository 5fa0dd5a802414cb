//! Helper functions and test doubles for integration tests

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outpost::{
    PollStatus, PolledService,
    correlation::event::Signal,
    poller::{
        PollerCoordinator,
        backend::{DistributionContext, PollerBackend, PollerConfiguration, ServiceMonitorLocator},
        events::PropertyChange,
        service::PollService,
        settings::{MemoryPollerSettings, PollerSettings},
        time::{OffsetTimeAdjustment, TimeAdjustment},
    },
};

pub fn create_test_service(service_id: u32, service_name: &str) -> PolledService {
    PolledService {
        service_id,
        node_id: 1,
        node_label: Some("node1".to_string()),
        address: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
        service_name: service_name.to_string(),
        parameters: HashMap::new(),
    }
}

pub fn create_test_services(count: u32) -> Vec<PolledService> {
    (1..=count)
        .map(|id| create_test_service(id, "HTTP"))
        .collect()
}

pub fn lost(monitor: u32) -> Signal {
    Signal::lost(1, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)), "HTTP", monitor)
}

pub fn regained(monitor: u32) -> Signal {
    Signal::regained(1, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)), "HTTP", monitor)
}

/// Backend double with scripted answers and a call log
pub struct MockBackend {
    pub monitoring_system_id: String,
    pub services: Vec<PolledService>,
    pub server_time: DateTime<Utc>,
    pub fail_registration: bool,
    pub fail_starting: bool,
    pub fail_configuration: bool,
    pub registration_delay: Duration,
    calls: Mutex<Vec<String>>,
    details: Mutex<Option<HashMap<String, String>>>,
}

impl MockBackend {
    pub fn new(services: Vec<PolledService>) -> Self {
        Self {
            monitoring_system_id: "42".to_string(),
            services,
            server_time: Utc::now(),
            fail_registration: false,
            fail_starting: false,
            fail_configuration: false,
            registration_delay: Duration::ZERO,
            calls: Mutex::new(vec![]),
            details: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    pub fn starting_details(&self) -> Option<HashMap<String, String>> {
        self.details.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl PollerBackend for MockBackend {
    async fn register_location_monitor(&self, location: &str) -> Result<String> {
        self.record(format!("register:{location}"));
        if !self.registration_delay.is_zero() {
            tokio::time::sleep(self.registration_delay).await;
        }
        if self.fail_registration {
            return Err(anyhow!("location {location} rejected"));
        }
        Ok(self.monitoring_system_id.clone())
    }

    async fn poller_starting(
        &self,
        monitoring_system_id: &str,
        details: &HashMap<String, String>,
    ) -> Result<()> {
        self.record(format!("starting:{monitoring_system_id}"));
        *self.details.lock().unwrap() = Some(details.clone());
        if self.fail_starting {
            return Err(anyhow!("backend unavailable"));
        }
        Ok(())
    }

    async fn poller_configuration(&self, monitoring_system_id: &str) -> Result<PollerConfiguration> {
        self.record(format!("configuration:{monitoring_system_id}"));
        if self.fail_configuration {
            return Err(anyhow!("configuration unavailable"));
        }
        Ok(PollerConfiguration {
            services: self.services.clone(),
            server_time: self.server_time,
        })
    }

    async fn service_monitor_locators(
        &self,
        context: DistributionContext,
    ) -> Result<Vec<ServiceMonitorLocator>> {
        self.record(format!("locators:{}", context.as_str()));
        Ok(vec![ServiceMonitorLocator {
            service_name: "HTTP".to_string(),
            monitor: "http".to_string(),
        }])
    }

    async fn monitor_name(&self, monitoring_system_id: &str) -> Result<String> {
        self.record(format!("name:{monitoring_system_id}"));
        Ok(format!("monitor-{monitoring_system_id}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Up,
    Down,
    Null,
    Fail,
    InitFail,
}

/// Poll service double answering per service id (default: up)
#[derive(Default)]
pub struct ScriptedPollService {
    outcomes: HashMap<u32, Outcome>,
    polled: Mutex<Vec<u32>>,
    locators: Mutex<Vec<ServiceMonitorLocator>>,
}

impl ScriptedPollService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, service_id: u32, outcome: Outcome) -> Self {
        self.outcomes.insert(service_id, outcome);
        self
    }

    pub fn polled(&self) -> Vec<u32> {
        self.polled.lock().unwrap().clone()
    }

    pub fn locators(&self) -> Vec<ServiceMonitorLocator> {
        self.locators.lock().unwrap().clone()
    }

    fn outcome(&self, service_id: u32) -> Outcome {
        self.outcomes
            .get(&service_id)
            .copied()
            .unwrap_or(Outcome::Up)
    }
}

#[async_trait]
impl PollService for ScriptedPollService {
    fn set_service_monitor_locators(&self, locators: Vec<ServiceMonitorLocator>) {
        *self.locators.lock().unwrap() = locators;
    }

    async fn initialize(&self, service: &PolledService) -> Result<()> {
        match self.outcome(service.service_id) {
            Outcome::InitFail => Err(anyhow!("cannot initialize {}", service.service_id)),
            _ => Ok(()),
        }
    }

    async fn poll(&self, service: &PolledService) -> Result<Option<PollStatus>> {
        self.polled.lock().unwrap().push(service.service_id);
        let now = Utc::now();
        match self.outcome(service.service_id) {
            Outcome::Up | Outcome::InitFail => Ok(Some(PollStatus::up(service.service_id, now))),
            Outcome::Down => Ok(Some(PollStatus::down(
                service.service_id,
                "connection refused",
                now,
            ))),
            Outcome::Null => Ok(None),
            Outcome::Fail => Err(anyhow!("check for {} crashed", service.service_id)),
        }
    }
}

/// Settings whose read blocks the calling thread until `progressed` flips
/// (or half a second passes), standing in for slow storage
pub struct BlockingSettings {
    progressed: Arc<AtomicBool>,
    saw_progress: AtomicBool,
}

impl BlockingSettings {
    pub fn new(progressed: Arc<AtomicBool>) -> Self {
        Self {
            progressed,
            saw_progress: AtomicBool::new(false),
        }
    }

    pub fn saw_progress(&self) -> bool {
        self.saw_progress.load(Ordering::SeqCst)
    }
}

impl PollerSettings for BlockingSettings {
    fn monitoring_system_id(&self) -> Result<Option<String>> {
        for _ in 0..50 {
            if self.progressed.load(Ordering::SeqCst) {
                self.saw_progress.store(true, Ordering::SeqCst);
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        Ok(Some("42".to_string()))
    }

    fn set_monitoring_system_id(&self, _monitoring_system_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Everything a coordinator test needs to inspect afterwards
pub struct Fixture {
    pub coordinator: Arc<PollerCoordinator>,
    pub backend: Arc<MockBackend>,
    pub poll_service: Arc<ScriptedPollService>,
    pub settings: Arc<MemoryPollerSettings>,
    pub time_adjustment: Arc<OffsetTimeAdjustment>,
    pub changes: Arc<Mutex<Vec<PropertyChange>>>,
}

impl Fixture {
    pub fn new(
        backend: MockBackend,
        poll_service: ScriptedPollService,
        settings: MemoryPollerSettings,
    ) -> Self {
        let backend = Arc::new(backend);
        let poll_service = Arc::new(poll_service);
        let settings = Arc::new(settings);
        let time_adjustment = Arc::new(OffsetTimeAdjustment::new());

        let coordinator = PollerCoordinator::builder()
            .backend(backend.clone())
            .poll_service(poll_service.clone())
            .settings(settings.clone())
            .time_adjustment(time_adjustment.clone())
            .metadata(HashMap::from([
                ("customer-account-number".to_string(), "4711".to_string()),
                ("customer-name".to_string(), "ACME".to_string()),
                ("reference-id".to_string(), "ref-1".to_string()),
            ]))
            .build();

        let changes = Arc::new(Mutex::new(vec![]));
        let recorded = changes.clone();
        coordinator.add_property_change_listener(move |change: &PropertyChange| {
            recorded.lock().unwrap().push(change.clone());
        });

        Self {
            coordinator: Arc::new(coordinator),
            backend,
            poll_service,
            settings,
            time_adjustment,
            changes,
        }
    }

    /// Poller that already has identity "42"
    pub fn registered(backend: MockBackend, poll_service: ScriptedPollService) -> Self {
        Self::new(
            backend,
            poll_service,
            MemoryPollerSettings::with_monitoring_system_id("42"),
        )
    }

    /// Poller without identity
    pub fn unregistered(backend: MockBackend, poll_service: ScriptedPollService) -> Self {
        Self::new(backend, poll_service, MemoryPollerSettings::new())
    }

    pub fn changes(&self) -> Vec<PropertyChange> {
        self.changes.lock().unwrap().clone()
    }

    pub fn progress(&self) -> Vec<f64> {
        self.changes()
            .into_iter()
            .filter_map(|change| match change {
                PropertyChange::PercentageComplete(progress) => Some(progress),
                _ => None,
            })
            .collect()
    }

    pub fn reports(&self) -> Vec<outpost::ScanReport> {
        self.changes()
            .into_iter()
            .filter_map(|change| match change {
                PropertyChange::ExitNecessary(report) => Some(report),
                _ => None,
            })
            .collect()
    }

    pub fn monitoring_system_id(&self) -> Option<String> {
        self.settings.monitoring_system_id().unwrap()
    }

    pub fn clock_offset(&self) -> chrono::TimeDelta {
        self.time_adjustment.offset()
    }

    pub fn adjusted_now(&self) -> DateTime<Utc> {
        self.time_adjustment.now()
    }
}
