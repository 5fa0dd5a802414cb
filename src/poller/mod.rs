//! Remote poller coordination
//!
//! The [`PollerCoordinator`] drives a remote poller through its lifecycle:
//! it registers with the backend (unless an identity is already persisted),
//! announces itself, runs a single scan pass over all configured services
//! and hands the resulting [`ScanReport`] to its listeners.
//!
//! ## Scan pass
//!
//! ```text
//! progress 0.0 → fetch locators + configuration → apply server time
//!   → for each service: initialize → poll → append / skip → progress (i+1)/n
//!   → progress 1.0 → exitNecessary(report)
//! ```
//!
//! A failing check aborts the rest of the pass and ends the coordinator in
//! `FatalExceptionOccurred`; the partial report is still handed off.
//!
//! State transitions and scan passes never overlap: every entry point holds
//! the transition guard for its whole duration.

pub mod backend;
pub mod error;
pub mod events;
pub mod service;
pub mod settings;
pub mod state;
pub mod time;

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sysinfo::System;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::{PolledService, ScanReport};

use self::backend::{DistributionContext, PollerBackend, PollerConfiguration};
use self::error::{CoordinatorError, CoordinatorResult};
use self::events::{ListenerId, Listeners, PropertyChange, PropertyChangeListener};
use self::service::PollService;
use self::settings::PollerSettings;
use self::state::{CoordinatorState, Operation};
use self::time::TimeAdjustment;

/// Details key for the poller's primary address
pub const HOST_ADDRESS_KEY: &str = "host.address";

/// Details key for the poller's host name
pub const HOST_NAME_KEY: &str = "host.name";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Collaborators resolved for one coordinator operation
struct Collaborators {
    backend: Arc<dyn PollerBackend>,
    poll_service: Arc<dyn PollService>,
    settings: Arc<dyn PollerSettings>,
    time_adjustment: Arc<dyn TimeAdjustment>,
}

fn require<T: ?Sized>(dependency: &Option<Arc<T>>, name: &str) -> CoordinatorResult<Arc<T>> {
    dependency.clone().ok_or_else(|| {
        CoordinatorError::Configuration(format!("{name} must be set for a poller coordinator"))
    })
}

// Settings may hit the filesystem, so they run on the blocking pool
async fn load_monitoring_system_id(
    settings: &Arc<dyn PollerSettings>,
) -> CoordinatorResult<Option<String>> {
    let settings = settings.clone();
    tokio::task::spawn_blocking(move || settings.monitoring_system_id())
        .await
        .map_err(|e| CoordinatorError::Configuration(format!("settings task failed: {e}")))?
        .map_err(|e| {
            CoordinatorError::Configuration(format!("unable to read monitoring system id: {e:#}"))
        })
}

async fn store_monitoring_system_id(
    settings: &Arc<dyn PollerSettings>,
    monitoring_system_id: &str,
) -> anyhow::Result<()> {
    let settings = settings.clone();
    let monitoring_system_id = monitoring_system_id.to_string();
    tokio::task::spawn_blocking(move || settings.set_monitoring_system_id(&monitoring_system_id))
        .await?
}

#[derive(Default)]
pub struct PollerCoordinatorBuilder {
    backend: Option<Arc<dyn PollerBackend>>,
    poll_service: Option<Arc<dyn PollService>>,
    settings: Option<Arc<dyn PollerSettings>>,
    time_adjustment: Option<Arc<dyn TimeAdjustment>>,
    metadata: HashMap<String, String>,
}

impl PollerCoordinatorBuilder {
    pub fn backend(mut self, backend: Arc<dyn PollerBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn poll_service(mut self, poll_service: Arc<dyn PollService>) -> Self {
        self.poll_service = Some(poll_service);
        self
    }

    pub fn settings(mut self, settings: Arc<dyn PollerSettings>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn time_adjustment(mut self, time_adjustment: Arc<dyn TimeAdjustment>) -> Self {
        self.time_adjustment = Some(time_adjustment);
        self
    }

    /// Customer/reference metadata copied into every scan report
    pub fn metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Missing collaborators are reported by [`PollerCoordinator::initialize`]
    pub fn build(self) -> PollerCoordinator {
        PollerCoordinator {
            backend: self.backend,
            poll_service: self.poll_service,
            settings: self.settings,
            time_adjustment: self.time_adjustment,
            metadata: self.metadata,
            state: Mutex::new(CoordinatorState::Initial),
            configuration: Mutex::new(None),
            listeners: Mutex::new(Listeners::default()),
            transition: tokio::sync::Mutex::new(()),
        }
    }
}

/// Client-side lifecycle of a remote poller
pub struct PollerCoordinator {
    backend: Option<Arc<dyn PollerBackend>>,
    poll_service: Option<Arc<dyn PollService>>,
    settings: Option<Arc<dyn PollerSettings>>,
    time_adjustment: Option<Arc<dyn TimeAdjustment>>,
    metadata: HashMap<String, String>,

    /// Current state, only held for short reads and swaps
    state: Mutex<CoordinatorState>,

    /// Configuration fetched by the last scan pass
    configuration: Mutex<Option<PollerConfiguration>>,

    listeners: Mutex<Listeners>,

    /// Serializes transitions and scan passes
    transition: tokio::sync::Mutex<()>,
}

impl PollerCoordinator {
    pub fn builder() -> PollerCoordinatorBuilder {
        PollerCoordinatorBuilder::default()
    }

    /// Startup entry point
    ///
    /// Moves to `Registering` if no monitoring system id is persisted, otherwise
    /// announces the poller, moves to `Running` and runs a scan pass. A failure
    /// ends in `FatalExceptionOccurred` and is also returned, so that process
    /// startup fails loudly.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> CoordinatorResult<()> {
        let _guard = self.transition.lock().await;
        self.ensure_supported(Operation::Initialize)?;

        match self.try_initialize().await {
            Ok(()) => Ok(()),
            Err(err) => {
                error!("initialization failed: {err}");
                self.set_state(CoordinatorState::FatalExceptionOccurred(err.clone()));
                Err(err)
            }
        }
    }

    async fn try_initialize(&self) -> CoordinatorResult<()> {
        let collaborators = self.collaborators()?;

        let monitoring_system_id = load_monitoring_system_id(&collaborators.settings).await?;

        match monitoring_system_id {
            None => {
                debug!("no monitoring system id persisted, waiting for registration");
                self.set_state(CoordinatorState::Registering);
            }
            Some(monitoring_system_id) => {
                self.start(&collaborators, &monitoring_system_id).await?;
            }
        }

        Ok(())
    }

    /// Register this poller at `location`
    ///
    /// Only valid while `Registering`. A failed registration ends in
    /// `FatalExceptionOccurred` and is logged, not returned; the only error
    /// returned is calling this in the wrong state.
    #[instrument(skip(self))]
    pub async fn register(&self, location: &str) -> CoordinatorResult<()> {
        let _guard = self.transition.lock().await;
        self.ensure_supported(Operation::Register)?;

        if let Err(err) = self.try_register(location).await {
            warn!("unable to register: {err}");
            self.set_state(CoordinatorState::FatalExceptionOccurred(err));
        }

        Ok(())
    }

    async fn try_register(&self, location: &str) -> CoordinatorResult<()> {
        let collaborators = self.collaborators()?;

        let monitoring_system_id = collaborators
            .backend
            .register_location_monitor(location)
            .await
            .map_err(CoordinatorError::registration)?;

        info!("registered at {location} as {monitoring_system_id}");

        if let Err(e) =
            store_monitoring_system_id(&collaborators.settings, &monitoring_system_id).await
        {
            // starting anyway; the next start registers again
            warn!("unable to persist monitoring system id: {e:#}");
        }

        self.start(&collaborators, &monitoring_system_id).await
    }

    /// Announce the poller, move to `Running` and run the scan pass
    async fn start(
        &self,
        collaborators: &Collaborators,
        monitoring_system_id: &str,
    ) -> CoordinatorResult<()> {
        collaborators
            .backend
            .poller_starting(monitoring_system_id, &poller_details())
            .await
            .map_err(CoordinatorError::backend)?;

        self.set_state(CoordinatorState::Running);
        self.perform_service_scans(collaborators, monitoring_system_id)
            .await;
        Ok(())
    }

    /// Scheduled polling is not used; the scan pass already ran on entering `Running`
    pub fn poll_service(&self, polled_service_id: u32) -> CoordinatorResult<()> {
        self.ensure_supported(Operation::PollService)?;
        trace!("ignoring poll request for service {polled_service_id}");
        Ok(())
    }

    pub fn state(&self) -> CoordinatorState {
        lock(&self.state).clone()
    }

    pub fn is_registered(&self) -> bool {
        lock(&self.state).is_registered()
    }

    pub fn is_started(&self) -> bool {
        lock(&self.state).is_started()
    }

    /// The error that ended the coordinator, if it has ended
    pub fn fatal_error(&self) -> Option<CoordinatorError> {
        lock(&self.state).fatal_error().cloned()
    }

    pub async fn monitoring_system_id(&self) -> CoordinatorResult<Option<String>> {
        let settings = require(&self.settings, "poller settings")?;
        load_monitoring_system_id(&settings).await
    }

    /// Display name the backend knows this poller by; empty while unregistered
    pub async fn monitor_name(&self) -> CoordinatorResult<String> {
        if !self.is_registered() {
            return Ok(String::new());
        }

        let backend = require(&self.backend, "poller backend")?;
        let Some(monitoring_system_id) = self.monitoring_system_id().await? else {
            return Ok(String::new());
        };

        backend
            .monitor_name(&monitoring_system_id)
            .await
            .map_err(CoordinatorError::backend)
    }

    /// Services of the last fetched configuration
    pub fn polled_services(&self) -> Vec<PolledService> {
        lock(&self.configuration)
            .as_ref()
            .map(|configuration| configuration.services.clone())
            .unwrap_or_default()
    }

    pub fn add_property_change_listener(
        &self,
        listener: impl PropertyChangeListener + 'static,
    ) -> ListenerId {
        lock(&self.listeners).add(Arc::new(listener))
    }

    pub fn remove_property_change_listener(&self, id: ListenerId) -> bool {
        lock(&self.listeners).remove(id)
    }

    fn collaborators(&self) -> CoordinatorResult<Collaborators> {
        Ok(Collaborators {
            backend: require(&self.backend, "poller backend")?,
            poll_service: require(&self.poll_service, "poll service")?,
            settings: require(&self.settings, "poller settings")?,
            time_adjustment: require(&self.time_adjustment, "time adjustment")?,
        })
    }

    fn ensure_supported(&self, operation: Operation) -> CoordinatorResult<()> {
        let state = lock(&self.state);
        if state.supports(operation) {
            Ok(())
        } else {
            Err(CoordinatorError::IllegalState {
                operation: operation.name(),
                state: state.name(),
            })
        }
    }

    fn set_state(&self, new_state: CoordinatorState) {
        let (old, new) = {
            let mut state = lock(&self.state);
            if state.is_terminal() {
                warn!(
                    "ignoring transition to {} after a fatal error",
                    new_state.name()
                );
                return;
            }

            debug!("state transition {} -> {}", state.name(), new_state.name());
            let old = std::mem::replace(&mut *state, new_state);
            (
                (old.is_started(), old.is_registered()),
                (state.is_started(), state.is_registered()),
            )
        };

        if old.0 != new.0 {
            self.fire(&PropertyChange::Started {
                old: old.0,
                new: new.0,
            });
        }
        if old.1 != new.1 {
            self.fire(&PropertyChange::Registered {
                old: old.1,
                new: new.1,
            });
        }
    }

    /// Notify listeners in registration order, outside of the listener lock
    fn fire(&self, change: &PropertyChange) {
        let listeners = lock(&self.listeners).snapshot();
        for listener in listeners {
            listener.property_change(change);
        }
    }

    async fn perform_service_scans(&self, collaborators: &Collaborators, monitoring_system_id: &str) {
        self.fire(&PropertyChange::PercentageComplete(0.0));

        let mut report = ScanReport::from_metadata(&self.metadata);

        if let Err(err) = self
            .scan(collaborators, monitoring_system_id, &mut report)
            .await
        {
            error!("error while performing scan: {err}");
            self.set_state(CoordinatorState::FatalExceptionOccurred(err));
        }

        self.fire(&PropertyChange::PercentageComplete(1.0));

        match serde_json::to_string(&report) {
            Ok(json) => debug!("returning scan report: {json}"),
            Err(e) => debug!("returning scan report (not serializable: {e})"),
        }

        self.fire(&PropertyChange::ExitNecessary(report));
    }

    async fn scan(
        &self,
        collaborators: &Collaborators,
        monitoring_system_id: &str,
        report: &mut ScanReport,
    ) -> CoordinatorResult<()> {
        let locators = collaborators
            .backend
            .service_monitor_locators(DistributionContext::RemoteMonitor)
            .await
            .map_err(CoordinatorError::backend)?;
        collaborators
            .poll_service
            .set_service_monitor_locators(locators);

        let configuration = self
            .retrieve_latest_configuration(collaborators, monitoring_system_id)
            .await?;

        let total = configuration.services.len();
        for (index, service) in configuration.services.iter().enumerate() {
            collaborators
                .poll_service
                .initialize(service)
                .await
                .map_err(|e| CoordinatorError::check_execution(service.service_id, e))?;

            match collaborators.poll_service.poll(service).await {
                Ok(Some(status)) => {
                    info!(
                        "service {}: statusName={} reason={}",
                        service.service_id,
                        status.status.name(),
                        status.reason.as_deref().unwrap_or("")
                    );
                    report.add_poll_status(status);
                }
                Ok(None) => warn!("null poll result for service {}", service.service_id),
                Err(e) => {
                    error!(
                        "unexpected error while polling service {}: {e:#}",
                        service.service_id
                    );
                    return Err(CoordinatorError::check_execution(service.service_id, e));
                }
            }

            self.fire(&PropertyChange::PercentageComplete(
                (index + 1) as f64 / total as f64,
            ));
        }

        Ok(())
    }

    async fn retrieve_latest_configuration(
        &self,
        collaborators: &Collaborators,
        monitoring_system_id: &str,
    ) -> CoordinatorResult<PollerConfiguration> {
        let configuration = collaborators
            .backend
            .poller_configuration(monitoring_system_id)
            .await
            .map_err(CoordinatorError::backend)?;

        // align the clock before any check stamps a result
        collaborators
            .time_adjustment
            .set_master_time(configuration.server_time);

        *lock(&self.configuration) = Some(configuration.clone());
        Ok(configuration)
    }
}

/// System details relayed to the backend when the poller starts
pub fn poller_details() -> HashMap<String, String> {
    let mut details = HashMap::new();

    if let Some(name) = System::name() {
        details.insert("os.name".to_string(), name);
    }
    if let Some(version) = System::os_version() {
        details.insert("os.version".to_string(), version);
    }
    details.insert("os.arch".to_string(), System::cpu_arch());

    details.insert(HOST_ADDRESS_KEY.to_string(), local_address().to_string());
    details.insert(
        HOST_NAME_KEY.to_string(),
        System::host_name().unwrap_or_else(|| "localhost".to_string()),
    );

    details
}

/// Address of the interface used for outbound traffic
///
/// Connecting a UDP socket sends no packets; it only selects a route.
fn local_address() -> IpAddr {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
