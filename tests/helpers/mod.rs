//! Shared test fixtures: a scriptable prober and management connector plus
//! a fully wired polling engine over the in-memory stores.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use fleetmon::config::{DeviceConfig, ManagedConfig, PollConfig};
use fleetmon::mgmt::{
    ConnectionPool, Connector, HealthInfo, InterfaceCounters, ManagedSession, ResourceInfo,
    SessionError,
};
use fleetmon::poller::PollEngine;
use fleetmon::probe::Prober;
use fleetmon::publish::Publisher;
use fleetmon::store::{MemoryInventory, MemoryTimeSeries};

/// Prober whose answers are scripted per address.
pub struct MockProber {
    reachable: Mutex<HashMap<IpAddr, Duration>>,
}

impl MockProber {
    pub fn new() -> Self {
        Self {
            reachable: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_reachable(&self, addr: IpAddr, rtt: Duration) {
        self.reachable.lock().unwrap().insert(addr, rtt);
    }

    pub fn set_unreachable(&self, addr: &IpAddr) {
        self.reachable.lock().unwrap().remove(addr);
    }
}

#[async_trait]
impl Prober for MockProber {
    async fn probe(&self, addr: IpAddr) -> Option<Duration> {
        self.reachable.lock().unwrap().get(&addr).copied()
    }
}

/// Scripted replies of one device's management session. A `None` block
/// answers with a query-level trap; `fatal_on_resource` kills the whole
/// session on the first query instead.
#[derive(Clone, Default)]
pub struct DeviceScript {
    pub resource: Option<ResourceInfo>,
    pub health: Option<HealthInfo>,
    pub counters: Option<InterfaceCounters>,
    pub active_sessions: Option<u64>,
    pub fatal_on_resource: bool,
    pub refuse_connect: bool,
}

impl DeviceScript {
    /// A device that answers every block with sane values.
    pub fn healthy() -> Self {
        Self {
            resource: Some(ResourceInfo {
                cpu_load: Some(10.0),
                total_memory: Some(1_073_741_824),
                free_memory: Some(805_306_368),
                uptime: Some("1w2d3h".to_string()),
                board_name: Some("RB4011".to_string()),
                version: Some("7.15".to_string()),
            }),
            health: Some(HealthInfo {
                temperature: Some(42.0),
                voltage: Some(24.1),
            }),
            counters: Some(InterfaceCounters {
                rx_bytes: 1_000_000,
                tx_bytes: 500_000,
            }),
            active_sessions: Some(128),
            fatal_on_resource: false,
            refuse_connect: false,
        }
    }

    pub fn with_cpu(mut self, cpu_load: f64) -> Self {
        if let Some(resource) = &mut self.resource {
            resource.cpu_load = Some(cpu_load);
        }
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        if let Some(health) = &mut self.health {
            health.temperature = Some(temperature);
        }
        self
    }

    pub fn without_health(mut self) -> Self {
        self.health = None;
        self
    }

    pub fn fatal(mut self) -> Self {
        self.fatal_on_resource = true;
        self
    }

    pub fn unreachable_mgmt(mut self) -> Self {
        self.refuse_connect = true;
        self
    }
}

pub struct ScriptedSession {
    script: DeviceScript,
    closed_tx: watch::Sender<bool>,
}

impl ScriptedSession {
    fn new(script: DeviceScript) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self { script, closed_tx }
    }
}

#[async_trait]
impl ManagedSession for ScriptedSession {
    async fn read_resource(&self) -> Result<ResourceInfo, SessionError> {
        if self.script.fatal_on_resource {
            self.closed_tx.send_replace(true);
            return Err(SessionError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "scripted session failure",
            )));
        }

        self.script
            .resource
            .clone()
            .ok_or_else(|| SessionError::Trap("no resource block".to_string()))
    }

    async fn read_health(&self) -> Result<HealthInfo, SessionError> {
        self.script
            .health
            .clone()
            .ok_or_else(|| SessionError::Trap("no health sensors".to_string()))
    }

    async fn read_interface_counters(
        &self,
        _interface: &str,
    ) -> Result<InterfaceCounters, SessionError> {
        self.script
            .counters
            .ok_or_else(|| SessionError::Trap("no such interface".to_string()))
    }

    async fn read_active_sessions(&self) -> Result<u64, SessionError> {
        self.script
            .active_sessions
            .ok_or_else(|| SessionError::Trap("no connection tracking".to_string()))
    }

    async fn close(&self) {
        self.closed_tx.send_replace(true);
    }

    fn closed(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }
}

/// Connector that hands out scripted sessions keyed by device id.
pub struct ScriptedConnector {
    scripts: Mutex<HashMap<String, DeviceScript>>,
    pub connects: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn script(&self, device_id: &str, script: DeviceScript) {
        self.scripts
            .lock()
            .unwrap()
            .insert(device_id.to_string(), script);
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        device: &DeviceConfig,
    ) -> Result<Arc<dyn ManagedSession>, SessionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&device.id)
            .cloned()
            .unwrap_or_else(DeviceScript::healthy);

        if script.refuse_connect {
            return Err(SessionError::ConnectFailed(
                "scripted connection refusal".to_string(),
            ));
        }

        Ok(Arc::new(ScriptedSession::new(script)))
    }
}

pub fn managed_device(id: &str, addr: &str, port: u16) -> DeviceConfig {
    DeviceConfig {
        id: id.to_string(),
        name: format!("Device {id}"),
        address: addr.parse().unwrap(),
        port,
        use_tls: false,
        role: Some("router".to_string()),
        interface: Some("ether1".to_string()),
        managed: Some(ManagedConfig {
            username: "monitor".to_string(),
            password: "secret".to_string(),
        }),
    }
}

pub fn ping_device(id: &str, addr: &str) -> DeviceConfig {
    DeviceConfig {
        id: id.to_string(),
        name: format!("Device {id}"),
        address: addr.parse().unwrap(),
        port: 8728,
        use_tls: false,
        role: None,
        interface: None,
        managed: None,
    }
}

/// A fully wired engine over the in-memory stores, with every collaborator
/// kept accessible for assertions.
pub struct Harness {
    pub prober: Arc<MockProber>,
    pub connector: Arc<ScriptedConnector>,
    pub pool: Arc<ConnectionPool>,
    pub inventory: Arc<MemoryInventory>,
    pub tsdb: Arc<MemoryTimeSeries>,
    pub publisher: Arc<Publisher>,
    pub engine: Arc<PollEngine>,
}

impl Harness {
    pub fn new(devices: Vec<DeviceConfig>) -> Self {
        let prober = Arc::new(MockProber::new());
        let connector = Arc::new(ScriptedConnector::new());
        let pool = Arc::new(ConnectionPool::new(
            connector.clone(),
            Duration::from_secs(1),
        ));
        let inventory = Arc::new(MemoryInventory::new(devices));
        let tsdb = Arc::new(MemoryTimeSeries::new());
        let publisher = Arc::new(Publisher::new());

        let engine = Arc::new(PollEngine::new(
            prober.clone(),
            pool.clone(),
            inventory.clone(),
            tsdb.clone(),
            publisher.clone(),
            PollConfig::default(),
        ));

        Self {
            prober,
            connector,
            pool,
            inventory,
            tsdb,
            publisher,
            engine,
        }
    }
}
