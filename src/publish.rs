//! Live fan-out to subscribers
//!
//! Two independent paths per cycle:
//!
//! - the `"dashboard"` topic gets one summary event with the lightweight
//!   fields of every device;
//! - each `device:<id>` topic gets a detail event with the full metrics
//!   bag, delivered only to subscribers who explicitly joined that topic.
//!
//! Fan-out rides on `tokio::sync::broadcast`. Send errors are ignored -
//! it's fine if nobody is listening, and slow subscribers lagging out is
//! acceptable for real-time updates. Memberships are session-scoped: a
//! `SubscriberSession` joins and leaves device topics, and dropping the
//! session drops all of its memberships.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::{DeviceMetrics, DeviceStatus, PollResult};

/// Buffered events per topic before slow subscribers start lagging.
const TOPIC_CAPACITY: usize = 64;

/// Lightweight per-device entry of the dashboard summary.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub id: String,
    pub status: DeviceStatus,
    pub latency_ms: f64,
    pub tx_rate: Option<f64>,
    pub rx_rate: Option<f64>,
    pub cpu_load: Option<f64>,
    pub memory_usage: Option<f64>,
}

impl DeviceSummary {
    pub fn from_result(result: &PollResult) -> Self {
        Self {
            id: result.device_id.clone(),
            status: result.status,
            latency_ms: result.latency_ms(),
            tx_rate: result.metrics.tx_rate,
            rx_rate: result.metrics.rx_rate,
            cpu_load: result.metrics.cpu_load,
            memory_usage: result.metrics.memory_usage,
        }
    }
}

/// One summary broadcast per completed cycle.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryEvent {
    pub timestamp: DateTime<Utc>,
    pub devices: Vec<DeviceSummary>,
}

/// Full per-device payload for topic subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct DetailEvent {
    pub device_id: String,
    pub device_name: String,
    pub status: DeviceStatus,
    pub latency_ms: f64,
    pub metrics: DeviceMetrics,
    pub timestamp: DateTime<Utc>,
}

impl DetailEvent {
    pub fn from_result(result: &PollResult) -> Self {
        Self {
            device_id: result.device_id.clone(),
            device_name: result.device_name.clone(),
            status: result.status,
            latency_ms: result.latency_ms(),
            metrics: result.metrics.clone(),
            timestamp: result.timestamp,
        }
    }
}

pub struct Publisher {
    dashboard_tx: broadcast::Sender<SummaryEvent>,
    topics: Mutex<HashMap<String, broadcast::Sender<DetailEvent>>>,
}

impl Publisher {
    pub fn new() -> Self {
        let (dashboard_tx, _) = broadcast::channel(TOPIC_CAPACITY);

        Self {
            dashboard_tx,
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to the dashboard summary topic.
    pub fn subscribe_dashboard(&self) -> broadcast::Receiver<SummaryEvent> {
        self.dashboard_tx.subscribe()
    }

    /// Broadcast the cycle summary to all dashboard subscribers.
    pub fn publish_summary(&self, event: SummaryEvent) {
        match self.dashboard_tx.send(event) {
            Ok(receivers) => trace!("summary published to {receivers} subscribers"),
            Err(_) => trace!("no dashboard subscribers (this is OK)"),
        }
    }

    /// Deliver a detail event to subscribers of that device's topic.
    pub fn publish_detail(&self, event: DetailEvent) {
        let mut topics = self.topics.lock().expect("topic map poisoned");

        // Topics nobody listens to anymore are dropped on the way.
        topics.retain(|_, tx| tx.receiver_count() > 0);

        if let Some(tx) = topics.get(&event.device_id) {
            let _ = tx.send(event);
        }
    }

    fn join(&self, device_id: &str) -> broadcast::Receiver<DetailEvent> {
        let mut topics = self.topics.lock().expect("topic map poisoned");

        topics
            .entry(device_id.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's memberships. Dropping the session leaves every joined
/// topic implicitly.
pub struct SubscriberSession {
    publisher: Arc<Publisher>,
    joined: HashMap<String, broadcast::Receiver<DetailEvent>>,
}

impl SubscriberSession {
    pub fn new(publisher: Arc<Publisher>) -> Self {
        Self {
            publisher,
            joined: HashMap::new(),
        }
    }

    /// Join a device topic. Joining twice is a no-op.
    pub fn join_device(&mut self, device_id: &str) {
        if !self.joined.contains_key(device_id) {
            let rx = self.publisher.join(device_id);
            self.joined.insert(device_id.to_string(), rx);
        }
    }

    /// Leave a device topic.
    pub fn leave_device(&mut self, device_id: &str) {
        self.joined.remove(device_id);
    }

    /// Receiver for a joined device topic, if joined.
    pub fn device_receiver(
        &mut self,
        device_id: &str,
    ) -> Option<&mut broadcast::Receiver<DetailEvent>> {
        self.joined.get_mut(device_id)
    }
}
