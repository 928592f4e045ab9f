//! Typed, capacity-bounded event channels between independent subsystems.
//!
//! The bus is pure routing: one bounded channel per event kind, a non-blocking
//! publish surface, and a single shutdown that closes every channel. A full
//! channel is a backpressure signal, not a failure — the event is dropped,
//! the drop is counted and logged, and the publisher continues. Events are
//! hints, never the system of record.

use std::fmt;
use std::net::IpAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;
use uuid::Uuid;

/// Default per-kind channel capacity when unset or non-positive.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 50;

/// Default capacity for the plugin fault channel, which sees the highest
/// event rate during a flapping outage.
pub const DEFAULT_PLUGIN_FAULT_CAPACITY: usize = 100;

// ============================================================
// Event kinds
// ============================================================

/// Published when a discovery run begins execution.
#[derive(Debug, Clone)]
pub struct DiscoveryRequest {
    pub profile_id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// Published when a discovery run finishes.
#[derive(Debug, Clone)]
pub struct DiscoveryStatus {
    pub profile_id: Uuid,
    pub outcome: DiscoveryOutcome,
    pub devices_found: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    Success,
    Partial,
    Failed,
}

impl fmt::Display for DiscoveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryOutcome::Success => write!(f, "success"),
            DiscoveryOutcome::Partial => write!(f, "partial"),
            DiscoveryOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Published when a protocol handshake against a discovered address succeeds.
#[derive(Debug, Clone)]
pub struct DeviceValidated {
    pub discovery_profile_id: Uuid,
    pub credential_profile_id: Uuid,
    pub plugin_id: String,
    pub ip: IpAddr,
    pub port: u16,
    pub timestamp: DateTime<Utc>,
}

/// Published when a monitor transitions between health states.
#[derive(Debug, Clone)]
pub struct MonitorState {
    pub monitor_id: Uuid,
    pub ip: IpAddr,
    pub health: MonitorHealth,
    /// Consecutive poll failures; only meaningful for `Down`.
    pub failures: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorHealth {
    Down,
    Recovered,
}

impl fmt::Display for MonitorHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorHealth::Down => write!(f, "down"),
            MonitorHealth::Recovered => write!(f, "recovered"),
        }
    }
}

/// Published when a collector plugin execution misbehaves.
#[derive(Debug, Clone)]
pub struct PluginFault {
    pub plugin_id: String,
    pub monitor_id: Uuid,
    pub kind: PluginFaultKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum PluginFaultKind {
    Timeout { limit: Duration },
    Error { message: String },
}

/// Published when cached entries for an entity must be refreshed.
#[derive(Debug, Clone)]
pub struct CacheInvalidate {
    pub entity: CacheEntity,
    pub entity_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEntity {
    Credential,
    Monitor,
    Discovery,
}

impl fmt::Display for CacheEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheEntity::Credential => write!(f, "credential"),
            CacheEntity::Monitor => write!(f, "monitor"),
            CacheEntity::Discovery => write!(f, "discovery"),
        }
    }
}

/// A domain event routed to the channel of its kind.
#[derive(Debug, Clone)]
pub enum Event {
    DiscoveryRequest(DiscoveryRequest),
    DiscoveryStatus(DiscoveryStatus),
    DeviceValidated(DeviceValidated),
    MonitorState(MonitorState),
    PluginFault(PluginFault),
    CacheInvalidate(CacheInvalidate),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::DiscoveryRequest(_) => EventKind::DiscoveryRequest,
            Event::DiscoveryStatus(_) => EventKind::DiscoveryStatus,
            Event::DeviceValidated(_) => EventKind::DeviceValidated,
            Event::MonitorState(_) => EventKind::MonitorState,
            Event::PluginFault(_) => EventKind::PluginFault,
            Event::CacheInvalidate(_) => EventKind::CacheInvalidate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    DiscoveryRequest,
    DiscoveryStatus,
    DeviceValidated,
    MonitorState,
    PluginFault,
    CacheInvalidate,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::DiscoveryRequest,
        EventKind::DiscoveryStatus,
        EventKind::DeviceValidated,
        EventKind::MonitorState,
        EventKind::PluginFault,
        EventKind::CacheInvalidate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::DiscoveryRequest => "discovery.request",
            EventKind::DiscoveryStatus => "discovery.status",
            EventKind::DeviceValidated => "device.validated",
            EventKind::MonitorState => "monitor.state",
            EventKind::PluginFault => "plugin.fault",
            EventKind::CacheInvalidate => "cache.invalidate",
        }
    }

    fn index(&self) -> usize {
        match self {
            EventKind::DiscoveryRequest => 0,
            EventKind::DiscoveryStatus => 1,
            EventKind::DeviceValidated => 2,
            EventKind::MonitorState => 3,
            EventKind::PluginFault => 4,
            EventKind::CacheInvalidate => 5,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================
// Bus
// ============================================================

/// Per-kind channel capacities. Non-positive values fall back to the defaults.
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub discovery_request_capacity: usize,
    pub discovery_status_capacity: usize,
    pub device_validated_capacity: usize,
    pub monitor_state_capacity: usize,
    pub plugin_fault_capacity: usize,
    pub cache_invalidate_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            discovery_request_capacity: DEFAULT_CHANNEL_CAPACITY,
            discovery_status_capacity: DEFAULT_CHANNEL_CAPACITY,
            device_validated_capacity: DEFAULT_CHANNEL_CAPACITY,
            monitor_state_capacity: DEFAULT_CHANNEL_CAPACITY,
            plugin_fault_capacity: DEFAULT_PLUGIN_FAULT_CAPACITY,
            cache_invalidate_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

fn capacity_or(configured: usize, fallback: usize) -> usize {
    if configured == 0 { fallback } else { configured }
}

/// Result of a publish attempt. Never an error: a full channel drops the
/// event, and only publishing after shutdown reports `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered,
    Dropped,
    Closed,
}

struct Senders {
    discovery_request: mpsc::Sender<DiscoveryRequest>,
    discovery_status: mpsc::Sender<DiscoveryStatus>,
    device_validated: mpsc::Sender<DeviceValidated>,
    monitor_state: mpsc::Sender<MonitorState>,
    plugin_fault: mpsc::Sender<PluginFault>,
    cache_invalidate: mpsc::Sender<CacheInvalidate>,
}

/// Consumer ends of the six event channels, handed out once at construction.
/// Each field is drained by a long-running reader until the bus shuts down.
pub struct EventReceivers {
    pub discovery_request: mpsc::Receiver<DiscoveryRequest>,
    pub discovery_status: mpsc::Receiver<DiscoveryStatus>,
    pub device_validated: mpsc::Receiver<DeviceValidated>,
    pub monitor_state: mpsc::Receiver<MonitorState>,
    pub plugin_fault: mpsc::Receiver<PluginFault>,
    pub cache_invalidate: mpsc::Receiver<CacheInvalidate>,
}

/// Process-wide event bus over typed bounded channels.
pub struct EventBus {
    senders: Mutex<Option<Senders>>,
    drops: [AtomicU64; 6],
}

impl EventBus {
    /// Creates the bus and the matching receiver set.
    pub fn new(cfg: &BusConfig) -> (Self, EventReceivers) {
        let (discovery_request_tx, discovery_request_rx) = mpsc::channel(capacity_or(
            cfg.discovery_request_capacity,
            DEFAULT_CHANNEL_CAPACITY,
        ));
        let (discovery_status_tx, discovery_status_rx) = mpsc::channel(capacity_or(
            cfg.discovery_status_capacity,
            DEFAULT_CHANNEL_CAPACITY,
        ));
        let (device_validated_tx, device_validated_rx) = mpsc::channel(capacity_or(
            cfg.device_validated_capacity,
            DEFAULT_CHANNEL_CAPACITY,
        ));
        let (monitor_state_tx, monitor_state_rx) = mpsc::channel(capacity_or(
            cfg.monitor_state_capacity,
            DEFAULT_CHANNEL_CAPACITY,
        ));
        let (plugin_fault_tx, plugin_fault_rx) = mpsc::channel(capacity_or(
            cfg.plugin_fault_capacity,
            DEFAULT_PLUGIN_FAULT_CAPACITY,
        ));
        let (cache_invalidate_tx, cache_invalidate_rx) = mpsc::channel(capacity_or(
            cfg.cache_invalidate_capacity,
            DEFAULT_CHANNEL_CAPACITY,
        ));

        let bus = Self {
            senders: Mutex::new(Some(Senders {
                discovery_request: discovery_request_tx,
                discovery_status: discovery_status_tx,
                device_validated: device_validated_tx,
                monitor_state: monitor_state_tx,
                plugin_fault: plugin_fault_tx,
                cache_invalidate: cache_invalidate_tx,
            })),
            drops: Default::default(),
        };
        let receivers = EventReceivers {
            discovery_request: discovery_request_rx,
            discovery_status: discovery_status_rx,
            device_validated: device_validated_rx,
            monitor_state: monitor_state_rx,
            plugin_fault: plugin_fault_rx,
            cache_invalidate: cache_invalidate_rx,
        };
        (bus, receivers)
    }

    /// Non-blocking publish. A full channel drops the event and reports the
    /// drop; the caller is never blocked and never receives an error for it.
    pub fn publish(&self, event: Event) -> PublishOutcome {
        let kind = event.kind();
        let guard = self.senders.lock().unwrap();
        let Some(senders) = guard.as_ref() else {
            return PublishOutcome::Closed;
        };

        let result = match event {
            Event::DiscoveryRequest(ev) => route(&senders.discovery_request, ev),
            Event::DiscoveryStatus(ev) => route(&senders.discovery_status, ev),
            Event::DeviceValidated(ev) => route(&senders.device_validated, ev),
            Event::MonitorState(ev) => route(&senders.monitor_state, ev),
            Event::PluginFault(ev) => route(&senders.plugin_fault, ev),
            Event::CacheInvalidate(ev) => route(&senders.cache_invalidate, ev),
        };
        drop(guard);

        match result {
            PublishOutcome::Dropped => {
                let total = self.drops[kind.index()].fetch_add(1, Ordering::Relaxed) + 1;
                warn!(kind = %kind, dropped_total = total, "event channel full, dropping event");
                PublishOutcome::Dropped
            }
            outcome => outcome,
        }
    }

    /// Closes every channel exactly once. After shutdown, publishing fails
    /// fast with `Closed` and every subscriber read observes closure.
    ///
    /// # Panics
    /// Panics on a second call: double shutdown is an internal protocol
    /// violation, not a recoverable condition.
    pub fn shutdown(&self) {
        let mut guard = self.senders.lock().unwrap();
        assert!(guard.is_some(), "event bus shut down twice");
        *guard = None;
    }

    /// Number of events dropped so far for one kind.
    pub fn drop_count(&self, kind: EventKind) -> u64 {
        self.drops[kind.index()].load(Ordering::Relaxed)
    }

    /// Per-kind drop counters, in `EventKind::ALL` order.
    pub fn drop_counts(&self) -> [(EventKind, u64); 6] {
        EventKind::ALL.map(|kind| (kind, self.drop_count(kind)))
    }
}

fn route<T>(tx: &mpsc::Sender<T>, event: T) -> PublishOutcome {
    match tx.try_send(event) {
        Ok(()) => PublishOutcome::Delivered,
        Err(TrySendError::Full(_)) => PublishOutcome::Dropped,
        Err(TrySendError::Closed(_)) => PublishOutcome::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor_event() -> Event {
        Event::MonitorState(MonitorState {
            monitor_id: Uuid::new_v4(),
            ip: "192.168.1.100".parse().unwrap(),
            health: MonitorHealth::Down,
            failures: 3,
            timestamp: Utc::now(),
        })
    }

    fn cache_event() -> Event {
        Event::CacheInvalidate(CacheInvalidate {
            entity: CacheEntity::Monitor,
            entity_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn publish_delivers_to_subscriber() {
        let (bus, mut receivers) = EventBus::new(&BusConfig::default());

        assert_eq!(bus.publish(monitor_event()), PublishOutcome::Delivered);

        let received = receivers.monitor_state.recv().await.unwrap();
        assert_eq!(received.health, MonitorHealth::Down);
        assert_eq!(received.failures, 3);
    }

    #[tokio::test]
    async fn full_channel_drops_without_blocking() {
        let cfg = BusConfig {
            monitor_state_capacity: 1,
            ..BusConfig::default()
        };
        let (bus, _receivers) = EventBus::new(&cfg);

        assert_eq!(bus.publish(monitor_event()), PublishOutcome::Delivered);
        assert_eq!(bus.publish(monitor_event()), PublishOutcome::Dropped);
        assert_eq!(bus.publish(monitor_event()), PublishOutcome::Dropped);

        assert_eq!(bus.drop_count(EventKind::MonitorState), 2);
        assert_eq!(bus.drop_count(EventKind::CacheInvalidate), 0);
    }

    #[tokio::test]
    async fn zero_capacity_falls_back_to_default() {
        let cfg = BusConfig {
            cache_invalidate_capacity: 0,
            ..BusConfig::default()
        };
        let (bus, _receivers) = EventBus::new(&cfg);

        for _ in 0..DEFAULT_CHANNEL_CAPACITY {
            assert_eq!(bus.publish(cache_event()), PublishOutcome::Delivered);
        }
        assert_eq!(bus.publish(cache_event()), PublishOutcome::Dropped);
    }

    #[tokio::test]
    async fn shutdown_closes_channels_and_fails_publish_fast() {
        let (bus, mut receivers) = EventBus::new(&BusConfig::default());

        assert_eq!(bus.publish(cache_event()), PublishOutcome::Delivered);
        bus.shutdown();

        // The buffered event is still drained, then the channel reports closure.
        assert!(receivers.cache_invalidate.recv().await.is_some());
        assert!(receivers.cache_invalidate.recv().await.is_none());
        assert!(receivers.monitor_state.recv().await.is_none());

        assert_eq!(bus.publish(cache_event()), PublishOutcome::Closed);
    }

    #[tokio::test]
    #[should_panic(expected = "event bus shut down twice")]
    async fn double_shutdown_panics() {
        let (bus, _receivers) = EventBus::new(&BusConfig::default());
        bus.shutdown();
        bus.shutdown();
    }
}
