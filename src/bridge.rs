//! ==============================================================================
//! bridge.rs - mqtt subscription, ingest and viewer fan-out
//! ==============================================================================
//!
//! purpose:
//!     owns the one upstream subscription for one device. every inbound
//!     message goes validate -> store -> broadcast. it also owns the registry
//!     of live viewers, so both broadcasts and per-viewer replies go through
//!     here.
//!
//! relationships:
//!     - used by: main.rs (spawns run()), gateway.rs (viewer sessions),
//!                api.rs (connection status)
//!     - writes: store.rs
//!
//! failure isolation:
//!     a bad payload is logged and dropped. it never reaches the store or a
//!     viewer, and never stops the event loop. reconnecting is left to the
//!     rumqttc event loop, which reconnects on the next poll after an error.
//!
//! ```text
//!     ┌──────────┐  publish   ┌────────────┐  append   ┌─────────────┐
//!     │  broker  │ ─────────> │   bridge   │ ────────> │    store    │
//!     └──────────┘            └─────┬──────┘           └─────────────┘
//!                                   │ sensor_data / connection_status
//!                       ┌───────────┼───────────┐
//!                       ▼           ▼           ▼
//!                    viewer      viewer      viewer     (one mpsc each)
//! ```
//!
//! ==============================================================================

use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, Incoming, MqttOptions, QoS, SubscribeReasonCode,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

use crate::config::{HistoryConfig, MqttConfig, RelayConfig};
use crate::domain::{Reading, TelemetryPayload, ViewerEvent, ViewerRequest};
use crate::error::IngestError;
use crate::store::ReadingStore;

pub type ViewerId = u64;

type Registry = HashMap<ViewerId, mpsc::UnboundedSender<ViewerEvent>>;

/// a registered viewer: its id and the queue of events addressed to it
#[derive(Debug)]
pub struct ViewerSession {
    pub id: ViewerId,
    pub events: mpsc::UnboundedReceiver<ViewerEvent>,
}

pub struct TelemetryBridge {
    store: Arc<ReadingStore>,
    device_id: String,
    topic: String,
    history: HistoryConfig,
    show_sensor_data: bool,
    connected: AtomicBool,
    viewers: Mutex<Registry>,
    next_viewer: AtomicU64,
}

impl TelemetryBridge {
    pub fn new(store: Arc<ReadingStore>, config: &RelayConfig) -> Self {
        Self {
            store,
            device_id: config.mqtt.device_id.clone(),
            topic: config.mqtt.topic.clone(),
            history: config.history.clone(),
            show_sensor_data: config.logging.show_sensor_data,
            connected: AtomicBool::new(false),
            viewers: Mutex::new(HashMap::new()),
            next_viewer: AtomicU64::new(1),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// cached upstream status; never probes the transport
    pub fn connection_status(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// record a transport state change and announce it to every viewer
    pub fn set_connected(&self, connected: bool) {
        let previous = self.connected.swap(connected, Ordering::SeqCst);
        if previous != connected {
            tracing::info!(connected, "mqtt connection status changed");
            self.broadcast(ViewerEvent::ConnectionStatus { connected });
        }
    }

    // ==========================================================================
    // ingest
    // ==========================================================================

    /// validate -> store -> broadcast. on error nothing is stored or sent.
    pub fn ingest(&self, payload: &[u8]) -> Result<Reading, IngestError> {
        let telemetry = TelemetryPayload::parse(payload)?;
        let reading = self.store.append_telemetry(&self.device_id, telemetry)?;

        if self.show_sensor_data {
            tracing::info!(
                id = reading.id,
                dht = reading.dht_temperature,
                lm35 = reading.lm35_temperature,
                led = reading.led_level,
                stored = self.store.len().unwrap_or_default(),
                devices = self.store.device_count().unwrap_or_default(),
                "reading stored"
            );
        }

        self.broadcast(ViewerEvent::SensorData { data: reading.clone() });
        Ok(reading)
    }

    /// entry point for every publish seen on the event loop
    pub fn on_message(&self, topic: &str, payload: &[u8]) {
        if topic != self.topic {
            tracing::debug!(%topic, "ignoring publish on foreign topic");
            return;
        }
        tracing::debug!(%topic, payload = %String::from_utf8_lossy(payload), "mqtt message");

        if let Err(e) = self.ingest(payload) {
            tracing::warn!(%topic, error = %e, "dropping telemetry message");
        }
    }

    // ==========================================================================
    // viewers
    // ==========================================================================

    /// register a viewer. its first two events are always connection_status
    /// then the recent snapshot, queued before any broadcast can reach it.
    pub fn connect_viewer(&self) -> ViewerSession {
        let id = self.next_viewer.fetch_add(1, Ordering::SeqCst);
        let (tx, events) = mpsc::unbounded_channel();

        let mut viewers = self.registry();
        let _ = tx.send(ViewerEvent::ConnectionStatus {
            connected: self.connection_status(),
        });
        let snapshot = self.history_or_empty(self.history.snapshot_limit);
        let _ = tx.send(ViewerEvent::HistoricalData { data: snapshot });
        viewers.insert(id, tx);

        tracing::info!(viewer = id, viewers = viewers.len(), "viewer connected");
        ViewerSession { id, events }
    }

    pub fn disconnect_viewer(&self, id: ViewerId) {
        let mut viewers = self.registry();
        if viewers.remove(&id).is_some() {
            tracing::info!(viewer = id, viewers = viewers.len(), "viewer disconnected");
        }
    }

    pub fn viewer_count(&self) -> usize {
        self.registry().len()
    }

    pub fn handle_request(&self, id: ViewerId, request: ViewerRequest) {
        match request {
            ViewerRequest::GetHistoricalData { limit } => self.send_history(id, limit),
            ViewerRequest::Unknown => {
                tracing::debug!(viewer = id, "ignoring unknown viewer request");
            }
        }
    }

    /// reply to one viewer only with `recent(device, limit or default)`
    pub fn send_history(&self, id: ViewerId, limit: Option<usize>) {
        let limit = limit
            .filter(|&l| l > 0)
            .unwrap_or(self.history.default_limit);

        match self.store.recent(&self.device_id, limit) {
            Ok(data) => self.send_to(id, ViewerEvent::HistoricalData { data }),
            Err(e) => tracing::error!(viewer = id, error = %e, "history lookup failed"),
        }
    }

    /// best-effort fan-out; closed viewers are skipped and reaped
    pub fn broadcast(&self, event: ViewerEvent) {
        let mut viewers = self.registry();
        viewers.retain(|id, tx| {
            if tx.is_closed() {
                tracing::debug!(viewer = *id, "reaping closed viewer");
                return false;
            }
            let _ = tx.send(event.clone());
            true
        });
    }

    fn send_to(&self, id: ViewerId, event: ViewerEvent) {
        if let Some(tx) = self.registry().get(&id) {
            if !tx.is_closed() {
                let _ = tx.send(event);
            }
        }
    }

    fn history_or_empty(&self, limit: usize) -> Vec<Reading> {
        self.store.recent(&self.device_id, limit).unwrap_or_else(|e| {
            tracing::error!(error = %e, "snapshot lookup failed");
            Vec::new()
        })
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // a panicked holder cannot leave the map half-written
        self.viewers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ==========================================================================
    // mqtt event loop
    // ==========================================================================

    /// drive the rumqttc event loop forever
    pub async fn run(self: Arc<Self>, client: AsyncClient, mut eventloop: EventLoop, config: MqttConfig) {
        let qos = qos_level(config.qos);
        let reconnect_delay = config.reconnect_delay();

        loop {
            let event = eventloop.poll().await;
            if !self.handle_event(&client, qos, event) {
                tracing::info!("reconnecting in {}ms", reconnect_delay.as_millis());
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }

    /// apply one event loop result. false means the connection failed and
    /// the caller should back off before polling again.
    pub fn handle_event(
        &self,
        client: &AsyncClient,
        qos: QoS,
        event: Result<Event, ConnectionError>,
    ) -> bool {
        match event {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                tracing::info!(code = ?ack.code, "mqtt connected");
                self.set_connected(true);
                // try_subscribe: awaiting here would stall the loop that drains the request queue
                match client.try_subscribe(self.topic.clone(), qos) {
                    Ok(()) => tracing::info!(topic = %self.topic, "subscribing"),
                    Err(e) => tracing::error!(topic = %self.topic, error = %e, "subscribe failed"),
                }
            }
            Ok(Event::Incoming(Incoming::SubAck(ack))) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|c| matches!(c, SubscribeReasonCode::Failure))
                {
                    tracing::error!(topic = %self.topic, "broker rejected subscription");
                } else {
                    tracing::info!(topic = %self.topic, "subscribed");
                }
            }
            Ok(Event::Incoming(Incoming::Publish(p))) => {
                self.on_message(&p.topic, &p.payload);
            }
            Ok(Event::Incoming(Incoming::Disconnect)) => {
                tracing::warn!("mqtt broker sent disconnect");
                self.set_connected(false);
            }
            Ok(other) => tracing::trace!("mqtt event: {other:?}"),
            Err(e) => {
                tracing::error!(error = %e, "mqtt connection error");
                self.set_connected(false);
                return false;
            }
        }
        true
    }
}

/// build the client + event loop for the configured broker
pub fn mqtt_client(config: &MqttConfig) -> (AsyncClient, EventLoop) {
    let client_id = config.client_id();
    tracing::info!(
        "mqtt -> {}:{} as {client_id}",
        config.broker,
        config.port
    );

    let mut opts = MqttOptions::new(client_id, config.broker.clone(), config.port);
    opts.set_keep_alive(config.keep_alive());
    opts.set_clean_session(config.clean_session);
    if let Some(username) = &config.username {
        opts.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
    }

    AsyncClient::new(opts, 32)
}

fn qos_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}
