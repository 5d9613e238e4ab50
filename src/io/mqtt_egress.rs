//! MQTT publisher for parking state and events
//!
//! Publishes to three topics for display clients:
//! - parking/state - slot snapshot every second (QoS 0, retained)
//! - parking/history - newest sessions every two seconds (QoS 0, retained)
//! - parking/events - one message per notification (QoS 1)

use crate::domain::error::NotifyError;
use crate::domain::ports::{HistoryStore, NotificationSink};
use crate::domain::types::{epoch_secs, Notification, NotificationKind, SlotId, StoredRecord};
use crate::infra::config::Config;
use crate::io::mqtt::mqtt_options;
use crate::services::state_store::{SharedStateStore, Snapshot};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// `time` field of a slot: epoch seconds, or "N/A" before the first transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlotTime {
    At(u64),
    NotAvailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotPayload {
    /// `null` while the slot has not been read yet
    pub vacant: Option<bool>,
    pub time: SlotTime,
}

/// Body of parking/state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    /// Keyed `slot_<id>`
    pub info: BTreeMap<String, SlotPayload>,
}

impl StatePayload {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let info = snapshot
            .iter()
            .map(|(id, slot)| {
                let payload = SlotPayload {
                    vacant: slot.occupancy.is_occupied().map(|occupied| !occupied),
                    time: match slot.last_transition_time {
                        Some(t) => SlotTime::At(t),
                        None => SlotTime::NotAvailable("N/A".to_string()),
                    },
                };
                (slot_key(*id), payload)
            })
            .collect();
        Self { info }
    }
}

pub fn slot_key(id: SlotId) -> String {
    format!("slot_{}", id)
}

/// Body of parking/history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPayload {
    /// Most recent first
    pub history: Vec<StoredRecord>,
}

impl HistoryPayload {
    /// Keep the first `limit` records of a newest-first listing
    pub fn newest(mut history: Vec<StoredRecord>, limit: usize) -> Self {
        history.truncate(limit);
        Self { history }
    }
}

/// Body of parking/events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    pub msg: String,
    pub kind: NotificationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<SlotId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charge: Option<u64>,
    pub time: u64,
}

impl EventPayload {
    pub fn from_notification(n: &Notification, time: u64) -> Self {
        Self { msg: n.text.clone(), kind: n.kind, slot: n.slot, charge: n.charge, time }
    }
}

/// MQTT publisher shared by the notification worker and the broadcaster
pub struct MqttPublisher {
    client: AsyncClient,
    state_topic: String,
    history_topic: String,
    events_topic: String,
}

impl MqttPublisher {
    /// Create a new MQTT publisher
    ///
    /// Connects to the broker at the configured MQTT host/port.
    pub fn new(config: &Config) -> Self {
        let client_id = format!("parking-egress-{}", std::process::id());
        let (client, eventloop) = AsyncClient::new(mqtt_options(config, &client_id), 100);

        // Spawn the eventloop handler
        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_egress_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_egress_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            state_topic: config.state_topic().to_string(),
            history_topic: config.history_topic().to_string(),
            events_topic: config.events_topic().to_string(),
        }
    }

    async fn publish_json<T: Serialize>(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: &T,
    ) -> Result<(), NotifyError> {
        let json = serde_json::to_vec(payload)?;
        self.client
            .publish(topic, qos, retain, json)
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))
    }

    pub async fn publish_state(&self, snapshot: &Snapshot) -> Result<(), NotifyError> {
        let payload = StatePayload::from_snapshot(snapshot);
        self.publish_json(&self.state_topic, QoS::AtMostOnce, true, &payload).await
    }

    pub async fn publish_history(&self, payload: &HistoryPayload) -> Result<(), NotifyError> {
        self.publish_json(&self.history_topic, QoS::AtMostOnce, true, payload).await
    }
}

#[async_trait]
impl NotificationSink for MqttPublisher {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload = EventPayload::from_notification(notification, epoch_secs());
        // QoS 1 so a toast is not lost on a flaky link
        self.publish_json(&self.events_topic, QoS::AtLeastOnce, false, &payload).await
    }
}

/// Periodic push of slot state and history to display clients
pub struct StateBroadcaster {
    publisher: Arc<MqttPublisher>,
    store: Arc<SharedStateStore>,
    history: Arc<dyn HistoryStore>,
    state_interval: Duration,
    history_interval: Duration,
    history_limit: usize,
}

impl StateBroadcaster {
    pub fn new(
        publisher: Arc<MqttPublisher>,
        store: Arc<SharedStateStore>,
        history: Arc<dyn HistoryStore>,
        state_interval: Duration,
        history_interval: Duration,
        history_limit: usize,
    ) -> Self {
        Self { publisher, store, history, state_interval, history_interval, history_limit }
    }

    /// Run until shutdown is signalled
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            state_ms = %self.state_interval.as_millis(),
            history_ms = %self.history_interval.as_millis(),
            history_limit = %self.history_limit,
            "broadcaster_started"
        );

        let mut state_tick = tokio::time::interval(self.state_interval);
        let mut history_tick = tokio::time::interval(self.history_interval);
        state_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        history_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("broadcaster_shutdown");
                        return;
                    }
                }
                _ = state_tick.tick() => {
                    let snapshot = self.store.get_snapshot();
                    if let Err(e) = self.publisher.publish_state(&snapshot).await {
                        debug!(error = %e, "broadcast_state_failed");
                    }
                }
                _ = history_tick.tick() => {
                    match self.history.query_all().await {
                        Ok(history) => {
                            let total = history.len();
                            let payload = HistoryPayload::newest(history, self.history_limit);
                            if let Err(e) = self.publisher.publish_history(&payload).await {
                                warn!(
                                    error = %e,
                                    records = %payload.history.len(),
                                    total = %total,
                                    "broadcast_history_failed"
                                );
                            }
                        }
                        Err(e) => warn!(error = %e, "history_query_failed"),
                    }
                }
            }
        }
    }
}
