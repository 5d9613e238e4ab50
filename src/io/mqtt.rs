//! MQTT client plumbing and the inbound delete command listener

use crate::domain::error::HistoryError;
use crate::domain::ports::HistoryStore;
use crate::domain::types::RecordId;
use crate::infra::config::Config;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Client options shared by every connection this process opens
pub fn mqtt_options(config: &Config, client_id: &str) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    options.set_keep_alive(Duration::from_secs(30));
    options.set_clean_session(true);
    options.set_max_packet_size(1024 * 1024, 1024 * 1024);

    // Set credentials if configured
    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        options.set_credentials(username, password);
    }
    options
}

/// Body of parking/delete
///
/// Older clients send the id as a string, so `"5"` is accepted as well as `5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    #[serde(deserialize_with = "record_id_lenient")]
    pub delete: RecordId,
}

fn record_id_lenient<'de, D>(deserializer: D) -> Result<RecordId, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(id) => Ok(RecordId(id)),
        Raw::Text(text) => text
            .trim()
            .parse()
            .map(RecordId)
            .map_err(|_| serde::de::Error::custom(format!("invalid record id {text:?}"))),
    }
}

/// Outcome of one delete request, for logging and tests
#[derive(Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted(RecordId),
    NotFound(RecordId),
    Malformed,
    Failed(RecordId),
}

/// Apply one raw delete payload to the history store
pub async fn handle_delete(history: &dyn HistoryStore, payload: &[u8]) -> DeleteOutcome {
    let request: DeleteRequest = match serde_json::from_slice(payload) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, bytes = %payload.len(), "delete_request_malformed");
            return DeleteOutcome::Malformed;
        }
    };

    match history.delete(request.delete).await {
        Ok(()) => {
            info!(record_id = %request.delete, "history_record_deleted");
            DeleteOutcome::Deleted(request.delete)
        }
        Err(HistoryError::NotFound(id)) => {
            debug!(record_id = %id, "delete_request_unknown_record");
            DeleteOutcome::NotFound(id)
        }
        Err(e) => {
            warn!(record_id = %request.delete, error = %e, "history_delete_failed");
            DeleteOutcome::Failed(request.delete)
        }
    }
}

/// Subscribe to the delete topic and forward requests to the history store.
///
/// Runs until shutdown. Broker outages are retried by the eventloop.
pub async fn start_delete_listener(
    config: &Config,
    history: Arc<dyn HistoryStore>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("parking-commands-{}", std::process::id());
    let (client, mut eventloop) = AsyncClient::new(mqtt_options(config, &client_id), 100);
    let topic = config.delete_topic().to_string();

    info!(topic = %topic, host = %config.mqtt_host(), port = %config.mqtt_port(), "delete_listener_started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("delete_listener_shutdown");
                    return Ok(());
                }
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // Clean session: subscribe again on every reconnect
                        client.subscribe(topic.as_str(), QoS::AtLeastOnce).await?;
                        info!(topic = %topic, "delete_listener_subscribed");
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) if publish.topic == topic => {
                        handle_delete(history.as_ref(), &publish.payload).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "delete_listener_connection_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{HistoryRecord, SlotId};
    use crate::io::history::MemoryHistoryStore;

    async fn store_with_one() -> (MemoryHistoryStore, RecordId) {
        let store = MemoryHistoryStore::new();
        let id = store
            .append(HistoryRecord {
                session_id: "s1".to_string(),
                slot_id: SlotId(1),
                entry_time: 0,
                exit_time: 10,
                charge: 10,
                flagged: false,
            })
            .await
            .unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn test_delete_request_removes_record() {
        let (store, id) = store_with_one().await;
        let payload = format!(r#"{{"delete": {}}}"#, id);

        assert_eq!(handle_delete(&store, payload.as_bytes()).await, DeleteOutcome::Deleted(id));
        assert!(store.query_all().await.unwrap().is_empty());
        assert_eq!(handle_delete(&store, payload.as_bytes()).await, DeleteOutcome::NotFound(id));
    }

    #[tokio::test]
    async fn test_delete_request_accepts_string_id() {
        let (store, id) = store_with_one().await;
        let payload = format!(r#"{{"delete": "{}"}}"#, id);

        assert_eq!(handle_delete(&store, payload.as_bytes()).await, DeleteOutcome::Deleted(id));
        assert!(store.query_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_delete_is_ignored() {
        let (store, _) = store_with_one().await;
        assert_eq!(handle_delete(&store, b"{\"delete\":\"x\"}").await, DeleteOutcome::Malformed);
        assert_eq!(handle_delete(&store, b"{\"delete\":-1}").await, DeleteOutcome::Malformed);
        assert_eq!(handle_delete(&store, b"not json").await, DeleteOutcome::Malformed);
        assert_eq!(store.query_all().await.unwrap().len(), 1);
    }
}
