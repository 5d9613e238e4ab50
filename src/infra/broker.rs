//! Embedded MQTT broker using rumqttd
//!
//! Lets a single board host both the controller and its display clients
//! without an external Mosquitto.

use crate::infra::config::Config as AppConfig;
use rumqttd::{Broker, Config, ConnectionSettings, RouterConfig, ServerSettings};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::thread;
use tracing::{info, warn};

/// Controller plus display clients
const MAX_CONNECTIONS: usize = 64;

/// History listings are the largest payloads we publish
const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

fn broker_config(listen: SocketAddr) -> Config {
    let router = RouterConfig {
        max_segment_size: 10 * 1024 * 1024,
        max_segment_count: 10,
        max_connections: MAX_CONNECTIONS,
        max_outgoing_packet_count: 200,
        initialized_filters: None,
        ..Default::default()
    };

    let mut servers = HashMap::new();
    servers.insert(
        "v4".to_string(),
        ServerSettings {
            name: "v4".to_string(),
            listen,
            tls: None,
            next_connection_delay_ms: 1,
            connections: ConnectionSettings {
                connection_timeout_ms: 5000,
                max_payload_size: MAX_PAYLOAD_SIZE,
                max_inflight_count: 100,
                auth: None,
                dynamic_filters: false,
                external_auth: None,
            },
        },
    );

    Config {
        id: 0,
        router,
        v4: Some(servers),
        v5: None,
        ws: None,
        prometheus: None,
        metrics: None,
        bridge: None,
        console: None,
        cluster: None,
    }
}

/// Start the embedded broker on its own thread when enabled.
///
/// Returns false when disabled or the bind address is invalid.
pub fn start_embedded_broker(app_config: &AppConfig) -> bool {
    if !app_config.broker_enabled() {
        info!("broker_disabled");
        return false;
    }

    let addr_str = format!("{}:{}", app_config.broker_bind_address(), app_config.broker_port());
    let listen: SocketAddr = match addr_str.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!(error = %e, addr = %addr_str, "broker_invalid_bind_address");
            return false;
        }
    };

    let config = broker_config(listen);
    thread::spawn(move || {
        let mut broker = Broker::new(config);
        // start() blocks for the life of the broker
        if let Err(e) = broker.start() {
            warn!(error = %e, "broker_start_failed");
        }
    });

    // Give broker time to bind before clients connect
    thread::sleep(std::time::Duration::from_millis(100));
    info!(addr = %listen, "broker_started");
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_config_listens_on_v4_only() {
        let listen: SocketAddr = "127.0.0.1:18830".parse().unwrap();
        let config = broker_config(listen);
        let servers = config.v4.unwrap();
        assert_eq!(servers["v4"].listen, listen);
        assert!(config.v5.is_none());
        assert_eq!(config.router.max_connections, MAX_CONNECTIONS);
    }
}
