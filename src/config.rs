//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `relay.toml`.
//!     loads configuration from file or falls back to defaults, then applies
//!     environment overrides.
//!
//! structure:
//!     - MqttConfig: broker, credentials, topic and the device it belongs to.
//!     - ServerConfig: http/websocket bind address.
//!     - HistoryConfig: default and greeting snapshot sizes.
//!     - LoggingConfig: log level and per-reading echo.
//!
//! environment (wins over the file):
//!     MQTT_BROKER, MQTT_PORT, MQTT_USER, MQTT_PASS, MQTT_TOPIC, DEVICE_ID,
//!     RELAY_BIND
//!
//! ==============================================================================

use anyhow::Context;
use rand::Rng;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RelayConfig {
    pub mqtt: MqttConfig,
    pub server: ServerConfig,
    pub history: HistoryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic: String,
    /// device id stamped on every reading from `topic`
    pub device_id: String,
    /// client id = "<prefix>_<8 random hex chars>"
    pub client_id_prefix: String,
    pub keep_alive_seconds: u64,
    pub reconnect_delay_ms: u64,
    pub clean_session: bool,
    /// 0 = at most once, 1 = at least once, 2 = exactly once
    pub qos: u8,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    /// readings returned when a request gives no limit
    pub default_limit: usize,
    /// readings sent to a viewer right after it connects
    pub snapshot_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            topic: "iot/G.231.22.0002".to_string(),
            device_id: "G.231.22.0002".to_string(),
            client_id_prefix: "web_dashboard".to_string(),
            keep_alive_seconds: 60,
            reconnect_delay_ms: 5000,
            clean_session: true,
            qos: 0,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:3000".to_string() }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { default_limit: 50, snapshot_limit: 20 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: false }
    }
}

impl MqttConfig {
    /// fresh client id per process so two relays never collide on the broker
    pub fn client_id(&self) -> String {
        let suffix: u32 = rand::thread_rng().gen();
        format!("{}_{:08x}", self.client_id_prefix, suffix)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_seconds)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl RelayConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        Self::parse(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("relay.toml"),
            PathBuf::from("..").join("config").join("relay.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        eprintln!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        eprintln!("[CONFIG] Warning: {:#}", e);
                    }
                }
            }
        }

        eprintln!("[CONFIG] No config file found - using defaults");
        Self::default()
    }

    /// apply overrides from the process environment
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(broker) = read("MQTT_BROKER") {
            self.mqtt.broker = broker;
        }
        if let Some(port) = read("MQTT_PORT") {
            match port.parse() {
                Ok(port) => self.mqtt.port = port,
                Err(_) => eprintln!("[CONFIG] Warning: ignoring MQTT_PORT={port}"),
            }
        }
        if let Some(user) = read("MQTT_USER") {
            self.mqtt.username = Some(user);
        }
        if let Some(pass) = read("MQTT_PASS") {
            self.mqtt.password = Some(pass);
        }
        if let Some(topic) = read("MQTT_TOPIC") {
            self.mqtt.topic = topic;
        }
        if let Some(device_id) = read("DEVICE_ID") {
            self.mqtt.device_id = device_id;
        }
        if let Some(bind) = read("RELAY_BIND") {
            self.server.bind = bind;
        }
        self
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        tracing::info!(
            broker = %format!("{}:{}", self.mqtt.broker, self.mqtt.port),
            topic = %self.mqtt.topic,
            device_id = %self.mqtt.device_id,
            bind = %self.server.bind,
            log_level = %self.logging.level,
            "relay configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_yields_defaults() {
        let config = RelayConfig::parse("").unwrap();
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.keep_alive_seconds, 60);
        assert_eq!(config.mqtt.reconnect_delay_ms, 5000);
        assert_eq!(config.history.default_limit, 50);
        assert_eq!(config.history.snapshot_limit, 20);
        assert_eq!(config.server.bind, "0.0.0.0:3000");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = RelayConfig::parse(
            r#"
            [mqtt]
            broker = "broker.example.net"
            topic = "iot/lab-7"
            device_id = "lab-7"

            [logging]
            show_sensor_data = true
            "#,
        )
        .unwrap();
        assert_eq!(config.mqtt.broker, "broker.example.net");
        assert_eq!(config.mqtt.device_id, "lab-7");
        assert_eq!(config.mqtt.port, 1883);
        assert!(config.logging.show_sensor_data);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn shipped_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config").join("relay.toml");
        let config = RelayConfig::load(path).unwrap();
        assert_eq!(config.mqtt.device_id, "G.231.22.0002");
        assert_eq!(config.mqtt.username, None);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(RelayConfig::parse("[mqtt]\nport = \"nope\"").is_err());
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("MQTT_BROKER", "mqtt.internal"),
            ("MQTT_PORT", "8883"),
            ("MQTT_USER", "usm"),
            ("MQTT_PASS", " secret "),
            ("MQTT_TOPIC", ""),
        ]
        .into_iter()
        .collect();

        let config = RelayConfig::default()
            .with_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.mqtt.broker, "mqtt.internal");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.username.as_deref(), Some("usm"));
        assert_eq!(config.mqtt.password.as_deref(), Some("secret"));
        // empty values do not override
        assert_eq!(config.mqtt.topic, "iot/G.231.22.0002");
    }

    #[test]
    fn client_ids_carry_random_suffix() {
        let mqtt = MqttConfig::default();
        let id = mqtt.client_id();
        assert!(id.starts_with("web_dashboard_"));
        assert_eq!(id.len(), "web_dashboard_".len() + 8);
    }
}
