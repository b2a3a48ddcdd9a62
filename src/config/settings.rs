use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct Settings {
    pub relay: RelaySettings,
    pub transport: TransportSettings,
    pub broker: BrokerSettings,
    pub adapter: AdapterSettings,
    pub logging: LoggingSettings,
}

/// Where the channel relay binds and how it authenticates clients.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RelaySettings {
    pub host: String,
    pub port: u16,
    /// HS256 secret; `None` runs an open relay.
    pub jwt_secret: Option<String>,
}

/// Client-side channel transport.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TransportSettings {
    pub url: String,
    pub token: Option<String>,
    pub client_name: String,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    /// Consecutive failed reconnects before a health-check failure is logged.
    pub health_failure_threshold: u32,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    /// Envelopes buffered per subscription before new ones are dropped.
    pub subscription_queue_capacity: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AdapterSettings {
    pub terminal_retry_attempts: u32,
    pub terminal_retry_base_ms: u64,
    pub dedup_capacity: usize,
    pub dedup_ttl_secs: u64,
    /// When set, coordination dedup state is kept in sled at this path.
    pub dedup_path: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            jwt_secret: None,
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080".to_string(),
            token: None,
            client_name: "queuebus".to_string(),
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 30_000,
            health_failure_threshold: 10,
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            subscription_queue_capacity: 1024,
        }
    }
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            terminal_retry_attempts: 3,
            terminal_retry_base_ms: 2_000,
            dedup_capacity: 10_000,
            dedup_ttl_secs: 24 * 60 * 60,
            dedup_path: None,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Settings as read from files and the environment; anything missing falls
/// back to the defaults above.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub relay: Option<PartialRelaySettings>,
    pub transport: Option<PartialTransportSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub adapter: Option<PartialAdapterSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialRelaySettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub jwt_secret: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialTransportSettings {
    pub url: Option<String>,
    pub token: Option<String>,
    pub client_name: Option<String>,
    pub reconnect_base_ms: Option<u64>,
    pub reconnect_max_ms: Option<u64>,
    pub health_failure_threshold: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub subscription_queue_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialAdapterSettings {
    pub terminal_retry_attempts: Option<u32>,
    pub terminal_retry_base_ms: Option<u64>,
    pub dedup_capacity: Option<usize>,
    pub dedup_ttl_secs: Option<u64>,
    pub dedup_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl PartialSettings {
    pub fn merge_over(self, default: Settings) -> Settings {
        let relay = self.relay.unwrap_or_default();
        let transport = self.transport.unwrap_or_default();
        let broker = self.broker.unwrap_or_default();
        let adapter = self.adapter.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();

        Settings {
            relay: RelaySettings {
                host: relay.host.unwrap_or(default.relay.host),
                port: relay.port.unwrap_or(default.relay.port),
                jwt_secret: relay.jwt_secret.or(default.relay.jwt_secret),
            },
            transport: TransportSettings {
                url: transport.url.unwrap_or(default.transport.url),
                token: transport.token.or(default.transport.token),
                client_name: transport
                    .client_name
                    .unwrap_or(default.transport.client_name),
                reconnect_base_ms: transport
                    .reconnect_base_ms
                    .unwrap_or(default.transport.reconnect_base_ms),
                reconnect_max_ms: transport
                    .reconnect_max_ms
                    .unwrap_or(default.transport.reconnect_max_ms),
                health_failure_threshold: transport
                    .health_failure_threshold
                    .unwrap_or(default.transport.health_failure_threshold),
            },
            broker: BrokerSettings {
                subscription_queue_capacity: broker
                    .subscription_queue_capacity
                    .unwrap_or(default.broker.subscription_queue_capacity),
            },
            adapter: AdapterSettings {
                terminal_retry_attempts: adapter
                    .terminal_retry_attempts
                    .unwrap_or(default.adapter.terminal_retry_attempts),
                terminal_retry_base_ms: adapter
                    .terminal_retry_base_ms
                    .unwrap_or(default.adapter.terminal_retry_base_ms),
                dedup_capacity: adapter
                    .dedup_capacity
                    .unwrap_or(default.adapter.dedup_capacity),
                dedup_ttl_secs: adapter
                    .dedup_ttl_secs
                    .unwrap_or(default.adapter.dedup_ttl_secs),
                dedup_path: adapter.dedup_path.or(default.adapter.dedup_path),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(default.logging.level),
            },
        }
    }
}
