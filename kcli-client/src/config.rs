//! Configuration types for the kcli client

use std::time::Duration;

/// Environment variable holding the SASL username
pub const ENV_USERNAME: &str = "KCLI_USERNAME";
/// Environment variable holding the SASL password
pub const ENV_PASSWORD: &str = "KCLI_PASSWORD";
/// Environment variable holding the client certificate path
pub const ENV_CERT_FILE: &str = "KCLI_CERT_FILE";
/// Environment variable holding the client private key path
pub const ENV_KEY_FILE: &str = "KCLI_KEY_FILE";
/// Environment variable holding the CA bundle path
pub const ENV_CA_CERT_FILE: &str = "KCLI_CA_CERT_FILE";

/// Default size of the topic search worker pool
pub const DEFAULT_CONCURRENCY: usize = 20;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// List of broker addresses
    pub brokers: Vec<String>,
    /// Connection timeout
    pub connection_timeout: Duration,
    /// Request timeout
    pub request_timeout: Duration,
    /// Longest single wait for the next message before re-polling
    pub poll_timeout: Duration,
    /// Number of topic search workers
    pub concurrency: usize,
    /// Maximum bytes requested per fetch
    pub fetch_max_bytes: u32,
    /// Maximum time the broker may hold a fetch open
    pub fetch_max_wait: Duration,
    /// Ordering applied to topic search results
    pub result_order: ResultOrder,
    /// Security configuration
    pub security: SecurityConfig,
    /// Client identifier
    pub client_id: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            connection_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            poll_timeout: Duration::from_secs(1),
            concurrency: DEFAULT_CONCURRENCY,
            fetch_max_bytes: 1024 * 1024,           // 1MB
            fetch_max_wait: Duration::from_millis(500),
            result_order: ResultOrder::default(),
            security: SecurityConfig::default(),
            client_id: None,
        }
    }
}

/// Credentials and certificate locations.
///
/// A username turns on SCRAM authentication; all three file paths turn on
/// mutual TLS. Anything left unset simply leaves the feature off.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Client certificate chain (PEM)
    pub cert_file: Option<String>,
    /// Client private key (PEM)
    pub key_file: Option<String>,
    /// CA bundle used to verify the broker (PEM)
    pub ca_cert_file: Option<String>,
}

impl SecurityConfig {
    /// Read credentials and certificate paths from the `KCLI_*` variables.
    ///
    /// Meant for binaries; the client itself never looks at the environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SecurityConfig::from_env`] with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        Self {
            username: get(ENV_USERNAME),
            password: get(ENV_PASSWORD),
            cert_file: get(ENV_CERT_FILE),
            key_file: get(ENV_KEY_FILE),
            ca_cert_file: get(ENV_CA_CERT_FILE),
        }
    }

    pub fn credentials<U: Into<String>, P: Into<String>>(mut self, username: U, password: P) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn certificates<S: Into<String>>(mut self, cert_file: S, key_file: S, ca_cert_file: S) -> Self {
        self.cert_file = Some(cert_file.into());
        self.key_file = Some(key_file.into());
        self.ca_cert_file = Some(ca_cert_file.into());
        self
    }
}

/// How topic search results are ordered before they are returned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResultOrder {
    /// Lexicographic on the compact JSON form of each partition
    Serialized,
    /// Ascending partition index
    #[default]
    PartitionIndex,
}

/// Builder for ClientConfig
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn brokers<I, S>(mut self, brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.brokers = brokers.into_iter().map(|s| s.into()).collect();
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_timeout = timeout;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    pub fn fetch_max_bytes(mut self, max_bytes: u32) -> Self {
        self.config.fetch_max_bytes = max_bytes;
        self
    }

    pub fn fetch_max_wait(mut self, max_wait: Duration) -> Self {
        self.config.fetch_max_wait = max_wait;
        self
    }

    pub fn result_order(mut self, order: ResultOrder) -> Self {
        self.config.result_order = order;
        self
    }

    pub fn security(mut self, security: SecurityConfig) -> Self {
        self.config.security = security;
        self
    }

    pub fn client_id<S: Into<String>>(mut self, client_id: S) -> Self {
        self.config.client_id = Some(client_id.into());
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}
