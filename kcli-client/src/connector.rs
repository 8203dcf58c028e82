//! Turns a [`ClientConfig`] into the resolved settings a transport connects with

use rdkafka::config::ClientConfig as KafkaConfig;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{ClientConfig, SecurityConfig};
use crate::error::KcliError;
use crate::scram::ScramMechanism;
use crate::tls::{self, TlsFiles, TlsMaterial};
use crate::Result;

/// SASL settings for SCRAM authentication
#[derive(Clone, PartialEq, Eq)]
pub struct SaslConfig {
    pub username: String,
    pub password: String,
    pub mechanism: ScramMechanism,
}

impl fmt::Debug for SaslConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaslConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("mechanism", &self.mechanism)
            .finish()
    }
}

/// Fully resolved connection settings, immutable once built
#[derive(Clone)]
pub struct ConnectionConfig {
    pub brokers: Vec<String>,
    pub client_id: Option<String>,
    pub connection_timeout: Duration,
    pub request_timeout: Duration,
    pub fetch_max_bytes: u32,
    pub fetch_max_wait: Duration,
    pub concurrency: usize,
    pub sasl: Option<SaslConfig>,
    pub tls: Option<TlsMaterial>,
}

impl ConnectionConfig {
    pub fn sasl_enabled(&self) -> bool {
        self.sasl.is_some()
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    pub fn security_protocol(&self) -> &'static str {
        match (self.sasl_enabled(), self.tls_enabled()) {
            (false, false) => "plaintext",
            (false, true) => "ssl",
            (true, false) => "sasl_plaintext",
            (true, true) => "sasl_ssl",
        }
    }

    /// Consumer group used for assignment bookkeeping; offsets are never committed
    pub fn group_id(&self) -> String {
        format!("{}-reader", self.client_id.as_deref().unwrap_or("kcli"))
    }

    /// Request timeout, raised so a long-polling fetch never outlives its socket
    fn socket_timeout(&self) -> Duration {
        self.request_timeout
            .max(self.fetch_max_wait + Duration::from_secs(1))
    }

    /// librdkafka settings for a manually assigned, non-committing consumer
    pub fn client_config(&self) -> KafkaConfig {
        let mut config = KafkaConfig::new();
        config
            .set("bootstrap.servers", self.brokers.join(","))
            .set("group.id", self.group_id())
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", "earliest")
            .set(
                "socket.connection.setup.timeout.ms",
                self.connection_timeout.as_millis().max(1000).to_string(),
            )
            .set("socket.timeout.ms", self.socket_timeout().as_millis().to_string())
            .set("max.partition.fetch.bytes", self.fetch_max_bytes.max(1).to_string())
            .set("fetch.wait.max.ms", self.fetch_max_wait.as_millis().to_string())
            .set("security.protocol", self.security_protocol());

        if let Some(client_id) = &self.client_id {
            config.set("client.id", client_id);
        }

        if let Some(sasl) = &self.sasl {
            config
                .set("sasl.mechanism", sasl.mechanism.name())
                .set("sasl.username", &sasl.username)
                .set("sasl.password", &sasl.password);
        }

        if let Some(tls) = &self.tls {
            config
                .set("ssl.certificate.pem", &tls.cert_pem)
                .set("ssl.key.pem", &tls.key_pem)
                .set("ssl.ca.pem", &tls.ca_pem);
        }

        config
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("brokers", &self.brokers)
            .field("client_id", &self.client_id)
            .field("concurrency", &self.concurrency)
            .field("sasl", &self.sasl)
            .field("tls", &self.tls_enabled())
            .finish()
    }
}

/// Builds [`ConnectionConfig`] values, loading and checking TLS material from disk.
///
/// No network traffic happens here.
pub struct SecureConnector<'a> {
    config: &'a ClientConfig,
}

impl<'a> SecureConnector<'a> {
    pub fn new(config: &'a ClientConfig) -> Self {
        Self { config }
    }

    pub fn build(&self) -> Result<ConnectionConfig> {
        let config = self.config;
        if config.concurrency == 0 {
            return Err(KcliError::invalid_config("concurrency must be at least 1"));
        }

        let sasl = sasl_config(&config.security);
        if let Some(sasl) = &sasl {
            info!(
                "SASL enabled for user {} using {}",
                sasl.username,
                sasl.mechanism.name()
            );
        }

        let tls = match TlsFiles::from_security(&config.security) {
            Some(files) => {
                let tls = tls::load_material(&files)?;
                info!("Mutual TLS enabled");
                Some(tls)
            }
            None => {
                let security = &config.security;
                let given = [
                    &security.cert_file,
                    &security.key_file,
                    &security.ca_cert_file,
                ]
                .iter()
                .filter(|p| p.is_some())
                .count();
                if given > 0 {
                    warn!(
                        "TLS disabled: only {} of certificate, key and CA paths are set",
                        given
                    );
                }
                None
            }
        };

        Ok(ConnectionConfig {
            brokers: config.brokers.clone(),
            client_id: config.client_id.clone(),
            connection_timeout: config.connection_timeout,
            request_timeout: config.request_timeout,
            fetch_max_bytes: config.fetch_max_bytes,
            fetch_max_wait: config.fetch_max_wait,
            concurrency: config.concurrency,
            sasl,
            tls,
        })
    }
}

fn sasl_config(security: &SecurityConfig) -> Option<SaslConfig> {
    let username = security.username.as_ref().filter(|u| !u.is_empty())?;
    Some(SaslConfig {
        username: username.clone(),
        password: security.password.clone().unwrap_or_default(),
        mechanism: ScramMechanism::Sha512,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfigBuilder;

    fn fixture(name: &str) -> String {
        format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
    }

    fn build(security: SecurityConfig) -> Result<ConnectionConfig> {
        let config = ClientConfigBuilder::new().security(security).build();
        SecureConnector::new(&config).build()
    }

    #[test]
    fn test_nothing_configured() {
        let conn = build(SecurityConfig::default()).unwrap();
        assert!(!conn.sasl_enabled());
        assert!(!conn.tls_enabled());
        assert_eq!(conn.concurrency, 20);
    }

    #[test]
    fn test_username_only_enables_sasl() {
        let conn = build(SecurityConfig {
            username: Some("alice".to_string()),
            ..Default::default()
        })
        .unwrap();

        assert!(conn.sasl_enabled());
        assert!(!conn.tls_enabled());

        let sasl = conn.sasl.unwrap();
        assert_eq!(sasl.username, "alice");
        assert_eq!(sasl.password, "");
        assert_eq!(sasl.mechanism, ScramMechanism::Sha512);
        assert!(!format!("{:?}", sasl).contains("secret"));
    }

    #[test]
    fn test_credentials_and_certificates_enable_both() {
        let security = SecurityConfig::default()
            .credentials("alice", "secret")
            .certificates(fixture("client.pem"), fixture("client.key"), fixture("ca.pem"));

        let conn = build(security).unwrap();
        assert!(conn.sasl_enabled());
        assert!(conn.tls_enabled());
        assert!(!format!("{:?}", conn).contains("secret"));

        let kafka = conn.client_config();
        assert_eq!(kafka.get("security.protocol"), Some("sasl_ssl"));
        assert_eq!(kafka.get("sasl.mechanism"), Some("SCRAM-SHA-512"));
        assert_eq!(kafka.get("sasl.username"), Some("alice"));
        assert_eq!(kafka.get("sasl.password"), Some("secret"));
        let ca = std::fs::read_to_string(fixture("ca.pem")).unwrap();
        assert_eq!(kafka.get("ssl.ca.pem"), Some(ca.as_str()));
        assert!(kafka.get("ssl.certificate.pem").unwrap().contains("BEGIN CERTIFICATE"));
        assert!(kafka.get("ssl.key.pem").unwrap().contains("PRIVATE KEY"));
    }

    #[test]
    fn test_client_config_mapping() {
        let config = ClientConfigBuilder::new()
            .brokers(vec!["b1:9092".to_string(), "b2:9092".to_string()])
            .client_id("inspector")
            .fetch_max_bytes(4096)
            .fetch_max_wait(Duration::from_millis(500))
            .request_timeout(Duration::from_millis(200))
            .build();
        let conn = SecureConnector::new(&config).build().unwrap();
        let kafka = conn.client_config();

        assert_eq!(kafka.get("bootstrap.servers"), Some("b1:9092,b2:9092"));
        assert_eq!(kafka.get("client.id"), Some("inspector"));
        assert_eq!(kafka.get("group.id"), Some("inspector-reader"));
        assert_eq!(kafka.get("enable.auto.commit"), Some("false"));
        assert_eq!(kafka.get("max.partition.fetch.bytes"), Some("4096"));
        assert_eq!(kafka.get("security.protocol"), Some("plaintext"));
        assert_eq!(kafka.get("fetch.wait.max.ms"), Some("500"));
        assert_eq!(kafka.get("socket.timeout.ms"), Some("1500"));
        assert_eq!(kafka.get("sasl.mechanism"), None);
        assert_eq!(kafka.get("ssl.ca.pem"), None);
    }

    #[test]
    fn test_security_protocol_per_mode() {
        let sasl_only = build(SecurityConfig::default().credentials("alice", "secret")).unwrap();
        assert_eq!(sasl_only.security_protocol(), "sasl_plaintext");

        let tls_only = build(SecurityConfig::default().certificates(
            fixture("client.pem"),
            fixture("client.key"),
            fixture("ca.pem"),
        ))
        .unwrap();
        assert_eq!(tls_only.security_protocol(), "ssl");
        assert_eq!(tls_only.client_config().get("sasl.username"), None);
    }

    #[test]
    fn test_partial_certificates_disable_tls() {
        let security = SecurityConfig {
            cert_file: Some(fixture("client.pem")),
            ca_cert_file: Some(fixture("ca.pem")),
            ..Default::default()
        };

        let conn = build(security).unwrap();
        assert!(!conn.tls_enabled());
    }

    #[test]
    fn test_unreadable_certificate_fails() {
        let security =
            SecurityConfig::default().certificates("/nonexistent/c.pem", "/nonexistent/k.pem", "/nonexistent/ca.pem");
        assert!(matches!(build(security), Err(KcliError::Io(_))));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = ClientConfigBuilder::new().concurrency(0).build();
        assert!(matches!(
            SecureConnector::new(&config).build(),
            Err(KcliError::InvalidConfig { .. })
        ));
    }
}
