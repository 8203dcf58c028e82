//! SASL/SCRAM client conversation
//!
//! Computes the tokens of a SCRAM (RFC 5802) exchange. The conversation moves
//! through three calls to [`ScramClient::step`]:
//!
//! 1. `step("")` produces the client-first message
//! 2. `step(server_first)` produces the client-final message with the proof
//! 3. `step(server_final)` verifies the server signature and finishes
//!
//! No I/O happens here; the caller ships the tokens. Broker connections made
//! by [`BrokerTransport`](crate::transport::BrokerTransport) let librdkafka run
//! the same exchange, configured with [`ScramMechanism::name`].
//! A client is good for exactly one authentication attempt.

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256, Sha512};

use crate::error::KcliError;
use crate::Result;

/// Lowest iteration count accepted from a server
pub const MIN_ITERATIONS: u32 = 4096;

const NONCE_LENGTH: usize = 24;

/// Hash function backing the SCRAM exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScramMechanism {
    Sha256,
    Sha512,
}

impl ScramMechanism {
    /// Mechanism name as negotiated in the SASL handshake
    pub fn name(&self) -> &'static str {
        match self {
            ScramMechanism::Sha256 => "SCRAM-SHA-256",
            ScramMechanism::Sha512 => "SCRAM-SHA-512",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "SCRAM-SHA-256" => Ok(ScramMechanism::Sha256),
            "SCRAM-SHA-512" => Ok(ScramMechanism::Sha512),
            _ => Err(KcliError::auth(format!("unsupported mechanism: {}", name))),
        }
    }

    fn hash(&self, data: &[u8]) -> Vec<u8> {
        match self {
            ScramMechanism::Sha256 => Sha256::digest(data).to_vec(),
            ScramMechanism::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    fn hmac(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let out = match self {
            ScramMechanism::Sha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key)
                    .map_err(|e| KcliError::auth(e.to_string()))?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            ScramMechanism::Sha512 => {
                let mut mac = Hmac::<Sha512>::new_from_slice(key)
                    .map_err(|e| KcliError::auth(e.to_string()))?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        };
        Ok(out)
    }

    /// Constant-time check of an HMAC tag
    fn verify_hmac(&self, key: &[u8], data: &[u8], tag: &[u8]) -> Result<bool> {
        let ok = match self {
            ScramMechanism::Sha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key)
                    .map_err(|e| KcliError::auth(e.to_string()))?;
                mac.update(data);
                mac.verify_slice(tag).is_ok()
            }
            ScramMechanism::Sha512 => {
                let mut mac = Hmac::<Sha512>::new_from_slice(key)
                    .map_err(|e| KcliError::auth(e.to_string()))?;
                mac.update(data);
                mac.verify_slice(tag).is_ok()
            }
        };
        Ok(ok)
    }

    fn salted_password(&self, password: &str, salt: &[u8], iterations: u32) -> Vec<u8> {
        match self {
            ScramMechanism::Sha256 => {
                let mut out = vec![0u8; 32];
                pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
                out
            }
            ScramMechanism::Sha512 => {
                let mut out = vec![0u8; 64];
                pbkdf2_hmac::<Sha512>(password.as_bytes(), salt, iterations, &mut out);
                out
            }
        }
    }
}

/// Externally visible progress of a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScramState {
    Uninitialized,
    InProgress,
    Done,
}

#[derive(Debug)]
enum Conversation {
    Uninitialized,
    /// `begin` succeeded, client-first not yet produced
    Started {
        gs2_header: String,
        client_first_bare: String,
        client_nonce: String,
        password: String,
    },
    /// Waiting for the server-first message
    AwaitingServerFirst {
        gs2_header: String,
        client_first_bare: String,
        client_nonce: String,
        password: String,
    },
    /// Waiting for the server-final message
    AwaitingServerFinal {
        server_key: Vec<u8>,
        auth_message: String,
    },
    Done,
    Failed,
}

/// Client half of a SCRAM conversation
#[derive(Debug)]
pub struct ScramClient {
    mechanism: ScramMechanism,
    conversation: Conversation,
}

impl ScramClient {
    pub fn new(mechanism: ScramMechanism) -> Self {
        Self {
            mechanism,
            conversation: Conversation::Uninitialized,
        }
    }

    pub fn mechanism(&self) -> ScramMechanism {
        self.mechanism
    }

    /// Start a fresh conversation for the given credentials
    pub fn begin(&mut self, username: &str, password: &str, authz_id: &str) -> Result<()> {
        let mut nonce = [0u8; NONCE_LENGTH];
        getrandom::getrandom(&mut nonce)
            .map_err(|e| KcliError::auth(format!("failed to generate nonce: {}", e)))?;
        self.begin_with_nonce(username, password, authz_id, STANDARD.encode(nonce))
    }

    fn begin_with_nonce(
        &mut self,
        username: &str,
        password: &str,
        authz_id: &str,
        client_nonce: String,
    ) -> Result<()> {
        if username.is_empty() {
            return Err(KcliError::auth("username must not be empty"));
        }
        if [username, password, authz_id].iter().any(|s| s.contains('\0')) {
            return Err(KcliError::auth("credentials must not contain NUL bytes"));
        }

        let gs2_header = if authz_id.is_empty() {
            "n,,".to_string()
        } else {
            format!("n,a={},", escape_name(authz_id))
        };
        let client_first_bare = format!("n={},r={}", escape_name(username), client_nonce);

        self.conversation = Conversation::Started {
            gs2_header,
            client_first_bare,
            client_nonce,
            password: password.to_string(),
        };
        Ok(())
    }

    /// Consume one server challenge and produce the matching response
    pub fn step(&mut self, challenge: &str) -> Result<String> {
        let conversation = std::mem::replace(&mut self.conversation, Conversation::Failed);

        let (response, next) = match conversation {
            Conversation::Uninitialized => {
                self.conversation = Conversation::Uninitialized;
                return Err(KcliError::auth("conversation not started"));
            }
            Conversation::Started {
                gs2_header,
                client_first_bare,
                client_nonce,
                password,
            } => (
                format!("{}{}", gs2_header, client_first_bare),
                Conversation::AwaitingServerFirst {
                    gs2_header,
                    client_first_bare,
                    client_nonce,
                    password,
                },
            ),
            Conversation::AwaitingServerFirst {
                gs2_header,
                client_first_bare,
                client_nonce,
                password,
            } => self.client_final(
                challenge,
                &gs2_header,
                &client_first_bare,
                &client_nonce,
                &password,
            )?,
            Conversation::AwaitingServerFinal {
                server_key,
                auth_message,
            } => {
                self.verify_server_final(challenge, &server_key, &auth_message)?;
                (String::new(), Conversation::Done)
            }
            Conversation::Done => {
                self.conversation = Conversation::Done;
                return Err(KcliError::auth("conversation already finished"));
            }
            Conversation::Failed => return Err(KcliError::auth("conversation failed")),
        };

        self.conversation = next;
        Ok(response)
    }

    /// Whether the server signature has been verified
    pub fn done(&self) -> bool {
        matches!(self.conversation, Conversation::Done)
    }

    pub fn state(&self) -> ScramState {
        match self.conversation {
            Conversation::Uninitialized => ScramState::Uninitialized,
            Conversation::Done => ScramState::Done,
            _ => ScramState::InProgress,
        }
    }

    fn client_final(
        &self,
        server_first: &str,
        gs2_header: &str,
        client_first_bare: &str,
        client_nonce: &str,
        password: &str,
    ) -> Result<(String, Conversation)> {
        let parsed = ServerFirst::parse(server_first)?;

        if !parsed.nonce.starts_with(client_nonce) || parsed.nonce.len() == client_nonce.len() {
            return Err(KcliError::auth("server nonce does not extend client nonce"));
        }
        if parsed.iterations < MIN_ITERATIONS {
            return Err(KcliError::auth(format!(
                "iteration count {} below minimum {}",
                parsed.iterations, MIN_ITERATIONS
            )));
        }

        let mech = self.mechanism;
        let salted_password = mech.salted_password(password, &parsed.salt, parsed.iterations);
        let client_key = mech.hmac(&salted_password, b"Client Key")?;
        let stored_key = mech.hash(&client_key);
        let server_key = mech.hmac(&salted_password, b"Server Key")?;

        let without_proof = format!(
            "c={},r={}",
            STANDARD.encode(gs2_header.as_bytes()),
            parsed.nonce
        );
        let auth_message = format!("{},{},{}", client_first_bare, server_first, without_proof);

        let client_signature = mech.hmac(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        let response = format!("{},p={}", without_proof, STANDARD.encode(proof));
        Ok((
            response,
            Conversation::AwaitingServerFinal {
                server_key,
                auth_message,
            },
        ))
    }

    fn verify_server_final(
        &self,
        server_final: &str,
        server_key: &[u8],
        auth_message: &str,
    ) -> Result<()> {
        if let Some(reason) = server_final.strip_prefix("e=") {
            return Err(KcliError::auth(format!("server rejected authentication: {}", reason)));
        }

        let signature = server_final
            .split(',')
            .find_map(|attr| attr.strip_prefix("v="))
            .ok_or_else(|| KcliError::auth("server-final message has no verifier"))?;
        let signature = STANDARD
            .decode(signature)
            .map_err(|e| KcliError::auth(format!("invalid server signature encoding: {}", e)))?;

        if !self
            .mechanism
            .verify_hmac(server_key, auth_message.as_bytes(), &signature)?
        {
            return Err(KcliError::auth("server signature mismatch"));
        }
        Ok(())
    }
}

struct ServerFirst {
    nonce: String,
    salt: Vec<u8>,
    iterations: u32,
}

impl ServerFirst {
    fn parse(message: &str) -> Result<Self> {
        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;

        for attr in message.split(',') {
            let (key, value) = attr
                .split_once('=')
                .ok_or_else(|| KcliError::auth(format!("invalid attribute: {}", attr)))?;
            match key {
                "m" => return Err(KcliError::auth("unsupported mandatory extension")),
                "r" => nonce = Some(value.to_string()),
                "s" => {
                    salt = Some(
                        STANDARD
                            .decode(value)
                            .map_err(|e| KcliError::auth(format!("invalid salt: {}", e)))?,
                    )
                }
                "i" => {
                    iterations = Some(value.parse::<u32>().map_err(|_| {
                        KcliError::auth(format!("invalid iteration count: {}", value))
                    })?)
                }
                _ => {}
            }
        }

        Ok(Self {
            nonce: nonce.ok_or_else(|| KcliError::auth("server-first message missing nonce"))?,
            salt: salt.ok_or_else(|| KcliError::auth("server-first message missing salt"))?,
            iterations: iterations
                .ok_or_else(|| KcliError::auth("server-first message missing iteration count"))?,
        })
    }
}

/// `saslname` escaping from RFC 5802 section 5.1
fn escape_name(name: &str) -> String {
    name.replace('=', "=3D").replace(',', "=2C")
}
