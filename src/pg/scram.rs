//! SCRAM-SHA-256 authentication.
//!
//! Implements RFC 5802 (SCRAM) and RFC 7677 (SCRAM-SHA-256) without channel
//! binding, which is what PostgreSQL offers over plaintext connections.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// SASL mechanism name announced by the server.
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// GS2 header for "no channel binding, no authzid".
const GS2_HEADER: &str = "n,,";

/// SCRAM authentication errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScramError {
    #[error("Invalid server message")]
    InvalidServerMessage,
    #[error("Invalid salt encoding")]
    InvalidSalt,
    #[error("Invalid iteration count")]
    InvalidIterations,
    #[error("Missing {0} in server message")]
    MissingAttribute(&'static str),
    #[error("Server nonce does not extend the client nonce")]
    NonceVerificationFailed,
    #[error("Server signature verification failed")]
    ServerSignatureVerificationFailed,
    #[error("Server final message arrived before the first")]
    InvalidState,
}

/// Client side of one SCRAM-SHA-256 exchange.
pub struct ScramClient {
    username: String,
    password: String,
    client_nonce: String,
    /// Set once the server-first message has been processed.
    verifier: Option<([u8; 32], String)>,
}

impl ScramClient {
    pub fn new(username: &str, password: &str) -> Self {
        // 18 random bytes base64-encode to 24 characters.
        let nonce_bytes: [u8; 18] = rand::thread_rng().gen();
        Self::with_nonce(username, password, BASE64.encode(nonce_bytes))
    }

    fn with_nonce(username: &str, password: &str, client_nonce: String) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            client_nonce,
            verifier: None,
        }
    }

    fn client_first_bare(&self) -> String {
        // PostgreSQL ignores the SCRAM user name in favour of the startup user.
        format!("n={},r={}", escape_username(&self.username), self.client_nonce)
    }

    /// client-first-message: `n,,n=<user>,r=<client-nonce>`
    pub fn client_first_message(&self) -> Vec<u8> {
        format!("{GS2_HEADER}{}", self.client_first_bare()).into_bytes()
    }

    /// Consume server-first-message (`r=<nonce>,s=<salt>,i=<iterations>`)
    /// and produce client-final-message.
    pub fn process_server_first(&mut self, server_msg: &[u8]) -> Result<Vec<u8>, ScramError> {
        let server_first =
            std::str::from_utf8(server_msg).map_err(|_| ScramError::InvalidServerMessage)?;

        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;

        for part in server_first.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                nonce = Some(value);
            } else if let Some(value) = part.strip_prefix("s=") {
                salt = Some(BASE64.decode(value).map_err(|_| ScramError::InvalidSalt)?);
            } else if let Some(value) = part.strip_prefix("i=") {
                let count = value
                    .parse::<u32>()
                    .map_err(|_| ScramError::InvalidIterations)?;
                if count == 0 {
                    return Err(ScramError::InvalidIterations);
                }
                iterations = Some(count);
            }
        }

        let combined_nonce = nonce.ok_or(ScramError::MissingAttribute("nonce"))?;
        let salt = salt.ok_or(ScramError::MissingAttribute("salt"))?;
        let iterations = iterations.ok_or(ScramError::MissingAttribute("iteration count"))?;

        if !combined_nonce.starts_with(&self.client_nonce)
            || combined_nonce.len() == self.client_nonce.len()
        {
            return Err(ScramError::NonceVerificationFailed);
        }

        let salted_password = hi(&self.password, &salt, iterations);
        let client_key = hmac_sha256(&salted_password, b"Client Key");
        let stored_key = sha256(&client_key);

        // "biws" is base64 of the GS2 header.
        let client_final_without_proof = format!("c=biws,r={combined_nonce}");
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_first,
            client_final_without_proof
        );

        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
        let mut client_proof = client_key;
        for (p, s) in client_proof.iter_mut().zip(client_signature) {
            *p ^= s;
        }

        self.verifier = Some((salted_password, auth_message));

        Ok(format!(
            "{client_final_without_proof},p={}",
            BASE64.encode(client_proof)
        )
        .into_bytes())
    }

    /// Check server-final-message (`v=<server-signature>`).
    pub fn verify_server_final(&self, server_msg: &[u8]) -> Result<(), ScramError> {
        let (salted_password, auth_message) =
            self.verifier.as_ref().ok_or(ScramError::InvalidState)?;

        let server_final =
            std::str::from_utf8(server_msg).map_err(|_| ScramError::InvalidServerMessage)?;
        let signature = server_final
            .strip_prefix("v=")
            .and_then(|v| BASE64.decode(v).ok())
            .ok_or(ScramError::InvalidServerMessage)?;

        let server_key = hmac_sha256(salted_password, b"Server Key");
        let mut mac = new_mac(&server_key);
        mac.update(auth_message.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| ScramError::ServerSignatureVerificationFailed)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Hi() from RFC 5802: PBKDF2 with HMAC-SHA-256.
fn hi(password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut output = [0u8; 32];
    pbkdf2::pbkdf2::<HmacSha256>(password.as_bytes(), salt, iterations, &mut output)
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    output
}

fn new_mac(key: &[u8]) -> HmacSha256 {
    <HmacSha256 as Mac>::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = new_mac(key);
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Escape `=` and `,` in a SCRAM user name.
fn escape_username(s: &str) -> String {
    s.replace('=', "=3D").replace(',', "=2C")
}
