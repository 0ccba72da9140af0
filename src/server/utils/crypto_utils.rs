use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use aes::Aes256;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

const NONCE_LEN: usize = 16;
const TAG_LEN: usize = 32;

const ENC_KEY_LABEL: &[u8] = b"mediaflow-token-enc";
const MAC_KEY_LABEL: &[u8] = b"mediaflow-token-mac";

/// flattened forwarding instructions, ordered so the serialized form is stable
pub type TokenPayload = BTreeMap<String, String>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token failed authentication")]
    Authentication,

    #[error("token has expired")]
    Expired,

    #[error("token is bound to a different ip address")]
    IpMismatch,
}

/// constraints sealed inside a token next to the payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessWindow {
    /// absolute unix timestamp, none means the token never expires
    pub expires_at: Option<i64>,
    pub ip: Option<String>,
}

impl AccessWindow {
    /// seconds left before expiry, used when minting follow-up tokens
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> Option<u64> {
        self.expires_at
            .map(|expires_at| expires_at.saturating_sub(now.timestamp()).max(1) as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedToken {
    pub payload: TokenPayload,
    pub access: AccessWindow,
}

#[derive(Serialize, Deserialize)]
struct SealedPayload {
    data: TokenPayload,
    exp: Option<i64>,
    ip: Option<String>,
}

/// encrypt-then-mac token cipher (aes-256-ctr + hmac-sha256)
///
/// built once from the configured secret and shared read-only between requests.
/// token layout before base64: nonce (16) || ciphertext || tag (32)
pub struct EncryptionHandler {
    enc_key: [u8; 32],
    mac_key: [u8; 32],
}

impl fmt::Debug for EncryptionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionHandler").finish_non_exhaustive()
    }
}

impl EncryptionHandler {
    pub fn new(secret: &str) -> Self {
        let master = Sha256::digest(secret.as_bytes());

        Self {
            enc_key: derive_key(&master, ENC_KEY_LABEL),
            mac_key: derive_key(&master, MAC_KEY_LABEL),
        }
    }

    pub fn encrypt(
        &self,
        payload: &TokenPayload,
        expiration: Option<u64>,
        ip: Option<&str>,
    ) -> String {
        self.encrypt_at(payload, expiration, ip, Utc::now())
    }

    pub fn encrypt_at(
        &self,
        payload: &TokenPayload,
        expiration: Option<u64>,
        ip: Option<&str>,
        now: DateTime<Utc>,
    ) -> String {
        let sealed = SealedPayload {
            data: payload.clone(),
            exp: expiration.map(|seconds| expires_at(now, seconds)),
            ip: ip.map(str::to_string),
        };

        let mut buffer =
            serde_json::to_vec(&sealed).expect("string maps always serialize to json");

        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce);

        let mut cipher = Aes256Ctr::new(&self.enc_key.into(), &nonce.into());
        cipher.apply_keystream(&mut buffer);

        let tag = self.mac(&nonce, &buffer).finalize().into_bytes();

        let mut token = Vec::with_capacity(NONCE_LEN + buffer.len() + TAG_LEN);
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&buffer);
        token.extend_from_slice(&tag);

        URL_SAFE_NO_PAD.encode(token)
    }

    pub fn decrypt(
        &self,
        token: &str,
        client_ip: Option<&str>,
    ) -> Result<TokenPayload, TokenError> {
        self.open(token, client_ip).map(|opened| opened.payload)
    }

    pub fn open(&self, token: &str, client_ip: Option<&str>) -> Result<OpenedToken, TokenError> {
        self.decrypt_at(token, client_ip, Utc::now())
    }

    pub fn decrypt_at(
        &self,
        token: &str,
        client_ip: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<OpenedToken, TokenError> {
        // tolerate padded tokens from clients that re-pad base64
        let raw = URL_SAFE_NO_PAD
            .decode(token.trim_end_matches('='))
            .map_err(|e| {
                debug!("token is not valid base64: {}", e);
                TokenError::Authentication
            })?;

        if raw.len() < NONCE_LEN + TAG_LEN {
            debug!("token too short: {} bytes", raw.len());
            return Err(TokenError::Authentication);
        }

        let (nonce, rest) = raw.split_at(NONCE_LEN);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);

        self.mac(nonce, ciphertext)
            .verify_slice(tag)
            .map_err(|_| TokenError::Authentication)?;

        let nonce: [u8; NONCE_LEN] = nonce.try_into().map_err(|_| TokenError::Authentication)?;
        let mut plaintext = ciphertext.to_vec();
        let mut cipher = Aes256Ctr::new(&self.enc_key.into(), &nonce.into());
        cipher.apply_keystream(&mut plaintext);

        let sealed: SealedPayload = serde_json::from_slice(&plaintext).map_err(|e| {
            debug!("authenticated token carries an unreadable payload: {}", e);
            TokenError::Authentication
        })?;

        if let Some(expires_at) = sealed.exp {
            if now.timestamp() > expires_at {
                return Err(TokenError::Expired);
            }
        }

        if let Some(bound) = sealed.ip.as_deref() {
            if !client_ip.is_some_and(|client| same_ip(bound, client)) {
                return Err(TokenError::IpMismatch);
            }
        }

        Ok(OpenedToken {
            payload: sealed.data,
            access: AccessWindow {
                expires_at: sealed.exp,
                ip: sealed.ip,
            },
        })
    }

    fn mac(&self, nonce: &[u8], ciphertext: &[u8]) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.mac_key).expect("HMAC can take key of any size");
        mac.update(nonce);
        mac.update(ciphertext);
        mac
    }
}

/// saturates instead of wrapping so a huge lifetime never mints a dead token
fn expires_at(now: DateTime<Utc>, seconds: u64) -> i64 {
    i64::try_from(seconds)
        .ok()
        .and_then(|seconds| now.timestamp().checked_add(seconds))
        .unwrap_or(i64::MAX)
}

fn derive_key(master: &[u8], label: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(master).expect("HMAC can take key of any size");
    mac.update(label);

    let mut key = [0u8; 32];
    key.copy_from_slice(&mac.finalize().into_bytes());
    key
}

/// compares parsed addresses so ipv4-mapped ipv6 matches its ipv4 form
fn same_ip(bound: &str, client: &str) -> bool {
    match (bound.trim().parse::<IpAddr>(), client.trim().parse::<IpAddr>()) {
        (Ok(a), Ok(b)) => a.to_canonical() == b.to_canonical(),
        _ => bound.trim() == client.trim(),
    }
}
