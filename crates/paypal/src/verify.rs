//! Webhook signature verification
//!
//! PayPal signs `<transmission id>|<transmission time>|<webhook id>|<crc32>`,
//! where `crc32` is the checksum of the raw request body written as an
//! unsigned decimal number.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use openssl::{hash::MessageDigest, pkey::Id, sign::Verifier};
use reqwest::header::HeaderMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cert_cache::{parse_certificate, CertCache, CertError};

pub const TRANSMISSION_ID: &str = "paypal-transmission-id";
pub const TRANSMISSION_TIME: &str = "paypal-transmission-time";
pub const CERT_URL: &str = "paypal-cert-url";
pub const TRANSMISSION_SIG: &str = "paypal-transmission-sig";
pub const AUTH_ALGO: &str = "paypal-auth-algo";

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("Missing header: {0}")]
    MissingHeader(&'static str),
    #[error("Header is not valid ASCII: {0}")]
    InvalidHeader(&'static str),
    #[error("Unsupported auth algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("Certificate key is not RSA: {0:?}")]
    UnsupportedKey(Id),
    #[error("Signature is not valid base64: {0}")]
    SignatureEncoding(#[from] base64::DecodeError),
    #[error("Certificate unavailable: {0}")]
    Certificate(#[from] CertError),
    #[error("OpenSSL error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),
    #[error("Signature does not match")]
    SignatureMismatch,
}

impl VerifyError {
    /// Download or cache failures, as opposed to a bad request
    pub fn is_transient(&self) -> bool {
        matches!(self, VerifyError::Certificate(e) if e.is_transient())
    }

    /// The headers were well formed but the signature did not verify
    pub fn is_mismatch(&self) -> bool {
        matches!(self, VerifyError::SignatureMismatch)
    }
}

/// Signature scheme named by the `paypal-auth-algo` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthAlgo {
    #[default]
    Sha256WithRsa,
    Sha384WithRsa,
    Sha512WithRsa,
}

impl AuthAlgo {
    pub fn parse(value: &str) -> Result<Self, VerifyError> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SHA256WITHRSA" => Ok(AuthAlgo::Sha256WithRsa),
            "SHA384WITHRSA" => Ok(AuthAlgo::Sha384WithRsa),
            "SHA512WITHRSA" => Ok(AuthAlgo::Sha512WithRsa),
            _ => Err(VerifyError::UnsupportedAlgorithm(value.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthAlgo::Sha256WithRsa => "SHA256withRSA",
            AuthAlgo::Sha384WithRsa => "SHA384withRSA",
            AuthAlgo::Sha512WithRsa => "SHA512withRSA",
        }
    }

    pub(crate) fn digest(&self) -> MessageDigest {
        match self {
            AuthAlgo::Sha256WithRsa => MessageDigest::sha256(),
            AuthAlgo::Sha384WithRsa => MessageDigest::sha384(),
            AuthAlgo::Sha512WithRsa => MessageDigest::sha512(),
        }
    }
}

/// The signature-related headers of one transmission
#[derive(Debug, Clone)]
pub struct WebhookHeaders {
    pub transmission_id: String,
    pub transmission_time: String,
    pub cert_url: String,
    pub transmission_sig: String,
    /// `SHA256withRSA` when the header is absent
    pub auth_algo: AuthAlgo,
}

impl WebhookHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, VerifyError> {
        let auth_algo = match header_str(headers, AUTH_ALGO)? {
            Some(value) => AuthAlgo::parse(value)?,
            None => AuthAlgo::default(),
        };

        Ok(Self {
            transmission_id: required(headers, TRANSMISSION_ID)?,
            transmission_time: required(headers, TRANSMISSION_TIME)?,
            cert_url: required(headers, CERT_URL)?,
            transmission_sig: required(headers, TRANSMISSION_SIG)?,
            auth_algo,
        })
    }

    /// The exact string PayPal signed for this transmission
    pub fn signed_message(&self, webhook_id: &str, body: &[u8]) -> String {
        signed_message(&self.transmission_id, &self.transmission_time, webhook_id, body)
    }
}

fn header_str<'a>(
    headers: &'a HeaderMap,
    name: &'static str,
) -> Result<Option<&'a str>, VerifyError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(Some)
            .map_err(|_| VerifyError::InvalidHeader(name)),
    }
}

fn required(headers: &HeaderMap, name: &'static str) -> Result<String, VerifyError> {
    header_str(headers, name)?
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(VerifyError::MissingHeader(name))
}

/// CRC32 of the raw body as an unsigned decimal string.
///
/// Must stay unsigned: about half of all bodies have the high bit set, and a
/// signed rendering would produce a message PayPal never signed.
pub fn body_checksum(body: &[u8]) -> String {
    crc32fast::hash(body).to_string()
}

pub fn signed_message(
    transmission_id: &str,
    transmission_time: &str,
    webhook_id: &str,
    body: &[u8],
) -> String {
    format!(
        "{}|{}|{}|{}",
        transmission_id,
        transmission_time,
        webhook_id,
        body_checksum(body)
    )
}

/// Check `signature` over `message` with the public key of a PEM certificate
pub fn verify_with_certificate(
    cert_pem: &str,
    algo: AuthAlgo,
    message: &[u8],
    signature: &[u8],
) -> Result<(), VerifyError> {
    let cert = parse_certificate(cert_pem)?;
    let public_key = cert.public_key()?;
    // Every supported auth algorithm is RSA PKCS#1 v1.5
    if public_key.id() != Id::RSA {
        return Err(VerifyError::UnsupportedKey(public_key.id()));
    }

    let mut verifier = Verifier::new(algo.digest(), &public_key)?;
    verifier.update(message)?;

    if verifier.verify(signature)? {
        Ok(())
    } else {
        Err(VerifyError::SignatureMismatch)
    }
}

/// Verifies webhook transmissions for one configured webhook
#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    webhook_id: String,
    certs: CertCache,
}

impl WebhookVerifier {
    pub fn new(webhook_id: impl Into<String>, certs: CertCache) -> Self {
        Self {
            webhook_id: webhook_id.into(),
            certs,
        }
    }

    pub fn webhook_id(&self) -> &str {
        &self.webhook_id
    }

    pub fn certs(&self) -> &CertCache {
        &self.certs
    }

    /// `true` only if the transmission verifies. Every failure, including a
    /// missing header or an unreachable certificate, yields `false`.
    pub async fn verify(&self, body: &[u8], headers: &HeaderMap) -> bool {
        match self.check(body, headers).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Webhook verification failed: {}", e);
                false
            }
        }
    }

    /// Like [`verify`](Self::verify) but reports why verification failed
    pub async fn check(&self, body: &[u8], headers: &HeaderMap) -> Result<(), VerifyError> {
        let headers = WebhookHeaders::from_headers(headers)?;

        let message = headers.signed_message(&self.webhook_id, body);
        debug!("Signed message ({}): {}", headers.auth_algo.as_str(), message);

        let signature = BASE64.decode(headers.transmission_sig.as_bytes())?;
        let cert_pem = self.certs.fetch(&headers.cert_url, None).await?;

        verify_with_certificate(&cert_pem, headers.auth_algo, message.as_bytes(), &signature)
    }
}
