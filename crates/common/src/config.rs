//! Application configuration

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Webhook ID PayPal assigned to this listener; part of every signed message
    pub webhook_id: String,
    pub host: String,
    pub port: u16,
    /// Route the webhook POSTs arrive on
    pub listen_path: String,
    /// Directory downloaded signing certificates are kept in
    pub cache_dir: PathBuf,
    pub cert_fetch_timeout: Duration,
    /// Certificate host allow-list; `None` means PayPal's own hosts
    pub cert_hosts: Option<Vec<String>>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let webhook_id = lookup("WEBHOOK_ID")
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| Error::Config("Missing WEBHOOK_ID in environment".to_string()))?;

        let port: u16 = match lookup("LISTEN_PORT") {
            Some(p) => p
                .parse()
                .map_err(|_| Error::Config(format!("Invalid LISTEN_PORT: {}", p)))?,
            None => 8888,
        };

        let listen_path = lookup("LISTEN_PATH").unwrap_or_else(|| "/".to_string());
        if !listen_path.starts_with('/') {
            return Err(Error::Config(format!(
                "LISTEN_PATH must start with '/': {}",
                listen_path
            )));
        }

        let timeout_secs: u64 = match lookup("CERT_FETCH_TIMEOUT_SECS") {
            Some(t) => t
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| Error::Config(format!("Invalid CERT_FETCH_TIMEOUT_SECS: {}", t)))?,
            None => 10,
        };

        let cert_hosts = lookup("PAYPAL_CERT_HOSTS").map(|hosts| {
            hosts
                .split(',')
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect::<Vec<_>>()
        });
        if let Some(hosts) = &cert_hosts {
            if hosts.is_empty() {
                return Err(Error::Config("PAYPAL_CERT_HOSTS is empty".to_string()));
            }
            warn!("Certificate host allow-list overridden: {}", hosts.join(", "));
        }

        Ok(Self {
            webhook_id,
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            listen_path,
            cache_dir: lookup("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            cert_fetch_timeout: Duration::from_secs(timeout_secs),
            cert_hosts,
        })
    }
}
