//! Application state

use common::Config;
use paypal::{CertCache, CertError, CertUrlPolicy, WebhookVerifier};

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub verifier: WebhookVerifier,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, CertError> {
        let policy = match &config.cert_hosts {
            Some(hosts) => CertUrlPolicy::new(hosts.iter().cloned()),
            None => CertUrlPolicy::paypal(),
        };
        let certs = CertCache::new(config.cache_dir.clone(), policy, config.cert_fetch_timeout)?;
        let verifier = WebhookVerifier::new(config.webhook_id.clone(), certs);
        Ok(Self { config, verifier })
    }
}
