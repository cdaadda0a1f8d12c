//! PayPal webhook signature verification and certificate caching

pub mod cert_cache;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod verify;
pub mod webhooks;

pub use cert_cache::{cache_key, CertCache, CertError, CertUrlPolicy, DEFAULT_CERT_HOSTS};
pub use verify::{body_checksum, AuthAlgo, VerifyError, WebhookHeaders, WebhookVerifier};
pub use webhooks::WebhookEvent;
