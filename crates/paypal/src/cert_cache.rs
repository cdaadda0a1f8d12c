//! Certificate download and on-disk cache
//!
//! Certificates are stored one file per key under the cache directory and are
//! never refreshed once written. There is no locking: two concurrent misses
//! for the same key may both download and both write. That is only safe while
//! the content behind a certificate URL never changes, so a rotated key must
//! be published under a new URL (PayPal does this) or the file removed by hand.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use openssl::x509::X509;
use reqwest::Url;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Hosts PayPal serves webhook signing certificates from
pub const DEFAULT_CERT_HOSTS: &[&str] = &[
    "api.paypal.com",
    "api-m.paypal.com",
    "api.sandbox.paypal.com",
    "api-m.sandbox.paypal.com",
];

const CERT_PATH_PREFIX: &str = "/v1/notifications/certs/";

#[derive(Error, Debug)]
pub enum CertError {
    #[error("Certificate URL rejected: {0}")]
    UrlRejected(String),
    #[error("Invalid certificate URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid cache key: {0:?}")]
    InvalidCacheKey(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Certificate download failed: {status} from {url}")]
    Status { status: u16, url: String },
    #[error("Empty certificate from {0}")]
    Empty(String),
    #[error("Not a PEM certificate: {0}")]
    InvalidCertificate(String),
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CertError {
    /// Whether the failure came from the network or the cache directory
    /// rather than from the certificate URL the caller supplied.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CertError::Http(_)
                | CertError::Status { .. }
                | CertError::Empty(_)
                | CertError::InvalidCertificate(_)
                | CertError::Io(_)
        )
    }
}

/// Which certificate URLs may be fetched at all.
///
/// The cert URL arrives in a request header, so anything outside the
/// allow-list is rejected before a connection is made.
#[derive(Debug, Clone)]
pub struct CertUrlPolicy {
    allowed_hosts: Vec<String>,
    path_prefix: Option<String>,
    allow_http: bool,
}

impl CertUrlPolicy {
    /// HTTPS only, on the given hosts, under PayPal's certificate path
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_hosts: hosts
                .into_iter()
                .map(|h| h.into().trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            path_prefix: Some(CERT_PATH_PREFIX.to_string()),
            allow_http: false,
        }
    }

    pub fn paypal() -> Self {
        Self::new(DEFAULT_CERT_HOSTS.iter().copied())
    }

    /// Also accept plain `http` URLs (local test servers)
    pub fn allow_http(mut self) -> Self {
        self.allow_http = true;
        self
    }

    /// Accept any path on an allowed host
    pub fn any_path(mut self) -> Self {
        self.path_prefix = None;
        self
    }

    pub fn allowed_hosts(&self) -> &[String] {
        &self.allowed_hosts
    }

    /// Parse `url` and check it against the policy
    pub fn check(&self, url: &str) -> Result<Url, CertError> {
        let parsed = Url::parse(url).map_err(|e| CertError::InvalidUrl(e.to_string()))?;

        match parsed.scheme() {
            "https" => {}
            "http" if self.allow_http => {}
            other => return Err(CertError::UrlRejected(format!("scheme {}", other))),
        }

        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(CertError::UrlRejected("credentials in URL".to_string()));
        }

        // Each distinct URL is a cache file and a download
        if parsed.query().is_some() || parsed.fragment().is_some() {
            return Err(CertError::UrlRejected("query or fragment in URL".to_string()));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| CertError::UrlRejected("missing host".to_string()))?
            .to_ascii_lowercase();
        if !self.allowed_hosts.iter().any(|allowed| *allowed == host) {
            return Err(CertError::UrlRejected(format!("host {}", host)));
        }

        if let Some(prefix) = &self.path_prefix {
            if !parsed.path().starts_with(prefix.as_str()) {
                return Err(CertError::UrlRejected(format!("path {}", parsed.path())));
            }
        }

        Ok(parsed)
    }
}

impl Default for CertUrlPolicy {
    fn default() -> Self {
        Self::paypal()
    }
}

/// Derive the cache key for a URL: every run of characters outside
/// `[A-Za-z0-9_]` becomes a single `_`.
pub fn cache_key(url: &str) -> String {
    let mut key = String::with_capacity(url.len());
    let mut in_run = false;
    for c in url.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            key.push(c);
            in_run = false;
        } else if !in_run {
            key.push('_');
            in_run = true;
        }
    }
    key
}

/// Parse PEM text as an X.509 certificate
pub fn parse_certificate(pem: &str) -> Result<X509, CertError> {
    X509::from_pem(pem.as_bytes()).map_err(|e| CertError::InvalidCertificate(e.to_string()))
}

fn validate_key(key: &str) -> Result<&str, CertError> {
    let bad = key.is_empty()
        || key.contains("..")
        || key.contains(|c: char| c == '/' || c == '\\' || c == '\0');
    if bad {
        return Err(CertError::InvalidCacheKey(key.to_string()));
    }
    Ok(key)
}

/// Downloads signing certificates and keeps them on disk
#[derive(Debug, Clone)]
pub struct CertCache {
    client: reqwest::Client,
    dir: PathBuf,
    policy: CertUrlPolicy,
}

impl CertCache {
    /// `timeout` bounds each download, connect included.
    pub fn new(
        dir: impl Into<PathBuf>,
        policy: CertUrlPolicy,
        timeout: Duration,
    ) -> Result<Self, CertError> {
        // Redirects could leave the allow-listed host
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("paypal-webhook-listener/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            dir: dir.into(),
            policy,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn policy(&self) -> &CertUrlPolicy {
        &self.policy
    }

    /// Return the PEM text for `url`, downloading it on a cache miss.
    ///
    /// `key` overrides the file name derived from the URL.
    pub async fn fetch(&self, url: &str, key: Option<&str>) -> Result<String, CertError> {
        let parsed = self.policy.check(url)?;
        let key = match key {
            Some(k) => validate_key(k)?.to_string(),
            None => cache_key(url),
        };
        let path = self.dir.join(&key);

        if let Some(cached) = read_cached(&path).await {
            debug!("Certificate cache hit: {}", key);
            return Ok(cached);
        }

        info!("Certificate cache miss, downloading {}", parsed);
        let pem = self.download(parsed).await?;
        write_atomic(&self.dir, &key, &pem).await?;
        debug!("Cached certificate at {}", path.display());

        Ok(pem)
    }

    async fn download(&self, url: Url) -> Result<String, CertError> {
        let resp = self.client.get(url.clone()).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(CertError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let pem = resp.text().await?;
        if pem.trim().is_empty() {
            return Err(CertError::Empty(url.to_string()));
        }
        // Entries are never refreshed, so only a real certificate gets cached
        parse_certificate(&pem)
            .map_err(|e| CertError::InvalidCertificate(format!("{} from {}", e, url)))?;
        Ok(pem)
    }
}

/// An unreadable or empty entry counts as a miss
async fn read_cached(path: &Path) -> Option<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) if !contents.is_empty() => Some(contents),
        Ok(_) => None,
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            warn!("Ignoring unreadable cache entry {}: {}", path.display(), e);
            None
        }
    }
}

async fn write_atomic(dir: &Path, key: &str, contents: &str) -> Result<(), CertError> {
    tokio::fs::create_dir_all(dir).await?;
    let tmp = dir.join(format!(".{}.{}.tmp", key, Uuid::new_v4()));
    tokio::fs::write(&tmp, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp, dir.join(key)).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{temp_cache_dir, TestSigner, TEST_CERT_URL};
    use axum::{http::StatusCode, Router};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn test_pem() -> String {
        TestSigner::generate().cert_pem().to_string()
    }

    /// Serve `body` with `status` on every path, counting requests
    async fn serve(status: StatusCode, body: impl Into<String>) -> (SocketAddr, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let body: String = body.into();
        let app = Router::new().fallback(move || {
            let counter = counter.clone();
            let body = body.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (status, body)
            }
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, hits)
    }

    fn local_cache(dir: &Path) -> CertCache {
        let policy = CertUrlPolicy::new(["127.0.0.1"]).allow_http();
        CertCache::new(dir, policy, Duration::from_secs(5)).unwrap()
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_cache_key_collapses_runs() {
        assert_eq!(cache_key("https://a.b/c?d=e"), "https_a_b_c_d_e");
        assert_eq!(cache_key("https://a.b/c?d=e"), cache_key("https://a_b_c_d_e"));
    }

    #[test]
    fn test_cache_key_paypal_url() {
        assert_eq!(
            cache_key("https://api.paypal.com/v1/notifications/certs/CERT-360caa42-fca2a594-1d93a270"),
            "https_api_paypal_com_v1_notifications_certs_CERT_360caa42_fca2a594_1d93a270"
        );
    }

    #[test]
    fn test_cache_key_non_ascii_is_separator() {
        assert_eq!(cache_key("a\u{e9}\u{e9}b"), "a_b");
    }

    #[test]
    fn test_policy_accepts_paypal_cert_url() {
        let policy = CertUrlPolicy::paypal();
        assert!(policy.check(TEST_CERT_URL).is_ok());
        assert!(policy
            .check("https://API.PAYPAL.COM/v1/notifications/certs/CERT-1")
            .is_ok());
    }

    #[test]
    fn test_policy_rejects_untrusted_urls() {
        let policy = CertUrlPolicy::paypal();
        for url in [
            "http://api.paypal.com/v1/notifications/certs/CERT-1",
            "https://evil.example.com/v1/notifications/certs/CERT-1",
            "https://api.paypal.com.evil.example.com/v1/notifications/certs/CERT-1",
            "https://api.paypal.com/v1/other/CERT-1",
            "https://api.paypal.com/v1/notifications/certs/../../other",
            "https://user:pw@api.paypal.com/v1/notifications/certs/CERT-1",
            "file:///etc/passwd",
            "https://api.paypal.com/v1/notifications/certs/CERT-1?x=1",
            "https://api.paypal.com/v1/notifications/certs/CERT-1?",
            "https://api.paypal.com/v1/notifications/certs/CERT-1#frag",
        ] {
            assert!(
                matches!(policy.check(url), Err(CertError::UrlRejected(_))),
                "accepted {}",
                url
            );
        }
    }

    #[test]
    fn test_policy_invalid_url() {
        let err = CertUrlPolicy::paypal().check("not a url").unwrap_err();
        assert!(matches!(err, CertError::InvalidUrl(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("paypal-cert").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("../escape").is_err());
        assert!(validate_key("nested/key").is_err());
        assert!(validate_key("nested\\key").is_err());
    }

    #[tokio::test]
    async fn test_fetch_downloads_once_then_hits_cache() {
        let pem = test_pem();
        let (addr, hits) = serve(StatusCode::OK, pem.clone()).await;
        let dir = temp_cache_dir();
        let cache = local_cache(&dir);
        let url = format!("http://{}/cert.pem", addr);

        let first = cache.fetch(&url, None).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(files_in(&dir), vec![cache_key(&url)]);

        let second = cache.fetch(&url, None).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(first.as_bytes(), second.as_bytes());
        assert_eq!(first, pem);
    }

    #[tokio::test]
    async fn test_fetch_with_key_override() {
        let pem = test_pem();
        let (addr, hits) = serve(StatusCode::OK, pem.clone()).await;
        let dir = temp_cache_dir();
        let cache = local_cache(&dir);
        let url = format!("http://{}/cert.pem", addr);

        cache.fetch(&url, Some("signing-cert")).await.unwrap();
        assert_eq!(files_in(&dir), vec!["signing-cert".to_string()]);

        let other_url = format!("http://{}/other.pem", addr);
        let cached = cache.fetch(&other_url, Some("signing-cert")).await.unwrap();
        assert_eq!(cached, pem);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_rejects_bad_override_key() {
        let pem = test_pem();
        let (addr, hits) = serve(StatusCode::OK, pem.clone()).await;
        let cache = local_cache(&temp_cache_dir());
        let url = format!("http://{}/cert.pem", addr);

        let err = cache.fetch(&url, Some("../outside")).await.unwrap_err();
        assert!(matches!(err, CertError::InvalidCacheKey(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fetch_uses_existing_entry_without_network() {
        let dir = temp_cache_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let pem = test_pem();
        std::fs::write(dir.join(cache_key(TEST_CERT_URL)), &pem).unwrap();
        let cache = CertCache::new(&dir, CertUrlPolicy::paypal(), Duration::from_secs(1)).unwrap();

        assert_eq!(cache.fetch(TEST_CERT_URL, None).await.unwrap(), pem);
    }

    #[tokio::test]
    async fn test_fetch_treats_empty_entry_as_miss() {
        let pem = test_pem();
        let (addr, hits) = serve(StatusCode::OK, pem.clone()).await;
        let dir = temp_cache_dir();
        let cache = local_cache(&dir);
        let url = format!("http://{}/cert.pem", addr);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(cache_key(&url)), "").unwrap();

        assert_eq!(cache.fetch(&url, None).await.unwrap(), pem);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_never_contacts_rejected_host() {
        let pem = test_pem();
        let (addr, hits) = serve(StatusCode::OK, pem.clone()).await;
        let cache =
            CertCache::new(temp_cache_dir(), CertUrlPolicy::paypal(), Duration::from_secs(1))
                .unwrap();
        let url = format!("http://{}/v1/notifications/certs/CERT-1", addr);

        let err = cache.fetch(&url, None).await.unwrap_err();
        assert!(matches!(err, CertError::UrlRejected(_)));
        assert!(!err.is_transient());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fetch_error_status_is_not_cached() {
        let (addr, _) = serve(StatusCode::NOT_FOUND, "missing").await;
        let dir = temp_cache_dir();
        let cache = local_cache(&dir);
        let url = format!("http://{}/cert.pem", addr);

        let err = cache.fetch(&url, None).await.unwrap_err();
        assert!(matches!(err, CertError::Status { status: 404, .. }));
        assert!(err.is_transient());
        assert!(!dir.join(cache_key(&url)).exists());
    }

    #[tokio::test]
    async fn test_fetch_empty_body_is_error() {
        let (addr, _) = serve(StatusCode::OK, "  \n").await;
        let cache = local_cache(&temp_cache_dir());
        let url = format!("http://{}/cert.pem", addr);

        let err = cache.fetch(&url, None).await.unwrap_err();
        assert!(matches!(err, CertError::Empty(_)));
    }

    #[tokio::test]
    async fn test_fetch_rejects_non_certificate_body() {
        let (addr, hits) = serve(StatusCode::OK, "<html>maintenance</html>").await;
        let dir = temp_cache_dir();
        let cache = local_cache(&dir);
        let url = format!("http://{}/cert.pem", addr);

        let err = cache.fetch(&url, None).await.unwrap_err();
        assert!(matches!(err, CertError::InvalidCertificate(_)));
        assert!(err.is_transient());
        assert!(!dir.join(cache_key(&url)).exists());

        // Nothing was cached, so the next request downloads again
        assert!(cache.fetch(&url, None).await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_query_variants_do_not_grow_cache() {
        let pem = test_pem();
        let (addr, hits) = serve(StatusCode::OK, pem).await;
        let dir = temp_cache_dir();
        let policy = CertUrlPolicy::new(["127.0.0.1"]).allow_http().any_path();
        let cache = CertCache::new(&dir, policy, Duration::from_secs(5)).unwrap();

        for i in 0..5 {
            let url = format!("http://{}/v1/notifications/certs/CERT-1?x={}", addr, i);
            let err = cache.fetch(&url, None).await.unwrap_err();
            assert!(matches!(err, CertError::UrlRejected(_)));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!dir.exists());
    }

    #[test]
    fn test_parse_certificate() {
        assert!(parse_certificate(&test_pem()).is_ok());
        let err = parse_certificate("<html>maintenance</html>").unwrap_err();
        assert!(matches!(err, CertError::InvalidCertificate(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_fetch_times_out() {
        let app = Router::new().fallback(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            "slow"
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let policy = CertUrlPolicy::new(["127.0.0.1"]).allow_http();
        let cache = CertCache::new(temp_cache_dir(), policy, Duration::from_millis(200)).unwrap();
        let url = format!("http://{}/cert.pem", addr);

        let err = cache.fetch(&url, None).await.unwrap_err();
        assert!(matches!(err, CertError::Http(_)));
        assert!(err.is_transient());
    }
}
