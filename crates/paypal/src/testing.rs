//! Key and certificate fixtures for tests
//!
//! Enabled for this crate's own tests and, through the `test-util` feature,
//! for dependents that need to produce correctly signed transmissions.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use openssl::{
    asn1::Asn1Time,
    ec::{EcGroup, EcKey},
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKey, Private},
    rsa::Rsa,
    sign::Signer,
    x509::{X509Builder, X509NameBuilder},
};
use reqwest::header::{HeaderMap, HeaderValue};

use crate::cert_cache::cache_key;
use crate::verify::{
    signed_message, AuthAlgo, AUTH_ALGO, CERT_URL, TRANSMISSION_ID, TRANSMISSION_SIG,
    TRANSMISSION_TIME,
};

pub const TEST_CERT_URL: &str =
    "https://api.sandbox.paypal.com/v1/notifications/certs/CERT-360caa42-fca2a594-a5cafa77";
pub const TEST_TRANSMISSION_ID: &str = "69cd13f0-d67a-11e5-baa3-778b53f4ae55";
pub const TEST_TRANSMISSION_TIME: &str = "2016-02-18T20:01:35Z";

/// A throwaway key with a self-signed certificate
pub struct TestSigner {
    key: PKey<Private>,
    cert_pem: String,
}

impl TestSigner {
    /// RSA 2048, what PayPal signs with
    pub fn generate() -> Self {
        Self::from_key(PKey::from_rsa(Rsa::generate(2048).expect("rsa key")).expect("pkey"))
    }

    /// P-256 key instead of RSA
    pub fn generate_ec() -> Self {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).expect("curve");
        Self::from_key(PKey::from_ec_key(EcKey::generate(&group).expect("ec key")).expect("pkey"))
    }

    fn from_key(key: PKey<Private>) -> Self {
        let mut name = X509NameBuilder::new().expect("name builder");
        name.append_entry_by_text("CN", "messageverificationcerts.sandbox.paypal.com")
            .expect("common name");
        let name = name.build();

        let mut builder = X509Builder::new().expect("x509 builder");
        builder.set_version(2).expect("version");
        builder.set_subject_name(&name).expect("subject");
        builder.set_issuer_name(&name).expect("issuer");
        builder.set_pubkey(&key).expect("pubkey");
        let not_before = Asn1Time::days_from_now(0).expect("not before");
        let not_after = Asn1Time::days_from_now(30).expect("not after");
        builder.set_not_before(&not_before).expect("set not before");
        builder.set_not_after(&not_after).expect("set not after");
        builder.sign(&key, MessageDigest::sha256()).expect("self sign");

        let cert_pem = String::from_utf8(builder.build().to_pem().expect("pem")).expect("utf8");
        Self { key, cert_pem }
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// Base64 signature over `message`
    pub fn sign(&self, algo: AuthAlgo, message: &[u8]) -> String {
        let mut signer = Signer::new(algo.digest(), &self.key).expect("signer");
        signer.update(message).expect("update");
        BASE64.encode(signer.sign_to_vec().expect("sign"))
    }

    /// A complete, correctly signed header set for `body` pointing at
    /// [`TEST_CERT_URL`]
    pub fn headers(&self, webhook_id: &str, body: &[u8]) -> HeaderMap {
        let message = signed_message(TEST_TRANSMISSION_ID, TEST_TRANSMISSION_TIME, webhook_id, body);
        let signature = self.sign(AuthAlgo::Sha256WithRsa, message.as_bytes());

        let mut headers = HeaderMap::new();
        headers.insert(TRANSMISSION_ID, HeaderValue::from_static(TEST_TRANSMISSION_ID));
        headers.insert(TRANSMISSION_TIME, HeaderValue::from_static(TEST_TRANSMISSION_TIME));
        headers.insert(CERT_URL, HeaderValue::from_static(TEST_CERT_URL));
        headers.insert(
            TRANSMISSION_SIG,
            HeaderValue::from_str(&signature).expect("base64 is a valid header"),
        );
        headers.insert(AUTH_ALGO, HeaderValue::from_static("SHA256withRSA"));
        headers
    }

    /// Write this certificate into `dir` as the cache entry for `url`
    pub fn seed_cache(&self, dir: &Path, url: &str) {
        std::fs::create_dir_all(dir).expect("create cache dir");
        std::fs::write(dir.join(cache_key(url)), &self.cert_pem).expect("write cache entry");
    }
}

/// A fresh, not yet created directory under the system temp dir
pub fn temp_cache_dir() -> PathBuf {
    std::env::temp_dir().join(format!("paypal-cert-cache-{}", uuid::Uuid::new_v4()))
}
