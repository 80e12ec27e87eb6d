//! HTTP client setup for watch streams

use std::path::PathBuf;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Certificate, Client};

use super::{FeedConfig, FeedError};

/// How the API server certificate is verified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsSetting {
    /// Built-in root certificates
    System,
    /// A PEM bundle trusted in addition to the built-in roots
    CaBundle(PathBuf),
    /// No verification at all
    Insecure,
}

impl TlsSetting {
    /// Interpret a `--ca-store` value: absent means system roots, `false`
    /// disables verification, anything else is a bundle path
    pub fn from_ca_store(ca_store: Option<&str>) -> Self {
        match ca_store {
            None | Some("") => TlsSetting::System,
            Some(value) if value.eq_ignore_ascii_case("false") => TlsSetting::Insecure,
            Some(path) => TlsSetting::CaBundle(PathBuf::from(path)),
        }
    }
}

/// Default headers for every watch request
pub fn auth_headers(token: &str) -> Result<HeaderMap, FeedError> {
    let mut headers = HeaderMap::new();
    let mut bearer = HeaderValue::from_str(&format!("Bearer {}", token.trim()))?;
    bearer.set_sensitive(true);
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    Ok(headers)
}

/// Client shared by every feed
///
/// No overall request timeout is set: watch responses stay open
/// indefinitely and are bounded per chunk by the feed instead.
pub fn build_client(
    headers: HeaderMap,
    tls: &TlsSetting,
    config: &FeedConfig,
) -> Result<Client, FeedError> {
    let mut builder = Client::builder()
        .default_headers(headers)
        .connect_timeout(config.connect_timeout);

    match tls {
        TlsSetting::System => {}
        TlsSetting::CaBundle(path) => {
            let pem = std::fs::read(path).map_err(|source| FeedError::CaBundle {
                path: path.clone(),
                source,
            })?;
            let certificate = Certificate::from_pem(&pem).map_err(FeedError::Client)?;
            builder = builder.add_root_certificate(certificate);
        }
        TlsSetting::Insecure => {
            builder = builder.danger_accept_invalid_certs(true);
        }
    }

    builder.build().map_err(FeedError::Client)
}
