use std::time::Duration;

use bytes::Bytes;
use reqwest::{header, Client, Response};
use serde::de::DeserializeOwned;

use crate::{QureConfig, QureError};

pub(crate) const STUDIES_ENDPOINT: &str = "studies/";
pub(crate) const RESULTS_ENDPOINT: &str = "results/";

/// Client of the analysis service.
///
/// Every call builds its own HTTP client with the configured timeout, so no
/// connection is shared between calls. Upload and ping are in `post.rs`,
/// result polling and downloads in `get.rs`.
#[derive(Debug, Clone)]
pub struct QureClient {
    base_url: String,
    authorization: String,
    timeout: Duration,
}

impl QureClient {
    pub fn new(config: &QureConfig) -> Self {
        QureClient {
            base_url: config.base_url.clone(),
            authorization: config.authorization.clone(),
            timeout: config.request_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `path` under the base URL, with or without a trailing slash on the
    /// base.
    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    pub(crate) fn http_client(&self) -> Result<Client, QureError> {
        Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(QureError::ConnectionFailure)
    }

    pub(crate) fn auth_header(&self) -> Result<header::HeaderValue, QureError> {
        let mut value = header::HeaderValue::from_str(&self.authorization)?;
        value.set_sensitive(true);
        Ok(value)
    }
}

pub(crate) async fn read_body(response: Response) -> Result<Bytes, QureError> {
    response.bytes().await.map_err(QureError::ConnectionFailure)
}

pub(crate) async fn read_text(response: Response) -> Result<String, QureError> {
    response.text().await.map_err(QureError::ConnectionFailure)
}

pub(crate) fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, QureError> {
    serde_json::from_slice(body).map_err(QureError::InvalidResponse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_join() {
        let client = QureClient::new(&QureConfig::new("http://127.0.0.1:8080/", "Token 01"));
        assert_eq!(client.endpoint(STUDIES_ENDPOINT), "http://127.0.0.1:8080/studies/");
        let client = QureClient::new(&QureConfig::new("http://127.0.0.1:8080/api", "Token 01"));
        assert_eq!(
            client.endpoint("results/abc"),
            "http://127.0.0.1:8080/api/results/abc"
        );
    }

    #[test]
    fn test_auth_header_is_sensitive() {
        let client = QureClient::new(&QureConfig::new("http://127.0.0.1", "Token 0abc"));
        let value = client.auth_header().unwrap();
        assert!(value.is_sensitive());
        assert_eq!(value, "Token 0abc");

        let client = QureClient::new(&QureConfig::new("http://127.0.0.1", "Token\n0abc"));
        assert!(matches!(
            client.auth_header(),
            Err(QureError::InvalidHeader(_))
        ));
    }
}
