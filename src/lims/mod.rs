pub mod xml;

#[cfg(test)]
pub mod mock;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::StatusCode;
use reqwest::Client;

use crate::config::EnvironmentConfig;
use crate::error::{Error, Result};

/// LIMS identifier of a sample, e.g. `ADM101A1`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SampleId(String);

impl SampleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SampleId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Raw sample document as served by the LIMS.
#[derive(Debug, Clone)]
pub struct SampleRecord {
    body: Bytes,
}

impl SampleRecord {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self { body: body.into() }
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn as_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.body)
            .map_err(|e| Error::integration(format!("sample record is not UTF-8: {e}")))
    }

    /// Copy of the record with the user-defined field `name` set to `value`.
    pub fn with_udf_field(&self, name: &str, value: &str) -> Result<SampleRecord> {
        let patched = xml::set_udf_field(self.as_str()?, name, value)?;
        Ok(SampleRecord::new(patched))
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        xml::to_json(self.as_str()?)
    }
}

/// Joins path segments onto the LIMS base URL with exactly one `/` between
/// each part, whether or not the configured URL ends with a slash.
pub fn endpoint(base_url: &str, segments: &[&str]) -> String {
    let mut url = base_url.trim_end_matches('/').to_owned();
    for segment in segments {
        url.push('/');
        url.push_str(segment.trim_matches('/'));
    }
    url
}

#[async_trait]
pub trait Lims: Send + Sync {
    fn base_url(&self) -> &str;

    async fn get(&self, url: &str) -> Result<(StatusCode, Bytes)>;

    async fn put(&self, url: &str, data: Bytes) -> Result<(StatusCode, Bytes)>;
}

/// HTTP client for the LIMS REST API using basic authentication.
pub struct LimsClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl LimsClient {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
        })
    }

    pub fn from_config(cfg: &EnvironmentConfig) -> Result<Self> {
        Self::new(
            cfg.base_url.clone(),
            cfg.username.clone(),
            cfg.password.clone(),
            cfg.http_timeout(),
        )
    }
}

#[async_trait]
impl Lims for LimsClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, url: &str) -> Result<(StatusCode, Bytes)> {
        let response = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        Ok((status, body))
    }

    async fn put(&self, url: &str, data: Bytes) -> Result<(StatusCode, Bytes)> {
        let response = self
            .client
            .put(url)
            .basic_auth(&self.username, Some(&self.password))
            .header(CONTENT_TYPE, "application/xml")
            .body(data)
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        Ok((status, body))
    }
}
