use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;

use super::{endpoint, Lims};
use crate::error::{Error, Result};

pub const BASE_URL: &str = "https://lims.test/api/v2/";

/// In-memory LIMS. GETs are served from a URL map, successful PUTs replace
/// the stored document and every call is appended to a shared journal.
#[derive(Default)]
pub struct MockLims {
    documents: Mutex<HashMap<String, (StatusCode, Bytes)>>,
    put_failures: Mutex<HashMap<String, StatusCode>>,
    unreachable: Mutex<Vec<String>>,
    dropped_puts: Mutex<Vec<String>>,
    put_delay: Option<Duration>,
    journal: Arc<Mutex<Vec<String>>>,
}

impl MockLims {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(mut self, journal: Arc<Mutex<Vec<String>>>) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_put_delay(mut self, delay: Duration) -> Self {
        self.put_delay = Some(delay);
        self
    }

    pub fn url(&self, segments: &[&str]) -> String {
        endpoint(BASE_URL, segments)
    }

    pub fn serve(&self, url: impl Into<String>, status: StatusCode, body: impl Into<String>) {
        self.documents
            .lock()
            .unwrap()
            .insert(url.into(), (status, Bytes::from(body.into())));
    }

    /// Serves a process whose single input resolves to `samples`.
    pub fn serve_process(&self, process_id: &str, samples: &[&str]) {
        let artifact_url = self.url(&["artifacts", &format!("{process_id}-pp")]);
        self.serve(
            self.url(&["processes", process_id]),
            StatusCode::OK,
            format!(
                r#"<prc:process xmlns:prc="http://genologics.com/ri/process" limsid="{process_id}"><input-output-map><input post-process-uri="{artifact_url}" limsid="{process_id}-in"/></input-output-map></prc:process>"#
            ),
        );
        let children: String = samples
            .iter()
            .map(|s| format!(r#"<sample uri="{}" limsid="{s}"/>"#, self.url(&["samples", s])))
            .collect();
        self.serve(
            artifact_url,
            StatusCode::OK,
            format!(r#"<art:artifact xmlns:art="http://genologics.com/ri/artifact">{children}</art:artifact>"#),
        );
    }

    pub fn serve_sample(&self, sample_id: &str, fields: &[(&str, &str)]) {
        let udfs: String = fields
            .iter()
            .map(|(name, value)| {
                format!(r#"<udf:field type="String" name="{name}">{value}</udf:field>"#)
            })
            .collect();
        self.serve(
            self.url(&["samples", sample_id]),
            StatusCode::OK,
            format!(
                r#"<smp:sample xmlns:udf="http://genologics.com/ri/userdefined" xmlns:smp="http://genologics.com/ri/sample" limsid="{sample_id}"><name>{sample_id}</name>{udfs}</smp:sample>"#
            ),
        );
    }

    pub fn fail_put(&self, sample_id: &str, status: StatusCode) {
        self.put_failures
            .lock()
            .unwrap()
            .insert(self.url(&["samples", sample_id]), status);
    }

    /// Updates of this sample fail in transport instead of returning a status.
    pub fn drop_put(&self, sample_id: &str) {
        self.dropped_puts
            .lock()
            .unwrap()
            .push(self.url(&["samples", sample_id]));
    }

    pub fn make_unreachable(&self, url: impl Into<String>) {
        self.unreachable.lock().unwrap().push(url.into());
    }

    pub fn document(&self, url: &str) -> Option<String> {
        self.documents
            .lock()
            .unwrap()
            .get(url)
            .map(|(_, body)| String::from_utf8_lossy(body).into_owned())
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl Lims for MockLims {
    fn base_url(&self) -> &str {
        BASE_URL
    }

    async fn get(&self, url: &str) -> Result<(StatusCode, Bytes)> {
        self.record(format!("GET {url}"));
        if self.unreachable.lock().unwrap().iter().any(|u| u == url) {
            return Err(Error::integration(format!("connection refused: {url}")));
        }
        let found = self.documents.lock().unwrap().get(url).cloned();
        Ok(found.unwrap_or((StatusCode::NOT_FOUND, Bytes::new())))
    }

    async fn put(&self, url: &str, data: Bytes) -> Result<(StatusCode, Bytes)> {
        self.record(format!("PUT {url}"));
        if let Some(delay) = self.put_delay {
            tokio::time::sleep(delay).await;
        }
        if self.dropped_puts.lock().unwrap().iter().any(|u| u == url) {
            return Err(Error::integration(format!("connection reset: {url}")));
        }
        if let Some(status) = self.put_failures.lock().unwrap().get(url).copied() {
            return Ok((status, Bytes::from_static(b"<exc:exception/>")));
        }
        self.documents
            .lock()
            .unwrap()
            .insert(url.to_owned(), (StatusCode::OK, data.clone()));
        Ok((StatusCode::OK, data))
    }
}
