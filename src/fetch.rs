use std::fmt;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Local};
use clap::ValueEnum;
use http::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::common::fs::write_atomic_new;
use crate::error::{Error, Result};
use crate::lims::{endpoint, xml, Lims, SampleId, SampleRecord};

pub const TEMPLATE_VERSION_FIELD: &str = "Template_version";

const PROCESS_NOT_FOUND: &str = "Process not found:";

const COMMON_REQUIRED_FIELDS: &[&str] = &[
    "Physician Phone #",
    "Patient Name",
    "Customer Sample Name",
    "Date of Birth",
    "Sex",
    "Specimen Site",
    "Receipt Date",
    "Received Time",
    "Physician",
    "Physician Institution",
    "Collection Date",
    "Collection Time",
    "Final.Result",
    "Batch ID",
    "Batch QC Result",
    "Status",
    "Medical Record Number",
];

// Per-target assay results reported by the v1 template only
const V1_ASSAY_FIELDS: &[&str] = &[
    "ORF1ab",
    "ORF1ab_STATUS",
    "N_Protein",
    "N_Protein_STATUS",
    "S_Protein",
    "S_Protein_STATUS",
    "MS2",
    "MS2_STATUS",
];

#[derive(Copy, Clone, PartialEq, Eq, Debug, ValueEnum)]
pub enum TemplateVersion {
    V1,
    V2,
}

impl TemplateVersion {
    pub fn required_fields(self) -> impl Iterator<Item = &'static str> {
        let extra: &'static [&'static str] = match self {
            TemplateVersion::V1 => V1_ASSAY_FIELDS,
            TemplateVersion::V2 => &[],
        };
        COMMON_REQUIRED_FIELDS.iter().chain(extra).copied()
    }
}

impl fmt::Display for TemplateVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateVersion::V1 => write!(f, "v1"),
            TemplateVersion::V2 => write!(f, "v2"),
        }
    }
}

/// Reads process and sample data from the LIMS.
pub struct RecordFetcher<L> {
    lims: L,
}

impl<L: Lims> RecordFetcher<L> {
    pub fn new(lims: L) -> Self {
        Self { lims }
    }

    pub fn lims(&self) -> &L {
        &self.lims
    }

    fn sample_url(&self, sample: &SampleId) -> String {
        endpoint(self.lims.base_url(), &["samples", sample.as_str()])
    }

    async fn get_ok(&self, url: &str) -> Result<Bytes> {
        let (status, body) = self.lims.get(url).await.inspect_err(|e| {
            error!("Call to {} failed: {}", url, e);
        })?;
        if !status.is_success() {
            let msg = format!("Call to {} failed with status {}", url, status);
            error!("{msg}");
            return Err(Error::Integration(msg));
        }
        Ok(body)
    }

    /// Sample ids behind every input of `process_id`, in LIMS order and
    /// possibly repeated.
    pub async fn resolve_samples(&self, process_id: &str) -> Result<Vec<SampleId>> {
        let url = endpoint(self.lims.base_url(), &["processes", process_id]);
        let (status, body) = self.lims.get(&url).await.inspect_err(|e| {
            error!("Call to {} failed: {}", url, e);
        })?;
        if !status.is_success() {
            let msg = std::str::from_utf8(&body)
                .ok()
                .and_then(xml::exception_message)
                .filter(|m| m.contains(PROCESS_NOT_FOUND))
                .unwrap_or_else(|| format!("Call to {} failed with status {}", url, status));
            error!("{msg}");
            return Err(Error::Integration(msg));
        }

        let uris = xml::post_process_uris(utf8(&body)?)?;
        debug!(process_id, inputs = uris.len(), "resolved process inputs");

        let mut samples = Vec::new();
        for uri in uris {
            let body = self.get_ok(&uri).await?;
            for limsid in xml::child_limsids(utf8(&body)?)? {
                debug!("{}", limsid);
                samples.push(SampleId::new(limsid));
            }
        }
        info!(process_id, count = samples.len(), "resolved samples");
        Ok(samples)
    }

    pub async fn fetch_record(&self, sample: &SampleId) -> Result<SampleRecord> {
        let body = self.get_ok(&self.sample_url(sample)).await?;
        Ok(SampleRecord::new(body))
    }

    pub async fn submit_record(
        &self,
        sample: &SampleId,
        record: &SampleRecord,
    ) -> Result<(StatusCode, Bytes)> {
        self.lims
            .put(&self.sample_url(sample), record.body().clone())
            .await
    }

    /// Fetches and validates every sample, returning one JSON document per
    /// sample tagged with the template version. Nothing is returned unless
    /// every sample passes validation.
    pub async fn snapshot(
        &self,
        samples: &[SampleId],
        version: TemplateVersion,
    ) -> Result<Vec<Value>> {
        let mut entries = Vec::with_capacity(samples.len());
        for sample in samples {
            let mut document = self.fetch_record(sample).await?.to_json()?;
            validate_sample(sample, &document, version)?;
            tag_template_version(&mut document, version)?;
            entries.push(document);
        }
        Ok(entries)
    }
}

fn utf8(body: &[u8]) -> Result<&str> {
    std::str::from_utf8(body)
        .map_err(|e| Error::integration(format!("LIMS response is not UTF-8: {e}")))
}

fn udf_fields_mut(document: &mut Value) -> Option<&mut Vec<Value>> {
    document
        .as_object_mut()?
        .values_mut()
        .next()?
        .as_object_mut()?
        .entry(xml::UDF_FIELD)
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
}

fn udf_fields(document: &Value) -> &[Value] {
    document
        .as_object()
        .and_then(|root| root.values().next())
        .and_then(|sample| sample.get(xml::UDF_FIELD))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// A required field passes when it is present with text other than empty or
/// a case-insensitive `none`.
pub fn validate_sample(sample: &SampleId, document: &Value, version: TemplateVersion) -> Result<()> {
    let fields = udf_fields(document);
    for required in version.required_fields() {
        let slot = fields
            .iter()
            .find(|f| f.get("@name").and_then(Value::as_str) == Some(required));
        let Some(slot) = slot else {
            let msg = format!(
                "The following required field is missing: {} for Sample: {}",
                required, sample
            );
            error!("{msg}");
            return Err(Error::Validation(msg));
        };
        let text = slot.get("#text").and_then(Value::as_str).unwrap_or("");
        if text.trim().is_empty() || text.trim().eq_ignore_ascii_case("none") {
            let msg = format!(
                "The following required field is none or empty: {} for Sample: {}",
                required, sample
            );
            error!("{msg}");
            return Err(Error::Validation(msg));
        }
    }
    Ok(())
}

fn tag_template_version(document: &mut Value, version: TemplateVersion) -> Result<()> {
    let fields = udf_fields_mut(document)
        .ok_or_else(|| Error::integration("sample document has no root element"))?;
    fields.push(json!({
        "@type": "String",
        "@name": TEMPLATE_VERSION_FIELD,
        "#text": version.to_string(),
    }));
    Ok(())
}

/// Snapshot file name: day, month name, year, then minute and second.
pub fn snapshot_file_name(now: DateTime<Local>) -> String {
    format!("{}.txt", now.format("%d_%B_%Y_%M%S"))
}

pub fn write_snapshot(output_dir: &Path, entries: &[Value], now: DateTime<Local>) -> Result<PathBuf> {
    let path = output_dir.join(snapshot_file_name(now));
    let encoded = serde_json::to_vec(entries).map_err(|e| Error::Io(std::io::Error::other(e)))?;
    write_atomic_new(&path, &encoded)?;
    info!(path = %path.display(), samples = entries.len(), "wrote sample snapshot");
    Ok(path)
}

/// Resolves, validates and snapshots every sample of a process. The output
/// file is written only if every sample validated.
pub async fn pull_records<L: Lims>(
    fetcher: &RecordFetcher<L>,
    process_id: &str,
    output_dir: &Path,
    version: TemplateVersion,
) -> Result<PathBuf> {
    let samples = fetcher.resolve_samples(process_id).await?;
    let entries = fetcher.snapshot(&samples, version).await?;
    write_snapshot(output_dir, &entries, Local::now())
}
