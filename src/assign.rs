use itertools::Itertools;
use tracing::{error, info, warn};

use crate::counter::CounterStore;
use crate::error::Result;
use crate::fetch::RecordFetcher;
use crate::identifier::{Identifier, IdentifierFormat};
use crate::lims::{Lims, SampleId};

/// User-defined field that carries the patient-facing identifier.
pub const SAMPLE_NAME_FIELD: &str = "Customer Sample Name";

#[derive(Debug, Default)]
pub struct AssignmentReport {
    /// Counter value loaded at the start of the run.
    pub start: u64,
    /// Counter value persisted at the end of the run.
    pub next: u64,
    pub issued: Vec<(SampleId, Identifier)>,
    /// Samples whose update was rejected. Their identifiers are spent.
    pub failed: Vec<(SampleId, Identifier)>,
}

/// Sorted, duplicate-free copy of `samples`.
pub fn prepare_samples(samples: Vec<SampleId>) -> Vec<SampleId> {
    samples.into_iter().sorted().dedup().collect()
}

/// Writes sequential identifiers onto LIMS samples, reusing the fetcher for
/// every remote call.
pub struct IdentifierAssigner<'a, L> {
    fetcher: &'a RecordFetcher<L>,
    format: IdentifierFormat,
    field_name: String,
}

impl<'a, L: Lims> IdentifierAssigner<'a, L> {
    pub fn new(fetcher: &'a RecordFetcher<L>) -> Self {
        Self {
            fetcher,
            format: IdentifierFormat::default(),
            field_name: SAMPLE_NAME_FIELD.to_owned(),
        }
    }

    pub fn format(mut self, format: IdentifierFormat) -> Self {
        self.format = format;
        self
    }

    pub fn field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = name.into();
        self
    }

    /// Applies one identifier per sample, in order.
    ///
    /// `counter` advances once per submitted record whether or not the LIMS
    /// accepted the update; a rejected update is logged and the loop moves
    /// on. A failed read aborts the loop with `counter` left at the first
    /// value not yet submitted.
    pub async fn assign(
        &self,
        samples: &[SampleId],
        counter: &mut u64,
        report: &mut AssignmentReport,
    ) -> Result<()> {
        for sample in samples {
            let identifier = self.format.format(*counter)?;
            let record = self.fetcher.fetch_record(sample).await?;
            let patched = record.with_udf_field(&self.field_name, identifier.as_str())?;

            *counter += 1;
            match self.fetcher.submit_record(sample, &patched).await {
                Ok((status, _)) if status.is_success() => {
                    info!(sample = %sample, identifier = %identifier, "assigned identifier");
                    report.issued.push((sample.clone(), identifier));
                }
                Ok((status, body)) => {
                    error!(
                        "Error sample: {} {} {}",
                        sample,
                        status,
                        String::from_utf8_lossy(&body)
                    );
                    report.failed.push((sample.clone(), identifier));
                }
                Err(e) => {
                    error!("Error sample: {} {}", sample, e);
                    report.failed.push((sample.clone(), identifier));
                }
            }
        }
        Ok(())
    }

    /// One locked run: load the counter, assign every sample of the process
    /// and persist the advanced counter, even when the run is cut short.
    pub async fn run(&self, store: &CounterStore, process_id: &str) -> Result<AssignmentReport> {
        let guard = store.acquire().await?;
        let start = guard.load()?;

        let samples = prepare_samples(self.fetcher.resolve_samples(process_id).await?);
        self.format.check_range(start, samples.len() as u64)?;
        info!(
            process_id,
            samples = samples.len(),
            first = start,
            "assigning identifiers"
        );

        let mut counter = start;
        let mut report = AssignmentReport {
            start,
            ..Default::default()
        };
        let outcome = self.assign(&samples, &mut counter, &mut report).await;

        if let Err(e) = guard.store(counter) {
            error!(
                counter,
                path = %store.path().display(),
                "failed to persist counter, identifiers from {} may be reissued: {}",
                start,
                e
            );
            return Err(e);
        }
        report.next = counter;

        if let Err(e) = outcome {
            warn!(
                process_id,
                assigned = counter - start,
                "run aborted after persisting counter {}: {}",
                counter,
                e
            );
            return Err(e);
        }
        if !report.failed.is_empty() {
            warn!(
                process_id,
                failed = report.failed.len(),
                "some samples were not updated, their identifiers are skipped"
            );
        }
        Ok(report)
    }
}
