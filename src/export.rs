use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::client::Client;
use crate::error::{ExportError, Result};
use crate::fetch::FetchedChunk;
use crate::job::{JobHandle, JobStatus, OutputManifest};
use crate::merge::{RowKey, append_chunk, append_chunks, dataset_path, read_anchor};
use crate::request::{DatasetSelection, ExportRequest, TimeRange, build};
use crate::util::{parse_timestamp, to_iso_millis};

/// What happened to one dataset during an export or refresh.
#[derive(Debug)]
pub enum DatasetOutcome {
    Written {
        rows: usize,
        dropped_duplicate: bool,
    },
    JobFailed(String),
    RetrievalFailed(ExportError),
    /// The dataset file could not be read or appended to.
    WriteFailed(ExportError),
}

impl DatasetOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DatasetOutcome::Written { .. })
    }
}

/// Per-dataset results of a multi-dataset operation.
#[derive(Debug, Default)]
pub struct ExportReport {
    pub datasets: BTreeMap<String, DatasetOutcome>,
}

impl ExportReport {
    pub fn succeeded(&self) -> Vec<&str> {
        self.datasets
            .iter()
            .filter(|(_, o)| o.is_success())
            .map(|(d, _)| d.as_str())
            .collect()
    }

    pub fn failed(&self) -> Vec<&str> {
        self.datasets
            .iter()
            .filter(|(_, o)| !o.is_success())
            .map(|(d, _)| d.as_str())
            .collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.datasets.values().all(DatasetOutcome::is_success)
    }

    pub fn rows_written(&self) -> usize {
        self.datasets
            .values()
            .map(|o| match o {
                DatasetOutcome::Written { rows, .. } => *rows,
                _ => 0,
            })
            .sum()
    }

    fn record_rows(&mut self, dataset: &str, added: usize, dropped: bool) {
        let outcome = self
            .datasets
            .entry(dataset.to_string())
            .or_insert(DatasetOutcome::Written {
                rows: 0,
                dropped_duplicate: false,
            });
        // an earlier failure for this dataset sticks
        if let DatasetOutcome::Written {
            rows,
            dropped_duplicate,
        } = outcome
        {
            *rows += added;
            *dropped_duplicate |= dropped;
        }
    }

    fn record(&mut self, dataset: &str, outcome: DatasetOutcome) {
        self.datasets.insert(dataset.to_string(), outcome);
    }
}

fn ensure_dir(save_path: &Path) -> Result<()> {
    if !save_path.exists() {
        info!(path = %save_path.display(), "target directory does not exist, creating it");
        std::fs::create_dir_all(save_path)?;
    }
    Ok(())
}

impl Client {
    fn submit_selection(
        &self,
        catalog: &Catalog,
        selection: &DatasetSelection,
        range: &TimeRange,
    ) -> Result<(ExportRequest, JobHandle)> {
        if let DatasetSelection::Only(wanted) = selection {
            catalog.validate(wanted)?;
        }

        let request = build(catalog, selection, range);
        if request.datasets.is_empty() {
            return Err(ExportError::InvalidArgument(
                "no datasets selected for export".into(),
            ));
        }

        let names: Vec<&String> = request.dataset_names().collect();
        info!(
            datasets = ?names,
            since = ?request.since,
            until = ?request.until,
            "creating export request"
        );
        let handle = self.submit(&request)?;
        Ok((request, handle))
    }

    /// Schedules a single job covering every selected dataset.
    ///
    /// Fails with `InvalidDataset` before any request is sent when an explicit
    /// selection names a dataset missing from `catalog`.
    pub fn export_once(
        &self,
        catalog: &Catalog,
        selection: &DatasetSelection,
        range: &TimeRange,
    ) -> Result<JobHandle> {
        self.submit_selection(catalog, selection, range)
            .map(|(_, handle)| handle)
    }

    /// Schedules one job per dataset, each with its own time range.
    ///
    /// All keys are validated before the first submission. A failed submission
    /// aborts the remaining ones.
    pub fn export_parallel(
        &self,
        catalog: &Catalog,
        ranges: &BTreeMap<String, TimeRange>,
    ) -> Result<BTreeMap<String, JobHandle>> {
        catalog.validate(ranges.keys())?;

        info!(jobs = ranges.len(), "creating parallel export requests");
        let mut handles = BTreeMap::new();
        for (dataset, range) in ranges {
            let request = build(catalog, &DatasetSelection::only([dataset.clone()]), range);
            info!(
                %dataset,
                since = ?request.since,
                until = ?request.until,
                "creating export request"
            );
            handles.insert(dataset.clone(), self.submit(&request)?);
        }
        Ok(handles)
    }

    /// Exports `selection` into `<save_path>/<dataset>.csv`, appending to any
    /// existing files without deduplication.
    pub fn export_all(
        &self,
        selection: &DatasetSelection,
        range: &TimeRange,
        save_path: &Path,
    ) -> Result<ExportReport> {
        let catalog = self.catalog()?;
        ensure_dir(save_path)?;

        let (request, handle) = self.submit_selection(&catalog, selection, range)?;
        let mut report = ExportReport::default();

        match self.poll(&handle) {
            JobStatus::Complete(manifest) => {
                for dataset in request.dataset_names() {
                    report.record_rows(dataset, 0, false);
                }
                self.persist_manifest(&manifest, save_path, &mut report);
            }
            JobStatus::Failed(reason) => {
                for dataset in request.dataset_names() {
                    report.record(dataset, DatasetOutcome::JobFailed(reason.clone()));
                }
            }
            JobStatus::Pending => {
                for dataset in request.dataset_names() {
                    report.record(dataset, DatasetOutcome::JobFailed("job never resolved".into()));
                }
            }
        }

        Ok(report)
    }

    /// Downloads the outputs of an already scheduled job (`"latest"` for the most
    /// recent one) without submitting a new export.
    pub fn download_job(&self, job_id: &str, save_path: &Path) -> Result<ExportReport> {
        let jobs = self.jobs()?;
        let job = match job_id {
            "latest" => jobs.last(),
            id => jobs.iter().rev().find(|j| j.id == id),
        };
        let job = job.ok_or_else(|| {
            ExportError::InvalidArgument(format!("no export job with id `{}`", job_id))
        })?;

        ensure_dir(save_path)?;
        info!(
            job = %job.id,
            transaction_time = ?job.job_record.transaction_time,
            outputs = job.job_record.output.len(),
            "downloading existing export job"
        );

        let mut report = ExportReport::default();
        self.persist_manifest(&job.job_record.output, save_path, &mut report);
        Ok(report)
    }

    fn persist_manifest(&self, manifest: &OutputManifest, save_path: &Path, report: &mut ExportReport) {
        // `fetch` yields exactly one item per manifest entry, in order.
        for (entry, chunk) in manifest.entries.iter().zip(self.fetch(manifest)) {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    report.record(&entry.dataset_type, DatasetOutcome::RetrievalFailed(e));
                    continue;
                }
            };

            let path = dataset_path(save_path, &chunk.dataset_type);
            match append_chunk(&path, &chunk.bytes, None) {
                Ok(appended) => report.record_rows(&chunk.dataset_type, appended.rows, false),
                Err(e) => {
                    warn!(dataset = %chunk.dataset_type, error = %e, "failed to write chunk");
                    report.record(&chunk.dataset_type, DatasetOutcome::WriteFailed(e));
                }
            }
        }
    }

    /// Brings the files for `datasets` under `save_path` up to date.
    ///
    /// Each dataset resumes from the `start_date` of its last persisted row
    /// (or from the beginning when it has no file) in its own export job. A
    /// failed job, download or write leaves that dataset's file untouched, as
    /// does a file whose last row cannot be read; the others still proceed.
    pub fn refresh(
        &self,
        until: Option<DateTime<Utc>>,
        datasets: &[String],
        save_path: &Path,
    ) -> Result<ExportReport> {
        if datasets.is_empty() {
            return Err(ExportError::InvalidArgument(
                "refresh needs at least one dataset".into(),
            ));
        }
        let datasets: BTreeSet<String> = datasets.iter().cloned().collect();

        let catalog = self.catalog()?;
        catalog.validate(&datasets)?;

        info!("checking current files");
        let mut report = ExportReport::default();
        let mut anchors = BTreeMap::new();
        let mut ranges = BTreeMap::new();
        for dataset in &datasets {
            let resume = read_anchor(&dataset_path(save_path, dataset)).and_then(|anchor| {
                let since = anchor
                    .as_ref()
                    .map(|key| parse_timestamp(&key.start_date))
                    .transpose()?;
                Ok((anchor, since))
            });
            let (anchor, since) = match resume {
                Ok(resume) => resume,
                Err(e) => {
                    warn!(%dataset, error = %e, "cannot resume dataset, skipping it");
                    report.record(dataset, DatasetOutcome::WriteFailed(e));
                    continue;
                }
            };
            info!(
                %dataset,
                since = ?since.as_ref().map(to_iso_millis),
                "resuming dataset"
            );
            ranges.insert(dataset.clone(), TimeRange::new(since, until));
            anchors.insert(dataset.clone(), anchor);
        }

        ensure_dir(save_path)?;
        let handles = self.export_parallel(&catalog, &ranges)?;
        let statuses = self.poll_all(&handles);

        for (dataset, status) in statuses {
            let outcome = match status {
                JobStatus::Complete(manifest) => {
                    let anchor = anchors.remove(&dataset).flatten();
                    self.refresh_dataset(&dataset, &manifest, anchor, save_path)
                }
                JobStatus::Failed(reason) => DatasetOutcome::JobFailed(reason),
                JobStatus::Pending => DatasetOutcome::JobFailed("job never resolved".into()),
            };
            report.record(&dataset, outcome);
        }

        info!(
            succeeded = report.succeeded().len(),
            failed = report.failed().len(),
            rows = report.rows_written(),
            "refresh finished"
        );
        Ok(report)
    }

    fn refresh_dataset(
        &self,
        dataset: &str,
        manifest: &OutputManifest,
        anchor: Option<RowKey>,
        save_path: &Path,
    ) -> DatasetOutcome {
        // Download everything first so a failed chunk never leaves a partial append.
        let chunks = match self.fetch(manifest).collect::<Result<Vec<FetchedChunk>>>() {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(%dataset, error = %e, "leaving dataset untouched");
                return DatasetOutcome::RetrievalFailed(e);
            }
        };

        let path = dataset_path(save_path, dataset);
        let bytes: Vec<&[u8]> = chunks.iter().map(|c| c.bytes.as_slice()).collect();
        let (rows, dropped_duplicate) = match append_chunks(&path, &bytes, anchor.as_ref()) {
            Ok(appended) => (appended.rows, appended.dropped_duplicate),
            Err(e) => {
                warn!(%dataset, error = %e, "failed to append chunks, leaving dataset untouched");
                return DatasetOutcome::WriteFailed(e);
            }
        };

        info!(%dataset, rows, dropped_duplicate, "dataset refreshed");
        DatasetOutcome::Written {
            rows,
            dropped_duplicate,
        }
    }
}
