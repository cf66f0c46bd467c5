use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::{ALL_GROUPS, Catalog};
use crate::util::to_iso_millis;

/// Which datasets an export covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetSelection {
    All,
    Only(BTreeSet<String>),
}

impl DatasetSelection {
    pub fn only<I, S>(datasets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(datasets.into_iter().map(Into::into).collect())
    }
}

/// Optional export bounds. `since` is inclusive on the server side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        Self { since, until }
    }
}

/// Per-dataset export options; the API currently takes none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatasetOptions {}

/// Body of `POST export`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRequest {
    pub datasets: BTreeMap<String, DatasetOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
}

impl ExportRequest {
    pub fn dataset_names(&self) -> impl Iterator<Item = &String> {
        self.datasets.keys()
    }
}

/// Builds the submission payload.
///
/// Identifiers that are not in the catalog are left out; rejecting them is the
/// caller's job.
pub fn build(catalog: &Catalog, selection: &DatasetSelection, range: &TimeRange) -> ExportRequest {
    let datasets = match selection {
        DatasetSelection::All => catalog.datasets(ALL_GROUPS).unwrap_or_default(),
        DatasetSelection::Only(wanted) => wanted
            .iter()
            .filter(|d| catalog.contains(d))
            .cloned()
            .collect(),
    };

    ExportRequest {
        datasets: datasets
            .into_iter()
            .map(|d| (d, DatasetOptions::default()))
            .collect(),
        since: range.since.as_ref().map(to_iso_millis),
        until: range.until.as_ref().map(to_iso_millis),
    }
}
