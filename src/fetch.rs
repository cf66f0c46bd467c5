use std::slice;

use tracing::{debug, warn};

use crate::client::Client;
use crate::error::Result;
use crate::job::{OutputEntry, OutputManifest};

/// Raw CSV bytes of one manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedChunk {
    pub dataset_type: String,
    pub url: String,
    pub bytes: Vec<u8>,
}

/// Lazily downloads manifest entries in order.
///
/// A failed entry yields `Err(RetrievalFailure)` and the iterator moves on to
/// the next entry.
pub struct Chunks<'a> {
    client: &'a Client,
    entries: slice::Iter<'a, OutputEntry>,
    position: usize,
    total: usize,
}

impl Iterator for Chunks<'_> {
    type Item = Result<FetchedChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entries.next()?;
        self.position += 1;
        debug!(
            dataset = %entry.dataset_type,
            "fetching output {}/{}", self.position, self.total
        );

        let result = self
            .client
            .get_bytes(&entry.url)
            .map(|bytes| FetchedChunk {
                dataset_type: entry.dataset_type.clone(),
                url: entry.url.clone(),
                bytes,
            });
        if let Err(e) = &result {
            warn!(dataset = %entry.dataset_type, error = %e, "output retrieval failed");
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl Client {
    /// Downloads every output of a completed job.
    pub fn fetch<'a>(&'a self, manifest: &'a OutputManifest) -> Chunks<'a> {
        Chunks {
            client: self,
            entries: manifest.entries.iter(),
            position: 0,
            total: manifest.len(),
        }
    }
}
