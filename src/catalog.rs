use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{ExportError, Result};

/// Group name that selects every dataset in the catalog.
pub const ALL_GROUPS: &str = "all";

/// Datasets advertised by `GET info/datasets`, grouped by measurement category.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Catalog {
    #[serde(rename = "Categories", default)]
    groups: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Catalog {
    /// Builds a catalog from `(group, datasets)` pairs.
    pub fn from_groups<G, D, I>(groups: I) -> Self
    where
        I: IntoIterator<Item = (G, Vec<D>)>,
        G: Into<String>,
        D: Into<String>,
    {
        let groups = groups
            .into_iter()
            .map(|(group, datasets)| {
                let datasets = datasets
                    .into_iter()
                    .map(|d| (d.into(), Value::Object(Default::default())))
                    .collect();
                (group.into(), datasets)
            })
            .collect();
        Self { groups }
    }

    pub fn group_names(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    /// Dataset identifiers for one group, or every group when `group` is `"all"`.
    pub fn datasets(&self, group: &str) -> Result<Vec<String>> {
        if group == ALL_GROUPS {
            return Ok(self
                .groups
                .values()
                .flat_map(|datasets| datasets.keys().cloned())
                .collect());
        }

        self.groups
            .get(group)
            .map(|datasets| datasets.keys().cloned().collect())
            .ok_or_else(|| {
                ExportError::InvalidArgument(format!(
                    "unknown measurement group `{}` (available: {})",
                    group,
                    self.group_names().join(", ")
                ))
            })
    }

    pub fn contains(&self, dataset: &str) -> bool {
        self.groups.values().any(|d| d.contains_key(dataset))
    }

    /// Fails with `InvalidDataset` naming the first identifier not in the catalog.
    pub fn validate<'a, I>(&self, datasets: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a String>,
    {
        for dataset in datasets {
            if !self.contains(dataset) {
                return Err(ExportError::InvalidDataset(dataset.clone()));
            }
        }
        Ok(())
    }
}
