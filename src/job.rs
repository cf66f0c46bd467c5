use std::fmt;

use serde_json::Value;

/// Status location returned in `Content-Location` when a job is submitted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    pub fn location(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One downloadable output of a completed job.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct OutputEntry {
    #[serde(rename = "type")]
    pub dataset_type: String,
    pub url: String,
}

/// Outputs attached to a completed job, in server order.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(transparent)]
pub struct OutputManifest {
    pub entries: Vec<OutputEntry>,
}

impl OutputManifest {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dataset_types(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.dataset_type.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Failed(String),
    Complete(OutputManifest),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    #[serde(default)]
    pub transaction_time: Option<String>,
    #[serde(default)]
    pub output: OutputManifest,
}

/// An entry of `GET export`.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(default)]
    pub job_record: JobRecord,
}

/// Body of `GET <job-status-location>`.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobStatusReply {
    #[serde(default)]
    pub(crate) status: Value,
    #[serde(default, deserialize_with = "opt_id_as_string")]
    pub(crate) id: Option<String>,
    #[serde(default)]
    pub(crate) job_record: Option<JobRecord>,
    #[serde(default)]
    pub(crate) message: Option<String>,
}

impl JobStatusReply {
    /// Status code carried in the body; the server sends it as a number but
    /// strings are tolerated.
    pub(crate) fn code(&self) -> Option<u16> {
        match &self.status {
            Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

fn id_as_string<'de, D>(de: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = <Value as serde::Deserialize>::deserialize(de)?;
    Ok(match v {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

fn opt_id_as_string<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = <Value as serde::Deserialize>::deserialize(de)?;
    Ok(match v {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}
