use reqwest::StatusCode;
use thiserror::Error;

/// Errors produced by the export client.
///
/// Validation errors (`InvalidDataset`, `InvalidArgument`) are raised before any
/// network call. `JobFailed` and `RetrievalFailure` are reported per dataset and
/// never abort sibling datasets.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("dataset `{0}` is not available in the catalog")]
    InvalidDataset(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("export job submission failed: {0}")]
    SubmissionFailure(String),

    #[error("export job {job} failed: {reason}")]
    JobFailed { job: String, reason: String },

    #[error("retrieval of {url} failed: {reason}")]
    RetrievalFailure { url: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Api(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("unexpected CSV layout: {0}")]
    CsvLayout(String),

    #[error("failed to parse API JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid timestamp `{0}`")]
    InvalidTimestamp(String),
}

pub type Result<T, E = ExportError> = std::result::Result<T, E>;

#[derive(Debug, Default, serde::Deserialize)]
pub(crate) struct ApiErrorResponse {
    #[serde(default)]
    pub(crate) title: Option<String>,
    #[serde(default)]
    pub(crate) status: Option<u16>,
    #[serde(default)]
    pub(crate) detail: Option<String>,
    // Some endpoints respond with {"message": ...} or {"error": ...}
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) error: Option<String>,
}

/// Turns a non-success response into an actionable error message.
pub(crate) fn format_api_error(status: StatusCode, url: &str, body: &str) -> ExportError {
    let parsed = serde_json::from_str::<ApiErrorResponse>(body).unwrap_or_default();
    let title = parsed
        .title
        .as_deref()
        .or(parsed.message.as_deref())
        .or(parsed.error.as_deref())
        .unwrap_or("");
    let detail = parsed.detail.as_deref().unwrap_or("");
    let status_in_body = parsed.status.unwrap_or(status.as_u16());
    // Non-JSON bodies are still worth showing.
    let raw = if title.is_empty() && detail.is_empty() {
        body.trim()
    } else {
        ""
    };

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return ExportError::Api(format!(
            "authentication/authorization failed (HTTP {}).\n- Check that the token in MINDER_TOKEN or .minderrc is valid\n- Ensure the token has not expired\n\nServer message: {}{}{}\nrequest: {}",
            status_in_body, title, detail, raw, url
        ));
    }

    if status == StatusCode::NOT_FOUND {
        return ExportError::Api(format!(
            "API endpoint not found (HTTP 404).\n- Your configured base URL may be incorrect\n- Recommended url: https://research.minder.care/api/\n\nServer message: {}{}{}\nrequest: {}",
            title, detail, raw, url
        ));
    }

    ExportError::Api(format!(
        "API request failed: HTTP {} for url ({})\n{}\n{}{}",
        status_in_body, url, title, detail, raw
    ))
}
