use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client as HttpClient, RequestBuilder};
use reqwest::header::{AUTHORIZATION, CONTENT_LOCATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::config::{ClientConfig, CredentialProvider, load_config};
use crate::error::{ExportError, Result, format_api_error};
use crate::job::{JobHandle, JobStatus, JobStatusReply, JobSummary, OutputManifest};
use crate::poller::{self, DEFAULT_POLL_INTERVAL, Sleeper, StatusSource, ThreadSleeper};
use crate::request::ExportRequest;
use crate::util::urljoin;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct Client {
    url: String,
    credentials: Arc<dyn CredentialProvider>,

    timeout: Duration,
    poll_interval: Duration,
    sleeper: Arc<dyn Sleeper>,

    http: HttpClient,
}

impl Client {
    /// Creates a client using environment variables and/or `.minderrc`.
    ///
    /// This is equivalent to `Client::new(None, None, None)`.
    pub fn from_env() -> Result<Self> {
        Self::new(None, None, None)
    }

    /// Creates a client using (in order of precedence):
    /// - explicit `url`/`token` arguments
    /// - environment variables `MINDER_API_URL` / `MINDER_TOKEN`
    /// - config file from `MINDER_RC` or `.minderrc`
    pub fn new(url: Option<String>, token: Option<String>, verify: Option<bool>) -> Result<Self> {
        Self::from_config(load_config(url, token, verify)?)
    }

    /// Creates a client that asks `credentials` for the bearer token on every request.
    pub fn with_credentials(
        url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        Self::from_config(ClientConfig {
            url: url.into(),
            credentials,
            verify: true,
        })
    }

    pub fn from_config(cfg: ClientConfig) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("minder-export/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("minder-export")),
        );

        let mut builder = HttpClient::builder()
            .default_headers(default_headers)
            .timeout(DEFAULT_TIMEOUT);

        if !cfg.verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder.build()?;

        Ok(Self {
            url: cfg.url,
            credentials: cfg.credentials,
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            sleeper: Arc::new(ThreadSleeper::new(true)),
            http,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Shows or hides the spinner while waiting between polls.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.sleeper = Arc::new(ThreadSleeper::new(progress));
        self
    }

    /// Replaces the wait strategy used between polling rounds.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        urljoin(&self.url, path)
    }

    /// Fetches the dataset catalog (`GET info/datasets`).
    pub fn catalog(&self) -> Result<Catalog> {
        self.api_json(&self.endpoint("info/datasets"))
    }

    pub fn group_names(&self) -> Result<Vec<String>> {
        Ok(self.catalog()?.group_names())
    }

    /// Lists previously scheduled export jobs (`GET export`), oldest first.
    pub fn jobs(&self) -> Result<Vec<JobSummary>> {
        self.api_json(&self.endpoint("export"))
    }

    pub fn poll(&self, handle: &JobHandle) -> JobStatus {
        poller::poll(self, handle, self.sleeper.as_ref(), self.poll_interval)
    }

    pub fn poll_all(&self, handles: &BTreeMap<String, JobHandle>) -> BTreeMap<String, JobStatus> {
        poller::poll_all(self, handles, self.sleeper.as_ref(), self.poll_interval)
    }

    /// Submits one export job and returns its status location.
    pub(crate) fn submit(&self, request: &ExportRequest) -> Result<JobHandle> {
        let url = self.endpoint("export");
        let resp = self
            .authorize(self.http.post(&url))?
            .json(request)
            .send()
            .map_err(|e| ExportError::SubmissionFailure(e.to_string()))?;

        let status = resp.status();
        let location = resp
            .headers()
            .get(CONTENT_LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(ExportError::SubmissionFailure(
                format_api_error(status, &url, &body).to_string(),
            ));
        }

        let location = location.ok_or_else(|| {
            ExportError::SubmissionFailure(format!(
                "HTTP {} from {} carried no Content-Location header",
                status, url
            ))
        })?;

        let handle = JobHandle::new(urljoin(&self.url, &location));
        info!(job = %handle, "export job scheduled");
        Ok(handle)
    }

    /// Downloads one output; anything other than HTTP 200 is a retrieval failure.
    pub(crate) fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let failure = |reason: String| ExportError::RetrievalFailure {
            url: url.to_string(),
            reason,
        };

        let resp = self
            .authorize(self.http.get(url))?
            .send()
            .map_err(|e| failure(e.to_string()))?;

        if resp.status() != StatusCode::OK {
            return Err(failure(format!("HTTP {}", resp.status())));
        }

        let bytes = resp.bytes().map_err(|e| failure(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn authorize(&self, req: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.credentials.token()?;
        let token = token.trim();
        let req = req.timeout(self.timeout);
        // Tokens are sometimes stored with their scheme already attached.
        if token.starts_with("Bearer ") {
            Ok(req.header(AUTHORIZATION, token))
        } else {
            Ok(req.bearer_auth(token))
        }
    }

    fn api_json<TResp: DeserializeOwned>(&self, url: &str) -> Result<TResp> {
        let resp = self.authorize(self.http.get(url))?.send()?;

        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        if !status.is_success() {
            return Err(format_api_error(status, url, &text));
        }

        serde_json::from_str::<TResp>(&text).map_err(|e| {
            ExportError::Api(format!(
                "failed to parse API JSON (url={}, status={}): {}",
                url, status, e
            ))
        })
    }

    /// Manifest of a finished job, looked up in the job listing when the
    /// status reply does not carry one.
    fn manifest_for(&self, reply: JobStatusReply, handle: &JobHandle) -> Result<OutputManifest> {
        if let Some(record) = reply.job_record {
            return Ok(record.output);
        }

        let id = reply.id.ok_or_else(|| {
            ExportError::Api(format!(
                "completed job at {} has neither an output manifest nor an id",
                handle
            ))
        })?;
        self.jobs()?
            .into_iter()
            .rev()
            .find(|job| job.id == id)
            .map(|job| job.job_record.output)
            .ok_or_else(|| ExportError::Api(format!("job {} not found in export listing", id)))
    }
}

impl StatusSource for Client {
    fn job_status(&self, handle: &JobHandle) -> Result<JobStatus> {
        let url = handle.location();
        let resp = self.authorize(self.http.get(url))?.send()?;
        let http_status = resp.status();
        let text = resp.text().unwrap_or_default();

        // The job's own state comes in the body; a 4xx is about the query itself.
        if http_status.is_client_error() {
            return Err(format_api_error(http_status, url, &text));
        }

        let reply = match serde_json::from_str::<JobStatusReply>(&text) {
            Ok(reply) => reply,
            Err(_) if !http_status.is_success() => {
                return Err(format_api_error(http_status, url, &text));
            }
            Err(e) => return Err(e.into()),
        };

        debug!(job = %handle, status = ?reply.code(), "job status");
        match reply.code() {
            Some(202) => Ok(JobStatus::Pending),
            Some(500) => Ok(JobStatus::Failed(
                reply
                    .message
                    .clone()
                    .unwrap_or_else(|| "server reported status 500".to_string()),
            )),
            _ => Ok(JobStatus::Complete(self.manifest_for(reply, handle)?)),
        }
    }
}
