use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{ExportError, Result};

pub const DEFAULT_API_URL: &str = "https://research.minder.care/api/";

/// Supplies the bearer credential attached to every request.
pub trait CredentialProvider: fmt::Debug + Send + Sync {
    fn token(&self) -> Result<String>;
}

/// A token known up front.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(<redacted>)")
    }
}

impl CredentialProvider for StaticToken {
    fn token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// A JSON token file of the form `{"token": "..."}`, read on every request.
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[derive(serde::Deserialize)]
struct TokenDocument {
    token: String,
}

impl CredentialProvider for TokenFile {
    fn token(&self) -> Result<String> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            ExportError::Config(format!(
                "failed to read token file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        let doc: TokenDocument = serde_json::from_str(&text).map_err(|e| {
            ExportError::Config(format!(
                "token file {} is not of the form {{\"token\": \"...\"}}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(doc.token)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base API URL, typically `https://research.minder.care/api/`.
    pub url: String,
    pub credentials: Arc<dyn CredentialProvider>,
    /// Whether to verify TLS certificates.
    pub verify: bool,
}

#[derive(Debug, Default)]
struct RcConfig {
    url: Option<String>,
    token: Option<String>,
    verify: Option<bool>,
}

pub(crate) fn load_config(
    url: Option<String>,
    token: Option<String>,
    verify: Option<bool>,
) -> Result<ClientConfig> {
    let mut url = url.or_else(|| std::env::var("MINDER_API_URL").ok());
    let mut token = token.or_else(|| std::env::var("MINDER_TOKEN").ok());

    let rc_candidates = rc_candidates();
    let mut file_verify: Option<bool> = None;

    if url.is_none() || token.is_none() || verify.is_none() {
        for rc_path in &rc_candidates {
            if rc_path.exists() {
                let cfg = read_rc(rc_path).map_err(|e| {
                    ExportError::Config(format!(
                        "failed to read configuration file {}: {}",
                        rc_path.display(),
                        e
                    ))
                })?;

                if url.is_none() {
                    url = cfg.url;
                }
                if token.is_none() {
                    token = cfg.token;
                }
                file_verify = cfg.verify;
                break;
            }
        }
    }

    let url = url.unwrap_or_else(|| DEFAULT_API_URL.to_string());

    let token = match token {
        Some(v) => v,
        None => {
            let searched = if rc_candidates.is_empty() {
                ".minderrc".to_string()
            } else {
                rc_candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            return Err(ExportError::Config(format!(
                "missing token (set MINDER_TOKEN or put `token:` in one of: {})",
                searched
            )));
        }
    };

    let verify = verify.or(file_verify).unwrap_or(true);

    Ok(ClientConfig {
        url,
        credentials: Arc::new(StaticToken::new(token)),
        verify,
    })
}

fn read_rc(path: &Path) -> std::io::Result<RcConfig> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_rc(&text))
}

fn parse_rc(text: &str) -> RcConfig {
    let mut cfg = RcConfig::default();

    // `token:` may be on one line with the value on the next.
    let mut pending_key: Option<&str> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(pk) = pending_key.take() {
            if !line.contains(':') || looks_like_url(line) {
                let v = strip_quotes(line);
                match pk {
                    "url" => cfg.url = Some(v.to_string()),
                    "token" => cfg.token = Some(v.to_string()),
                    _ => {}
                }
                continue;
            }
        }

        if let Some((k, v)) = line.split_once(':') {
            let k = k.trim();
            let v = strip_quotes(v.trim());
            match k {
                "url" | "token" if v.is_empty() => pending_key = Some(k),
                "url" => cfg.url = Some(v.to_string()),
                "token" => cfg.token = Some(v.to_string()),
                "verify" if !v.is_empty() => cfg.verify = Some(v != "0" && v != "false"),
                _ => {}
            }
        }
    }

    cfg
}

fn looks_like_url(s: &str) -> bool {
    let s = strip_quotes(s);
    s.starts_with("http://") || s.starts_with("https://")
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn rc_candidates() -> Vec<PathBuf> {
    // 1) MINDER_RC (explicit)
    // 2) ./.minderrc
    // 3) ~/.minderrc
    if let Ok(p) = std::env::var("MINDER_RC") {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(".minderrc"));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(".minderrc"));
    }
    v
}
