use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::{ExportError, Result};

/// Wire format for `since`/`until`: ISO-8601 UTC with millisecond precision.
const ISO_MILLIS: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub(crate) fn urljoin(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    if let Some(stripped) = path.strip_prefix('/') {
        format!("{}/{}", base, stripped)
    } else {
        format!("{}/{}", base, path)
    }
}

pub(crate) fn to_iso_millis(ts: &DateTime<Utc>) -> String {
    ts.format(ISO_MILLIS).to_string()
}

/// Parses the timestamp shapes seen in exported CSVs and on the command line.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.fff][+HH:MM]` and a bare
/// `YYYY-MM-DD` (midnight UTC). Naive values are taken as UTC.
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>> {
    let s = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    if let Some(naive) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    Err(ExportError::InvalidTimestamp(input.to_string()))
}
