//! Append-only persistence of exported CSV chunks.
//!
//! Each dataset lives in `<save_path>/<dataset>.csv`. Rows are only ever
//! appended; the header is written on the first write to a file. On refresh
//! the `(start_date, id)` key of the last persisted row is the anchor: the
//! export API's `since` bound is inclusive, so a fetched chunk may start with
//! that same row, in which case it is dropped.
//!
//! Only a single overlapping row is detected. If the server ever re-sends more
//! than one already-persisted row, the extra rows are appended as duplicates.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, Terminator, WriterBuilder};
use tracing::debug;

use crate::error::{ExportError, Result};

pub const START_DATE_COLUMN: &str = "start_date";
pub const ID_COLUMN: &str = "id";

/// Composite key identifying a persisted row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowKey {
    pub start_date: String,
    pub id: String,
}

impl RowKey {
    pub fn new(start_date: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            start_date: start_date.into(),
            id: id.into(),
        }
    }
}

/// Result of appending one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appended {
    pub rows: usize,
    pub dropped_duplicate: bool,
    /// Key of the last row now in the file, usable as the next anchor.
    pub last_key: Option<RowKey>,
}

pub fn dataset_path(save_path: &Path, dataset: &str) -> PathBuf {
    save_path.join(format!("{}.csv", dataset))
}

fn has_content(path: &Path) -> Result<bool> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.len() > 0),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn key_columns(headers: &StringRecord) -> Option<(usize, usize)> {
    let date = headers.iter().position(|h| h.trim() == START_DATE_COLUMN)?;
    let id = headers.iter().position(|h| h.trim() == ID_COLUMN)?;
    Some((date, id))
}

fn key_of(record: &StringRecord, (date, id): (usize, usize)) -> Option<RowKey> {
    Some(RowKey::new(record.get(date)?.trim(), record.get(id)?.trim()))
}

/// Bytes read from the end of a file per step when looking for its last line.
const TAIL_BLOCK: u64 = 8 * 1024;

/// Last non-blank line of `file`, or `None` when the file has at most one line.
fn last_line(file: &mut File) -> std::io::Result<Option<Vec<u8>>> {
    let len = file.seek(SeekFrom::End(0))?;
    let mut block = TAIL_BLOCK;
    loop {
        let start = len.saturating_sub(block);
        file.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; (len - start) as usize];
        file.read_exact(&mut buf)?;

        let mut end = buf.len();
        while end > 0 && matches!(buf[end - 1], b'\n' | b'\r') {
            end -= 1;
        }
        if let Some(pos) = buf[..end].iter().rposition(|&b| b == b'\n') {
            return Ok(Some(buf[pos + 1..end].to_vec()));
        }
        if start == 0 {
            return Ok(None);
        }
        block *= 2;
    }
}

fn last_record_by_scan(path: &Path) -> Result<Option<StringRecord>> {
    let mut reader = ReaderBuilder::new().from_path(path)?;
    let mut last = None;
    for record in reader.records() {
        last = Some(record?);
    }
    Ok(last)
}

/// Key of the last row of an existing dataset file, or `None` when the file is
/// absent or holds no rows.
///
/// Only the tail of the file is read. A last line that does not parse into a
/// full row (a quoted field spanning lines) falls back to scanning the file.
pub fn read_anchor(path: &Path) -> Result<Option<RowKey>> {
    if !has_content(path)? {
        return Ok(None);
    }

    let headers = file_headers(path)?;
    let columns = key_columns(&headers).ok_or_else(|| {
        ExportError::CsvLayout(format!(
            "{} has no `{}`/`{}` columns",
            path.display(),
            START_DATE_COLUMN,
            ID_COLUMN
        ))
    })?;

    let Some(line) = last_line(&mut File::open(path)?)? else {
        return Ok(None);
    };
    let tail = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_slice())
        .records()
        .next()
        .transpose()?;

    let last = match tail {
        Some(record) if record.len() == headers.len() => Some(record),
        _ => {
            debug!(path = %path.display(), "last line is not a full row, scanning file");
            last_record_by_scan(path)?
        }
    };
    Ok(last.and_then(|r| key_of(&r, columns)))
}

fn file_headers(path: &Path) -> Result<StringRecord> {
    let mut reader = ReaderBuilder::new().from_path(path)?;
    Ok(reader.headers()?.clone())
}

/// Maps each column of `target` to its position in `source`.
fn column_mapping(target: &StringRecord, source: &StringRecord, path: &Path) -> Result<Vec<usize>> {
    if target.len() != source.len() {
        return Err(ExportError::CsvLayout(format!(
            "{} has {} columns but the fetched chunk has {}",
            path.display(),
            target.len(),
            source.len()
        )));
    }
    target
        .iter()
        .map(|col| {
            source.iter().position(|c| c == col).ok_or_else(|| {
                ExportError::CsvLayout(format!(
                    "fetched chunk lacks column `{}` present in {}",
                    col,
                    path.display()
                ))
            })
        })
        .collect()
}

fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    let len = file.seek(SeekFrom::End(0))?;
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Rows parsed from fetched chunks, aligned to the target file's columns and
/// not yet written.
struct Staged {
    /// Header to write first; set only when the file is new or empty.
    header: Option<StringRecord>,
    rows: Vec<StringRecord>,
    dropped_duplicate: bool,
    last_key: Option<RowKey>,
}

fn stage<B: AsRef<[u8]>>(path: &Path, chunks: &[B], anchor: Option<&RowKey>) -> Result<Staged> {
    let existing = has_content(path)?;
    let mut target = if existing {
        Some(file_headers(path)?)
    } else {
        None
    };

    let mut rows = Vec::new();
    let mut dropped_duplicate = false;
    let mut last_key = anchor.cloned();

    for chunk in chunks {
        let mut reader = ReaderBuilder::new().from_reader(chunk.as_ref());
        let headers = reader.headers()?.clone();
        if headers.is_empty() {
            continue;
        }

        let chunk_keys = key_columns(&headers);
        if last_key.is_some() && chunk_keys.is_none() {
            return Err(ExportError::CsvLayout(format!(
                "fetched chunk for {} has no `{}`/`{}` columns",
                path.display(),
                START_DATE_COLUMN,
                ID_COLUMN
            )));
        }

        let mapping = match &target {
            Some(target) => column_mapping(target, &headers, path)?,
            None => {
                target = Some(headers.clone());
                (0..headers.len()).collect()
            }
        };

        for (idx, record) in reader.records().enumerate() {
            let record = record?;
            let key = chunk_keys.and_then(|cols| key_of(&record, cols));

            if idx == 0 && last_key.is_some() && key == last_key {
                debug!(path = %path.display(), "dropping leading row already persisted");
                dropped_duplicate = true;
                continue;
            }

            rows.push(
                mapping
                    .iter()
                    .map(|&i| record.get(i).unwrap_or(""))
                    .collect::<StringRecord>(),
            );
            if key.is_some() {
                last_key = key;
            }
        }
    }

    Ok(Staged {
        header: if existing { None } else { target },
        rows,
        dropped_duplicate,
        last_key,
    })
}

/// Appends fetched CSV chunks to `path`, in order.
///
/// Every chunk is parsed and checked against the file's columns before the
/// file is opened, so an error leaves the file as it was. The header is
/// written if the file is new or empty. When a chunk's first row key equals
/// the anchor (the given one, then the last row staged so far) that row is
/// skipped. Columns are written in the existing file's order.
pub fn append_chunks<B: AsRef<[u8]>>(
    path: &Path,
    chunks: &[B],
    anchor: Option<&RowKey>,
) -> Result<Appended> {
    let staged = stage(path, chunks, anchor)?;
    let appended = Appended {
        rows: staged.rows.len(),
        dropped_duplicate: staged.dropped_duplicate,
        last_key: staged.last_key,
    };
    if staged.header.is_none() && staged.rows.is_empty() {
        return Ok(appended);
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;
    if staged.header.is_none() && !ends_with_newline(&mut file)? {
        file.write_all(b"\n")?;
    }

    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(file);
    if let Some(header) = &staged.header {
        writer.write_record(header)?;
    }
    for row in &staged.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    debug!(path = %path.display(), rows = appended.rows, "appended rows");

    Ok(appended)
}

/// Appends a single fetched CSV chunk to `path`; see [`append_chunks`].
pub fn append_chunk(path: &Path, chunk: &[u8], anchor: Option<&RowKey>) -> Result<Appended> {
    append_chunks(path, &[chunk], anchor)
}
