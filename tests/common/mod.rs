#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use minder_export::{Client, Sleeper, StaticToken};
use mockito::{Mock, ServerGuard};
use serde_json::json;

pub const TOKEN: &str = "test-token";
pub const HEADER: &str = "start_date,id,patient_id,location_name";

#[derive(Debug, Default)]
pub struct NoSleep {
    pub calls: AtomicUsize,
}

impl Sleeper for NoSleep {
    fn sleep(&self, _duration: Duration) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn client(server: &ServerGuard) -> Client {
    client_with_sleeper(server).0
}

/// Like [`client`], also returning the sleeper to count poll rounds.
pub fn client_with_sleeper(server: &ServerGuard) -> (Client, Arc<NoSleep>) {
    let sleeper = Arc::new(NoSleep::default());
    let client = Client::with_credentials(
        format!("{}/", server.url()),
        Arc::new(StaticToken::new(TOKEN)),
    )
    .unwrap()
    .with_sleeper(sleeper.clone());
    (client, sleeper)
}

pub fn mock_catalog(server: &mut ServerGuard) -> Mock {
    server
        .mock("GET", "/info/datasets")
        .match_header("authorization", "Bearer test-token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({"Categories": {
                "activity": {"raw_activity_pir": {"description": "PIR sensor"}},
                "care": {"raw_door_sensor": {"description": "Door sensor"}}
            }})
            .to_string(),
        )
        .create()
}

/// A `POST export` whose body must equal `body`, answered with `location`.
pub fn mock_submit(server: &mut ServerGuard, body: serde_json::Value, job: &str) -> Mock {
    let location = format!("{}/export/{}", server.url(), job);
    server
        .mock("POST", "/export")
        .match_header("authorization", "Bearer test-token")
        .match_body(mockito::Matcher::Json(body))
        .with_status(202)
        .with_header("Content-Location", &location)
        .expect(1)
        .create()
}

/// A job status reply that is already complete with one output per `(type, file)`.
pub fn mock_complete(server: &mut ServerGuard, job: &str, outputs: &[(&str, &str)]) -> Mock {
    let output: Vec<_> = outputs
        .iter()
        .map(|(kind, file)| json!({"type": kind, "url": format!("{}/files/{}", server.url(), file)}))
        .collect();
    server
        .mock("GET", format!("/export/{}", job).as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "status": 200,
                "id": job,
                "jobRecord": {"transactionTime": "2021-10-11T09:00:00.000Z", "output": output}
            })
            .to_string(),
        )
        .create()
}

pub fn mock_file(server: &mut ServerGuard, file: &str, body: &str) -> Mock {
    server
        .mock("GET", format!("/files/{}", file).as_str())
        .match_header("authorization", "Bearer test-token")
        .with_status(200)
        .with_header("content-type", "text/csv")
        .with_body(body)
        .create()
}

pub fn csv_body(rows: &[&str]) -> String {
    let mut out = String::from(HEADER);
    out.push('\n');
    for row in rows {
        out.push_str(row);
        out.push('\n');
    }
    out
}

pub fn data_rows(path: &std::path::Path) -> Vec<Vec<String>> {
    csv::Reader::from_path(path)
        .unwrap()
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect()
}

pub fn header_lines(path: &std::path::Path) -> usize {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| l.trim_end() == HEADER)
        .count()
}
