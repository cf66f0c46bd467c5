mod common;

use common::*;
use minder_export::{DatasetOutcome, ExportError};
use serde_json::json;
use tempfile::TempDir;

fn datasets() -> Vec<String> {
    vec!["raw_activity_pir".to_string(), "raw_door_sensor".to_string()]
}

#[test]
fn refresh_without_files_creates_both() {
    let mut server = mockito::Server::new();
    let catalog = mock_catalog(&mut server);
    let submit_pir = mock_submit(
        &mut server,
        json!({"datasets": {"raw_activity_pir": {}}}),
        "job-pir",
    );
    let submit_door = mock_submit(
        &mut server,
        json!({"datasets": {"raw_door_sensor": {}}}),
        "job-door",
    );
    mock_complete(&mut server, "job-pir", &[("raw_activity_pir", "pir.csv")]);
    mock_complete(&mut server, "job-door", &[("raw_door_sensor", "door.csv")]);
    mock_file(
        &mut server,
        "pir.csv",
        &csv_body(&[
            "2021-10-05T00:00:00.000Z,1,p1,hall",
            "2021-10-05T00:10:00.000Z,2,p1,kitchen",
        ]),
    );
    mock_file(
        &mut server,
        "door.csv",
        &csv_body(&["2021-10-05T07:00:00.000Z,9,p1,front door"]),
    );

    let dir = TempDir::new().unwrap();
    let report = common::client(&server)
        .refresh(None, &datasets(), dir.path())
        .unwrap();

    catalog.assert();
    submit_pir.assert();
    submit_door.assert();
    assert!(report.all_succeeded());
    assert!(matches!(
        report.datasets["raw_activity_pir"],
        DatasetOutcome::Written {
            rows: 2,
            dropped_duplicate: false
        }
    ));

    let pir = dir.path().join("raw_activity_pir.csv");
    let door = dir.path().join("raw_door_sensor.csv");
    assert_eq!(header_lines(&pir), 1);
    assert_eq!(header_lines(&door), 1);
    assert_eq!(data_rows(&pir).len(), 2);
    assert_eq!(data_rows(&door).len(), 1);
}

#[test]
fn refresh_resumes_from_anchor_and_drops_duplicate() {
    let dir = TempDir::new().unwrap();
    let pir = dir.path().join("raw_activity_pir.csv");
    std::fs::write(
        &pir,
        csv_body(&[
            "2021-10-05T00:00:00.000Z,41,p1,hall",
            "2021-10-06T00:00:00.000Z,42,p1,kitchen",
        ]),
    )
    .unwrap();

    let mut server = mockito::Server::new();
    mock_catalog(&mut server);
    let submit_pir = mock_submit(
        &mut server,
        json!({"datasets": {"raw_activity_pir": {}}, "since": "2021-10-06T00:00:00.000Z"}),
        "job-pir",
    );
    let submit_door = mock_submit(
        &mut server,
        json!({"datasets": {"raw_door_sensor": {}}}),
        "job-door",
    );
    mock_complete(&mut server, "job-pir", &[("raw_activity_pir", "pir.csv")]);
    mock_complete(&mut server, "job-door", &[("raw_door_sensor", "door.csv")]);
    mock_file(
        &mut server,
        "pir.csv",
        &csv_body(&[
            "2021-10-06T00:00:00.000Z,42,p1,kitchen",
            "2021-10-06T00:04:00.000Z,43,p1,hall",
            "2021-10-06T00:08:00.000Z,44,p1,lounge",
        ]),
    );
    mock_file(
        &mut server,
        "door.csv",
        &csv_body(&[
            "2021-10-06T00:00:00.000Z,42,p2,front door",
            "2021-10-06T01:00:00.000Z,43,p2,back door",
        ]),
    );

    let report = common::client(&server)
        .refresh(None, &datasets(), dir.path())
        .unwrap();

    submit_pir.assert();
    submit_door.assert();
    assert!(matches!(
        report.datasets["raw_activity_pir"],
        DatasetOutcome::Written {
            rows: 2,
            dropped_duplicate: true
        }
    ));
    assert!(matches!(
        report.datasets["raw_door_sensor"],
        DatasetOutcome::Written {
            rows: 2,
            dropped_duplicate: false
        }
    ));

    let rows = data_rows(&pir);
    let ids: Vec<&str> = rows.iter().map(|r| r[1].as_str()).collect();
    assert_eq!(ids, vec!["41", "42", "43", "44"]);
    assert_eq!(header_lines(&pir), 1);

    let door = dir.path().join("raw_door_sensor.csv");
    assert_eq!(data_rows(&door).len(), 2);
}

#[test]
fn refresh_passes_until_to_every_job() {
    let mut server = mockito::Server::new();
    mock_catalog(&mut server);
    let submit = mock_submit(
        &mut server,
        json!({"datasets": {"raw_door_sensor": {}}, "until": "2021-10-10T00:00:00.000Z"}),
        "job-door",
    );
    mock_complete(&mut server, "job-door", &[]);

    let dir = TempDir::new().unwrap();
    let until = minder_export::parse_timestamp("2021-10-10").unwrap();
    let report = common::client(&server)
        .refresh(Some(until), &["raw_door_sensor".to_string()], dir.path())
        .unwrap();

    submit.assert();
    assert_eq!(report.rows_written(), 0);
    assert!(report.all_succeeded());
    assert!(!dir.path().join("raw_door_sensor.csv").exists());
}

#[test]
fn refresh_requires_at_least_one_dataset() {
    let mut server = mockito::Server::new();
    let catalog = server.mock("GET", "/info/datasets").expect(0).create();

    let dir = TempDir::new().unwrap();
    let err = common::client(&server)
        .refresh(None, &[], dir.path())
        .unwrap_err();

    assert!(matches!(err, ExportError::InvalidArgument(_)));
    catalog.assert();
}

#[test]
fn refresh_rejects_unknown_dataset_before_submitting() {
    let mut server = mockito::Server::new();
    mock_catalog(&mut server);
    let submit = server.mock("POST", "/export").expect(0).create();

    let dir = TempDir::new().unwrap();
    let err = common::client(&server)
        .refresh(
            None,
            &["raw_activity_pir".to_string(), "raw_bogus".to_string()],
            dir.path(),
        )
        .unwrap_err();

    match err {
        ExportError::InvalidDataset(name) => assert_eq!(name, "raw_bogus"),
        other => panic!("unexpected error: {:?}", other),
    }
    submit.assert();
}

#[test]
fn failed_download_leaves_dataset_untouched() {
    let dir = TempDir::new().unwrap();
    let door = dir.path().join("raw_door_sensor.csv");
    let original = csv_body(&["2021-10-06T00:00:00.000Z,7,p2,front door"]);
    std::fs::write(&door, &original).unwrap();

    let mut server = mockito::Server::new();
    mock_catalog(&mut server);
    mock_submit(
        &mut server,
        json!({"datasets": {"raw_activity_pir": {}}}),
        "job-pir",
    );
    mock_submit(
        &mut server,
        json!({"datasets": {"raw_door_sensor": {}}, "since": "2021-10-06T00:00:00.000Z"}),
        "job-door",
    );
    mock_complete(&mut server, "job-pir", &[("raw_activity_pir", "pir.csv")]);
    mock_complete(
        &mut server,
        "job-door",
        &[("raw_door_sensor", "door-1.csv"), ("raw_door_sensor", "door-2.csv")],
    );
    mock_file(
        &mut server,
        "pir.csv",
        &csv_body(&["2021-10-06T00:04:00.000Z,43,p1,hall"]),
    );
    mock_file(
        &mut server,
        "door-1.csv",
        &csv_body(&["2021-10-06T05:00:00.000Z,8,p2,back door"]),
    );
    server
        .mock("GET", "/files/door-2.csv")
        .with_status(503)
        .create();

    let report = common::client(&server)
        .refresh(None, &datasets(), dir.path())
        .unwrap();

    assert!(matches!(
        report.datasets["raw_door_sensor"],
        DatasetOutcome::RetrievalFailed(ExportError::RetrievalFailure { .. })
    ));
    assert_eq!(report.succeeded(), vec!["raw_activity_pir"]);
    assert_eq!(report.failed(), vec!["raw_door_sensor"]);
    assert_eq!(std::fs::read_to_string(&door).unwrap(), original);
    assert_eq!(data_rows(&dir.path().join("raw_activity_pir.csv")).len(), 1);
}

#[test]
fn failed_job_does_not_abort_siblings() {
    let mut server = mockito::Server::new();
    mock_catalog(&mut server);
    mock_submit(
        &mut server,
        json!({"datasets": {"raw_activity_pir": {}}}),
        "job-pir",
    );
    mock_submit(
        &mut server,
        json!({"datasets": {"raw_door_sensor": {}}}),
        "job-door",
    );
    server
        .mock("GET", "/export/job-pir")
        .with_status(200)
        .with_body(json!({"status": 500, "id": "job-pir"}).to_string())
        .create();
    mock_complete(&mut server, "job-door", &[("raw_door_sensor", "door.csv")]);
    mock_file(
        &mut server,
        "door.csv",
        &csv_body(&["2021-10-06T05:00:00.000Z,8,p2,back door"]),
    );

    let dir = TempDir::new().unwrap();
    let report = common::client(&server)
        .refresh(None, &datasets(), dir.path())
        .unwrap();

    assert!(matches!(
        report.datasets["raw_activity_pir"],
        DatasetOutcome::JobFailed(_)
    ));
    assert!(report.datasets["raw_door_sensor"].is_success());
    assert!(!dir.path().join("raw_activity_pir.csv").exists());
}

#[test]
fn submission_without_location_is_fatal() {
    let mut server = mockito::Server::new();
    mock_catalog(&mut server);
    server
        .mock("POST", "/export")
        .with_status(202)
        .create();

    let dir = TempDir::new().unwrap();
    let err = common::client(&server)
        .refresh(None, &["raw_door_sensor".to_string()], dir.path())
        .unwrap_err();

    assert!(matches!(err, ExportError::SubmissionFailure(_)));
}

#[test]
fn malformed_download_leaves_dataset_untouched() {
    let dir = TempDir::new().unwrap();
    let door = dir.path().join("raw_door_sensor.csv");
    let original = csv_body(&["2021-10-06T00:00:00.000Z,7,p2,front door"]);
    std::fs::write(&door, &original).unwrap();

    let mut server = mockito::Server::new();
    mock_catalog(&mut server);
    mock_submit(
        &mut server,
        json!({"datasets": {"raw_door_sensor": {}}, "since": "2021-10-06T00:00:00.000Z"}),
        "job-door",
    );
    mock_complete(
        &mut server,
        "job-door",
        &[("raw_door_sensor", "door-1.csv"), ("raw_door_sensor", "door-2.csv")],
    );
    mock_file(
        &mut server,
        "door-1.csv",
        &csv_body(&[
            "2021-10-06T00:00:00.000Z,7,p2,front door",
            "2021-10-06T01:00:00.000Z,8,p2,back door",
        ]),
    );
    mock_file(
        &mut server,
        "door-2.csv",
        &csv_body(&[
            "2021-10-06T02:00:00.000Z,9,p2,back door",
            "2021-10-06T03:00:00.000Z,10,p2,front door",
            "2021-10-06T04:00:00.000Z,11,p2,front door,EXTRA",
        ]),
    );

    let report = common::client(&server)
        .refresh(None, &["raw_door_sensor".to_string()], dir.path())
        .unwrap();

    assert!(matches!(
        report.datasets["raw_door_sensor"],
        DatasetOutcome::WriteFailed(ExportError::Csv(_))
    ));
    assert_eq!(std::fs::read_to_string(&door).unwrap(), original);
}

#[test]
fn unreadable_file_skips_only_that_dataset() {
    let dir = TempDir::new().unwrap();
    let door = dir.path().join("raw_door_sensor.csv");
    std::fs::write(&door, "when,where\n2021-10-06,front door\n").unwrap();

    let mut server = mockito::Server::new();
    mock_catalog(&mut server);
    let submit_pir = mock_submit(
        &mut server,
        json!({"datasets": {"raw_activity_pir": {}}}),
        "job-pir",
    );
    mock_complete(&mut server, "job-pir", &[("raw_activity_pir", "pir.csv")]);
    mock_file(
        &mut server,
        "pir.csv",
        &csv_body(&["2021-10-06T00:04:00.000Z,43,p1,hall"]),
    );

    let report = common::client(&server)
        .refresh(None, &datasets(), dir.path())
        .unwrap();

    submit_pir.assert();
    assert!(matches!(
        report.datasets["raw_door_sensor"],
        DatasetOutcome::WriteFailed(ExportError::CsvLayout(_))
    ));
    assert_eq!(report.succeeded(), vec!["raw_activity_pir"]);
    assert_eq!(data_rows(&dir.path().join("raw_activity_pir.csv")).len(), 1);
}
