use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_marksheetd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn marksheetd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn submit_params() -> serde_json::Value {
    json!({
        "enrollmentNo": "BCA23000000042",
        "year": "2023-24",
        "scores": [
            { "subject": "Programming", "theory": 55, "practical": 40 }
        ],
        "remarks": "PASS"
    })
}

#[test]
fn concurrent_submissions_admit_exactly_one() {
    let workspace = temp_dir("marksheetd-race");
    let ws = workspace.to_string_lossy().to_string();

    let (mut child_a, mut stdin_a, mut reader_a) = spawn_sidecar();
    request_ok(&mut stdin_a, &mut reader_a, "a1", "workspace.select", json!({ "path": ws }));
    request_ok(
        &mut stdin_a,
        &mut reader_a,
        "a2",
        "courses.define",
        json!({
            "code": "BCA",
            "name": "Bachelor of Computer Applications",
            "subjects": [{ "name": "Programming", "theoryFull": 60, "practicalFull": 40 }]
        }),
    );
    request_ok(
        &mut stdin_a,
        &mut reader_a,
        "a3",
        "enrollments.register",
        json!({
            "enrollmentNo": "BCA23000000042",
            "studentName": "Kabir Sen",
            "guardianName": "Meera Sen",
            "dateOfBirth": "2002-11-30",
            "courseCode": "BCA",
            "centerCode": "KOL001"
        }),
    );
    request_ok(
        &mut stdin_a,
        &mut reader_a,
        "a4",
        "enrollments.setActivated",
        json!({ "enrollmentNo": "BCA23000000042", "activated": true }),
    );

    let (mut child_b, mut stdin_b, mut reader_b) = spawn_sidecar();
    request_ok(&mut stdin_b, &mut reader_b, "b1", "workspace.select", json!({ "path": ws }));

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = vec![
        ("race-a", stdin_a, reader_a),
        ("race-b", stdin_b, reader_b),
    ]
    .into_iter()
    .map(|(id, mut stdin, mut reader)| {
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            let resp = request(&mut stdin, &mut reader, id, "marksheets.submit", submit_params());
            (resp, stdin, reader)
        })
    })
    .collect();

    let mut outcomes = Vec::new();
    let mut pipes = Vec::new();
    for handle in handles {
        let (resp, stdin, reader) = handle.join().expect("submit thread");
        outcomes.push(resp);
        pipes.push((stdin, reader));
    }

    let accepted = outcomes
        .iter()
        .filter(|r| r.get("ok").and_then(|v| v.as_bool()) == Some(true))
        .count();
    assert_eq!(accepted, 1, "outcomes: {:?}", outcomes);
    let rejected: Vec<_> = outcomes
        .iter()
        .filter_map(|r| r.get("error").and_then(|e| e.get("code")).and_then(|v| v.as_str()))
        .collect();
    assert_eq!(rejected, vec!["duplicate_submission"]);

    let (mut stdin_a, mut reader_a) = pipes.remove(0);
    let page = request_ok(&mut stdin_a, &mut reader_a, "a5", "marksheets.list", json!({}));
    assert_eq!(page["total"], 1);

    drop(stdin_a);
    drop(pipes);
    let _ = child_a.wait();
    let _ = child_b.wait();

    let conn = rusqlite::Connection::open(workspace.join("marksheet.sqlite3")).expect("open db");
    let rows: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM marksheets WHERE enrollment_no = ? AND year = ?",
            ("BCA23000000042", "2023-24"),
            |r| r.get(0),
        )
        .expect("count marksheets");
    assert_eq!(rows, 1);
}
