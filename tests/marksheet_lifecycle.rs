use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
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

fn error_code(value: &serde_json::Value) -> &str {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false), "{}", value);
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

const ENROLLMENT: &str = "DCA24000000017";

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &PathBuf) {
    request_ok(
        stdin,
        reader,
        "seed-1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        stdin,
        reader,
        "seed-2",
        "courses.define",
        json!({
            "code": "DCA",
            "name": "Diploma in Computer Applications",
            "durationMonths": 12,
            "subjects": [
                { "name": "Fundamentals", "theoryFull": 70, "practicalFull": 30 },
                { "name": "Office Tools", "theoryFull": 70, "practicalFull": 30 }
            ]
        }),
    );
    request_ok(
        stdin,
        reader,
        "seed-3",
        "enrollments.register",
        json!({
            "enrollmentNo": ENROLLMENT,
            "studentName": "Riya Das",
            "guardianName": "Amit Das",
            "dateOfBirth": "2004-03-09",
            "courseCode": "DCA",
            "centerCode": "WB0123"
        }),
    );
}

fn marks(fundamentals: (i64, i64), office: (i64, i64), remarks: &str) -> serde_json::Value {
    json!({
        "enrollmentNo": ENROLLMENT,
        "year": "2024",
        "scores": [
            { "subject": "Fundamentals", "theory": fundamentals.0, "practical": fundamentals.1 },
            { "subject": "Office Tools", "theory": office.0, "practical": office.1 }
        ],
        "remarks": remarks
    })
}

#[test]
fn submit_verify_generate_flow() {
    let workspace = temp_dir("marksheetd-lifecycle");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    seed(&mut stdin, &mut reader, &workspace);

    let lookup = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "enrollments.get",
        json!({ "enrollmentNo": ENROLLMENT }),
    );
    assert_eq!(lookup["enrollment"]["activated"], false);
    assert_eq!(lookup["course"]["subjects"].as_array().map(|s| s.len()), Some(2));

    let inactive = request(
        &mut stdin,
        &mut reader,
        "2",
        "marksheets.submit",
        marks((60, 25), (50, 20), "PASS"),
    );
    assert_eq!(error_code(&inactive), "enrollment_not_active");

    let activated = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "enrollments.setActivated",
        json!({ "enrollmentNo": ENROLLMENT, "activated": true }),
    );
    assert_eq!(activated["changed"], true);
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "enrollments.setActivated",
        json!({ "enrollmentNo": ENROLLMENT, "activated": true }),
    );
    assert_eq!(again["changed"], false);

    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "marksheets.submit",
        marks((60, 25), (50, 20), "PASS"),
    );
    let sheet = &submitted["marksheet"];
    assert_eq!(sheet["totalMarks"], 155);
    assert_eq!(sheet["totalFull"], 200);
    assert_eq!(sheet["percentage"].as_f64(), Some(77.5));
    assert_eq!(sheet["grade"], "A");
    assert_eq!(sheet["remarks"], "PASS");
    assert_eq!(sheet["verified"], false);
    let id = sheet["id"].as_str().expect("marksheet id").to_string();

    let not_verified = request(
        &mut stdin,
        &mut reader,
        "6",
        "marksheets.generate",
        json!({ "id": id, "docType": "marksheet" }),
    );
    assert_eq!(error_code(&not_verified), "not_verified");

    let status = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "marksheets.status",
        json!({ "enrollmentNo": ENROLLMENT, "year": "2024" }),
    );
    assert_eq!(status["state"], "submitted");
    assert_eq!(status["generationEligible"], false);

    request_ok(&mut stdin, &mut reader, "8", "marksheets.verify", json!({ "id": id }));
    let twice = request(&mut stdin, &mut reader, "9", "marksheets.verify", json!({ "id": id }));
    assert_eq!(error_code(&twice), "invalid_transition");

    let generated = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "marksheets.generate",
        json!({ "id": id, "docType": "certificate" }),
    );
    let location = generated["document"]["location"]
        .as_str()
        .expect("document location");
    assert!(PathBuf::from(location).is_file());
    assert!(location.starts_with(workspace.join("documents").to_string_lossy().as_ref()));
    assert_eq!(generated["document"]["docType"], "certificate");

    let bad_doc = request(
        &mut stdin,
        &mut reader,
        "11",
        "marksheets.generate",
        json!({ "id": id, "docType": "transcript" }),
    );
    assert_eq!(error_code(&bad_doc), "bad_params");

    // Editing keeps verification unless the workspace opts into re-verification.
    let edited = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "marksheets.edit",
        json!({
            "id": id,
            "scores": [
                { "subject": "Fundamentals", "theory": 70, "practical": 30 },
                { "subject": "Office Tools", "theory": 65, "practical": 16 }
            ],
            "remarks": "PASS"
        }),
    );
    assert_eq!(edited["marksheet"]["totalMarks"], 181);
    assert_eq!(edited["marksheet"]["percentage"].as_f64(), Some(90.5));
    assert_eq!(edited["marksheet"]["grade"], "AA");
    assert_eq!(edited["marksheet"]["year"], "2024");
    assert_eq!(edited["marksheet"]["verified"], true);

    request_ok(&mut stdin, &mut reader, "13", "marksheets.unverify", json!({ "id": id }));
    let reopened = request(
        &mut stdin,
        &mut reader,
        "14",
        "marksheets.unverify",
        json!({ "id": id }),
    );
    assert_eq!(error_code(&reopened), "invalid_transition");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn duplicate_submission_is_rejected_and_first_is_kept() {
    let workspace = temp_dir("marksheetd-duplicate");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    seed(&mut stdin, &mut reader, &workspace);
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "enrollments.setActivated",
        json!({ "enrollmentNo": ENROLLMENT, "activated": true }),
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "marksheets.submit",
        marks((60, 25), (50, 20), "PASS"),
    );
    let second = request(
        &mut stdin,
        &mut reader,
        "3",
        "marksheets.submit",
        marks((10, 5), (10, 5), "FAIL"),
    );
    assert_eq!(error_code(&second), "duplicate_submission");
    assert_eq!(second["error"]["details"]["year"], "2024");

    let stored = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "marksheets.get",
        json!({ "enrollmentNo": ENROLLMENT, "year": "2024" }),
    );
    assert_eq!(stored["marksheet"]["id"], first["marksheet"]["id"]);
    assert_eq!(stored["marksheet"]["totalMarks"], 155);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn validation_failures_name_the_field() {
    let workspace = temp_dir("marksheetd-validation");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    seed(&mut stdin, &mut reader, &workspace);
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "enrollments.setActivated",
        json!({ "enrollmentNo": ENROLLMENT, "activated": true }),
    );

    let over = request(
        &mut stdin,
        &mut reader,
        "2",
        "marksheets.submit",
        marks((71, 25), (50, 20), "PASS"),
    );
    assert_eq!(error_code(&over), "validation_failed");
    assert_eq!(over["error"]["details"]["field"], "scores[0].theory");

    let unset = request(
        &mut stdin,
        &mut reader,
        "3",
        "marksheets.submit",
        marks((60, 25), (50, 20), "Select"),
    );
    assert_eq!(error_code(&unset), "validation_failed");
    assert_eq!(unset["error"]["details"]["field"], "remarks");

    let dup_enrollment = request(
        &mut stdin,
        &mut reader,
        "4",
        "enrollments.register",
        json!({
            "enrollmentNo": ENROLLMENT,
            "studentName": "Someone Else",
            "guardianName": "Guardian",
            "dateOfBirth": "2003-01-01",
            "courseCode": "DCA",
            "centerCode": "WB0999"
        }),
    );
    assert_eq!(error_code(&dup_enrollment), "duplicate_enrollment");

    let missing = request(
        &mut stdin,
        &mut reader,
        "5",
        "marksheets.get",
        json!({ "enrollmentNo": ENROLLMENT, "year": "2030" }),
    );
    assert_eq!(error_code(&missing), "not_found");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn listing_filters_by_center_and_pages() {
    let workspace = temp_dir("marksheetd-listing");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    seed(&mut stdin, &mut reader, &workspace);

    for i in 0..6 {
        let center = if i % 2 == 0 { "KOL001" } else { "DEL002" };
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("reg-{}", i),
            "enrollments.register",
            json!({
                "enrollmentNo": format!("DCA2400000010{}", i),
                "studentName": format!("Student {}", i),
                "guardianName": "Guardian",
                "dateOfBirth": "2005-06-01",
                "courseCode": "DCA",
                "centerCode": center
            }),
        );
    }

    let all = request_ok(&mut stdin, &mut reader, "1", "enrollments.list", json!({}));
    assert_eq!(all["total"], 7);
    assert_eq!(all["pageSize"], 5);
    assert_eq!(all["items"].as_array().map(|v| v.len()), Some(5));

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "enrollments.list",
        json!({ "page": 2 }),
    );
    assert_eq!(second["items"].as_array().map(|v| v.len()), Some(2));

    let kolkata = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "enrollments.list",
        json!({ "search": "kol" }),
    );
    assert_eq!(kolkata["total"], 3);

    let bad = request(
        &mut stdin,
        &mut reader,
        "4",
        "enrollments.list",
        json!({ "pageSize": 0 }),
    );
    assert_eq!(error_code(&bad), "bad_params");

    drop(stdin);
    let _ = child.wait();
}
