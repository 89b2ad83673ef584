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
    let exe = env!("CARGO_BIN_EXE_rosterd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rosterd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
    actor: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if let Some(actor) = actor {
        payload["actor"] = actor;
    }
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn admin(school_id: &str) -> serde_json::Value {
    json!({ "userId": "u-admin", "role": "admin", "schoolId": school_id })
}

#[test]
fn set_current_keeps_exactly_one_session_flagged() {
    let workspace = temp_dir("rosterd-session-flip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
        None,
    );
    let school_id = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schools.create",
        json!({ "name": "Northside" }),
        None,
    )
    .get("schoolId")
    .and_then(|v| v.as_str())
    .expect("schoolId")
    .to_string();

    let session_old = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "sessions.create",
        json!({
            "name": "2024/2025",
            "startsOn": "2024-09-01",
            "endsOn": "2025-06-30",
            "makeCurrent": true
        }),
        Some(admin(&school_id)),
    )
    .get("sessionId")
    .and_then(|v| v.as_str())
    .expect("sessionId")
    .to_string();
    let session_new = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "sessions.create",
        json!({
            "name": "2025/2026",
            "startsOn": "2025-09-01",
            "endsOn": "2026-06-30"
        }),
        Some(admin(&school_id)),
    )
    .get("sessionId")
    .and_then(|v| v.as_str())
    .expect("sessionId")
    .to_string();

    let class_id = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "classes.create",
        json!({ "name": "Grade 5A" }),
        Some(admin(&school_id)),
    )
    .get("classId")
    .and_then(|v| v.as_str())
    .expect("classId")
    .to_string();
    let student_id = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.create",
        json!({ "lastName": "Okafor", "firstName": "Sade" }),
        Some(admin(&school_id)),
    )
    .get("studentId")
    .and_then(|v| v.as_str())
    .expect("studentId")
    .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.assignClass",
        json!({
            "studentId": student_id,
            "classId": class_id,
            "sessionId": session_old
        }),
        Some(admin(&school_id)),
    );

    // Flip the current session.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "sessions.setCurrent",
        json!({ "sessionId": session_new }),
        Some(admin(&school_id)),
    );

    let sessions = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "sessions.list",
        json!({}),
        Some(admin(&school_id)),
    );
    let sessions = sessions
        .get("sessions")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(sessions.len(), 2);
    let current: Vec<&str> = sessions
        .iter()
        .filter(|s| s.get("isCurrent").and_then(|v| v.as_bool()) == Some(true))
        .filter_map(|s| s.get("id").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(current, vec![session_new.as_str()]);

    // Directory reads now scope membership to the new session, where the
    // student has no class yet.
    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "students.list",
        json!({}),
        Some(admin(&school_id)),
    );
    assert_eq!(
        listing.get("sessionId").and_then(|v| v.as_str()),
        Some(session_new.as_str())
    );
    let students = listing
        .get("students")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(students.len(), 1);
    assert!(students[0]
        .get("currentClass")
        .map(|v| v.is_null())
        .unwrap_or(false));

    // The old session's membership is still there when asked for explicitly.
    let listing_old = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "students.list",
        json!({ "sessionId": session_old }),
        Some(admin(&school_id)),
    );
    let students_old = listing_old
        .get("students")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(
        students_old[0]
            .pointer("/currentClass/name")
            .and_then(|v| v.as_str()),
        Some("Grade 5A")
    );

    let _ = std::fs::remove_dir_all(workspace);
}
