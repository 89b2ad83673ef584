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

fn request(
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
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
    actor: Option<serde_json::Value>,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params, actor);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .pointer("/error/code")
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn actor(role: &str, school_id: &str) -> serde_json::Value {
    json!({ "userId": format!("u-{}", role), "role": role, "schoolId": school_id })
}

struct School {
    id: String,
    session_id: String,
    class_id: String,
    student_id: String,
}

fn seed_school(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    tag: &str,
    name: &str,
) -> School {
    let id = request_ok(
        stdin,
        reader,
        &format!("{}-school", tag),
        "schools.create",
        json!({ "name": name }),
        None,
    )
    .get("schoolId")
    .and_then(|v| v.as_str())
    .expect("schoolId")
    .to_string();
    let session_id = request_ok(
        stdin,
        reader,
        &format!("{}-session", tag),
        "sessions.create",
        json!({
            "name": "2024/2025",
            "startsOn": "2024-09-01",
            "endsOn": "2025-06-30",
            "makeCurrent": true
        }),
        Some(actor("admin", &id)),
    )
    .get("sessionId")
    .and_then(|v| v.as_str())
    .expect("sessionId")
    .to_string();
    let class_id = request_ok(
        stdin,
        reader,
        &format!("{}-class", tag),
        "classes.create",
        json!({ "name": "Grade 5A" }),
        Some(actor("admin", &id)),
    )
    .get("classId")
    .and_then(|v| v.as_str())
    .expect("classId")
    .to_string();
    let student_id = request_ok(
        stdin,
        reader,
        &format!("{}-student", tag),
        "students.create",
        json!({ "lastName": "Okafor", "firstName": "Sade" }),
        Some(actor("admin", &id)),
    )
    .get("studentId")
    .and_then(|v| v.as_str())
    .expect("studentId")
    .to_string();
    School {
        id,
        session_id,
        class_id,
        student_id,
    }
}

#[test]
fn cross_tenant_entities_are_invisible() {
    let workspace = temp_dir("rosterd-tenant-scope");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
        None,
    );
    let north = seed_school(&mut stdin, &mut reader, "n", "Northside");
    let lake = seed_school(&mut stdin, &mut reader, "l", "Lakeview");

    // A class owned by the other school never resolves, with or without the
    // confirmation flag.
    for (i, force) in [(1, false), (2, true)] {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("x{}", i),
            "students.assignClass",
            json!({
                "studentId": north.student_id,
                "classId": lake.class_id,
                "sessionId": north.session_id,
                "forceReassign": force
            }),
            Some(actor("admin", &north.id)),
        );
        assert_eq!(error_code(&resp), "not_found");
    }

    // A caller scoped to Lakeview cannot touch a Northside student.
    let resp = request(
        &mut stdin,
        &mut reader,
        "x3",
        "students.assignClass",
        json!({
            "studentId": north.student_id,
            "classId": lake.class_id,
            "sessionId": lake.session_id
        }),
        Some(actor("admin", &lake.id)),
    );
    assert_eq!(error_code(&resp), "not_found");

    // Directory reads stay inside the caller's school.
    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "x4",
        "students.list",
        json!({}),
        Some(actor("admin", &lake.id)),
    );
    let students = listing
        .get("students")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(students.len(), 1);
    assert_eq!(
        students[0].get("id").and_then(|v| v.as_str()),
        Some(lake.student_id.as_str())
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn mutations_require_an_administrative_actor() {
    let workspace = temp_dir("rosterd-role-gate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
        None,
    );
    let school = seed_school(&mut stdin, &mut reader, "s", "Northside");

    // No actor at all.
    let anonymous = request(
        &mut stdin,
        &mut reader,
        "g1",
        "students.assignClass",
        json!({
            "studentId": school.student_id,
            "classId": school.class_id,
            "sessionId": school.session_id
        }),
        None,
    );
    assert_eq!(error_code(&anonymous), "unauthorized");

    // Non-administrative roles can read but not mutate.
    for (i, role) in ["teacher", "guardian", "student"].iter().enumerate() {
        let denied = request(
            &mut stdin,
            &mut reader,
            &format!("g2-{}", i),
            "students.assignClass",
            json!({
                "studentId": school.student_id,
                "classId": school.class_id,
                "sessionId": school.session_id
            }),
            Some(actor(role, &school.id)),
        );
        assert_eq!(error_code(&denied), "forbidden", "role {}", role);

        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("g3-{}", i),
            "students.list",
            json!({}),
            Some(actor(role, &school.id)),
        );
    }

    // The student is still unassigned after all denied attempts.
    let current = request_ok(
        &mut stdin,
        &mut reader,
        "g4",
        "students.currentClass",
        json!({ "studentId": school.student_id }),
        Some(actor("admin", &school.id)),
    );
    assert!(current
        .get("currentClass")
        .map(|v| v.is_null())
        .unwrap_or(false));

    let _ = std::fs::remove_dir_all(workspace);
}
