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

fn admin(school_id: &str) -> serde_json::Value {
    json!({ "userId": "u-admin", "role": "admin", "schoolId": school_id })
}

#[test]
fn student_patch_semantics() {
    let workspace = temp_dir("rosterd-crud-patch");
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
    let a = admin(&school_id);

    let student_id = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "lastName": "Okafor", "firstName": "Sade", "admissionNo": "N-0042" }),
        Some(a.clone()),
    )
    .get("studentId")
    .and_then(|v| v.as_str())
    .expect("studentId")
    .to_string();

    // Rename plus null-out of the optional column in one patch.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.update",
        json!({
            "studentId": student_id,
            "patch": { "firstName": "Sade-Ann", "admissionNo": null, "active": false }
        }),
        Some(a.clone()),
    );

    let students = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.list",
        json!({}),
        Some(a.clone()),
    );
    let s = students
        .pointer("/students/0")
        .cloned()
        .expect("one student");
    assert_eq!(s.get("firstName").and_then(|v| v.as_str()), Some("Sade-Ann"));
    assert!(s.get("admissionNo").map(|v| v.is_null()).unwrap_or(false));
    assert_eq!(s.get("active").and_then(|v| v.as_bool()), Some(false));

    // Blank names and empty patches are rejected.
    let blank = request(
        &mut stdin,
        &mut reader,
        "6",
        "students.update",
        json!({ "studentId": student_id, "patch": { "lastName": "  " } }),
        Some(a.clone()),
    );
    assert_eq!(
        blank.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_params")
    );
    let empty = request(
        &mut stdin,
        &mut reader,
        "7",
        "students.update",
        json!({ "studentId": student_id, "patch": {} }),
        Some(a.clone()),
    );
    assert_eq!(
        empty.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_params")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn class_delete_cascades_enrollments_and_links() {
    let workspace = temp_dir("rosterd-crud-delete");
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
    let a = admin(&school_id);

    let session_id = request_ok(
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
        Some(a.clone()),
    )
    .get("sessionId")
    .and_then(|v| v.as_str())
    .expect("sessionId")
    .to_string();
    let class_id = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.create",
        json!({ "name": "Grade 5A" }),
        Some(a.clone()),
    )
    .get("classId")
    .and_then(|v| v.as_str())
    .expect("classId")
    .to_string();
    let teacher_id = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "teachers.create",
        json!({ "lastName": "Adeyemi", "firstName": "Kunle" }),
        Some(a.clone()),
    )
    .get("teacherId")
    .and_then(|v| v.as_str())
    .expect("teacherId")
    .to_string();
    let student_id = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.create",
        json!({ "lastName": "Okafor", "firstName": "Sade" }),
        Some(a.clone()),
    )
    .get("studentId")
    .and_then(|v| v.as_str())
    .expect("studentId")
    .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "teacherClasses.link",
        json!({ "teacherId": teacher_id, "classId": class_id }),
        Some(a.clone()),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.assignClass",
        json!({ "studentId": student_id, "classId": class_id, "sessionId": session_id }),
        Some(a.clone()),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "classes.delete",
        json!({ "classId": class_id }),
        Some(a.clone()),
    );

    // Enrollment went with the class: the student reads unassigned again and
    // the teacher link count dropped to zero.
    let current = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "students.currentClass",
        json!({ "studentId": student_id }),
        Some(a.clone()),
    );
    assert!(current
        .get("currentClass")
        .map(|v| v.is_null())
        .unwrap_or(false));

    let teachers = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "teachers.list",
        json!({}),
        Some(a.clone()),
    );
    assert_eq!(
        teachers
            .pointer("/teachers/0/classes")
            .and_then(|v| v.as_array())
            .map(|x| x.len()),
        Some(0)
    );

    let gone = request(
        &mut stdin,
        &mut reader,
        "12",
        "classes.delete",
        json!({ "classId": class_id }),
        Some(a.clone()),
    );
    assert_eq!(
        gone.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn student_delete_cascades_enrollments_and_guardian_links() {
    let workspace = temp_dir("rosterd-student-delete");
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
    let a = admin(&school_id);

    let session_id = request_ok(
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
        Some(a.clone()),
    )
    .get("sessionId")
    .and_then(|v| v.as_str())
    .expect("sessionId")
    .to_string();
    let class_id = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.create",
        json!({ "name": "Grade 5A" }),
        Some(a.clone()),
    )
    .get("classId")
    .and_then(|v| v.as_str())
    .expect("classId")
    .to_string();
    let guardian_id = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "guardians.create",
        json!({ "lastName": "Okafor", "firstName": "Ngozi" }),
        Some(a.clone()),
    )
    .get("guardianId")
    .and_then(|v| v.as_str())
    .expect("guardianId")
    .to_string();
    let student_id = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.create",
        json!({ "lastName": "Okafor", "firstName": "Sade" }),
        Some(a.clone()),
    )
    .get("studentId")
    .and_then(|v| v.as_str())
    .expect("studentId")
    .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "studentGuardians.link",
        json!({ "studentId": student_id, "guardianId": guardian_id }),
        Some(a.clone()),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.assignClass",
        json!({ "studentId": student_id, "classId": class_id, "sessionId": session_id }),
        Some(a.clone()),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "students.delete",
        json!({ "studentId": student_id }),
        Some(a.clone()),
    );

    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "classes.roster",
        json!({ "classId": class_id }),
        Some(a.clone()),
    );
    assert_eq!(
        roster
            .get("roster")
            .and_then(|v| v.as_array())
            .map(|x| x.len()),
        Some(0)
    );
    let guardians = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "guardians.list",
        json!({}),
        Some(a.clone()),
    );
    assert_eq!(
        guardians
            .pointer("/guardians/0/students")
            .and_then(|v| v.as_array())
            .map(|x| x.len()),
        Some(0)
    );

    let _ = std::fs::remove_dir_all(workspace);
}
