use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::guard;
use crate::ipc::helpers::{optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match guard::any_actor(req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // Scope the class membership column to the requested session, falling
    // back to the school's current one. No session means no membership data.
    let session_id = match optional_str(req, "sessionId") {
        Some(v) => Some(v),
        None => match db::current_session_id(conn, &actor.school_id) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
    };

    let mut guardians_by_student: HashMap<String, Vec<serde_json::Value>> = HashMap::new();
    {
        let mut stmt = match conn.prepare(
            "SELECT sg.student_id, g.id, g.last_name, g.first_name, sg.relationship
             FROM student_guardians sg
             JOIN guardians g ON g.id = sg.guardian_id
             WHERE g.school_id = ?
             ORDER BY g.last_name, g.first_name",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let links = stmt
            .query_map([&actor.school_id], |row| {
                let student_id: String = row.get(0)?;
                let guardian_id: String = row.get(1)?;
                let last_name: String = row.get(2)?;
                let first_name: String = row.get(3)?;
                let relationship: Option<String> = row.get(4)?;
                Ok((
                    student_id,
                    json!({
                        "id": guardian_id,
                        "displayName": format!("{}, {}", last_name, first_name),
                        "relationship": relationship
                    }),
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match links {
            Ok(pairs) => {
                for (student_id, guardian) in pairs {
                    guardians_by_student.entry(student_id).or_default().push(guardian);
                }
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.last_name, s.first_name, s.admission_no, s.birth_date, s.active,
                e.class_id, c.name, c.section, e.roll_number
         FROM students s
         LEFT JOIN class_enrollments e
           ON e.student_id = s.id AND e.session_id = ? AND e.status = 'active'
         LEFT JOIN classes c ON c.id = e.class_id
         WHERE s.school_id = ?
         ORDER BY s.last_name, s.first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((session_id.as_deref(), &actor.school_id), |row| {
            let id: String = row.get(0)?;
            let last_name: String = row.get(1)?;
            let first_name: String = row.get(2)?;
            let admission_no: Option<String> = row.get(3)?;
            let birth_date: Option<String> = row.get(4)?;
            let active: i64 = row.get(5)?;
            let class_id: Option<String> = row.get(6)?;
            let class_name: Option<String> = row.get(7)?;
            let class_section: Option<String> = row.get(8)?;
            let roll_number: Option<String> = row.get(9)?;

            let current_class = match (class_id, class_name) {
                (Some(cid), Some(cname)) => json!({
                    "id": cid,
                    "name": cname,
                    "section": class_section,
                    "rollNumber": roll_number
                }),
                _ => serde_json::Value::Null,
            };

            Ok((
                id.clone(),
                json!({
                    "id": id,
                    "lastName": last_name,
                    "firstName": first_name,
                    "displayName": format!("{}, {}", last_name, first_name),
                    "admissionNo": admission_no,
                    "birthDate": birth_date,
                    "active": active != 0,
                    "currentClass": current_class
                }),
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(pairs) => {
            let students: Vec<serde_json::Value> = pairs
                .into_iter()
                .map(|(id, mut student)| {
                    let guardians = guardians_by_student.remove(&id).unwrap_or_default();
                    student["guardians"] = json!(guardians);
                    student
                })
                .collect();
            ok(
                &req.id,
                json!({ "sessionId": session_id, "students": students }),
            )
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match guard::admin_actor(req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let last_name = match required_str(req, "lastName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let first_name = match required_str(req, "firstName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let admission_no = optional_str(req, "admissionNo");
    let birth_date = optional_str(req, "birthDate");
    let active = req
        .params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    match db::school_exists(conn, &actor.school_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "school not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(
           id, school_id, last_name, first_name, admission_no, birth_date,
           active, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?,
           strftime('%Y-%m-%dT%H:%M:%SZ','now'),
           strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &student_id,
            &actor.school_id,
            &last_name,
            &first_name,
            admission_no.as_deref(),
            birth_date.as_deref(),
            if active { 1 } else { 0 },
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match guard::admin_actor(req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    match db::exists_in_school(conn, "students", &student_id, &actor.school_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    for (key, column) in [("lastName", "last_name"), ("firstName", "first_name")] {
        if let Some(v) = patch.get(key) {
            let Some(s) = v.as_str() else {
                return err(
                    &req.id,
                    "bad_params",
                    format!("patch.{} must be a string", key),
                    None,
                );
            };
            let s = s.trim().to_string();
            if s.is_empty() {
                return err(
                    &req.id,
                    "bad_params",
                    format!("{} must not be empty", key),
                    None,
                );
            }
            set_parts.push(format!("{} = ?", column));
            bind_values.push(Value::Text(s));
        }
    }
    for (key, column) in [("admissionNo", "admission_no"), ("birthDate", "birth_date")] {
        if let Some(v) = patch.get(key) {
            if v.is_null() {
                set_parts.push(format!("{} = ?", column));
                bind_values.push(Value::Null);
            } else if let Some(s) = v.as_str() {
                let t = s.trim().to_string();
                set_parts.push(format!("{} = ?", column));
                if t.is_empty() {
                    bind_values.push(Value::Null);
                } else {
                    bind_values.push(Value::Text(t));
                }
            } else {
                return err(
                    &req.id,
                    "bad_params",
                    format!("patch.{} must be a string or null", key),
                    None,
                );
            }
        }
    }
    if let Some(v) = patch.get("active") {
        let Some(b) = v.as_bool() else {
            return err(&req.id, "bad_params", "patch.active must be a boolean", None);
        };
        set_parts.push("active = ?".into());
        bind_values.push(Value::Integer(if b { 1 } else { 0 }));
    }

    if set_parts.is_empty() {
        return err(&req.id, "bad_params", "patch sets no fields", None);
    }

    set_parts.push("updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')".into());
    let sql = format!(
        "UPDATE students SET {} WHERE id = ? AND school_id = ?",
        set_parts.join(", ")
    );
    bind_values.push(Value::Text(student_id.clone()));
    bind_values.push(Value::Text(actor.school_id.clone()));

    if let Err(e) = conn.execute(&sql, params_from_iter(bind_values)) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match guard::admin_actor(req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ? AND school_id = ?",
            [&student_id, &actor.school_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Dependent rows first (no ON DELETE CASCADE).
    if let Err(e) = tx.execute(
        "DELETE FROM class_enrollments WHERE student_id = ?",
        [&student_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "class_enrollments" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM student_guardians WHERE student_id = ?",
        [&student_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "student_guardians" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
