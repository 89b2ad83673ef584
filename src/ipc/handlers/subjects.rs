use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::guard;
use crate::ipc::helpers::{optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value};
use serde_json::json;
use uuid::Uuid;

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match guard::any_actor(req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT
           sub.id,
           sub.name,
           sub.code,
           d.id,
           d.name,
           (SELECT COUNT(*) FROM subject_classes sc WHERE sc.subject_id = sub.id) AS class_count,
           (SELECT COUNT(*) FROM teacher_subjects ts WHERE ts.subject_id = sub.id) AS teacher_count
         FROM subjects sub
         LEFT JOIN departments d ON d.id = sub.department_id
         WHERE sub.school_id = ?
         ORDER BY sub.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&actor.school_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let code: Option<String> = row.get(2)?;
            let department_id: Option<String> = row.get(3)?;
            let department_name: Option<String> = row.get(4)?;
            let class_count: i64 = row.get(5)?;
            let teacher_count: i64 = row.get(6)?;

            let department = match (department_id, department_name) {
                (Some(did), Some(dname)) => json!({ "id": did, "name": dname }),
                _ => serde_json::Value::Null,
            };
            Ok(json!({
                "id": id,
                "name": name,
                "code": code,
                "department": department,
                "classCount": class_count,
                "teacherCount": teacher_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match guard::admin_actor(req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let code = optional_str(req, "code");
    let department_id = optional_str(req, "departmentId");

    if let Some(did) = department_id.as_deref() {
        match db::exists_in_school(conn, "departments", did, &actor.school_id) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", "department not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    match db::school_exists(conn, &actor.school_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "school not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, school_id, department_id, name, code)
         VALUES(?, ?, ?, ?, ?)",
        (
            &subject_id,
            &actor.school_id,
            department_id.as_deref(),
            &name,
            code.as_deref(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }

    ok(&req.id, json!({ "subjectId": subject_id }))
}

fn handle_subjects_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match guard::admin_actor(req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    match db::exists_in_school(conn, "subjects", &subject_id, &actor.school_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "subject not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    if let Some(v) = patch.get("name") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.name must be a string", None);
        };
        let s = s.trim().to_string();
        if s.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        set_parts.push("name = ?".into());
        bind_values.push(Value::Text(s));
    }
    if let Some(v) = patch.get("code") {
        if v.is_null() {
            set_parts.push("code = ?".into());
            bind_values.push(Value::Null);
        } else if let Some(s) = v.as_str() {
            let t = s.trim().to_string();
            set_parts.push("code = ?".into());
            if t.is_empty() {
                bind_values.push(Value::Null);
            } else {
                bind_values.push(Value::Text(t));
            }
        } else {
            return err(
                &req.id,
                "bad_params",
                "patch.code must be a string or null",
                None,
            );
        }
    }
    if let Some(v) = patch.get("departmentId") {
        if v.is_null() {
            set_parts.push("department_id = ?".into());
            bind_values.push(Value::Null);
        } else if let Some(s) = v.as_str() {
            let did = s.trim().to_string();
            if did.is_empty() {
                return err(
                    &req.id,
                    "bad_params",
                    "patch.departmentId must not be blank",
                    None,
                );
            }
            match db::exists_in_school(conn, "departments", &did, &actor.school_id) {
                Ok(true) => {}
                Ok(false) => return err(&req.id, "not_found", "department not found", None),
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }
            set_parts.push("department_id = ?".into());
            bind_values.push(Value::Text(did));
        } else {
            return err(
                &req.id,
                "bad_params",
                "patch.departmentId must be a string or null",
                None,
            );
        }
    }

    if set_parts.is_empty() {
        return err(&req.id, "bad_params", "patch sets no fields", None);
    }

    let sql = format!(
        "UPDATE subjects SET {} WHERE id = ? AND school_id = ?",
        set_parts.join(", ")
    );
    bind_values.push(Value::Text(subject_id.clone()));
    bind_values.push(Value::Text(actor.school_id.clone()));

    if let Err(e) = conn.execute(&sql, params_from_iter(bind_values)) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }

    ok(&req.id, json!({ "subjectId": subject_id }))
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match guard::admin_actor(req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match db::exists_in_school(conn, "subjects", &subject_id, &actor.school_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "subject not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "DELETE FROM teacher_subjects WHERE subject_id = ?",
        [&subject_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "teacher_subjects" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM subject_classes WHERE subject_id = ?",
        [&subject_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "subject_classes" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM subjects WHERE id = ?", [&subject_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.update" => Some(handle_subjects_update(state, req)),
        "subjects.delete" => Some(handle_subjects_delete(state, req)),
        _ => None,
    }
}
