use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::guard;
use crate::ipc::helpers::{optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value};
use serde_json::json;
use uuid::Uuid;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match guard::any_actor(req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let session_id = match optional_str(req, "sessionId") {
        Some(v) => Some(v),
        None => match db::current_session_id(conn, &actor.school_id) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
    };

    // Correlated subqueries keep the counts join-free; the enrolled count is
    // scoped to the resolved session.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.section,
           l.id,
           l.name,
           (SELECT COUNT(*) FROM class_enrollments e
             WHERE e.class_id = c.id AND e.session_id = ? AND e.status = 'active')
             AS enrolled_count,
           (SELECT COUNT(*) FROM teacher_classes tc WHERE tc.class_id = c.id) AS teacher_count,
           (SELECT COUNT(*) FROM subject_classes sc WHERE sc.class_id = c.id) AS subject_count
         FROM classes c
         LEFT JOIN school_levels l ON l.id = c.level_id
         WHERE c.school_id = ?
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((session_id.as_deref(), &actor.school_id), |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let section: Option<String> = row.get(2)?;
            let level_id: Option<String> = row.get(3)?;
            let level_name: Option<String> = row.get(4)?;
            let enrolled_count: i64 = row.get(5)?;
            let teacher_count: i64 = row.get(6)?;
            let subject_count: i64 = row.get(7)?;

            let level = match (level_id, level_name) {
                (Some(lid), Some(lname)) => json!({ "id": lid, "name": lname }),
                _ => serde_json::Value::Null,
            };
            Ok(json!({
                "id": id,
                "name": name,
                "section": section,
                "level": level,
                "enrolledCount": enrolled_count,
                "teacherCount": teacher_count,
                "subjectCount": subject_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(
            &req.id,
            json!({ "sessionId": session_id, "classes": classes }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let section = optional_str(req, "section");
    let level_id = optional_str(req, "levelId");

    if let Some(lid) = level_id.as_deref() {
        match db::exists_in_school(conn, "school_levels", lid, &actor.school_id) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", "school level not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    match db::school_exists(conn, &actor.school_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "school not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, school_id, level_id, name, section)
         VALUES(?, ?, ?, ?, ?)",
        (
            &class_id,
            &actor.school_id,
            level_id.as_deref(),
            &name,
            section.as_deref(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(&req.id, json!({ "classId": class_id, "name": name }))
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match guard::admin_actor(req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    match db::exists_in_school(conn, "classes", &class_id, &actor.school_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class not found", None),
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
    if let Some(v) = patch.get("section") {
        if v.is_null() {
            set_parts.push("section = ?".into());
            bind_values.push(Value::Null);
        } else if let Some(s) = v.as_str() {
            let t = s.trim().to_string();
            set_parts.push("section = ?".into());
            if t.is_empty() {
                bind_values.push(Value::Null);
            } else {
                bind_values.push(Value::Text(t));
            }
        } else {
            return err(
                &req.id,
                "bad_params",
                "patch.section must be a string or null",
                None,
            );
        }
    }
    if let Some(v) = patch.get("levelId") {
        if v.is_null() {
            set_parts.push("level_id = ?".into());
            bind_values.push(Value::Null);
        } else if let Some(s) = v.as_str() {
            let lid = s.trim().to_string();
            if lid.is_empty() {
                return err(&req.id, "bad_params", "patch.levelId must not be blank", None);
            }
            match db::exists_in_school(conn, "school_levels", &lid, &actor.school_id) {
                Ok(true) => {}
                Ok(false) => return err(&req.id, "not_found", "school level not found", None),
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }
            set_parts.push("level_id = ?".into());
            bind_values.push(Value::Text(lid));
        } else {
            return err(
                &req.id,
                "bad_params",
                "patch.levelId must be a string or null",
                None,
            );
        }
    }

    if set_parts.is_empty() {
        return err(&req.id, "bad_params", "patch sets no fields", None);
    }

    let sql = format!(
        "UPDATE classes SET {} WHERE id = ? AND school_id = ?",
        set_parts.join(", ")
    );
    bind_values.push(Value::Text(class_id.clone()));
    bind_values.push(Value::Text(actor.school_id.clone()));

    if let Err(e) = conn.execute(&sql, params_from_iter(bind_values)) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(&req.id, json!({ "classId": class_id }))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match guard::admin_actor(req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match db::exists_in_school(conn, "classes", &class_id, &actor.school_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Dependent rows first (no ON DELETE CASCADE).
    if let Err(e) = tx.execute(
        "DELETE FROM class_enrollments WHERE class_id = ?",
        [&class_id],
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
        "DELETE FROM teacher_classes WHERE class_id = ?",
        [&class_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "teacher_classes" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM subject_classes WHERE class_id = ?",
        [&class_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "subject_classes" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM classes WHERE id = ?", [&class_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_classes_roster(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match guard::any_actor(req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match db::exists_in_school(conn, "classes", &class_id, &actor.school_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let session_id = match optional_str(req, "sessionId") {
        Some(v) => v,
        None => match db::current_session_id(conn, &actor.school_id) {
            Ok(Some(v)) => v,
            Ok(None) => return err(&req.id, "not_found", "school has no current session", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
    };

    let mut stmt = match conn.prepare(
        "SELECT e.id, s.id, s.last_name, s.first_name, e.roll_number
         FROM class_enrollments e
         JOIN students s ON s.id = e.student_id
         WHERE e.class_id = ? AND e.session_id = ? AND e.status = 'active'
         ORDER BY s.last_name, s.first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&class_id, &session_id], |row| {
            let enrollment_id: String = row.get(0)?;
            let student_id: String = row.get(1)?;
            let last_name: String = row.get(2)?;
            let first_name: String = row.get(3)?;
            let roll_number: Option<String> = row.get(4)?;
            Ok(json!({
                "enrollmentId": enrollment_id,
                "studentId": student_id,
                "displayName": format!("{}, {}", last_name, first_name),
                "rollNumber": roll_number
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(roster) => ok(
            &req.id,
            json!({ "classId": class_id, "sessionId": session_id, "roster": roster }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.update" => Some(handle_classes_update(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        "classes.roster" => Some(handle_classes_roster(state, req)),
        _ => None,
    }
}
