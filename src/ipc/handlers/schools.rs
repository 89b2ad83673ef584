use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::guard;
use crate::ipc::helpers::{optional_bool, required_str};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use serde_json::json;
use uuid::Uuid;

fn handle_schools_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let school_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO schools(id, name) VALUES(?, ?)",
        (&school_id, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "schools" })),
        );
    }

    ok(&req.id, json!({ "schoolId": school_id, "name": name }))
}

fn handle_schools_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "schools": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           s.id,
           s.name,
           (SELECT COUNT(*) FROM students st WHERE st.school_id = s.id) AS student_count,
           (SELECT COUNT(*) FROM teachers t WHERE t.school_id = s.id) AS teacher_count,
           (SELECT COUNT(*) FROM classes c WHERE c.school_id = s.id) AS class_count
         FROM schools s
         ORDER BY s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let student_count: i64 = row.get(2)?;
            let teacher_count: i64 = row.get(3)?;
            let class_count: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "studentCount": student_count,
                "teacherCount": teacher_count,
                "classCount": class_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(schools) => ok(&req.id, json!({ "schools": schools })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn parse_date(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    let raw = required_str(req, key)?;
    match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
        Ok(_) => Ok(raw),
        Err(_) => Err(err(
            &req.id,
            "bad_params",
            format!("{} must be an ISO date (YYYY-MM-DD)", key),
            None,
        )),
    }
}

fn handle_sessions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let starts_on = match parse_date(req, "startsOn") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let ends_on = match parse_date(req, "endsOn") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if ends_on < starts_on {
        return err(
            &req.id,
            "bad_params",
            "endsOn must not precede startsOn",
            None,
        );
    }
    let make_current = optional_bool(req, "makeCurrent", false);

    match db::school_exists(conn, &actor.school_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "school not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let session_id = Uuid::new_v4().to_string();
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if make_current {
        if let Err(e) = tx.execute(
            "UPDATE academic_sessions SET is_current = 0
             WHERE school_id = ? AND is_current = 1",
            [&actor.school_id],
        ) {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    if let Err(e) = tx.execute(
        "INSERT INTO academic_sessions(id, school_id, name, starts_on, ends_on, is_current)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &session_id,
            &actor.school_id,
            &name,
            &starts_on,
            &ends_on,
            if make_current { 1 } else { 0 },
        ),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "academic_sessions" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "sessionId": session_id, "isCurrent": make_current }),
    )
}

fn handle_sessions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match guard::any_actor(req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, starts_on, ends_on, is_current
         FROM academic_sessions
         WHERE school_id = ?
         ORDER BY starts_on DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&actor.school_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let starts_on: String = row.get(2)?;
            let ends_on: String = row.get(3)?;
            let is_current: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "startsOn": starts_on,
                "endsOn": ends_on,
                "isCurrent": is_current != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(sessions) => ok(&req.id, json!({ "sessions": sessions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_sessions_set_current(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match guard::admin_actor(req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match db::exists_in_school(conn, "academic_sessions", &session_id, &actor.school_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "academic session not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    // Clear and set inside one transaction so the one-current index never
    // sees two flagged rows.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "UPDATE academic_sessions SET is_current = 0
         WHERE school_id = ? AND is_current = 1",
        [&actor.school_id],
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.execute(
        "UPDATE academic_sessions SET is_current = 1 WHERE id = ?",
        [&session_id],
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "sessionId": session_id, "isCurrent": true }))
}

fn handle_levels_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let sort_order: i64 = match req.params.get("sortOrder").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => match conn.query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM school_levels WHERE school_id = ?",
            [&actor.school_id],
            |r| r.get(0),
        ) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
    };

    let level_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO school_levels(id, school_id, name, sort_order) VALUES(?, ?, ?, ?)",
        (&level_id, &actor.school_id, &name, sort_order),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "school_levels" })),
        );
    }

    ok(&req.id, json!({ "levelId": level_id, "sortOrder": sort_order }))
}

fn handle_levels_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match guard::any_actor(req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, sort_order FROM school_levels
         WHERE school_id = ? ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&actor.school_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let sort_order: i64 = row.get(2)?;
            Ok(json!({ "id": id, "name": name, "sortOrder": sort_order }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(levels) => ok(&req.id, json!({ "levels": levels })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_departments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let department_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO departments(id, school_id, name) VALUES(?, ?, ?)",
        (&department_id, &actor.school_id, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "departments" })),
        );
    }

    ok(&req.id, json!({ "departmentId": department_id, "name": name }))
}

fn handle_departments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match guard::any_actor(req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT
           d.id,
           d.name,
           (SELECT COUNT(*) FROM subjects sub WHERE sub.department_id = d.id) AS subject_count
         FROM departments d
         WHERE d.school_id = ?
         ORDER BY d.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&actor.school_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let subject_count: i64 = row.get(2)?;
            Ok(json!({ "id": id, "name": name, "subjectCount": subject_count }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(departments) => ok(&req.id, json!({ "departments": departments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schools.create" => Some(handle_schools_create(state, req)),
        "schools.list" => Some(handle_schools_list(state, req)),
        "sessions.create" => Some(handle_sessions_create(state, req)),
        "sessions.list" => Some(handle_sessions_list(state, req)),
        "sessions.setCurrent" => Some(handle_sessions_set_current(state, req)),
        "levels.create" => Some(handle_levels_create(state, req)),
        "levels.list" => Some(handle_levels_list(state, req)),
        "departments.create" => Some(handle_departments_create(state, req)),
        "departments.list" => Some(handle_departments_list(state, req)),
        _ => None,
    }
}
