use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::guard;
use crate::ipc::helpers::{optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

fn handle_guardians_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match guard::any_actor(req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut students_by_guardian: HashMap<String, Vec<serde_json::Value>> = HashMap::new();
    {
        let mut stmt = match conn.prepare(
            "SELECT sg.guardian_id, s.id, s.last_name, s.first_name, sg.relationship
             FROM student_guardians sg
             JOIN students s ON s.id = sg.student_id
             WHERE s.school_id = ?
             ORDER BY s.last_name, s.first_name",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let links = stmt
            .query_map([&actor.school_id], |row| {
                let guardian_id: String = row.get(0)?;
                let student_id: String = row.get(1)?;
                let last_name: String = row.get(2)?;
                let first_name: String = row.get(3)?;
                let relationship: Option<String> = row.get(4)?;
                Ok((
                    guardian_id,
                    json!({
                        "id": student_id,
                        "displayName": format!("{}, {}", last_name, first_name),
                        "relationship": relationship
                    }),
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match links {
            Ok(pairs) => {
                for (guardian_id, student) in pairs {
                    students_by_guardian
                        .entry(guardian_id)
                        .or_default()
                        .push(student);
                }
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let mut stmt = match conn.prepare(
        "SELECT id, last_name, first_name, email, phone
         FROM guardians
         WHERE school_id = ?
         ORDER BY last_name, first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&actor.school_id], |row| {
            let id: String = row.get(0)?;
            let last_name: String = row.get(1)?;
            let first_name: String = row.get(2)?;
            let email: Option<String> = row.get(3)?;
            let phone: Option<String> = row.get(4)?;
            Ok((
                id.clone(),
                json!({
                    "id": id,
                    "lastName": last_name,
                    "firstName": first_name,
                    "displayName": format!("{}, {}", last_name, first_name),
                    "email": email,
                    "phone": phone
                }),
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(pairs) => {
            let guardians: Vec<serde_json::Value> = pairs
                .into_iter()
                .map(|(id, mut guardian)| {
                    guardian["students"] =
                        json!(students_by_guardian.remove(&id).unwrap_or_default());
                    guardian
                })
                .collect();
            ok(&req.id, json!({ "guardians": guardians }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_guardians_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let email = optional_str(req, "email");
    let phone = optional_str(req, "phone");

    match db::school_exists(conn, &actor.school_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "school not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let guardian_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO guardians(id, school_id, last_name, first_name, email, phone)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &guardian_id,
            &actor.school_id,
            &last_name,
            &first_name,
            email.as_deref(),
            phone.as_deref(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "guardians" })),
        );
    }

    ok(&req.id, json!({ "guardianId": guardian_id }))
}

fn handle_guardians_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match guard::admin_actor(req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let guardian_id = match required_str(req, "guardianId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    match db::exists_in_school(conn, "guardians", &guardian_id, &actor.school_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "guardian not found", None),
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
    for (key, column) in [("email", "email"), ("phone", "phone")] {
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

    if set_parts.is_empty() {
        return err(&req.id, "bad_params", "patch sets no fields", None);
    }

    let sql = format!(
        "UPDATE guardians SET {} WHERE id = ? AND school_id = ?",
        set_parts.join(", ")
    );
    bind_values.push(Value::Text(guardian_id.clone()));
    bind_values.push(Value::Text(actor.school_id.clone()));

    if let Err(e) = conn.execute(&sql, params_from_iter(bind_values)) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "guardians" })),
        );
    }

    ok(&req.id, json!({ "guardianId": guardian_id }))
}

fn handle_guardians_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match guard::admin_actor(req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let guardian_id = match required_str(req, "guardianId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match db::exists_in_school(conn, "guardians", &guardian_id, &actor.school_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "guardian not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "DELETE FROM student_guardians WHERE guardian_id = ?",
        [&guardian_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "student_guardians" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM guardians WHERE id = ?", [&guardian_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "guardians" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "guardians.list" => Some(handle_guardians_list(state, req)),
        "guardians.create" => Some(handle_guardians_create(state, req)),
        "guardians.update" => Some(handle_guardians_update(state, req)),
        "guardians.delete" => Some(handle_guardians_delete(state, req)),
        _ => None,
    }
}
