use crate::db;
use crate::enrollment::{assign_student_to_class, current_class, AssignOutcome, AssignRequest};
use crate::ipc::error::{err, ok};
use crate::ipc::guard;
use crate::ipc::helpers::{optional_bool, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn class_name(conn: &rusqlite::Connection, class_id: &str) -> Result<String, rusqlite::Error> {
    conn.query_row("SELECT name FROM classes WHERE id = ?", [class_id], |r| {
        r.get(0)
    })
}

fn handle_assign_class(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let roll_number = optional_str(req, "rollNumber");
    let force_reassign = optional_bool(req, "forceReassign", false);

    let assign_req = AssignRequest {
        student_id,
        class_id,
        session_id,
        roll_number,
        force_reassign,
    };

    let outcome = match assign_student_to_class(conn, &actor.school_id, &assign_req) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    };

    match outcome {
        AssignOutcome::Assigned { enrollment_id } => {
            let name = match class_name(conn, &assign_req.class_id) {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            ok(
                &req.id,
                json!({
                    "enrollmentId": enrollment_id,
                    "status": "assigned",
                    "currentClass": { "id": assign_req.class_id, "name": name }
                }),
            )
        }
        AssignOutcome::AlreadyAssigned { enrollment_id } => {
            let name = match class_name(conn, &assign_req.class_id) {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            ok(
                &req.id,
                json!({
                    "enrollmentId": enrollment_id,
                    "status": "already_assigned",
                    "currentClass": { "id": assign_req.class_id, "name": name }
                }),
            )
        }
        AssignOutcome::Reassigned {
            enrollment_id,
            previous_class_id,
        } => {
            let name = match class_name(conn, &assign_req.class_id) {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            ok(
                &req.id,
                json!({
                    "enrollmentId": enrollment_id,
                    "status": "reassigned",
                    "previousClassId": previous_class_id,
                    "currentClass": { "id": assign_req.class_id, "name": name }
                }),
            )
        }
        AssignOutcome::Conflict {
            current_class_id,
            current_class_name,
        } => err(
            &req.id,
            "conflict",
            format!(
                "student is already assigned to {} for this session",
                current_class_name
            ),
            Some(json!({
                "conflict": true,
                "currentClass": { "id": current_class_id, "name": current_class_name }
            })),
        ),
    }
}

fn handle_current_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match guard::any_actor(req) {
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
    let session_id = match optional_str(req, "sessionId") {
        Some(v) => v,
        None => match db::current_session_id(conn, &actor.school_id) {
            Ok(Some(v)) => v,
            Ok(None) => return err(&req.id, "not_found", "school has no current session", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
    };

    match current_class(conn, &actor.school_id, &student_id, &session_id) {
        Ok(Some((class_id, name))) => ok(
            &req.id,
            json!({
                "sessionId": session_id,
                "currentClass": { "id": class_id, "name": name }
            }),
        ),
        Ok(None) => ok(
            &req.id,
            json!({ "sessionId": session_id, "currentClass": null }),
        ),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.assignClass" => Some(handle_assign_class(state, req)),
        "students.currentClass" => Some(handle_current_class(state, req)),
        _ => None,
    }
}
