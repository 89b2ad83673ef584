use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::guard;
use crate::ipc::helpers::{optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

/// One many-to-many family. Both endpoints are validated against the caller's
/// school before any write.
#[derive(Clone, Copy)]
struct LinkFamily {
    table: &'static str,
    left_param: &'static str,
    left_col: &'static str,
    left_table: &'static str,
    left_entity: &'static str,
    right_param: &'static str,
    right_col: &'static str,
    right_table: &'static str,
    right_entity: &'static str,
    // Only the student/guardian edge carries a relationship label.
    has_relationship: bool,
}

const STUDENT_GUARDIANS: LinkFamily = LinkFamily {
    table: "student_guardians",
    left_param: "studentId",
    left_col: "student_id",
    left_table: "students",
    left_entity: "student",
    right_param: "guardianId",
    right_col: "guardian_id",
    right_table: "guardians",
    right_entity: "guardian",
    has_relationship: true,
};

const TEACHER_SUBJECTS: LinkFamily = LinkFamily {
    table: "teacher_subjects",
    left_param: "teacherId",
    left_col: "teacher_id",
    left_table: "teachers",
    left_entity: "teacher",
    right_param: "subjectId",
    right_col: "subject_id",
    right_table: "subjects",
    right_entity: "subject",
    has_relationship: false,
};

const TEACHER_CLASSES: LinkFamily = LinkFamily {
    table: "teacher_classes",
    left_param: "teacherId",
    left_col: "teacher_id",
    left_table: "teachers",
    left_entity: "teacher",
    right_param: "classId",
    right_col: "class_id",
    right_table: "classes",
    right_entity: "class",
    has_relationship: false,
};

const SUBJECT_CLASSES: LinkFamily = LinkFamily {
    table: "subject_classes",
    left_param: "subjectId",
    left_col: "subject_id",
    left_table: "subjects",
    left_entity: "subject",
    right_param: "classId",
    right_col: "class_id",
    right_table: "classes",
    right_entity: "class",
    has_relationship: false,
};

fn scoped_pair(
    conn: &rusqlite::Connection,
    req: &Request,
    school_id: &str,
    family: &LinkFamily,
) -> Result<(String, String), serde_json::Value> {
    let left_id = required_str(req, family.left_param)?;
    let right_id = required_str(req, family.right_param)?;

    match db::exists_in_school(conn, family.left_table, &left_id, school_id) {
        Ok(true) => {}
        Ok(false) => {
            return Err(err(
                &req.id,
                "not_found",
                format!("{} not found", family.left_entity),
                None,
            ))
        }
        Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    }
    match db::exists_in_school(conn, family.right_table, &right_id, school_id) {
        Ok(true) => {}
        Ok(false) => {
            return Err(err(
                &req.id,
                "not_found",
                format!("{} not found", family.right_entity),
                None,
            ))
        }
        Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    }
    Ok((left_id, right_id))
}

fn handle_link(state: &mut AppState, req: &Request, family: &LinkFamily) -> serde_json::Value {
    let actor = match guard::admin_actor(req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (left_id, right_id) = match scoped_pair(conn, req, &actor.school_id, family) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // Linking twice is not an error; the second call is a no-op.
    let sql = format!(
        "INSERT OR IGNORE INTO {}({}, {}) VALUES(?, ?)",
        family.table, family.left_col, family.right_col
    );
    let created = match conn.execute(&sql, [&left_id, &right_id]) {
        Ok(n) => n > 0,
        Err(e) => {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": family.table })),
            )
        }
    };

    if family.has_relationship {
        if let Some(relationship) = optional_str(req, "relationship") {
            let sql = format!(
                "UPDATE {} SET relationship = ? WHERE {} = ? AND {} = ?",
                family.table, family.left_col, family.right_col
            );
            if let Err(e) = conn.execute(&sql, [&relationship, &left_id, &right_id]) {
                return err(
                    &req.id,
                    "db_update_failed",
                    e.to_string(),
                    Some(json!({ "table": family.table })),
                );
            }
        }
    }

    ok(&req.id, json!({ "linked": true, "created": created }))
}

fn handle_unlink(state: &mut AppState, req: &Request, family: &LinkFamily) -> serde_json::Value {
    let actor = match guard::admin_actor(req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (left_id, right_id) = match scoped_pair(conn, req, &actor.school_id, family) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let sql = format!(
        "DELETE FROM {} WHERE {} = ? AND {} = ?",
        family.table, family.left_col, family.right_col
    );
    match conn.execute(&sql, [&left_id, &right_id]) {
        Ok(n) => ok(&req.id, json!({ "removed": n > 0 })),
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": family.table })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "studentGuardians.link" => Some(handle_link(state, req, &STUDENT_GUARDIANS)),
        "studentGuardians.unlink" => Some(handle_unlink(state, req, &STUDENT_GUARDIANS)),
        "teacherSubjects.link" => Some(handle_link(state, req, &TEACHER_SUBJECTS)),
        "teacherSubjects.unlink" => Some(handle_unlink(state, req, &TEACHER_SUBJECTS)),
        "teacherClasses.link" => Some(handle_link(state, req, &TEACHER_CLASSES)),
        "teacherClasses.unlink" => Some(handle_unlink(state, req, &TEACHER_CLASSES)),
        "subjectClasses.link" => Some(handle_link(state, req, &SUBJECT_CLASSES)),
        "subjectClasses.unlink" => Some(handle_unlink(state, req, &SUBJECT_CLASSES)),
        _ => None,
    }
}
