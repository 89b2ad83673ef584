use rusqlite::{Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct EnrollError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl EnrollError {
    fn not_found(entity: &str) -> Self {
        EnrollError {
            code: "not_found".into(),
            message: format!("{} not found", entity),
            details: None,
        }
    }

    fn query(e: rusqlite::Error) -> Self {
        EnrollError {
            code: "db_query_failed".into(),
            message: e.to_string(),
            details: None,
        }
    }

    fn write(e: rusqlite::Error) -> Self {
        EnrollError {
            code: "db_write_failed".into(),
            message: e.to_string(),
            details: Some(json!({ "table": "class_enrollments" })),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssignRequest {
    pub student_id: String,
    pub class_id: String,
    pub session_id: String,
    pub roll_number: Option<String>,
    pub force_reassign: bool,
}

/// Resolution of one add-to-class request. `Conflict` is a first-class
/// outcome, not an error: the caller is expected to confirm and replay with
/// `force_reassign` set.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignOutcome {
    Assigned {
        enrollment_id: String,
    },
    AlreadyAssigned {
        enrollment_id: String,
    },
    Reassigned {
        enrollment_id: String,
        previous_class_id: String,
    },
    Conflict {
        current_class_id: String,
        current_class_name: String,
    },
}

struct ActiveEnrollment {
    enrollment_id: String,
    class_id: String,
    class_name: String,
}

/// Per (student, session) the machine is Unassigned <-> ActiveInClass(C):
/// - Unassigned -> ActiveInClass(C) on a clean add
/// - ActiveInClass(C), add C       -> no-op
/// - ActiveInClass(C), add C', !force -> Conflict, state unchanged
/// - ActiveInClass(C), add C', force  -> ActiveInClass(C'), old row inactive
///
/// Scope failures (entity absent or owned by another school) all read as
/// not_found so ids from other tenants stay unguessable.
pub fn assign_student_to_class(
    conn: &Connection,
    school_id: &str,
    req: &AssignRequest,
) -> Result<AssignOutcome, EnrollError> {
    let in_school = |table: &str, id: &str| -> Result<bool, EnrollError> {
        crate::db::exists_in_school(conn, table, id, school_id).map_err(EnrollError::query)
    };

    if !in_school("students", &req.student_id)? {
        return Err(EnrollError::not_found("student"));
    }
    if !in_school("classes", &req.class_id)? {
        return Err(EnrollError::not_found("class"));
    }
    if !in_school("academic_sessions", &req.session_id)? {
        return Err(EnrollError::not_found("academic session"));
    }

    let current = active_enrollment(conn, &req.student_id, &req.session_id)?;

    let Some(current) = current else {
        return match insert_active(conn, req) {
            Ok(id) => Ok(AssignOutcome::Assigned { enrollment_id: id }),
            Err(e) if is_unique_violation(&e) => {
                // Lost the read-then-write race to another writer; report the
                // row that won instead of a storage failure.
                match active_enrollment(conn, &req.student_id, &req.session_id)? {
                    Some(winner) => Ok(AssignOutcome::Conflict {
                        current_class_id: winner.class_id,
                        current_class_name: winner.class_name,
                    }),
                    None => Err(EnrollError::write(e)),
                }
            }
            Err(e) => Err(EnrollError::write(e)),
        };
    };

    if current.class_id == req.class_id {
        return Ok(AssignOutcome::AlreadyAssigned {
            enrollment_id: current.enrollment_id,
        });
    }

    if !req.force_reassign {
        return Ok(AssignOutcome::Conflict {
            current_class_id: current.class_id,
            current_class_name: current.class_name,
        });
    }

    let tx = conn.unchecked_transaction().map_err(EnrollError::write)?;
    tx.execute(
        "UPDATE class_enrollments
         SET status = 'inactive',
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?",
        [&current.enrollment_id],
    )
    .map_err(EnrollError::write)?;
    let new_id = insert_active(&tx, req).map_err(EnrollError::write)?;
    tx.commit().map_err(EnrollError::write)?;

    Ok(AssignOutcome::Reassigned {
        enrollment_id: new_id,
        previous_class_id: current.class_id,
    })
}

pub fn current_class(
    conn: &Connection,
    school_id: &str,
    student_id: &str,
    session_id: &str,
) -> Result<Option<(String, String)>, EnrollError> {
    if !crate::db::exists_in_school(conn, "students", student_id, school_id)
        .map_err(EnrollError::query)?
    {
        return Err(EnrollError::not_found("student"));
    }
    Ok(active_enrollment(conn, student_id, session_id)?
        .map(|e| (e.class_id, e.class_name)))
}

fn active_enrollment(
    conn: &Connection,
    student_id: &str,
    session_id: &str,
) -> Result<Option<ActiveEnrollment>, EnrollError> {
    conn.query_row(
        "SELECT e.id, e.class_id, c.name
         FROM class_enrollments e
         JOIN classes c ON c.id = e.class_id
         WHERE e.student_id = ? AND e.session_id = ? AND e.status = 'active'",
        [student_id, session_id],
        |r| {
            Ok(ActiveEnrollment {
                enrollment_id: r.get(0)?,
                class_id: r.get(1)?,
                class_name: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(EnrollError::query)
}

fn insert_active(conn: &Connection, req: &AssignRequest) -> Result<String, rusqlite::Error> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO class_enrollments(
           id, student_id, class_id, session_id, roll_number, status,
           created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, 'active',
           strftime('%Y-%m-%dT%H:%M:%SZ','now'),
           strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &id,
            &req.student_id,
            &req.class_id,
            &req.session_id,
            req.roll_number.as_deref(),
        ),
    )?;
    Ok(id)
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation
    )
}
