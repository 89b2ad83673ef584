use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "rosterd.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Schema bootstrap shared by the daemon and the in-memory test databases.
pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_sessions(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            starts_on TEXT NOT NULL,
            ends_on TEXT NOT NULL,
            is_current INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_school ON academic_sessions(school_id)",
        [],
    )?;
    // Exactly one session per school may be flagged current.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_one_current
         ON academic_sessions(school_id) WHERE is_current = 1",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS school_levels(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_school_levels_school ON school_levels(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS departments(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_departments_school ON departments(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            level_id TEXT,
            name TEXT NOT NULL,
            section TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(level_id) REFERENCES school_levels(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_school ON classes(school_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_level ON classes(level_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            department_id TEXT,
            name TEXT NOT NULL,
            code TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_school ON subjects(school_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_department ON subjects(department_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            admission_no TEXT,
            birth_date TEXT,
            active INTEGER NOT NULL,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_school ON students(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            staff_no TEXT,
            active INTEGER NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_school ON teachers(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS guardians(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_guardians_school ON guardians(school_id)",
        [],
    )?;

    // Workspaces created before the phone column existed need a backfill.
    ensure_guardians_phone(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_guardians(
            student_id TEXT NOT NULL,
            guardian_id TEXT NOT NULL,
            relationship TEXT,
            PRIMARY KEY(student_id, guardian_id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(guardian_id) REFERENCES guardians(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_guardians_guardian
         ON student_guardians(guardian_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_subjects(
            teacher_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            PRIMARY KEY(teacher_id, subject_id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teacher_subjects_subject
         ON teacher_subjects(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_classes(
            teacher_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            PRIMARY KEY(teacher_id, class_id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teacher_classes_class
         ON teacher_classes(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_classes(
            subject_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            PRIMARY KEY(subject_id, class_id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_classes_class
         ON subject_classes(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            roll_number TEXT,
            status TEXT NOT NULL,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(session_id) REFERENCES academic_sessions(id)
        )",
        [],
    )?;
    ensure_class_enrollments_roll_number(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_class_session
         ON class_enrollments(class_id, session_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student
         ON class_enrollments(student_id)",
        [],
    )?;
    // A student holds at most one active enrollment per session. Two writers
    // that both read "unassigned" cannot both win this index.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_enrollments_one_active
         ON class_enrollments(student_id, session_id) WHERE status = 'active'",
        [],
    )?;

    Ok(())
}

fn ensure_guardians_phone(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "guardians", "phone")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE guardians ADD COLUMN phone TEXT", [])?;
    Ok(())
}

fn ensure_class_enrollments_roll_number(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "class_enrollments", "roll_number")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE class_enrollments ADD COLUMN roll_number TEXT",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn school_exists(conn: &Connection, school_id: &str) -> rusqlite::Result<bool> {
    let hit: Option<i64> = conn
        .query_row("SELECT 1 FROM schools WHERE id = ?", [school_id], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(hit.is_some())
}

/// Scoped existence probe for the school-owned entity tables. Callers pass a
/// compile-time table name, never request input.
pub fn exists_in_school(
    conn: &Connection,
    table: &str,
    id: &str,
    school_id: &str,
) -> rusqlite::Result<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ? AND school_id = ?", table);
    let hit: Option<i64> = conn
        .query_row(&sql, [id, school_id], |r| r.get(0))
        .optional()?;
    Ok(hit.is_some())
}

pub fn current_session_id(
    conn: &Connection,
    school_id: &str,
) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM academic_sessions WHERE school_id = ? AND is_current = 1",
        [school_id],
        |r| r.get(0),
    )
    .optional()
}
