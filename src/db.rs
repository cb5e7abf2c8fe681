use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "campus.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            starts_on TEXT,
            ends_on TEXT,
            is_current INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS terms(
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            name TEXT NOT NULL,
            starts_on TEXT,
            ends_on TEXT,
            is_current INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(session_id) REFERENCES sessions(id),
            UNIQUE(session_id, seq)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_terms_session ON terms(session_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            level TEXT,
            sort_order INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            admission_no TEXT NOT NULL UNIQUE,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            gender TEXT,
            birth_date TEXT,
            guardian_name TEXT,
            guardian_phone TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order)",
        [],
    )?;
    // Guardian phone arrived after first release; older workspaces lack the column.
    ensure_students_guardian_phone(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            is_core INTEGER NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(class_id, code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_class ON courses(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_registrations(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            registered_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(term_id) REFERENCES terms(id),
            UNIQUE(student_id, course_id, term_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_registrations_student_term
         ON course_registrations(student_id, term_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_registrations_course_term
         ON course_registrations(course_id, term_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_items(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            purpose TEXT NOT NULL,
            amount TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(term_id) REFERENCES terms(id),
            UNIQUE(class_id, term_id, purpose)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_items_class_term ON fee_items(class_id, term_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS charges(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            purpose TEXT NOT NULL,
            amount TEXT NOT NULL,
            session_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            carried_over INTEGER NOT NULL DEFAULT 0,
            note TEXT,
            created_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(term_id) REFERENCES terms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_charges_student_term ON charges(student_id, term_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_charges_term ON charges(term_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            purpose TEXT NOT NULL,
            amount TEXT NOT NULL,
            paid_on TEXT NOT NULL,
            session_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            reference TEXT,
            recorded_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(term_id) REFERENCES terms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_student_term ON payments(student_id, term_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_term ON payments(term_id)",
        [],
    )?;
    ensure_payments_reference(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS score_entries(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            ca REAL NOT NULL,
            midterm REAL NOT NULL,
            exam REAL NOT NULL,
            entered_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(term_id) REFERENCES terms(id),
            UNIQUE(student_id, course_id, term_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_score_entries_course_term
         ON score_entries(course_id, term_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_score_entries_student_term
         ON score_entries(student_id, term_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            details TEXT,
            venue TEXT,
            audience TEXT NOT NULL DEFAULT 'all',
            starts_on TEXT NOT NULL,
            ends_on TEXT,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_starts_on ON events(starts_on)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS media_albums(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            event_id TEXT,
            created_at TEXT,
            FOREIGN KEY(event_id) REFERENCES events(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS media_items(
            id TEXT PRIMARY KEY,
            album_id TEXT NOT NULL,
            file_name TEXT NOT NULL,
            content_type TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            sha256 TEXT NOT NULL,
            caption TEXT,
            sort_order INTEGER NOT NULL DEFAULT 0,
            added_at TEXT,
            FOREIGN KEY(album_id) REFERENCES media_albums(id),
            UNIQUE(album_id, file_name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_media_items_album ON media_items(album_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lesson_notes(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            week INTEGER NOT NULL,
            topic TEXT NOT NULL,
            objectives TEXT,
            body TEXT,
            status TEXT NOT NULL,
            teacher_name TEXT,
            submitted_at TEXT,
            reviewed_at TEXT,
            review_comment TEXT,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(term_id) REFERENCES terms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lesson_notes_class_term
         ON lesson_notes(class_id, term_id)",
        [],
    )?;
    ensure_lesson_notes_review_comment(&conn)?;

    // Early releases stored purposes capitalized the way the dashboards
    // display them. The ledger matches on lowercase.
    normalize_fee_purposes(&conn)?;

    Ok(conn)
}

fn ensure_students_guardian_phone(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "guardian_phone")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN guardian_phone TEXT", [])?;
    Ok(())
}

fn ensure_payments_reference(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "payments", "reference")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE payments ADD COLUMN reference TEXT", [])?;
    Ok(())
}

fn ensure_lesson_notes_review_comment(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "lesson_notes", "review_comment")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE lesson_notes ADD COLUMN review_comment TEXT", [])?;
    Ok(())
}

fn normalize_fee_purposes(conn: &Connection) -> anyhow::Result<()> {
    for table in ["fee_items", "charges", "payments"] {
        let sql = format!(
            "UPDATE {} SET purpose = lower(purpose) WHERE purpose != lower(purpose)",
            table
        );
        conn.execute(&sql, [])?;
    }
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

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
