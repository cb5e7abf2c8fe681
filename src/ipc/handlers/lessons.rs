use crate::ipc::handlers::setup::{self, SetupSection};
use crate::ipc::helpers::{
    course_ref, id_exists, new_id, now_iso, optional_str, required_i64, required_str, term_ref,
    with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{json, Value};

const STATUS_DRAFT: &str = "draft";
const STATUS_SUBMITTED: &str = "submitted";
const STATUS_APPROVED: &str = "approved";
const STATUS_RETURNED: &str = "returned";

fn is_known_status(status: &str) -> bool {
    matches!(
        status,
        STATUS_DRAFT | STATUS_SUBMITTED | STATUS_APPROVED | STATUS_RETURNED
    )
}

fn note_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "classId": r.get::<_, String>(1)?,
        "courseId": r.get::<_, String>(2)?,
        "termId": r.get::<_, String>(3)?,
        "week": r.get::<_, i64>(4)?,
        "topic": r.get::<_, String>(5)?,
        "objectives": r.get::<_, Option<String>>(6)?,
        "body": r.get::<_, Option<String>>(7)?,
        "status": r.get::<_, String>(8)?,
        "teacherName": r.get::<_, Option<String>>(9)?,
        "submittedAt": r.get::<_, Option<String>>(10)?,
        "reviewedAt": r.get::<_, Option<String>>(11)?,
        "reviewComment": r.get::<_, Option<String>>(12)?,
        "createdAt": r.get::<_, Option<String>>(13)?,
        "updatedAt": r.get::<_, Option<String>>(14)?,
    }))
}

const NOTE_COLUMNS: &str = "id, class_id, course_id, term_id, week, topic, objectives, body,
     status, teacher_name, submitted_at, reviewed_at, review_comment, created_at, updated_at";

fn lessons_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = optional_str(params, "classId")?;
    let course_id = optional_str(params, "courseId")?;
    let term_id = optional_str(params, "termId")?;
    let status = optional_str(params, "status")?;
    if let Some(s) = &status {
        if !is_known_status(s) {
            return Err(HandlerErr::bad_params(
                "status must be one of: draft, submitted, approved, returned",
            ));
        }
    }

    let mut where_parts: Vec<&str> = Vec::new();
    let mut binds: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(v) = class_id {
        where_parts.push("class_id = ?");
        binds.push(rusqlite::types::Value::Text(v));
    }
    if let Some(v) = course_id {
        where_parts.push("course_id = ?");
        binds.push(rusqlite::types::Value::Text(v));
    }
    if let Some(v) = term_id {
        where_parts.push("term_id = ?");
        binds.push(rusqlite::types::Value::Text(v));
    }
    if let Some(v) = status {
        where_parts.push("status = ?");
        binds.push(rusqlite::types::Value::Text(v));
    }
    let where_sql = if where_parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", where_parts.join(" AND "))
    };

    let sql = format!(
        "SELECT {} FROM lesson_notes{} ORDER BY week, created_at",
        NOTE_COLUMNS, where_sql
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let notes = stmt
        .query_map(params_from_iter(binds), |r| note_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "notes": notes }))
}

fn week_param(conn: &Connection, params: &Value) -> Result<i64, HandlerErr> {
    let week = required_i64(params, "week")?;
    let weeks_per_term = setup::i64_field(conn, SetupSection::Lessons, "weeksPerTerm", 13);
    if !(1..=weeks_per_term).contains(&week) {
        return Err(HandlerErr::bad_params(format!(
            "week must be in 1..={}",
            weeks_per_term
        )));
    }
    Ok(week)
}

fn lessons_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let course_id = required_str(params, "courseId")?;
    let term_id = required_str(params, "termId")?;
    if !id_exists(conn, "classes", &class_id)? {
        return Err(HandlerErr::not_found("class"));
    }
    let course = course_ref(conn, &course_id)?;
    if course.class_id != class_id {
        return Err(HandlerErr::bad_params(
            "course does not belong to this class",
        ));
    }
    term_ref(conn, &term_id)?;
    let week = week_param(conn, params)?;
    let topic = required_str(params, "topic")?;
    let objectives = optional_str(params, "objectives")?;
    let body = optional_str(params, "body")?;
    let teacher_name = optional_str(params, "teacherName")?;

    let note_id = new_id();
    let now = now_iso();
    conn.execute(
        "INSERT INTO lesson_notes(id, class_id, course_id, term_id, week, topic, objectives, body,
             status, teacher_name, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &note_id,
            &class_id,
            &course_id,
            &term_id,
            week,
            &topic,
            &objectives,
            &body,
            STATUS_DRAFT,
            &teacher_name,
            &now,
            &now,
        ),
    )
    .map_err(|e| HandlerErr::db_insert(e, "lesson_notes", "lesson note already exists"))?;

    Ok(json!({ "noteId": note_id, "status": STATUS_DRAFT }))
}

fn note_status(conn: &Connection, note_id: &str) -> Result<String, HandlerErr> {
    conn.query_row(
        "SELECT status FROM lesson_notes WHERE id = ?",
        [note_id],
        |r| r.get::<_, String>(0),
    )
    .optional()
    .map_err(HandlerErr::db_query)?
    .ok_or_else(|| HandlerErr::not_found("lesson note"))
}

fn lessons_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let note_id = required_str(params, "noteId")?;
    let status = note_status(conn, &note_id)?;
    // Submitted and approved notes are frozen; returned ones reopen for edits.
    if status != STATUS_DRAFT && status != STATUS_RETURNED {
        return Err(HandlerErr::invalid_state(format!(
            "a {} note cannot be edited",
            status
        )));
    }

    let mut set_parts: Vec<&str> = Vec::new();
    let mut binds: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(topic) = optional_str(params, "topic")? {
        set_parts.push("topic = ?");
        binds.push(rusqlite::types::Value::Text(topic));
    }
    if params.get("objectives").is_some() {
        set_parts.push("objectives = ?");
        binds.push(match optional_str(params, "objectives")? {
            Some(v) => rusqlite::types::Value::Text(v),
            None => rusqlite::types::Value::Null,
        });
    }
    if params.get("body").is_some() {
        set_parts.push("body = ?");
        binds.push(match optional_str(params, "body")? {
            Some(v) => rusqlite::types::Value::Text(v),
            None => rusqlite::types::Value::Null,
        });
    }
    if let Some(teacher) = optional_str(params, "teacherName")? {
        set_parts.push("teacher_name = ?");
        binds.push(rusqlite::types::Value::Text(teacher));
    }
    if params.get("week").is_some() {
        let week = week_param(conn, params)?;
        set_parts.push("week = ?");
        binds.push(rusqlite::types::Value::Integer(week));
    }
    if set_parts.is_empty() {
        return Err(HandlerErr::bad_params("no fields to update"));
    }

    set_parts.push("updated_at = ?");
    binds.push(rusqlite::types::Value::Text(now_iso()));
    binds.push(rusqlite::types::Value::Text(note_id));
    let sql = format!(
        "UPDATE lesson_notes SET {} WHERE id = ?",
        set_parts.join(", ")
    );
    conn.execute(&sql, params_from_iter(binds))
        .map_err(HandlerErr::db_update)?;

    Ok(json!({ "ok": true }))
}

fn lessons_submit(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let note_id = required_str(params, "noteId")?;
    let status = note_status(conn, &note_id)?;
    if status != STATUS_DRAFT && status != STATUS_RETURNED {
        return Err(HandlerErr::invalid_state(format!(
            "a {} note cannot be submitted",
            status
        )));
    }

    // When review is switched off, submission approves in one step.
    let require_review = setup::bool_field(conn, SetupSection::Lessons, "requireReview", true);
    let now = now_iso();
    let new_status = if require_review {
        conn.execute(
            "UPDATE lesson_notes
             SET status = ?, submitted_at = ?, review_comment = NULL, updated_at = ?
             WHERE id = ?",
            (STATUS_SUBMITTED, &now, &now, &note_id),
        )
        .map_err(HandlerErr::db_update)?;
        STATUS_SUBMITTED
    } else {
        conn.execute(
            "UPDATE lesson_notes
             SET status = ?, submitted_at = ?, reviewed_at = ?, review_comment = NULL, updated_at = ?
             WHERE id = ?",
            (STATUS_APPROVED, &now, &now, &now, &note_id),
        )
        .map_err(HandlerErr::db_update)?;
        STATUS_APPROVED
    };

    Ok(json!({ "status": new_status }))
}

fn lessons_review(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let note_id = required_str(params, "noteId")?;
    let decision = required_str(params, "decision")?;
    let status = note_status(conn, &note_id)?;
    if status != STATUS_SUBMITTED {
        return Err(HandlerErr::invalid_state(format!(
            "only submitted notes can be reviewed; this one is {}",
            status
        )));
    }

    let comment = optional_str(params, "comment")?;
    let new_status = match decision.as_str() {
        "approve" => STATUS_APPROVED,
        "return" => {
            if comment.is_none() {
                return Err(HandlerErr::bad_params(
                    "returning a note requires a comment",
                ));
            }
            STATUS_RETURNED
        }
        _ => {
            return Err(HandlerErr::bad_params(
                "decision must be approve or return",
            ))
        }
    };

    let now = now_iso();
    conn.execute(
        "UPDATE lesson_notes
         SET status = ?, reviewed_at = ?, review_comment = ?, updated_at = ?
         WHERE id = ?",
        (new_status, &now, &comment, &now, &note_id),
    )
    .map_err(HandlerErr::db_update)?;

    Ok(json!({ "status": new_status }))
}

fn lessons_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let note_id = required_str(params, "noteId")?;
    let status = note_status(conn, &note_id)?;
    if status != STATUS_DRAFT {
        return Err(HandlerErr::invalid_state(
            "only draft notes can be deleted",
        ));
    }
    conn.execute("DELETE FROM lesson_notes WHERE id = ?", [&note_id])
        .map_err(HandlerErr::db_update)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "lessons.list" => Some(with_conn(state, req, lessons_list)),
        "lessons.create" => Some(with_conn(state, req, lessons_create)),
        "lessons.update" => Some(with_conn(state, req, lessons_update)),
        "lessons.submit" => Some(with_conn(state, req, lessons_submit)),
        "lessons.review" => Some(with_conn(state, req, lessons_review)),
        "lessons.delete" => Some(with_conn(state, req, lessons_delete)),
        _ => None,
    }
}
