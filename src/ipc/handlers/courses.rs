use crate::ipc::helpers::{
    course_ref, id_exists, is_constraint_violation, new_id, now_iso, optional_bool, required_str,
    student_ref, term_ref, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, Connection};
use serde_json::{json, Value};
use std::collections::HashSet;

fn courses_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    if !id_exists(conn, "classes", &class_id)? {
        return Err(HandlerErr::not_found("class"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, code, name, is_core, sort_order
             FROM courses
             WHERE class_id = ?
             ORDER BY sort_order, code",
        )
        .map_err(HandlerErr::db_query)?;
    let courses = stmt
        .query_map([&class_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "classId": class_id.clone(),
                "code": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "isCore": r.get::<_, i64>(3)? != 0,
                "sortOrder": r.get::<_, i64>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "courses": courses }))
}

fn courses_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    if !id_exists(conn, "classes", &class_id)? {
        return Err(HandlerErr::not_found("class"));
    }
    let code = required_str(params, "code")?.to_ascii_uppercase();
    if code.len() > 16 {
        return Err(HandlerErr::bad_params("code length must be <= 16"));
    }
    let name = required_str(params, "name")?;
    let is_core = optional_bool(params, "isCore")?.unwrap_or(false);

    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM courses WHERE class_id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;

    let course_id = new_id();
    conn.execute(
        "INSERT INTO courses(id, class_id, code, name, is_core, sort_order)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &course_id,
            &class_id,
            &code,
            &name,
            i64::from(is_core),
            next_sort,
        ),
    )
    .map_err(|e| {
        HandlerErr::db_insert(e, "courses", "a course with this code already exists in the class")
    })?;

    Ok(json!({ "courseId": course_id, "code": code }))
}

fn courses_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    course_ref(conn, &course_id)?;

    let patch_value = params.get("patch").cloned().unwrap_or(Value::Null);
    let Some(patch) = patch_value.as_object() else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let mut set_parts: Vec<&str> = Vec::new();
    let mut bind_values: Vec<rusqlite::types::Value> = Vec::new();
    for (key, value) in patch {
        match key.as_str() {
            "code" => {
                let v = required_str(&patch_value, "code")?.to_ascii_uppercase();
                if v.len() > 16 {
                    return Err(HandlerErr::bad_params("code length must be <= 16"));
                }
                set_parts.push("code = ?");
                bind_values.push(rusqlite::types::Value::Text(v));
            }
            "name" => {
                let v = required_str(&patch_value, "name")?;
                set_parts.push("name = ?");
                bind_values.push(rusqlite::types::Value::Text(v));
            }
            "isCore" => {
                let v = value
                    .as_bool()
                    .ok_or_else(|| HandlerErr::bad_params("isCore must be boolean"))?;
                set_parts.push("is_core = ?");
                bind_values.push(rusqlite::types::Value::Integer(i64::from(v)));
            }
            other => {
                return Err(HandlerErr::bad_params(format!(
                    "unknown course field: {}",
                    other
                )))
            }
        }
    }
    if set_parts.is_empty() {
        return Err(HandlerErr::bad_params("patch must not be empty"));
    }

    let sql = format!("UPDATE courses SET {} WHERE id = ?", set_parts.join(", "));
    bind_values.push(rusqlite::types::Value::Text(course_id));
    conn.execute(&sql, params_from_iter(bind_values)).map_err(|e| {
        if is_constraint_violation(&e) {
            HandlerErr::conflict("a course with this code already exists in the class")
        } else {
            HandlerErr::db_update(e)
        }
    })?;

    Ok(json!({ "ok": true }))
}

fn courses_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let course = course_ref(conn, &course_id)?;
    let deleted_sort: i64 = conn
        .query_row(
            "SELECT sort_order FROM courses WHERE id = ?",
            [&course_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    for sql in [
        "DELETE FROM score_entries WHERE course_id = ?",
        "DELETE FROM course_registrations WHERE course_id = ?",
        "DELETE FROM lesson_notes WHERE course_id = ?",
        "DELETE FROM courses WHERE id = ?",
    ] {
        tx.execute(sql, [&course_id]).map_err(HandlerErr::db_update)?;
    }
    // Close the sort gap so new courses keep appending at the end.
    tx.execute(
        "UPDATE courses SET sort_order = sort_order - 1
         WHERE class_id = ? AND sort_order > ?",
        (&course.class_id, deleted_sort),
    )
    .map_err(HandlerErr::db_update)?;
    tx.commit().map_err(HandlerErr::db_tx)?;

    Ok(json!({ "ok": true }))
}

fn registration_open(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let term_id = required_str(params, "termId")?;
    let student = student_ref(conn, &student_id)?;
    let term = term_ref(conn, &term_id)?;

    let registered: HashSet<String> = {
        let mut stmt = conn
            .prepare(
                "SELECT course_id FROM course_registrations
                 WHERE student_id = ? AND term_id = ?",
            )
            .map_err(HandlerErr::db_query)?;
        stmt.query_map((&student_id, &term_id), |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
            .map_err(HandlerErr::db_query)?
    };

    let mut stmt = conn
        .prepare(
            "SELECT id, code, name, is_core
             FROM courses
             WHERE class_id = ?
             ORDER BY sort_order, code",
        )
        .map_err(HandlerErr::db_query)?;
    let courses = stmt
        .query_map([&student.class_id], |r| {
            let id: String = r.get(0)?;
            Ok(json!({
                "id": id.clone(),
                "code": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "isCore": r.get::<_, i64>(3)? != 0,
                "registered": registered.contains(&id),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({
        "studentId": student_id,
        "termId": term_id,
        "sessionId": term.session_id,
        "courses": courses,
    }))
}

fn registration_set(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let term_id = required_str(params, "termId")?;
    let student = student_ref(conn, &student_id)?;
    let term = term_ref(conn, &term_id)?;

    let Some(raw_ids) = params.get("courseIds").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("courseIds must be an array"));
    };
    let mut wanted: HashSet<String> = HashSet::new();
    for raw in raw_ids {
        let id = raw
            .as_str()
            .ok_or_else(|| HandlerErr::bad_params("courseIds entries must be strings"))?;
        let course = course_ref(conn, id)?;
        if course.class_id != student.class_id {
            return Err(HandlerErr::bad_params(format!(
                "course {} does not belong to the student's class",
                course.code
            )));
        }
        wanted.insert(id.to_string());
    }

    let current: HashSet<String> = {
        let mut stmt = conn
            .prepare(
                "SELECT course_id FROM course_registrations
                 WHERE student_id = ? AND term_id = ?",
            )
            .map_err(HandlerErr::db_query)?;
        stmt.query_map((&student_id, &term_id), |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
            .map_err(HandlerErr::db_query)?
    };

    // A course with recorded marks cannot be silently dropped; the scores
    // would become orphans on the report sheets.
    for course_id in current.difference(&wanted) {
        let has_scores: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM score_entries
                 WHERE student_id = ? AND course_id = ? AND term_id = ?",
                (&student_id, course_id, &term_id),
                |r| r.get(0),
            )
            .map_err(HandlerErr::db_query)?;
        if has_scores > 0 {
            let course = course_ref(conn, course_id)?;
            return Err(HandlerErr::invalid_state(format!(
                "cannot drop {}: scores are already recorded",
                course.code
            )));
        }
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    let mut dropped = 0usize;
    for course_id in current.difference(&wanted) {
        tx.execute(
            "DELETE FROM course_registrations
             WHERE student_id = ? AND course_id = ? AND term_id = ?",
            (&student_id, course_id, &term_id),
        )
        .map_err(HandlerErr::db_update)?;
        dropped += 1;
    }
    let mut added = 0usize;
    for course_id in wanted.difference(&current) {
        tx.execute(
            "INSERT INTO course_registrations(id, student_id, course_id, session_id, term_id, registered_at)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                new_id(),
                &student_id,
                course_id,
                &term.session_id,
                &term_id,
                now_iso(),
            ),
        )
        .map_err(|e| HandlerErr::db_insert(e, "course_registrations", "already registered"))?;
        added += 1;
    }
    tx.commit().map_err(HandlerErr::db_tx)?;

    Ok(json!({ "registered": wanted.len(), "added": added, "dropped": dropped }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(with_conn(state, req, courses_list)),
        "courses.create" => Some(with_conn(state, req, courses_create)),
        "courses.update" => Some(with_conn(state, req, courses_update)),
        "courses.delete" => Some(with_conn(state, req, courses_delete)),
        "registration.open" => Some(with_conn(state, req, registration_open)),
        "registration.set" => Some(with_conn(state, req, registration_set)),
        _ => None,
    }
}
