use crate::ipc::error::ok;
use crate::ipc::helpers::{
    id_exists, new_id, optional_str, required_str, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, Connection};
use serde_json::{json, Value};

fn classes_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    // Correlated subqueries keep the counts join-free so a class with many
    // students and courses is not double-counted.
    let mut stmt = conn
        .prepare(
            "SELECT
               c.id,
               c.name,
               c.level,
               c.sort_order,
               (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id AND s.active = 1) AS student_count,
               (SELECT COUNT(*) FROM courses k WHERE k.class_id = c.id) AS course_count
             FROM classes c
             ORDER BY c.sort_order, c.name",
        )
        .map_err(HandlerErr::db_query)?;

    let classes = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "level": row.get::<_, Option<String>>(2)?,
                "sortOrder": row.get::<_, i64>(3)?,
                "studentCount": row.get::<_, i64>(4)?,
                "courseCount": row.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "classes": classes }))
}

fn classes_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = required_str(params, "name")?;
    if name.len() > 64 {
        return Err(HandlerErr::bad_params("name length must be <= 64"));
    }
    let level = optional_str(params, "level")?;

    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM classes",
            [],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;

    let class_id = new_id();
    conn.execute(
        "INSERT INTO classes(id, name, level, sort_order) VALUES(?, ?, ?, ?)",
        (&class_id, &name, &level, next_sort),
    )
    .map_err(|e| HandlerErr::db_insert(e, "classes", "a class with this name already exists"))?;

    Ok(json!({ "classId": class_id, "name": name }))
}

fn classes_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    if !id_exists(conn, "classes", &class_id)? {
        return Err(HandlerErr::not_found("class"));
    }

    let patch_value = params.get("patch").cloned().unwrap_or(Value::Null);
    let Some(patch) = patch_value.as_object() else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let mut set_parts: Vec<&str> = Vec::new();
    let mut bind_values: Vec<rusqlite::types::Value> = Vec::new();
    for (key, value) in patch {
        match key.as_str() {
            "name" => {
                let name = required_str(&patch_value, "name")?;
                if name.len() > 64 {
                    return Err(HandlerErr::bad_params("name length must be <= 64"));
                }
                set_parts.push("name = ?");
                bind_values.push(rusqlite::types::Value::Text(name));
            }
            "level" => {
                set_parts.push("level = ?");
                bind_values.push(match value.as_str().map(|s| s.trim()) {
                    Some(s) if !s.is_empty() => rusqlite::types::Value::Text(s.to_string()),
                    _ => rusqlite::types::Value::Null,
                });
            }
            other => {
                return Err(HandlerErr::bad_params(format!(
                    "unknown class field: {}",
                    other
                )))
            }
        }
    }
    if set_parts.is_empty() {
        return Err(HandlerErr::bad_params("patch must not be empty"));
    }

    let sql = format!("UPDATE classes SET {} WHERE id = ?", set_parts.join(", "));
    bind_values.push(rusqlite::types::Value::Text(class_id));
    conn.execute(&sql, params_from_iter(bind_values)).map_err(|e| {
        if crate::ipc::helpers::is_constraint_violation(&e) {
            HandlerErr::conflict("a class with this name already exists")
        } else {
            HandlerErr::db_update(e)
        }
    })?;

    Ok(json!({ "ok": true }))
}

fn classes_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    if !id_exists(conn, "classes", &class_id)? {
        return Err(HandlerErr::not_found("class"));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    // NOTE: additional tables will be added over time; keep this list updated.
    let by_course_or_student = [
        "DELETE FROM score_entries
         WHERE course_id IN (SELECT id FROM courses WHERE class_id = ?1)
            OR student_id IN (SELECT id FROM students WHERE class_id = ?1)",
        "DELETE FROM course_registrations
         WHERE course_id IN (SELECT id FROM courses WHERE class_id = ?1)
            OR student_id IN (SELECT id FROM students WHERE class_id = ?1)",
        "DELETE FROM charges
         WHERE student_id IN (SELECT id FROM students WHERE class_id = ?1)",
        "DELETE FROM payments
         WHERE student_id IN (SELECT id FROM students WHERE class_id = ?1)",
        "DELETE FROM lesson_notes WHERE class_id = ?1",
        "DELETE FROM fee_items WHERE class_id = ?1",
        "DELETE FROM courses WHERE class_id = ?1",
        "DELETE FROM students WHERE class_id = ?1",
        "DELETE FROM classes WHERE id = ?1",
    ];
    for sql in by_course_or_student {
        tx.execute(sql, [&class_id]).map_err(HandlerErr::db_update)?;
    }

    tx.commit().map_err(HandlerErr::db_tx)?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => {
            // An empty workspace should render an empty dashboard, not an error.
            if state.db.is_none() {
                return Some(ok(&req.id, json!({ "classes": [] })));
            }
            Some(with_conn(state, req, classes_list))
        }
        "classes.create" => Some(with_conn(state, req, classes_create)),
        "classes.update" => Some(with_conn(state, req, classes_update)),
        "classes.delete" => Some(with_conn(state, req, classes_delete)),
        _ => None,
    }
}
