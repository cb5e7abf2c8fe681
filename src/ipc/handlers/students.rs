use crate::ipc::helpers::{
    id_exists, is_constraint_violation, new_id, now_iso, optional_bool, optional_date_param,
    optional_str, required_str, student_ref, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, Connection};
use serde_json::{json, Value};

fn parse_gender(raw: &str) -> Result<String, HandlerErr> {
    let g = raw.to_ascii_lowercase();
    if g != "male" && g != "female" {
        return Err(HandlerErr::bad_params("gender must be male or female"));
    }
    Ok(g)
}

fn students_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = optional_str(params, "classId")?;
    let include_inactive = optional_bool(params, "includeInactive")?.unwrap_or(false);

    if let Some(cid) = &class_id {
        if !id_exists(conn, "classes", cid)? {
            return Err(HandlerErr::not_found("class"));
        }
    }

    let mut where_parts: Vec<&str> = Vec::new();
    let mut bind_values: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(cid) = class_id {
        where_parts.push("class_id = ?");
        bind_values.push(rusqlite::types::Value::Text(cid));
    }
    if !include_inactive {
        where_parts.push("active = 1");
    }
    let where_sql = if where_parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", where_parts.join(" AND "))
    };

    let sql = format!(
        "SELECT id, class_id, admission_no, last_name, first_name, gender, birth_date,
                guardian_name, guardian_phone, active, sort_order
         FROM students{}
         ORDER BY class_id, sort_order, last_name",
        where_sql
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let students = stmt
        .query_map(params_from_iter(bind_values), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "classId": r.get::<_, String>(1)?,
                "admissionNo": r.get::<_, String>(2)?,
                "lastName": r.get::<_, String>(3)?,
                "firstName": r.get::<_, String>(4)?,
                "gender": r.get::<_, Option<String>>(5)?,
                "birthDate": r.get::<_, Option<String>>(6)?,
                "guardianName": r.get::<_, Option<String>>(7)?,
                "guardianPhone": r.get::<_, Option<String>>(8)?,
                "active": r.get::<_, i64>(9)? != 0,
                "sortOrder": r.get::<_, i64>(10)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    if !id_exists(conn, "classes", &class_id)? {
        return Err(HandlerErr::not_found("class"));
    }
    let admission_no = required_str(params, "admissionNo")?;
    let last_name = required_str(params, "lastName")?;
    let first_name = required_str(params, "firstName")?;
    let gender = match optional_str(params, "gender")? {
        Some(g) => Some(parse_gender(&g)?),
        None => None,
    };
    let birth_date = optional_date_param(params, "birthDate")?;
    let guardian_name = optional_str(params, "guardianName")?;
    let guardian_phone = optional_str(params, "guardianPhone")?;

    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students WHERE class_id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;

    let student_id = new_id();
    let now = now_iso();
    conn.execute(
        "INSERT INTO students(
            id, class_id, admission_no, last_name, first_name, gender, birth_date,
            guardian_name, guardian_phone, active, sort_order, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?)",
        (
            &student_id,
            &class_id,
            &admission_no,
            &last_name,
            &first_name,
            &gender,
            &birth_date,
            &guardian_name,
            &guardian_phone,
            next_sort,
            &now,
            &now,
        ),
    )
    .map_err(|e| HandlerErr::db_insert(e, "students", "admission number is already in use"))?;

    Ok(json!({ "studentId": student_id, "admissionNo": admission_no }))
}

fn students_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    student_ref(conn, &student_id)?;

    let patch_value = params.get("patch").cloned().unwrap_or(Value::Null);
    let Some(patch) = patch_value.as_object() else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let mut set_parts: Vec<&str> = Vec::new();
    let mut bind_values: Vec<rusqlite::types::Value> = Vec::new();
    for (key, value) in patch {
        match key.as_str() {
            "admissionNo" => {
                let v = required_str(&patch_value, "admissionNo")?;
                set_parts.push("admission_no = ?");
                bind_values.push(rusqlite::types::Value::Text(v));
            }
            "lastName" => {
                let v = required_str(&patch_value, "lastName")?;
                set_parts.push("last_name = ?");
                bind_values.push(rusqlite::types::Value::Text(v));
            }
            "firstName" => {
                let v = required_str(&patch_value, "firstName")?;
                set_parts.push("first_name = ?");
                bind_values.push(rusqlite::types::Value::Text(v));
            }
            "gender" => {
                set_parts.push("gender = ?");
                bind_values.push(match optional_str(&patch_value, "gender")? {
                    Some(g) => rusqlite::types::Value::Text(parse_gender(&g)?),
                    None => rusqlite::types::Value::Null,
                });
            }
            "birthDate" => {
                set_parts.push("birth_date = ?");
                bind_values.push(match optional_date_param(&patch_value, "birthDate")? {
                    Some(d) => rusqlite::types::Value::Text(d),
                    None => rusqlite::types::Value::Null,
                });
            }
            "guardianName" => {
                set_parts.push("guardian_name = ?");
                bind_values.push(match optional_str(&patch_value, "guardianName")? {
                    Some(v) => rusqlite::types::Value::Text(v),
                    None => rusqlite::types::Value::Null,
                });
            }
            "guardianPhone" => {
                set_parts.push("guardian_phone = ?");
                bind_values.push(match optional_str(&patch_value, "guardianPhone")? {
                    Some(v) => rusqlite::types::Value::Text(v),
                    None => rusqlite::types::Value::Null,
                });
            }
            "active" => {
                let v = value
                    .as_bool()
                    .ok_or_else(|| HandlerErr::bad_params("active must be boolean"))?;
                set_parts.push("active = ?");
                bind_values.push(rusqlite::types::Value::Integer(i64::from(v)));
            }
            other => {
                return Err(HandlerErr::bad_params(format!(
                    "unknown student field: {}",
                    other
                )))
            }
        }
    }
    if set_parts.is_empty() {
        return Err(HandlerErr::bad_params("patch must not be empty"));
    }

    set_parts.push("updated_at = ?");
    bind_values.push(rusqlite::types::Value::Text(now_iso()));

    let sql = format!("UPDATE students SET {} WHERE id = ?", set_parts.join(", "));
    bind_values.push(rusqlite::types::Value::Text(student_id));
    conn.execute(&sql, params_from_iter(bind_values)).map_err(|e| {
        if is_constraint_violation(&e) {
            HandlerErr::conflict("admission number is already in use")
        } else {
            HandlerErr::db_update(e)
        }
    })?;

    Ok(json!({ "ok": true }))
}

fn students_transfer(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let to_class_id = required_str(params, "toClassId")?;

    let student = student_ref(conn, &student_id)?;
    if !id_exists(conn, "classes", &to_class_id)? {
        return Err(HandlerErr::not_found("class"));
    }
    if student.class_id == to_class_id {
        return Err(HandlerErr::bad_params(
            "student is already in the target class",
        ));
    }

    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students WHERE class_id = ?",
            [&to_class_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;

    // Registrations, scores, charges and payments stay with the student;
    // those records carry their own term scope.
    conn.execute(
        "UPDATE students SET class_id = ?, sort_order = ?, updated_at = ? WHERE id = ?",
        (&to_class_id, next_sort, now_iso(), &student_id),
    )
    .map_err(HandlerErr::db_update)?;

    Ok(json!({ "ok": true, "fromClassId": student.class_id, "toClassId": to_class_id }))
}

fn students_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    student_ref(conn, &student_id)?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    for sql in [
        "DELETE FROM score_entries WHERE student_id = ?",
        "DELETE FROM course_registrations WHERE student_id = ?",
        "DELETE FROM charges WHERE student_id = ?",
        "DELETE FROM payments WHERE student_id = ?",
        "DELETE FROM students WHERE id = ?",
    ] {
        tx.execute(sql, [&student_id]).map_err(HandlerErr::db_update)?;
    }
    tx.commit().map_err(HandlerErr::db_tx)?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_conn(state, req, students_list)),
        "students.create" => Some(with_conn(state, req, students_create)),
        "students.update" => Some(with_conn(state, req, students_update)),
        "students.transfer" => Some(with_conn(state, req, students_transfer)),
        "students.delete" => Some(with_conn(state, req, students_delete)),
        _ => None,
    }
}
