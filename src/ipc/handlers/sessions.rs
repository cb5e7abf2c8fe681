use crate::ipc::helpers::{
    new_id, optional_date_param, required_str, term_ref, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, Connection};
use serde_json::{json, Value};

const TERM_NAMES: [&str; 3] = ["First Term", "Second Term", "Third Term"];

fn sessions_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, starts_on, ends_on, is_current
             FROM sessions
             ORDER BY name",
        )
        .map_err(HandlerErr::db_query)?;
    let sessions = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, i64>(4)? != 0,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut term_stmt = conn
        .prepare(
            "SELECT id, seq, name, starts_on, ends_on, is_current
             FROM terms
             WHERE session_id = ?
             ORDER BY seq",
        )
        .map_err(HandlerErr::db_query)?;

    let mut out = Vec::with_capacity(sessions.len());
    for (id, name, starts_on, ends_on, is_current) in sessions {
        let terms = term_stmt
            .query_map([&id], |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "seq": r.get::<_, i64>(1)?,
                    "name": r.get::<_, String>(2)?,
                    "startsOn": r.get::<_, Option<String>>(3)?,
                    "endsOn": r.get::<_, Option<String>>(4)?,
                    "isCurrent": r.get::<_, i64>(5)? != 0,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?;
        out.push(json!({
            "id": id,
            "name": name,
            "startsOn": starts_on,
            "endsOn": ends_on,
            "isCurrent": is_current,
            "terms": terms,
        }));
    }

    Ok(json!({ "sessions": out }))
}

fn sessions_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = required_str(params, "name")?;
    if name.len() > 32 {
        return Err(HandlerErr::bad_params("name length must be <= 32"));
    }
    let starts_on = optional_date_param(params, "startsOn")?;
    let ends_on = optional_date_param(params, "endsOn")?;

    let has_current: i64 = conn
        .query_row("SELECT COUNT(*) FROM sessions WHERE is_current = 1", [], |r| r.get(0))
        .map_err(HandlerErr::db_query)?;
    let make_current = has_current == 0;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;

    let session_id = new_id();
    tx.execute(
        "INSERT INTO sessions(id, name, starts_on, ends_on, is_current) VALUES(?, ?, ?, ?, ?)",
        (
            &session_id,
            &name,
            &starts_on,
            &ends_on,
            i64::from(make_current),
        ),
    )
    .map_err(|e| HandlerErr::db_insert(e, "sessions", "a session with this name already exists"))?;

    let mut terms = Vec::with_capacity(TERM_NAMES.len());
    for (i, term_name) in TERM_NAMES.iter().enumerate() {
        let term_id = new_id();
        let seq = (i + 1) as i64;
        let is_current = make_current && i == 0;
        tx.execute(
            "INSERT INTO terms(id, session_id, seq, name, is_current) VALUES(?, ?, ?, ?, ?)",
            (&term_id, &session_id, seq, term_name, i64::from(is_current)),
        )
        .map_err(|e| HandlerErr::db_insert(e, "terms", "term already exists"))?;
        terms.push(json!({ "termId": term_id, "seq": seq, "name": term_name }));
    }

    tx.commit().map_err(HandlerErr::db_tx)?;

    Ok(json!({ "sessionId": session_id, "name": name, "terms": terms }))
}

fn sessions_set_current(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let session_id = required_str(params, "sessionId")?;
    let term_id = required_str(params, "termId")?;

    let term = term_ref(conn, &term_id)?;
    if term.session_id != session_id {
        return Err(HandlerErr::bad_params(
            "term does not belong to the given session",
        ));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    tx.execute("UPDATE sessions SET is_current = 0", [])
        .map_err(HandlerErr::db_update)?;
    tx.execute(
        "UPDATE sessions SET is_current = 1 WHERE id = ?",
        [&session_id],
    )
    .map_err(HandlerErr::db_update)?;
    tx.execute("UPDATE terms SET is_current = 0", [])
        .map_err(HandlerErr::db_update)?;
    tx.execute("UPDATE terms SET is_current = 1 WHERE id = ?", [&term_id])
        .map_err(HandlerErr::db_update)?;
    tx.commit().map_err(HandlerErr::db_tx)?;

    Ok(json!({ "ok": true }))
}

fn terms_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let term_id = required_str(params, "termId")?;
    term_ref(conn, &term_id)?;

    let patch_value = params.get("patch").cloned().unwrap_or(Value::Null);
    let Some(patch) = patch_value.as_object() else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let mut set_parts: Vec<&str> = Vec::new();
    let mut bind_values: Vec<rusqlite::types::Value> = Vec::new();
    for key in patch.keys() {
        match key.as_str() {
            "startsOn" => {
                let date = optional_date_param(&patch_value, "startsOn")?;
                set_parts.push("starts_on = ?");
                bind_values.push(match date {
                    Some(d) => rusqlite::types::Value::Text(d),
                    None => rusqlite::types::Value::Null,
                });
            }
            "endsOn" => {
                let date = optional_date_param(&patch_value, "endsOn")?;
                set_parts.push("ends_on = ?");
                bind_values.push(match date {
                    Some(d) => rusqlite::types::Value::Text(d),
                    None => rusqlite::types::Value::Null,
                });
            }
            other => {
                return Err(HandlerErr::bad_params(format!(
                    "unknown term field: {}",
                    other
                )))
            }
        }
    }
    if set_parts.is_empty() {
        return Err(HandlerErr::bad_params("patch must not be empty"));
    }

    let sql = format!("UPDATE terms SET {} WHERE id = ?", set_parts.join(", "));
    bind_values.push(rusqlite::types::Value::Text(term_id));
    conn.execute(&sql, params_from_iter(bind_values))
        .map_err(HandlerErr::db_update)?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.list" => Some(with_conn(state, req, sessions_list)),
        "sessions.create" => Some(with_conn(state, req, sessions_create)),
        "sessions.setCurrent" => Some(with_conn(state, req, sessions_set_current)),
        "terms.update" => Some(with_conn(state, req, terms_update)),
        _ => None,
    }
}
