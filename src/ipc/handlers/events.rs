use crate::ipc::helpers::{
    date_param, new_id, now_iso, optional_date_param, optional_str, required_str, with_conn,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{json, Value};

const AUDIENCES: [&str; 4] = ["all", "students", "teachers", "parents"];

fn audience_param(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match optional_str(params, key)? {
        None => Ok(None),
        Some(raw) => {
            let lower = raw.to_ascii_lowercase();
            if AUDIENCES.contains(&lower.as_str()) {
                Ok(Some(lower))
            } else {
                Err(HandlerErr::bad_params(format!(
                    "{} must be one of: {}",
                    key,
                    AUDIENCES.join(", ")
                )))
            }
        }
    }
}

fn event_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "title": r.get::<_, String>(1)?,
        "details": r.get::<_, Option<String>>(2)?,
        "venue": r.get::<_, Option<String>>(3)?,
        "audience": r.get::<_, String>(4)?,
        "startsOn": r.get::<_, String>(5)?,
        "endsOn": r.get::<_, Option<String>>(6)?,
        "createdAt": r.get::<_, Option<String>>(7)?,
    }))
}

fn events_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let from = optional_date_param(params, "from")?;
    let to = optional_date_param(params, "to")?;
    let audience = audience_param(params, "audience")?;

    let mut where_parts: Vec<&str> = Vec::new();
    let mut binds: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(from) = from {
        where_parts.push("starts_on >= ?");
        binds.push(rusqlite::types::Value::Text(from));
    }
    if let Some(to) = to {
        where_parts.push("starts_on <= ?");
        binds.push(rusqlite::types::Value::Text(to));
    }
    if let Some(a) = audience {
        // "all" events are visible to every audience filter.
        where_parts.push("(audience = ? OR audience = 'all')");
        binds.push(rusqlite::types::Value::Text(a));
    }
    let where_sql = if where_parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", where_parts.join(" AND "))
    };

    let sql = format!(
        "SELECT id, title, details, venue, audience, starts_on, ends_on, created_at
         FROM events{}
         ORDER BY starts_on, title",
        where_sql
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let events = stmt
        .query_map(params_from_iter(binds), |r| event_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "events": events }))
}

fn check_window(starts_on: &str, ends_on: Option<&str>) -> Result<(), HandlerErr> {
    if let Some(ends) = ends_on {
        if ends < starts_on {
            return Err(HandlerErr::bad_params("endsOn must not precede startsOn"));
        }
    }
    Ok(())
}

fn events_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let title = required_str(params, "title")?;
    let starts_on = date_param(params, "startsOn")?;
    let ends_on = optional_date_param(params, "endsOn")?;
    check_window(&starts_on, ends_on.as_deref())?;
    let details = optional_str(params, "details")?;
    let venue = optional_str(params, "venue")?;
    let audience = audience_param(params, "audience")?.unwrap_or_else(|| "all".to_string());

    let event_id = new_id();
    conn.execute(
        "INSERT INTO events(id, title, details, venue, audience, starts_on, ends_on, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &event_id,
            &title,
            &details,
            &venue,
            &audience,
            &starts_on,
            &ends_on,
            now_iso(),
        ),
    )
    .map_err(|e| HandlerErr::db_insert(e, "events", "event already exists"))?;

    Ok(json!({ "eventId": event_id }))
}

fn events_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let event_id = required_str(params, "eventId")?;
    let existing: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT starts_on, ends_on FROM events WHERE id = ?",
            [&event_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some((current_starts, current_ends)) = existing else {
        return Err(HandlerErr::not_found("event"));
    };

    let mut set_parts: Vec<&str> = Vec::new();
    let mut binds: Vec<rusqlite::types::Value> = Vec::new();

    if let Some(title) = optional_str(params, "title")? {
        set_parts.push("title = ?");
        binds.push(rusqlite::types::Value::Text(title));
    }
    if params.get("details").is_some() {
        set_parts.push("details = ?");
        binds.push(match optional_str(params, "details")? {
            Some(v) => rusqlite::types::Value::Text(v),
            None => rusqlite::types::Value::Null,
        });
    }
    if params.get("venue").is_some() {
        set_parts.push("venue = ?");
        binds.push(match optional_str(params, "venue")? {
            Some(v) => rusqlite::types::Value::Text(v),
            None => rusqlite::types::Value::Null,
        });
    }
    if let Some(audience) = audience_param(params, "audience")? {
        set_parts.push("audience = ?");
        binds.push(rusqlite::types::Value::Text(audience));
    }

    let starts_on = optional_date_param(params, "startsOn")?;
    let ends_patch = if params.get("endsOn").is_some() {
        Some(optional_date_param(params, "endsOn")?)
    } else {
        None
    };
    let effective_starts = starts_on.clone().unwrap_or(current_starts);
    let effective_ends = match &ends_patch {
        Some(v) => v.clone(),
        None => current_ends,
    };
    check_window(&effective_starts, effective_ends.as_deref())?;
    if let Some(v) = starts_on {
        set_parts.push("starts_on = ?");
        binds.push(rusqlite::types::Value::Text(v));
    }
    if let Some(patch) = ends_patch {
        set_parts.push("ends_on = ?");
        binds.push(match patch {
            Some(v) => rusqlite::types::Value::Text(v),
            None => rusqlite::types::Value::Null,
        });
    }

    if set_parts.is_empty() {
        return Err(HandlerErr::bad_params("no fields to update"));
    }
    binds.push(rusqlite::types::Value::Text(event_id));
    let sql = format!("UPDATE events SET {} WHERE id = ?", set_parts.join(", "));
    conn.execute(&sql, params_from_iter(binds))
        .map_err(HandlerErr::db_update)?;

    Ok(json!({ "ok": true }))
}

fn events_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let event_id = required_str(params, "eventId")?;

    let linked_albums: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM media_albums WHERE event_id = ?",
            [&event_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;
    if linked_albums > 0 {
        return Err(HandlerErr::invalid_state(
            "event has gallery albums; delete or unlink them first",
        ));
    }

    let affected = conn
        .execute("DELETE FROM events WHERE id = ?", [&event_id])
        .map_err(HandlerErr::db_update)?;
    if affected == 0 {
        return Err(HandlerErr::not_found("event"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "events.list" => Some(with_conn(state, req, events_list)),
        "events.create" => Some(with_conn(state, req, events_create)),
        "events.update" => Some(with_conn(state, req, events_update)),
        "events.delete" => Some(with_conn(state, req, events_delete)),
        _ => None,
    }
}
