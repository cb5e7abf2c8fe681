use crate::ipc::helpers::{
    id_exists, new_id, now_iso, optional_str, required_str, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

fn albums_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.title, a.description, a.event_id, a.created_at,
                    (SELECT COUNT(*) FROM media_items i WHERE i.album_id = a.id)
             FROM media_albums a
             ORDER BY a.created_at DESC, a.title",
        )
        .map_err(HandlerErr::db_query)?;
    let albums = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "description": r.get::<_, Option<String>>(2)?,
                "eventId": r.get::<_, Option<String>>(3)?,
                "createdAt": r.get::<_, Option<String>>(4)?,
                "itemCount": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "albums": albums }))
}

fn albums_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let title = required_str(params, "title")?;
    let description = optional_str(params, "description")?;
    let event_id = optional_str(params, "eventId")?;
    if let Some(eid) = &event_id {
        if !id_exists(conn, "events", eid)? {
            return Err(HandlerErr::not_found("event"));
        }
    }

    let album_id = new_id();
    conn.execute(
        "INSERT INTO media_albums(id, title, description, event_id, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (&album_id, &title, &description, &event_id, now_iso()),
    )
    .map_err(|e| HandlerErr::db_insert(e, "media_albums", "album already exists"))?;

    Ok(json!({ "albumId": album_id }))
}

fn albums_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let album_id = required_str(params, "albumId")?;
    if !id_exists(conn, "media_albums", &album_id)? {
        return Err(HandlerErr::not_found("album"));
    }

    // Items are metadata rows only; the files under media/ stay untouched.
    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    tx.execute("DELETE FROM media_items WHERE album_id = ?", [&album_id])
        .map_err(HandlerErr::db_update)?;
    tx.execute("DELETE FROM media_albums WHERE id = ?", [&album_id])
        .map_err(HandlerErr::db_update)?;
    tx.commit().map_err(HandlerErr::db_tx)?;

    Ok(json!({ "ok": true }))
}

fn item_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "fileName": r.get::<_, String>(1)?,
        "contentType": r.get::<_, String>(2)?,
        "sizeBytes": r.get::<_, i64>(3)?,
        "sha256": r.get::<_, String>(4)?,
        "caption": r.get::<_, Option<String>>(5)?,
        "sortOrder": r.get::<_, i64>(6)?,
        "addedAt": r.get::<_, Option<String>>(7)?,
    }))
}

fn album_open(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let album_id = required_str(params, "albumId")?;
    let album: Option<(String, Option<String>, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT title, description, event_id, created_at FROM media_albums WHERE id = ?",
            [&album_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some((title, description, event_id, created_at)) = album else {
        return Err(HandlerErr::not_found("album"));
    };

    let mut stmt = conn
        .prepare(
            "SELECT id, file_name, content_type, size_bytes, sha256, caption, sort_order, added_at
             FROM media_items
             WHERE album_id = ?
             ORDER BY sort_order, added_at, file_name",
        )
        .map_err(HandlerErr::db_query)?;
    let items = stmt
        .query_map([&album_id], |r| item_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({
        "id": album_id,
        "title": title,
        "description": description,
        "eventId": event_id,
        "createdAt": created_at,
        "items": items,
    }))
}

fn content_type_for(file_name: &str) -> &'static str {
    match Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}

fn media_file_digest(path: &Path) -> Result<(i64, String), HandlerErr> {
    let bytes = std::fs::read(path).map_err(|e| HandlerErr {
        code: "io_failed",
        message: format!("cannot read media file: {}", e),
        details: None,
    })?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok((bytes.len() as i64, format!("{:x}", hasher.finalize())))
}

/// Registers a file that already lives under the workspace `media/`
/// directory, capturing its size and SHA-256 at add time.
fn items_add(
    conn: &Connection,
    params: &Value,
    workspace: &Path,
) -> Result<Value, HandlerErr> {
    let album_id = required_str(params, "albumId")?;
    if !id_exists(conn, "media_albums", &album_id)? {
        return Err(HandlerErr::not_found("album"));
    }
    let file_name = required_str(params, "fileName")?;
    // Plain file names only; the gallery never reaches outside media/.
    if file_name.contains('/') || file_name.contains('\\') || file_name.contains("..") {
        return Err(HandlerErr::bad_params(
            "fileName must be a plain file name without path separators",
        ));
    }
    let caption = optional_str(params, "caption")?;

    let file_path = workspace.join("media").join(&file_name);
    if !file_path.is_file() {
        return Err(HandlerErr::not_found("media file"));
    }
    let (size_bytes, sha256) = media_file_digest(&file_path)?;

    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), 0) + 1 FROM media_items WHERE album_id = ?",
            [&album_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;

    let item_id = new_id();
    conn.execute(
        "INSERT INTO media_items(id, album_id, file_name, content_type, size_bytes, sha256, caption, sort_order, added_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &item_id,
            &album_id,
            &file_name,
            content_type_for(&file_name),
            size_bytes,
            &sha256,
            &caption,
            next_sort,
            now_iso(),
        ),
    )
    .map_err(|e| HandlerErr::db_insert(e, "media_items", "file already in this album"))?;

    Ok(json!({
        "itemId": item_id,
        "sizeBytes": size_bytes,
        "sha256": sha256,
    }))
}

fn items_remove(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let item_id = required_str(params, "itemId")?;
    let affected = conn
        .execute("DELETE FROM media_items WHERE id = ?", [&item_id])
        .map_err(HandlerErr::db_update)?;
    if affected == 0 {
        return Err(HandlerErr::not_found("media item"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "gallery.albums.list" => Some(with_conn(state, req, albums_list)),
        "gallery.albums.create" => Some(with_conn(state, req, albums_create)),
        "gallery.albums.delete" => Some(with_conn(state, req, albums_delete)),
        "gallery.albumOpen" => Some(with_conn(state, req, album_open)),
        "gallery.items.add" => {
            let workspace: Option<PathBuf> = state.workspace.clone();
            Some(with_conn(state, req, move |conn, params| {
                let ws = workspace
                    .as_deref()
                    .ok_or_else(|| HandlerErr::invalid_state("workspace path missing"))?;
                items_add(conn, params, ws)
            }))
        }
        "gallery.items.remove" => Some(with_conn(state, req, items_remove)),
        _ => None,
    }
}
