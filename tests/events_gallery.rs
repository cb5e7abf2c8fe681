mod common;

use common::Sidecar;
use serde_json::json;
use sha2::{Digest, Sha256};

#[test]
fn events_filter_by_window_and_audience() {
    let (mut d, _ws) = Sidecar::spawn_with_workspace("campusd-events");

    for (title, starts, audience) in [
        ("Resumption", "2025-09-08", "all"),
        ("PTA Meeting", "2025-10-18", "parents"),
        ("Inter-house Sports", "2026-02-14", "students"),
    ] {
        d.request_ok(
            "events.create",
            json!({ "title": title, "startsOn": starts, "audience": audience }),
        );
    }

    let windowed = d.request_ok(
        "events.list",
        json!({ "from": "2025-09-01", "to": "2025-12-31" }),
    );
    let titles: Vec<&str> = windowed["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["Resumption", "PTA Meeting"]);

    // Audience filters still include events addressed to everyone.
    let for_parents = d.request_ok("events.list", json!({ "audience": "parents" }));
    let titles: Vec<&str> = for_parents["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["Resumption", "PTA Meeting"]);
}

#[test]
fn event_windows_and_updates_are_validated() {
    let (mut d, _ws) = Sidecar::spawn_with_workspace("campusd-events-validate");

    let (code, _) = d.request_err(
        "events.create",
        json!({ "title": "Backwards", "startsOn": "2025-10-10", "endsOn": "2025-10-09" }),
    );
    assert_eq!(code, "bad_params");

    let created = d.request_ok(
        "events.create",
        json!({ "title": "Open Day", "startsOn": "2025-11-01", "endsOn": "2025-11-02" }),
    );
    let event_id = common::str_field(&created, "eventId");

    // Moving startsOn past the stored endsOn must fail too.
    let (code, _) = d.request_err(
        "events.update",
        json!({ "eventId": event_id, "startsOn": "2025-11-05" }),
    );
    assert_eq!(code, "bad_params");

    d.request_ok(
        "events.update",
        json!({ "eventId": event_id, "startsOn": "2025-11-03", "endsOn": "2025-11-04" }),
    );
    d.request_ok("events.delete", json!({ "eventId": event_id }));
    let (code, _) = d.request_err("events.delete", json!({ "eventId": event_id }));
    assert_eq!(code, "not_found");
}

#[test]
fn gallery_records_size_and_checksum_of_workspace_media() {
    let (mut d, workspace) = Sidecar::spawn_with_workspace("campusd-gallery");

    let bytes = b"not-really-a-jpeg-but-bytes-enough";
    std::fs::write(workspace.join("media").join("sports-day.jpg"), bytes)
        .expect("write media file");
    let expected_sha = format!("{:x}", Sha256::digest(bytes));

    let album = d.request_ok("gallery.albums.create", json!({ "title": "Sports Day" }));
    let album_id = common::str_field(&album, "albumId");

    let added = d.request_ok(
        "gallery.items.add",
        json!({ "albumId": album_id, "fileName": "sports-day.jpg", "caption": "100m final" }),
    );
    assert_eq!(added["sizeBytes"], bytes.len() as i64);
    assert_eq!(common::str_field(&added, "sha256"), expected_sha);

    let opened = d.request_ok("gallery.albumOpen", json!({ "albumId": album_id }));
    let items = opened["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["contentType"], "image/jpeg");
    assert_eq!(items[0]["caption"], "100m final");

    // The same file cannot join the same album twice.
    let (code, _) = d.request_err(
        "gallery.items.add",
        json!({ "albumId": album_id, "fileName": "sports-day.jpg" }),
    );
    assert_eq!(code, "conflict");

    let listed = d.request_ok("gallery.albums.list", json!({}));
    assert_eq!(listed["albums"].as_array().unwrap()[0]["itemCount"], 1);
}

#[test]
fn gallery_rejects_missing_files_and_path_escapes() {
    let (mut d, _ws) = Sidecar::spawn_with_workspace("campusd-gallery-guard");
    let album = d.request_ok("gallery.albums.create", json!({ "title": "Guarded" }));
    let album_id = common::str_field(&album, "albumId");

    let (code, _) = d.request_err(
        "gallery.items.add",
        json!({ "albumId": album_id, "fileName": "nowhere.png" }),
    );
    assert_eq!(code, "not_found");

    let (code, _) = d.request_err(
        "gallery.items.add",
        json!({ "albumId": album_id, "fileName": "../campus.sqlite3" }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn event_with_albums_cannot_be_deleted() {
    let (mut d, workspace) = Sidecar::spawn_with_workspace("campusd-gallery-linked");

    let event = d.request_ok(
        "events.create",
        json!({ "title": "Graduation", "startsOn": "2026-07-20" }),
    );
    let event_id = common::str_field(&event, "eventId");
    let album = d.request_ok(
        "gallery.albums.create",
        json!({ "title": "Graduation Photos", "eventId": event_id }),
    );
    let album_id = common::str_field(&album, "albumId");

    let (code, _) = d.request_err("events.delete", json!({ "eventId": event_id }));
    assert_eq!(code, "invalid_state");

    // Dropping the album only removes metadata; the file stays on disk.
    std::fs::write(workspace.join("media").join("stage.png"), b"png-bytes").expect("write media");
    d.request_ok(
        "gallery.items.add",
        json!({ "albumId": album_id, "fileName": "stage.png" }),
    );
    d.request_ok("gallery.albums.delete", json!({ "albumId": album_id }));
    assert!(workspace.join("media").join("stage.png").is_file());

    d.request_ok("events.delete", json!({ "eventId": event_id }));
}
