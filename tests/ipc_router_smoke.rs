mod common;

use common::{seed_class, seed_session, seed_student, Sidecar};
use serde_json::json;

#[test]
fn unknown_methods_answer_not_implemented() {
    let mut d = Sidecar::spawn();
    let resp = d.request("timetable.generate", json!({}));
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "not_implemented");
}

#[test]
fn methods_require_a_workspace_before_touching_the_database() {
    let mut d = Sidecar::spawn();
    let (code, _) = d.request_err("sessions.list", json!({}));
    assert_eq!(code, "no_workspace");
    let (code, _) = d.request_err("classes.create", json!({ "name": "JSS 1A" }));
    assert_eq!(code, "no_workspace");
}

#[test]
fn every_handler_family_answers_after_workspace_select() {
    let (mut d, _ws) = Sidecar::spawn_with_workspace("campusd-smoke");

    let health = d.request_ok("health", json!({}));
    assert!(health["workspacePath"].as_str().is_some());

    let (_session, terms) = seed_session(&mut d, "2025/2026");
    let term = &terms[0];
    let class = seed_class(&mut d, "Smoke Class");
    let student = seed_student(&mut d, &class, "ADM-SMOKE");

    d.request_ok("setup.get", json!({}));
    d.request_ok("classes.list", json!({}));
    d.request_ok("students.list", json!({}));
    d.request_ok("courses.list", json!({ "classId": class }));
    d.request_ok(
        "fees.items.list",
        json!({ "classId": class, "termId": term }),
    );
    d.request_ok("charges.list", json!({}));
    d.request_ok("payments.list", json!({}));
    d.request_ok(
        "ledger.studentModel",
        json!({ "studentId": student, "termId": term }),
    );
    d.request_ok(
        "results.broadsheet",
        json!({ "classId": class, "termId": term }),
    );
    d.request_ok("reports.revenueModel", json!({ "termId": term }));
    d.request_ok("events.list", json!({}));
    d.request_ok("gallery.albums.list", json!({}));
    d.request_ok("lessons.list", json!({}));
}

#[test]
fn reusing_the_workspace_persists_data_across_restarts() {
    let (mut first, ws) = Sidecar::spawn_with_workspace("campusd-persist");
    seed_class(&mut first, "JSS 1A");
    drop(first);

    let mut second = Sidecar::spawn();
    second.request_ok(
        "workspace.select",
        json!({ "path": ws.to_string_lossy() }),
    );
    let classes = second.request_ok("classes.list", json!({}));
    assert_eq!(classes["classes"].as_array().unwrap().len(), 1);
}
