mod common;

use common::{seed_class, seed_course, seed_session, Sidecar};
use serde_json::json;

fn seed_note(d: &mut Sidecar, class: &str, course: &str, term: &str, week: i64) -> String {
    let result = d.request_ok(
        "lessons.create",
        json!({
            "classId": class,
            "courseId": course,
            "termId": term,
            "week": week,
            "topic": "Simultaneous equations",
            "teacherName": "Mr. Adeyemi",
        }),
    );
    common::str_field(&result, "noteId")
}

#[test]
fn note_walks_draft_submitted_approved() {
    let (mut d, _ws) = Sidecar::spawn_with_workspace("campusd-lessons");
    let (_session, terms) = seed_session(&mut d, "2025/2026");
    let term = &terms[0];
    let class = seed_class(&mut d, "JSS 1A");
    let math = seed_course(&mut d, &class, "MTH", true);
    let note = seed_note(&mut d, &class, &math, term, 3);

    // A draft cannot be reviewed.
    let (code, _) = d.request_err(
        "lessons.review",
        json!({ "noteId": note, "decision": "approve" }),
    );
    assert_eq!(code, "invalid_state");

    let submitted = d.request_ok("lessons.submit", json!({ "noteId": note }));
    assert_eq!(submitted["status"], "submitted");

    // Submitted notes are frozen.
    let (code, _) = d.request_err(
        "lessons.update",
        json!({ "noteId": note, "topic": "Changed behind the reviewer's back" }),
    );
    assert_eq!(code, "invalid_state");

    let approved = d.request_ok(
        "lessons.review",
        json!({ "noteId": note, "decision": "approve" }),
    );
    assert_eq!(approved["status"], "approved");

    // Approved notes can be neither edited nor deleted.
    let (code, _) = d.request_err(
        "lessons.update",
        json!({ "noteId": note, "topic": "Too late" }),
    );
    assert_eq!(code, "invalid_state");
    let (code, _) = d.request_err("lessons.delete", json!({ "noteId": note }));
    assert_eq!(code, "invalid_state");
}

#[test]
fn returned_note_reopens_for_edit_and_resubmission() {
    let (mut d, _ws) = Sidecar::spawn_with_workspace("campusd-lessons-return");
    let (_session, terms) = seed_session(&mut d, "2025/2026");
    let term = &terms[0];
    let class = seed_class(&mut d, "JSS 2A");
    let eng = seed_course(&mut d, &class, "ENG", true);
    let note = seed_note(&mut d, &class, &eng, term, 5);

    d.request_ok("lessons.submit", json!({ "noteId": note }));

    // Returning without a comment is rejected.
    let (code, _) = d.request_err(
        "lessons.review",
        json!({ "noteId": note, "decision": "return" }),
    );
    assert_eq!(code, "bad_params");

    let returned = d.request_ok(
        "lessons.review",
        json!({ "noteId": note, "decision": "return", "comment": "objectives missing" }),
    );
    assert_eq!(returned["status"], "returned");

    // The teacher can fix it and resubmit; the stale comment is cleared.
    d.request_ok(
        "lessons.update",
        json!({ "noteId": note, "objectives": "solve linear pairs by elimination" }),
    );
    d.request_ok("lessons.submit", json!({ "noteId": note }));

    let listed = d.request_ok(
        "lessons.list",
        json!({ "classId": class, "termId": term }),
    );
    let row = &listed["notes"].as_array().unwrap()[0];
    assert_eq!(row["status"], "submitted");
    assert!(row["reviewComment"].is_null());
}

#[test]
fn submit_auto_approves_when_review_is_disabled() {
    let (mut d, _ws) = Sidecar::spawn_with_workspace("campusd-lessons-noreview");
    let (_session, terms) = seed_session(&mut d, "2025/2026");
    let term = &terms[0];
    let class = seed_class(&mut d, "JSS 3A");
    let sci = seed_course(&mut d, &class, "SCI", true);
    d.request_ok(
        "setup.update",
        json!({ "section": "lessons", "patch": { "requireReview": false } }),
    );

    let note = seed_note(&mut d, &class, &sci, term, 1);
    let submitted = d.request_ok("lessons.submit", json!({ "noteId": note }));
    assert_eq!(submitted["status"], "approved");
}

#[test]
fn week_must_fit_the_configured_term_length() {
    let (mut d, _ws) = Sidecar::spawn_with_workspace("campusd-lessons-week");
    let (_session, terms) = seed_session(&mut d, "2025/2026");
    let term = &terms[0];
    let class = seed_class(&mut d, "SS 1A");
    let math = seed_course(&mut d, &class, "MTH", true);

    let (code, _) = d.request_err(
        "lessons.create",
        json!({
            "classId": class,
            "courseId": math,
            "termId": term,
            "week": 14,
            "topic": "Out of range",
        }),
    );
    assert_eq!(code, "bad_params");

    d.request_ok(
        "setup.update",
        json!({ "section": "lessons", "patch": { "weeksPerTerm": 15 } }),
    );
    let note = seed_note(&mut d, &class, &math, term, 14);

    // Drafts can be deleted.
    d.request_ok("lessons.delete", json!({ "noteId": note }));
    let listed = d.request_ok("lessons.list", json!({ "classId": class }));
    assert!(listed["notes"].as_array().unwrap().is_empty());
}
