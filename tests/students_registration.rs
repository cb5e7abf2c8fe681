mod common;

use common::{register_courses, seed_class, seed_course, seed_session, seed_student, Sidecar};
use serde_json::json;

#[test]
fn duplicate_admission_numbers_surface_as_conflicts() {
    let (mut d, _ws) = Sidecar::spawn_with_workspace("campusd-students");
    let class = seed_class(&mut d, "JSS 1A");
    seed_student(&mut d, &class, "ADM-001");

    let (code, _) = d.request_err(
        "students.create",
        json!({
            "classId": class,
            "admissionNo": "ADM-001",
            "lastName": "Bello",
            "firstName": "Amina",
        }),
    );
    assert_eq!(code, "conflict");
}

#[test]
fn transfer_moves_a_student_between_classes() {
    let (mut d, _ws) = Sidecar::spawn_with_workspace("campusd-transfer");
    let from = seed_class(&mut d, "JSS 1A");
    let to = seed_class(&mut d, "JSS 1B");
    let student = seed_student(&mut d, &from, "ADM-005");

    let moved = d.request_ok(
        "students.transfer",
        json!({ "studentId": student, "toClassId": to }),
    );
    assert_eq!(moved["fromClassId"], json!(from));
    assert_eq!(moved["toClassId"], json!(to));

    let in_from = d.request_ok("students.list", json!({ "classId": from }));
    assert!(in_from["students"].as_array().unwrap().is_empty());
    let in_to = d.request_ok("students.list", json!({ "classId": to }));
    assert_eq!(in_to["students"].as_array().unwrap().len(), 1);

    // Counts on the class list follow.
    let classes = d.request_ok("classes.list", json!({}));
    let count_of = |name: &str| {
        classes["classes"]
            .as_array()
            .unwrap()
            .iter()
            .find(|c| c["name"] == name)
            .unwrap()["studentCount"]
            .as_i64()
            .unwrap()
    };
    assert_eq!(count_of("JSS 1A"), 0);
    assert_eq!(count_of("JSS 1B"), 1);
}

#[test]
fn registration_replaces_the_set_but_protects_scored_courses() {
    let (mut d, _ws) = Sidecar::spawn_with_workspace("campusd-registration");
    let (_session, terms) = seed_session(&mut d, "2025/2026");
    let term = &terms[0];
    let class = seed_class(&mut d, "SS 1A");
    let student = seed_student(&mut d, &class, "ADM-020");
    let math = seed_course(&mut d, &class, "MTH", true);
    let eng = seed_course(&mut d, &class, "ENG", true);
    let art = seed_course(&mut d, &class, "ART", false);

    register_courses(&mut d, &student, term, &[&math, &art]);

    let open = d.request_ok(
        "registration.open",
        json!({ "studentId": student, "termId": term }),
    );
    let registered: Vec<&str> = open["courses"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|c| c["registered"] == true)
        .map(|c| c["code"].as_str().unwrap())
        .collect();
    assert_eq!(registered, vec!["MTH", "ART"]);

    // Swap art for english; no scores exist yet, so the drop is fine.
    register_courses(&mut d, &student, term, &[&math, &eng]);

    d.request_ok(
        "results.enterScore",
        json!({
            "studentId": student,
            "courseId": math,
            "termId": term,
            "ca": 10,
            "midterm": 10,
            "exam": 40,
        }),
    );

    // Math now has marks; dropping it would orphan them.
    let (code, _) = d.request_err(
        "registration.set",
        json!({ "studentId": student, "termId": term, "courseIds": [eng] }),
    );
    assert_eq!(code, "invalid_state");
}

#[test]
fn courses_from_another_class_cannot_be_registered() {
    let (mut d, _ws) = Sidecar::spawn_with_workspace("campusd-cross-class");
    let (_session, terms) = seed_session(&mut d, "2025/2026");
    let term = &terms[0];
    let class_a = seed_class(&mut d, "JSS 1A");
    let class_b = seed_class(&mut d, "JSS 1B");
    let student = seed_student(&mut d, &class_a, "ADM-030");
    let foreign = seed_course(&mut d, &class_b, "FRN", false);

    let (code, _) = d.request_err(
        "registration.set",
        json!({ "studentId": student, "termId": term, "courseIds": [foreign] }),
    );
    assert_eq!(code, "bad_params");
}
