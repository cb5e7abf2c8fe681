mod common;

use common::{register_courses, seed_class, seed_course, seed_session, seed_student, Sidecar};
use serde_json::json;

#[test]
fn score_entry_validates_components_before_writing() {
    let (mut d, _ws) = Sidecar::spawn_with_workspace("campusd-scores");
    let (_session, terms) = seed_session(&mut d, "2025/2026");
    let term = &terms[0];
    let class = seed_class(&mut d, "JSS 1A");
    let student = seed_student(&mut d, &class, "ADM-001");
    let math = seed_course(&mut d, &class, "MTH", true);
    register_courses(&mut d, &student, term, &[&math]);

    // ca above its 20-mark ceiling is rejected, not clamped.
    let (code, error) = d.request_err(
        "results.enterScore",
        json!({
            "studentId": student,
            "courseId": math,
            "termId": term,
            "ca": 21,
            "midterm": 10,
            "exam": 40,
        }),
    );
    assert_eq!(code, "invalid_score");
    assert_eq!(error["details"]["field"], "ca");

    let sheet = d.request_ok(
        "results.courseSheet",
        json!({ "courseId": math, "termId": term }),
    );
    assert_eq!(sheet["entered"], 0);

    let entered = d.request_ok(
        "results.enterScore",
        json!({
            "studentId": student,
            "courseId": math,
            "termId": term,
            "ca": 18,
            "midterm": 15,
            "exam": 42,
        }),
    );
    assert_eq!(entered["total"], 75.0);
    assert_eq!(entered["grade"], "A1");
}

#[test]
fn unregistered_students_cannot_receive_scores() {
    let (mut d, _ws) = Sidecar::spawn_with_workspace("campusd-unregistered");
    let (_session, terms) = seed_session(&mut d, "2025/2026");
    let term = &terms[0];
    let class = seed_class(&mut d, "JSS 1B");
    let student = seed_student(&mut d, &class, "ADM-002");
    let eng = seed_course(&mut d, &class, "ENG", true);

    let (code, _) = d.request_err(
        "results.enterScore",
        json!({
            "studentId": student,
            "courseId": eng,
            "termId": term,
            "ca": 10,
            "midterm": 10,
            "exam": 40,
        }),
    );
    assert_eq!(code, "invalid_state");
}

#[test]
fn bulk_entry_is_all_or_nothing() {
    let (mut d, _ws) = Sidecar::spawn_with_workspace("campusd-bulk");
    let (_session, terms) = seed_session(&mut d, "2025/2026");
    let term = &terms[0];
    let class = seed_class(&mut d, "JSS 2A");
    let s1 = seed_student(&mut d, &class, "ADM-011");
    let s2 = seed_student(&mut d, &class, "ADM-012");
    let math = seed_course(&mut d, &class, "MTH", true);
    register_courses(&mut d, &s1, term, &[&math]);
    register_courses(&mut d, &s2, term, &[&math]);

    // Second row is out of range; the first must not land either.
    let (code, _) = d.request_err(
        "results.bulkEnterScores",
        json!({
            "courseId": math,
            "termId": term,
            "entries": [
                { "studentId": s1, "ca": 15, "midterm": 12, "exam": 40 },
                { "studentId": s2, "ca": 10, "midterm": 10, "exam": 61 },
            ],
        }),
    );
    assert_eq!(code, "invalid_score");
    let sheet = d.request_ok(
        "results.courseSheet",
        json!({ "courseId": math, "termId": term }),
    );
    assert_eq!(sheet["entered"], 0);

    let result = d.request_ok(
        "results.bulkEnterScores",
        json!({
            "courseId": math,
            "termId": term,
            "entries": [
                { "studentId": s1, "ca": 15, "midterm": 12, "exam": 40 },
                { "studentId": s2, "ca": 10, "midterm": 10, "exam": 25 },
            ],
        }),
    );
    assert_eq!(result["entered"], 2);
}

#[test]
fn course_sheet_reports_average_and_median_over_entered_totals() {
    let (mut d, _ws) = Sidecar::spawn_with_workspace("campusd-coursesheet");
    let (_session, terms) = seed_session(&mut d, "2025/2026");
    let term = &terms[0];
    let class = seed_class(&mut d, "JSS 3A");
    let math = seed_course(&mut d, &class, "MTH", true);

    let scores: [(&str, f64, f64, f64); 3] = [
        ("ADM-021", 18.0, 15.0, 42.0), // 75
        ("ADM-022", 10.0, 10.0, 30.0), // 50
        ("ADM-023", 12.0, 13.0, 40.0), // 65
    ];
    for (admission, ca, midterm, exam) in scores {
        let student = seed_student(&mut d, &class, admission);
        register_courses(&mut d, &student, term, &[&math]);
        d.request_ok(
            "results.enterScore",
            json!({
                "studentId": student,
                "courseId": math,
                "termId": term,
                "ca": ca,
                "midterm": midterm,
                "exam": exam,
            }),
        );
    }
    // A registered student without scores counts as registered, not entered.
    let late = seed_student(&mut d, &class, "ADM-024");
    register_courses(&mut d, &late, term, &[&math]);

    let sheet = d.request_ok(
        "results.courseSheet",
        json!({ "courseId": math, "termId": term }),
    );
    assert_eq!(sheet["registered"], 4);
    assert_eq!(sheet["entered"], 3);
    let avg = sheet["classAverage"].as_f64().unwrap();
    assert!((avg - (75.0 + 50.0 + 65.0) / 3.0).abs() < 1e-9);
    assert_eq!(sheet["classMedian"].as_f64().unwrap(), 65.0);

    let rows = sheet["rows"].as_array().unwrap();
    let missing = rows
        .iter()
        .find(|r| r["admissionNo"] == "ADM-024")
        .unwrap();
    assert!(missing["score"].is_null());
    let top = rows
        .iter()
        .find(|r| r["admissionNo"] == "ADM-021")
        .unwrap();
    assert_eq!(top["score"]["grade"], "A1");
    assert_eq!(top["score"]["total"], 75.0);
}

#[test]
fn student_sheet_collects_grades_and_distribution() {
    let (mut d, _ws) = Sidecar::spawn_with_workspace("campusd-studentsheet");
    let (_session, terms) = seed_session(&mut d, "2025/2026");
    let term = &terms[0];
    let class = seed_class(&mut d, "SS 1A");
    let student = seed_student(&mut d, &class, "ADM-031");
    let math = seed_course(&mut d, &class, "MTH", true);
    let eng = seed_course(&mut d, &class, "ENG", true);
    let arts = seed_course(&mut d, &class, "ART", false);
    register_courses(&mut d, &student, term, &[&math, &eng, &arts]);

    for (course, ca, midterm, exam) in [(&math, 18, 15, 42), (&eng, 16, 14, 40), (&arts, 5, 8, 20)]
    {
        d.request_ok(
            "results.enterScore",
            json!({
                "studentId": student,
                "courseId": course,
                "termId": term,
                "ca": ca,
                "midterm": midterm,
                "exam": exam,
            }),
        );
    }

    let sheet = d.request_ok(
        "results.studentSheet",
        json!({ "studentId": student, "termId": term }),
    );
    assert_eq!(sheet["coursesRegistered"], 3);
    assert_eq!(sheet["coursesEntered"], 3);
    // 75, 70, 33 -> A1, B2, F9
    assert_eq!(sheet["gradeDistribution"]["A1"], 1);
    assert_eq!(sheet["gradeDistribution"]["B2"], 1);
    assert_eq!(sheet["gradeDistribution"]["F9"], 1);
    assert_eq!(sheet["coursesPassed"], 2);
    let avg = sheet["average"].as_f64().unwrap();
    assert!((avg - (75.0 + 70.0 + 33.0) / 3.0).abs() < 1e-9);
}

#[test]
fn broadsheet_positions_are_dense_and_respect_setup() {
    let (mut d, _ws) = Sidecar::spawn_with_workspace("campusd-broadsheet");
    let (_session, terms) = seed_session(&mut d, "2025/2026");
    let term = &terms[0];
    let class = seed_class(&mut d, "SS 2A");
    let math = seed_course(&mut d, &class, "MTH", true);

    // Two students tie on 75; the third trails.
    let entries: [(&str, f64); 3] = [("ADM-041", 75.0), ("ADM-042", 75.0), ("ADM-043", 60.0)];
    for (admission, total) in entries {
        let student = seed_student(&mut d, &class, admission);
        register_courses(&mut d, &student, term, &[&math]);
        d.request_ok(
            "results.enterScore",
            json!({
                "studentId": student,
                "courseId": math,
                "termId": term,
                "ca": 15.0,
                "midterm": 15.0,
                "exam": total - 30.0,
            }),
        );
    }

    let sheet = d.request_ok(
        "results.broadsheet",
        json!({ "classId": class, "termId": term }),
    );
    assert_eq!(sheet["showPositions"], true);
    let rows = sheet["rows"].as_array().unwrap();
    let position_of = |admission: &str| {
        rows.iter()
            .find(|r| r["admissionNo"] == admission)
            .unwrap()["position"]
            .as_i64()
            .unwrap()
    };
    assert_eq!(position_of("ADM-041"), 1);
    assert_eq!(position_of("ADM-042"), 1);
    // Dense ranking: the next distinct average is 2nd, not 3rd.
    assert_eq!(position_of("ADM-043"), 2);

    let honour_roll = |admission: &str| {
        rows.iter()
            .find(|r| r["admissionNo"] == admission)
            .unwrap()["honourRoll"]
            .as_bool()
            .unwrap()
    };
    assert!(honour_roll("ADM-041"));
    assert!(!honour_roll("ADM-043"));

    d.request_ok(
        "setup.update",
        json!({ "section": "grading", "patch": { "showPositions": false } }),
    );
    let hidden = d.request_ok(
        "results.broadsheet",
        json!({ "classId": class, "termId": term }),
    );
    assert_eq!(hidden["showPositions"], false);
    for row in hidden["rows"].as_array().unwrap() {
        assert!(row["position"].is_null());
    }
}
