mod common;

use common::{seed_class, seed_session, seed_student, Sidecar};
use serde_json::json;

#[test]
fn roll_forward_carries_outstanding_into_the_next_term_once() {
    let (mut d, _ws) = Sidecar::spawn_with_workspace("campusd-rollforward");
    let (_session, terms) = seed_session(&mut d, "2025/2026");
    let (first_term, second_term) = (&terms[0], &terms[1]);
    let class = seed_class(&mut d, "JSS 1A");
    let student = seed_student(&mut d, &class, "ADM-001");

    d.request_ok(
        "charges.create",
        json!({ "studentId": student, "termId": first_term, "purpose": "tuition", "amount": "50000" }),
    );
    d.request_ok(
        "payments.record",
        json!({
            "studentId": student,
            "termId": first_term,
            "purpose": "tuition",
            "amount": "35000",
            "paidOn": "2025-11-20",
        }),
    );

    let run = d.request_ok(
        "fees.rollForward",
        json!({ "fromTermId": first_term, "toTermId": second_term }),
    );
    assert_eq!(run["chargesCreated"], 1);
    assert_eq!(run["skippedExisting"], 0);

    // The carried charge equals the source term's outstanding.
    let charges = d.request_ok(
        "charges.list",
        json!({ "studentId": student, "termId": second_term }),
    );
    let carried = &charges["charges"].as_array().unwrap()[0];
    assert_eq!(carried["purpose"], "tuition");
    assert_eq!(carried["amount"], "15000");
    assert_eq!(carried["carried_over"], true);

    // Idempotent: a rerun creates nothing new.
    let rerun = d.request_ok(
        "fees.rollForward",
        json!({ "fromTermId": first_term, "toTermId": second_term }),
    );
    assert_eq!(rerun["chargesCreated"], 0);
    assert_eq!(rerun["skippedExisting"], 1);
}

#[test]
fn revenue_model_splits_current_and_carried_outstanding() {
    let (mut d, _ws) = Sidecar::spawn_with_workspace("campusd-revenue");
    let (_session, terms) = seed_session(&mut d, "2025/2026");
    let term = &terms[1];
    let class = seed_class(&mut d, "JSS 2A");
    let student = seed_student(&mut d, &class, "ADM-050");

    // 50000 current fee plus 10000 carried debt, 30000 paid.
    d.request_ok(
        "charges.create",
        json!({ "studentId": student, "termId": term, "purpose": "tuition", "amount": "50000" }),
    );
    d.request_ok(
        "charges.create",
        json!({
            "studentId": student,
            "termId": term,
            "purpose": "tuition",
            "amount": "10000",
            "carriedOver": true,
        }),
    );
    d.request_ok(
        "payments.record",
        json!({
            "studentId": student,
            "termId": term,
            "purpose": "tuition",
            "amount": "30000",
            "paidOn": "2026-01-20",
        }),
    );

    let model = d.request_ok("reports.revenueModel", json!({ "termId": term }));
    let classes = model["classes"].as_array().unwrap();
    assert_eq!(classes.len(), 1);
    let row = &classes[0];
    assert_eq!(row["expected"], "60000");
    assert_eq!(row["collected"], "30000");
    // Payments settle the current fee first; the carried debt stays whole.
    assert_eq!(row["currentOutstanding"], "20000");
    assert_eq!(row["previousOutstanding"], "10000");
    let note = row["debtNote"].as_str().expect("debt note present");
    assert!(note.contains("10000"), "note should carry the amount: {}", note);
    assert!(note.contains("from last term"));

    assert_eq!(model["totals"]["expected"], "60000");
    assert_eq!(model["totals"]["previousOutstanding"], "10000");
}

#[test]
fn debt_annotation_is_suppressed_when_nothing_is_carried() {
    let (mut d, _ws) = Sidecar::spawn_with_workspace("campusd-revenue-clean");
    let (_session, terms) = seed_session(&mut d, "2025/2026");
    let term = &terms[0];
    let class = seed_class(&mut d, "JSS 3A");
    let student = seed_student(&mut d, &class, "ADM-060");

    d.request_ok(
        "charges.create",
        json!({ "studentId": student, "termId": term, "purpose": "tuition", "amount": "50000" }),
    );

    let model = d.request_ok(
        "reports.revenueModel",
        json!({ "termId": term, "classId": class }),
    );
    let row = &model["classes"].as_array().unwrap()[0];
    assert_eq!(row["previousDebt"], "0");
    assert!(row["debtNote"].is_null(), "no debt, no annotation");
}

#[test]
fn class_fee_status_uses_the_same_five_state_vocabulary() {
    let (mut d, _ws) = Sidecar::spawn_with_workspace("campusd-feestatus");
    let (_session, terms) = seed_session(&mut d, "2025/2026");
    let term = &terms[0];
    let class = seed_class(&mut d, "SS 1A");
    let paid = seed_student(&mut d, &class, "ADM-071");
    let partial = seed_student(&mut d, &class, "ADM-072");
    let untouched = seed_student(&mut d, &class, "ADM-073");

    for student in [&paid, &partial] {
        d.request_ok(
            "charges.create",
            json!({ "studentId": student, "termId": term, "purpose": "tuition", "amount": "40000" }),
        );
    }
    d.request_ok(
        "payments.record",
        json!({
            "studentId": paid,
            "termId": term,
            "purpose": "tuition",
            "amount": "40000",
            "paidOn": "2025-10-01",
        }),
    );
    d.request_ok(
        "payments.record",
        json!({
            "studentId": partial,
            "termId": term,
            "purpose": "tuition",
            "amount": "10000",
            "paidOn": "2025-10-01",
        }),
    );

    let model = d.request_ok(
        "reports.classFeeStatusModel",
        json!({ "classId": class, "termId": term }),
    );
    let rows = model["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 3);
    let status_of = |admission: &str| {
        rows.iter()
            .find(|r| r["admissionNo"] == admission)
            .map(|r| r["status"].as_str().unwrap().to_string())
            .unwrap()
    };
    assert_eq!(status_of("ADM-071"), "paid");
    assert_eq!(status_of("ADM-072"), "partial");
    assert_eq!(status_of("ADM-073"), "pending");

    let _ = untouched;
}
