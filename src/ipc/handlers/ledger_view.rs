use crate::ipc::helpers::{
    ledger_row_json, load_charge_lines, load_payment_lines, required_str, stored_purpose,
    student_ref, term_ref, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, ChargeLine};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde_json::{json, Value};

/// The student fee ledger the dashboards render: one row per purpose with
/// charged/paid/balance/status, plus scope totals and an overall status.
///
/// Purposes in the class fee structure that have no charge yet are seeded as
/// zero-amount placeholders so they surface as `pending` rows instead of
/// silently missing from the table.
fn student_model(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let term_id = required_str(params, "termId")?;
    let student = student_ref(conn, &student_id)?;
    let term = term_ref(conn, &term_id)?;

    let mut charges = load_charge_lines(conn, &student_id, &term_id)?;
    let payments = load_payment_lines(conn, &student_id, &term_id)?;

    let expected: Vec<String> = {
        let mut stmt = conn
            .prepare(
                "SELECT purpose FROM fee_items
                 WHERE class_id = ? AND term_id = ?
                 ORDER BY purpose",
            )
            .map_err(HandlerErr::db_query)?;
        stmt.query_map((&student.class_id, &term_id), |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?
    };
    for raw in expected {
        let purpose = stored_purpose(&raw)?;
        if !charges.iter().any(|c| c.purpose == purpose) {
            charges.push(ChargeLine {
                purpose,
                amount: Decimal::ZERO,
                carried_over: false,
            });
        }
    }

    let rows = ledger::reduce_ledger(&charges, &payments)?;

    let total_charged: Decimal = rows.iter().map(|r| r.total_charged).sum();
    let total_paid: Decimal = rows.iter().map(|r| r.total_paid).sum();
    let overall = ledger::classify_status(total_charged, total_paid);

    Ok(json!({
        "studentId": student.id,
        "studentName": student.display_name,
        "admissionNo": student.admission_no,
        "termId": term.id,
        "termName": term.name,
        "sessionName": term.session_name,
        "rows": rows.iter().map(ledger_row_json).collect::<Vec<_>>(),
        "totalCharged": total_charged.to_string(),
        "totalPaid": total_paid.to_string(),
        "totalBalance": (total_charged - total_paid).to_string(),
        "overallStatus": overall.as_str(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "ledger.studentModel" => Some(with_conn(state, req, student_model)),
        _ => None,
    }
}
