use crate::ipc::handlers::payments::load_scope_lines;
use crate::ipc::handlers::setup::{self, SetupSection};
use crate::ipc::helpers::{
    id_exists, load_charge_lines, load_payment_lines, optional_str, required_str, term_ref,
    with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde_json::{json, Value};

struct ClassRevenue {
    expected: Decimal,
    collected: Decimal,
    current_outstanding: Decimal,
    previous_outstanding: Decimal,
    previous_debt: Decimal,
}

fn class_revenue(
    conn: &Connection,
    term_id: &str,
    class_id: &str,
) -> Result<ClassRevenue, HandlerErr> {
    let (charges, payments) = load_scope_lines(conn, term_id, Some(class_id))?;
    let rows = ledger::reduce_ledger(&charges, &payments)?;
    let carried: Vec<_> = charges.iter().filter(|c| c.carried_over).cloned().collect();
    let split = ledger::split_debt(&rows, &carried)?;

    Ok(ClassRevenue {
        expected: split.current_fee + split.previous_debt,
        collected: split.total_paid,
        current_outstanding: split.current_outstanding,
        previous_outstanding: split.previous_outstanding,
        previous_debt: split.previous_debt,
    })
}

/// Expected/collected/outstanding per class for a term, with the
/// outstanding figure split into current fees and carried-over debt.
///
/// The "(debt … from last term)" annotation is attached here, and only when
/// a class actually carries debt; a zero never produces the suffix.
fn revenue_model(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let term_id = required_str(params, "termId")?;
    let term = term_ref(conn, &term_id)?;
    let only_class = optional_str(params, "classId")?;
    if let Some(cid) = &only_class {
        if !id_exists(conn, "classes", cid)? {
            return Err(HandlerErr::not_found("class"));
        }
    }
    let currency = setup::str_field(conn, SetupSection::General, "currencySymbol", "\u{20a6}");

    let classes: Vec<(String, String)> = {
        let (sql, binds): (&str, Vec<rusqlite::types::Value>) = match &only_class {
            Some(cid) => (
                "SELECT id, name FROM classes WHERE id = ?",
                vec![rusqlite::types::Value::Text(cid.clone())],
            ),
            None => (
                "SELECT id, name FROM classes ORDER BY sort_order, name",
                Vec::new(),
            ),
        };
        let mut stmt = conn.prepare(sql).map_err(HandlerErr::db_query)?;
        stmt.query_map(rusqlite::params_from_iter(binds), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?
    };

    let mut class_rows = Vec::with_capacity(classes.len());
    let mut total = ClassRevenue {
        expected: Decimal::ZERO,
        collected: Decimal::ZERO,
        current_outstanding: Decimal::ZERO,
        previous_outstanding: Decimal::ZERO,
        previous_debt: Decimal::ZERO,
    };
    for (class_id, class_name) in &classes {
        let rev = class_revenue(conn, &term_id, class_id)?;
        let debt_note = if rev.previous_debt > Decimal::ZERO {
            Some(format!(
                "(debt {}{} from last term)",
                currency, rev.previous_debt
            ))
        } else {
            None
        };
        total.expected += rev.expected;
        total.collected += rev.collected;
        total.current_outstanding += rev.current_outstanding;
        total.previous_outstanding += rev.previous_outstanding;
        total.previous_debt += rev.previous_debt;

        class_rows.push(json!({
            "classId": class_id,
            "className": class_name,
            "expected": rev.expected.to_string(),
            "collected": rev.collected.to_string(),
            "currentOutstanding": rev.current_outstanding.to_string(),
            "previousOutstanding": rev.previous_outstanding.to_string(),
            "previousDebt": rev.previous_debt.to_string(),
            "debtNote": debt_note,
        }));
    }

    Ok(json!({
        "termId": term.id,
        "termName": term.name,
        "sessionName": term.session_name,
        "classes": class_rows,
        "totals": {
            "expected": total.expected.to_string(),
            "collected": total.collected.to_string(),
            "currentOutstanding": total.current_outstanding.to_string(),
            "previousOutstanding": total.previous_outstanding.to_string(),
            "previousDebt": total.previous_debt.to_string(),
        },
    }))
}

/// Per-student charged/paid/balance/status for one class and term, the
/// consolidated fee view the admin dashboard tables render.
fn class_fee_status_model(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let term_id = required_str(params, "termId")?;
    if !id_exists(conn, "classes", &class_id)? {
        return Err(HandlerErr::not_found("class"));
    }
    let term = term_ref(conn, &term_id)?;

    let students: Vec<(String, String, String)> = {
        let mut stmt = conn
            .prepare(
                "SELECT id, admission_no, last_name || ', ' || first_name
                 FROM students
                 WHERE class_id = ? AND active = 1
                 ORDER BY sort_order, last_name, first_name",
            )
            .map_err(HandlerErr::db_query)?;
        stmt.query_map([&class_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?
    };

    let mut rows = Vec::with_capacity(students.len());
    for (student_id, admission_no, name) in &students {
        let charges = load_charge_lines(conn, student_id, &term_id)?;
        let payments = load_payment_lines(conn, student_id, &term_id)?;
        let ledger_rows = ledger::reduce_ledger(&charges, &payments)?;

        let charged: Decimal = ledger_rows.iter().map(|r| r.total_charged).sum();
        let paid: Decimal = ledger_rows.iter().map(|r| r.total_paid).sum();
        let status = ledger::classify_status(charged, paid);

        rows.push(json!({
            "studentId": student_id,
            "admissionNo": admission_no,
            "studentName": name,
            "charged": charged.to_string(),
            "paid": paid.to_string(),
            "balance": (charged - paid).to_string(),
            "status": status.as_str(),
        }));
    }

    Ok(json!({
        "classId": class_id,
        "termId": term.id,
        "termName": term.name,
        "sessionName": term.session_name,
        "rows": rows,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.revenueModel" => Some(with_conn(state, req, revenue_model)),
        "reports.classFeeStatusModel" => Some(with_conn(state, req, class_fee_status_model)),
        _ => None,
    }
}
