use crate::ipc::helpers::{
    amount_param, date_param, id_exists, ledger_row_json, new_id, now_iso, optional_purpose_param,
    optional_str, purpose_param, required_str, stored_purpose, student_ref, term_ref, with_conn,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, ChargeLine, PaymentLine};
use rusqlite::{params_from_iter, Connection};
use serde_json::{json, Value};

fn payment_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "student_id": r.get::<_, String>(1)?,
        "purpose": r.get::<_, String>(2)?,
        "amount": r.get::<_, String>(3)?,
        "paid_on": r.get::<_, String>(4)?,
        "session_id": r.get::<_, String>(5)?,
        "term_id": r.get::<_, String>(6)?,
        "reference": r.get::<_, Option<String>>(7)?,
        "recorded_at": r.get::<_, Option<String>>(8)?,
    }))
}

fn payments_record(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let term_id = required_str(params, "termId")?;
    student_ref(conn, &student_id)?;
    let term = term_ref(conn, &term_id)?;
    let purpose = purpose_param(params, "purpose")?;
    let amount = amount_param(params, "amount")?;
    let paid_on = date_param(params, "paidOn")?;
    let reference = optional_str(params, "reference")?;

    let payment_id = new_id();
    conn.execute(
        "INSERT INTO payments(id, student_id, purpose, amount, paid_on, session_id, term_id, reference, recorded_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &payment_id,
            &student_id,
            purpose.as_str(),
            amount.to_string(),
            &paid_on,
            &term.session_id,
            &term_id,
            &reference,
            now_iso(),
        ),
    )
    .map_err(|e| HandlerErr::db_insert(e, "payments", "payment already exists"))?;

    Ok(json!({ "paymentId": payment_id }))
}

fn payments_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = optional_str(params, "studentId")?;
    let term_id = optional_str(params, "termId")?;
    let purpose = optional_purpose_param(params, "purpose")?;

    let mut where_parts: Vec<&str> = Vec::new();
    let mut bind_values: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(sid) = student_id {
        where_parts.push("student_id = ?");
        bind_values.push(rusqlite::types::Value::Text(sid));
    }
    if let Some(tid) = term_id {
        where_parts.push("term_id = ?");
        bind_values.push(rusqlite::types::Value::Text(tid));
    }
    if let Some(p) = purpose {
        where_parts.push("purpose = ?");
        bind_values.push(rusqlite::types::Value::Text(p.as_str().to_string()));
    }
    let where_sql = if where_parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", where_parts.join(" AND "))
    };

    let sql = format!(
        "SELECT id, student_id, purpose, amount, paid_on, session_id, term_id, reference, recorded_at
         FROM payments{}
         ORDER BY paid_on, recorded_at, id",
        where_sql
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let payments = stmt
        .query_map(params_from_iter(bind_values), |r| payment_row_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "payments": payments }))
}

fn payments_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let payment_id = required_str(params, "paymentId")?;
    let affected = conn
        .execute("DELETE FROM payments WHERE id = ?", [&payment_id])
        .map_err(HandlerErr::db_update)?;
    if affected == 0 {
        return Err(HandlerErr::not_found("payment"));
    }
    Ok(json!({ "ok": true }))
}

/// Loads every charge/payment line in a term scope, optionally narrowed to
/// one class's students, as calculator input.
pub(super) fn load_scope_lines(
    conn: &Connection,
    term_id: &str,
    class_id: Option<&str>,
) -> Result<(Vec<ChargeLine>, Vec<PaymentLine>), HandlerErr> {
    let (charge_sql, payment_sql, binds): (&str, &str, Vec<rusqlite::types::Value>) =
        match class_id {
            Some(cid) => (
                "SELECT c.purpose, c.amount, c.carried_over
                 FROM charges c JOIN students s ON s.id = c.student_id
                 WHERE c.term_id = ? AND s.class_id = ?",
                "SELECT p.purpose, p.amount
                 FROM payments p JOIN students s ON s.id = p.student_id
                 WHERE p.term_id = ? AND s.class_id = ?",
                vec![
                    rusqlite::types::Value::Text(term_id.to_string()),
                    rusqlite::types::Value::Text(cid.to_string()),
                ],
            ),
            None => (
                "SELECT purpose, amount, carried_over FROM charges WHERE term_id = ?",
                "SELECT purpose, amount FROM payments WHERE term_id = ?",
                vec![rusqlite::types::Value::Text(term_id.to_string())],
            ),
        };

    let raw_charges = {
        let mut stmt = conn.prepare(charge_sql).map_err(HandlerErr::db_query)?;
        stmt.query_map(params_from_iter(binds.clone()), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)? != 0,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?
    };

    let raw_payments = {
        let mut stmt = conn.prepare(payment_sql).map_err(HandlerErr::db_query)?;
        stmt.query_map(params_from_iter(binds), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?
    };

    let mut charges = Vec::with_capacity(raw_charges.len());
    for (purpose, amount, carried_over) in raw_charges {
        charges.push(ChargeLine {
            purpose: stored_purpose(&purpose)?,
            amount: ledger::parse_amount(&amount)?,
            carried_over,
        });
    }
    let mut payments = Vec::with_capacity(raw_payments.len());
    for (purpose, amount) in raw_payments {
        payments.push(PaymentLine {
            purpose: stored_purpose(&purpose)?,
            amount: ledger::parse_amount(&amount)?,
        });
    }
    Ok((charges, payments))
}

/// Per-purpose totals for a whole term scope (school-wide, or one class),
/// classified with the same five-state status as every other ledger view.
fn payments_summary(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let term_id = required_str(params, "termId")?;
    let term = term_ref(conn, &term_id)?;
    let class_id = optional_str(params, "classId")?;
    if let Some(cid) = &class_id {
        if !id_exists(conn, "classes", cid)? {
            return Err(HandlerErr::not_found("class"));
        }
    }

    let (charges, payments) = load_scope_lines(conn, &term_id, class_id.as_deref())?;
    let rows = ledger::reduce_ledger(&charges, &payments)?;

    let total_charged: rust_decimal::Decimal = rows.iter().map(|r| r.total_charged).sum();
    let total_paid: rust_decimal::Decimal = rows.iter().map(|r| r.total_paid).sum();

    Ok(json!({
        "termId": term_id,
        "termName": term.name,
        "sessionName": term.session_name,
        "classId": class_id,
        "rows": rows.iter().map(ledger_row_json).collect::<Vec<_>>(),
        "totalCharged": total_charged.to_string(),
        "totalPaid": total_paid.to_string(),
        "totalBalance": (total_charged - total_paid).to_string(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "payments.record" => Some(with_conn(state, req, payments_record)),
        "payments.list" => Some(with_conn(state, req, payments_list)),
        "payments.delete" => Some(with_conn(state, req, payments_delete)),
        "payments.summary" => Some(with_conn(state, req, payments_summary)),
        _ => None,
    }
}
