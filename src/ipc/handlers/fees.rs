use crate::ipc::helpers::{
    amount_param, id_exists, load_charge_lines, load_payment_lines, new_id, now_iso,
    optional_bool, optional_purpose_param, optional_str, purpose_param, required_str, student_ref,
    term_ref, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{json, Value};

fn fee_items_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let term_id = required_str(params, "termId")?;
    if !id_exists(conn, "classes", &class_id)? {
        return Err(HandlerErr::not_found("class"));
    }
    term_ref(conn, &term_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, purpose, amount
             FROM fee_items
             WHERE class_id = ? AND term_id = ?
             ORDER BY purpose",
        )
        .map_err(HandlerErr::db_query)?;
    let items = stmt
        .query_map((&class_id, &term_id), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "classId": class_id.clone(),
                "termId": term_id.clone(),
                "purpose": r.get::<_, String>(1)?,
                "amount": r.get::<_, String>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "items": items }))
}

fn fee_items_upsert(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let term_id = required_str(params, "termId")?;
    if !id_exists(conn, "classes", &class_id)? {
        return Err(HandlerErr::not_found("class"));
    }
    term_ref(conn, &term_id)?;
    let purpose = purpose_param(params, "purpose")?;
    let amount = amount_param(params, "amount")?;

    conn.execute(
        "INSERT INTO fee_items(id, class_id, term_id, purpose, amount)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(class_id, term_id, purpose) DO UPDATE SET amount = excluded.amount",
        (
            new_id(),
            &class_id,
            &term_id,
            purpose.as_str(),
            amount.to_string(),
        ),
    )
    .map_err(HandlerErr::db_update)?;

    Ok(json!({ "ok": true }))
}

fn fee_items_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let fee_item_id = required_str(params, "feeItemId")?;
    let affected = conn
        .execute("DELETE FROM fee_items WHERE id = ?", [&fee_item_id])
        .map_err(HandlerErr::db_update)?;
    if affected == 0 {
        return Err(HandlerErr::not_found("fee item"));
    }
    Ok(json!({ "ok": true }))
}

fn charge_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "student_id": r.get::<_, String>(1)?,
        "purpose": r.get::<_, String>(2)?,
        "amount": r.get::<_, String>(3)?,
        "session_id": r.get::<_, String>(4)?,
        "term_id": r.get::<_, String>(5)?,
        "carried_over": r.get::<_, i64>(6)? != 0,
        "note": r.get::<_, Option<String>>(7)?,
        "created_at": r.get::<_, Option<String>>(8)?,
    }))
}

fn charges_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
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
        "SELECT id, student_id, purpose, amount, session_id, term_id, carried_over, note, created_at
         FROM charges{}
         ORDER BY created_at, id",
        where_sql
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let charges = stmt
        .query_map(params_from_iter(bind_values), |r| charge_row_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "charges": charges }))
}

fn charges_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let term_id = required_str(params, "termId")?;
    student_ref(conn, &student_id)?;
    let term = term_ref(conn, &term_id)?;
    let purpose = purpose_param(params, "purpose")?;
    let amount = amount_param(params, "amount")?;
    let carried_over = optional_bool(params, "carriedOver")?.unwrap_or(false);
    let note = optional_str(params, "note")?;

    let charge_id = new_id();
    conn.execute(
        "INSERT INTO charges(id, student_id, purpose, amount, session_id, term_id, carried_over, note, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &charge_id,
            &student_id,
            purpose.as_str(),
            amount.to_string(),
            &term.session_id,
            &term_id,
            i64::from(carried_over),
            &note,
            now_iso(),
        ),
    )
    .map_err(|e| HandlerErr::db_insert(e, "charges", "charge already exists"))?;

    Ok(json!({ "chargeId": charge_id }))
}

fn charges_generate(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let term_id = required_str(params, "termId")?;
    if !id_exists(conn, "classes", &class_id)? {
        return Err(HandlerErr::not_found("class"));
    }
    let term = term_ref(conn, &term_id)?;

    let items: Vec<(String, String)> = {
        let mut stmt = conn
            .prepare(
                "SELECT purpose, amount FROM fee_items
                 WHERE class_id = ? AND term_id = ?
                 ORDER BY purpose",
            )
            .map_err(HandlerErr::db_query)?;
        stmt.query_map((&class_id, &term_id), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?
    };
    if items.is_empty() {
        return Err(HandlerErr::invalid_state(
            "no fee structure defined for this class and term",
        ));
    }

    let students: Vec<String> = {
        let mut stmt = conn
            .prepare("SELECT id FROM students WHERE class_id = ? AND active = 1")
            .map_err(HandlerErr::db_query)?;
        stmt.query_map([&class_id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?
    };

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    let now = now_iso();
    let mut created = 0usize;
    let mut skipped = 0usize;
    for student_id in &students {
        for (purpose, amount) in &items {
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM charges
                     WHERE student_id = ? AND term_id = ? AND purpose = ? AND carried_over = 0
                     LIMIT 1",
                    (student_id, &term_id, purpose),
                    |r| r.get(0),
                )
                .optional()
                .map_err(HandlerErr::db_query)?;
            if existing.is_some() {
                skipped += 1;
                continue;
            }
            tx.execute(
                "INSERT INTO charges(id, student_id, purpose, amount, session_id, term_id, carried_over, note, created_at)
                 VALUES(?, ?, ?, ?, ?, ?, 0, NULL, ?)",
                (new_id(), student_id, purpose, amount, &term.session_id, &term_id, &now),
            )
            .map_err(|e| HandlerErr::db_insert(e, "charges", "charge already exists"))?;
            created += 1;
        }
    }
    tx.commit().map_err(HandlerErr::db_tx)?;

    Ok(json!({
        "students": students.len(),
        "created": created,
        "skipped": skipped,
    }))
}

fn charges_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let charge_id = required_str(params, "chargeId")?;
    let affected = conn
        .execute("DELETE FROM charges WHERE id = ?", [&charge_id])
        .map_err(HandlerErr::db_update)?;
    if affected == 0 {
        return Err(HandlerErr::not_found("charge"));
    }
    Ok(json!({ "ok": true }))
}

fn roll_forward(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let from_term_id = required_str(params, "fromTermId")?;
    let to_term_id = required_str(params, "toTermId")?;
    if from_term_id == to_term_id {
        return Err(HandlerErr::bad_params(
            "fromTermId and toTermId must differ",
        ));
    }
    term_ref(conn, &from_term_id)?;
    let to_term = term_ref(conn, &to_term_id)?;
    let class_id = optional_str(params, "classId")?;
    if let Some(cid) = &class_id {
        if !id_exists(conn, "classes", cid)? {
            return Err(HandlerErr::not_found("class"));
        }
    }

    let students: Vec<String> = {
        let (sql, binds): (&str, Vec<rusqlite::types::Value>) = match &class_id {
            Some(cid) => (
                "SELECT id FROM students WHERE active = 1 AND class_id = ?",
                vec![rusqlite::types::Value::Text(cid.clone())],
            ),
            None => ("SELECT id FROM students WHERE active = 1", Vec::new()),
        };
        let mut stmt = conn.prepare(sql).map_err(HandlerErr::db_query)?;
        stmt.query_map(params_from_iter(binds), |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?
    };

    // Marks created charges so a second run finds and skips them.
    let marker = format!("roll-forward:{}", from_term_id);

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    let now = now_iso();
    let mut created = 0usize;
    let mut skipped = 0usize;
    for student_id in &students {
        let charges = load_charge_lines(&tx, student_id, &from_term_id)?;
        let payments = load_payment_lines(&tx, student_id, &from_term_id)?;
        let rows = ledger::reduce_ledger(&charges, &payments)?;

        for row in rows.iter().filter(|r| r.balance > rust_decimal::Decimal::ZERO) {
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM charges
                     WHERE student_id = ? AND term_id = ? AND purpose = ?
                       AND carried_over = 1 AND note = ?
                     LIMIT 1",
                    (student_id, &to_term_id, row.purpose.as_str(), &marker),
                    |r| r.get(0),
                )
                .optional()
                .map_err(HandlerErr::db_query)?;
            if existing.is_some() {
                skipped += 1;
                continue;
            }
            tx.execute(
                "INSERT INTO charges(id, student_id, purpose, amount, session_id, term_id, carried_over, note, created_at)
                 VALUES(?, ?, ?, ?, ?, ?, 1, ?, ?)",
                (
                    new_id(),
                    student_id,
                    row.purpose.as_str(),
                    row.balance.to_string(),
                    &to_term.session_id,
                    &to_term_id,
                    &marker,
                    &now,
                ),
            )
            .map_err(|e| HandlerErr::db_insert(e, "charges", "charge already exists"))?;
            created += 1;
        }
    }
    tx.commit().map_err(HandlerErr::db_tx)?;

    tracing::info!(
        from = %from_term_id,
        to = %to_term_id,
        created,
        skipped,
        "debt roll-forward finished"
    );

    Ok(json!({
        "studentsProcessed": students.len(),
        "chargesCreated": created,
        "skippedExisting": skipped,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.items.list" => Some(with_conn(state, req, fee_items_list)),
        "fees.items.upsert" => Some(with_conn(state, req, fee_items_upsert)),
        "fees.items.delete" => Some(with_conn(state, req, fee_items_delete)),
        "fees.rollForward" => Some(with_conn(state, req, roll_forward)),
        "charges.list" => Some(with_conn(state, req, charges_list)),
        "charges.create" => Some(with_conn(state, req, charges_create)),
        "charges.generate" => Some(with_conn(state, req, charges_generate)),
        "charges.delete" => Some(with_conn(state, req, charges_delete)),
        _ => None,
    }
}
