use chrono::{NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, FeePurpose};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(what: &str) -> Self {
        Self {
            code: "not_found",
            message: format!("{} not found", what),
            details: None,
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self {
            code: "invalid_state",
            message: message.into(),
            details: None,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            code: "conflict",
            message: message.into(),
            details: None,
        }
    }

    pub fn db_query(e: impl ToString) -> Self {
        Self {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }

    pub fn db_update(e: impl ToString) -> Self {
        Self {
            code: "db_update_failed",
            message: e.to_string(),
            details: None,
        }
    }

    pub fn db_tx(e: impl ToString) -> Self {
        Self {
            code: "db_tx_failed",
            message: e.to_string(),
            details: None,
        }
    }

    /// Insert failures surface uniqueness violations as `conflict` so the UI
    /// can show the duplicate-field message instead of a raw SQLite error.
    pub fn db_insert(e: rusqlite::Error, table: &'static str, conflict_msg: &str) -> Self {
        if is_constraint_violation(&e) {
            Self {
                code: "conflict",
                message: conflict_msg.to_string(),
                details: Some(json!({ "table": table })),
            }
        } else {
            Self {
                code: "db_insert_failed",
                message: e.to_string(),
                details: Some(json!({ "table": table })),
            }
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

// Calculator errors already carry the code/message/details the UI expects;
// forward them untouched.
impl From<crate::ledger::LedgerError> for HandlerErr {
    fn from(e: crate::ledger::LedgerError) -> Self {
        Self {
            code: match e.code.as_str() {
                "invalid_amount" => "invalid_amount",
                _ => "bad_params",
            },
            message: e.message,
            details: e.details,
        }
    }
}

impl From<crate::grading::ScoreError> for HandlerErr {
    fn from(e: crate::grading::ScoreError) -> Self {
        Self {
            code: match e.code.as_str() {
                "invalid_score" => "invalid_score",
                _ => "bad_params",
            },
            message: e.message,
            details: e.details,
        }
    }
}

pub fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Runs a handler body against the open workspace database, mapping the
/// no-workspace case and `HandlerErr` onto the response envelope.
pub fn with_conn(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let raw = params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(trimmed.to_string())
}

pub fn optional_str(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v
                .as_str()
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a string", key)))?;
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                Ok(Some(trimmed.to_string()))
            }
        }
    }
}

pub fn optional_bool(params: &serde_json::Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

pub fn required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key)))
}

/// Amounts arrive as JSON numbers or strings; both go through the ledger
/// parser so a bad value fails with `invalid_amount` either way.
pub fn amount_param(params: &serde_json::Value, key: &str) -> Result<Decimal, HandlerErr> {
    let v = params
        .get(key)
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    let raw = match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => {
            return Err(HandlerErr {
                code: "invalid_amount",
                message: format!("{} must be a number or numeric string", key),
                details: None,
            })
        }
    };
    Ok(ledger::parse_amount(&raw)?)
}

pub fn purpose_param(params: &serde_json::Value, key: &str) -> Result<FeePurpose, HandlerErr> {
    let raw = required_str(params, key)?;
    FeePurpose::parse(&raw).ok_or_else(|| {
        HandlerErr::bad_params(format!(
            "{} must be one of: tuition, exam, uniform, pta, other",
            key
        ))
    })
}

pub fn optional_purpose_param(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<FeePurpose>, HandlerErr> {
    match optional_str(params, key)? {
        None => Ok(None),
        Some(raw) => FeePurpose::parse(&raw).map(Some).ok_or_else(|| {
            HandlerErr::bad_params(format!(
                "{} must be one of: tuition, exam, uniform, pta, other",
                key
            ))
        }),
    }
}

pub fn date_param(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let raw = required_str(params, key)?;
    parse_iso_date(&raw, key)
}

pub fn optional_date_param(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<String>, HandlerErr> {
    match optional_str(params, key)? {
        None => Ok(None),
        Some(raw) => parse_iso_date(&raw, key).map(Some),
    }
}

fn parse_iso_date(raw: &str, key: &str) -> Result<String, HandlerErr> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| HandlerErr::bad_params(format!("{} must be an ISO date (YYYY-MM-DD)", key)))
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn today_iso() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn id_exists(conn: &Connection, table: &'static str, id: &str) -> Result<bool, HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    conn.query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(HandlerErr::db_query)
}

#[derive(Debug, Clone)]
pub struct TermRef {
    pub id: String,
    pub session_id: String,
    pub name: String,
    pub session_name: String,
}

pub fn term_ref(conn: &Connection, term_id: &str) -> Result<TermRef, HandlerErr> {
    conn.query_row(
        "SELECT t.id, t.session_id, t.name, s.name
         FROM terms t
         JOIN sessions s ON s.id = t.session_id
         WHERE t.id = ?",
        [term_id],
        |r| {
            Ok(TermRef {
                id: r.get(0)?,
                session_id: r.get(1)?,
                name: r.get(2)?,
                session_name: r.get(3)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db_query)?
    .ok_or_else(|| HandlerErr::not_found("term"))
}

#[derive(Debug, Clone)]
pub struct StudentRef {
    pub id: String,
    pub class_id: String,
    pub admission_no: String,
    pub display_name: String,
}

pub fn student_ref(conn: &Connection, student_id: &str) -> Result<StudentRef, HandlerErr> {
    conn.query_row(
        "SELECT id, class_id, admission_no, last_name, first_name
         FROM students
         WHERE id = ?",
        [student_id],
        |r| {
            let last: String = r.get(3)?;
            let first: String = r.get(4)?;
            Ok(StudentRef {
                id: r.get(0)?,
                class_id: r.get(1)?,
                admission_no: r.get(2)?,
                display_name: format!("{}, {}", last, first),
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db_query)?
    .ok_or_else(|| HandlerErr::not_found("student"))
}

#[derive(Debug, Clone)]
pub struct CourseRef {
    pub id: String,
    pub class_id: String,
    pub code: String,
    pub name: String,
    pub is_core: bool,
}

pub fn course_ref(conn: &Connection, course_id: &str) -> Result<CourseRef, HandlerErr> {
    conn.query_row(
        "SELECT id, class_id, code, name, is_core FROM courses WHERE id = ?",
        [course_id],
        |r| {
            Ok(CourseRef {
                id: r.get(0)?,
                class_id: r.get(1)?,
                code: r.get(2)?,
                name: r.get(3)?,
                is_core: r.get::<_, i64>(4)? != 0,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db_query)?
    .ok_or_else(|| HandlerErr::not_found("course"))
}

pub fn stored_purpose(raw: &str) -> Result<FeePurpose, HandlerErr> {
    FeePurpose::parse(raw).ok_or_else(|| {
        HandlerErr::invalid_state(format!("stored fee purpose is invalid: {}", raw))
    })
}

pub fn ledger_row_json(row: &ledger::LedgerRow) -> serde_json::Value {
    json!({
        "purpose": row.purpose.as_str(),
        "totalCharged": row.total_charged.to_string(),
        "totalPaid": row.total_paid.to_string(),
        "balance": row.balance.to_string(),
        "status": row.status.as_str(),
    })
}

/// Loads one student's charges for a term as calculator input.
pub fn load_charge_lines(
    conn: &Connection,
    student_id: &str,
    term_id: &str,
) -> Result<Vec<ledger::ChargeLine>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT purpose, amount, carried_over
             FROM charges
             WHERE student_id = ? AND term_id = ?",
        )
        .map_err(HandlerErr::db_query)?;
    let raw = stmt
        .query_map((student_id, term_id), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)? != 0,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut lines = Vec::with_capacity(raw.len());
    for (purpose, amount, carried_over) in raw {
        lines.push(ledger::ChargeLine {
            purpose: stored_purpose(&purpose)?,
            amount: ledger::parse_amount(&amount)?,
            carried_over,
        });
    }
    Ok(lines)
}

/// Loads one student's payments for a term as calculator input.
pub fn load_payment_lines(
    conn: &Connection,
    student_id: &str,
    term_id: &str,
) -> Result<Vec<ledger::PaymentLine>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT purpose, amount
             FROM payments
             WHERE student_id = ? AND term_id = ?",
        )
        .map_err(HandlerErr::db_query)?;
    let raw = stmt
        .query_map((student_id, term_id), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut lines = Vec::with_capacity(raw.len());
    for (purpose, amount) in raw {
        lines.push(ledger::PaymentLine {
            purpose: stored_purpose(&purpose)?,
            amount: ledger::parse_amount(&amount)?,
        });
    }
    Ok(lines)
}
