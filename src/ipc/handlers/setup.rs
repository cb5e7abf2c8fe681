use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::ledger::FeePurpose;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
pub enum SetupSection {
    General,
    Fees,
    Grading,
    Lessons,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "general" => Some(Self::General),
            "fees" => Some(Self::Fees),
            "grading" => Some(Self::Grading),
            "lessons" => Some(Self::Lessons),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::General => "setup.general",
            Self::Fees => "setup.fees",
            Self::Grading => "setup.grading",
            Self::Lessons => "setup.lessons",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::General => json!({
            "schoolName": "",
            "motto": "",
            "currencySymbol": "\u{20a6}"
        }),
        SetupSection::Fees => json!({
            "allowPartialPayments": true,
            "receiptPrefix": "RCT",
            "defaultPurposes": ["tuition", "exam", "pta"]
        }),
        SetupSection::Grading => json!({
            "showPositions": true,
            "honourRollMin": 70.0
        }),
        SetupSection::Lessons => json!({
            "requireReview": true,
            "weeksPerTerm": 13
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let n = v.as_f64().ok_or_else(|| format!("{} must be a number", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be between {} and {}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_purpose_list(v: &Value, key: &str) -> Result<Value, String> {
    let arr = v
        .as_array()
        .ok_or_else(|| format!("{} must be an array", key))?;
    let mut out: Vec<Value> = Vec::new();
    for item in arr {
        let raw = item
            .as_str()
            .ok_or_else(|| format!("{} entries must be strings", key))?;
        let purpose = FeePurpose::parse(raw)
            .ok_or_else(|| format!("unknown purpose in {}: {}", key, raw))?;
        let canon = Value::String(purpose.as_str().to_string());
        if !out.contains(&canon) {
            out.push(canon);
        }
    }
    Ok(Value::Array(out))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::General => match k.as_str() {
                "schoolName" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 120)?));
                }
                "motto" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 200)?));
                }
                "currencySymbol" => {
                    let s = parse_string_max(v, k, 8)?;
                    if s.is_empty() {
                        return Err("currencySymbol must not be empty".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown general field: {}", k)),
            },
            SetupSection::Fees => match k.as_str() {
                "allowPartialPayments" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "receiptPrefix" => {
                    let s = parse_string_max(v, k, 16)?;
                    obj.insert(k.clone(), Value::String(s.to_ascii_uppercase()));
                }
                "defaultPurposes" => {
                    obj.insert(k.clone(), parse_purpose_list(v, k)?);
                }
                _ => return Err(format!("unknown fees field: {}", k)),
            },
            SetupSection::Grading => match k.as_str() {
                "showPositions" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "honourRollMin" => {
                    obj.insert(k.clone(), Value::from(parse_f64_range(v, k, 0.0, 100.0)?));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
            SetupSection::Lessons => match k.as_str() {
                "requireReview" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "weeksPerTerm" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 20)?));
                }
                _ => return Err(format!("unknown lessons field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values should not block setup UI.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

pub(crate) fn bool_field(
    conn: &rusqlite::Connection,
    section: SetupSection,
    key: &str,
    default: bool,
) -> bool {
    load_section(conn, section)
        .ok()
        .and_then(|v| v.get(key).and_then(|f| f.as_bool()))
        .unwrap_or(default)
}

pub(crate) fn i64_field(
    conn: &rusqlite::Connection,
    section: SetupSection,
    key: &str,
    default: i64,
) -> i64 {
    load_section(conn, section)
        .ok()
        .and_then(|v| v.get(key).and_then(|f| f.as_i64()))
        .unwrap_or(default)
}

pub(crate) fn f64_field(
    conn: &rusqlite::Connection,
    section: SetupSection,
    key: &str,
    default: f64,
) -> f64 {
    load_section(conn, section)
        .ok()
        .and_then(|v| v.get(key).and_then(|f| f.as_f64()))
        .unwrap_or(default)
}

pub(crate) fn str_field(
    conn: &rusqlite::Connection,
    section: SetupSection,
    key: &str,
    default: &str,
) -> String {
    load_section(conn, section)
        .ok()
        .and_then(|v| v.get(key).and_then(|f| f.as_str().map(|s| s.to_string())))
        .unwrap_or_else(|| default.to_string())
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let general = match load_section(conn, SetupSection::General) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let fees = match load_section(conn, SetupSection::Fees) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let grading = match load_section(conn, SetupSection::Grading) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let lessons = match load_section(conn, SetupSection::Lessons) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "general": general,
            "fees": fees,
            "grading": grading,
            "lessons": lessons
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
