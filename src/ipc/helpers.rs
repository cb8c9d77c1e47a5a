use crate::ipc::error::HandlerErr;
use crate::ipc::types::AppState;
use crate::query::scope::{Caller, Role};
use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde_json::json;

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    match get_opt_str(params, key) {
        Some(v) => Ok(v),
        None => Err(HandlerErr::new("bad_params", format!("missing {key}"))),
    }
}

/// Trimmed string value; blank counts as missing.
pub fn get_opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_opt_i64(params: &serde_json::Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::new("bad_params", format!("{key} must be an integer"))),
    }
}

const DATETIME_INPUTS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

pub fn get_required_datetime(
    params: &serde_json::Value,
    key: &str,
) -> Result<NaiveDateTime, HandlerErr> {
    get_opt_datetime(params, key)?
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {key}")))
}

pub fn get_opt_datetime(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<NaiveDateTime>, HandlerErr> {
    let Some(raw) = get_opt_str(params, key) else {
        return Ok(None);
    };
    DATETIME_INPUTS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(&raw, f).ok())
        .map(Some)
        .ok_or_else(|| {
            HandlerErr::new("bad_params", format!("{key} must be YYYY-MM-DDTHH:MM[:SS]"))
                .with_details(json!({ "value": raw }))
        })
}

/// The verified session forwarded by the renderer. A missing session or
/// user id is rejected; an unknown role is passed on as `None` and reported
/// where it narrows a listing.
pub fn caller_from_params(params: &serde_json::Value) -> Result<Caller, HandlerErr> {
    let Some(session) = params.get("session").filter(|v| v.is_object()) else {
        return Err(HandlerErr::new("unauthenticated", "missing session"));
    };
    let Some(user_id) = get_opt_str(session, "userId") else {
        return Err(HandlerErr::new("unauthenticated", "session has no userId"));
    };
    let role = session
        .get("role")
        .and_then(|v| v.as_str())
        .and_then(Role::parse);
    Ok(Caller::new(role, user_id))
}

pub fn require_admin(params: &serde_json::Value) -> Result<Caller, HandlerErr> {
    let caller = caller_from_params(params)?;
    if !caller.is_admin() {
        return Err(HandlerErr::new("forbidden", "admin role required"));
    }
    Ok(caller)
}
