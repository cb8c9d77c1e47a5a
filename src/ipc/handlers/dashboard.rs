use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{require_admin, require_db};
use crate::ipc::types::{AppState, Request};
use crate::query::rows::Sex;
use serde_json::json;

/// Student head count split by sex, for the admin dashboard chart.
fn handle_student_counts(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&req.params)?;
    let conn = require_db(state)?;
    let mut stmt = conn
        .prepare("SELECT sex, COUNT(*) FROM students GROUP BY sex")
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let groups = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let mut boys = 0;
    let mut girls = 0;
    for (sex, n) in groups {
        match Sex::parse(&sex) {
            Some(Sex::Male) => boys += n,
            Some(Sex::Female) => girls += n,
            None => {}
        }
    }
    Ok(json!({ "boys": boys, "girls": girls, "total": boys + girls }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.studentCounts" => Some(respond(&req.id, handle_student_counts(state, req))),
        _ => None,
    }
}
