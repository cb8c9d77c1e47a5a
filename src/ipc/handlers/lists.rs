use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{caller_from_params, require_db};
use crate::ipc::types::{AppState, Request};
use crate::query::params::QueryParams;
use crate::query::schema::Entity;
use crate::query::resolve_list;
use crate::render::render_listing;

/// `<entity>.list`: `{ session, query }` where `query` holds the page's URL
/// parameters, as an object or as ordered `[key, value]` pairs.
fn handle_list(state: &AppState, entity: Entity, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let caller = caller_from_params(&req.params)?;
    let conn = require_db(state)?;
    let raw = req
        .params
        .get("query")
        .map(QueryParams::from_json)
        .unwrap_or_default();
    let listing = resolve_list(conn, entity, &caller, &raw, state.page_size)?;
    Ok(render_listing(entity, caller.role, &listing))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let (ns, verb) = req.method.split_once('.')?;
    if verb != "list" {
        return None;
    }
    let entity = Entity::from_plural(ns)?;
    Some(respond(&req.id, handle_list(state, entity, req)))
}
