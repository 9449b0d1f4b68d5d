use crate::family::{self, NewKid};
use crate::ipc::helpers::{
    get_opt_bool, get_opt_str, get_required_bool, get_required_str, require_parent, respond,
    store_mut, to_json, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn kids_list(state: &mut AppState, params: &serde_json::Value) -> HandlerResult {
    let include_inactive = get_opt_bool(params, "includeInactive", false)?;
    let store = store_mut(state)?;
    let kids = family::list_kids(store, include_inactive)?;
    Ok(json!({ "kids": to_json(&kids)? }))
}

fn kids_create(state: &mut AppState, params: &serde_json::Value) -> HandlerResult {
    require_parent(state)?;
    let new = NewKid {
        id: get_opt_str(params, "id")?,
        name: get_required_str(params, "name")?,
        grade: get_opt_str(params, "grade")?.unwrap_or_default(),
    };
    let store = store_mut(state)?;
    let kid = family::create_kid(store, new)?;
    Ok(json!({ "kidId": kid.id, "kid": to_json(&kid)? }))
}

fn kids_set_active(state: &mut AppState, params: &serde_json::Value) -> HandlerResult {
    require_parent(state)?;
    let kid_id = get_required_str(params, "kidId")?;
    let active = get_required_bool(params, "active")?;
    let store = store_mut(state)?;
    let kid = family::set_kid_active(store, &kid_id, active)?;
    Ok(json!({ "kid": to_json(&kid)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "kids.list" => Some(respond(req, kids_list(state, &req.params))),
        "kids.create" => Some(respond(req, kids_create(state, &req.params))),
        "kids.setActive" => Some(respond(req, kids_set_active(state, &req.params))),
        _ => None,
    }
}
