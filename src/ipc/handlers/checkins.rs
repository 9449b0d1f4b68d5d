use crate::family;
use crate::ipc::handlers::setup::family_clock;
use crate::ipc::helpers::{
    date_param, get_opt_str, get_required_bool, get_required_str, require_parent, respond,
    store_mut, to_json, viewer_param, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{parse_date, CheckinFilter};
use serde_json::{json, Value};

fn opt_date(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match get_opt_str(params, key)? {
        Some(raw) => parse_date(&raw)
            .map(|d| Some(d.format("%Y-%m-%d").to_string()))
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key))),
        None => Ok(None),
    }
}

fn checkins_day(state: &mut AppState, params: &Value) -> HandlerResult {
    let kid_id = get_required_str(params, "kidId")?;
    let viewer = viewer_param(params)?;
    let store = store_mut(state)?;
    let clock = family_clock(store)?;
    let date = date_param(params, &clock)?;
    let kid = family::find_kid(store, &kid_id)?;
    let items = family::day_board(store, &kid.id, &date, viewer)?;
    Ok(json!({
        "date": date,
        "viewer": viewer.as_str(),
        "kid": to_json(&kid)?,
        "items": to_json(&items)?
    }))
}

fn checkins_list(state: &mut AppState, params: &Value) -> HandlerResult {
    let filter = CheckinFilter {
        kid_id: get_opt_str(params, "kidId")?,
        from: opt_date(params, "from")?,
        to: opt_date(params, "to")?,
        ..Default::default()
    };
    if let (Some(f), Some(t)) = (&filter.from, &filter.to) {
        if f > t {
            return Err(HandlerErr::bad_params("from must not be after to"));
        }
    }
    let store = store_mut(state)?;
    let rows = family::dedupe(store.list_checkins(&filter)?);
    Ok(json!({ "checkins": to_json(&rows)? }))
}

fn checkins_set_self(state: &mut AppState, params: &Value) -> HandlerResult {
    let kid_id = get_required_str(params, "kidId")?;
    let goal_id = get_required_str(params, "goalId")?;
    let checked = get_required_bool(params, "checked")?;
    let store = store_mut(state)?;
    let clock = family_clock(store)?;
    let date = date_param(params, &clock)?;
    let row = family::set_self_check(store, &clock, &kid_id, &goal_id, &date, checked)?;
    Ok(json!({ "checkin": to_json(&row)? }))
}

fn checkins_set_approval(state: &mut AppState, params: &Value) -> HandlerResult {
    require_parent(state)?;
    let kid_id = get_required_str(params, "kidId")?;
    let goal_id = get_required_str(params, "goalId")?;
    let approved = get_required_bool(params, "approved")?;
    let store = store_mut(state)?;
    let clock = family_clock(store)?;
    let date = date_param(params, &clock)?;
    let row = family::set_approval(store, &clock, &kid_id, &goal_id, &date, approved)?;
    Ok(json!({ "checkin": to_json(&row)? }))
}

fn checkins_toggle_approval(state: &mut AppState, params: &Value) -> HandlerResult {
    require_parent(state)?;
    let kid_id = get_required_str(params, "kidId")?;
    let goal_id = get_required_str(params, "goalId")?;
    let store = store_mut(state)?;
    let clock = family_clock(store)?;
    let date = date_param(params, &clock)?;
    let row = family::toggle_approval(store, &clock, &kid_id, &goal_id, &date)?;
    Ok(json!({ "checkin": to_json(&row)? }))
}

fn checkins_pending(state: &mut AppState, params: &Value) -> HandlerResult {
    let kid_id = get_opt_str(params, "kidId")?;
    let store = store_mut(state)?;
    let rows = family::pending_approvals(store, kid_id.as_deref())?;
    Ok(json!({ "pending": to_json(&rows)? }))
}

fn checkins_ensure_day(state: &mut AppState, params: &Value) -> HandlerResult {
    require_parent(state)?;
    let store = store_mut(state)?;
    let clock = family_clock(store)?;
    let date = date_param(params, &clock)?;
    let created = family::ensure_day(store, &clock, &date)?;
    Ok(json!({ "date": date, "created": created }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "checkins.day" => Some(respond(req, checkins_day(state, &req.params))),
        "checkins.list" => Some(respond(req, checkins_list(state, &req.params))),
        "checkins.setSelf" => Some(respond(req, checkins_set_self(state, &req.params))),
        "checkins.setApproval" => Some(respond(req, checkins_set_approval(state, &req.params))),
        "checkins.toggleApproval" => {
            Some(respond(req, checkins_toggle_approval(state, &req.params)))
        }
        "checkins.pending" => Some(respond(req, checkins_pending(state, &req.params))),
        "checkins.ensureDay" => Some(respond(req, checkins_ensure_day(state, &req.params))),
        _ => None,
    }
}
