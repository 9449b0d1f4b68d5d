use crate::family;
use crate::ipc::handlers::setup::{family_clock, points_label};
use crate::ipc::helpers::{
    get_required_str, month_param, respond, store_mut, to_json, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

fn points_summary(state: &mut AppState, params: &Value) -> HandlerResult {
    let kid_id = get_required_str(params, "kidId")?;
    let store = store_mut(state)?;
    let clock = family_clock(store)?;
    let month = month_param(params, &clock)?;
    let kid = family::find_kid(store, &kid_id)?;
    let monthly = family::monthly_total(store, &kid.id, &month)?;
    let lifetime = family::lifetime_total(store, &kid.id)?;
    Ok(json!({
        "kid": to_json(&kid)?,
        "month": month,
        "monthly": monthly,
        "lifetime": lifetime,
        "pointsLabel": points_label(store)?
    }))
}

fn points_ranking(state: &mut AppState, params: &Value) -> HandlerResult {
    let store = store_mut(state)?;
    let clock = family_clock(store)?;
    let month = month_param(params, &clock)?;
    let rows = family::ranking(store, &month)?;
    Ok(json!({
        "month": month,
        "ranking": to_json(&rows)?,
        "pointsLabel": points_label(store)?
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "points.summary" => Some(respond(req, points_summary(state, &req.params))),
        "points.ranking" => Some(respond(req, points_ranking(state, &req.params))),
        _ => None,
    }
}
