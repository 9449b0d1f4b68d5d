use crate::family::{self, GoalPatch, NewGoal};
use crate::ipc::helpers::{
    get_opt_bool, get_opt_str, get_required_bool, get_required_str, require_parent, respond,
    store_mut, to_json, viewer_param, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{parse_kid_ids, Audience};
use serde_json::{json, Value};

/// `kidIds` may be an array of ids or the comma-separated cell text.
fn parse_kid_ids_param(v: &Value) -> Result<Vec<String>, HandlerErr> {
    if v.is_null() {
        return Ok(Vec::new());
    }
    if let Some(s) = v.as_str() {
        return Ok(parse_kid_ids(s));
    }
    let Some(arr) = v.as_array() else {
        return Err(HandlerErr::bad_params("kidIds must be an array or string"));
    };
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let Some(s) = item.as_str() else {
            return Err(HandlerErr::bad_params("kidIds entries must be strings"));
        };
        out.extend(parse_kid_ids(s));
    }
    Ok(out)
}

fn parse_audience_param(raw: &str) -> Result<Audience, HandlerErr> {
    match Audience::parse(raw) {
        Audience::Other(_) => Err(HandlerErr::bad_params(
            "audience must be one of: both, child, parent",
        )),
        a => Ok(a),
    }
}

fn parse_points_param(v: &Value) -> Result<i64, HandlerErr> {
    v.as_i64()
        .ok_or_else(|| HandlerErr::bad_params("points must be integer"))
}

fn goals_list(state: &mut AppState, params: &Value) -> HandlerResult {
    let include_inactive = get_opt_bool(params, "includeInactive", false)?;
    let store = store_mut(state)?;
    let goals = family::list_goals(store, include_inactive)?;
    Ok(json!({ "goals": to_json(&goals)? }))
}

fn goals_create(state: &mut AppState, params: &Value) -> HandlerResult {
    require_parent(state)?;
    let Some(points_v) = params.get("points") else {
        return Err(HandlerErr::bad_params("missing points"));
    };
    let new = NewGoal {
        id: get_opt_str(params, "id")?,
        title: get_required_str(params, "title")?,
        points: parse_points_param(points_v)?,
        kid_ids: match params.get("kidIds") {
            Some(v) => parse_kid_ids_param(v)?,
            None => Vec::new(),
        },
        audience: match get_opt_str(params, "audience")? {
            Some(raw) => parse_audience_param(&raw)?,
            None => Audience::Both,
        },
        category: get_opt_str(params, "category")?,
    };
    let store = store_mut(state)?;
    let goal = family::create_goal(store, new)?;
    Ok(json!({ "goalId": goal.id, "goal": to_json(&goal)? }))
}

fn goals_update(state: &mut AppState, params: &Value) -> HandlerResult {
    require_parent(state)?;
    let goal_id = get_required_str(params, "goalId")?;
    let Some(patch_obj) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let mut patch = GoalPatch::default();
    for (k, v) in patch_obj {
        match k.as_str() {
            "title" => {
                let s = v
                    .as_str()
                    .ok_or_else(|| HandlerErr::bad_params("title must be string"))?;
                patch.title = Some(s.to_string());
            }
            "points" => patch.points = Some(parse_points_param(v)?),
            "kidIds" => patch.kid_ids = Some(parse_kid_ids_param(v)?),
            "audience" => {
                let s = v
                    .as_str()
                    .ok_or_else(|| HandlerErr::bad_params("audience must be string"))?;
                patch.audience = Some(parse_audience_param(s)?);
            }
            "category" => {
                if v.is_null() {
                    patch.category = Some(None);
                } else {
                    let s = v
                        .as_str()
                        .ok_or_else(|| HandlerErr::bad_params("category must be string or null"))?;
                    patch.category = Some(Some(s.to_string()));
                }
            }
            "active" => {
                patch.active = Some(
                    v.as_bool()
                        .ok_or_else(|| HandlerErr::bad_params("active must be boolean"))?,
                );
            }
            _ => return Err(HandlerErr::bad_params(format!("unknown goal field: {}", k))),
        }
    }

    let store = store_mut(state)?;
    let goal = family::update_goal(store, &goal_id, patch)?;
    Ok(json!({ "goal": to_json(&goal)? }))
}

fn goals_set_active(state: &mut AppState, params: &Value) -> HandlerResult {
    require_parent(state)?;
    let goal_id = get_required_str(params, "goalId")?;
    let active = get_required_bool(params, "active")?;
    let store = store_mut(state)?;
    let goal = family::set_goal_active(store, &goal_id, active)?;
    Ok(json!({ "goal": to_json(&goal)? }))
}

fn goals_for_kid(state: &mut AppState, params: &Value) -> HandlerResult {
    let kid_id = get_required_str(params, "kidId")?;
    let viewer = viewer_param(params)?;
    let store = store_mut(state)?;
    let goals = family::goals_for(store, &kid_id, viewer)?;
    Ok(json!({ "viewer": viewer.as_str(), "goals": to_json(&goals)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "goals.list" => Some(respond(req, goals_list(state, &req.params))),
        "goals.create" => Some(respond(req, goals_create(state, &req.params))),
        "goals.update" => Some(respond(req, goals_update(state, &req.params))),
        "goals.setActive" => Some(respond(req, goals_set_active(state, &req.params))),
        "goals.forKid" => Some(respond(req, goals_for_kid(state, &req.params))),
        _ => None,
    }
}
