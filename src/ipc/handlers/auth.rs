use crate::auth;
use crate::ipc::helpers::{get_required_str, respond, store_mut, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

fn auth_status(state: &mut AppState) -> HandlerResult {
    let unlocked = state.parent_unlocked;
    let store = store_mut(state)?;
    let passcode_set = auth::passcode_set(store)?;
    Ok(json!({
        "passcodeSet": passcode_set,
        // With no passcode every session acts as a parent.
        "unlocked": unlocked || !passcode_set
    }))
}

fn auth_set_passcode(state: &mut AppState, params: &Value) -> HandlerResult {
    let passcode = match params.get("passcode") {
        None => return Err(HandlerErr::bad_params("missing passcode")),
        Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => {
            return Err(HandlerErr::bad_params("passcode must not be empty"))
        }
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err(HandlerErr::bad_params("passcode must be string or null")),
    };

    let unlocked = state.parent_unlocked;
    let store = store_mut(state)?;
    if auth::passcode_set(store)? && !unlocked {
        return Err(HandlerErr::new("locked", "unlock before changing the passcode"));
    }
    auth::set_passcode(store, passcode.as_deref())?;
    tracing::info!(set = passcode.is_some(), "parent passcode changed");
    state.parent_unlocked = passcode.is_some();
    Ok(json!({ "passcodeSet": passcode.is_some() }))
}

fn auth_unlock(state: &mut AppState, params: &Value) -> HandlerResult {
    let passcode = get_required_str(params, "passcode")?;
    let store = store_mut(state)?;
    if !auth::verify(store, &passcode)? {
        tracing::warn!("parent unlock rejected");
        return Err(HandlerErr::new("bad_passcode", "passcode does not match"));
    }
    state.parent_unlocked = true;
    Ok(json!({ "unlocked": true }))
}

fn auth_lock(state: &mut AppState) -> HandlerResult {
    store_mut(state)?;
    state.parent_unlocked = false;
    Ok(json!({ "unlocked": false }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.status" => Some(respond(req, auth_status(state))),
        "auth.setPasscode" => Some(respond(req, auth_set_passcode(state, &req.params))),
        "auth.unlock" => Some(respond(req, auth_unlock(state, &req.params))),
        "auth.lock" => Some(respond(req, auth_lock(state))),
        _ => None,
    }
}
