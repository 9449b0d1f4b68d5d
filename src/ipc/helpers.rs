use crate::auth;
use crate::clock::Clock;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{parse_date, parse_month, Viewer};
use crate::store::{PointsStore, StoreError};

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<StoreError> for HandlerErr {
    fn from(e: StoreError) -> Self {
        let code = e.code();
        if matches!(code, "store_failed" | "io_failed") {
            tracing::error!(error = %e, "store operation failed");
        }
        Self::new(code, e.to_string())
    }
}

pub type HandlerResult = Result<serde_json::Value, HandlerErr>;

/// Turns a handler body's result into a protocol response.
pub fn respond(req: &Request, result: HandlerResult) -> serde_json::Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn store_mut(state: &mut AppState) -> Result<&mut dyn PointsStore, HandlerErr> {
    match state.store.as_deref_mut() {
        Some(s) => Ok(s),
        None => Err(HandlerErr::new("no_workspace", "select a workspace first")),
    }
}

/// Parent-only operations are open until a passcode is set, then need
/// `auth.unlock` first.
pub fn require_parent(state: &mut AppState) -> Result<(), HandlerErr> {
    let unlocked = state.parent_unlocked;
    let store = store_mut(state)?;
    if !unlocked && auth::passcode_set(store)? {
        return Err(HandlerErr::new("locked", "parent passcode required"));
    }
    Ok(())
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_opt_str(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be string", key))),
    }
}

pub fn get_required_bool(params: &serde_json::Value, key: &str) -> Result<bool, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing boolean {}", key)))
}

pub fn get_opt_bool(params: &serde_json::Value, key: &str, default: bool) -> Result<bool, HandlerErr> {
    match params.get(key) {
        None => Ok(default),
        Some(v) if v.is_null() => Ok(default),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

/// `date` param as `YYYY-MM-DD`, or the family-local today.
pub fn date_param(params: &serde_json::Value, clock: &Clock) -> Result<String, HandlerErr> {
    match get_opt_str(params, "date")? {
        Some(raw) => parse_date(&raw)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .ok_or_else(|| HandlerErr::bad_params("date must be YYYY-MM-DD")),
        None => Ok(clock.today_iso()),
    }
}

/// `month` param as `YYYY-MM`, or the family-local current month.
pub fn month_param(params: &serde_json::Value, clock: &Clock) -> Result<String, HandlerErr> {
    match get_opt_str(params, "month")? {
        Some(raw) => parse_month(&raw).ok_or_else(|| HandlerErr::bad_params("month must be YYYY-MM")),
        None => Ok(clock.this_month()),
    }
}

pub fn viewer_param(params: &serde_json::Value) -> Result<Viewer, HandlerErr> {
    match get_opt_str(params, "viewer")? {
        Some(raw) => Viewer::parse(&raw)
            .ok_or_else(|| HandlerErr::bad_params("viewer must be child or parent")),
        None => Ok(Viewer::Child),
    }
}

pub fn to_json<T: serde::Serialize>(v: &T) -> Result<serde_json::Value, HandlerErr> {
    serde_json::to_value(v).map_err(|e| HandlerErr::new("store_failed", e.to_string()))
}
