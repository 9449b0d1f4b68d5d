use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::not_implemented;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::auth::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::kids::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::goals::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::checkins::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::points::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::setup::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::export::try_handle(state, &req) {
        return resp;
    }

    tracing::debug!(method = %req.method, "unknown method");
    not_implemented(&req.id, &req.method)
}
