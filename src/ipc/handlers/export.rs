use crate::family;
use crate::ipc::helpers::{
    get_opt_str, get_required_str, require_parent, respond, store_mut, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{parse_month, CheckinFilter};
use serde_json::{json, Value};
use std::path::PathBuf;

fn write_text_file(path: &str, contents: &str) -> Result<(), HandlerErr> {
    let out = PathBuf::from(path);
    let io_err = |e: std::io::Error| HandlerErr {
        code: "io_failed",
        message: e.to_string(),
        details: Some(json!({ "path": path })),
    };
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(&out, contents).map_err(io_err)?;
    Ok(())
}

fn export_checkins_csv(state: &mut AppState, params: &Value) -> HandlerResult {
    require_parent(state)?;
    let out_path = get_required_str(params, "outPath")?;
    let month = match get_opt_str(params, "month")? {
        Some(raw) => Some(
            parse_month(&raw).ok_or_else(|| HandlerErr::bad_params("month must be YYYY-MM"))?,
        ),
        None => None,
    };
    let filter = CheckinFilter {
        kid_id: get_opt_str(params, "kidId")?,
        month,
        ..Default::default()
    };

    let store = store_mut(state)?;
    let (rows, csv) = family::export_checkins_csv(store, &filter)?;
    write_text_file(&out_path, &csv)?;
    tracing::info!(path = %out_path, rows, "checkins exported");
    Ok(json!({ "ok": true, "rowsExported": rows, "path": out_path }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "export.checkinsCsv" => Some(respond(req, export_checkins_csv(state, &req.params))),
        _ => None,
    }
}
