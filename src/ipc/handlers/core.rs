use crate::db::SqliteStore;
use crate::family;
use crate::ipc::handlers::setup::apply_sheet_tuning;
use crate::ipc::helpers::{get_opt_bool, get_opt_str, respond, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::sheet::SheetStore;
use crate::store::{Backend, PointsStore};
use serde_json::json;
use std::path::{Path, PathBuf};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(
        req,
        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "backend": state.store.as_ref().map(|s| s.backend().as_str())
        })),
    )
}

/// Opens (creating if needed) the workspace at `path` with the given backend
/// and makes it current.
pub fn open_workspace(
    state: &mut AppState,
    path: &Path,
    backend: Backend,
    seed: bool,
) -> anyhow::Result<bool> {
    let mut store: Box<dyn PointsStore> = match backend {
        Backend::Sqlite => Box::new(SqliteStore::open(path)?),
        Backend::Sheet => Box::new(SheetStore::open(path)?),
    };
    apply_sheet_tuning(store.as_mut())?;
    let seeded = if seed {
        family::seed_if_empty(store.as_mut())?
    } else {
        false
    };
    tracing::info!(
        workspace = %path.display(),
        backend = backend.as_str(),
        "workspace opened"
    );
    state.workspace = Some(path.to_path_buf());
    state.store = Some(store);
    state.parent_unlocked = false;
    Ok(seeded)
}

fn workspace_select(state: &mut AppState, params: &serde_json::Value) -> HandlerResult {
    let Some(path) = get_opt_str(params, "path")?.map(PathBuf::from) else {
        return Err(HandlerErr::bad_params("missing params.path"));
    };
    let backend = match get_opt_str(params, "backend")? {
        Some(raw) => Backend::parse(&raw)
            .ok_or_else(|| HandlerErr::bad_params("backend must be sqlite or sheet"))?,
        None => Backend::Sqlite,
    };
    let seed = get_opt_bool(params, "seed", true)?;

    match open_workspace(state, &path, backend, seed) {
        Ok(seeded) => Ok(json!({
            "workspacePath": path.to_string_lossy(),
            "backend": backend.as_str(),
            "seeded": seeded
        })),
        Err(e) => {
            tracing::error!(workspace = %path.display(), error = ?e, "workspace open failed");
            Err(HandlerErr::new("db_open_failed", format!("{e:?}")))
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(respond(req, workspace_select(state, &req.params))),
        _ => None,
    }
}
