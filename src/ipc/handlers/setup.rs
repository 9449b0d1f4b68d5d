use crate::clock::{Clock, DEFAULT_UTC_OFFSET_MINUTES};
use crate::ipc::helpers::{get_required_str, require_parent, respond, store_mut, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::retry::RetryPolicy;
use crate::store::{PointsStore, StoreError, StoreResult};
use serde_json::{json, Map, Value};
use std::time::Duration;

#[derive(Clone, Copy)]
enum SetupSection {
    Family,
    Sheet,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "family" => Some(Self::Family),
            "sheet" => Some(Self::Sheet),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Family => "setup.family",
            Self::Sheet => "setup.sheet",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Family => json!({
            "utcOffsetMinutes": DEFAULT_UTC_OFFSET_MINUTES,
            "pointsLabel": "点"
        }),
        SetupSection::Sheet => json!({
            "retryAttempts": 3,
            "retryBaseDelayMs": 200,
            "cacheTtlSeconds": 30
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.chars().count() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Family => match k.as_str() {
                // UTC-14:00 ..= UTC+14:00
                "utcOffsetMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, -840, 840)?));
                }
                "pointsLabel" => {
                    let s = parse_string_max(v, k, 8)?;
                    if s.is_empty() {
                        return Err("pointsLabel must not be empty".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown family field: {}", k)),
            },
            SetupSection::Sheet => match k.as_str() {
                "retryAttempts" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 10)?));
                }
                "retryBaseDelayMs" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 5000)?));
                }
                "cacheTtlSeconds" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 600)?));
                }
                _ => return Err(format!("unknown sheet field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(store: &mut dyn PointsStore, section: SetupSection) -> StoreResult<Value> {
    let mut current = default_section(section);
    let saved = match store.setting_get(section.key()) {
        Ok(saved) => saved,
        Err(StoreError::Json(e)) => {
            tracing::warn!(key = section.key(), error = %e, "saved setup is not JSON; using defaults");
            None
        }
        Err(e) => return Err(e),
    };
    if let Some(saved) = saved {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: a hand-edited bad value falls back to the default.
            for (k, v) in saved_obj {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                let _ = merge_section_patch(section, &mut current, &single);
            }
        }
    }
    Ok(current)
}

/// Clock for the workspace's configured UTC offset.
pub fn family_clock(store: &mut dyn PointsStore) -> Result<Clock, HandlerErr> {
    let family = load_section(store, SetupSection::Family)?;
    let offset = family
        .get("utcOffsetMinutes")
        .and_then(|v| v.as_i64())
        .unwrap_or(DEFAULT_UTC_OFFSET_MINUTES);
    Ok(Clock::new(offset))
}

pub fn points_label(store: &mut dyn PointsStore) -> Result<String, HandlerErr> {
    let family = load_section(store, SetupSection::Family)?;
    Ok(family
        .get("pointsLabel")
        .and_then(|v| v.as_str())
        .unwrap_or("点")
        .to_string())
}

pub fn apply_sheet_tuning(store: &mut dyn PointsStore) -> StoreResult<()> {
    let sheet = load_section(store, SetupSection::Sheet)?;
    let get = |k: &str, d: u64| sheet.get(k).and_then(|v| v.as_u64()).unwrap_or(d);
    let policy = RetryPolicy {
        attempts: get("retryAttempts", 3) as u32,
        base_delay: Duration::from_millis(get("retryBaseDelayMs", 200)),
    };
    let ttl = Duration::from_secs(get("cacheTtlSeconds", 30));
    store.tune(policy, ttl);
    Ok(())
}

fn setup_get(state: &mut AppState) -> HandlerResult {
    let store = store_mut(state)?;
    let family = load_section(store, SetupSection::Family)?;
    let sheet = load_section(store, SetupSection::Sheet)?;
    Ok(json!({
        "backend": store.backend().as_str(),
        "family": family,
        "sheet": sheet
    }))
}

fn setup_update(state: &mut AppState, params: &Value) -> HandlerResult {
    require_parent(state)?;
    let section_raw = get_required_str(params, "section")?;
    let Some(section) = SetupSection::parse(&section_raw) else {
        return Err(HandlerErr::bad_params("unknown section"));
    };
    let Some(patch_obj) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let store = store_mut(state)?;
    let mut current = load_section(store, section)?;
    merge_section_patch(section, &mut current, patch_obj).map_err(HandlerErr::bad_params)?;
    store.setting_set(section.key(), &current)?;
    if matches!(section, SetupSection::Sheet) {
        apply_sheet_tuning(store)?;
    }
    tracing::info!(section = section.key(), "setup updated");
    Ok(json!({ "ok": true, "section": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(respond(req, setup_get(state))),
        "setup.update" => Some(respond(req, setup_update(state, &req.params))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn patch_validates_ranges_and_unknown_fields() {
        let mut current = default_section(SetupSection::Family);
        let mut patch = Map::new();
        patch.insert("utcOffsetMinutes".into(), json!(-300));
        merge_section_patch(SetupSection::Family, &mut current, &patch).expect("valid");
        assert_eq!(current["utcOffsetMinutes"], json!(-300));

        let mut bad = Map::new();
        bad.insert("utcOffsetMinutes".into(), json!(900));
        assert!(merge_section_patch(SetupSection::Family, &mut current, &bad).is_err());

        let mut unknown = Map::new();
        unknown.insert("color".into(), json!("red"));
        assert!(merge_section_patch(SetupSection::Sheet, &mut current, &unknown).is_err());
    }

    #[test]
    fn bad_saved_values_fall_back_per_field() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = crate::db::SqliteStore::open(dir.path()).expect("open");
        store
            .setting_set(
                "setup.sheet",
                &json!({ "retryAttempts": 99, "cacheTtlSeconds": 5 }),
            )
            .expect("save");
        let sheet = load_section(&mut store, SetupSection::Sheet).expect("load");
        assert_eq!(sheet["retryAttempts"], json!(3));
        assert_eq!(sheet["cacheTtlSeconds"], json!(5));
    }

    #[test]
    fn non_json_family_cell_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sheets = dir.path().join(crate::sheet::SHEETS_DIR);
        std::fs::create_dir_all(&sheets).expect("mkdir");
        std::fs::write(
            sheets.join("settings.json"),
            json!({ "rows": [["key", "value"], ["setup.family", "utcOffsetMinutes: 540"]] })
                .to_string(),
        )
        .expect("write");
        let mut store = crate::sheet::SheetStore::open_with(
            dir.path(),
            RetryPolicy::default(),
            Duration::ZERO,
        )
        .expect("open");

        // 20:00 UTC is already the next day at +09:00.
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 20, 0, 0).single().expect("valid");
        let clock = family_clock(&mut store).expect("clock").at(now);
        assert_eq!(clock.today_iso(), "2024-05-11");
        assert_eq!(points_label(&mut store).expect("label"), "点");

        // Saving a patch replaces the unreadable cell.
        let mut current = load_section(&mut store, SetupSection::Family).expect("load");
        let mut patch = Map::new();
        patch.insert("utcOffsetMinutes".into(), json!(60));
        merge_section_patch(SetupSection::Family, &mut current, &patch).expect("patch");
        store.setting_set("setup.family", &current).expect("save");
        let clock = family_clock(&mut store).expect("clock").at(now);
        assert_eq!(clock.today_iso(), "2024-05-10");
    }
}
