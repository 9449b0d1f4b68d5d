use crate::store::{PointsStore, StoreResult};
use serde_json::json;
use sha2::{Digest, Sha256};

const PASSCODE_KEY: &str = "auth.passcode";

pub fn digest(passcode: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(passcode.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn stored_digest(store: &mut dyn PointsStore) -> StoreResult<Option<String>> {
    Ok(store
        .setting_get(PASSCODE_KEY)?
        .and_then(|v| v.get("sha256").and_then(|s| s.as_str()).map(|s| s.to_string()))
        .filter(|s| !s.is_empty()))
}

pub fn passcode_set(store: &mut dyn PointsStore) -> StoreResult<bool> {
    Ok(stored_digest(store)?.is_some())
}

/// `None` clears the passcode and opens parent operations to everyone.
pub fn set_passcode(store: &mut dyn PointsStore, passcode: Option<&str>) -> StoreResult<()> {
    let value = match passcode {
        Some(p) => json!({ "sha256": digest(p) }),
        None => json!({ "sha256": "" }),
    };
    store.setting_set(PASSCODE_KEY, &value)
}

pub fn verify(store: &mut dyn PointsStore, passcode: &str) -> StoreResult<bool> {
    Ok(match stored_digest(store)? {
        Some(d) => d == digest(passcode),
        None => true,
    })
}
