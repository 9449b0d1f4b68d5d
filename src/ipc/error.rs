use serde_json::json;

/// Success envelope echoing the request id.
pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({ "id": id, "ok": true, "result": result })
}

/// Failure envelope. `details` is attached only when present.
pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut resp = json!({
        "id": id,
        "ok": false,
        "error": { "code": code, "message": message.into() },
    });
    if let Some(d) = details {
        resp["error"]["details"] = d;
    }
    resp
}

/// Reply to a line that did not parse as a request; there is no id to echo.
pub fn bad_json(message: impl Into<String>) -> serde_json::Value {
    json!({
        "ok": false,
        "error": { "code": "bad_json", "message": message.into() },
    })
}

pub fn not_implemented(id: &str, method: &str) -> serde_json::Value {
    err(id, "not_implemented", format!("unknown method: {}", method), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_sit_inside_the_error_object() {
        let plain = err("7", "locked", "parent passcode required", None);
        assert!(plain["error"].get("details").is_none());

        let detailed = err("8", "io_failed", "denied", Some(json!({ "path": "/x" })));
        assert_eq!(detailed["id"], json!("8"));
        assert_eq!(detailed["error"]["details"]["path"], json!("/x"));
    }

    #[test]
    fn bad_json_has_no_id() {
        let resp = bad_json("expected value");
        assert!(resp.get("id").is_none());
        assert_eq!(resp["error"]["code"], json!("bad_json"));
    }
}
