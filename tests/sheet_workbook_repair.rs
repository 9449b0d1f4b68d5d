use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_pointsd");
    let mut child = Command::new(exe)
        .env_remove("POINTSD_WORKSPACE")
        .env_remove("POINTSD_BACKEND")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn pointsd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn write_tab(workspace: &Path, tab: &str, rows: serde_json::Value) {
    let dir = workspace.join("sheets");
    std::fs::create_dir_all(&dir).expect("create sheets dir");
    std::fs::write(
        dir.join(format!("{}.json", tab)),
        serde_json::to_string_pretty(&json!({ "rows": rows })).expect("encode tab"),
    )
    .expect("write tab");
}

fn read_tab(workspace: &Path, tab: &str) -> Vec<Vec<String>> {
    let raw = std::fs::read_to_string(workspace.join("sheets").join(format!("{}.json", tab)))
        .expect("read tab");
    let v: serde_json::Value = serde_json::from_str(&raw).expect("parse tab");
    serde_json::from_value(v["rows"].clone()).expect("rows")
}

#[test]
fn hand_edited_workbook_is_repaired_and_read() {
    let workspace = temp_dir("pointsd-sheet-repair");

    // A workbook someone typed by hand: stale header names, loose booleans,
    // full-width commas, a blank row, and a duplicated check-in row.
    write_tab(
        &workspace,
        "kids",
        json!([
            ["ID", "Name", "Grade", "Active"],
            ["k1", "そうた", "年中", "yes"],
            ["", "", "", ""],
            ["k2", "みお", "小1", "1"],
            ["k3", "ゆい", "小2", ""]
        ]),
    );
    write_tab(
        &workspace,
        "goals",
        json!([
            ["id", "title", "points", "active", "kid_id"],
            ["g1", "ランニング10分", "3", "TRUE", "all"],
            ["g2", "音読", "4", "true", "k2，k3"],
            ["g3", "片付け", "abc", "TRUE", ""]
        ]),
    );
    write_tab(
        &workspace,
        "checkins",
        json!([
            ["date", "kid_id", "kid_name", "goal_id", "goal_title", "points",
             "child_checked", "parent_approved", "updated_at"],
            ["2024-05-01", "k1", "そうた", "g1", "ランニング10分", "3", "TRUE", "TRUE", ""],
            ["2024-05-01", "k1", "そうた", "g1", "ランニング10分", "3", "TRUE", "TRUE", ""],
            ["2024-05-02", "k2", "みお", "g2", "音読", "4", "TRUE", "FALSE", ""]
        ]),
    );

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (i, r) = (&mut stdin, &mut reader);

    let sel = request_ok(
        i,
        r,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy(), "backend": "sheet" }),
    );
    assert_eq!(sel["seeded"], json!(false));

    let kids_header = &read_tab(&workspace, "kids")[0];
    assert_eq!(kids_header, &vec!["id", "name", "grade", "active"]);
    let goals_header = &read_tab(&workspace, "goals")[0];
    assert_eq!(goals_header.len(), 7);
    assert_eq!(goals_header[6], "category");

    let kids = request_ok(i, r, "2", "kids.list", json!({}));
    let ids: Vec<&str> = kids["kids"]
        .as_array()
        .expect("kids")
        .iter()
        .filter_map(|k| k["id"].as_str())
        .collect();
    // Blank "active" reads as inactive.
    assert_eq!(ids, vec!["k1", "k2"]);

    let goals = request_ok(i, r, "3", "goals.list", json!({}));
    let goals = goals["goals"].as_array().expect("goals").clone();
    assert_eq!(goals[1]["kidIds"], json!(["k2", "k3"]));
    assert_eq!(goals[1]["audience"], json!("both"));
    assert_eq!(goals[2]["points"], json!(0));

    // The duplicated row counts once.
    let summary = request_ok(
        i,
        r,
        "4",
        "points.summary",
        json!({ "kidId": "k1", "month": "2024-05" }),
    );
    assert_eq!(summary["monthly"], json!(3));
    assert_eq!(summary["lifetime"], json!(3));

    let pending = request_ok(i, r, "5", "checkins.pending", json!({}));
    let pending = pending["pending"].as_array().expect("pending").clone();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["kidId"], json!("k2"));

    // Approval patches the existing row instead of appending.
    request_ok(
        i,
        r,
        "6",
        "checkins.setApproval",
        json!({ "kidId": "k2", "goalId": "g2", "date": "2024-05-02", "approved": true }),
    );
    let rows = read_tab(&workspace, "checkins");
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[3][7], "TRUE");
    assert!(!rows[3][8].is_empty(), "updated_at is stamped");

    let summary = request_ok(
        i,
        r,
        "7",
        "points.summary",
        json!({ "kidId": "k2", "month": "2024-05" }),
    );
    assert_eq!(summary["monthly"], json!(4));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn corrupt_tab_reports_store_failure() {
    let workspace = temp_dir("pointsd-sheet-corrupt");
    let dir = workspace.join("sheets");
    std::fs::create_dir_all(&dir).expect("create sheets dir");
    std::fs::write(dir.join("kids.json"), "{ not a grid").expect("write junk");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy(), "backend": "sheet" }),
    );
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("db_open_failed"));

    let health = request(&mut stdin, &mut reader, "2", "health", json!({}));
    assert_eq!(health["result"]["workspacePath"], json!(null));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
