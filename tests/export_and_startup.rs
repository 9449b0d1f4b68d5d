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

fn spawn_sidecar_with(env: &[(&str, &Path)], backend: Option<&str>) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_pointsd");
    let mut cmd = Command::new(exe);
    cmd.env_remove("POINTSD_WORKSPACE")
        .env_remove("POINTSD_BACKEND")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    for (k, v) in env {
        cmd.env(k, v);
    }
    if let Some(b) = backend {
        cmd.env("POINTSD_BACKEND", b);
    }
    let mut child = cmd.spawn().expect("spawn pointsd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    spawn_sidecar_with(&[], None)
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

#[test]
fn export_checkins_csv_filters_and_quotes() {
    let workspace = temp_dir("pointsd-export");
    let out_all = workspace.join("nested").join("all.csv");
    let out_k1_may = workspace.join("k1-may.csv");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (i, r) = (&mut stdin, &mut reader);

    request_ok(
        i,
        r,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        i,
        r,
        "2",
        "goals.create",
        json!({ "id": "g9", "title": "本を読む, 10ページ", "points": 6 }),
    );
    for (n, (kid, goal, date)) in [
        ("k1", "g9", "2024-05-01"),
        ("k1", "g1", "2024-06-01"),
        ("k2", "g1", "2024-05-01"),
    ]
    .into_iter()
    .enumerate()
    {
        request_ok(
            i,
            r,
            &format!("c{}", n),
            "checkins.setSelf",
            json!({ "kidId": kid, "goalId": goal, "date": date, "checked": true }),
        );
    }

    let all = request_ok(
        i,
        r,
        "3",
        "export.checkinsCsv",
        json!({ "outPath": out_all.to_string_lossy() }),
    );
    assert_eq!(all["rowsExported"], json!(3));
    let text = std::fs::read_to_string(&out_all).expect("read csv");
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("date,kid_id,kid_name,goal_id,goal_title,points,child_checked,parent_approved,updated_at")
    );
    let first = lines.next().expect("first row");
    assert!(
        first.starts_with("2024-05-01,k1,そうた,g9,\"本を読む, 10ページ\",6,true,false,"),
        "{}",
        first
    );

    let filtered = request_ok(
        i,
        r,
        "4",
        "export.checkinsCsv",
        json!({ "outPath": out_k1_may.to_string_lossy(), "kidId": "k1", "month": "2024-5" }),
    );
    assert_eq!(filtered["rowsExported"], json!(1));

    let bad = request(
        i,
        r,
        "5",
        "export.checkinsCsv",
        json!({ "outPath": out_k1_may.to_string_lossy(), "month": "May" }),
    );
    assert_eq!(bad["error"]["code"], json!("bad_params"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn workspace_from_environment_opens_at_startup() {
    let workspace = temp_dir("pointsd-env-workspace");
    let (mut child, mut stdin, mut reader) =
        spawn_sidecar_with(&[("POINTSD_WORKSPACE", workspace.as_path())], Some("sheet"));

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(
        health["workspacePath"],
        json!(workspace.to_string_lossy())
    );
    assert_eq!(health["backend"], json!("sheet"));
    assert!(workspace.join("sheets").join("kids.json").exists());

    let kids = request_ok(&mut stdin, &mut reader, "2", "kids.list", json!({}));
    assert_eq!(kids["kids"].as_array().map(|a| a.len()), Some(2));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn bad_backend_in_environment_exits_with_error() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_pointsd"))
        .env_remove("POINTSD_WORKSPACE")
        .env("POINTSD_BACKEND", "excel")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn pointsd");
    drop(child.stdin.take());
    let status = child.wait().expect("wait");
    assert!(!status.success());
}
