use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
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
    let exe = env!("CARGO_BIN_EXE_campusd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn campusd");
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
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
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
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("campus-router-smoke");
    let bundle_out = workspace.join("smoke-backup.campusbackup.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(&mut stdin, &mut reader, "1", "health", json!({}));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "session.begin",
        json!({ "role": "SUPER_ADMIN" }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "tenants.create",
        json!({ "name": "Smoke Campus" }),
    );
    let tenant_id = created
        .get("tenantId")
        .and_then(|v| v.as_str())
        .expect("tenantId")
        .to_string();

    let _ = request_ok(&mut stdin, &mut reader, "5", "tenants.list", json!({}));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "session.begin",
        json!({ "role": "ADMIN", "tenantId": tenant_id }),
    );
    let created_student = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.create",
        json!({
            "lastName": "Smoke",
            "firstName": "Student",
            "monthlyTuitionFee": 250000,
            "paymentDueDay": 5
        }),
    );
    let student_id = created_student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    let _ = request_ok(&mut stdin, &mut reader, "8", "students.list", json!({}));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "students.update",
        json!({
            "studentId": student_id,
            "patch": { "firstName": "Updated" }
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "payments.generatePeriod",
        json!({ "studentId": student_id, "month": 9, "year": 2025 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "payments.record",
        json!({ "studentId": student_id, "month": 9, "year": 2025, "amount": 100000 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "payments.listForStudent",
        json!({ "studentId": student_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "payments.monthlyOverview",
        json!({ "studentId": student_id, "year": 2025, "today": "2025-09-01" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "payments.bulkTuitionUpdate",
        json!({ "studentIds": [student_id], "newTuitionFee": 300000 }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "15", "settings.get", json!({}));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "settings.update",
        json!({ "name": "Smoke Platform" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "backup.exportWorkspaceBundle",
        json!({
            "workspacePath": workspace.to_string_lossy(),
            "outPath": bundle_out.to_string_lossy()
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "backup.importWorkspaceBundle",
        json!({
            "workspacePath": workspace.to_string_lossy(),
            "inPath": bundle_out.to_string_lossy()
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "19",
        "session.begin",
        json!({ "role": "SUPER_ADMIN" }),
    );
    // Dispatch coverage only; the platform session is not tenant-scoped.
    let _ = request(
        &mut stdin,
        &mut reader,
        "20",
        "students.delete",
        json!({ "studentId": "missing" }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
