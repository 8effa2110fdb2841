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

/// Workspace + tenant + ADMIN session; returns the tenant id.
fn setup_admin_session(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        "setup-1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "setup-2",
        "session.begin",
        json!({ "role": "SUPER_ADMIN" }),
    );
    let created = request_ok(
        stdin,
        reader,
        "setup-3",
        "tenants.create",
        json!({ "name": "Overview Campus" }),
    );
    let tenant_id = created
        .get("tenantId")
        .and_then(|v| v.as_str())
        .expect("tenantId")
        .to_string();
    let _ = request_ok(
        stdin,
        reader,
        "setup-4",
        "session.begin",
        json!({ "role": "ADMIN", "tenantId": tenant_id }),
    );
    tenant_id
}

fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    fee: f64,
    due_day: i64,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        id,
        "students.create",
        json!({
            "lastName": "Doe",
            "firstName": "Jan",
            "monthlyTuitionFee": fee,
            "paymentDueDay": due_day
        }),
    );
    created
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string()
}

fn overview(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    student_id: &str,
    year: i64,
    today: &str,
) -> Vec<serde_json::Value> {
    let result = request_ok(
        stdin,
        reader,
        id,
        "payments.monthlyOverview",
        json!({ "studentId": student_id, "year": year, "today": today }),
    );
    result.as_array().cloned().expect("overview array")
}

#[test]
fn overview_classifies_overdue_partial_completed_and_not_due() {
    let workspace = temp_dir("campus-overview");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _tenant = setup_admin_session(&mut stdin, &mut reader, &workspace);
    let student_id = create_student(&mut stdin, &mut reader, "s1", 500000.0, 10);

    // March fully paid, June 60% paid.
    for (id, month) in [("g3", 3), ("g6", 6)] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "payments.generatePeriod",
            json!({ "studentId": student_id, "month": month, "year": 2025 }),
        );
    }
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "r3",
        "payments.record",
        json!({ "studentId": student_id, "month": 3, "year": 2025, "amount": 500000 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "r6",
        "payments.record",
        json!({ "studentId": student_id, "month": 6, "year": 2025, "amount": 300000 }),
    );

    let months = overview(&mut stdin, &mut reader, "o1", &student_id, 2025, "2025-06-20");
    assert_eq!(months.len(), 12);

    // Ordered months 1..12.
    for (i, m) in months.iter().enumerate() {
        assert_eq!(m.get("month").and_then(|v| v.as_i64()), Some(i as i64 + 1));
        assert_eq!(m.get("year").and_then(|v| v.as_i64()), Some(2025));
    }

    let march = &months[2];
    assert_eq!(march.get("status").and_then(|v| v.as_str()), Some("completed"));
    assert_eq!(march.get("isFullyPaid").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(march.get("percentagePaid").and_then(|v| v.as_f64()), Some(100.0));

    // Due day 10 has passed on June 20th with only 60% paid.
    let june = &months[5];
    assert_eq!(june.get("status").and_then(|v| v.as_str()), Some("overdue"));
    assert_eq!(june.get("isOverdue").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(june.get("isPending").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(june.get("totalPaid").and_then(|v| v.as_f64()), Some(300000.0));
    assert_eq!(june.get("requiredAmount").and_then(|v| v.as_f64()), Some(500000.0));
    assert_eq!(june.get("percentagePaid").and_then(|v| v.as_f64()), Some(60.0));
    assert_eq!(june.get("monthName").and_then(|v| v.as_str()), Some("June"));

    // September has no billing row at all.
    let september = &months[8];
    assert_eq!(
        september.get("status").and_then(|v| v.as_str()),
        Some("not_due")
    );
    assert_eq!(
        september.get("hasPayment").and_then(|v| v.as_bool()),
        Some(false)
    );
    assert!(september.get("paymentId").map(|v| v.is_null()).unwrap_or(false));

    // Before the due date the same June balance is only partially paid.
    let months_early = overview(&mut stdin, &mut reader, "o2", &student_id, 2025, "2025-06-05");
    let june_early = &months_early[5];
    assert_eq!(
        june_early.get("status").and_then(|v| v.as_str()),
        Some("partially_paid")
    );
    assert_eq!(
        june_early.get("isOverdue").and_then(|v| v.as_bool()),
        Some(false)
    );
}

#[test]
fn overview_pending_only_until_due_date_passes() {
    let workspace = temp_dir("campus-overview-pending");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _tenant = setup_admin_session(&mut stdin, &mut reader, &workspace);
    let student_id = create_student(&mut stdin, &mut reader, "s1", 400000.0, 15);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "g8",
        "payments.generatePeriod",
        json!({ "studentId": student_id, "month": 8, "year": 2025 }),
    );

    // On the due date the period is still pending, one day later overdue.
    let on_due = overview(&mut stdin, &mut reader, "o1", &student_id, 2025, "2025-08-15");
    assert_eq!(
        on_due[7].get("status").and_then(|v| v.as_str()),
        Some("pending")
    );
    assert_eq!(
        on_due[7].get("isPending").and_then(|v| v.as_bool()),
        Some(true)
    );

    let past_due = overview(&mut stdin, &mut reader, "o2", &student_id, 2025, "2025-08-16");
    assert_eq!(
        past_due[7].get("status").and_then(|v| v.as_str()),
        Some("overdue")
    );
    assert_eq!(
        past_due[7].get("isPending").and_then(|v| v.as_bool()),
        Some(false)
    );
}

#[test]
fn overview_zero_fee_reports_zero_percent_without_nan() {
    let workspace = temp_dir("campus-overview-zero-fee");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _tenant = setup_admin_session(&mut stdin, &mut reader, &workspace);
    let student_id = create_student(&mut stdin, &mut reader, "s1", 0.0, 10);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "payments.generatePeriod",
        json!({ "studentId": student_id, "month": 2, "year": 2025 }),
    );

    let months = overview(&mut stdin, &mut reader, "o1", &student_id, 2025, "2025-03-01");
    let february = &months[1];
    assert_eq!(
        february.get("percentagePaid").and_then(|v| v.as_f64()),
        Some(0.0)
    );
    // A zero fee has nothing outstanding.
    assert_eq!(
        february.get("status").and_then(|v| v.as_str()),
        Some("completed")
    );
}

#[test]
fn overview_exactly_one_status_flag_set_per_month() {
    let workspace = temp_dir("campus-overview-exclusive");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _tenant = setup_admin_session(&mut stdin, &mut reader, &workspace);
    let student_id = create_student(&mut stdin, &mut reader, "s1", 500000.0, 10);

    for (id, month) in [("g1", 1), ("g5", 5), ("g11", 11)] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "payments.generatePeriod",
            json!({ "studentId": student_id, "month": month, "year": 2025 }),
        );
    }
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "payments.record",
        json!({ "studentId": student_id, "month": 1, "year": 2025, "amount": 500000 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "r5",
        "payments.record",
        json!({ "studentId": student_id, "month": 5, "year": 2025, "amount": 100000 }),
    );

    let months = overview(&mut stdin, &mut reader, "o1", &student_id, 2025, "2025-05-01");
    let statuses = ["completed", "overdue", "partially_paid", "pending", "not_due"];
    for m in &months {
        let status = m.get("status").and_then(|v| v.as_str()).expect("status");
        assert_eq!(statuses.iter().filter(|s| **s == status).count(), 1);
    }

    let unknown = request(
        &mut stdin,
        &mut reader,
        "o2",
        "payments.monthlyOverview",
        json!({ "studentId": "missing", "year": 2025, "today": "2025-05-01" }),
    );
    assert_eq!(unknown.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        unknown
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("not_found")
    );
}
