use crate::auth::{Action, Resource};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_required_str, require_capability, require_db, require_session, require_tenant,
    student_in_tenant, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::params_from_iter;
use serde_json::json;
use uuid::Uuid;

fn parse_fee(v: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    let Some(n) = v.as_f64() else {
        return Err(HandlerErr::bad_params(format!("{} must be a number", key)));
    };
    if !n.is_finite() || n < 0.0 {
        return Err(HandlerErr::bad_params(format!(
            "{} must be a non-negative number",
            key
        )));
    }
    Ok(n)
}

fn parse_due_day(v: &serde_json::Value) -> Result<i64, HandlerErr> {
    match v.as_i64() {
        Some(d) if (1..=31).contains(&d) => Ok(d),
        _ => Err(HandlerErr::bad_params(
            "paymentDueDay must be between 1 and 31",
        )),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_capability(session, Resource::Students, Action::Read) {
        return e.response(&req.id);
    }
    let tenant_id = match require_tenant(session) {
        Ok(t) => t.to_string(),
        Err(e) => return e.response(&req.id),
    };
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };

    let mut stmt = match conn.prepare(
        "SELECT id, last_name, first_name, student_no, active, sort_order,
                monthly_tuition_fee, payment_due_day
         FROM students
         WHERE tenant_id = ?
         ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&tenant_id], |row| {
            let id: String = row.get(0)?;
            let last_name: String = row.get(1)?;
            let first_name: String = row.get(2)?;
            let student_no: Option<String> = row.get(3)?;
            let active: i64 = row.get(4)?;
            let sort_order: i64 = row.get(5)?;
            let fee: f64 = row.get(6)?;
            let due_day: i64 = row.get(7)?;
            Ok(json!({
                "id": id,
                "lastName": last_name,
                "firstName": first_name,
                "studentNo": student_no,
                "active": active != 0,
                "sortOrder": sort_order,
                "monthlyTuitionFee": fee,
                "paymentDueDay": due_day
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_capability(session, Resource::Students, Action::Manage) {
        return e.response(&req.id);
    }
    let tenant_id = match require_tenant(session) {
        Ok(t) => t.to_string(),
        Err(e) => return e.response(&req.id),
    };
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };

    let last_name = match get_required_str(&req.params, "lastName") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e.response(&req.id),
    };
    let first_name = match get_required_str(&req.params, "firstName") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e.response(&req.id),
    };
    if last_name.is_empty() || first_name.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "firstName/lastName must not be empty",
            None,
        );
    }

    let student_no = req
        .params
        .get("studentNo")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .and_then(|s| if s.is_empty() { None } else { Some(s) });
    let active = req
        .params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let fee = match req.params.get("monthlyTuitionFee") {
        Some(v) => match parse_fee(v, "monthlyTuitionFee") {
            Ok(n) => n,
            Err(e) => return e.response(&req.id),
        },
        None => 0.0,
    };
    let due_day = match req.params.get("paymentDueDay") {
        Some(v) => match parse_due_day(v) {
            Ok(d) => d,
            Err(e) => return e.response(&req.id),
        },
        None => 10,
    };

    let sort_order: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students WHERE tenant_id = ?",
        [&tenant_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(
           id,
           tenant_id,
           last_name,
           first_name,
           student_no,
           active,
           sort_order,
           monthly_tuition_fee,
           payment_due_day,
           updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &student_id,
            &tenant_id,
            &last_name,
            &first_name,
            student_no.as_deref(),
            if active { 1 } else { 0 },
            sort_order,
            fee,
            due_day,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_capability(session, Resource::Students, Action::Manage) {
        return e.response(&req.id);
    }
    let tenant_id = match require_tenant(session) {
        Ok(t) => t.to_string(),
        Err(e) => return e.response(&req.id),
    };
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };

    let student_id = match get_required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    if let Err(e) = student_in_tenant(conn, &tenant_id, &student_id) {
        return e.response(&req.id);
    }

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    if let Some(v) = patch.get("lastName") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.lastName must be a string", None);
        };
        let s = s.trim().to_string();
        if s.is_empty() {
            return err(&req.id, "bad_params", "lastName must not be empty", None);
        }
        set_parts.push("last_name = ?".into());
        bind_values.push(Value::Text(s));
    }
    if let Some(v) = patch.get("firstName") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.firstName must be a string", None);
        };
        let s = s.trim().to_string();
        if s.is_empty() {
            return err(&req.id, "bad_params", "firstName must not be empty", None);
        }
        set_parts.push("first_name = ?".into());
        bind_values.push(Value::Text(s));
    }
    if let Some(v) = patch.get("studentNo") {
        if v.is_null() {
            set_parts.push("student_no = ?".into());
            bind_values.push(Value::Null);
        } else if let Some(s) = v.as_str() {
            let t = s.trim().to_string();
            set_parts.push("student_no = ?".into());
            if t.is_empty() {
                bind_values.push(Value::Null);
            } else {
                bind_values.push(Value::Text(t));
            }
        } else {
            return err(
                &req.id,
                "bad_params",
                "patch.studentNo must be a string or null",
                None,
            );
        }
    }
    if let Some(v) = patch.get("active") {
        let Some(b) = v.as_bool() else {
            return err(&req.id, "bad_params", "patch.active must be a boolean", None);
        };
        set_parts.push("active = ?".into());
        bind_values.push(Value::Integer(if b { 1 } else { 0 }));
    }
    if let Some(v) = patch.get("monthlyTuitionFee") {
        // Changes the live rate only; historical payment snapshots stay put.
        let fee = match parse_fee(v, "patch.monthlyTuitionFee") {
            Ok(n) => n,
            Err(e) => return e.response(&req.id),
        };
        set_parts.push("monthly_tuition_fee = ?".into());
        bind_values.push(Value::Real(fee));
    }
    if let Some(v) = patch.get("paymentDueDay") {
        let due_day = match parse_due_day(v) {
            Ok(d) => d,
            Err(e) => return e.response(&req.id),
        };
        set_parts.push("payment_due_day = ?".into());
        bind_values.push(Value::Integer(due_day));
    }

    if set_parts.is_empty() {
        return err(&req.id, "bad_params", "patch has no supported fields", None);
    }

    set_parts.push("updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')".into());
    let sql = format!(
        "UPDATE students SET {} WHERE id = ? AND tenant_id = ?",
        set_parts.join(", ")
    );
    bind_values.push(Value::Text(student_id.clone()));
    bind_values.push(Value::Text(tenant_id));

    if let Err(e) = conn.execute(&sql, params_from_iter(bind_values)) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_capability(session, Resource::Students, Action::Manage) {
        return e.response(&req.id);
    }
    let tenant_id = match require_tenant(session) {
        Ok(t) => t.to_string(),
        Err(e) => return e.response(&req.id),
    };
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };

    let student_id = match get_required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = student_in_tenant(conn, &tenant_id, &student_id) {
        return e.response(&req.id);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "DELETE FROM payments WHERE student_id = ? AND tenant_id = ?",
        (&student_id, &tenant_id),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "payments" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM students WHERE id = ? AND tenant_id = ?",
        (&student_id, &tenant_id),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
