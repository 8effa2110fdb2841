use crate::auth::{Action, Resource};
use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_required_str, require_capability, require_db, require_session, require_tenant,
    student_in_tenant, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::{Datelike, NaiveDate};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn parse_period(params: &serde_json::Value) -> Result<(u32, i32), HandlerErr> {
    let month = match params.get("month").and_then(|v| v.as_i64()) {
        Some(m) if (1..=12).contains(&m) => m as u32,
        _ => return Err(HandlerErr::bad_params("month must be between 1 and 12")),
    };
    let year = match params.get("year").and_then(|v| v.as_i64()) {
        Some(y) if (1900..=2100).contains(&y) => y as i32,
        _ => return Err(HandlerErr::bad_params("missing/invalid year")),
    };
    Ok((month, year))
}

fn parse_iso_date(raw: &str, key: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

/// Classification is against a date-only "today"; tests pass it explicitly,
/// the embedding server normally omits it.
fn resolve_today(params: &serde_json::Value) -> Result<NaiveDate, HandlerErr> {
    match params.get("today").and_then(|v| v.as_str()) {
        Some(raw) => parse_iso_date(raw, "today"),
        None => Ok(chrono::Local::now().date_naive()),
    }
}

fn handle_generate_period(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_capability(session, Resource::Payments, Action::Manage) {
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
    let (month, year) = match parse_period(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = student_in_tenant(conn, &tenant_id, &student_id) {
        return e.response(&req.id);
    }

    // Re-generating an existing period hands back the row instead of
    // stacking a duplicate.
    let existing: Option<String> = match conn
        .query_row(
            "SELECT id FROM payments
             WHERE tenant_id = ? AND student_id = ? AND payment_month = ? AND payment_year = ?
             ORDER BY rowid LIMIT 1",
            (&tenant_id, &student_id, month, year),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Some(payment_id) = existing {
        return ok(&req.id, json!({ "paymentId": payment_id, "created": false }));
    }

    // Snapshot the live fee; later fee changes must not reach this row
    // except through the bulk updater's pending-row rewrite.
    let fee: f64 = match conn.query_row(
        "SELECT monthly_tuition_fee FROM students WHERE id = ? AND tenant_id = ?",
        (&student_id, &tenant_id),
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let payment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO payments(
           id, tenant_id, student_id, amount, paid_amount, remaining_amount,
           status, payment_month, payment_year, tuition_fee_at_payment,
           created_at, updated_at
         ) VALUES(?, ?, ?, ?, 0, ?, 'pending', ?, ?, ?,
                  strftime('%Y-%m-%dT%H:%M:%SZ','now'),
                  strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &payment_id,
            &tenant_id,
            &student_id,
            fee,
            fee,
            month,
            year,
            fee,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "payments" })),
        );
    }

    ok(&req.id, json!({ "paymentId": payment_id, "created": true }))
}

fn handle_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_capability(session, Resource::Payments, Action::Manage) {
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
    let (month, year) = match parse_period(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let amount = match req.params.get("amount").and_then(|v| v.as_f64()) {
        Some(v) if v.is_finite() && v > 0.0 => v,
        _ => return err(&req.id, "bad_params", "amount must be > 0", None),
    };
    if let Err(e) = student_in_tenant(conn, &tenant_id, &student_id) {
        return e.response(&req.id);
    }

    // Earliest open row of the period takes the payment.
    let target: Option<(String, f64, f64, f64)> = match conn
        .query_row(
            "SELECT id, paid_amount, remaining_amount, tuition_fee_at_payment
             FROM payments
             WHERE tenant_id = ? AND student_id = ?
               AND payment_month = ? AND payment_year = ?
               AND remaining_amount > 0
             ORDER BY rowid LIMIT 1",
            (&tenant_id, &student_id, month, year),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let Some((payment_id, paid_amount, remaining_amount, _fee)) = target else {
        let any_row: Option<String> = match conn
            .query_row(
                "SELECT id FROM payments
                 WHERE tenant_id = ? AND student_id = ?
                   AND payment_month = ? AND payment_year = ?
                 ORDER BY rowid LIMIT 1",
                (&tenant_id, &student_id, month, year),
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        return match any_row {
            Some(_) => err(
                &req.id,
                "bad_params",
                "billing period is already fully paid",
                Some(json!({ "month": month, "year": year })),
            ),
            None => err(
                &req.id,
                "not_found",
                "no billing record for period",
                Some(json!({ "month": month, "year": year })),
            ),
        };
    };

    if amount > remaining_amount {
        return err(
            &req.id,
            "bad_params",
            "payment exceeds remaining balance",
            Some(json!({ "remainingAmount": remaining_amount })),
        );
    }

    let new_paid = paid_amount + amount;
    let new_remaining = remaining_amount - amount;
    let status = if new_remaining <= 0.0 {
        "paid"
    } else {
        "partially_paid"
    };

    if let Err(e) = conn.execute(
        "UPDATE payments
         SET paid_amount = ?, remaining_amount = ?, status = ?,
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?",
        (new_paid, new_remaining, status, &payment_id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "payments" })),
        );
    }

    ok(
        &req.id,
        json!({
            "paymentId": payment_id,
            "paidAmount": new_paid,
            "remainingAmount": new_remaining,
            "status": status
        }),
    )
}

fn handle_list_for_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_capability(session, Resource::Payments, Action::Read) {
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

    let mut stmt = match conn.prepare(
        "SELECT id, amount, paid_amount, remaining_amount, status,
                payment_month, payment_year, tuition_fee_at_payment
         FROM payments
         WHERE tenant_id = ? AND student_id = ?
         ORDER BY payment_year, payment_month, rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((&tenant_id, &student_id), |row| {
            let id: String = row.get(0)?;
            let amount: f64 = row.get(1)?;
            let paid_amount: f64 = row.get(2)?;
            let remaining_amount: f64 = row.get(3)?;
            let status: String = row.get(4)?;
            let month: i64 = row.get(5)?;
            let year: i64 = row.get(6)?;
            let fee_at_payment: f64 = row.get(7)?;
            Ok(json!({
                "id": id,
                "amount": amount,
                "paidAmount": paid_amount,
                "remainingAmount": remaining_amount,
                "status": status,
                "paymentMonth": month,
                "paymentYear": year,
                "tuitionFeeAtPayment": fee_at_payment
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(payments) => ok(&req.id, json!({ "payments": payments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_monthly_overview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_capability(session, Resource::Payments, Action::Read) {
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
    let year = match req.params.get("year").and_then(|v| v.as_i64()) {
        Some(y) if (1900..=2100).contains(&y) => y as i32,
        _ => return err(&req.id, "bad_params", "missing/invalid year", None),
    };
    let today = match resolve_today(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match calc::monthly_overview(conn, &tenant_id, &student_id, year, today) {
        Ok(months) => match serde_json::to_value(&months) {
            Ok(value) => ok(&req.id, value),
            Err(e) => err(&req.id, "internal", e.to_string(), None),
        },
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

fn handle_bulk_tuition_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_capability(session, Resource::Payments, Action::Manage) {
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

    let Some(ids_arr) = req.params.get("studentIds").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing studentIds[]", None);
    };
    if ids_arr.is_empty() {
        return err(&req.id, "bad_params", "studentIds must not be empty", None);
    }
    let mut student_ids: Vec<String> = Vec::with_capacity(ids_arr.len());
    for (i, v) in ids_arr.iter().enumerate() {
        match v.as_str() {
            Some(s) if !s.trim().is_empty() => student_ids.push(s.to_string()),
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("studentIds[{}] must be a non-empty string", i),
                    None,
                )
            }
        }
    }

    let new_fee = match req.params.get("newTuitionFee").and_then(|v| v.as_f64()) {
        Some(v) if v.is_finite() && v >= 0.0 => v,
        _ => {
            return err(
                &req.id,
                "bad_params",
                "newTuitionFee must be a non-negative number",
                None,
            )
        }
    };

    let effective = match req.params.get("effectiveDate").and_then(|v| v.as_str()) {
        Some(raw) => match parse_iso_date(raw, "effectiveDate") {
            Ok(d) => Some(d),
            Err(e) => return e.response(&req.id),
        },
        None => None,
    };

    // The fee updates and the pending-row rewrites commit or roll back
    // together.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let mut updated: usize = 0;
    for student_id in &student_ids {
        if let Err(e) = student_in_tenant(&tx, &tenant_id, student_id) {
            let _ = tx.rollback();
            return e.response(&req.id);
        }

        if let Err(e) = tx.execute(
            "UPDATE students
             SET monthly_tuition_fee = ?,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
             WHERE id = ? AND tenant_id = ?",
            (new_fee, student_id, &tenant_id),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "students" })),
            );
        }
        updated += 1;

        // Rewrite only open rows from the effective month on. Rows already
        // carrying money (partially_paid, paid) keep their old snapshot.
        if let Some(effective) = effective {
            let eff_year = effective.year();
            let eff_month = effective.month();
            if let Err(e) = tx.execute(
                "UPDATE payments
                 SET amount = ?1,
                     remaining_amount = ?1 - paid_amount,
                     tuition_fee_at_payment = ?1,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
                 WHERE tenant_id = ?2 AND student_id = ?3 AND status = 'pending'
                   AND (payment_year > ?4
                        OR (payment_year = ?4 AND payment_month >= ?5))",
                (new_fee, &tenant_id, student_id, eff_year, eff_month),
            ) {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_update_failed",
                    e.to_string(),
                    Some(json!({ "table": "payments" })),
                );
            }
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "success": true, "updatedCount": updated }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "payments.generatePeriod" => Some(handle_generate_period(state, req)),
        "payments.record" => Some(handle_record(state, req)),
        "payments.listForStudent" => Some(handle_list_for_student(state, req)),
        "payments.monthlyOverview" => Some(handle_monthly_overview(state, req)),
        "payments.bulkTuitionUpdate" => Some(handle_bulk_tuition_update(state, req)),
        _ => None,
    }
}
