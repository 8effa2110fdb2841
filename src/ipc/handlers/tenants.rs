use crate::auth::{Action, Resource};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, require_capability, require_db, require_session};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_tenants_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_capability(session, Resource::Tenants, Action::Read) {
        return e.response(&req.id);
    }
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };

    // Include student counts so the UI can show a useful dashboard.
    let mut stmt = match conn.prepare(
        "SELECT
           t.id,
           t.name,
           (SELECT COUNT(*) FROM students s WHERE s.tenant_id = t.id) AS student_count
         FROM tenants t
         ORDER BY t.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let student_count: i64 = row.get(2)?;
            Ok(json!({
                "id": id,
                "name": name,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(tenants) => ok(&req.id, json!({ "tenants": tenants })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_tenants_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_capability(session, Resource::Tenants, Action::Manage) {
        return e.response(&req.id);
    }
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };

    let name = match get_required_str(&req.params, "name") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e.response(&req.id),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let tenant_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO tenants(id, name, created_at)
         VALUES(?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&tenant_id, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "tenants" })),
        );
    }

    ok(&req.id, json!({ "tenantId": tenant_id, "name": name }))
}

fn handle_tenants_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_capability(session, Resource::Tenants, Action::Manage) {
        return e.response(&req.id);
    }
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };

    let tenant_id = match get_required_str(&req.params, "tenantId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM tenants WHERE id = ?", [&tenant_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "tenant not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute("DELETE FROM payments WHERE tenant_id = ?", [&tenant_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "payments" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM students WHERE tenant_id = ?", [&tenant_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM tenants WHERE id = ?", [&tenant_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "tenants" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tenants.list" => Some(handle_tenants_list(state, req)),
        "tenants.create" => Some(handle_tenants_create(state, req)),
        "tenants.delete" => Some(handle_tenants_delete(state, req)),
        _ => None,
    }
}
