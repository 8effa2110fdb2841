use crate::auth::Role;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, require_db, tenant_exists};
use crate::ipc::types::{AppState, Request, Session};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "sessionRole": state.session.as_ref().map(|s| s.role.as_str()),
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            // A session belongs to the workspace it was begun against.
            state.session = None;
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn handle_session_begin(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };

    let role_raw = match get_required_str(&req.params, "role") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(role) = Role::parse(&role_raw) else {
        return err(
            &req.id,
            "bad_params",
            "unknown role",
            Some(json!({ "role": role_raw })),
        );
    };

    let tenant_id = req
        .params
        .get("tenantId")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    // Only SUPER_ADMIN may hold a platform-wide session.
    if tenant_id.is_none() && role != Role::SuperAdmin {
        return err(&req.id, "bad_params", "missing tenantId", None);
    }

    if let Some(tid) = tenant_id.as_deref() {
        match tenant_exists(conn, tid) {
            Ok(true) => {}
            Ok(false) => {
                return err(
                    &req.id,
                    "not_found",
                    "tenant not found",
                    Some(json!({ "tenantId": tid })),
                )
            }
            Err(e) => return e.response(&req.id),
        }
    }

    state.session = Some(Session {
        role,
        tenant_id: tenant_id.clone(),
    });
    ok(
        &req.id,
        json!({
            "role": role.as_str(),
            "tenantId": tenant_id,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "session.begin" => Some(handle_session_begin(state, req)),
        _ => None,
    }
}
