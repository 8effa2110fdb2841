use crate::auth::{Action, Resource};
use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, require_capability, require_session};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_export_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_capability(session, Resource::Backups, Action::Manage) {
        return e.response(&req.id);
    }

    let workspace_path = match get_required_str(&req.params, "workspacePath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };
    let out_path = match get_required_str(&req.params, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };

    match backup::export_workspace_bundle(&workspace_path, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormat": summary.bundle_format,
                "entryCount": summary.entry_count,
                "outPath": out_path.to_string_lossy()
            }),
        ),
        Err(e) => err(&req.id, "export_failed", format!("{e:?}"), None),
    }
}

fn handle_import_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    {
        let session = match require_session(state) {
            Ok(s) => s,
            Err(e) => return e.response(&req.id),
        };
        if let Err(e) = require_capability(session, Resource::Backups, Action::Manage) {
            return e.response(&req.id);
        }
    }

    let workspace_path = match get_required_str(&req.params, "workspacePath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };
    let in_path = match get_required_str(&req.params, "inPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };

    // The open handle must not outlive the file swap.
    let reopen = state.workspace.as_deref() == Some(workspace_path.as_path());
    if reopen {
        state.db = None;
    }

    let summary = match backup::import_workspace_bundle(&in_path, &workspace_path) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "import_failed", format!("{e:?}"), None),
    };

    if reopen {
        match db::open_db(&workspace_path) {
            Ok(conn) => state.db = Some(conn),
            Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
        }
        // The imported data may not contain the session's tenant.
        state.session = None;
    }

    ok(
        &req.id,
        json!({ "bundleFormatDetected": summary.bundle_format_detected }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_export_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_import_bundle(state, req)),
        _ => None,
    }
}
