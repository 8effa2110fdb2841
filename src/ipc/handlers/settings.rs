use crate::auth::{Action, Resource};
use crate::config;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{require_capability, require_db, require_session};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_capability(session, Resource::Settings, Action::Read) {
        return e.response(&req.id);
    }
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };

    match config::load_or_init(conn) {
        Ok(settings) => ok(
            &req.id,
            json!({
                "name": settings.name,
                "description": settings.description
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", format!("{e:?}"), None),
    }
}

fn handle_settings_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_capability(session, Resource::Settings, Action::Manage) {
        return e.response(&req.id);
    }
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };

    let mut settings = match config::load_or_init(conn) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:?}"), None),
    };

    if let Some(v) = req.params.get("name") {
        let Some(name) = v.as_str() else {
            return err(&req.id, "bad_params", "name must be a string", None);
        };
        let name = name.trim();
        if name.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        settings.name = name.to_string();
    }
    if let Some(v) = req.params.get("description") {
        let Some(description) = v.as_str() else {
            return err(&req.id, "bad_params", "description must be a string", None);
        };
        settings.description = description.trim().to_string();
    }

    if let Err(e) = config::save(conn, &settings) {
        return err(&req.id, "db_update_failed", format!("{e:?}"), None);
    }

    ok(
        &req.id,
        json!({
            "name": settings.name,
            "description": settings.description
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.update" => Some(handle_settings_update(state, req)),
        _ => None,
    }
}
