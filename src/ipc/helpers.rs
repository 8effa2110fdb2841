use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::auth::{role_allows, Action, Resource};
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Session};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn db(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!("storage failure: {}", message);
        HandlerErr {
            code: "db_query_failed",
            message,
            details: None,
        }
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state.db.as_ref().ok_or(HandlerErr {
        code: "no_workspace",
        message: "select a workspace first".to_string(),
        details: None,
    })
}

pub fn require_session(state: &AppState) -> Result<&Session, HandlerErr> {
    state.session.as_ref().ok_or(HandlerErr {
        code: "no_session",
        message: "begin a session first".to_string(),
        details: None,
    })
}

pub fn require_capability(
    session: &Session,
    resource: Resource,
    action: Action,
) -> Result<(), HandlerErr> {
    if role_allows(session.role, resource, action) {
        return Ok(());
    }
    Err(HandlerErr {
        code: "forbidden",
        message: "role does not permit this operation".to_string(),
        details: Some(json!({ "role": session.role.as_str() })),
    })
}

pub fn require_tenant(session: &Session) -> Result<&str, HandlerErr> {
    session.tenant_id.as_deref().ok_or(HandlerErr {
        code: "forbidden",
        message: "session is not tenant-scoped".to_string(),
        details: None,
    })
}

pub fn tenant_exists(conn: &Connection, tenant_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM tenants WHERE id = ?", [tenant_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr::db(e.to_string()))
}

/// Resolves a student strictly within the session tenant. A row owned by
/// another tenant reports `not_found`, never `forbidden`.
pub fn student_in_tenant(
    conn: &Connection,
    tenant_id: &str,
    student_id: &str,
) -> Result<(), HandlerErr> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ? AND tenant_id = ?",
            (student_id, tenant_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db(e.to_string()))?;
    match found {
        Some(_) => Ok(()),
        None => Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: Some(json!({ "studentId": student_id })),
        }),
    }
}
