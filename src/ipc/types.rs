use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::auth::Role;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Caller identity as resolved by the embedding server's session layer.
/// `tenant_id` is `None` only for platform-wide SUPER_ADMIN sessions.
#[derive(Debug, Clone)]
pub struct Session {
    pub role: Role,
    pub tenant_id: Option<String>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub session: Option<Session>,
}
