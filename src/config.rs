//! Platform-wide settings (display name and description for the hosting
//! school platform). Stored as one JSON row in `settings`; reads ensure the
//! default row exists instead of relying on ambient global state.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db;

pub const PLATFORM_SETTINGS_KEY: &str = "platform";

const DEFAULT_NAME: &str = "Campus";
const DEFAULT_DESCRIPTION: &str = "School management platform";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSettings {
    pub name: String,
    pub description: String,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
        }
    }
}

/// Returns the platform settings, creating the default row on first read.
/// Safe to call repeatedly; only the missing case writes.
pub fn load_or_init(conn: &Connection) -> anyhow::Result<PlatformSettings> {
    if let Some(value) = db::settings_get_json(conn, PLATFORM_SETTINGS_KEY)? {
        return Ok(serde_json::from_value(value)?);
    }
    let defaults = PlatformSettings::default();
    save(conn, &defaults)?;
    Ok(defaults)
}

pub fn save(conn: &Connection, settings: &PlatformSettings) -> anyhow::Result<()> {
    db::settings_set_json(
        conn,
        PLATFORM_SETTINGS_KEY,
        &serde_json::to_value(settings)?,
    )
}
