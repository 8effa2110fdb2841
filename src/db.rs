use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "campus.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tenants(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            student_no TEXT,
            active INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            monthly_tuition_fee REAL NOT NULL DEFAULT 0,
            payment_due_day INTEGER NOT NULL DEFAULT 10,
            updated_at TEXT,
            FOREIGN KEY(tenant_id) REFERENCES tenants(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_tenant ON students(tenant_id)",
        [],
    )?;

    // Existing workspaces may predate the billing columns. Add and backfill if needed.
    ensure_students_billing_columns(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_tenant_sort ON students(tenant_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            amount REAL NOT NULL,
            paid_amount REAL NOT NULL DEFAULT 0,
            remaining_amount REAL NOT NULL,
            status TEXT NOT NULL,
            payment_month INTEGER NOT NULL,
            payment_year INTEGER NOT NULL,
            tuition_fee_at_payment REAL NOT NULL,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(tenant_id) REFERENCES tenants(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_tenant ON payments(tenant_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_student ON payments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_student_period
         ON payments(student_id, payment_year, payment_month)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    // Migrate older workspaces to the lowercase status vocabulary:
    // - "PENDING"/"PARTIALLY_PAID"/"PAID" => "pending"/"partially_paid"/"paid"
    migrate_payment_statuses(conn)?;

    Ok(())
}

fn ensure_students_billing_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "students", "monthly_tuition_fee")? {
        conn.execute(
            "ALTER TABLE students ADD COLUMN monthly_tuition_fee REAL NOT NULL DEFAULT 0",
            [],
        )?;
    }
    if !table_has_column(conn, "students", "payment_due_day")? {
        conn.execute(
            "ALTER TABLE students ADD COLUMN payment_due_day INTEGER NOT NULL DEFAULT 10",
            [],
        )?;
    }
    Ok(())
}

fn migrate_payment_statuses(conn: &Connection) -> anyhow::Result<()> {
    // Imported data may carry the upstream uppercase enum. All readers and the
    // classifier expect lowercase.
    conn.execute(
        "UPDATE payments SET status = 'pending' WHERE status = 'PENDING'",
        [],
    )?;
    conn.execute(
        "UPDATE payments SET status = 'partially_paid' WHERE status = 'PARTIALLY_PAID'",
        [],
    )?;
    conn.execute(
        "UPDATE payments SET status = 'paid' WHERE status = 'PAID'",
        [],
    )?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
