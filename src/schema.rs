/// Application schema
///
/// SQLite DDL for every table the domain entities map to. Timestamps are
/// stored as `YYYY-MM-DD HH:MM:SS` text so they compare correctly as
/// strings.
use crate::core::db::Connection;
use crate::core::Result;
use tracing::info;

/// Application tables in creation order.
pub const TABLES: [&str; 6] = [
    "user",
    "otp_codes",
    "validation_attempts",
    "service_queue",
    "service_attempts",
    "sms_mock",
];

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS "user" (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    phone TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    validated INTEGER NOT NULL DEFAULT 0,
    password TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS otp_codes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL,
    user_id INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_otp_codes_user ON otp_codes (user_id, created_at);

CREATE TABLE IF NOT EXISTS validation_attempts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    is_valid INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_validation_attempts_user ON validation_attempts (user_id, created_at);

CREATE TABLE IF NOT EXISTS service_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    service TEXT NOT NULL,
    status INTEGER NOT NULL DEFAULT 0,
    params TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_attempt TEXT NOT NULL,
    count_retries INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_service_queue_status ON service_queue (status);

CREATE TABLE IF NOT EXISTS service_attempts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue_id INTEGER NOT NULL,
    result TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sms_mock (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    phone TEXT NOT NULL,
    message TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

/// Creates any missing application table.
pub fn install(db: &Connection) -> Result<()> {
    db.handle()?.execute_batch(SCHEMA)?;
    info!("Schema installed ({} tables)", TABLES.len());
    Ok(())
}

/// Drops every application table and creates them again.
pub fn reinstall(db: &Connection) -> Result<()> {
    let handle = db.handle()?;
    for table in TABLES.iter().rev() {
        handle.execute_batch(&format!("DROP TABLE IF EXISTS {}", db.quote_table_name(table)))?;
    }
    install(db)
}

/// Names of the application tables present in the database.
pub fn installed_tables(db: &Connection) -> Result<Vec<String>> {
    let handle = db.handle()?;
    let mut stmt = handle.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
    let names = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut tables = Vec::new();
    for name in names {
        let name = name?;
        if TABLES.contains(&name.as_str()) {
            tables.push(name);
        }
    }
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_is_idempotent() {
        let db = Connection::in_memory();
        install(&db).unwrap();
        install(&db).unwrap();
        assert_eq!(installed_tables(&db).unwrap().len(), TABLES.len());
    }

    #[test]
    fn test_reinstall_empties_tables() {
        let db = Connection::in_memory();
        install(&db).unwrap();
        db.handle()
            .unwrap()
            .execute_batch("INSERT INTO sms_mock (phone, message, created_at) VALUES ('1', 'm', 'now')")
            .unwrap();
        reinstall(&db).unwrap();

        let count: i64 = db
            .handle()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM sms_mock", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
