/// Connection Management Module
///
/// This module owns the live SQLite handle, opens it lazily on first use,
/// and implements the identifier and value quoting rules every other layer
/// relies on. It is also the factory for statements and the SQL compiler.
use super::builder::QueryBuilder;
use super::command::Command;
use super::params::Params;
use super::value::Value;
use crate::config::DbConfig;
use crate::core::log::{LogSink, TracingSink};
use crate::core::{OtpgateError, Result};
use once_cell::sync::Lazy;
use once_cell::unsync::OnceCell;
use regex::{Captures, Regex};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

static ALIAS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*?)(?i:\s+as|)\s+([^ ]+)$").expect("alias pattern"));

static TEMPLATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\{\{(%?[\w\-\. ]+%?)\}\}|\[\[([\w\-\. ]+)\]\])").expect("template pattern")
});

/// A lazily opened database connection
pub struct Connection {
    config: DbConfig,
    handle: OnceCell<rusqlite::Connection>,
    driver_name: RefCell<Option<String>>,
    quoted_tables: RefCell<HashMap<String, String>>,
    quoted_columns: RefCell<HashMap<String, String>>,
    log_sink: Arc<dyn LogSink>,
}

impl Connection {
    /// Creates a connection without opening it.
    pub fn new(config: DbConfig) -> Self {
        Connection {
            config,
            handle: OnceCell::new(),
            driver_name: RefCell::new(None),
            quoted_tables: RefCell::new(HashMap::new()),
            quoted_columns: RefCell::new(HashMap::new()),
            log_sink: Arc::new(TracingSink),
        }
    }

    /// Shorthand for a private in-memory SQLite database.
    pub fn in_memory() -> Self {
        Self::new(DbConfig::default())
    }

    /// Replaces the sink that receives statement failure lines.
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = sink;
        self
    }

    pub fn log_sink(&self) -> &Arc<dyn LogSink> {
        &self.log_sink
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Whether the underlying handle has been opened
    pub fn is_active(&self) -> bool {
        self.handle.get().is_some()
    }

    /// Establishes the connection. Does nothing if it is already open.
    pub fn open(&self) -> Result<()> {
        self.handle().map(|_| ())
    }

    /// Closes the handle; the next accessor that needs it opens it again.
    pub fn close(&mut self) {
        if self.handle.take().is_some() {
            debug!("Closed connection to {}", self.config.dsn);
        }
        self.driver_name.replace(None);
    }

    /// Returns the open handle, opening it on first use.
    pub fn handle(&self) -> Result<&rusqlite::Connection> {
        self.handle.get_or_try_init(|| self.create_handle())
    }

    fn create_handle(&self) -> Result<rusqlite::Connection> {
        let dsn = self.config.dsn.trim();
        if dsn.is_empty() {
            return Err(OtpgateError::connection("Connection::dsn cannot be empty."));
        }

        let (driver, target) = match dsn.split_once(':') {
            Some((driver, target)) => (driver.to_lowercase(), target),
            None => ("sqlite".to_string(), dsn),
        };
        if driver != "sqlite" {
            return Err(OtpgateError::connection(format!(
                "Unsupported database driver '{}'",
                driver
            )));
        }

        let conn = if target.is_empty() || target == ":memory:" {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(target)
        }
        .map_err(|e| OtpgateError::connection(e.to_string()))?;

        self.init_connection(&conn)?;
        info!("Opened {} connection to {}", driver, dsn);
        Ok(conn)
    }

    fn init_connection(&self, conn: &rusqlite::Connection) -> Result<()> {
        if self.config.username.is_some() || self.config.password.is_some() {
            debug!("SQLite ignores connection credentials");
        }
        if let Some(charset) = &self.config.charset {
            debug!("SQLite stores text as UTF-8; ignoring charset {}", charset);
        }
        for pragma in &self.config.pragmas {
            conn.execute_batch(pragma)
                .map_err(|e| OtpgateError::connection(format!("{}: {}", pragma, e)))?;
        }
        Ok(())
    }

    /// The lower-cased driver name, taken from the DSN prefix when present.
    pub fn driver_name(&self) -> Result<String> {
        if let Some(name) = self.driver_name.borrow().as_ref() {
            return Ok(name.clone());
        }
        let name = match self.config.dsn.split_once(':') {
            Some((driver, _)) => driver.to_lowercase(),
            None => {
                self.open()?;
                "sqlite".to_string()
            }
        };
        self.driver_name.replace(Some(name.clone()));
        Ok(name)
    }

    /// Overrides the cached driver name.
    pub fn set_driver_name(&self, name: &str) {
        self.driver_name.replace(Some(name.to_lowercase()));
    }

    /// Creates a statement handle for the given SQL and parameters.
    pub fn create_command(&self, sql: Option<&str>, params: &Params) -> Result<Command<'_>> {
        let mut command = Command::new(self);
        if let Some(sql) = sql {
            command.set_sql(sql);
        }
        command.bind_values(params)?;
        Ok(command)
    }

    /// Returns the SQL compiler bound to this connection.
    pub fn query_builder(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(self)
    }

    /// Row id of the most recent successful INSERT on this handle.
    pub fn last_insert_id(&self) -> Result<i64> {
        Ok(self.handle()?.last_insert_rowid())
    }

    /// Quotes a table name. Expressions in parentheses and templated names
    /// pass through; dotted names are quoted part by part.
    pub fn quote_table_name(&self, name: &str) -> String {
        if let Some(quoted) = self.quoted_tables.borrow().get(name) {
            return quoted.clone();
        }
        if (name.starts_with('(') && name.ends_with(')')) || name.contains("{{") {
            return name.to_string();
        }
        let quoted = name
            .split('.')
            .map(|part| self.quote_simple_table_name(part))
            .collect::<Vec<_>>()
            .join(".");
        self.quoted_tables
            .borrow_mut()
            .insert(name.to_string(), quoted.clone());
        quoted
    }

    /// Quotes a column name, including its table prefix when present.
    pub fn quote_column_name(&self, name: &str) -> String {
        if let Some(quoted) = self.quoted_columns.borrow().get(name) {
            return quoted.clone();
        }
        if name.contains('(') || name.contains("[[") {
            return name.to_string();
        }
        let (prefix, column) = match name.rfind('.') {
            Some(pos) => (
                format!("{}.", self.quote_table_name(&name[..pos])),
                &name[pos + 1..],
            ),
            None => (String::new(), name),
        };
        let quoted = if column.contains("{{") {
            format!("{}{}", prefix, column)
        } else {
            format!("{}{}", prefix, self.quote_simple_column_name(column))
        };
        self.quoted_columns
            .borrow_mut()
            .insert(name.to_string(), quoted.clone());
        quoted
    }

    /// Wraps a single table name part unless it is already quoted.
    pub fn quote_simple_table_name(&self, name: &str) -> String {
        let (start, end) = quote_pair(&self.config.table_quote);
        wrap_identifier(name, start, end)
    }

    /// Wraps a single column name part unless it is already quoted or `*`.
    pub fn quote_simple_column_name(&self, name: &str) -> String {
        if name == "*" {
            return name.to_string();
        }
        let (start, end) = quote_pair(&self.config.column_quote);
        wrap_identifier(name, start, end)
    }

    /// Splits `"table alias"` or `"table AS alias"` into its parts.
    pub fn extract_alias(&self, table: &str) -> Option<(String, String)> {
        ALIAS_RE
            .captures(table)
            .map(|caps| (caps[1].to_string(), caps[2].to_string()))
    }

    /// Rewrites `{{table}}` and `[[column]]` tokens into quoted identifiers.
    /// A `%` inside a table token becomes the configured table prefix.
    pub fn quote_sql(&self, sql: &str) -> String {
        TEMPLATE_RE
            .replace_all(sql, |caps: &Captures<'_>| {
                if let Some(column) = caps.get(3) {
                    return self.quote_column_name(column.as_str());
                }
                self.quote_table_name(&caps[2])
                    .replace('%', &self.config.table_prefix)
            })
            .into_owned()
    }

    /// Quotes a string for use as a SQL literal.
    ///
    /// SQLite's own `quote()` function does the escaping; if the handle
    /// cannot be used the value is escaped by hand.
    pub fn quote_value(&self, value: &str) -> String {
        let native = self.handle().and_then(|conn| {
            conn.prepare_cached("SELECT quote(?1)")
                .and_then(|mut stmt| stmt.query_row([value], |row| row.get::<_, String>(0)))
                .map_err(OtpgateError::from)
        });
        match native {
            Ok(quoted) => quoted,
            Err(e) => {
                debug!("Native quoting unavailable ({}), escaping manually", e);
                escape_literal(value)
            }
        }
    }

    /// Renders any value as a SQL literal. Only text goes through
    /// [`Connection::quote_value`]; other values pass through unchanged.
    pub fn quote_literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Real(r) => r.to_string(),
            Value::Text(s) => self.quote_value(s),
            Value::Blob(b) => {
                let hex: String = b.iter().map(|byte| format!("{:02X}", byte)).collect();
                format!("X'{}'", hex)
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("dsn", &self.config.dsn)
            .field("active", &self.is_active())
            .finish()
    }
}

fn quote_pair(spec: &str) -> (char, char) {
    let start = spec.chars().next().unwrap_or('`');
    let end = spec.chars().last().unwrap_or(start);
    (start, end)
}

fn wrap_identifier(name: &str, start: char, end: char) -> String {
    if name.contains(start) {
        name.to_string()
    } else {
        format!("{}{}{}", start, name, end)
    }
}

/// Manual literal escaping: doubles single quotes and backslash-escapes
/// NUL, newline, carriage return, backslash and SUB.
pub fn escape_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\0' => out.push_str("\\000"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            '\u{1a}' => out.push_str("\\032"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dsn: &str) -> DbConfig {
        DbConfig {
            dsn: dsn.to_string(),
            ..DbConfig::default()
        }
    }

    #[test]
    fn test_open_is_lazy_and_idempotent() {
        let conn = Connection::in_memory();
        assert!(!conn.is_active());

        conn.open().unwrap();
        assert!(conn.is_active());
        let first = conn.handle().unwrap() as *const rusqlite::Connection;
        conn.open().unwrap();
        let second = conn.handle().unwrap() as *const rusqlite::Connection;
        assert_eq!(first, second);
    }

    #[test]
    fn test_close_then_reopen() {
        let mut conn = Connection::in_memory();
        conn.open().unwrap();
        conn.close();
        assert!(!conn.is_active());
        conn.handle().unwrap();
        assert!(conn.is_active());
    }

    #[test]
    fn test_empty_dsn_is_a_connection_error() {
        let conn = Connection::new(config(""));
        match conn.open() {
            Err(OtpgateError::Connection(msg)) => assert!(msg.contains("dsn cannot be empty")),
            other => panic!("Expected Connection error, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_driver_and_bad_path() {
        let conn = Connection::new(config("mysql:host=localhost;dbname=x"));
        assert!(matches!(conn.open(), Err(OtpgateError::Connection(_))));

        let conn = Connection::new(config("sqlite:/nonexistent/path/database.db"));
        assert!(matches!(conn.open(), Err(OtpgateError::Connection(_))));
    }

    #[test]
    fn test_driver_name_from_dsn() {
        let conn = Connection::new(config("SQLite::memory:"));
        assert_eq!(conn.driver_name().unwrap(), "sqlite");
        assert!(!conn.is_active());
    }

    #[test]
    fn test_quote_table_and_column_names() {
        let conn = Connection::in_memory();
        assert_eq!(conn.quote_table_name("user"), "`user`");
        assert_eq!(conn.quote_table_name("main.user"), "`main`.`user`");
        assert_eq!(conn.quote_table_name("`user`"), "`user`");
        assert_eq!(conn.quote_table_name("(SELECT 1)"), "(SELECT 1)");
        assert_eq!(conn.quote_table_name("{{%user}}"), "{{%user}}");

        assert_eq!(conn.quote_column_name("id"), "`id`");
        assert_eq!(conn.quote_column_name("u.id"), "`u`.`id`");
        assert_eq!(conn.quote_column_name("COUNT(*)"), "COUNT(*)");
        assert_eq!(conn.quote_column_name("[[id]]"), "[[id]]");
        assert_eq!(conn.quote_column_name("u.*"), "`u`.*");
    }

    #[test]
    fn test_quoting_uses_configured_characters() {
        let conn = Connection::new(DbConfig {
            table_quote: "[]".to_string(),
            column_quote: "\"".to_string(),
            ..DbConfig::default()
        });
        assert_eq!(conn.quote_table_name("user"), "[user]");
        assert_eq!(conn.quote_column_name("id"), "\"id\"");
    }

    #[test]
    fn test_quote_sql_resolves_templates() {
        let conn = Connection::new(DbConfig {
            table_prefix: "tbl_".to_string(),
            ..DbConfig::default()
        });
        assert_eq!(
            conn.quote_sql("SELECT [[name]] FROM {{%user}} WHERE [[u.id]] = 1"),
            "SELECT `name` FROM `tbl_user` WHERE `u`.`id` = 1"
        );
    }

    #[test]
    fn test_extract_alias() {
        let conn = Connection::in_memory();
        assert_eq!(
            conn.extract_alias("user u"),
            Some(("user".to_string(), "u".to_string()))
        );
        assert_eq!(
            conn.extract_alias("user AS u"),
            Some(("user".to_string(), "u".to_string()))
        );
        assert_eq!(conn.extract_alias("user"), None);
    }

    #[test]
    fn test_quote_value_native_and_manual() {
        let conn = Connection::in_memory();
        assert_eq!(conn.quote_value("O'Brien"), "'O''Brien'");
        assert_eq!(escape_literal("O'Brien"), "'O''Brien'");
        assert_eq!(escape_literal("a\\b\nc"), "'a\\\\b\\nc'");

        // An unusable handle falls back to manual escaping.
        let broken = Connection::new(config(""));
        assert_eq!(broken.quote_value("it's"), "'it''s'");
    }

    #[test]
    fn test_quote_literal_passes_non_text_through() {
        let conn = Connection::in_memory();
        assert_eq!(conn.quote_literal(&Value::Integer(5)), "5");
        assert_eq!(conn.quote_literal(&Value::Null), "NULL");
        assert_eq!(conn.quote_literal(&Value::Blob(vec![0xAB, 0x01])), "X'AB01'");
        assert_eq!(conn.quote_literal(&Value::from("x")), "'x'");
    }

    #[test]
    fn test_pragmas_run_on_open() {
        let conn = Connection::new(DbConfig {
            pragmas: vec!["PRAGMA foreign_keys = ON".to_string()],
            ..DbConfig::default()
        });
        let enabled: i64 = conn
            .handle()
            .unwrap()
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }
}
