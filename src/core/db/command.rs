/// Statement Handle Module
///
/// A `Command` owns one SQL text, its bound parameters and, once prepared,
/// the SQLite statement. Parameters are kept on the handle and bound to the
/// statement right before every run, so a handle can be executed again
/// after its values change.
use super::condition::Condition;
use super::connection::Connection;
use super::params::{Param, ParamKey, Params};
use super::reader::{DataReader, Row};
use super::value::{TypeHint, Value};
use crate::core::{OtpgateError, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;

static NAMED_PARAM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(:\w+)").expect("named parameter pattern"));

/// A statement bound to a connection
pub struct Command<'c> {
    db: &'c Connection,
    sql: String,
    params: Params,
    statement: Option<rusqlite::Statement<'c>>,
}

impl<'c> Command<'c> {
    pub fn new(db: &'c Connection) -> Self {
        Command {
            db,
            sql: String::new(),
            params: Params::new(),
            statement: None,
        }
    }

    /// The SQL text as it will be prepared.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Sets the SQL after resolving `{{table}}` and `[[column]]` tokens.
    /// Changing the text drops the prepared statement and every binding.
    pub fn set_sql(&mut self, sql: &str) -> &mut Self {
        let sql = self.db.quote_sql(sql);
        self.replace_sql(sql);
        self
    }

    /// Sets the SQL verbatim. Changing the text drops the prepared
    /// statement and every binding.
    pub fn set_raw_sql(&mut self, sql: &str) -> &mut Self {
        self.replace_sql(sql.to_string());
        self
    }

    fn replace_sql(&mut self, sql: String) {
        if sql != self.sql {
            self.cancel();
            self.reset();
            self.sql = sql;
        }
    }

    /// Drops the prepared statement.
    pub fn cancel(&mut self) {
        self.statement = None;
    }

    fn reset(&mut self) {
        self.sql.clear();
        self.params = Params::new();
    }

    /// Binds every entry of `values`. Typed entries keep their hint and are
    /// coerced when the statement runs.
    pub fn bind_values(&mut self, values: &Params) -> Result<&mut Self> {
        let mut merged = self.params.clone();
        merged.merge(values);
        merged.style()?;
        self.params = merged;
        Ok(self)
    }

    /// Binds a single named value.
    pub fn bind_value(&mut self, name: &str, value: impl Into<Value>, hint: Option<TypeHint>) -> Result<&mut Self> {
        let mut params = self.params.clone();
        params.set(
            ParamKey::named(name),
            Param {
                value: value.into(),
                hint,
            },
        );
        params.style()?;
        self.params = params;
        Ok(self)
    }

    /// Prepares the statement if it is not prepared yet.
    pub fn prepare(&mut self) -> Result<()> {
        if self.statement.is_some() || self.sql.is_empty() {
            return Ok(());
        }
        let statement = self
            .db
            .handle()?
            .prepare(&self.sql)
            .map_err(|e| OtpgateError::Prepare {
                sql: self.sql.clone(),
                message: e.to_string(),
            })?;
        self.statement = Some(statement);
        Ok(())
    }

    fn prepared(&mut self) -> Result<&mut rusqlite::Statement<'c>> {
        self.prepare()?;
        let sql = &self.sql;
        let statement = self.statement.as_mut().ok_or_else(|| OtpgateError::Prepare {
            sql: sql.clone(),
            message: "no SQL statement to prepare".to_string(),
        })?;
        for (key, param) in self.params.iter() {
            let index = match key {
                ParamKey::Positional(position) => Some(*position),
                ParamKey::Named(name) => statement.parameter_index(name)?,
            };
            match index {
                Some(index) => statement.raw_bind_parameter(index, param.resolved())?,
                None => debug!("Parameter {:?} does not occur in: {}", key, sql),
            }
        }
        Ok(statement)
    }

    fn log_failure(&self, message: &str) -> OtpgateError {
        let raw_sql = self.raw_sql();
        self.write_failure(message, &raw_sql);
        OtpgateError::Execute {
            sql: raw_sql,
            message: message.to_string(),
        }
    }

    fn write_failure(&self, message: &str, raw_sql: &str) {
        self.db
            .log_sink()
            .log(&format!("{}\nFailed to execute SQL: {}", message, raw_sql));
    }

    /// Logs a failed prepare or bind and turns it into the error to return.
    /// Prepare errors keep their variant.
    fn prepare_failure(&self, error: OtpgateError) -> OtpgateError {
        if let OtpgateError::Prepare { message, .. } = &error {
            self.write_failure(message, &self.raw_sql());
            return error;
        }
        self.log_failure(&error.to_string())
    }

    /// Runs a non-query statement.
    ///
    /// # Returns
    ///
    /// The last inserted row id when the statement changed at least one
    /// row, `None` otherwise. The id comes from the connection, so an UPDATE
    /// or DELETE reports whatever row was inserted last, not a row it touched.
    pub fn execute(&mut self) -> Result<Option<i64>> {
        let outcome = match self.prepared() {
            Ok(statement) => statement.raw_execute().map_err(|e| e.to_string()),
            Err(e) => return Err(self.prepare_failure(e)),
        };
        match outcome {
            Ok(changed) if changed > 0 => Ok(Some(self.db.last_insert_id()?)),
            Ok(_) => Ok(None),
            Err(message) => Err(self.log_failure(&message)),
        }
    }

    /// Runs the statement and returns a cursor over its rows.
    pub fn query(&mut self) -> Result<DataReader<'_>> {
        let raw_sql = self.raw_sql();
        let sink = self.db.log_sink().clone();
        if let Err(e) = self.prepared().map(|_| ()) {
            return Err(self.prepare_failure(e));
        }
        let statement = self
            .statement
            .as_mut()
            .ok_or_else(|| OtpgateError::query_build("statement is not prepared"))?;
        let columns = statement
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        Ok(DataReader::new(statement.raw_query(), columns, raw_sql, sink))
    }

    /// Every row of the result.
    pub fn query_all(&mut self) -> Result<Vec<Row>> {
        self.query()?.read_all()
    }

    /// The first row of the result, if any.
    pub fn query_one(&mut self) -> Result<Option<Row>> {
        self.query()?.read()
    }

    /// The first column of the first row. Large objects come back fully
    /// read as [`Value::Blob`].
    pub fn query_scalar(&mut self) -> Result<Option<Value>> {
        self.query()?.read_column(0)
    }

    /// The SQL with every placeholder replaced by its quoted value. Meant
    /// for diagnostics only.
    pub fn raw_sql(&self) -> String {
        if self.params.is_empty() {
            return self.sql.clone();
        }
        let positional = self
            .params
            .iter()
            .any(|(key, _)| matches!(key, ParamKey::Positional(_)));

        if !positional {
            return NAMED_PARAM_RE
                .replace_all(&self.sql, |caps: &Captures<'_>| {
                    let name = &caps[1];
                    match self.params.get(name) {
                        Some(_) => self.literal(&ParamKey::named(name)),
                        None => name.to_string(),
                    }
                })
                .into_owned();
        }

        let mut sql = String::with_capacity(self.sql.len());
        for (i, part) in self.sql.split('?').enumerate() {
            if i > 0 {
                sql.push_str(&self.literal(&ParamKey::Positional(i)));
            }
            sql.push_str(part);
        }
        sql
    }

    fn literal(&self, key: &ParamKey) -> String {
        self.params
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, param)| self.db.quote_literal(&param.resolved()))
            .unwrap_or_default()
    }

    /// Loads an INSERT for `table` into this handle.
    pub fn insert(&mut self, table: &str, columns: &[(String, Value)]) -> Result<&mut Self> {
        let mut params = Params::new();
        let sql = self.db.query_builder().insert(table, columns, &mut params);
        self.set_sql(&sql);
        self.bind_values(&params)
    }

    /// Loads an UPDATE for `table` into this handle.
    pub fn update(
        &mut self,
        table: &str,
        columns: &[(String, Value)],
        condition: Option<&Condition>,
        params: &Params,
    ) -> Result<&mut Self> {
        let mut params = params.clone();
        let sql = self
            .db
            .query_builder()
            .update(table, columns, condition, &mut params)?;
        self.set_sql(&sql);
        self.bind_values(&params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::log::MemorySink;
    use std::sync::Arc;

    fn setup(db: &Connection) {
        db.handle()
            .unwrap()
            .execute_batch("CREATE TABLE user (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE)")
            .unwrap();
    }

    #[test]
    fn test_execute_returns_last_insert_id() {
        let db = Connection::in_memory();
        setup(&db);
        let mut cmd = db
            .create_command(
                Some("INSERT INTO user (name) VALUES (:name)"),
                &Params::new().with("name", "a"),
            )
            .unwrap();
        assert_eq!(cmd.execute().unwrap(), Some(1));

        cmd.bind_value(":name", "b", None).unwrap();
        assert_eq!(cmd.execute().unwrap(), Some(2));

        let mut noop = db
            .create_command(Some("UPDATE user SET name = 'z' WHERE id = 99"), &Params::new())
            .unwrap();
        assert_eq!(noop.execute().unwrap(), None);
    }

    #[test]
    fn test_raw_sql_quotes_named_values() {
        let db = Connection::in_memory();
        let cmd = db
            .create_command(
                Some("SELECT * FROM user WHERE name = :name AND id = :id AND x = :missing"),
                &Params::new().with("name", "O'Brien").with("id", 3),
            )
            .unwrap();
        assert_eq!(
            cmd.raw_sql(),
            "SELECT * FROM user WHERE name = 'O''Brien' AND id = 3 AND x = :missing"
        );
    }

    #[test]
    fn test_raw_sql_positional() {
        let db = Connection::in_memory();
        let mut params = Params::new();
        params.push("a");
        params.push(Value::Null);
        let cmd = db
            .create_command(Some("SELECT * FROM user WHERE name = ? OR name IS ?"), &params)
            .unwrap();
        assert_eq!(cmd.raw_sql(), "SELECT * FROM user WHERE name = 'a' OR name IS NULL");
    }

    #[test]
    fn test_set_sql_resets_bindings() {
        let db = Connection::in_memory();
        setup(&db);
        let mut cmd = db
            .create_command(Some("SELECT * FROM user WHERE id = :id"), &Params::new().with("id", 1))
            .unwrap();
        cmd.prepare().unwrap();
        cmd.set_sql("SELECT * FROM {{user}} WHERE [[name]] = :name");

        assert_eq!(cmd.sql(), "SELECT * FROM `user` WHERE `name` = :name");
        assert!(cmd.params().is_empty());

        // Same text keeps the bindings.
        cmd.bind_value("name", "a", None).unwrap();
        cmd.set_sql("SELECT * FROM {{user}} WHERE [[name]] = :name");
        assert_eq!(cmd.params().len(), 1);
    }

    #[test]
    fn test_prepare_error_carries_sql() {
        let db = Connection::in_memory();
        let mut cmd = db.create_command(Some("SELEKT nonsense"), &Params::new()).unwrap();
        match cmd.prepare() {
            Err(OtpgateError::Prepare { sql, message }) => {
                assert_eq!(sql, "SELEKT nonsense");
                assert!(!message.is_empty());
            }
            other => panic!("Expected Prepare error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_prepare_failure_is_logged_and_kept() {
        let sink = Arc::new(MemorySink::new());
        let db = Connection::in_memory().with_log_sink(sink.clone());
        let err = db
            .create_command(Some("SELEKT nonsense"), &Params::new())
            .unwrap()
            .execute()
            .unwrap_err();
        assert!(matches!(err, OtpgateError::Prepare { .. }));

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("syntax error"));
        assert!(lines[0].ends_with("\nFailed to execute SQL: SELEKT nonsense"));
    }

    #[test]
    fn test_execute_failure_is_logged() {
        let sink = Arc::new(MemorySink::new());
        let db = Connection::in_memory().with_log_sink(sink.clone());
        setup(&db);
        let params = Params::new().with("name", "dup");
        db.create_command(Some("INSERT INTO user (name) VALUES (:name)"), &params)
            .unwrap()
            .execute()
            .unwrap();

        let err = db
            .create_command(Some("INSERT INTO user (name) VALUES (:name)"), &params)
            .unwrap()
            .execute()
            .unwrap_err();
        assert!(matches!(err, OtpgateError::Execute { .. }));

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("UNIQUE constraint failed"));
        assert!(lines[0].ends_with("\nFailed to execute SQL: INSERT INTO user (name) VALUES ('dup')"));
    }

    #[test]
    fn test_query_variants() {
        let db = Connection::in_memory();
        setup(&db);
        db.handle()
            .unwrap()
            .execute_batch("INSERT INTO user (name) VALUES ('a'), ('b')")
            .unwrap();

        let mut cmd = db
            .create_command(Some("SELECT name FROM user ORDER BY id"), &Params::new())
            .unwrap();
        assert_eq!(cmd.query_all().unwrap().len(), 2);
        assert_eq!(
            cmd.query_one().unwrap().unwrap().get("name"),
            Some(&Value::from("a"))
        );
        assert_eq!(cmd.query_scalar().unwrap(), Some(Value::from("a")));

        let mut count = db
            .create_command(Some("SELECT COUNT(*) FROM user WHERE name = ?"), &{
                let mut p = Params::new();
                p.push("b");
                p
            })
            .unwrap();
        assert_eq!(count.query_scalar().unwrap(), Some(Value::Integer(1)));
    }

    #[test]
    fn test_typed_values_are_coerced() {
        let db = Connection::in_memory();
        let mut params = Params::new();
        params.insert_typed("n", "42", TypeHint::Integer);
        let mut cmd = db
            .create_command(Some("SELECT typeof(:n), :n"), &params)
            .unwrap();
        let row = cmd.query_one().unwrap().unwrap();
        assert_eq!(row.get_index(0), Some(&Value::from("integer")));
        assert_eq!(row.get_index(1), Some(&Value::Integer(42)));
    }

    #[test]
    fn test_insert_and_update_helpers() {
        let db = Connection::in_memory();
        setup(&db);
        let mut cmd = Command::new(&db);
        let id = cmd
            .insert("user", &[("name".to_string(), Value::from("a"))])
            .unwrap()
            .execute()
            .unwrap();
        assert_eq!(id, Some(1));

        let mut cmd = Command::new(&db);
        cmd.update(
            "user",
            &[("name".to_string(), Value::from("b"))],
            Some(&Condition::eq("id", 1)),
            &Params::new(),
        )
        .unwrap()
        .execute()
        .unwrap();
        let name = db
            .create_command(Some("SELECT name FROM user WHERE id = 1"), &Params::new())
            .unwrap()
            .query_scalar()
            .unwrap();
        assert_eq!(name, Some(Value::from("b")));
    }
}
