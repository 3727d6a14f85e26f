/// SQL Compiler Module
///
/// Translates a [`Query`] specification into one parameterized SQL string
/// plus its parameter map, and generates INSERT/UPDATE statements for
/// entities. Every value the compiler emits is bound under a `:qpN`
/// placeholder; identifiers are quoted through the [`Connection`].
use super::condition::{Condition, ConditionWriter};
use super::connection::Connection;
use super::params::Params;
use super::query::{Join, Query, SelectColumn, SortOrder, TableRef};
use super::value::Value;
use crate::core::{OtpgateError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Prefix of every placeholder generated by the compiler.
pub const PARAM_PREFIX: &str = ":qp";

static SELECT_ALIAS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*?)(?i:\s+as\s+|\s+)([\w\-_\.]+)$").expect("select alias pattern"));

/// Allocates placeholders for one compile call.
struct Binder<'a, 'c> {
    db: &'c Connection,
    params: &'a mut Params,
    next: usize,
}

impl<'a, 'c> Binder<'a, 'c> {
    fn new(db: &'c Connection, params: &'a mut Params) -> Self {
        let next = params.len();
        Binder { db, params, next }
    }

    fn bind(&mut self, value: Value) -> String {
        loop {
            let name = format!("{}{}", PARAM_PREFIX, self.next);
            self.next += 1;
            if !self.params.contains(&name) {
                self.params.insert(&name, value);
                return name;
            }
        }
    }
}

impl ConditionWriter for Binder<'_, '_> {
    fn column(&mut self, name: &str) -> String {
        self.db.quote_column_name(name)
    }

    fn value(&mut self, value: &Value) -> String {
        self.bind(value.clone())
    }
}

/// The SQL compiler bound to a connection
#[derive(Debug, Clone, Copy)]
pub struct QueryBuilder<'c> {
    db: &'c Connection,
    separator: &'static str,
}

impl<'c> QueryBuilder<'c> {
    pub fn new(db: &'c Connection) -> Self {
        QueryBuilder { db, separator: " " }
    }

    /// Compiles `query` into SQL and parameters.
    ///
    /// # Arguments
    ///
    /// * `query` - The query specification.
    /// * `params` - Extra parameters; the query's own parameters
    ///   win on a name clash.
    ///
    /// # Returns
    ///
    /// The SQL text and the merged parameter map, or a `QueryBuild` error
    /// for malformed joins, unknown operators or mixed parameter styles.
    pub fn build<E>(&self, query: &Query<E>, params: &Params) -> Result<(String, Params)> {
        let mut params = params.clone();
        params.merge(&query.params);

        if let Some(sql) = &query.sql {
            params.style()?;
            return Ok((sql.clone(), params));
        }

        let clauses = [
            self.build_select(&query.select, query.distinct, query.select_option.as_deref()),
            self.build_from(&query.from),
            self.build_join(&query.join, &mut params)?,
            self.build_where(query.condition.as_ref(), &mut params)?,
            self.build_group_by(&query.group_by),
            self.build_having(query.having.as_ref(), &mut params)?,
        ];
        let sql = clauses
            .into_iter()
            .filter(|clause| !clause.is_empty())
            .collect::<Vec<_>>()
            .join(self.separator);
        let sql = self.build_order_by_and_limit(sql, &query.order_by, query.limit, query.offset);

        params.style()?;
        debug!("Compiled query: {}", sql);
        Ok((sql, params))
    }

    pub fn build_select(&self, columns: &[SelectColumn], distinct: bool, option: Option<&str>) -> String {
        let mut select = String::from(if distinct { "SELECT DISTINCT" } else { "SELECT" });
        if let Some(option) = option {
            select.push(' ');
            select.push_str(option);
        }
        if columns.is_empty() {
            return select + " *";
        }

        let columns: Vec<String> = columns
            .iter()
            .map(|column| self.select_column(column))
            .collect();
        format!("{} {}", select, columns.join(", "))
    }

    fn select_column(&self, column: &SelectColumn) -> String {
        let expr = column.expr.as_str();
        if let Some(alias) = column.alias.as_deref().filter(|a| *a != expr) {
            let expr = if expr.contains('(') {
                expr.to_string()
            } else {
                self.db.quote_column_name(expr)
            };
            return format!("{} AS {}", expr, self.db.quote_column_name(alias));
        }
        if expr.contains('(') {
            return expr.to_string();
        }
        match SELECT_ALIAS_RE.captures(expr) {
            Some(caps) => format!(
                "{} AS {}",
                self.db.quote_column_name(&caps[1]),
                self.db.quote_column_name(&caps[2])
            ),
            None => self.db.quote_column_name(expr),
        }
    }

    pub fn build_from(&self, tables: &[TableRef]) -> String {
        if tables.is_empty() {
            return String::new();
        }
        let tables: Vec<String> = tables.iter().map(|t| self.quote_table_ref(t)).collect();
        format!("FROM {}", tables.join(", "))
    }

    fn quote_table_ref(&self, table: &TableRef) -> String {
        let name = table.name.as_str();
        if let Some(alias) = &table.alias {
            let name = if name.contains('(') {
                name.to_string()
            } else {
                self.db.quote_table_name(name)
            };
            return format!("{} {}", name, self.db.quote_table_name(alias));
        }
        if name.contains('(') {
            return name.to_string();
        }
        match self.db.extract_alias(name) {
            Some((table, alias)) => format!(
                "{} {}",
                self.db.quote_table_name(&table),
                self.db.quote_table_name(&alias)
            ),
            None => self.db.quote_table_name(name),
        }
    }

    pub fn build_join(&self, joins: &[Join], params: &mut Params) -> Result<String> {
        let mut parts = Vec::with_capacity(joins.len());
        for join in joins {
            if join.join_type.trim().is_empty() || join.table.name.is_empty() {
                return Err(OtpgateError::query_build(
                    "A join clause must be specified as an array of join type, join table, and optionally join condition.",
                ));
            }
            let mut sql = format!("{} {}", join.join_type, self.quote_table_ref(&join.table));
            if let Some(on) = &join.on {
                let condition = self.build_condition(on, params)?;
                if !condition.is_empty() {
                    sql.push_str(" ON ");
                    sql.push_str(&condition);
                }
            }
            parts.push(sql);
        }
        Ok(parts.join(self.separator))
    }

    pub fn build_where(&self, condition: Option<&Condition>, params: &mut Params) -> Result<String> {
        self.prefixed("WHERE", condition, params)
    }

    pub fn build_group_by(&self, columns: &[String]) -> String {
        if columns.is_empty() {
            return String::new();
        }
        let columns: Vec<String> = columns
            .iter()
            .map(|c| {
                if c.contains('(') {
                    c.clone()
                } else {
                    self.db.quote_column_name(c)
                }
            })
            .collect();
        format!("GROUP BY {}", columns.join(", "))
    }

    pub fn build_having(&self, condition: Option<&Condition>, params: &mut Params) -> Result<String> {
        self.prefixed("HAVING", condition, params)
    }

    fn prefixed(&self, keyword: &str, condition: Option<&Condition>, params: &mut Params) -> Result<String> {
        let sql = match condition {
            Some(condition) => self.build_condition(condition, params)?,
            None => String::new(),
        };
        Ok(if sql.is_empty() {
            sql
        } else {
            format!("{} {}", keyword, sql)
        })
    }

    /// Appends ORDER BY and LIMIT/OFFSET to already joined clauses.
    pub fn build_order_by_and_limit(
        &self,
        mut sql: String,
        order_by: &[(String, SortOrder)],
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> String {
        let order_by = self.build_order_by(order_by);
        if !order_by.is_empty() {
            sql.push_str(self.separator);
            sql.push_str(&order_by);
        }
        let limit = self.build_limit(limit, offset);
        if !limit.is_empty() {
            sql.push_str(self.separator);
            sql.push_str(&limit);
        }
        sql
    }

    pub fn build_order_by(&self, columns: &[(String, SortOrder)]) -> String {
        if columns.is_empty() {
            return String::new();
        }
        let orders: Vec<String> = columns
            .iter()
            .map(|(name, order)| {
                let suffix = if *order == SortOrder::Desc { " DESC" } else { "" };
                format!("{}{}", self.db.quote_column_name(name), suffix)
            })
            .collect();
        format!("ORDER BY {}", orders.join(", "))
    }

    /// `LIMIT n` for any non-negative limit; `OFFSET n` only for positive
    /// offsets. SQLite needs a LIMIT before OFFSET, so a lone offset gets
    /// `LIMIT -1`.
    pub fn build_limit(&self, limit: Option<i64>, offset: Option<i64>) -> String {
        let limit = limit.filter(|l| *l >= 0);
        let offset = offset.filter(|o| *o > 0);
        match (limit, offset) {
            (Some(limit), Some(offset)) => format!("LIMIT {} OFFSET {}", limit, offset),
            (Some(limit), None) => format!("LIMIT {}", limit),
            (None, Some(offset)) => format!("LIMIT -1 OFFSET {}", offset),
            (None, None) => String::new(),
        }
    }

    /// Compiles a condition, binding its values into `params`.
    pub fn build_condition(&self, condition: &Condition, params: &mut Params) -> Result<String> {
        if condition.is_empty() {
            return Ok(String::new());
        }
        condition.validate()?;
        Ok(condition.write(&mut Binder::new(self.db, params)))
    }

    /// `INSERT INTO t (cols) VALUES (placeholders)`. NULL columns are left
    /// out; with nothing left the row is inserted with default values.
    pub fn insert(&self, table: &str, columns: &[(String, Value)], params: &mut Params) -> String {
        let mut binder = Binder::new(self.db, params);
        let (names, placeholders): (Vec<String>, Vec<String>) = columns
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(name, value)| (self.db.quote_column_name(name), binder.bind(value.clone())))
            .unzip();

        let table = self.db.quote_table_name(table);
        if names.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", table)
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                names.join(", "),
                placeholders.join(", ")
            )
        }
    }

    /// `UPDATE t SET c=:qpN, ... [WHERE ...]`
    pub fn update(
        &self,
        table: &str,
        columns: &[(String, Value)],
        condition: Option<&Condition>,
        params: &mut Params,
    ) -> Result<String> {
        if columns.is_empty() {
            return Err(OtpgateError::query_build(format!(
                "Nothing to update in table '{}'",
                table
            )));
        }
        let sets: Vec<String> = {
            let mut binder = Binder::new(self.db, params);
            columns
                .iter()
                .map(|(name, value)| {
                    format!("{}={}", self.db.quote_column_name(name), binder.bind(value.clone()))
                })
                .collect()
        };
        let sql = format!("UPDATE {} SET {}", self.db.quote_table_name(table), sets.join(", "));
        let filter = self.build_where(condition, params)?;
        Ok(if filter.is_empty() {
            sql
        } else {
            format!("{} {}", sql, filter)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_hash_where() {
        let db = Connection::in_memory();
        let query: Query = Query::new().from("user").where_(Condition::eq("id", 5));
        let (sql, params) = db.query_builder().build(&query, &Params::new()).unwrap();

        assert_eq!(sql, "SELECT * FROM `user` WHERE `id` = :qp0");
        assert_eq!(params.get(":qp0"), Some(&Value::Integer(5)));
    }

    #[test]
    fn test_compile_twice_gives_independent_params() {
        let db = Connection::in_memory();
        let builder = db.query_builder();
        let first: Query = Query::new().from("user").where_(Condition::eq("id", 5));
        let second: Query = Query::new().from("user").where_(Condition::eq("id", 6));

        let (_, p1) = builder.build(&first, &Params::new()).unwrap();
        let (_, p2) = builder.build(&second, &Params::new()).unwrap();
        assert_eq!(p1.get(":qp0"), Some(&Value::Integer(5)));
        assert_eq!(p2.get(":qp0"), Some(&Value::Integer(6)));
        assert_eq!(p1.len(), 1);
    }

    #[test]
    fn test_empty_leading_condition_is_dropped() {
        let db = Connection::in_memory();
        let query: Query = Query::new()
            .from("user")
            .where_(Condition::hash(Vec::<(String, Value)>::new()))
            .and_where(Condition::simple("=", "phone", "1"));
        let (sql, params) = db.query_builder().build(&query, &Params::new()).unwrap();

        assert_eq!(sql, "SELECT * FROM `user` WHERE `phone` = :qp0");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_placeholders_skip_existing_names() {
        let db = Connection::in_memory();
        let query: Query = Query::new()
            .from("user")
            .where_(Condition::hash([("a", 1), ("b", 2)]))
            .bind(":qp1", "taken");
        let (sql, params) = db.query_builder().build(&query, &Params::new()).unwrap();

        assert_eq!(sql, "SELECT * FROM `user` WHERE `a` = :qp2 AND `b` = :qp3");
        assert_eq!(params.get(":qp1"), Some(&Value::from("taken")));
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_select_columns_and_aliases() {
        let db = Connection::in_memory();
        let builder = db.query_builder();
        let query: Query = Query::new()
            .select("id, email AS mail, u.phone p, COUNT(*)")
            .select_as("MAX(id)", "top");
        assert_eq!(
            builder.build_select(&query.select, true, None),
            "SELECT DISTINCT `id`, `email` AS `mail`, `u`.`phone` AS `p`, COUNT(*), MAX(id) AS `top`"
        );
        assert_eq!(builder.build_select(&[], false, Some("ALL")), "SELECT ALL *");
    }

    #[test]
    fn test_from_and_join() {
        let db = Connection::in_memory();
        let query: Query = Query::new()
            .from("user u, (SELECT 1) AS one")
            .left_join("otp_codes o", Condition::raw("o.user_id = u.id"))
            .where_(Condition::simple(">", "o.created_at", "2024-01-01 00:00:00"));
        let (sql, _) = db.query_builder().build(&query, &Params::new()).unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM `user` `u`, (SELECT 1) AS one LEFT JOIN `otp_codes` `o` ON o.user_id = u.id WHERE `o`.`created_at` > :qp0"
        );
    }

    #[test]
    fn test_malformed_join_fails() {
        let db = Connection::in_memory();
        let query: Query = Query::new().from("user").join("", "otp_codes", None);
        let err = db.query_builder().build(&query, &Params::new()).unwrap_err();
        assert!(matches!(err, OtpgateError::QueryBuild(_)));
    }

    #[test]
    fn test_order_by_limit_offset() {
        let db = Connection::in_memory();
        let builder = db.query_builder();
        assert_eq!(
            builder.build_order_by(&[("id".to_string(), SortOrder::Desc)]),
            "ORDER BY `id` DESC"
        );
        assert_eq!(builder.build_limit(None, None), "");
        assert_eq!(builder.build_limit(Some(0), Some(0)), "LIMIT 0");
        assert_eq!(builder.build_limit(Some(10), Some(20)), "LIMIT 10 OFFSET 20");
        assert_eq!(builder.build_limit(Some(-1), None), "");
        assert_eq!(builder.build_limit(None, Some(5)), "LIMIT -1 OFFSET 5");
    }

    #[test]
    fn test_group_by_having() {
        let db = Connection::in_memory();
        let query: Query = Query::new()
            .select("user_id, COUNT(*) AS n")
            .from("validation_attempts")
            .group_by("user_id")
            .having(Condition::simple(">=", "COUNT(*)", 3));
        let (sql, params) = db.query_builder().build(&query, &Params::new()).unwrap();
        assert_eq!(
            sql,
            "SELECT `user_id`, COUNT(*) AS n FROM `validation_attempts` GROUP BY `user_id` HAVING COUNT(*) >= :qp0"
        );
        assert_eq!(params.get(":qp0"), Some(&Value::Integer(3)));
    }

    #[test]
    fn test_insert_skips_nulls_and_defaults() {
        let db = Connection::in_memory();
        let builder = db.query_builder();
        let mut params = Params::new();
        let sql = builder.insert(
            "user",
            &[
                ("id".to_string(), Value::Null),
                ("email".to_string(), Value::from("a@x.io")),
                ("validated".to_string(), Value::Integer(0)),
            ],
            &mut params,
        );
        assert_eq!(sql, "INSERT INTO `user` (`email`, `validated`) VALUES (:qp0, :qp1)");
        assert_eq!(params.len(), 2);

        let mut params = Params::new();
        let sql = builder.insert("user", &[("id".to_string(), Value::Null)], &mut params);
        assert_eq!(sql, "INSERT INTO `user` DEFAULT VALUES");
        assert!(params.is_empty());
    }

    #[test]
    fn test_update_with_condition() {
        let db = Connection::in_memory();
        let mut params = Params::new();
        let sql = db
            .query_builder()
            .update(
                "user",
                &[
                    ("email".to_string(), Value::from("b@x.io")),
                    ("phone".to_string(), Value::Null),
                ],
                Some(&Condition::eq("id", 3)),
                &mut params,
            )
            .unwrap();
        assert_eq!(sql, "UPDATE `user` SET `email`=:qp0, `phone`=:qp1 WHERE `id` = :qp2");
        assert_eq!(params.get(":qp2"), Some(&Value::Integer(3)));

        let err = db.query_builder().update("user", &[], None, &mut Params::new());
        assert!(err.is_err());
    }

    #[test]
    fn test_mixed_parameter_styles_fail() {
        let db = Connection::in_memory();
        let mut positional = Params::new();
        positional.push(1);
        let query: Query = Query::new().from("user").where_(Condition::eq("id", 5));
        let err = db.query_builder().build(&query, &positional).unwrap_err();
        assert!(matches!(err, OtpgateError::QueryBuild(_)));
    }

    #[test]
    fn test_compiled_sql_snapshot() {
        let db = Connection::in_memory();
        let query: Query = Query::new()
            .from("otp_codes")
            .where_(Condition::eq("user_id", 1))
            .and_where(Condition::simple(">", "created_at", "2024-01-01 00:00:00"))
            .order_by("id", SortOrder::Desc)
            .limit(1);
        let (sql, _) = db.query_builder().build(&query, &Params::new()).unwrap();
        insta::assert_snapshot!(sql, @"SELECT * FROM `otp_codes` WHERE `user_id` = :qp0 AND `created_at` > :qp1 ORDER BY `id` DESC LIMIT 1");
    }
}
