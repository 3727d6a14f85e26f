/// Query Specification Module
///
/// A `Query` accumulates the clauses of a SELECT through fluent calls. The
/// terminal operations compile it with the [`QueryBuilder`], run it through
/// a [`Command`] and hydrate the fetched rows.
///
/// [`QueryBuilder`]: super::builder::QueryBuilder
use super::command::Command;
use super::condition::Condition;
use super::connection::Connection;
use super::params::Params;
use super::reader::Row;
use super::value::Value;
use crate::core::{OtpgateError, Result};
use std::collections::BTreeMap;
use std::marker::PhantomData;

/// Builds a value from one fetched row.
pub trait Hydrate: Sized {
    fn hydrate(row: Row) -> Result<Self>;
}

impl Hydrate for Row {
    fn hydrate(row: Row) -> Result<Self> {
        Ok(row)
    }
}

/// One entry of the select list
#[derive(Debug, Clone, PartialEq)]
pub struct SelectColumn {
    pub expr: String,
    /// Explicit alias; an inline `expr AS alias` is detected by the compiler
    pub alias: Option<String>,
}

/// A table in a FROM or JOIN clause
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(name: &str) -> Self {
        TableRef {
            name: name.trim().to_string(),
            alias: None,
        }
    }

    pub fn aliased(name: &str, alias: &str) -> Self {
        TableRef {
            name: name.trim().to_string(),
            alias: Some(alias.trim().to_string()),
        }
    }
}

/// A join clause: type, table and optional ON condition
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: String,
    pub table: TableRef,
    pub on: Option<Condition>,
}

impl Join {
    /// Parses `[type, table, on?]`.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let malformed = || {
            OtpgateError::query_build(
                "A join clause must be specified as an array of join type, join table, and optionally join condition.",
            )
        };
        let items = value.as_array().ok_or_else(malformed)?;
        let join_type = items.first().and_then(|v| v.as_str()).ok_or_else(malformed)?;
        let table = items.get(1).and_then(|v| v.as_str()).ok_or_else(malformed)?;
        let on = match items.get(2) {
            Some(on) => Some(Condition::from_json(on)?),
            None => None,
        };
        Ok(Join {
            join_type: join_type.to_string(),
            table: TableRef::new(table),
            on,
        })
    }
}

/// Sort direction of an ORDER BY column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// A declarative SELECT, hydrating rows into `E`
#[derive(Debug)]
pub struct Query<E = Row> {
    /// Verbatim SQL; when set the clause fields are ignored
    pub sql: Option<String>,
    pub select: Vec<SelectColumn>,
    pub select_option: Option<String>,
    pub distinct: bool,
    pub from: Vec<TableRef>,
    pub join: Vec<Join>,
    pub condition: Option<Condition>,
    pub group_by: Vec<String>,
    pub having: Option<Condition>,
    pub order_by: Vec<(String, SortOrder)>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub params: Params,
    /// Column whose value keys the result of [`Query::all_indexed`]
    pub index_by: Option<String>,
    target: PhantomData<fn() -> E>,
}

impl<E> Default for Query<E> {
    fn default() -> Self {
        Query {
            sql: None,
            select: Vec::new(),
            select_option: None,
            distinct: false,
            from: Vec::new(),
            join: Vec::new(),
            condition: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            params: Params::new(),
            index_by: None,
            target: PhantomData,
        }
    }
}

impl<E> Clone for Query<E> {
    fn clone(&self) -> Self {
        Query {
            sql: self.sql.clone(),
            select: self.select.clone(),
            select_option: self.select_option.clone(),
            distinct: self.distinct,
            from: self.from.clone(),
            join: self.join.clone(),
            condition: self.condition.clone(),
            group_by: self.group_by.clone(),
            having: self.having.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
            offset: self.offset,
            params: self.params.clone(),
            index_by: self.index_by.clone(),
            target: PhantomData,
        }
    }
}

impl Query<Row> {
    /// A query returning plain rows.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<E> Query<E> {
    /// A query that hydrates rows into `E`.
    pub fn of() -> Self {
        Self::default()
    }

    /// A query with verbatim SQL.
    pub fn from_sql(sql: &str, params: Params) -> Self {
        let mut query = Self::default();
        query.sql = Some(sql.to_string());
        query.params = params;
        query
    }

    /// Replaces the select list. Columns are separated by commas.
    pub fn select(mut self, columns: &str) -> Self {
        self.select = split_list(columns)
            .into_iter()
            .map(|expr| SelectColumn { expr, alias: None })
            .collect();
        self
    }

    /// Adds a column selected under an explicit alias.
    pub fn select_as(mut self, expr: &str, alias: &str) -> Self {
        self.select.push(SelectColumn {
            expr: expr.to_string(),
            alias: Some(alias.to_string()),
        });
        self
    }

    pub fn add_select(mut self, columns: &str) -> Self {
        self.select.extend(
            split_list(columns)
                .into_iter()
                .map(|expr| SelectColumn { expr, alias: None }),
        );
        self
    }

    /// Keyword inserted after `SELECT`, such as `SQL_CALC_FOUND_ROWS`.
    pub fn select_option(mut self, option: &str) -> Self {
        self.select_option = Some(option.to_string());
        self
    }

    pub fn distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    /// Replaces the FROM list. Tables are separated by commas and may carry
    /// an inline alias.
    pub fn from(mut self, tables: &str) -> Self {
        self.from = split_list(tables).iter().map(|t| TableRef::new(t)).collect();
        self
    }

    pub fn from_as(mut self, table: &str, alias: &str) -> Self {
        self.from.push(TableRef::aliased(table, alias));
        self
    }

    pub fn join(mut self, join_type: &str, table: &str, on: Option<Condition>) -> Self {
        self.join.push(Join {
            join_type: join_type.to_string(),
            table: TableRef::new(table),
            on,
        });
        self
    }

    pub fn inner_join(self, table: &str, on: Condition) -> Self {
        self.join("INNER JOIN", table, Some(on))
    }

    pub fn left_join(self, table: &str, on: Condition) -> Self {
        self.join("LEFT JOIN", table, Some(on))
    }

    /// Replaces the WHERE condition.
    pub fn where_(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Replaces the WHERE condition with its array/object form.
    pub fn where_json(self, condition: &serde_json::Value) -> Result<Self> {
        Ok(self.where_(Condition::from_json(condition)?))
    }

    /// ANDs a condition onto the current WHERE. An existing top-level AND
    /// conjunction is extended rather than nested.
    pub fn and_where(mut self, condition: Condition) -> Self {
        self.condition = Some(match self.condition.take() {
            None => condition,
            Some(mut current @ Condition::Conjunction { .. }) if is_and(&current) => {
                current.push(condition);
                current
            }
            Some(current) => Condition::and(vec![current, condition]),
        });
        self
    }

    pub fn or_where(mut self, condition: Condition) -> Self {
        self.condition = Some(match self.condition.take() {
            None => condition,
            Some(current) => Condition::or(vec![current, condition]),
        });
        self
    }

    pub fn group_by(mut self, columns: &str) -> Self {
        self.group_by = split_list(columns);
        self
    }

    pub fn having(mut self, condition: Condition) -> Self {
        self.having = Some(condition);
        self
    }

    /// Replaces the ORDER BY list.
    pub fn order_by(mut self, column: &str, order: SortOrder) -> Self {
        self.order_by = vec![(column.to_string(), order)];
        self
    }

    pub fn add_order_by(mut self, column: &str, order: SortOrder) -> Self {
        self.order_by.push((column.to_string(), order));
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Merges parameters into the accumulated set; later values win.
    pub fn add_params(mut self, params: &Params) -> Self {
        self.params.merge(params);
        self
    }

    pub fn bind(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(name, value);
        self
    }

    pub fn index_by(mut self, column: &str) -> Self {
        self.index_by = Some(column.to_string());
        self
    }

    /// Compiles the query into a statement bound to `db`.
    pub fn create_command<'c>(&self, db: &'c Connection) -> Result<Command<'c>> {
        let (sql, params) = db.query_builder().build(self, &Params::new())?;
        db.create_command(Some(&sql), &params)
    }

    /// Runs a scalar select over the same FROM/JOIN/WHERE/GROUP/HAVING.
    pub fn scalar(&self, db: &Connection, expr: &str) -> Result<Option<Value>> {
        let mut query = self.clone();
        query.select = vec![SelectColumn {
            expr: expr.to_string(),
            alias: None,
        }];
        query.order_by.clear();
        query.limit = None;
        query.offset = None;
        query.create_command(db)?.query_scalar()
    }

    /// Number of matching rows.
    pub fn count(&self, db: &Connection) -> Result<i64> {
        Ok(self
            .scalar(db, "COUNT(*)")?
            .and_then(|v| v.as_i64())
            .unwrap_or_default())
    }
}

impl<E: Hydrate> Query<E> {
    /// Every matching row, hydrated.
    pub fn all(&self, db: &Connection) -> Result<Vec<E>> {
        self.create_command(db)?
            .query_all()?
            .into_iter()
            .map(E::hydrate)
            .collect()
    }

    /// Every matching row keyed by the value of the `index_by` column.
    pub fn all_indexed(&self, db: &Connection) -> Result<BTreeMap<String, E>> {
        let column = self
            .index_by
            .as_deref()
            .ok_or_else(|| OtpgateError::query_build("index_by is not set"))?;
        let mut result = BTreeMap::new();
        for row in self.create_command(db)?.query_all()? {
            let key = row.get(column).map(Value::to_string).unwrap_or_default();
            result.insert(key, E::hydrate(row)?);
        }
        Ok(result)
    }

    /// The first matching row, if any.
    pub fn one(&self, db: &Connection) -> Result<Option<E>> {
        self.create_command(db)?
            .query_one()?
            .map(E::hydrate)
            .transpose()
    }
}

fn is_and(condition: &Condition) -> bool {
    matches!(condition, Condition::Conjunction { operator, .. } if operator == "AND")
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
