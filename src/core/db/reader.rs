/// Result Cursor Module
///
/// [`DataReader`] walks a result set once, front to back. [`Row`] is the
/// owned, column-ordered form every fetched row is copied into.
use super::value::Value;
use crate::core::log::LogSink;
use crate::core::{OtpgateError, Result};
use std::sync::Arc;
use tracing::debug;

/// One fetched row, columns in select order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of the named column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index).map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(c, _)| c.as_str())
    }

    pub fn push(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.values.push((column.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(c, v)| (c.as_str(), v))
    }

    fn from_sqlite(row: &rusqlite::Row<'_>, columns: &[String]) -> rusqlite::Result<Self> {
        let mut values = Vec::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            values.push((column.clone(), Value::from_ref(row.get_ref(i)?)));
        }
        Ok(Row { values })
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Row {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// A forward-only cursor over a statement's result set
pub struct DataReader<'s> {
    rows: Option<rusqlite::Rows<'s>>,
    columns: Vec<String>,
    current: Option<Row>,
    index: Option<usize>,
    closed: bool,
    raw_sql: String,
    log_sink: Arc<dyn LogSink>,
}

impl<'s> DataReader<'s> {
    pub(crate) fn new(
        rows: rusqlite::Rows<'s>,
        columns: Vec<String>,
        raw_sql: String,
        log_sink: Arc<dyn LogSink>,
    ) -> Self {
        DataReader {
            rows: Some(rows),
            columns,
            current: None,
            index: None,
            closed: false,
            raw_sql,
            log_sink,
        }
    }

    fn fetch(&mut self) -> Result<Option<Row>> {
        let Some(rows) = self.rows.as_mut() else {
            return Ok(None);
        };
        let fetched = match rows.next() {
            Ok(Some(row)) => Row::from_sqlite(row, &self.columns).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        fetched.map_err(|e| {
            let message = e.to_string();
            self.log_sink
                .log(&format!("{}\nFailed to execute SQL: {}", message, self.raw_sql));
            OtpgateError::Execute {
                sql: self.raw_sql.clone(),
                message,
            }
        })
    }

    /// Fetches the next row without moving the iteration position.
    pub fn read(&mut self) -> Result<Option<Row>> {
        self.fetch()
    }

    /// Fetches every remaining row.
    pub fn read_all(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Value of column `index` in the next row.
    pub fn read_column(&mut self, index: usize) -> Result<Option<Value>> {
        Ok(self.fetch()?.and_then(|row| row.get_index(index).cloned()))
    }

    /// Positions the cursor on the first row. Only legal before iteration
    /// has started.
    pub fn rewind(&mut self) -> Result<()> {
        if self.index.is_some() {
            return Err(OtpgateError::NotSeekable);
        }
        self.current = self.fetch()?;
        self.index = Some(0);
        Ok(())
    }

    /// Moves to the next row.
    pub fn advance(&mut self) -> Result<()> {
        self.current = self.fetch()?;
        self.index = Some(self.index.map_or(0, |i| i + 1));
        Ok(())
    }

    /// Whether the last fetch produced a row.
    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    pub fn current(&self) -> Option<&Row> {
        self.current.as_ref()
    }

    /// Zero-based position of the current row.
    pub fn key(&self) -> Option<usize> {
        self.index
    }

    /// SQLite does not report the size of a result set.
    pub fn row_count(&self) -> Option<usize> {
        None
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Releases the cursor; later reads return nothing.
    pub fn close(&mut self) {
        self.rows = None;
        self.current = None;
        self.closed = true;
        debug!("Closed reader for: {}", self.raw_sql);
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Iterator for DataReader<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.fetch().transpose()
    }
}
