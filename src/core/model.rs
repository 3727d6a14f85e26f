//! Entity base.
//!
//! Every domain entity owns a [`Record`]: an ordered attribute map, the
//! new/existing flag and the per-attribute error map. The [`Model`] trait
//! supplies the lifecycle on top of it: loading, the formatting and
//! validation pipeline, and persistence through the query layer.

use crate::core::db::{Command, Condition, Connection, Hydrate, Params, Query, Row, Value};
use crate::core::rules::{Rule, ValidationContext};
use crate::core::{OtpgateError, Result};
use std::collections::HashMap;
use tracing::debug;

/// Attribute storage shared by all entities
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    attributes: Vec<(String, Value)>,
    is_new_record: bool,
    errors: Vec<(String, Vec<String>)>,
}

impl Record {
    /// A new record declaring `attributes` with their default values.
    pub fn new<I, K, V>(attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Record {
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            is_new_record: true,
            errors: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Owned value of an attribute; NULL when it is not declared.
    pub fn value(&self, name: &str) -> Value {
        self.get(name).cloned().unwrap_or_default()
    }

    /// Sets an attribute, declaring it if needed.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn attributes(&self) -> &[(String, Value)] {
        &self.attributes
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.attributes.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Copies the declared attributes out of `data`; declared attributes
    /// missing from `data` become NULL and undeclared keys are ignored.
    /// Empty data leaves the record untouched.
    pub fn load<I, K>(&mut self, data: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut data: HashMap<String, Value> =
            data.into_iter().map(|(k, v)| (k.into(), v)).collect();
        if data.is_empty() {
            return;
        }
        for (name, value) in self.attributes.iter_mut() {
            *value = data.remove(name.as_str()).unwrap_or_default();
        }
    }

    pub fn is_new_record(&self) -> bool {
        self.is_new_record
    }

    pub fn set_is_new_record(&mut self, is_new_record: bool) {
        self.is_new_record = is_new_record;
    }

    /// With `None`, whether any attribute has errors.
    pub fn has_errors(&self, attribute: Option<&str>) -> bool {
        match attribute {
            None => !self.errors.is_empty(),
            Some(attribute) => self.errors.iter().any(|(a, _)| a == attribute),
        }
    }

    pub fn errors(&self, attribute: &str) -> &[String] {
        self.errors
            .iter()
            .find(|(a, _)| a == attribute)
            .map(|(_, messages)| messages.as_slice())
            .unwrap_or_default()
    }

    /// Every attribute with its messages, in the order errors were added.
    pub fn all_errors(&self) -> &[(String, Vec<String>)] {
        &self.errors
    }

    pub fn add_error(&mut self, attribute: &str, message: impl Into<String>) {
        let message = message.into();
        match self.errors.iter_mut().find(|(a, _)| a == attribute) {
            Some(entry) => entry.1.push(message),
            None => self.errors.push((attribute.to_string(), vec![message])),
        }
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }
}

/// Outcome of an insert or update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    /// Validation failed; nothing was written
    Invalid,
    /// The statement ran. Carries the last inserted row id when rows
    /// changed.
    Saved(Option<i64>),
}

impl SaveResult {
    pub fn is_saved(&self) -> bool {
        matches!(self, SaveResult::Saved(_))
    }

    pub fn id(&self) -> Option<i64> {
        match self {
            SaveResult::Saved(id) => *id,
            SaveResult::Invalid => None,
        }
    }
}

/// The entity base every domain entity implements
pub trait Model: Sized {
    fn table_name() -> &'static str;

    fn primary_key() -> &'static str {
        "id"
    }

    /// A fresh entity with every attribute declared at its default.
    fn instantiate() -> Self;

    fn record(&self) -> &Record;

    fn record_mut(&mut self) -> &mut Record;

    /// Formatting and validation rules per attribute.
    fn rules() -> Vec<Rule> {
        Vec::new()
    }

    /// Attributes left out of [`Model::to_json`].
    fn private_attributes() -> &'static [&'static str] {
        &["password", "code"]
    }

    /// Called after validation and before the INSERT or UPDATE is built.
    fn before_save(&mut self, _db: &Connection, _is_new_record: bool) -> Result<()> {
        Ok(())
    }

    /// A query over this entity's table filtered by `condition`.
    fn find(condition: Condition) -> Query<Self> {
        Query::of().from(Self::table_name()).where_(condition)
    }

    /// [`Model::find`] with the array/object form of a condition.
    fn find_json(criteria: &serde_json::Value) -> Result<Query<Self>> {
        Query::of().from(Self::table_name()).where_json(criteria)
    }

    /// A query over this entity's whole table.
    fn find_all() -> Query<Self> {
        Query::of().from(Self::table_name())
    }

    /// A query running `sql` verbatim and hydrating into this entity.
    fn find_by_sql(sql: &str, params: Params) -> Query<Self> {
        Query::from_sql(sql, params)
    }

    /// An existing entity built from a fetched row.
    fn from_row(row: Row) -> Self {
        let mut model = Self::instantiate();
        model.record_mut().set_is_new_record(false);
        model.record_mut().load(row);
        model
    }

    fn load<I, K>(&mut self, data: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.record_mut().load(data);
    }

    /// Loads attributes from a JSON object.
    fn load_json(&mut self, data: &serde_json::Value) -> Result<()> {
        let object = data
            .as_object()
            .ok_or_else(|| OtpgateError::query_build("entity data must be a JSON object"))?;
        let mut pairs = Vec::with_capacity(object.len());
        for (name, value) in object {
            pairs.push((name.clone(), Value::from_json(value)?));
        }
        self.load(pairs);
        Ok(())
    }

    fn get(&self, name: &str) -> Value {
        self.record().value(name)
    }

    fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.record_mut().set(name, value);
    }

    fn is_new_record(&self) -> bool {
        self.record().is_new_record()
    }

    fn primary_key_value(&self) -> Value {
        self.get(Self::primary_key())
    }

    fn has_errors(&self, attribute: Option<&str>) -> bool {
        self.record().has_errors(attribute)
    }

    fn get_errors(&self, attribute: &str) -> Vec<String> {
        self.record().errors(attribute).to_vec()
    }

    fn add_error(&mut self, attribute: &str, message: &str) {
        self.record_mut().add_error(attribute, message);
    }

    /// Runs the formatting and validation pipeline.
    ///
    /// # Arguments
    ///
    /// * `db` - Connection used by validators that query the table.
    /// * `attributes` - Attributes to process; all declared ones when `None`.
    /// * `clear_errors` - Whether earlier errors are dropped first.
    ///
    /// # Returns
    ///
    /// `true` when no attribute has errors, including errors kept from
    /// earlier runs.
    fn validate(&mut self, db: &Connection, attributes: Option<&[&str]>, clear_errors: bool) -> Result<bool> {
        if clear_errors {
            self.record_mut().clear_errors();
        }
        let names = match attributes {
            Some(names) if !names.is_empty() => names.iter().map(|n| n.to_string()).collect(),
            _ => self.record().attribute_names(),
        };
        let rules = Self::rules();

        for name in &names {
            for rule in rules.iter().filter(|r| &r.attribute == name) {
                for formatter in &rule.formatters {
                    let value = formatter.format(self.record().value(name));
                    self.record_mut().set(name, value);
                }
                for validator in &rule.validators {
                    let passed = validator.validate(&ValidationContext {
                        db,
                        table: Self::table_name(),
                        primary_key: Self::primary_key(),
                        record: self.record(),
                        attribute: name,
                    })?;
                    if !passed {
                        self.record_mut().add_error(name, validator.message(name));
                    }
                }
            }
        }

        Ok(!self.record().has_errors(None))
    }

    /// Column values for a write: the record's attributes, with any
    /// override taking precedence per key.
    fn column_values(&self, overrides: Option<&[(String, Value)]>, skip_primary_key: bool) -> Vec<(String, Value)> {
        self.record()
            .attributes()
            .iter()
            .filter(|(name, _)| !(skip_primary_key && name == Self::primary_key()))
            .map(|(name, value)| {
                let value = overrides
                    .and_then(|o| o.iter().find(|(n, _)| n == name))
                    .map(|(_, v)| v.clone())
                    .unwrap_or_else(|| value.clone());
                (name.clone(), value)
            })
            .collect()
    }

    /// Inserts the entity as a new row and stores the generated key.
    fn insert(&mut self, db: &Connection, run_validation: bool, overrides: Option<&[(String, Value)]>) -> Result<SaveResult> {
        if run_validation && !self.validate(db, None, true)? {
            return Ok(SaveResult::Invalid);
        }
        self.before_save(db, true)?;

        let columns = self.column_values(overrides, false);
        let id = Command::new(db)
            .insert(Self::table_name(), &columns)?
            .execute()?;
        // Still new when no row was written.
        if let Some(id) = id {
            self.set(Self::primary_key(), id);
            self.record_mut().set_is_new_record(false);
        }
        debug!("Inserted into {}: {:?}", Self::table_name(), id);
        Ok(SaveResult::Saved(id))
    }

    /// Writes every attribute except the primary key back to the row with
    /// the current key.
    fn update(&mut self, db: &Connection, run_validation: bool, overrides: Option<&[(String, Value)]>) -> Result<SaveResult> {
        if run_validation && !self.validate(db, None, true)? {
            return Ok(SaveResult::Invalid);
        }
        self.before_save(db, false)?;

        let columns = self.column_values(overrides, true);
        let condition = Condition::eq(Self::primary_key(), self.primary_key_value());
        let outcome = Self::update_all(db, &columns, Some(&condition))?;
        Ok(SaveResult::Saved(outcome))
    }

    /// Runs an UPDATE over every row matching `condition`.
    fn update_all(db: &Connection, columns: &[(String, Value)], condition: Option<&Condition>) -> Result<Option<i64>> {
        Command::new(db)
            .update(Self::table_name(), columns, condition, &Params::new())?
            .execute()
    }

    /// Validates once, then inserts a new entity or updates an existing one.
    fn save(&mut self, db: &Connection) -> Result<bool> {
        if !self.validate(db, None, true)? {
            return Ok(false);
        }
        let result = if self.is_new_record() {
            self.insert(db, false, None)?
        } else {
            self.update(db, false, None)?
        };
        Ok(result.is_saved())
    }

    /// Public attributes as a JSON object.
    fn to_json(&self) -> serde_json::Value {
        let hidden = Self::private_attributes();
        let object = self
            .record()
            .attributes()
            .iter()
            .filter(|(name, _)| !hidden.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value_to_json(value)))
            .collect();
        serde_json::Value::Object(object)
    }
}

impl<M: Model> Hydrate for M {
    fn hydrate(row: Row) -> Result<Self> {
        Ok(M::from_row(row))
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Real(r) => serde_json::Value::from(*r),
        Value::Text(s) => serde_json::Value::from(s.as_str()),
        Value::Blob(b) => serde_json::Value::from(String::from_utf8_lossy(b).into_owned()),
    }
}
