//! Attribute rules: formatters and validators.
//!
//! Both come from string-keyed registries filled once at startup. An unknown
//! key resolves to a no-op variant so that a typo in a rule list never
//! aborts validation.

use crate::core::db::{Condition, Connection, Query, Value};
use crate::core::model::Record;
use crate::core::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tracing::warn;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("invalid built-in email regex"));

static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{11,15}$").expect("invalid built-in phone regex"));

static FORMATTERS: Lazy<HashMap<&'static str, Formatter>> = Lazy::new(|| {
    HashMap::from([
        ("trim", Formatter::Trim),
        ("strtolower", Formatter::Lowercase),
        ("phone", Formatter::Phone),
    ])
});

static VALIDATORS: Lazy<HashMap<&'static str, Validator>> = Lazy::new(|| {
    HashMap::from([
        ("required", Validator::Required),
        ("email", Validator::Email),
        ("phone", Validator::Phone),
        ("unique", Validator::Unique),
    ])
});

/// Country code that replaces a leading local `0` in phone numbers.
pub const PHONE_COUNTRY_CODE: &str = "359";

/// A value transformation run before validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Formatter {
    Trim,
    Lowercase,
    /// Keeps digits only and maps a leading `0` to the country code
    Phone,
    Noop,
}

impl Formatter {
    /// Looks up a formatter by key; unknown keys give [`Formatter::Noop`].
    pub fn from_key(key: &str) -> Self {
        match FORMATTERS.get(key) {
            Some(formatter) => *formatter,
            None => {
                warn!("Unknown formatter '{}', leaving values unchanged", key);
                Formatter::Noop
            }
        }
    }

    /// Formats a value. NULL stays NULL; non-text values are formatted
    /// through their text form.
    pub fn format(self, value: Value) -> Value {
        if self == Formatter::Noop || value.is_null() {
            return value;
        }
        let text = value.to_string();
        Value::Text(match self {
            Formatter::Trim => text.trim().to_string(),
            Formatter::Lowercase => text.to_lowercase(),
            Formatter::Phone => format_phone(&text),
            Formatter::Noop => text,
        })
    }
}

fn format_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    match digits.strip_prefix('0') {
        Some(local) => format!("{}{}", PHONE_COUNTRY_CODE, local),
        None => digits,
    }
}

/// What a validator sees of the entity being checked.
pub struct ValidationContext<'a> {
    pub db: &'a Connection,
    pub table: &'a str,
    pub primary_key: &'a str,
    pub record: &'a Record,
    pub attribute: &'a str,
}

impl ValidationContext<'_> {
    pub fn value(&self) -> Value {
        self.record.value(self.attribute)
    }
}

/// An attribute check run after formatting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validator {
    /// Fails on NULL, empty text, `"0"` and zero
    Required,
    Email,
    /// 11 to 15 digits
    Phone,
    /// No other row of the table holds the same value
    Unique,
    Noop,
}

impl Validator {
    /// Looks up a validator by key; unknown keys give [`Validator::Noop`].
    pub fn from_key(key: &str) -> Self {
        match VALIDATORS.get(key) {
            Some(validator) => *validator,
            None => {
                warn!("Unknown validator '{}', treating it as always valid", key);
                Validator::Noop
            }
        }
    }

    /// Runs the check.
    pub fn validate(self, ctx: &ValidationContext<'_>) -> Result<bool> {
        let value = ctx.value();
        Ok(match self {
            Validator::Required => value.is_truthy(),
            Validator::Email => EMAIL_RE.is_match(&value.to_string()),
            Validator::Phone => PHONE_RE.is_match(&value.to_string()),
            Validator::Unique => is_unique(ctx, value)?,
            Validator::Noop => true,
        })
    }

    /// Message recorded when the check fails.
    pub fn message(self, attribute: &str) -> String {
        match self {
            Validator::Required => format!("{} is required", attribute),
            Validator::Email => "Invalid email".to_string(),
            Validator::Phone => "Invalid phone number".to_string(),
            Validator::Unique => format!("{} is already taken", attribute),
            Validator::Noop => String::new(),
        }
    }
}

fn is_unique(ctx: &ValidationContext<'_>, value: Value) -> Result<bool> {
    if value.is_null() {
        return Ok(true);
    }
    let mut query = Query::new()
        .from(ctx.table)
        .where_(Condition::eq(ctx.attribute, value));
    let own_key = ctx.record.value(ctx.primary_key);
    if !ctx.record.is_new_record() && !own_key.is_null() {
        query = query.and_where(Condition::simple("!=", ctx.primary_key, own_key));
    }
    Ok(query.count(ctx.db)? == 0)
}

/// Formatters and validators declared for one attribute
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub attribute: String,
    pub formatters: Vec<Formatter>,
    pub validators: Vec<Validator>,
}

impl Rule {
    pub fn new(attribute: &str) -> Self {
        Rule {
            attribute: attribute.to_string(),
            formatters: Vec::new(),
            validators: Vec::new(),
        }
    }

    /// Appends formatters by registry key.
    pub fn format<'k>(mut self, keys: impl IntoIterator<Item = &'k str>) -> Self {
        self.formatters.extend(keys.into_iter().map(Formatter::from_key));
        self
    }

    /// Appends validators by registry key.
    pub fn validate<'k>(mut self, keys: impl IntoIterator<Item = &'k str>) -> Self {
        self.validators.extend(keys.into_iter().map(Validator::from_key));
        self
    }
}
