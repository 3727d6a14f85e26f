/// Parameter Map Module
///
/// An insertion-ordered map of statement parameters. Keys are either
/// `:named` placeholders or 1-based `?` positions; a single statement must
/// use one style only.
use super::value::{TypeHint, Value};
use crate::core::{OtpgateError, Result};

/// Key of a bound parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamKey {
    /// `:name` placeholder, stored with its leading colon
    Named(String),
    /// 1-based `?` position
    Positional(usize),
}

impl ParamKey {
    /// Builds a named key, adding the `:` marker when missing.
    pub fn named(name: &str) -> Self {
        if name.starts_with(':') {
            ParamKey::Named(name.to_string())
        } else {
            ParamKey::Named(format!(":{}", name))
        }
    }
}

/// Placeholder style used by a parameter set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    Named,
    Positional,
}

/// A bound value plus its optional driver type hint
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub value: Value,
    pub hint: Option<TypeHint>,
}

impl Param {
    /// The value after applying the type hint.
    pub fn resolved(&self) -> Value {
        match self.hint {
            Some(hint) => hint.coerce(self.value.clone()),
            None => self.value.clone(),
        }
    }
}

/// Ordered parameter map
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: Vec<(ParamKey, Param)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fluent variant of [`Params::insert`].
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Sets a named parameter, replacing an existing entry of the same name.
    pub fn insert(&mut self, name: &str, value: impl Into<Value>) {
        self.set(
            ParamKey::named(name),
            Param {
                value: value.into(),
                hint: None,
            },
        );
    }

    /// Sets a named parameter carrying a type hint (a deferred bind pair).
    pub fn insert_typed(&mut self, name: &str, value: impl Into<Value>, hint: TypeHint) {
        self.set(
            ParamKey::named(name),
            Param {
                value: value.into(),
                hint: Some(hint),
            },
        );
    }

    /// Appends a positional parameter.
    pub fn push(&mut self, value: impl Into<Value>) {
        let position = self.positional_len() + 1;
        self.entries.push((
            ParamKey::Positional(position),
            Param {
                value: value.into(),
                hint: None,
            },
        ));
    }

    pub fn set(&mut self, key: ParamKey, param: Param) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = param,
            None => self.entries.push((key, param)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        let key = ParamKey::named(name);
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, p)| &p.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Merges `other` into `self`. Named entries of `other` win; positional
    /// entries are appended after the existing ones.
    pub fn merge(&mut self, other: &Params) {
        for (key, param) in &other.entries {
            match key {
                ParamKey::Named(_) => self.set(key.clone(), param.clone()),
                ParamKey::Positional(_) => {
                    let position = self.positional_len() + 1;
                    self.entries
                        .push((ParamKey::Positional(position), param.clone()));
                }
            }
        }
    }

    /// The placeholder style of this set; mixing styles is rejected.
    pub fn style(&self) -> Result<Option<ParamStyle>> {
        let named = self
            .entries
            .iter()
            .any(|(k, _)| matches!(k, ParamKey::Named(_)));
        let positional = self.positional_len() > 0;
        match (named, positional) {
            (true, true) => Err(OtpgateError::query_build(
                "positional and named parameters cannot be mixed in one statement",
            )),
            (true, false) => Ok(Some(ParamStyle::Named)),
            (false, true) => Ok(Some(ParamStyle::Positional)),
            (false, false) => Ok(None),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParamKey, &Param)> {
        self.entries.iter().map(|(k, p)| (k, p))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn positional_len(&self) -> usize {
        self.entries
            .iter()
            .filter(|(k, _)| matches!(k, ParamKey::Positional(_)))
            .count()
    }
}

impl<K: AsRef<str>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (name, value) in iter {
            params.insert(name.as_ref(), value);
        }
        params
    }
}
