/// Condition Expression Module
///
/// A closed set of predicate shapes used by WHERE and HAVING clauses. A
/// condition never quotes identifiers or binds parameters on its own; it
/// hands every column and value to a [`ConditionWriter`], so the same tree
/// can be compiled into parameterized SQL or rendered as a literal string.
use super::connection::Connection;
use super::value::Value;
use crate::core::{OtpgateError, Result};
use serde_json::Value as Json;

/// Operator tokens accepted in the array form of a condition.
pub const OPERATORS: &[&str] = &[
    "AND", "OR", "=", "!=", "<>", "<", ">", "<=", ">=", "LIKE", "NOT LIKE",
];

/// A predicate tree
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `column = value` for every pair, joined with `AND`
    Hash(Vec<(String, Value)>),
    /// `column <operator> value`
    Simple {
        column: String,
        operator: String,
        value: Value,
    },
    /// `<connective> column <sign> value`, a comparison that continues a
    /// conjunction
    Compare {
        connective: String,
        column: String,
        sign: String,
        value: Value,
    },
    /// Operands joined by a connective
    Conjunction {
        operator: String,
        operands: Vec<Condition>,
    },
    /// Pre-built SQL inserted verbatim
    Raw(String),
}

/// Receives the columns and values of a condition while it is written out.
pub trait ConditionWriter {
    fn column(&mut self, name: &str) -> String;
    fn value(&mut self, value: &Value) -> String;
}

/// Writes columns as given and values as quoted literals.
struct LiteralWriter<'c> {
    db: &'c Connection,
}

impl ConditionWriter for LiteralWriter<'_> {
    fn column(&mut self, name: &str) -> String {
        name.to_string()
    }

    fn value(&mut self, value: &Value) -> String {
        self.db.quote_literal(value)
    }
}

impl Condition {
    /// Equality on every `(column, value)` pair.
    pub fn hash<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Condition::Hash(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Single-column equality.
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Condition::hash([(column, value)])
    }

    /// `column <operator> value`
    pub fn simple(operator: &str, column: &str, value: impl Into<Value>) -> Self {
        Condition::Simple {
            column: column.to_string(),
            operator: operator.trim().to_uppercase(),
            value: value.into(),
        }
    }

    /// A comparison prefixed by the connective that attaches it.
    pub fn compare(connective: &str, column: &str, sign: &str, value: impl Into<Value>) -> Self {
        Condition::Compare {
            connective: connective.trim().to_uppercase(),
            column: column.to_string(),
            sign: sign.trim().to_uppercase(),
            value: value.into(),
        }
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Condition::Raw(sql.into())
    }

    pub fn and(operands: Vec<Condition>) -> Self {
        Condition::conjunction("AND", operands)
    }

    pub fn or(operands: Vec<Condition>) -> Self {
        Condition::conjunction("OR", operands)
    }

    /// Joins `operands` with `operator`. Every simple comparison after the
    /// first operand becomes a compare condition carrying the connective.
    pub fn conjunction(operator: &str, operands: Vec<Condition>) -> Self {
        let operator = operator.trim().to_uppercase();
        let operands = operands
            .into_iter()
            .enumerate()
            .map(|(i, operand)| if i == 0 { operand } else { operand.attach(&operator) })
            .collect();
        Condition::Conjunction { operator, operands }
    }

    /// Adds one more operand to a conjunction.
    pub fn push(&mut self, operand: Condition) {
        if let Condition::Conjunction { operator, operands } = self {
            let operand = if operands.is_empty() {
                operand
            } else {
                operand.attach(operator)
            };
            operands.push(operand);
        }
    }

    fn attach(self, connective: &str) -> Self {
        match self {
            Condition::Simple {
                column,
                operator,
                value,
            } => Condition::Compare {
                connective: connective.to_string(),
                column,
                sign: operator,
                value,
            },
            other => other,
        }
    }

    /// Parses the array/object form of a condition.
    ///
    /// * `{"col": val, ...}` is a hash condition.
    /// * `[op, col, val]` is a simple condition.
    /// * `[op, operand, ...]` with array or object operands is a conjunction;
    ///   `[sign, col, val]` operands become compare conditions.
    /// * A JSON string is raw SQL.
    pub fn from_json(value: &Json) -> Result<Self> {
        match value {
            Json::Object(map) => {
                let mut pairs = Vec::with_capacity(map.len());
                for (column, v) in map {
                    pairs.push((column.clone(), Value::from_json(v)?));
                }
                Ok(Condition::Hash(pairs))
            }
            Json::Array(items) => Self::from_operator_form(items),
            Json::String(sql) => Ok(Condition::Raw(sql.clone())),
            Json::Null => Ok(Condition::Hash(Vec::new())),
            other => Err(OtpgateError::query_build(format!(
                "Unsupported condition: {}",
                other
            ))),
        }
    }

    fn from_operator_form(items: &[Json]) -> Result<Self> {
        let Some((first, operands)) = items.split_first() else {
            return Ok(Condition::Hash(Vec::new()));
        };
        let operator = match first {
            Json::String(op) => normalize_operator(op)?,
            other => {
                return Err(OtpgateError::query_build(format!(
                    "Condition operator must be a string, got {}",
                    other
                )))
            }
        };

        let nested = operands
            .first()
            .is_some_and(|o| o.is_array() || o.is_object());
        if !nested {
            return Self::simple_from_operands(&operator, operands);
        }

        let mut parsed = Vec::with_capacity(operands.len());
        for operand in operands {
            parsed.push(Self::operand_from_json(operand)?);
        }
        Ok(Condition::conjunction(&operator, parsed))
    }

    fn simple_from_operands(operator: &str, operands: &[Json]) -> Result<Self> {
        if operands.len() != 2 {
            return Err(OtpgateError::query_build(format!(
                "Operator '{}' requires two operands.",
                operator
            )));
        }
        let column = operands[0].as_str().ok_or_else(|| {
            OtpgateError::query_build(format!(
                "Operator '{}' expects a column name as its first operand.",
                operator
            ))
        })?;
        Ok(Condition::simple(operator, column, Value::from_json(&operands[1])?))
    }

    fn operand_from_json(operand: &Json) -> Result<Self> {
        match operand {
            Json::Object(_) => Self::from_json(operand),
            Json::Array(items) => {
                let connective = items
                    .first()
                    .and_then(Json::as_str)
                    .map(str::to_uppercase);
                match connective.as_deref() {
                    Some("AND") | Some("OR") => Self::from_operator_form(items),
                    _ if items.len() == 3 => Self::from_operator_form(items),
                    _ => Err(OtpgateError::query_build(format!(
                        "Operator '{}' requires two operands. And compare sign",
                        connective.unwrap_or_default()
                    ))),
                }
            }
            other => Err(OtpgateError::query_build(format!(
                "Conjunction operands must be arrays or objects, got {}",
                other
            ))),
        }
    }

    /// True when the condition produces no SQL.
    pub fn is_empty(&self) -> bool {
        match self {
            Condition::Hash(pairs) => pairs.is_empty(),
            Condition::Conjunction { operands, .. } => operands.iter().all(Condition::is_empty),
            Condition::Raw(sql) => sql.trim().is_empty(),
            _ => false,
        }
    }

    /// Checks every operator token in the tree.
    pub fn validate(&self) -> Result<()> {
        match self {
            Condition::Simple { operator, .. } => normalize_operator(operator).map(|_| ()),
            Condition::Compare {
                connective, sign, ..
            } => {
                normalize_operator(connective)?;
                normalize_operator(sign).map(|_| ())
            }
            Condition::Conjunction { operator, operands } => {
                normalize_operator(operator)?;
                operands.iter().try_for_each(Condition::validate)
            }
            Condition::Hash(_) | Condition::Raw(_) => Ok(()),
        }
    }

    /// Writes the condition through `writer`.
    pub fn write(&self, writer: &mut dyn ConditionWriter) -> String {
        match self {
            Condition::Hash(pairs) => pairs
                .iter()
                .map(|(column, value)| comparison(writer, column, "=", value))
                .collect::<Vec<_>>()
                .join(" AND "),
            Condition::Simple {
                column,
                operator,
                value,
            } => comparison(writer, column, operator, value),
            Condition::Compare {
                connective,
                column,
                sign,
                value,
            } => format!("{} {}", connective, comparison(writer, column, sign, value)),
            Condition::Conjunction { operator, operands } => {
                let parts: Vec<&Condition> = operands.iter().filter(|o| !o.is_empty()).collect();
                let single = parts.len() == 1;
                parts
                    .iter()
                    .enumerate()
                    .map(|(i, operand)| {
                        // The first surviving operand never carries a connective.
                        if let (0, Condition::Compare { column, sign, value, .. }) = (i, operand) {
                            return comparison(writer, column, sign, value);
                        }
                        let sql = operand.write(writer);
                        let sql = if !single && operand.needs_parens() {
                            format!("({})", sql)
                        } else {
                            sql
                        };
                        match operand {
                            Condition::Compare { .. } => sql,
                            _ if i > 0 => format!("{} {}", operator, sql),
                            _ => sql,
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            }
            Condition::Raw(sql) => sql.clone(),
        }
    }

    /// Literal SQL form: columns as given, values quoted by `db`.
    pub fn render(&self, db: &Connection) -> String {
        self.write(&mut LiteralWriter { db })
    }

    fn needs_parens(&self) -> bool {
        match self {
            Condition::Hash(pairs) => pairs.len() > 1,
            Condition::Conjunction { operands, .. } => {
                operands.iter().filter(|o| !o.is_empty()).count() > 1
            }
            Condition::Raw(_) => true,
            _ => false,
        }
    }
}

fn comparison(writer: &mut dyn ConditionWriter, column: &str, operator: &str, value: &Value) -> String {
    let column = writer.column(column);
    if value.is_null() {
        match operator {
            "=" => return format!("{} IS NULL", column),
            "!=" | "<>" => return format!("{} IS NOT NULL", column),
            _ => {}
        }
    }
    format!("{} {} {}", column, operator, writer.value(value))
}

fn normalize_operator(token: &str) -> Result<String> {
    let token = token.trim().to_uppercase();
    if OPERATORS.contains(&token.as_str()) {
        Ok(token)
    } else {
        Err(OtpgateError::query_build(format!(
            "Unknown condition operator '{}'",
            token
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_simple_condition_renders_quoted_value() {
        let db = Connection::in_memory();
        let condition = Condition::simple(">", "created_at", "2024-01-01 10:00:00");
        assert_eq!(condition.render(&db), "created_at > '2024-01-01 10:00:00'");
    }

    #[test]
    fn test_hash_condition_joins_pairs_with_and() {
        let db = Connection::in_memory();
        let condition = Condition::hash([("user_id", Value::from(5)), ("code", Value::from("123456"))]);
        assert_eq!(condition.render(&db), "user_id = 5 AND code = '123456'");
    }

    #[test]
    fn test_null_values_become_is_null() {
        let db = Connection::in_memory();
        assert_eq!(Condition::eq("phone", Value::Null).render(&db), "phone IS NULL");
        assert_eq!(
            Condition::simple("!=", "phone", Value::Null).render(&db),
            "phone IS NOT NULL"
        );
    }

    #[test]
    fn test_conjunction_from_json() {
        let db = Connection::in_memory();
        let condition = Condition::from_json(&json!([
            "and",
            {"user_id": 7},
            ["!=", "is_valid", 1],
            [">", "created_at", "2024-01-01 00:00:00"]
        ]))
        .unwrap();

        assert_eq!(
            condition.render(&db),
            "user_id = 7 AND is_valid != 1 AND created_at > '2024-01-01 00:00:00'"
        );
        match &condition {
            Condition::Conjunction { operands, .. } => {
                assert!(matches!(operands[1], Condition::Compare { .. }));
            }
            other => panic!("Expected conjunction, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_conjunctions_are_parenthesized() {
        let db = Connection::in_memory();
        let condition = Condition::or(vec![
            Condition::hash([("a", 1), ("b", 2)]),
            Condition::and(vec![Condition::eq("c", 3), Condition::simple("<", "d", 4)]),
        ]);
        assert_eq!(condition.render(&db), "(a = 1 AND b = 2) OR (c = 3 AND d < 4)");
    }

    #[test]
    fn test_simple_operator_form_requires_two_operands() {
        let err = Condition::from_json(&json!(["=", "id"])).unwrap_err();
        assert!(err.to_string().contains("requires two operands"));

        let err = Condition::from_json(&json!(["BETWEEN", "id", 1])).unwrap_err();
        assert!(matches!(err, OtpgateError::QueryBuild(_)));
    }

    #[test]
    fn test_push_attaches_connective() {
        let db = Connection::in_memory();
        let mut condition = Condition::and(vec![Condition::eq("user_id", 1)]);
        condition.push(Condition::simple("=", "code", "42"));
        assert_eq!(condition.render(&db), "user_id = 1 AND code = '42'");
    }

    #[test]
    fn test_first_surviving_operand_has_no_connective() {
        let db = Connection::in_memory();
        let condition = Condition::and(vec![
            Condition::from_json(&json!({})).unwrap(),
            Condition::simple("=", "phone", "1"),
            Condition::simple(">", "id", 2),
        ]);
        assert_eq!(condition.render(&db), "phone = '1' AND id > 2");

        let condition = Condition::or(vec![Condition::and(vec![]), Condition::eq("id", 3)]);
        assert_eq!(condition.render(&db), "id = 3");
    }

    #[test]
    fn test_empty_conditions() {
        assert!(Condition::from_json(&json!({})).unwrap().is_empty());
        assert!(Condition::from_json(&json!([])).unwrap().is_empty());
        assert!(Condition::and(vec![]).is_empty());
        assert!(!Condition::eq("id", 1).is_empty());
    }

    #[test]
    fn test_validate_rejects_unknown_tokens() {
        let condition = Condition::Simple {
            column: "id".to_string(),
            operator: "~".to_string(),
            value: Value::Integer(1),
        };
        assert!(condition.validate().is_err());
        assert!(Condition::simple("like", "email", "%@x.com").validate().is_ok());
    }
}
