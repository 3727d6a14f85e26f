//! Property-based tests for literal quoting and condition compilation
//!
//! These tests verify that:
//! - Quoted text literals read back unchanged from SQLite
//! - Native and manual escaping agree
//! - Every compiled condition value gets its own placeholder
//! - Phone formatting is idempotent

#[cfg(test)]
mod tests {
    use otpgate::core::db::connection::escape_literal;
    use otpgate::core::db::{Condition, Connection, Params, Query, Value};
    use otpgate::core::rules::Formatter;
    use proptest::prelude::*;

    fn arb_text() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9 '\"%_;\\-]{0,40}"
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::Integer),
            arb_text().prop_map(Value::Text),
        ]
    }

    proptest! {
        #[test]
        fn prop_quoted_text_reads_back(text in arb_text()) {
            let db = Connection::in_memory();
            let quoted = db.quote_value(&text);
            prop_assert_eq!(&quoted, &escape_literal(&text));

            let sql = format!("SELECT {}", quoted);
            let back: String = db.handle().unwrap().query_row(&sql, [], |row| row.get(0)).unwrap();
            prop_assert_eq!(back, text);
        }

        #[test]
        fn prop_each_value_gets_a_placeholder(values in prop::collection::vec(arb_value(), 1..12)) {
            let db = Connection::in_memory();
            let condition = Condition::and(
                values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| Condition::eq(&format!("c{}", i), v.clone()))
                    .collect(),
            );
            let mut params = Params::new();
            let sql = db.query_builder().build_condition(&condition, &mut params).unwrap();

            prop_assert_eq!(params.len(), values.len());
            for (i, value) in values.iter().enumerate() {
                let name = format!(":qp{}", i);
                prop_assert!(sql.contains(&name));
                prop_assert_eq!(params.get(&name), Some(value));
            }
        }

        #[test]
        fn prop_compiled_where_matches_literal_rows(values in prop::collection::vec(arb_text(), 1..8)) {
            let db = Connection::in_memory();
            db.handle().unwrap().execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)").unwrap();
            for v in &values {
                db.handle().unwrap().execute("INSERT INTO t (v) VALUES (?1)", [v]).unwrap();
            }
            let target = values[0].clone();
            let expected = values.iter().filter(|v| **v == target).count() as i64;

            let count = Query::new().from("t").where_(Condition::eq("v", target.as_str())).count(&db).unwrap();
            prop_assert_eq!(count, expected);

            let literal = Condition::eq("v", target.as_str()).render(&db);
            let sql = format!("SELECT COUNT(*) FROM t WHERE {}", literal);
            let by_literal: i64 = db.handle().unwrap().query_row(&sql, [], |row| row.get(0)).unwrap();
            prop_assert_eq!(by_literal, expected);
        }

        #[test]
        fn prop_phone_format_is_idempotent(raw in "[0-9 +()\\-]{0,20}") {
            let once = Formatter::Phone.format(Value::from(raw.as_str()));
            let twice = Formatter::Phone.format(once.clone());
            prop_assert_eq!(&once, &twice);
            prop_assert!(once.to_string().chars().all(|c| c.is_ascii_digit()));
        }
    }
}
