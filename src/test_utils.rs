/// # Test Utilities Module
///
/// Fixtures shared by unit and integration tests: an isolated database with
/// the application schema, a memory log sink to inspect failure lines, and
/// error assertion helpers.

use crate::config::DbConfig;
use crate::core::db::{Connection, Value};
use crate::core::log::MemorySink;
use crate::core::model::Model;
use crate::core::{OtpgateError, Result};
use crate::models::User;
use crate::schema;
use std::path::Path;
use std::sync::Arc;

/// Isolated database test fixture
pub struct DatabaseFixture {
    pub db: Connection,
    pub sink: Arc<MemorySink>,
}

impl DatabaseFixture {
    /// An in-memory database with the application schema installed.
    pub fn new() -> Result<Self> {
        Self::with_config(DbConfig::default())
    }

    /// A file-backed database at `path` with the application schema
    /// installed.
    pub fn on_disk(path: &Path) -> Result<Self> {
        Self::with_config(DbConfig {
            dsn: format!("sqlite:{}", path.display()),
            ..DbConfig::default()
        })
    }

    fn with_config(config: DbConfig) -> Result<Self> {
        let sink = Arc::new(MemorySink::new());
        let db = Connection::new(config).with_log_sink(sink.clone());
        schema::install(&db)?;
        Ok(DatabaseFixture { db, sink })
    }

    /// Saves a user with a fixed password, without sending a code.
    pub fn register_user(&self, phone: &str, email: &str) -> Result<User> {
        let mut user = User::new();
        user.load([
            ("phone", Value::from(phone)),
            ("email", Value::from(email)),
            ("password", Value::from("secret")),
        ]);
        if !user.save(&self.db)? {
            return Err(OtpgateError::query_build(format!(
                "fixture user is invalid: {:?}",
                user.record().all_errors()
            )));
        }
        Ok(user)
    }

    /// Number of rows in `table`.
    pub fn count(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.db.quote_table_name(table));
        Ok(self.db.handle()?.query_row(&sql, [], |row| row.get(0))?)
    }
}

/// Error testing utilities specific to OtpgateError patterns
pub mod error_testing {
    /// Asserts that `result` failed with a message containing `fragment`.
    pub fn assert_error_contains<T, E>(result: &std::result::Result<T, E>, fragment: &str, context: &str)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => panic!("Expected an error but got Ok in {}", context),
            Err(e) => {
                let message = e.to_string();
                assert!(
                    message.to_lowercase().contains(&fragment.to_lowercase()),
                    "Expected '{}' in error message '{}' context: {}",
                    fragment,
                    message,
                    context
                );
            }
        }
    }
}

#[macro_export]
macro_rules! assert_otpgate_error {
    ($result:expr, $variant:ident, $context:expr) => {
        match $result {
            Err($crate::core::OtpgateError::$variant { .. }) => {}
            Ok(_) => panic!("Expected {} error but got Ok in {}", stringify!($variant), $context),
            Err(other) => panic!("Expected {} but got {:?} in {}", stringify!($variant), other, $context),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_installs_schema() {
        let fixture = DatabaseFixture::new().unwrap();
        for table in schema::TABLES {
            assert_eq!(fixture.count(table).unwrap(), 0);
        }
        assert!(fixture.sink.lines().is_empty());
    }

    #[test]
    fn test_register_user() {
        let fixture = DatabaseFixture::new().unwrap();
        let user = fixture.register_user("359888123456", "a@b.io").unwrap();
        assert_eq!(user.id(), Some(1));
        assert_eq!(fixture.count("user").unwrap(), 1);

        let dup = fixture.register_user("359888123456", "c@d.io");
        error_testing::assert_error_contains(&dup, "already taken", "duplicate fixture user");
    }

    #[test]
    fn test_error_assertion_macro() {
        let result: Result<()> = Err(OtpgateError::query_build("bad"));
        assert_otpgate_error!(result, QueryBuild, "macro test");
        assert_otpgate_error!(Err::<(), _>(OtpgateError::NotSeekable), NotSeekable, "unit variant");
    }
}
