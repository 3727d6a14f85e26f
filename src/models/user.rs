use super::{now, OtpCode};
use crate::core::db::{Connection, Value};
use crate::core::model::{Model, Record};
use crate::core::rules::Rule;
use crate::core::{OtpgateError, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use uuid::Uuid;

/// A registered user, identified by phone and email
#[derive(Debug, Clone)]
pub struct User {
    record: Record,
}

impl Model for User {
    fn table_name() -> &'static str {
        "user"
    }

    fn instantiate() -> Self {
        User {
            record: Record::new([
                ("id", Value::Null),
                ("phone", Value::Null),
                ("email", Value::Null),
                ("validated", Value::Integer(0)),
                ("password", Value::Null),
                ("created_at", Value::Null),
            ]),
        }
    }

    super::record_accessors!();

    fn rules() -> Vec<Rule> {
        vec![
            Rule::new("email")
                .format(["trim", "strtolower"])
                .validate(["required", "email", "unique"]),
            Rule::new("phone")
                .format(["trim", "phone"])
                .validate(["required", "phone", "unique"]),
            Rule::new("password").format(["trim"]).validate(["required"]),
        ]
    }

    fn before_save(&mut self, _db: &Connection, is_new_record: bool) -> Result<()> {
        if is_new_record {
            self.set("validated", false);
            self.set("created_at", now());
            if let Some(plain) = self.get("password").as_str() {
                let hash = hash_password(plain)?;
                self.set("password", hash);
            }
        }
        Ok(())
    }
}

impl User {
    pub fn new() -> Self {
        Self::instantiate()
    }

    pub fn id(&self) -> Option<i64> {
        self.get("id").as_i64()
    }

    pub fn phone(&self) -> String {
        self.get("phone").to_string()
    }

    pub fn email(&self) -> String {
        self.get("email").to_string()
    }

    pub fn is_validated(&self) -> bool {
        self.get("validated").is_truthy()
    }

    pub fn set_validated(&mut self, validated: bool) {
        self.set("validated", validated);
    }

    pub fn created_at(&self) -> String {
        self.get("created_at").to_string()
    }

    /// Checks a plain-text password against the stored hash.
    pub fn verify_password(&self, plain: &str) -> bool {
        match self.get("password").as_str() {
            Some(stored) => verify_password(plain, stored),
            None => false,
        }
    }

    /// Issues the first OTP code of a freshly registered user.
    pub fn after_register(&self, db: &Connection) -> Result<bool> {
        OtpCode::attempt_generate(db, self, true)
    }
}

impl Default for User {
    fn default() -> Self {
        Self::new()
    }
}

/// Argon2id hash of `plain` as a PHC string (`$argon2id$v=19$...`).
pub fn hash_password(plain: &str) -> Result<String> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| OtpgateError::Password(e.to_string()))?;
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| OtpgateError::Password(e.to_string()))
}

/// Verifies `plain` against a hash produced by [`hash_password`]. Anything
/// that does not parse as a PHC string never matches.
pub fn verify_password(plain: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::DatabaseFixture;

    fn user(phone: &str, email: &str) -> User {
        let mut user = User::new();
        user.load([
            ("phone", Value::from(phone)),
            ("email", Value::from(email)),
            ("password", Value::from(" secret ")),
        ]);
        user
    }

    #[test]
    fn test_password_hash_round_trip() {
        let hash = hash_password("secret").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("secret", &hash));
        assert!(!verify_password("other", &hash));
        assert!(!verify_password("secret", "plain"));
        assert_ne!(hash, hash_password("secret").unwrap());
    }

    #[test]
    fn test_register_formats_and_hashes() {
        let fixture = DatabaseFixture::new().unwrap();
        let mut user = user(" 0888 123 456 ", " Jane@Example.com");
        user.set("validated", true);
        assert!(user.save(&fixture.db).unwrap());

        assert_eq!(user.id(), Some(1));
        assert_eq!(user.phone(), "359888123456");
        assert_eq!(user.email(), "jane@example.com");
        assert!(!user.is_validated());
        assert!(user.verify_password("secret"));
        assert!(user.get("password").to_string().starts_with("$argon2id$"));
        assert_eq!(user.created_at().len(), 19);
    }

    #[test]
    fn test_duplicate_phone_and_email_are_rejected() {
        let fixture = DatabaseFixture::new().unwrap();
        assert!(user("359888123456", "a@b.io").save(&fixture.db).unwrap());

        let mut dup = user("0888123456", "A@B.io");
        assert!(!dup.save(&fixture.db).unwrap());
        assert_eq!(dup.get_errors("phone"), vec!["phone is already taken"]);
        assert_eq!(dup.get_errors("email"), vec!["email is already taken"]);
    }

    #[test]
    fn test_missing_fields_are_required() {
        let fixture = DatabaseFixture::new().unwrap();
        let mut user = User::new();
        assert!(!user.save(&fixture.db).unwrap());
        assert!(user.get_errors("phone").contains(&"phone is required".to_string()));
        assert!(user.get_errors("password").contains(&"password is required".to_string()));
        assert!(user.to_json().get("password").is_none());
    }

    #[test]
    fn test_update_keeps_password_hash() {
        let fixture = DatabaseFixture::new().unwrap();
        let mut user = user("359888123456", "a@b.io");
        assert!(user.save(&fixture.db).unwrap());

        user.set_validated(true);
        assert!(user.save(&fixture.db).unwrap());

        let stored = User::find(crate::core::db::Condition::eq("id", user.id()))
            .one(&fixture.db)
            .unwrap()
            .unwrap();
        assert!(stored.is_validated());
        assert!(stored.verify_password("secret"));
    }
}
