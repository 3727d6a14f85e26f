//! Registration and OTP validation flows.
//!
//! Each flow returns either a success message or an [`AccountError`] whose
//! text is what the caller shows to the user.

use crate::core::db::{Condition, Connection};
use crate::core::model::Model;
use crate::core::OtpgateError;
use crate::models::{OtpCode, User, ValidationAttempt};
use thiserror::Error;
use tracing::info;

pub const REGISTERED: &str = "User registered, please check your phone for OTP code";
pub const CODE_GENERATED: &str = "Code generated, please check your phone";
pub const USER_VALIDATED: &str = "User validated successfully";

/// Why a flow was refused
#[derive(Error, Debug)]
pub enum AccountError {
    /// Attribute errors as a JSON object of message lists
    #[error("{0}")]
    Invalid(String),

    #[error("User not found")]
    UserNotFound,

    #[error("Please wait a minute before generating a new code")]
    TooSoon,

    #[error("Code is required")]
    CodeRequired,

    #[error("User already validated")]
    AlreadyValidated,

    #[error("Too many attempts, please wait a minute")]
    TooManyAttempts,

    #[error("Invalid code")]
    InvalidCode,

    #[error(transparent)]
    Internal(#[from] OtpgateError),
}

impl AccountError {
    /// HTTP-style status a front end would answer with.
    pub fn status(&self) -> u16 {
        match self {
            AccountError::UserNotFound => 404,
            AccountError::Internal(_) => 500,
            _ => 400,
        }
    }
}

pub type AccountResult<T> = std::result::Result<T, AccountError>;

/// A registered user and the message to show.
#[derive(Debug, Clone, PartialEq)]
pub struct Registered {
    pub user_id: Option<i64>,
    pub message: &'static str,
}

fn find_user(db: &Connection, user_id: i64) -> AccountResult<User> {
    User::find(Condition::eq("id", user_id))
        .one(db)?
        .ok_or(AccountError::UserNotFound)
}

/// Creates a user from submitted data and sends the first code.
pub fn register(db: &Connection, data: &serde_json::Value) -> AccountResult<Registered> {
    let mut user = User::new();
    user.load_json(data)?;
    if !user.save(db)? {
        let errors: serde_json::Map<String, serde_json::Value> = user
            .record()
            .all_errors()
            .iter()
            .map(|(attribute, messages)| (attribute.clone(), serde_json::Value::from(messages.clone())))
            .collect();
        return Err(AccountError::Invalid(serde_json::Value::Object(errors).to_string()));
    }
    user.after_register(db)?;
    info!("Registered user {:?}", user.id());
    Ok(Registered {
        user_id: user.id(),
        message: REGISTERED,
    })
}

/// Sends a fresh code, at most once a minute.
pub fn generate(db: &Connection, user_id: i64) -> AccountResult<&'static str> {
    let user = find_user(db, user_id)?;
    if !OtpCode::attempt_generate(db, &user, false)? {
        return Err(AccountError::TooSoon);
    }
    Ok(CODE_GENERATED)
}

/// Checks a submitted code and marks the user validated on a match.
pub fn validate(db: &Connection, user_id: i64, code: Option<&str>) -> AccountResult<&'static str> {
    let mut user = find_user(db, user_id)?;
    let code = match code.map(str::trim) {
        Some(code) if !code.is_empty() => code,
        _ => return Err(AccountError::CodeRequired),
    };
    db.log_sink().log(&format!(
        "User with phone +{} has made attempt to validate the code {}",
        user.phone(),
        code
    ));

    if user.is_validated() {
        return Err(AccountError::AlreadyValidated);
    }
    if !ValidationAttempt::valid_attempt(db, user.id())? {
        return Err(AccountError::TooManyAttempts);
    }
    if !OtpCode::validate_code(db, code, &user)? {
        return Err(AccountError::InvalidCode);
    }

    user.set_validated(true);
    user.save(db)?;
    Ok(USER_VALIDATED)
}
