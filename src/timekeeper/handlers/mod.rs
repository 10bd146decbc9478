pub mod auth;

pub mod health;
pub use self::health::health;

pub mod token;
pub use self::token::token;

pub mod users;
pub use self::users::{get_user, list_users};

// common functions for the handlers
use regex::Regex;

pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}
