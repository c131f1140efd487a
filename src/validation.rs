use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

use crate::db::models::{NewFlower, NewSite};
use crate::error::AppError;

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Parses an identity taken from a path segment.
pub fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::Validation(format!("invalid id: {raw}")))
}

pub fn validate_new_flower(flower: &NewFlower) -> Result<(), AppError> {
    if flower.name.trim().is_empty() {
        return Err(AppError::Validation("Flower name cannot be empty".into()));
    }
    Ok(())
}

pub fn validate_new_site(site: &NewSite) -> Result<(), AppError> {
    if site.name.trim().is_empty() {
        return Err(AppError::Validation("Site name cannot be empty".into()));
    }
    Ok(())
}

/// Checks a registration payload. `email` is expected to be normalized already.
pub fn validate_registration(username: &str, email: &str, password: &str) -> Result<(), AppError> {
    if username.trim().is_empty() {
        return Err(AppError::Validation("Username cannot be empty".into()));
    }
    if !is_valid_email(email) {
        return Err(AppError::Validation("Invalid email".into()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation("Password too short".into()));
    }
    Ok(())
}
