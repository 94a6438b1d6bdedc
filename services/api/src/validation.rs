//! Input validation utilities

use regex::Regex;
use std::sync::OnceLock;

/// Validate a user name
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Name is required".to_string());
    }

    if name.chars().count() > 128 {
        return Err("Name must be at most 128 characters long".to_string());
    }

    Ok(())
}

/// Validate an age in years
pub fn validate_age(age: i32) -> Result<(), String> {
    if !(0..=150).contains(&age) {
        return Err("Age must be between 0 and 150".to_string());
    }

    Ok(())
}

/// Validate email
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email must be at most 254 characters long".to_string());
    }

    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("Failed to compile email regex")
    });

    if !regex.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}
