//! Input validation for sign-up, login and profile edits.
//!
//! Validators return `Err(message)` with text suitable for showing inline;
//! collect several with `ValidationErrorBuilder::check` from the `error`
//! module.

use lazy_static::lazy_static;
use regex::Regex;

use crate::models::ProfileUpdate;

lazy_static! {
    /// Deliberately loose: one `@`, no whitespace, a dot in the domain
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[^\s@]+@[^\s@]+\.[^\s@]+$"
    ).unwrap();

    /// Digits with optional leading `+` and common separators
    static ref PHONE_REGEX: Regex = Regex::new(
        r"^\+?[0-9(][0-9 ()\-.]{5,23}$"
    ).unwrap();
}

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_PASSWORD_LEN: usize = 72;
const MAX_NAME_LEN: usize = 120;
const MAX_LOCATION_LEN: usize = 200;

pub fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        ));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(format!(
            "Password is too long (max {} bytes)",
            MAX_PASSWORD_LEN
        ));
    }
    Ok(())
}

fn validate_text(value: &str, label: &str, max: usize) -> Result<(), String> {
    if value.chars().count() > max {
        return Err(format!("{} is too long (max {} characters)", label, max));
    }
    if value.chars().any(char::is_control) {
        return Err(format!("{} contains invalid characters", label));
    }
    Ok(())
}

pub fn validate_full_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Name cannot be blank".to_string());
    }
    validate_text(name, "Name", MAX_NAME_LEN)
}

pub fn validate_phone(phone: &str) -> Result<(), String> {
    if phone.trim().is_empty() {
        return Ok(());
    }
    if !PHONE_REGEX.is_match(phone.trim()) {
        return Err("Invalid phone number".to_string());
    }
    Ok(())
}

pub fn validate_location(location: &str) -> Result<(), String> {
    validate_text(location, "Location", MAX_LOCATION_LEN)
}

/// Field checks for a profile patch. Permission checks happen in the handlers.
pub fn validate_profile_update(update: &ProfileUpdate) -> Vec<(&'static str, String)> {
    let mut errors = Vec::new();
    if let Some(name) = &update.full_name {
        if let Err(e) = validate_full_name(name) {
            errors.push(("full_name", e));
        }
    }
    if let Some(phone) = &update.phone {
        if let Err(e) = validate_phone(phone) {
            errors.push(("phone", e));
        }
    }
    if let Some(location) = &update.location {
        if let Err(e) = validate_location(location) {
            errors.push(("location", e));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("ada@example.com").is_ok());
        assert!(validate_email("  ada@example.com ").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("ada").is_err());
        assert!(validate_email("ada@example").is_err());
        assert!(validate_email("a da@example.com").is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("secret1").is_ok());
        assert!(validate_password("").is_err());
        assert!(validate_password("12345").is_err());
        assert!(validate_password(&"x".repeat(73)).is_err());
    }

    #[test]
    fn test_validate_full_name() {
        assert!(validate_full_name("Ama Mensah").is_ok());
        assert!(validate_full_name("   ").is_err());
        assert!(validate_full_name(&"a".repeat(121)).is_err());
        assert!(validate_full_name("Ama\u{0007}").is_err());
    }

    #[test]
    fn test_validate_phone() {
        assert!(validate_phone("+233 24 123 4567").is_ok());
        assert!(validate_phone("(555) 010-9999").is_ok());
        assert!(validate_phone("").is_ok());
        assert!(validate_phone("call me").is_err());
        assert!(validate_phone("12").is_err());
    }

    #[test]
    fn test_validate_profile_update_collects_fields() {
        let update = ProfileUpdate {
            full_name: Some(" ".to_string()),
            phone: Some("nope".to_string()),
            location: Some("Kumasi".to_string()),
            ..Default::default()
        };
        let errors = validate_profile_update(&update);
        let fields: Vec<_> = errors.iter().map(|(f, _)| *f).collect();
        assert_eq!(fields, vec!["full_name", "phone"]);
    }
}
