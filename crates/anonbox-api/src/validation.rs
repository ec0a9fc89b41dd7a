//! Input rules shared by the sign-up form, the username check and message
//! delivery. Everything here is pure so the rules can be tested directly.

use std::sync::LazyLock;

use regex::Regex;

use anonbox_types::api::{FieldError, SignUpRequest};

use crate::error::ApiError;

pub const USERNAME_MIN: usize = 2;
pub const USERNAME_MAX: usize = 20;
pub const PASSWORD_MIN: usize = 8;
pub const PASSWORD_MAX: usize = 20;
pub const CONTENT_MAX: usize = 200;

const PASSWORD_SPECIALS: &str = "@$!%*?&_";

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]*$").expect("username pattern"));

const EMAIL_LOCAL: &str = r"[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+";
const EMAIL_LABEL: &str = r"[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?";

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(r"^{EMAIL_LOCAL}@{EMAIL_LABEL}(?:\.{EMAIL_LABEL})+$");
    Regex::new(&pattern).expect("email pattern")
});

pub fn username_errors(username: &str) -> Vec<String> {
    let mut errors = Vec::new();
    let len = username.chars().count();
    if len < USERNAME_MIN {
        errors.push(format!("Username must be at least {USERNAME_MIN} characters long"));
    }
    if len > USERNAME_MAX {
        errors.push(format!("Username must be at most {USERNAME_MAX} characters long"));
    }
    if !USERNAME_RE.is_match(username) {
        errors.push("Username can only contain letters, numbers, and underscores".to_string());
    }
    errors
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn password_errors(password: &str) -> Vec<String> {
    let mut errors = Vec::new();
    let len = password.chars().count();
    if len < PASSWORD_MIN {
        errors.push(format!("Password must be at least {PASSWORD_MIN} characters long"));
    }
    if len > PASSWORD_MAX {
        errors.push(format!("Password must be at most {PASSWORD_MAX} characters long"));
    }

    let allowed = password
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || PASSWORD_SPECIALS.contains(c));
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_special = password.chars().any(|c| PASSWORD_SPECIALS.contains(c));

    if !(allowed && has_lower && has_upper && has_digit && has_special) {
        errors.push(format!(
            "Password must contain at least one uppercase letter, one lowercase letter, \
             one number, and one special character ({PASSWORD_SPECIALS}), and nothing else"
        ));
    }
    errors
}

fn field_errors(field: &str, messages: Vec<String>) -> impl Iterator<Item = FieldError> + '_ {
    messages.into_iter().map(move |message| FieldError {
        field: field.to_string(),
        message,
    })
}

pub fn validate_username(username: &str) -> Result<(), ApiError> {
    let errors: Vec<FieldError> = field_errors("username", username_errors(username)).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(errors))
    }
}

/// Emails are compared and stored lowercased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_sign_up(req: &SignUpRequest) -> Result<(), ApiError> {
    let mut errors: Vec<FieldError> =
        field_errors("username", username_errors(&req.username)).collect();

    if !is_valid_email(&normalize_email(&req.email)) {
        errors.push(FieldError {
            field: "email".to_string(),
            message: "Invalid email address".to_string(),
        });
    }

    errors.extend(field_errors("password", password_errors(&req.password)));

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(errors))
    }
}

/// Returns the content to store: trimmed, non-empty, at most 200 characters.
pub fn validate_content(content: &str) -> Result<String, ApiError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ApiError::invalid("content", "Message cannot be empty"));
    }
    if trimmed.chars().count() > CONTENT_MAX {
        return Err(ApiError::invalid(
            "content",
            format!("Message cannot be longer than {CONTENT_MAX} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign_up(username: &str, email: &str, password: &str) -> SignUpRequest {
        SignUpRequest {
            username: username.into(),
            email: email.into(),
            password: password.into(),
        }
    }

    #[test]
    fn username_rules() {
        assert!(username_errors("alice_01").is_empty());
        assert!(username_errors("ab").is_empty());
        assert_eq!(username_errors("a").len(), 1);
        assert_eq!(username_errors(&"x".repeat(21)).len(), 1);
        assert_eq!(username_errors("al ice").len(), 1);
        assert_eq!(username_errors("").len(), 1);
    }

    #[test]
    fn email_rules() {
        assert!(is_valid_email("alice@x.com"));
        assert!(is_valid_email("first.last+tag@mail.example.org"));
        assert!(!is_valid_email("alice"));
        assert!(!is_valid_email("alice@"));
        assert!(!is_valid_email("alice@localhost"));
        assert!(!is_valid_email("al ice@x.com"));
    }

    #[test]
    fn password_rules() {
        assert!(password_errors("Passw0rd!").is_empty());
        assert!(password_errors("Aa1_aaaa").is_empty());
        assert!(!password_errors("password").is_empty());
        assert!(!password_errors("Passw0rd").is_empty());
        assert!(!password_errors("Pw0!").is_empty());
        assert!(!password_errors("Passw0rd!#").is_empty());
        assert!(!password_errors(&format!("Aa1!{}", "a".repeat(20))).is_empty());
    }

    #[test]
    fn sign_up_collects_every_field() {
        let err = validate_sign_up(&sign_up("a", "nope", "weak")).unwrap_err();
        match err {
            ApiError::Validation(errors) => {
                let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
                assert!(fields.contains(&"username"));
                assert!(fields.contains(&"email"));
                assert!(fields.contains(&"password"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(validate_sign_up(&sign_up("alice", " Alice@X.com ", "Passw0rd!")).is_ok());
    }

    #[test]
    fn content_is_trimmed_and_bounded() {
        assert_eq!(validate_content("  hi  ").unwrap(), "hi");
        assert!(validate_content("   ").is_err());
        assert!(validate_content(&"é".repeat(200)).is_ok());
        assert!(validate_content(&"é".repeat(201)).is_err());
    }
}
