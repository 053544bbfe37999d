/// Input validators for account registration
/// - Length limits bound the work done on attacker-supplied input
/// - Email format follows a simplified RFC 5322 grammar

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ValidationError;

const MAX_EMAIL_LENGTH: usize = 254; // RFC 5321
const MAX_LOCAL_PART_LENGTH: usize = 64;
const MIN_EMAIL_LENGTH: usize = 5;
const MAX_ROLES: usize = 16;
const MAX_ROLE_LENGTH: usize = 64;

lazy_static! {
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    ).expect("email regex compiles");

    static ref ROLE_REGEX: Regex = Regex::new(r"^[a-z][a-z0-9_-]*$").expect("role regex compiles");
}

/// Validates an email address and returns its normalized (trimmed,
/// lowercased) form
pub fn is_valid_email(email: &str) -> Result<String, ValidationError> {
    let trimmed = email.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("email".to_string()));
    }

    if trimmed.len() < MIN_EMAIL_LENGTH {
        return Err(ValidationError::TooShort("email".to_string(), MIN_EMAIL_LENGTH));
    }

    if trimmed.len() > MAX_EMAIL_LENGTH {
        return Err(ValidationError::TooLong("email".to_string(), MAX_EMAIL_LENGTH));
    }

    if !EMAIL_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat("email".to_string()));
    }

    if has_suspicious_email_patterns(trimmed) {
        return Err(ValidationError::SuspiciousContent("email".to_string()));
    }

    Ok(trimmed.to_lowercase())
}

/// Validates requested role names (lowercase identifiers)
pub fn are_valid_roles(roles: &[String]) -> Result<Vec<String>, ValidationError> {
    if roles.len() > MAX_ROLES {
        return Err(ValidationError::TooLong("roles".to_string(), MAX_ROLES));
    }

    roles
        .iter()
        .map(|role| {
            let role = role.trim();
            if role.len() > MAX_ROLE_LENGTH {
                Err(ValidationError::TooLong("role".to_string(), MAX_ROLE_LENGTH))
            } else if !ROLE_REGEX.is_match(role) {
                Err(ValidationError::InvalidFormat("role".to_string()))
            } else {
                Ok(role.to_string())
            }
        })
        .collect()
}

fn has_suspicious_email_patterns(email: &str) -> bool {
    if let Some(at_pos) = email.find('@') {
        if at_pos > MAX_LOCAL_PART_LENGTH {
            return true;
        }
    }

    email.matches('@').count() != 1 || email.contains('\0')
}
