//! Splits normalized errors into form feedback and retry hints.
//!
//! Both operations are pure: the same [`struct@Error`] always produces the
//! same result.

use std::{collections::BTreeMap, sync::LazyLock};

use regex_lite::Regex;

use crate::error::{Error, ErrorKind};

/// An error split into messages for individual inputs and a form-level
/// message.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Categorized {
    /// Field name to message; the first message per field wins.
    pub field_errors: BTreeMap<String, String>,

    /// Message not attributable to a single input.
    pub general_error: Option<String>,
}

impl Categorized {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.field_errors.is_empty() && self.general_error.is_none()
    }
}

/// Status codes that are worth retrying regardless of the error type.
const RETRYABLE_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

/// Message patterns that identify the conflicting input, checked in order.
///
/// Matching on messages is brittle and only used when the service did not
/// name the field in `details.field`.
static CONFLICT_FIELDS: LazyLock<[(Regex, &'static str); 2]> = LazyLock::new(|| {
    [
        (
            Regex::new(r"(?i)e-?mail").expect("email pattern is valid"),
            "email",
        ),
        (
            Regex::new(r"(?i)contact|phone").expect("contact pattern is valid"),
            "contactNumber",
        ),
    ]
});

/// Guesses the conflicting input from a conflict message.
///
/// Case-insensitive and non-exhaustive: `email` maps to `email`,
/// `contact` and `phone` map to `contactNumber`.
#[must_use]
pub fn conflict_field(message: &str) -> Option<&'static str> {
    CONFLICT_FIELDS
        .iter()
        .find(|(pattern, _)| pattern.is_match(message))
        .map(|(_, field)| *field)
}

/// Splits an error into field errors and a general error.
///
/// * Errors carrying field errors become field errors only.
/// * Conflicts name their field through `details.field`, or failing that
///   through the message heuristic of [`conflict_field`].
/// * Everything else becomes a general error with the error's message.
#[must_use]
pub fn categorize(error: &Error) -> Categorized {
    let mut categorized = Categorized::default();

    if !error.field_errors.is_empty() {
        for field_error in &error.field_errors {
            categorized
                .field_errors
                .entry(field_error.field.clone())
                .or_insert_with(|| field_error.message.clone());
        }
        return categorized;
    }

    if error.kind == ErrorKind::Conflict {
        let field = error
            .detail("field")
            .or_else(|| conflict_field(&error.message));
        if let Some(field) = field {
            categorized
                .field_errors
                .insert(field.to_owned(), error.message.clone());
            return categorized;
        }
    }

    categorized.general_error = Some(error.message.clone());
    categorized
}

/// Whether retrying the failed operation may succeed.
///
/// True for rate limiting, service failures and transport failures, or when
/// the status code is one of 429, 500, 502, 503 or 504. Service types this
/// client does not know are only retryable through their status code.
#[must_use]
pub fn is_retryable(error: &Error) -> bool {
    matches!(
        error.kind,
        ErrorKind::RateLimit | ErrorKind::Internal | ErrorKind::Network
    ) || error
        .status_code()
        .is_some_and(|status| RETRYABLE_STATUS.contains(&status))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use reqwest::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::error::FieldError;

    #[test]
    fn field_errors_take_precedence() {
        let error = Error::validation("validation failed").with_field_errors(vec![
            FieldError::new("email", "email is required"),
            FieldError::new("password", "too short"),
            FieldError::new("email", "ignored duplicate"),
        ]);

        let categorized = categorize(&error);
        assert_eq!(categorized.general_error, None);
        assert_eq!(categorized.field_errors.len(), 2);
        assert_eq!(categorized.field_errors["email"], "email is required");
        assert_eq!(categorized.field_errors["password"], "too short");
    }

    #[test]
    fn conflict_uses_details_field() {
        let error = Error::conflict("already taken")
            .with_status(StatusCode::CONFLICT)
            .with_details(json!({ "field": "customAlias" }));

        let categorized = categorize(&error);
        assert_eq!(categorized.general_error, None);
        assert_eq!(categorized.field_errors["customAlias"], "already taken");
    }

    #[test]
    fn conflict_falls_back_to_message_heuristic() {
        let email = categorize(&Error::conflict("User with this EMAIL already exists"));
        assert_eq!(
            email.field_errors["email"],
            "User with this EMAIL already exists"
        );

        let contact = categorize(&Error::conflict("Contact number already registered"));
        assert_eq!(
            contact.field_errors["contactNumber"],
            "Contact number already registered"
        );

        let neither = categorize(&Error::conflict("Resource exists"));
        assert!(neither.field_errors.is_empty());
        assert_eq!(neither.general_error.as_deref(), Some("Resource exists"));
    }

    #[test]
    fn other_errors_are_general() {
        let categorized = categorize(&Error::internal("boom"));
        assert!(categorized.field_errors.is_empty());
        assert_eq!(categorized.general_error.as_deref(), Some("boom"));
    }

    #[test]
    fn categorization_is_deterministic() {
        let error = Error::conflict("email in use").with_details(json!({ "field": "email" }));
        assert_eq!(categorize(&error), categorize(&error));
    }

    #[test]
    fn retryable_kinds_and_statuses() {
        assert!(is_retryable(&Error::rate_limited("slow down")));
        assert!(is_retryable(&Error::internal("oops")));
        assert!(is_retryable(&Error::network("offline")));
        assert!(!is_retryable(&Error::validation("bad")));
        assert!(!is_retryable(&Error::not_found("gone")));

        let unknown = Error::new(ErrorKind::Other("MAINTENANCE_ERROR".to_owned()), "later");
        assert!(!is_retryable(&unknown));
        assert!(is_retryable(
            &unknown.with_status(StatusCode::SERVICE_UNAVAILABLE)
        ));
    }
}
