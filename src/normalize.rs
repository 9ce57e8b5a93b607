//! Conversion of failed service responses into normalized errors.
//!
//! The service reports failures as
//!
//! ```json
//! {
//!     "error": {
//!         "type": "CONFLICT_ERROR",
//!         "message": "Email already registered",
//!         "details": { "field": "email" }
//!     }
//! }
//! ```
//!
//! A typed `error.type` is authoritative. Without one, the HTTP status
//! decides the [`ErrorKind`]. Missing, empty and non-JSON bodies all fall back
//! to the status code.

use std::{collections::BTreeMap, time::Duration};

use reqwest::{header::RETRY_AFTER, StatusCode};
use serde::Deserialize;

use crate::{
    classify,
    error::{Error, ErrorKind, FieldError},
};

/// Error body as sent by the service. Every part is optional.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<ErrorField>,

    #[serde(default)]
    message: Option<String>,

    #[serde(default, rename = "retryAfter")]
    retry_after: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorField {
    Structured(ErrorPayload),
    Message(String),
}

#[derive(Debug, Default, Deserialize)]
struct ErrorPayload {
    #[serde(default, rename = "type")]
    kind: Option<ErrorKind>,

    #[serde(default)]
    message: Option<String>,

    #[serde(default)]
    details: Option<serde_json::Value>,
}

/// Shapes accepted for `details.fields`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FieldList {
    List(Vec<FieldError>),
    Map(BTreeMap<String, String>),
}

impl From<FieldList> for Vec<FieldError> {
    fn from(list: FieldList) -> Self {
        match list {
            FieldList::List(fields) => fields,
            FieldList::Map(fields) => fields
                .into_iter()
                .map(|(field, message)| FieldError::new(field, message))
                .collect(),
        }
    }
}

/// Reads a failed response and normalizes it.
///
/// Never fails: a body that cannot be read is treated as absent.
pub async fn from_response(response: reqwest::Response) -> Error {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok());

    let body = match response.bytes().await {
        Ok(body) => body,
        Err(e) => {
            debug!("could not read error body: {e}");
            Default::default()
        }
    };

    from_parts(status, retry_after, &body)
}

/// Normalizes a failed response from its status, `Retry-After` hint (in
/// seconds) and raw body.
#[must_use]
pub fn from_parts(status: StatusCode, retry_after: Option<f64>, body: &[u8]) -> Error {
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        ErrorBody::default()
    } else {
        serde_json::from_slice::<ErrorBody>(body).unwrap_or_else(|e| {
            trace!("error body is not structured: {e}");
            ErrorBody::default()
        })
    };

    let (payload, plain_message) = match body.error {
        Some(ErrorField::Structured(payload)) => (payload, None),
        Some(ErrorField::Message(message)) => (ErrorPayload::default(), Some(message)),
        None => (ErrorPayload::default(), None),
    };

    let kind = payload
        .kind
        .unwrap_or_else(|| ErrorKind::from_status(status));

    let message = payload
        .message
        .or(plain_message)
        .or(body.message)
        .filter(|message| !message.trim().is_empty())
        .or_else(|| status.canonical_reason().map(str::to_owned))
        .unwrap_or_else(|| kind.default_message().to_owned());

    let mut error = Error::new(kind, message).with_status(status);

    if let Some(details) = payload.details {
        error.field_errors = field_errors(&error, &details);

        let hinted = details
            .get("retryAfter")
            .and_then(serde_json::Value::as_f64);
        error.details = Some(details);

        if let Some(seconds) = retry_after.or(hinted) {
            error.retry_after = to_duration(seconds);
        }
    } else if let Some(seconds) = retry_after.or(body.retry_after) {
        error.retry_after = to_duration(seconds);
    }

    if error.kind == ErrorKind::Conflict && error.field_errors.is_empty() {
        if let Some(field) = classify::conflict_field(&error.message) {
            error.field_errors = vec![FieldError::new(field, error.message.clone())];
        }
    }

    // Only throttled responses carry a wait hint.
    if status != StatusCode::TOO_MANY_REQUESTS && error.kind != ErrorKind::RateLimit {
        error.retry_after = None;
    }

    error
}

/// Extracts `details.fields` and, for conflicts, `details.field`.
fn field_errors(error: &Error, details: &serde_json::Value) -> Vec<FieldError> {
    if let Some(fields) = details.get("fields") {
        match serde_json::from_value::<FieldList>(fields.clone()) {
            Ok(list) => {
                let fields: Vec<FieldError> = list.into();
                if !fields.is_empty() {
                    return fields;
                }
            }
            Err(e) => debug!("ignoring malformed field errors: {e}"),
        }
    }

    if error.kind == ErrorKind::Conflict {
        if let Some(field) = details.get("field").and_then(serde_json::Value::as_str) {
            return vec![FieldError::new(field, error.message.clone())];
        }
    }

    Vec::new()
}

fn to_duration(seconds: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(seconds).ok()
}
