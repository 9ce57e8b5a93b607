//! Wire types of the SnipURL service.
//!
//! # Submodules
//!
//! * [`auth`] - Accounts, sessions and federated sign-in
//! * [`urls`] - Short URLs and their click logs
//! * [`groups`] - Groupings of short URLs
//! * [`dashboard`] - Aggregated statistics
//! * [`chatbot`] - Assistant messages and transcript
//!
//! # Success Envelope
//!
//! Depending on the endpoint, successful responses either wrap their payload:
//!
//! ```json
//! { "success": true, "data": { ... } }
//! ```
//!
//! or return it at the top level. [`Envelope`] accepts both.

pub mod auth;
pub mod chatbot;
pub mod dashboard;
pub mod groups;
pub mod urls;

use std::fmt::Debug;

use serde::Deserialize;

use crate::error::Result;

/// Successful response payload, wrapped in `data` or not.
#[derive(Clone, PartialEq, Deserialize, Debug)]
#[serde(untagged)]
pub enum Envelope<T> {
    /// `{ "data": T, ... }`
    Wrapped {
        /// The payload
        data: T,
    },

    /// `T` at the top level
    Bare(T),
}

impl<T> Envelope<T> {
    /// Returns the payload regardless of wrapping.
    pub fn into_inner(self) -> T {
        match self {
            Self::Wrapped { data } | Self::Bare(data) => data,
        }
    }
}

/// A page of results.
///
/// # Example Response
///
/// ```json
/// {
///     "urls": [...],
///     "pagination": { "page": 1, "limit": 10, "total": 42, "pages": 5 }
/// }
/// ```
#[derive(Clone, Default, PartialEq, Eq, Deserialize, Debug)]
pub struct Pagination {
    #[serde(default)]
    pub page: u64,

    #[serde(default)]
    pub limit: u64,

    /// Total number of items available
    #[serde(default)]
    pub total: u64,

    /// Total number of pages
    #[serde(default, alias = "totalPages")]
    pub pages: u64,
}

/// Parses and logs a JSON response body.
///
/// An empty body is parsed as `null`, so that endpoints without content can
/// be decoded into `()` or `Option<T>`.
///
/// # Logging
///
/// * Success: Logs parsed structure at TRACE level
/// * Parse Error: Logs raw JSON at TRACE level if valid JSON
/// * Invalid JSON: Logs error at ERROR level
pub fn json<T>(body: &[u8], origin: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        b"null".as_slice()
    } else {
        body
    };

    match serde_json::from_slice(body) {
        Ok(result) => {
            trace!("{origin}: {result:#?}");
            Ok(result)
        }
        Err(e) => {
            if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
                trace!("{origin}: {json:#?}");
            } else {
                error!("{origin}: failed parsing response ({e})");
            }
            Err(e.into())
        }
    }
}
