//! Short URL types.
//!
//! # Example Response
//!
//! `GET /api/urls?page=1&limit=10`:
//!
//! ```json
//! {
//!     "urls": [
//!         {
//!             "id": "u1",
//!             "originalUrl": "https://example.com/a/very/long/path",
//!             "shortCode": "abc123",
//!             "title": "Example",
//!             "clickCount": 42,
//!             "isActive": true
//!         }
//!     ],
//!     "pagination": { "page": 1, "limit": 10, "total": 1, "pages": 1 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::Pagination;

pub const URLS: &str = "/api/urls";
pub const BULK: &str = "/api/urls/bulk";

#[must_use]
pub fn url(id: &str) -> String {
    format!("{URLS}/{id}")
}

#[must_use]
pub fn stats(id: &str) -> String {
    format!("{URLS}/{id}/stats")
}

#[must_use]
pub fn click_logs(id: &str) -> String {
    format!("{URLS}/{id}/click-logs")
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortUrl {
    #[serde(alias = "_id")]
    pub id: String,

    pub original_url: String,

    pub short_code: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_alias: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,

    #[serde(default)]
    pub click_count: u64,

    #[serde(default = "active")]
    pub is_active: bool,

    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<OffsetDateTime>,

    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,
}

fn active() -> bool {
    true
}

/// A single short URL, either `{ "url": { ... } }` or the URL itself.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum UrlPayload {
    Wrapped { url: ShortUrl },
    Bare(ShortUrl),
}

impl From<UrlPayload> for ShortUrl {
    fn from(payload: UrlPayload) -> Self {
        match payload {
            UrlPayload::Wrapped { url } | UrlPayload::Bare(url) => url,
        }
    }
}

/// Creation or update of a short URL; absent fields are left to the service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_alias: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,

    /// RFC 3339 expiry timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

/// Filters of the URL listing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct UrlPage {
    #[serde(default, alias = "items")]
    pub urls: Vec<ShortUrl>,

    #[serde(default)]
    pub pagination: Pagination,
}

#[derive(Clone, Debug, Serialize)]
pub struct BulkCreate {
    pub urls: Vec<UrlDraft>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDelete {
    pub url_ids: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResult {
    #[serde(default, alias = "urls")]
    pub created: Vec<ShortUrl>,

    #[serde(default)]
    pub deleted_count: Option<u64>,

    #[serde(default)]
    pub errors: Vec<serde_json::Value>,
}

/// A single visit of a short URL.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickLog {
    #[serde(default, alias = "_id")]
    pub id: String,

    #[serde(
        default,
        alias = "clickedAt",
        with = "time::serde::rfc3339::option"
    )]
    pub timestamp: Option<OffsetDateTime>,

    #[serde(default)]
    pub ip_address: Option<String>,

    #[serde(default)]
    pub user_agent: Option<String>,

    #[serde(default)]
    pub referrer: Option<String>,

    #[serde(default)]
    pub country: Option<String>,

    #[serde(default)]
    pub device: Option<String>,

    #[serde(default)]
    pub browser: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickLogPage {
    #[serde(default, alias = "clickLogs", alias = "items")]
    pub logs: Vec<ClickLog>,

    #[serde(default)]
    pub pagination: Pagination,
}

/// Per-URL traffic statistics. Breakdowns are passed through as sent.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlStats {
    #[serde(default)]
    pub total_clicks: u64,

    #[serde(default)]
    pub unique_visitors: Option<u64>,

    #[serde(flatten)]
    pub breakdowns: serde_json::Map<String, serde_json::Value>,
}
