//! Account-wide aggregates.
//!
//! The dashboard payloads feed charts only; apart from the headline numbers
//! they are passed through as sent.

use serde::{Deserialize, Serialize};

pub const DASHBOARD: &str = "/api/dashboard";
pub const ANALYTICS: &str = "/api/dashboard/analytics";

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    #[serde(default)]
    pub total_urls: u64,

    #[serde(default)]
    pub total_clicks: u64,

    #[serde(default)]
    pub total_groups: u64,

    #[serde(default)]
    pub active_urls: u64,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Time window of the analytics aggregate, such as `7d` or `30d`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AnalyticsQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Analytics {
    #[serde(flatten)]
    pub series: serde_json::Map<String, serde_json::Value>,
}
