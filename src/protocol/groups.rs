//! Groupings of short URLs.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const GROUPS: &str = "/api/groups";

#[must_use]
pub fn group(id: &str) -> String {
    format!("{GROUPS}/{id}")
}

#[must_use]
pub fn stats(id: &str) -> String {
    format!("{GROUPS}/{id}/stats")
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(alias = "_id")]
    pub id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    #[serde(default)]
    pub url_count: u64,

    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// A single group, either `{ "group": { ... } }` or the group itself.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum GroupPayload {
    Wrapped { group: Group },
    Bare(Group),
}

impl From<GroupPayload> for Group {
    fn from(payload: GroupPayload) -> Self {
        match payload {
            GroupPayload::Wrapped { group } | GroupPayload::Bare(group) => group,
        }
    }
}

/// Group listing, either `{ "groups": [...] }` or a bare array.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum GroupList {
    Wrapped { groups: Vec<Group> },
    Bare(Vec<Group>),
}

impl From<GroupList> for Vec<Group> {
    fn from(list: GroupList) -> Self {
        match list {
            GroupList::Wrapped { groups } | GroupList::Bare(groups) => groups,
        }
    }
}

/// Aggregated traffic of a group. Breakdowns are passed through as sent.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    #[serde(default)]
    pub total_urls: u64,

    #[serde(default)]
    pub total_clicks: u64,

    #[serde(flatten)]
    pub breakdowns: serde_json::Map<String, serde_json::Value>,
}
