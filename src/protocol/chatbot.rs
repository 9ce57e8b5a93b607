//! Assistant conversation.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const MESSAGE: &str = "/api/chatbot/message";
pub const HISTORY: &str = "/api/chatbot/history";

#[derive(Clone, Debug, Serialize)]
pub struct Prompt {
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Reply {
    pub response: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "bot", alias = "model")]
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Message {
    pub role: Role,

    #[serde(alias = "message")]
    pub content: String,

    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

/// Transcript, either `{ "history": [...] }`, `{ "messages": [...] }` or a
/// bare array.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum History {
    Wrapped {
        #[serde(alias = "messages")]
        history: Vec<Message>,
    },
    Bare(Vec<Message>),
}

impl From<History> for Vec<Message> {
    fn from(history: History) -> Self {
        match history {
            History::Wrapped { history } | History::Bare(history) => history,
        }
    }
}
