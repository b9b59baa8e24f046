use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordered-log message id in `<millis>-<seq>` form.
///
/// Ids compare by time first and sequence second, which is also the order
/// messages were appended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ChatId {
    pub millis: u64,
    pub seq: u64,
}

impl ChatId {
    #[must_use]
    pub const fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    /// Next id strictly after `last`, using `now_millis` when the clock has moved on.
    #[must_use]
    pub fn next_after(last: Option<Self>, now_millis: u64) -> Self {
        match last {
            Some(last) if last.millis >= now_millis => Self::new(last.millis, last.seq + 1),
            _ => Self::new(now_millis, 0),
        }
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for ChatId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (millis, seq) = match s.split_once('-') {
            Some((millis, seq)) => (millis, seq),
            None => (s, "0"),
        };
        let millis = millis
            .parse::<u64>()
            .map_err(|_| format!("Invalid chat id: {s}"))?;
        let seq = seq.parse::<u64>().map_err(|_| format!("Invalid chat id: {s}"))?;
        Ok(Self::new(millis, seq))
    }
}

impl From<ChatId> for String {
    fn from(id: ChatId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ChatId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A chat message as stored in the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: ChatId,
    pub user_id: String,
    pub user_name: String,
    pub avatar: String,
    pub message: String,
}

/// A chat message before the log has assigned it an id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChatMessage {
    pub user_id: String,
    pub user_name: String,
    pub avatar: String,
    pub message: String,
}

impl NewChatMessage {
    #[must_use]
    pub fn with_id(self, id: ChatId) -> ChatMessage {
        ChatMessage {
            id,
            user_id: self.user_id,
            user_name: self.user_name,
            avatar: self.avatar,
            message: self.message,
        }
    }
}

/// Where a chat page starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatCursor {
    /// The most recent messages, oldest first
    Newest,
    /// Messages strictly after the given id
    After(ChatId),
}

impl FromStr for ChatCursor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newest" | "-1" => Ok(Self::Newest),
            other => other.parse().map(Self::After),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddChatRequest {
    pub stream_uuid: uuid::Uuid,
    pub message: String,
}
