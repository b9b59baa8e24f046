use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who may watch a livestream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    MemberOnly,
    Private,
    Link,
}

/// Persisted livestream record.
///
/// `secret` is the stream key embedded in the broadcaster's push URL. It is
/// never part of a response body except as that push URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Livestream {
    pub uuid: Uuid,
    pub name: String,
    pub secret: String,
    pub owner_user_id: String,
    pub visibility: Visibility,
    pub title: String,
    pub information: String,
    pub ban_list: Vec<String>,
    pub mute_list: Vec<String>,
    pub is_archived: bool,
}

impl Livestream {
    #[must_use]
    pub fn new(owner_user_id: String, secret: String, request: CreateLivestreamRequest) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: request.name,
            secret,
            owner_user_id,
            visibility: request.visibility,
            title: request.title,
            information: request.information,
            ban_list: Vec::new(),
            mute_list: Vec::new(),
            is_archived: request.is_archived,
        }
    }

    /// Mute-list entries are keyed by identity provider and user id.
    #[must_use]
    pub fn mute_key(identity_provider: &str, user_id: &str) -> String {
        format!("{identity_provider}-{user_id}")
    }

    #[must_use]
    pub fn is_muted(&self, identity_provider: &str, user_id: &str) -> bool {
        let key = Self::mute_key(identity_provider, user_id);
        self.mute_list.iter().any(|entry| *entry == key)
    }

    /// Apply the fields present in `patch`, leaving the rest untouched.
    pub fn apply(&mut self, patch: UpdateLivestreamRequest) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(visibility) = patch.visibility {
            self.visibility = visibility;
        }
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(information) = patch.information {
            self.information = information;
        }
        if let Some(ban_list) = patch.ban_list {
            self.ban_list = ban_list;
        }
        if let Some(mute_list) = patch.mute_list {
            self.mute_list = mute_list;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateLivestreamRequest {
    pub name: String,
    pub visibility: Visibility,
    pub title: String,
    pub information: String,
    pub is_archived: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLivestreamResponse {
    pub uuid: Uuid,
    pub stream_push_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateLivestreamRequest {
    pub name: Option<String>,
    pub visibility: Option<Visibility>,
    pub title: Option<String>,
    pub information: Option<String>,
    pub ban_list: Option<Vec<String>>,
    pub mute_list: Option<Vec<String>>,
}

/// Administrator view of a livestream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivestreamDetail {
    pub uuid: Uuid,
    pub name: String,
    pub visibility: Visibility,
    pub title: String,
    pub information: String,
    pub stream_push_url: String,
    pub ban_list: Vec<String>,
    pub mute_list: Vec<String>,
    pub is_archived: bool,
}

/// Viewer view of the current livestream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivestreamSummary {
    pub uuid: Uuid,
    pub name: String,
    pub title: String,
    pub information: String,
    pub stream_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuteUserRequest {
    pub stream_uuid: Uuid,
    pub user_id: String,
}
