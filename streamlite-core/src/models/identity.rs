use serde::{Deserialize, Serialize};

use super::role::Role;

/// Caller identity derived from a verified bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub user_name: String,
    #[serde(default)]
    pub avatar: String,
    pub role: Role,
    /// Login provider that issued the account, e.g. "discord" or "origin"
    pub identity_provider: String,
}

impl Identity {
    #[must_use]
    pub fn can(&self, required: Role) -> bool {
        self.role.satisfies(required)
    }
}
