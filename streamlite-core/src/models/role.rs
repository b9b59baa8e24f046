use serde::{Deserialize, Serialize};

/// Platform role carried in the bearer token.
///
/// Ordered from most to least privileged; a gate passes when the caller's
/// role is at or below the required one in this ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Role {
    Admin = 0,
    Streamer = 1,
    Editor = 2,
    User = 3,
    Guest = 4,
}

impl Role {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Streamer => "streamer",
            Self::Editor => "editor",
            Self::User => "user",
            Self::Guest => "guest",
        }
    }

    /// True when this role grants at least the privileges of `required`.
    #[must_use]
    pub fn satisfies(self, required: Self) -> bool {
        self <= required
    }
}

impl From<Role> for u8 {
    fn from(role: Role) -> Self {
        role as Self
    }
}

impl TryFrom<u8> for Role {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Admin),
            1 => Ok(Self::Streamer),
            2 => Ok(Self::Editor),
            3 => Ok(Self::User),
            4 => Ok(Self::Guest),
            _ => Err(format!("Unknown role: {value}")),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
