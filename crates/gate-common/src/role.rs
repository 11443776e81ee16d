//! Caller roles

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role of an authenticated caller within a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Site administrator
    Admin,
    /// Owner of one or more listings
    Owner,
    /// Regular member
    User,
}

impl Role {
    /// Stable name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Owner => "owner",
            Self::User => "user",
        }
    }

    /// Whether this role grants what `required` grants
    pub fn satisfies(self, required: Role) -> bool {
        match (self, required) {
            (Self::Admin, _) => true,
            (Self::Owner, Self::Owner | Self::User) => true,
            (Self::Owner, Self::Admin) => false,
            (Self::User, Self::User) => true,
            (Self::User, Self::Admin | Self::Owner) => false,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized role string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "owner" => Ok(Self::Owner),
            "user" => Ok(Self::User),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}
