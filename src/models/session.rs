use chrono::{DateTime, Utc};

use super::{auth::Token, user::UserProfile};

/// Client-side session. Any subset of the fields may be present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub access_token: Option<Token>,
    pub refresh_token: Option<Token>,
    pub expires_at: Option<DateTime<Utc>>,
    pub user: Option<UserProfile>,
}

impl Session {
    /// Access token and profile both present; anything less renders as signed out.
    pub fn is_complete(&self) -> bool {
        self.access_token.is_some() && self.user.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none()
            && self.refresh_token.is_none()
            && self.expires_at.is_none()
            && self.user.is_none()
    }
}

/// Which front end issued a request; decides where a forced logout lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Portal {
    #[default]
    Citizen,
    Admin,
    SuperAdmin,
}

impl Portal {
    pub fn login_route(self) -> &'static str {
        match self {
            Portal::Citizen => "/login",
            Portal::Admin => "/admin/login",
            Portal::SuperAdmin => "/super-admin/login",
        }
    }
}

impl std::fmt::Display for Portal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Portal::Citizen => "citizen",
            Portal::Admin => "admin",
            Portal::SuperAdmin => "super_admin",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Portal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "citizen" => Ok(Portal::Citizen),
            "admin" => Ok(Portal::Admin),
            "super_admin" | "super-admin" => Ok(Portal::SuperAdmin),
            _ => Err(anyhow::anyhow!("Unknown portal: {s}")),
        }
    }
}
