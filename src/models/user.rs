use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Citizen,
    Staff,
    Admin,
    SuperAdmin,
    /// Role names the backend may add later; kept verbatim so the snapshot round-trips.
    #[serde(untagged)]
    Other(String),
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UserRole::Citizen => "citizen",
            UserRole::Staff => "staff",
            UserRole::Admin => "admin",
            UserRole::SuperAdmin => "super_admin",
            UserRole::Other(s) => s.as_str(),
        };
        write!(f, "{s}")
    }
}

/// Denormalized profile snapshot cached next to the tokens for rendering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub role: UserRole,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub is_superuser: bool,
}

impl UserProfile {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.is_superuser || self.permissions.iter().any(|p| p == permission)
    }
}
