//! Profile and role models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role tag stored on a profile. Governs which area of the site a visitor may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    Client,
    Provider,
    Admin,
    SuperAdmin,
}

impl UserType {
    /// Both admin tags grant the admin area
    pub fn is_admin(&self) -> bool {
        matches!(self, UserType::Admin | UserType::SuperAdmin)
    }

    /// Roles a visitor may pick for themselves when signing up
    pub fn is_self_assignable(&self) -> bool {
        matches!(self, UserType::Client | UserType::Provider)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Client => "client",
            UserType::Provider => "provider",
            UserType::Admin => "admin",
            UserType::SuperAdmin => "super_admin",
        }
    }
}

impl std::fmt::Display for UserType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "client" => Ok(UserType::Client),
            "provider" => Ok(UserType::Provider),
            "admin" => Ok(UserType::Admin),
            "super_admin" => Ok(UserType::SuperAdmin),
            _ => Err(format!("Unknown user type: {}", s)),
        }
    }
}

/// Application record attached one-to-one to an identity.
///
/// `id` is the identity id issued by the auth service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// Absent means client
    #[serde(default)]
    pub user_type: Option<UserType>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub completed_jobs: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn role(&self) -> UserType {
        self.user_type.unwrap_or(UserType::Client)
    }

    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(self.email.as_deref())
            .unwrap_or(&self.id)
    }
}

/// Row inserted when an identity signs up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProfile {
    pub id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub user_type: UserType,
    pub is_verified: bool,
}

impl NewProfile {
    pub fn new(id: impl Into<String>, email: impl Into<String>, user_type: UserType) -> Self {
        Self {
            id: id.into(),
            email: Some(email.into()),
            full_name: None,
            phone: None,
            location: None,
            user_type,
            is_verified: false,
        }
    }

    pub fn with_full_name(mut self, full_name: Option<String>) -> Self {
        self.full_name = full_name.filter(|n| !n.trim().is_empty());
        self
    }

    pub fn into_profile(self, now: DateTime<Utc>) -> Profile {
        Profile {
            id: self.id,
            email: self.email,
            full_name: self.full_name,
            phone: self.phone,
            location: self.location,
            user_type: Some(self.user_type),
            is_verified: self.is_verified,
            rating: None,
            completed_jobs: 0,
            created_at: now,
            updated_at: None,
        }
    }
}

/// Partial update of a profile row. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<UserType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_verified: Option<bool>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.phone.is_none()
            && self.location.is_none()
            && self.user_type.is_none()
            && self.is_verified.is_none()
    }

    /// Fields only an admin may change
    pub fn touches_privileged_fields(&self) -> bool {
        self.user_type.is_some() || self.is_verified.is_some()
    }

    pub fn apply_to(&self, profile: &mut Profile, now: DateTime<Utc>) {
        if let Some(ref name) = self.full_name {
            profile.full_name = Some(name.clone());
        }
        if let Some(ref phone) = self.phone {
            profile.phone = Some(phone.clone());
        }
        if let Some(ref location) = self.location {
            profile.location = Some(location.clone());
        }
        if let Some(user_type) = self.user_type {
            profile.user_type = Some(user_type);
        }
        if let Some(verified) = self.is_verified {
            profile.is_verified = verified;
        }
        profile.updated_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_type_round_trips_through_strings() {
        for user_type in [
            UserType::Client,
            UserType::Provider,
            UserType::Admin,
            UserType::SuperAdmin,
        ] {
            assert_eq!(user_type.to_string().parse::<UserType>(), Ok(user_type));
        }
        assert!("owner".parse::<UserType>().is_err());
    }

    #[test]
    fn test_admin_tags() {
        assert!(UserType::Admin.is_admin());
        assert!(UserType::SuperAdmin.is_admin());
        assert!(!UserType::Provider.is_admin());
        assert!(!UserType::Client.is_admin());
    }

    #[test]
    fn test_profile_without_user_type_is_client() {
        let profile: Profile = serde_json::from_value(serde_json::json!({
            "id": "u-1",
            "created_at": "2025-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(profile.role(), UserType::Client);
        assert_eq!(profile.display_name(), "u-1");
    }

    #[test]
    fn test_super_admin_deserializes_from_snake_case() {
        let profile: Profile = serde_json::from_value(serde_json::json!({
            "id": "u-2",
            "user_type": "super_admin",
            "created_at": "2025-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(profile.user_type, Some(UserType::SuperAdmin));
    }

    #[test]
    fn test_update_applies_only_present_fields() {
        let now = Utc::now();
        let mut profile = NewProfile::new("u-3", "a@example.com", UserType::Provider)
            .with_full_name(Some("Ada".to_string()))
            .into_profile(now);

        let update = ProfileUpdate {
            phone: Some("555-0100".to_string()),
            is_verified: Some(true),
            ..Default::default()
        };
        assert!(update.touches_privileged_fields());
        update.apply_to(&mut profile, now);

        assert_eq!(profile.full_name.as_deref(), Some("Ada"));
        assert_eq!(profile.phone.as_deref(), Some("555-0100"));
        assert!(profile.is_verified);
        assert_eq!(profile.updated_at, Some(now));
    }

    #[test]
    fn test_empty_update_serializes_to_empty_object() {
        let update = ProfileUpdate::default();
        assert!(update.is_empty());
        assert_eq!(serde_json::to_string(&update).unwrap(), "{}");
    }
}
