//! Maps a session snapshot to the area of the site the visitor belongs in.

use serde::Serialize;

use super::SessionSnapshot;
use crate::models::UserType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteState {
    Anonymous,
    Loading,
    Client,
    Provider,
    Admin,
}

impl RouteState {
    pub fn is_authenticated(&self) -> bool {
        matches!(
            self,
            RouteState::Client | RouteState::Provider | RouteState::Admin
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteState::Anonymous => "anonymous",
            RouteState::Loading => "loading",
            RouteState::Client => "client",
            RouteState::Provider => "provider",
            RouteState::Admin => "admin",
        }
    }
}

impl std::fmt::Display for RouteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role-based route state for a role tag. A missing tag or missing profile
/// routes as a client.
pub fn route_for_role(user_type: Option<UserType>) -> RouteState {
    match user_type {
        None | Some(UserType::Client) => RouteState::Client,
        Some(UserType::Provider) => RouteState::Provider,
        Some(UserType::Admin) | Some(UserType::SuperAdmin) => RouteState::Admin,
    }
}

pub fn resolve(snapshot: &SessionSnapshot) -> RouteState {
    if snapshot.loading {
        return RouteState::Loading;
    }
    match snapshot.identity {
        None => RouteState::Anonymous,
        Some(_) => route_for_role(snapshot.profile.as_ref().and_then(|p| p.user_type)),
    }
}
