//! Admin notifications derived from profile rows.
//!
//! Nothing here is persisted: the list is recomputed from the profile table
//! on every load, so a notification disappears as soon as its condition no
//! longer holds (a provider gets verified, a sign-up ages out of the window).

use chrono::{DateTime, Duration, Utc};

use crate::backend::{BackendError, ProfileStore};
use crate::models::{Notification, NotificationKind, Profile, UserType};

/// How far back a sign-up still counts as new
pub const RECENT_SIGNUP_DAYS: i64 = 30;

fn new_signup(profile: &Profile) -> Notification {
    Notification {
        id: format!("{}:{}", NotificationKind::NewSignup, profile.id),
        kind: NotificationKind::NewSignup,
        title: "New user signup".to_string(),
        message: format!(
            "{} joined as a {}",
            profile.display_name(),
            profile.role()
        ),
        profile_id: profile.id.clone(),
        created_at: profile.created_at,
    }
}

fn pending_verification(profile: &Profile) -> Notification {
    Notification {
        id: format!("{}:{}", NotificationKind::PendingVerification, profile.id),
        kind: NotificationKind::PendingVerification,
        title: "Provider awaiting verification".to_string(),
        message: format!("{} is waiting to be verified", profile.display_name()),
        profile_id: profile.id.clone(),
        created_at: profile.created_at,
    }
}

/// Sign-ups from the last 30 days plus every unverified provider, newest first
pub fn derive_notifications(profiles: &[Profile], now: DateTime<Utc>) -> Vec<Notification> {
    let cutoff = now - Duration::days(RECENT_SIGNUP_DAYS);
    let mut notifications: Vec<Notification> = profiles
        .iter()
        .flat_map(|profile| {
            let recent = (profile.created_at >= cutoff).then(|| new_signup(profile));
            let pending = (profile.user_type == Some(UserType::Provider) && !profile.is_verified)
                .then(|| pending_verification(profile));
            recent.into_iter().chain(pending)
        })
        .collect();

    notifications.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    notifications
}

pub async fn load(
    store: &dyn ProfileStore,
    now: DateTime<Utc>,
) -> Result<Vec<Notification>, BackendError> {
    let profiles = store.list_profiles().await?;
    let notifications = derive_notifications(&profiles, now);
    tracing::debug!(
        profiles = profiles.len(),
        notifications = notifications.len(),
        "Derived admin notifications"
    );
    Ok(notifications)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewProfile;

    fn profile(id: &str, user_type: UserType, verified: bool, age_days: i64, now: DateTime<Utc>) -> Profile {
        let mut profile = NewProfile::new(id, format!("{}@example.com", id), user_type)
            .into_profile(now - Duration::days(age_days));
        profile.is_verified = verified;
        profile
    }

    #[test]
    fn test_recent_signups_and_pending_providers() {
        let now = Utc::now();
        let profiles = vec![
            profile("old-client", UserType::Client, false, 45, now),
            profile("new-client", UserType::Client, false, 2, now),
            profile("old-provider", UserType::Provider, false, 90, now),
            profile("new-provider", UserType::Provider, false, 1, now),
            profile("verified-provider", UserType::Provider, true, 60, now),
        ];

        let ids: Vec<String> = derive_notifications(&profiles, now)
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(
            ids,
            vec![
                "new_signup:new-provider",
                "pending_verification:new-provider",
                "new_signup:new-client",
                "pending_verification:old-provider",
            ]
        );
    }

    #[test]
    fn test_window_boundary() {
        let now = Utc::now();
        let at_edge = profile("edge", UserType::Client, true, RECENT_SIGNUP_DAYS, now);
        assert_eq!(derive_notifications(&[at_edge], now).len(), 1);

        let past_edge = profile("past", UserType::Client, true, RECENT_SIGNUP_DAYS + 1, now);
        assert!(derive_notifications(&[past_edge], now).is_empty());
    }

    #[test]
    fn test_message_uses_display_name() {
        let now = Utc::now();
        let mut p = profile("p1", UserType::Provider, false, 0, now);
        p.full_name = Some("Kofi Boateng".to_string());
        let notifications = derive_notifications(&[p], now);
        assert_eq!(notifications[0].message, "Kofi Boateng joined as a provider");
        assert_eq!(notifications[1].message, "Kofi Boateng is waiting to be verified");
    }
}
