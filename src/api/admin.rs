//! Admin-only profile management and notifications.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use super::auth::{AdminViewer, Viewer};
use super::error::ApiError;
use super::profile::check_update_fields;
use crate::models::{Notification, Profile, ProfileUpdate, UserType};
use crate::notifications;
use crate::AppState;

/// Permission rules for an admin editing a profile:
/// only super admins hand out admin tags or touch other admins' accounts,
/// and nobody changes their own role.
pub(crate) fn check_admin_update(
    actor: &Viewer,
    target: &Profile,
    update: &ProfileUpdate,
) -> Result<(), ApiError> {
    check_update_fields(update)?;

    let is_self = target.id == actor.identity.id;
    if update.user_type.is_some() && is_self {
        return Err(ApiError::forbidden("You cannot change your own role"));
    }

    let actor_is_super = actor.profile.as_ref().map(Profile::role) == Some(UserType::SuperAdmin);
    if actor_is_super {
        return Ok(());
    }
    if !is_self && target.role().is_admin() {
        return Err(ApiError::forbidden(
            "Only a super admin can change another admin's account",
        ));
    }
    if update.user_type.is_some_and(|t| t.is_admin()) {
        return Err(ApiError::forbidden(
            "Only a super admin can grant admin roles",
        ));
    }
    Ok(())
}

pub async fn apply_admin_update(
    state: &AppState,
    actor: &Viewer,
    target_id: &str,
    update: &ProfileUpdate,
) -> Result<Profile, ApiError> {
    let profiles = state.backend.profiles();
    let target = profiles
        .fetch_profile(target_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Profile not found"))?;
    check_admin_update(actor, &target, update)?;

    let profile = profiles.update_profile(target_id, update).await?;
    if target_id == actor.identity.id {
        actor.session.provider.refresh_profile().await;
    }

    info!(
        admin_id = %actor.identity.id,
        profile_id = %target_id,
        user_type = ?update.user_type,
        is_verified = ?update.is_verified,
        "Profile updated by admin"
    );
    Ok(profile)
}

/// GET /api/admin/profiles
pub async fn list_profiles(
    State(state): State<Arc<AppState>>,
    _admin: AdminViewer,
) -> Result<Json<Vec<Profile>>, ApiError> {
    let profiles = state.backend.profiles().list_profiles().await?;
    Ok(Json(profiles))
}

/// PUT /api/admin/profiles/:id
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    AdminViewer(admin): AdminViewer,
    Path(id): Path<String>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<Profile>, ApiError> {
    let profile = apply_admin_update(&state, &admin, &id, &update).await?;
    Ok(Json(profile))
}

/// GET /api/admin/notifications
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    _admin: AdminViewer,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let store = state.backend.profiles();
    let notifications = notifications::load(store.as_ref(), Utc::now()).await?;
    Ok(Json(notifications))
}
