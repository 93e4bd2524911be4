//! Self-service profile endpoints.

use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::info;

use super::auth::Viewer;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::validate_profile_update;
use crate::models::{Profile, ProfileUpdate};
use crate::AppState;

/// Reject empty or malformed patches
pub(crate) fn check_update_fields(update: &ProfileUpdate) -> Result<(), ApiError> {
    if update.is_empty() {
        return Err(ApiError::bad_request("Nothing to update"));
    }
    let mut errors = ValidationErrorBuilder::new();
    for (field, message) in validate_profile_update(update) {
        errors.add(field, message);
    }
    errors.finish()
}

/// Update the viewer's own profile and re-sync their session with it.
/// Role and verification stay admin-only.
pub async fn update_own_profile(
    state: &AppState,
    viewer: &Viewer,
    update: &ProfileUpdate,
) -> Result<Profile, ApiError> {
    if update.touches_privileged_fields() {
        return Err(ApiError::forbidden(
            "Role and verification can only be changed by an admin",
        ));
    }
    check_update_fields(update)?;

    let profile = state
        .backend
        .profiles()
        .update_profile(&viewer.identity.id, update)
        .await?;
    viewer.session.provider.refresh_profile().await;

    info!(user_id = %viewer.identity.id, "Profile updated");
    Ok(profile)
}

/// GET /api/profile
pub async fn get_profile(viewer: Viewer) -> Result<Json<Profile>, ApiError> {
    viewer
        .profile
        .map(Json)
        .ok_or_else(|| ApiError::not_found("No profile for this account yet"))
}

/// PUT /api/profile
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    viewer: Viewer,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<Profile>, ApiError> {
    let profile = update_own_profile(&state, &viewer, &update).await?;
    Ok(Json(profile))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ErrorCode;

    #[test]
    fn test_empty_patch_is_rejected() {
        let err = check_update_fields(&ProfileUpdate::default()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadRequest);
    }

    #[test]
    fn test_invalid_fields_are_reported() {
        let update = ProfileUpdate {
            phone: Some("not a phone".to_string()),
            ..Default::default()
        };
        let err = check_update_fields(&update).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert_eq!(err.message(), "Invalid phone number");
    }

    #[test]
    fn test_valid_patch_passes() {
        let update = ProfileUpdate {
            full_name: Some("Efua Asante".to_string()),
            location: Some("Takoradi".to_string()),
            ..Default::default()
        };
        assert!(check_update_fields(&update).is_ok());
    }
}
