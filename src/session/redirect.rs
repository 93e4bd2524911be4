//! Where visitors are sent: login detours, post-login destinations and
//! role dashboards.

use super::RouteState;
use crate::models::UserType;

pub const LANDING_PATH: &str = "/";
pub const LOGIN_PATH: &str = "/login";
pub const SIGNUP_PATH: &str = "/signup";
pub const CLIENT_DASHBOARD_PATH: &str = "/dashboard";
pub const SERVICES_PATH: &str = "/services";
pub const ACCOUNT_SETTINGS_PATH: &str = "/account/settings";
pub const PROVIDER_DASHBOARD_PATH: &str = "/provider/dashboard";
pub const ADMIN_DASHBOARD_PATH: &str = "/admin/dashboard";

/// Query parameter carrying the page to return to after login
pub const REDIRECT_PARAM: &str = "redirect";

pub fn encode_redirect(path_and_query: &str) -> String {
    urlencoding::encode(path_and_query).into_owned()
}

/// Decode a redirect parameter. Only local absolute paths are accepted.
pub fn decode_redirect(encoded: &str) -> Option<String> {
    let decoded = urlencoding::decode(encoded).ok()?;
    sanitize_redirect(&decoded).map(str::to_string)
}

/// Reject anything that would leave the site (`//host`, `https://…`, `/\host`)
pub fn sanitize_redirect(target: &str) -> Option<&str> {
    let target = target.trim();
    if !target.starts_with('/') || target.starts_with("//") || target.starts_with("/\\") {
        return None;
    }
    Some(target)
}

/// Pull the redirect parameter out of a raw query string
pub fn redirect_from_query(raw_query: Option<&str>) -> Option<String> {
    raw_query?.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next()?;
        let value = parts.next()?;
        if key == REDIRECT_PARAM {
            decode_redirect(value)
        } else {
            None
        }
    })
}

/// Login page URL that returns to `requested` afterwards
pub fn login_url(requested: &str) -> String {
    format!(
        "{}?{}={}",
        LOGIN_PATH,
        REDIRECT_PARAM,
        encode_redirect(requested)
    )
}

/// Destination after a successful credential check.
///
/// `user_type` is `None` when the profile is missing, has no role tag or
/// could not be loaded; all of those route like a client.
pub fn post_login_destination(user_type: Option<UserType>, redirect: Option<&str>) -> String {
    match user_type {
        Some(UserType::Admin) | Some(UserType::SuperAdmin) => ADMIN_DASHBOARD_PATH.to_string(),
        Some(UserType::Provider) => PROVIDER_DASHBOARD_PATH.to_string(),
        None | Some(UserType::Client) => redirect
            .and_then(sanitize_redirect)
            .unwrap_or(SERVICES_PATH)
            .to_string(),
    }
}

/// Dashboard for an authenticated visitor arriving on the landing page
pub fn landing_destination(state: RouteState) -> Option<&'static str> {
    match state {
        RouteState::Admin => Some(ADMIN_DASHBOARD_PATH),
        RouteState::Provider => Some(PROVIDER_DASHBOARD_PATH),
        RouteState::Client => Some(CLIENT_DASHBOARD_PATH),
        RouteState::Anonymous | RouteState::Loading => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_round_trip() {
        let original = "/account/settings?x=1";
        let encoded = encode_redirect(original);
        assert_eq!(encoded, "%2Faccount%2Fsettings%3Fx%3D1");
        assert_eq!(decode_redirect(&encoded).as_deref(), Some(original));
    }

    #[test]
    fn test_login_url_carries_encoded_path() {
        assert_eq!(
            login_url("/account/settings?x=1&y=2"),
            "/login?redirect=%2Faccount%2Fsettings%3Fx%3D1%26y%3D2"
        );
        assert_eq!(
            redirect_from_query(Some("redirect=%2Faccount%2Fsettings%3Fx%3D1%26y%3D2")).as_deref(),
            Some("/account/settings?x=1&y=2")
        );
    }

    #[test]
    fn test_redirect_from_query_ignores_other_params() {
        assert_eq!(
            redirect_from_query(Some("lang=en&redirect=%2Fcheckout")).as_deref(),
            Some("/checkout")
        );
        assert_eq!(redirect_from_query(Some("lang=en")), None);
        assert_eq!(redirect_from_query(None), None);
    }

    #[test]
    fn test_off_site_redirects_are_dropped() {
        assert_eq!(decode_redirect("https%3A%2F%2Fevil.example"), None);
        assert_eq!(decode_redirect("%2F%2Fevil.example"), None);
        assert_eq!(decode_redirect("%2F%5Cevil.example"), None);
        assert_eq!(
            post_login_destination(None, Some("//evil.example")),
            SERVICES_PATH
        );
    }

    #[test]
    fn test_provider_ignores_redirect() {
        assert_eq!(
            post_login_destination(Some(UserType::Provider), Some("/checkout")),
            PROVIDER_DASHBOARD_PATH
        );
        assert_eq!(
            post_login_destination(Some(UserType::Provider), None),
            PROVIDER_DASHBOARD_PATH
        );
    }

    #[test]
    fn test_admins_ignore_redirect() {
        for user_type in [UserType::Admin, UserType::SuperAdmin] {
            assert_eq!(
                post_login_destination(Some(user_type), Some("/checkout")),
                ADMIN_DASHBOARD_PATH
            );
        }
    }

    #[test]
    fn test_client_destinations() {
        assert_eq!(
            post_login_destination(Some(UserType::Client), Some("/checkout")),
            "/checkout"
        );
        assert_eq!(post_login_destination(Some(UserType::Client), None), SERVICES_PATH);
        // No profile yet, or the fetch failed
        assert_eq!(post_login_destination(None, Some("/checkout")), "/checkout");
        assert_eq!(post_login_destination(None, None), SERVICES_PATH);
    }

    #[test]
    fn test_landing_destinations() {
        assert_eq!(landing_destination(RouteState::Admin), Some(ADMIN_DASHBOARD_PATH));
        assert_eq!(
            landing_destination(RouteState::Provider),
            Some(PROVIDER_DASHBOARD_PATH)
        );
        assert_eq!(landing_destination(RouteState::Client), Some(CLIENT_DASHBOARD_PATH));
        assert_eq!(landing_destination(RouteState::Anonymous), None);
        assert_eq!(landing_destination(RouteState::Loading), None);
    }
}
