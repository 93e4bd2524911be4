//! Access decisions for the protected areas of the site.

use super::redirect::{login_url, LANDING_PATH};
use super::RouteState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Show the protected page
    Render,
    /// The session is still settling; show a loading placeholder
    Placeholder,
    /// Send the visitor elsewhere
    Redirect(String),
}

/// Any signed-in visitor. Anonymous visitors are sent to login and brought
/// back to `requested` (path and query) afterwards.
pub fn authenticated_area(state: RouteState, requested: &str) -> GuardDecision {
    match state {
        RouteState::Loading => GuardDecision::Placeholder,
        RouteState::Anonymous => GuardDecision::Redirect(login_url(requested)),
        RouteState::Client | RouteState::Provider | RouteState::Admin => GuardDecision::Render,
    }
}

/// Admins only. Everyone else goes to the site root with no way back.
pub fn admin_area(state: RouteState) -> GuardDecision {
    match state {
        RouteState::Loading => GuardDecision::Placeholder,
        RouteState::Admin => GuardDecision::Render,
        RouteState::Anonymous | RouteState::Client | RouteState::Provider => {
            GuardDecision::Redirect(LANDING_PATH.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::redirect::decode_redirect;

    #[test]
    fn test_anonymous_is_sent_to_login_with_return_path() {
        let decision = authenticated_area(RouteState::Anonymous, "/account/settings?x=1");
        assert_eq!(
            decision,
            GuardDecision::Redirect("/login?redirect=%2Faccount%2Fsettings%3Fx%3D1".to_string())
        );

        let GuardDecision::Redirect(url) = decision else {
            unreachable!()
        };
        let encoded = url.split_once("redirect=").unwrap().1;
        assert_eq!(decode_redirect(encoded).as_deref(), Some("/account/settings?x=1"));
    }

    #[test]
    fn test_authenticated_area_renders_for_every_role() {
        for state in [RouteState::Client, RouteState::Provider, RouteState::Admin] {
            assert_eq!(authenticated_area(state, "/dashboard"), GuardDecision::Render);
        }
        assert_eq!(
            authenticated_area(RouteState::Loading, "/dashboard"),
            GuardDecision::Placeholder
        );
    }

    #[test]
    fn test_admin_area() {
        assert_eq!(admin_area(RouteState::Admin), GuardDecision::Render);
        assert_eq!(admin_area(RouteState::Loading), GuardDecision::Placeholder);
        for state in [RouteState::Anonymous, RouteState::Client, RouteState::Provider] {
            assert_eq!(admin_area(state), GuardDecision::Redirect("/".to_string()));
        }
    }
}
