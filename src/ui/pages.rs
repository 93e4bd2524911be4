// HTML page rendering. Markup is intentionally bare; every dynamic value
// goes through `escape`.

use axum::response::Html;
use std::fmt::Write;

use crate::api::auth::Viewer;
use crate::models::{Notification, Profile, UserType};
use crate::session::redirect::{
    ACCOUNT_SETTINGS_PATH, ADMIN_DASHBOARD_PATH, CLIENT_DASHBOARD_PATH, LOGIN_PATH,
    PROVIDER_DASHBOARD_PATH, REDIRECT_PARAM, SERVICES_PATH, SIGNUP_PATH,
};
use crate::session::RouteState;

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(title: &str, head_extra: &str, nav: &str, body: &str) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title} · Marketplace</title>
{head_extra}
</head>
<body>
<header><a href="/">Marketplace</a> {nav}</header>
<main>
{body}
</main>
</body>
</html>"#,
        title = escape(title),
        head_extra = head_extra,
        nav = nav,
        body = body,
    ))
}

fn anonymous_nav() -> String {
    format!(
        r#"<nav><a href="{}">Log in</a> <a href="{}">Sign up</a></nav>"#,
        LOGIN_PATH, SIGNUP_PATH
    )
}

fn viewer_nav(viewer: &Viewer) -> String {
    let mut nav = String::from("<nav>");
    let home = match viewer.route {
        RouteState::Admin => ADMIN_DASHBOARD_PATH,
        RouteState::Provider => PROVIDER_DASHBOARD_PATH,
        _ => CLIENT_DASHBOARD_PATH,
    };
    let _ = write!(nav, r#"<a href="{}">Dashboard</a> "#, home);
    let _ = write!(nav, r#"<a href="{}">Services</a> "#, SERVICES_PATH);
    let _ = write!(nav, r#"<a href="{}">Account</a> "#, ACCOUNT_SETTINGS_PATH);
    if viewer.route == RouteState::Admin {
        nav.push_str(r#"<a href="/admin/users">Users</a> <a href="/admin/notifications">Notifications</a> "#);
    }
    let _ = write!(
        nav,
        r#"<span>{}</span> <form method="post" action="/logout" style="display:inline"><button type="submit">Log out</button></form></nav>"#,
        escape(viewer.display_name())
    );
    nav
}

fn banner(class: &str, message: Option<&str>) -> String {
    match message {
        Some(message) => format!(
            r#"<p class="{}" role="alert">{}</p>"#,
            class,
            escape(message)
        ),
        None => String::new(),
    }
}

pub fn landing_page() -> Html<String> {
    layout(
        "Find trusted local services",
        "",
        &anonymous_nav(),
        &format!(
            r#"<h1>Find trusted local services</h1>
<p>Book verified providers for cleaning, repairs, tutoring and more.</p>
<p><a href="{}">Get started</a> or <a href="{}">log in</a>.</p>"#,
            SIGNUP_PATH, LOGIN_PATH
        ),
    )
}

/// Shown while the session is still resolving. Reloads `retry_path` shortly.
pub fn loading_page(retry_path: &str) -> Html<String> {
    layout(
        "Loading",
        &format!(
            r#"<meta http-equiv="refresh" content="1;url={}">"#,
            escape(retry_path)
        ),
        "",
        r#"<p aria-busy="true">Loading…</p>"#,
    )
}

pub fn login_page(error: Option<&str>, redirect: Option<&str>, email: &str) -> Html<String> {
    let redirect_field = redirect
        .map(|r| {
            format!(
                r#"<input type="hidden" name="{}" value="{}">"#,
                REDIRECT_PARAM,
                escape(r)
            )
        })
        .unwrap_or_default();
    layout(
        "Log in",
        "",
        &anonymous_nav(),
        &format!(
            r#"<h1>Log in</h1>
{error}
<form method="post" action="{action}">
{redirect_field}
<label>Email <input type="email" name="email" value="{email}" required></label>
<label>Password <input type="password" name="password" required></label>
<button type="submit">Log in</button>
</form>
<p>No account yet? <a href="{signup}">Sign up</a></p>"#,
            error = banner("error", error),
            action = LOGIN_PATH,
            redirect_field = redirect_field,
            email = escape(email),
            signup = SIGNUP_PATH,
        ),
    )
}

/// Values echoed back into the sign-up form after a failed submission
#[derive(Debug, Default, Clone)]
pub struct SignupValues {
    pub email: String,
    pub full_name: String,
    pub user_type: Option<UserType>,
}

pub fn signup_page(error: Option<&str>, values: &SignupValues) -> Html<String> {
    let option = |user_type: UserType, label: &str| {
        let selected = if values.user_type == Some(user_type) {
            " selected"
        } else {
            ""
        };
        format!(
            r#"<option value="{}"{}>{}</option>"#,
            user_type, selected, label
        )
    };
    layout(
        "Sign up",
        "",
        &anonymous_nav(),
        &format!(
            r#"<h1>Create an account</h1>
{error}
<form method="post" action="{action}">
<label>Full name <input type="text" name="full_name" value="{full_name}"></label>
<label>Email <input type="email" name="email" value="{email}" required></label>
<label>Password <input type="password" name="password" required></label>
<label>I want to <select name="user_type">{client}{provider}</select></label>
<button type="submit">Sign up</button>
</form>
<p>Already registered? <a href="{login}">Log in</a></p>"#,
            error = banner("error", error),
            action = SIGNUP_PATH,
            full_name = escape(&values.full_name),
            email = escape(&values.email),
            client = option(UserType::Client, "hire providers"),
            provider = option(UserType::Provider, "offer my services"),
            login = LOGIN_PATH,
        ),
    )
}

pub fn check_email_page(email: &str) -> Html<String> {
    layout(
        "Confirm your email",
        "",
        &anonymous_nav(),
        &format!(
            r#"<h1>Check your inbox</h1>
<p>We sent a confirmation link to {}. Follow it, then <a href="{}">log in</a>.</p>"#,
            escape(email),
            LOGIN_PATH
        ),
    )
}

pub fn client_dashboard_page(viewer: &Viewer) -> Html<String> {
    layout(
        "Dashboard",
        "",
        &viewer_nav(viewer),
        &format!(
            r#"<h1>Welcome, {}</h1>
<p><a href="{}">Browse services</a> to book your next job.</p>"#,
            escape(viewer.display_name()),
            SERVICES_PATH
        ),
    )
}

pub fn services_page(viewer: &Viewer) -> Html<String> {
    layout(
        "Services",
        "",
        &viewer_nav(viewer),
        r#"<h1>Services</h1>
<ul>
<li>Home cleaning</li>
<li>Plumbing and repairs</li>
<li>Electrical work</li>
<li>Tutoring</li>
<li>Moving help</li>
</ul>"#,
    )
}

pub fn provider_dashboard_page(viewer: &Viewer) -> Html<String> {
    let (verified, rating, jobs) = match &viewer.profile {
        Some(p) => (
            p.is_verified,
            p.rating
                .map(|r| format!("{:.1}", r))
                .unwrap_or_else(|| "no ratings yet".to_string()),
            p.completed_jobs,
        ),
        None => (false, "no ratings yet".to_string(), 0),
    };
    let status = if verified {
        "Your account is verified."
    } else {
        "Your account is awaiting verification by our team."
    };
    layout(
        "Provider dashboard",
        "",
        &viewer_nav(viewer),
        &format!(
            r#"<h1>Provider dashboard</h1>
<p>{}</p>
<dl><dt>Rating</dt><dd>{}</dd><dt>Completed jobs</dt><dd>{}</dd></dl>"#,
            status,
            escape(&rating),
            jobs
        ),
    )
}

pub fn account_settings_page(
    viewer: &Viewer,
    notice: Option<&str>,
    error: Option<&str>,
) -> Html<String> {
    let profile = viewer.profile.as_ref();
    let field = |value: Option<&String>| escape(value.map(String::as_str).unwrap_or(""));
    layout(
        "Account settings",
        "",
        &viewer_nav(viewer),
        &format!(
            r#"<h1>Account settings</h1>
{notice}{error}
<p>Signed in as {email}</p>
<form method="post" action="{action}">
<label>Full name <input type="text" name="full_name" value="{full_name}"></label>
<label>Phone <input type="tel" name="phone" value="{phone}"></label>
<label>Location <input type="text" name="location" value="{location}"></label>
<button type="submit">Save</button>
</form>"#,
            notice = banner("notice", notice),
            error = banner("error", error),
            email = escape(&viewer.identity.email),
            action = ACCOUNT_SETTINGS_PATH,
            full_name = field(profile.and_then(|p| p.full_name.as_ref())),
            phone = field(profile.and_then(|p| p.phone.as_ref())),
            location = field(profile.and_then(|p| p.location.as_ref())),
        ),
    )
}

/// Headline numbers for the admin dashboard
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AdminStats {
    pub total_users: usize,
    pub providers: usize,
    pub pending_verification: usize,
    pub notifications: usize,
}

impl AdminStats {
    pub fn from_profiles(profiles: &[Profile], notifications: usize) -> Self {
        let providers = profiles
            .iter()
            .filter(|p| p.role() == UserType::Provider)
            .count();
        let pending_verification = profiles
            .iter()
            .filter(|p| p.role() == UserType::Provider && !p.is_verified)
            .count();
        Self {
            total_users: profiles.len(),
            providers,
            pending_verification,
            notifications,
        }
    }
}

pub fn admin_dashboard_page(viewer: &Viewer, stats: Option<&AdminStats>) -> Html<String> {
    let body = match stats {
        Some(stats) => format!(
            r#"<h1>Admin dashboard</h1>
<dl>
<dt>Users</dt><dd>{}</dd>
<dt>Providers</dt><dd>{}</dd>
<dt>Awaiting verification</dt><dd>{}</dd>
<dt>Notifications</dt><dd><a href="/admin/notifications">{}</a></dd>
</dl>"#,
            stats.total_users, stats.providers, stats.pending_verification, stats.notifications
        ),
        None => format!(
            "<h1>Admin dashboard</h1>{}",
            banner("error", Some("User statistics are unavailable right now."))
        ),
    };
    layout("Admin dashboard", "", &viewer_nav(viewer), &body)
}

pub fn admin_users_page(viewer: &Viewer, profiles: &[Profile], error: Option<&str>) -> Html<String> {
    let mut rows = String::new();
    for p in profiles {
        let verify_label = if p.is_verified { "Unverify" } else { "Verify" };
        let mut options = String::new();
        for user_type in [
            UserType::Client,
            UserType::Provider,
            UserType::Admin,
            UserType::SuperAdmin,
        ] {
            let selected = if p.role() == user_type { " selected" } else { "" };
            let _ = write!(
                options,
                r#"<option value="{0}"{1}>{0}</option>"#,
                user_type, selected
            );
        }
        let _ = write!(
            rows,
            r#"<tr>
<td>{name}</td><td>{email}</td><td>{role}</td><td>{verified}</td><td>{joined}</td>
<td>
<form method="post" action="/admin/users/{id}"><input type="hidden" name="is_verified" value="{toggle}"><button type="submit">{verify_label}</button></form>
<form method="post" action="/admin/users/{id}"><select name="user_type">{options}</select><button type="submit">Change role</button></form>
</td>
</tr>
"#,
            name = escape(p.display_name()),
            email = escape(p.email.as_deref().unwrap_or("")),
            role = p.role(),
            verified = if p.is_verified { "yes" } else { "no" },
            joined = p.created_at.format("%Y-%m-%d"),
            id = escape(&urlencoding::encode(&p.id)),
            toggle = !p.is_verified,
            verify_label = verify_label,
            options = options,
        );
    }
    layout(
        "Users",
        "",
        &viewer_nav(viewer),
        &format!(
            r#"<h1>Users</h1>
{}
<table>
<thead><tr><th>Name</th><th>Email</th><th>Role</th><th>Verified</th><th>Joined</th><th></th></tr></thead>
<tbody>
{}</tbody>
</table>"#,
            banner("error", error),
            rows
        ),
    )
}

pub fn admin_notifications_page(
    viewer: &Viewer,
    notifications: &[Notification],
    error: Option<&str>,
) -> Html<String> {
    let mut items = String::new();
    for n in notifications {
        let _ = write!(
            items,
            r#"<li data-kind="{}"><strong>{}</strong> {} <time>{}</time></li>
"#,
            n.kind,
            escape(&n.title),
            escape(&n.message),
            n.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    if notifications.is_empty() && error.is_none() {
        items.push_str("<li>Nothing needs your attention.</li>\n");
    }
    // Reload whenever the stream reports a change after the initial frame
    let script = r#"<script>
(function () {
  var proto = location.protocol === "https:" ? "wss://" : "ws://";
  var ws = new WebSocket(proto + location.host + "/api/admin/notifications/stream");
  var first = true;
  ws.onmessage = function () { if (first) { first = false; return; } location.reload(); };
})();
</script>"#;
    layout(
        "Notifications",
        "",
        &viewer_nav(viewer),
        &format!(
            "<h1>Notifications</h1>\n{}<ul>\n{}</ul>\n{}",
            banner("error", error),
            items,
            script
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(
            escape(r#"<script>alert("x") & 'y'</script>"#),
            "&lt;script&gt;alert(&quot;x&quot;) &amp; &#39;y&#39;&lt;/script&gt;"
        );
    }

    #[test]
    fn test_login_page_keeps_redirect_and_escapes_input() {
        let Html(html) = login_page(
            Some("Invalid email or password."),
            Some("/account/settings?x=1&y=2"),
            "\"><b>",
        );
        assert!(html.contains(r#"name="redirect" value="/account/settings?x=1&amp;y=2""#));
        assert!(html.contains("Invalid email or password."));
        assert!(html.contains("&quot;&gt;&lt;b&gt;"));
        assert!(!html.contains("\"><b>"));
    }

    #[test]
    fn test_loading_page_refreshes_requested_path() {
        let Html(html) = loading_page("/admin/dashboard");
        assert!(html.contains(r#"content="1;url=/admin/dashboard""#));
    }

    #[test]
    fn test_admin_stats() {
        let now = chrono::Utc::now();
        let mut verified = crate::models::NewProfile::new("a", "a@example.com", UserType::Provider)
            .into_profile(now);
        verified.is_verified = true;
        let pending = crate::models::NewProfile::new("b", "b@example.com", UserType::Provider)
            .into_profile(now);
        let client = crate::models::NewProfile::new("c", "c@example.com", UserType::Client)
            .into_profile(now);

        let stats = AdminStats::from_profiles(&[verified, pending, client], 4);
        assert_eq!(
            stats,
            AdminStats {
                total_users: 3,
                providers: 2,
                pending_verification: 1,
                notifications: 4,
            }
        );
    }
}
