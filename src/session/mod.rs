//! Visitor sessions: auth state, role resolution, access guards and redirects.

pub mod guard;
mod landing;
mod provider;
pub mod redirect;
mod registry;
mod resolver;

pub use guard::GuardDecision;
pub use landing::LandingRedirect;
pub use provider::{SessionProvider, SessionSettings, SessionSnapshot};
pub use registry::{spawn_cleanup_task, SessionRegistry};
pub use resolver::{resolve, route_for_role, RouteState};
