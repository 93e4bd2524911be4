//! Marketplace data models.

mod notification;
mod profile;

pub use notification::*;
pub use profile::*;
