//! HTTP middleware components.

pub mod identity;
pub mod metrics;

pub use identity::{Team, require_team_role};
pub use metrics::track_requests;
