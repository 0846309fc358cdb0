pub mod availability;
pub mod router;

pub use availability::AvailabilityTracker;
pub use router::{RoleRouter, RouteReason, RoutingDecision};
