//! Request admission: credential resolution, scope/perimeter checks,
//! rate-limiting, and trial/credit gating. Sits between the HTTP surface and
//! the router: nothing here dispatches to an upstream or bills usage.

mod error;
mod gate;
mod permit;
mod rate_limit;
mod token;

pub use error::GateError;
pub use gate::{Admission, Gate, RequestMeta, RouteMeta};
pub use permit::{Permit, ReleaseOutcome};
pub use rate_limit::RateLimiter;
pub use token::{extract_bearer, hash_token, parse_token, ParsedToken};
