//! Resolves a requested model name to an ordered list of candidate
//! gateways and dispatches the chat-completion request across them,
//! applying the retry/backoff and credential-cooldown rules. Pure
//! routing logic: no HTTP server lives here.

mod error;
mod resolve;
mod retry;
mod router;
mod trace;

pub use error::RouterError;
pub use resolve::{resolve_candidates, Candidate};
pub use retry::{decide, most_informative, Action};
pub use router::{DispatchOutcome, DispatchRequest, Router, StreamOutcome};
pub use trace::{AttemptRecord, AttemptTrace};
