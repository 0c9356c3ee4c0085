//! Upstream adapter implementations: the HTTP client, the shared
//! OpenAI-chat-shaped request/response bridge, one module per bespoke
//! provider, and the config-driven registry builder.

mod chat_bridge;
mod http_client;
pub mod providers;
pub mod registry_builder;

pub use registry_builder::build_provider;
