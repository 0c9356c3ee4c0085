//! OpenAI-compatible canonical wire schema: the only protocol surface the
//! gateway speaks to callers, regardless of which upstream answers it.

pub mod chat;
pub mod images;
pub mod models;
pub mod responses;
