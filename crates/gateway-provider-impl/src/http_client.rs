//! Process-wide `wreq::Client`. A single client is shared by every adapter
//! so connection pools are reused across gateways.

use std::sync::OnceLock;

use gateway_provider_core::{ProviderError, ProviderResult};

static CLIENT: OnceLock<wreq::Client> = OnceLock::new();

pub fn shared_client() -> ProviderResult<wreq::Client> {
    if let Some(client) = CLIENT.get() {
        return Ok(client.clone());
    }
    let client = wreq::Client::builder()
        .build()
        .map_err(|err| ProviderError::Other(err.to_string()))?;
    Ok(CLIENT.get_or_init(|| client).clone())
}
