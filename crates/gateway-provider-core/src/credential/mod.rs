mod pool;
mod state;
mod unavailable_queue;

pub use pool::{AcquireError, CredentialPool};
pub use state::{CredentialId, CredentialState, UnavailableReason};

use serde::{Deserialize, Serialize};

/// The secret material a credential pool entry holds. Every upstream here
/// authenticates with either a bearer API key or (Vertex) a service-account
/// JSON whose short-lived access token is refreshed out of band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Credential {
    ApiKey(ApiKeyCredential),
    ServiceAccount(ServiceAccountCredential),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyCredential {
    pub api_key: String,
}

/// Google Service Account JSON fields used by Vertex AI, plus the cached
/// access token/expiry the JWT exchange produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccountCredential {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    pub private_key_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_credential_round_trips_through_json() {
        let cred = Credential::ApiKey(ApiKeyCredential {
            api_key: "sk-test".to_string(),
        });
        let json = serde_json::to_string(&cred).unwrap();
        let back: Credential = serde_json::from_str(&json).unwrap();
        match back {
            Credential::ApiKey(inner) => assert_eq!(inner.api_key, "sk-test"),
            other => panic!("unexpected credential variant: {other:?}"),
        }
    }
}
