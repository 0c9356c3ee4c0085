//! Service-account JWT signing and access-token caching for Vertex AI.
//!
//! This crate does not perform IO (see the crate doc comment); the adapter
//! in `gateway-provider-impl` builds the token-exchange POST from
//! [`build_token_request`], sends it with its own HTTP client, and commits
//! the result with [`store_token`]. The cache keeps a process-wide token per
//! `client_email` so concurrent requests against the same service account
//! don't each trigger their own exchange.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::credential::ServiceAccountCredential;
use crate::errors::{ProviderError, ProviderResult};
use crate::provider::{HttpMethod, UpstreamHttpRequest};

const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
/// Tokens are refreshed once fewer than this many seconds remain before
/// expiry, the margin the access-token cache and a fresh credential are
/// both checked against.
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    exp: i64,
    iat: i64,
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

fn token_cache() -> &'static Mutex<HashMap<String, (String, i64)>> {
    static CACHE: OnceLock<Mutex<HashMap<String, (String, i64)>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn now_secs() -> ProviderResult<i64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| ProviderError::Other(err.to_string()))?
        .as_secs() as i64)
}

/// A token usable right now, if the credential or the process-wide cache
/// already has one that won't expire within the refresh margin.
pub fn cached_token(sa: &ServiceAccountCredential) -> ProviderResult<Option<(String, i64)>> {
    let now = now_secs()?;
    if let (Some(token), Some(exp)) = (&sa.access_token, sa.expires_at)
        && !token.trim().is_empty()
        && now + REFRESH_MARGIN_SECS < exp
    {
        return Ok(Some((token.clone(), exp)));
    }
    let guard = token_cache()
        .lock()
        .map_err(|_| ProviderError::Other("vertex token cache lock poisoned".to_string()))?;
    if let Some((token, exp)) = guard.get(&sa.client_email)
        && now + REFRESH_MARGIN_SECS < *exp
    {
        return Ok(Some((token.clone(), *exp)));
    }
    Ok(None)
}

/// Signs a fresh RS256 JWT assertion and builds the `urn:ietf:params:oauth:
/// grant-type:jwt-bearer` token-exchange request. The caller performs the IO
/// and hands the response body to [`parse_and_store_token`].
pub fn build_token_request(
    sa: &ServiceAccountCredential,
    token_uri: &str,
) -> ProviderResult<UpstreamHttpRequest> {
    let now = now_secs()?;
    let exp = now + 3600;
    let claims = JwtClaims {
        iss: &sa.client_email,
        scope: DEFAULT_SCOPE,
        aud: token_uri,
        exp,
        iat: now,
    };
    let mut header = Header::new(Algorithm::RS256);
    if !sa.private_key_id.trim().is_empty() {
        header.kid = Some(sa.private_key_id.clone());
    }
    let key = EncodingKey::from_rsa_pem(sa.private_key.as_bytes())
        .map_err(|err| ProviderError::Other(err.to_string()))?;
    let jwt = jsonwebtoken::encode(&header, &claims, &key)
        .map_err(|err| ProviderError::Other(err.to_string()))?;
    let body = format!(
        "grant_type=urn:ietf:params:oauth:grant-type:jwt-bearer&assertion={}",
        urlencoding::encode(&jwt)
    );

    Ok(UpstreamHttpRequest {
        method: HttpMethod::Post,
        url: token_uri.to_string(),
        headers: vec![(
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        )],
        body: Some(body.into()),
        is_stream: false,
    })
}

/// Parses the token-exchange response and commits it to the process-wide
/// cache, keyed by `client_email`.
pub fn parse_and_store_token(client_email: &str, body: &[u8]) -> ProviderResult<(String, i64)> {
    let now = now_secs()?;
    let parsed: OAuthTokenResponse =
        serde_json::from_slice(body).map_err(|err| ProviderError::Other(err.to_string()))?;
    let expires_at = now + parsed.expires_in.unwrap_or(3600);
    let mut guard = token_cache()
        .lock()
        .map_err(|_| ProviderError::Other("vertex token cache lock poisoned".to_string()))?;
    guard.insert(
        client_email.to_string(),
        (parsed.access_token.clone(), expires_at),
    );
    Ok((parsed.access_token, expires_at))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sa(access_token: Option<&str>, expires_at: Option<i64>) -> ServiceAccountCredential {
        ServiceAccountCredential {
            project_id: "p".into(),
            client_email: "sa@p.iam.gserviceaccount.com".into(),
            private_key: "not-a-real-key".into(),
            private_key_id: "kid".into(),
            token_uri: None,
            access_token: access_token.map(str::to_string),
            expires_at,
        }
    }

    #[test]
    fn cached_token_is_none_when_expiry_within_refresh_margin() {
        let now = now_secs().unwrap();
        let cred = sa(Some("tok"), Some(now + 30));
        assert!(cached_token(&cred).unwrap().is_none());
    }

    #[test]
    fn cached_token_is_some_when_comfortably_before_expiry() {
        let now = now_secs().unwrap();
        let cred = sa(Some("tok"), Some(now + 3600));
        let (token, exp) = cached_token(&cred).unwrap().unwrap();
        assert_eq!(token, "tok");
        assert_eq!(exp, now + 3600);
    }

    #[test]
    fn parse_and_store_token_round_trips_through_cache() {
        let body = serde_json::json!({"access_token": "fresh", "expires_in": 3600});
        let (token, _exp) =
            parse_and_store_token("round-trip@p.iam.gserviceaccount.com", body.to_string().as_bytes())
                .unwrap();
        assert_eq!(token, "fresh");
        let cred = sa(None, None);
        let cred = ServiceAccountCredential {
            client_email: "round-trip@p.iam.gserviceaccount.com".into(),
            ..cred
        };
        assert!(cached_token(&cred).unwrap().is_some());
    }
}
