use gateway_common::Environment;

/// `Authorization: Bearer gw_{env}_{opaque}`. The environment segment must
/// match the deployment's configured environment (testable property
/// "key-environment consistency").
pub struct ParsedToken<'a> {
    pub environment: Environment,
    pub opaque: &'a str,
}

pub fn parse_token(token: &str) -> Option<ParsedToken<'_>> {
    let rest = token.strip_prefix("gw_")?;
    let (env_raw, opaque) = rest.split_once('_')?;
    let environment = Environment::parse(env_raw)?;
    if opaque.is_empty() {
        return None;
    }
    Some(ParsedToken { environment, opaque })
}

/// Salted hash used for exact-match lookup. The token is never stored or
/// compared in plaintext.
pub fn hash_token(token: &str, salt: &str) -> String {
    blake3::hash(format!("{salt}{token}").as_bytes())
        .to_hex()
        .to_string()
}

pub fn extract_bearer(header_value: Option<&str>) -> Option<&str> {
    let value = header_value?.trim();
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_environment_and_opaque_segment() {
        let parsed = parse_token("gw_live_abc123").expect("parses");
        assert_eq!(parsed.environment, Environment::Live);
        assert_eq!(parsed.opaque, "abc123");
    }

    #[test]
    fn rejects_unknown_environment() {
        assert!(parse_token("gw_prod_abc123").is_none());
    }

    #[test]
    fn rejects_missing_opaque_segment() {
        assert!(parse_token("gw_live_").is_none());
    }

    #[test]
    fn hash_is_deterministic_and_salt_sensitive() {
        let a = hash_token("gw_live_abc", "salt1");
        let b = hash_token("gw_live_abc", "salt1");
        let c = hash_token("gw_live_abc", "salt2");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn extracts_bearer_case_insensitively() {
        assert_eq!(extract_bearer(Some("Bearer abc")), Some("abc"));
        assert_eq!(extract_bearer(Some("bearer  abc  ")), Some("abc"));
        assert_eq!(extract_bearer(Some("Basic abc")), None);
        assert_eq!(extract_bearer(None), None);
    }
}
