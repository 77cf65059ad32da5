//! Identity token verification: JWKS-backed JWT signature/claims checking,
//! with a synthetic-claims bypass for local testing.
//!
//! Grounded on `key_server/oidc.rs`'s `OidcVerifier`/`JwksCache`: the same
//! decode-header-for-kid, refresh-once-on-unknown-kid, leeway-tolerant
//! verification flow, adapted from a multi-provider config list to the
//! single provider selected at startup (`--provider`, `--tenant-id`,
//! `--client-id`), and from `internal/providers/entra/entra.go`'s Azure AD
//! v2.0 discovery convention for the one provider this crate registers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Header, TokenData, Validation};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// How long a caller's ID token may be replayed after issuance.
const MAX_TOKEN_AGE: Duration = Duration::from_secs(300);
/// Clock-skew tolerance applied to `exp`/`nbf`/`iat` checks.
const LEEWAY_SECS: u64 = 60;
/// How long a fetched JWKS document is trusted before being refetched.
const JWKS_TTL: Duration = Duration::from_secs(3600);

/// Claims extracted from a verified identity token. Only `groups` and
/// `email` feed the policy decision; the rest ride along for logging.
#[derive(Debug, Clone)]
pub struct Claims {
    pub groups: Vec<String>,
    pub email: String,
    pub name: String,
    pub roles: Vec<String>,
    pub issued_at: i64,
    pub expires_at: i64,
    pub not_before: i64,
    pub issuer: String,
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    iss: String,
    #[serde(default)]
    aud: serde_json::Value,
    #[serde(default)]
    exp: i64,
    #[serde(default)]
    iat: i64,
    #[serde(default)]
    nbf: i64,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    groups: Option<Vec<String>>,
    #[serde(default)]
    roles: Option<Vec<String>>,
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

impl CachedJwks {
    fn is_stale(&self) -> bool {
        self.fetched_at.elapsed() >= JWKS_TTL
    }
}

/// JWKS cache for the single configured provider, keyed by issuer so a
/// provider rotation (or a future multi-tenant identity provider) doesn't
/// require cache invalidation logic.
struct JwksCache {
    inner: DashMap<String, CachedJwks>,
    http: reqwest::Client,
}

impl JwksCache {
    fn new() -> Self {
        Self {
            inner: DashMap::new(),
            http: reqwest::Client::builder()
                .https_only(true)
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    async fn get_or_fetch(&self, issuer: &str, jwks_uri: &str, force_refresh: bool) -> Result<JwkSet> {
        if !force_refresh {
            if let Some(cached) = self.inner.get(issuer) {
                if !cached.is_stale() {
                    return Ok(cached.keys.clone());
                }
            }
        }

        debug!(issuer = %issuer, jwks_uri = %jwks_uri, "fetching JWKS");
        let jwks: JwkSet = self
            .http
            .get(jwks_uri)
            .send()
            .await
            .map_err(Error::Upstream)?
            .json()
            .await
            .map_err(Error::Upstream)?;

        self.inner.insert(
            issuer.to_string(),
            CachedJwks { keys: jwks.clone(), fetched_at: Instant::now() },
        );
        Ok(jwks)
    }
}

/// The single registered identity provider: its issuer and JWKS endpoint,
/// derived once at startup from `--provider`/`--tenant-id`.
struct ProviderEndpoint {
    issuer: String,
    jwks_uri: String,
}

fn resolve_provider(provider: &str, tenant_id: &str) -> Result<ProviderEndpoint> {
    match provider {
        "entra" => Ok(ProviderEndpoint {
            issuer: format!("https://login.microsoftonline.com/{tenant_id}/v2.0"),
            jwks_uri: format!("https://login.microsoftonline.com/{tenant_id}/discovery/v2.0/keys"),
        }),
        other => Err(Error::ConfigInvalid(format!("unregistered identity provider: {other}"))),
    }
}

/// Verifies inbound `x-id-token` headers and produces [`Claims`].
///
/// In normal operation this performs real JWKS-backed signature
/// verification. When constructed in bypass mode it injects synthetic
/// claims (`groups = ["group1", "group2"]`) and warns on every call. This
/// mode exists only for local testing against a config file without running
/// a real identity provider.
pub struct TokenVerifier {
    endpoint: Option<ProviderEndpoint>,
    client_id: String,
    jwks_cache: Arc<JwksCache>,
    bypass: bool,
}

impl TokenVerifier {
    /// Build a verifier for `provider`/`tenant_id`, expecting tokens
    /// audienced to `client_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigInvalid`] if `provider` is not registered.
    pub fn new(provider: &str, tenant_id: &str, client_id: &str) -> Result<Self> {
        let endpoint = resolve_provider(provider, tenant_id)?;
        Ok(Self {
            endpoint: Some(endpoint),
            client_id: client_id.to_string(),
            jwks_cache: Arc::new(JwksCache::new()),
            bypass: false,
        })
    }

    /// Build a verifier that never contacts an identity provider and always
    /// returns synthetic claims. Intended only for `--disable-token-validation`.
    #[must_use]
    pub fn bypass() -> Self {
        Self {
            endpoint: None,
            client_id: String::new(),
            jwks_cache: Arc::new(JwksCache::new()),
            bypass: true,
        }
    }

    /// Verify `token` (the raw `x-id-token` header value) and return its claims.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenMissing`] if `token` is empty, or
    /// [`Error::TokenInvalid`] if signature or claim verification fails.
    pub async fn verify(&self, token: &str) -> Result<Claims> {
        if token.is_empty() {
            return Err(Error::TokenMissing);
        }

        if self.bypass {
            warn!("token validation disabled, injecting synthetic claims");
            return Ok(Claims {
                groups: vec!["group1".to_string(), "group2".to_string()],
                email: "bypass@localhost".to_string(),
                name: "bypass".to_string(),
                roles: Vec::new(),
                issued_at: 0,
                expires_at: 0,
                not_before: 0,
                issuer: "bypass".to_string(),
            });
        }

        let endpoint = self.endpoint.as_ref().expect("non-bypass verifier always has an endpoint");

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| Error::TokenInvalid(e.to_string()))?;
        let unverified = extract_unverified_claims(token)?;

        if unverified.iss != endpoint.issuer {
            return Err(Error::TokenInvalid(format!(
                "issuer mismatch: expected {}, got {}",
                endpoint.issuer, unverified.iss
            )));
        }

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs() as i64;
        let iat_ago = (now - unverified.iat).max(0) as u64;
        if iat_ago > MAX_TOKEN_AGE.as_secs() {
            return Err(Error::TokenInvalid(format!(
                "token too old: issued {iat_ago}s ago, max {}s",
                MAX_TOKEN_AGE.as_secs()
            )));
        }

        let kid = header.kid.clone().ok_or_else(|| Error::TokenInvalid("missing kid".to_string()))?;
        let decoding_key = self.find_decoding_key(&kid, &endpoint.issuer, &endpoint.jwks_uri).await?;

        let mut validation = build_validation(&header);
        validation.validate_aud = false;

        let token_data: TokenData<RawClaims> = jsonwebtoken::decode(token, &decoding_key, &validation)
            .map_err(|e| Error::TokenInvalid(e.to_string()))?;
        let claims = token_data.claims;

        check_audience(&claims.aud, &self.client_id)?;

        Ok(Claims {
            groups: claims.groups.unwrap_or_default(),
            email: claims.email.unwrap_or_default(),
            name: claims.name.unwrap_or_default(),
            roles: claims.roles.unwrap_or_default(),
            issued_at: claims.iat,
            expires_at: claims.exp,
            not_before: claims.nbf,
            issuer: claims.iss,
        })
    }

    async fn find_decoding_key(&self, kid: &str, issuer: &str, jwks_uri: &str) -> Result<DecodingKey> {
        let jwks = self.jwks_cache.get_or_fetch(issuer, jwks_uri, false).await?;
        if let Some(key) = find_key_in_jwks(&jwks, kid) {
            return Ok(key);
        }
        debug!(kid = %kid, "key not found in cached JWKS, refreshing");
        let jwks = self.jwks_cache.get_or_fetch(issuer, jwks_uri, true).await?;
        find_key_in_jwks(&jwks, kid).ok_or_else(|| Error::TokenInvalid(format!("unknown key id: {kid}")))
    }
}

fn extract_unverified_claims(token: &str) -> Result<RawClaims> {
    let parts: Vec<&str> = token.splitn(3, '.').collect();
    if parts.len() < 2 {
        return Err(Error::TokenInvalid("malformed JWT".to_string()));
    }
    let payload = base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, parts[1])
        .map_err(|_| Error::TokenInvalid("malformed JWT payload".to_string()))?;
    serde_json::from_slice(&payload).map_err(|_| Error::TokenInvalid("malformed JWT claims".to_string()))
}

fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    for jwk in &jwks.keys {
        if jwk.common.key_id.as_deref() != Some(kid) {
            continue;
        }
        return match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
            AlgorithmParameters::EllipticCurve(ec) => DecodingKey::from_ec_components(&ec.x, &ec.y).ok(),
            AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
        };
    }
    None
}

fn build_validation(header: &Header) -> Validation {
    let alg = match header.alg {
        Algorithm::RS256 => Algorithm::RS256,
        Algorithm::RS384 => Algorithm::RS384,
        Algorithm::RS512 => Algorithm::RS512,
        Algorithm::ES256 => Algorithm::ES256,
        Algorithm::ES384 => Algorithm::ES384,
        other => {
            warn!(alg = ?other, "unsupported JWT algorithm, defaulting to RS256");
            Algorithm::RS256
        }
    };
    let mut v = Validation::new(alg);
    v.leeway = LEEWAY_SECS;
    v
}

fn check_audience(aud: &serde_json::Value, expected: &str) -> Result<()> {
    let matches = match aud {
        serde_json::Value::String(s) => s == expected,
        serde_json::Value::Array(arr) => arr.iter().any(|v| v.as_str() == Some(expected)),
        _ => false,
    };
    if matches {
        Ok(())
    } else {
        Err(Error::TokenInvalid(format!("audience mismatch: expected {expected}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bypass_mode_injects_synthetic_claims() {
        let verifier = TokenVerifier::bypass();
        let claims = verifier.verify("anything").await.unwrap();
        assert_eq!(claims.groups, vec!["group1".to_string(), "group2".to_string()]);
    }

    #[tokio::test]
    async fn empty_token_is_token_missing() {
        let verifier = TokenVerifier::bypass();
        let err = verifier.verify("").await.unwrap_err();
        assert!(matches!(err, Error::TokenMissing));
    }

    #[test]
    fn unregistered_provider_rejected_at_construction() {
        let err = TokenVerifier::new("okta", "tenant", "client").unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
    }

    #[test]
    fn entra_provider_builds_expected_endpoints() {
        let endpoint = resolve_provider("entra", "abc-123").unwrap();
        assert_eq!(endpoint.issuer, "https://login.microsoftonline.com/abc-123/v2.0");
        assert!(endpoint.jwks_uri.contains("discovery/v2.0/keys"));
    }

    #[test]
    fn check_audience_accepts_string_and_array() {
        assert!(check_audience(&serde_json::json!("c1"), "c1").is_ok());
        assert!(check_audience(&serde_json::json!(["c0", "c1"]), "c1").is_ok());
        assert!(check_audience(&serde_json::json!("c0"), "c1").is_err());
    }

    #[test]
    fn extract_unverified_claims_rejects_malformed_token() {
        assert!(extract_unverified_claims("not-a-jwt").is_err());
    }
}
