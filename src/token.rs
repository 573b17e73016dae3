// Bearer token decoding.
//
// Tokens are issued by the backend. The client either trusts them opaquely
// (claims decoded for display and expiry only) or, when a shared secret is
// configured, checks the HS256 signature before accepting them.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::session::AuthError;

// Claims the client relies on, normalised from the backend's JWT payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub subject: String,
    pub user_id: Option<String>,
    pub roles: Vec<String>,
    // Expiration (Unix timestamp). Authoritative for staleness.
    pub expires_at: i64,
    pub name: Option<String>,
    pub image_url: Option<String>,
}

impl TokenClaims {
    pub fn is_expired_at(&self, now: i64, leeway_secs: i64) -> bool {
        now.saturating_add(leeway_secs) >= self.expires_at
    }

    pub fn is_expired(&self, leeway_secs: i64) -> bool {
        self.is_expired_at(Utc::now().timestamp(), leeway_secs)
    }

    // `userId` when present, `sub` otherwise.
    pub fn effective_user_id(&self) -> &str {
        self.user_id.as_deref().unwrap_or(&self.subject)
    }
}

// Raw payload as issued; `userId` and `sub` are used interchangeably and
// `scope` is a space-delimited role list.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    user_id: Option<serde_json::Value>,
    #[serde(default)]
    scope: Option<String>,
    exp: i64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
}

impl From<RawClaims> for TokenClaims {
    fn from(raw: RawClaims) -> Self {
        let user_id = raw.user_id.and_then(|value| match value {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        Self {
            subject: raw.sub.clone().or_else(|| user_id.clone()).unwrap_or_default(),
            user_id,
            roles: raw
                .scope
                .map(|scope| scope.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            expires_at: raw.exp,
            name: raw.name,
            image_url: raw.image_url,
        }
    }
}

// How the client treats the backend's signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenVerification {
    // Decode claims without checking the signature.
    Opaque,
    // Check an HS256 signature against a shared secret.
    SharedSecret(String),
}

#[derive(Debug, Clone)]
pub struct TokenDecoder {
    verification: TokenVerification,
}

impl TokenDecoder {
    pub fn new(verification: TokenVerification) -> Self {
        Self { verification }
    }

    pub fn opaque() -> Self {
        Self::new(TokenVerification::Opaque)
    }

    pub fn verification(&self) -> &TokenVerification {
        &self.verification
    }

    // Decode the claims of `token`. Expiry is not enforced here: a stale
    // access token still decodes so the session manager can refresh it.
    pub fn decode(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let (key, mut validation) = match &self.verification {
            TokenVerification::Opaque => {
                let mut validation = Validation::new(Algorithm::HS256);
                validation.insecure_disable_signature_validation();
                (DecodingKey::from_secret(&[]), validation)
            }
            TokenVerification::SharedSecret(secret) => {
                let mut validation = Validation::new(Algorithm::HS256);
                validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
                (DecodingKey::from_secret(secret.as_bytes()), validation)
            }
        };
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);

        jsonwebtoken::decode::<RawClaims>(token, &key, &validation)
            .map(|data| data.claims.into())
            .map_err(|e| AuthError::TokenInvalid(e.to_string()))
    }
}

impl Default for TokenDecoder {
    fn default() -> Self {
        Self::opaque()
    }
}
