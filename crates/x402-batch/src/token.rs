use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::TokenCounterStore;
use crate::X402Error;

/// JWT payload of a batch RPC token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Payer identity (Ethereum address of the settled payment).
    pub sub: String,
    /// Issued-at, unix seconds.
    pub iat: u64,
    /// Expiry, unix seconds. Mandatory; validation rejects tokens without it.
    pub exp: u64,
    /// Server-generated UUID used as the key in the counter store.
    pub tid: String,
    /// Total number of RPC calls this token authorises. Informational: the
    /// server-side counter is authoritative, and the HMAC signature means
    /// clients cannot increase it.
    pub requests_total: i64,
}

/// Issues and validates batch JWTs and adapts them to the counter store.
#[derive(Clone)]
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    expiry: Duration,
    store: Arc<dyn TokenCounterStore>,
}

impl TokenManager {
    /// Create a manager signing with the given HMAC-SHA256 secret.
    /// Only HS256 tokens are accepted on validation; any other algorithm
    /// (including `none`) fails.
    pub fn new(secret: &[u8], expiry: Duration, store: Arc<dyn TokenCounterStore>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
            expiry,
            store,
        }
    }

    /// Sign a new batch JWT for `payer` with `requests_total` credits and
    /// register it in the counter store. On registration failure the signed
    /// token is discarded and never reaches the client.
    pub fn issue(&self, payer: &str, requests_total: i64) -> Result<String, X402Error> {
        let token_id = Uuid::new_v4().to_string();
        let now = jsonwebtoken::get_current_timestamp();

        let claims = Claims {
            sub: payer.to_string(),
            iat: now,
            exp: now + self.expiry.as_secs(),
            tid: token_id.clone(),
            requests_total,
        };

        let signed = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| X402Error::IssueFailed(format!("signing token: {e}")))?;

        self.store
            .register(&token_id, requests_total)
            .map_err(|e| X402Error::IssueFailed(format!("registering token: {e}")))?;

        Ok(signed)
    }

    /// Parse and verify the JWT signature and expiry, returning the embedded
    /// claims. Malformed, tampered, expired and wrong-algorithm tokens all
    /// collapse into [`X402Error::InvalidToken`].
    pub fn validate(&self, token: &str) -> Result<Claims, X402Error> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| X402Error::InvalidToken(e.to_string()))
    }

    /// Atomically consume one credit from the token and return the remaining
    /// count.
    pub fn consume(&self, claims: &Claims) -> Result<i64, X402Error> {
        self.store.use_request(&claims.tid, claims.requests_total)
    }
}
