use thiserror::Error;

/// Errors returned by x402 payment and credit-token operations.
#[derive(Debug, Error)]
pub enum X402Error {
    #[error("invalid credit token: {0}")]
    InvalidToken(String),

    #[error("token credits exhausted")]
    TokenExhausted,

    #[error("token not found in store")]
    TokenNotFound,

    #[error("invalid allowance: {0}")]
    InvalidAllowance(i64),

    #[error("payment invalid: {0}")]
    VerifyFailed(String),

    #[error("settlement failed: {0}")]
    SettleFailed(String),

    #[error("issuing token: {0}")]
    IssueFailed(String),

    #[error("invalid payment payload: {0}")]
    InvalidPayload(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
