use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

/// Protocol version advertised and accepted by this crate.
pub const X402_VERSION: u32 = 2;

/// Payment scheme name for direct ERC-3009 transfer authorizations.
pub const EXACT_SCHEME: &str = "exact";

/// EIP-712 domain metadata the facilitator needs to verify the client's
/// signature without querying the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementsExtra {
    pub name: String,
    pub version: String,
}

/// A single entry in the `accepts` array of a 402 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    /// CAIP-2 chain identifier, e.g. "eip155:84532".
    pub network: String,
    /// Payment amount in atomic units of the asset, as a decimal string.
    pub amount: String,
    pub asset: Address,
    pub pay_to: Address,
    pub max_timeout_seconds: u64,
    pub extra: RequirementsExtra,
}

/// Identifies the resource being paid for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResource {
    pub url: String,
    pub description: String,
    pub mime_type: String,
}

/// The full 402 response body (x402 v2), also carried base64-encoded in the
/// `Payment-Required` response header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredBody {
    pub x402_version: u32,
    pub error: String,
    pub resource: PaymentResource,
    pub accepts: Vec<PaymentRequirements>,
    /// Optional machine-readable code, e.g. "token_not_found".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// ERC-3009 transfer authorization fields as signed by the payer.
/// `value`, `validAfter` and `validBefore` are decimal strings; the nonce is
/// 32 payer-chosen random bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferAuthorization {
    pub from: Address,
    pub to: Address,
    pub value: String,
    pub valid_after: String,
    pub valid_before: String,
    pub nonce: B256,
}

/// The signed part of a payment payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactPayload {
    /// 0x-prefixed 65-byte secp256k1 signature.
    pub signature: String,
    pub authorization: TransferAuthorization,
}

/// Wire-format payment payload, delivered base64-encoded in the
/// `Payment-Signature` request header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<PaymentResource>,
    /// The payment requirement the client chose from `accepts`.
    pub accepted: PaymentRequirements,
    pub payload: ExactPayload,
}
