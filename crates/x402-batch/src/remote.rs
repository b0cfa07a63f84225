//! HTTP client for a remote x402 facilitator service.

use std::time::Duration;

use alloy::primitives::Address;
use serde::Deserialize;
use serde_json::value::RawValue;

use crate::facilitator::{Facilitator, VerifyOutcome};
use crate::{X402Error, X402_VERSION};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Response from the facilitator's `/verify` endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorVerifyResponse {
    pub is_valid: bool,
    #[serde(default)]
    pub invalid_reason: Option<String>,
    #[serde(default)]
    pub invalid_message: Option<String>,
    #[serde(default)]
    pub payer: Option<Address>,
}

/// Response from the facilitator's `/settle` endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorSettleResponse {
    pub success: bool,
    #[serde(default)]
    pub error_reason: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Talks to an x402 facilitator REST API. Verifies and settles payments
/// without any chain access of its own.
pub struct RemoteFacilitator {
    url: String,
    client: reqwest::Client,
}

impl RemoteFacilitator {
    pub fn new(facilitator_url: impl Into<String>) -> Self {
        Self {
            url: facilitator_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Construct the JSON request body the facilitator expects:
    /// `{ "x402Version": N, "paymentPayload": {...}, "paymentRequirements": {...} }`.
    /// The payload and requirements bytes are embedded verbatim.
    fn build_body(payload_bytes: &[u8], requirements_bytes: &[u8]) -> Result<Vec<u8>, X402Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct VersionProbe {
            #[serde(default)]
            x402_version: u32,
        }

        let probe: VersionProbe = serde_json::from_slice(payload_bytes)
            .map_err(|e| X402Error::InvalidPayload(format!("parsing payment payload: {e}")))?;
        let version = if probe.x402_version == 0 {
            X402_VERSION
        } else {
            probe.x402_version
        };

        let payload: &RawValue = serde_json::from_slice(payload_bytes)
            .map_err(|e| X402Error::InvalidPayload(format!("parsing payment payload: {e}")))?;
        let requirements: &RawValue = serde_json::from_slice(requirements_bytes)
            .map_err(|e| X402Error::InvalidPayload(format!("parsing requirements: {e}")))?;

        Ok(serde_json::to_vec(&serde_json::json!({
            "x402Version": version,
            "paymentPayload": payload,
            "paymentRequirements": requirements,
        }))?)
    }

    async fn post(&self, path: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        let url = format!("{}{}", self.url, path);
        tracing::debug!(url = %url, "facilitator request");

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .timeout(REQUEST_TIMEOUT)
            .body(body)
            .send()
            .await
            .map_err(|e| format!("facilitator request failed: {e}"))?;

        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| format!("reading facilitator response: {e}"))?;

        tracing::debug!(url = %url, status = status.as_u16(), "facilitator response");

        if status.as_u16() >= 400 {
            return Err(format!(
                "facilitator returned {}: {}",
                status.as_u16(),
                String::from_utf8_lossy(&bytes)
            ));
        }

        Ok(bytes.to_vec())
    }
}

impl Facilitator for RemoteFacilitator {
    async fn verify(
        &self,
        payload_bytes: &[u8],
        requirements_bytes: &[u8],
    ) -> Result<VerifyOutcome, X402Error> {
        let body = Self::build_body(payload_bytes, requirements_bytes)?;
        let resp_bytes = self
            .post("/verify", body)
            .await
            .map_err(X402Error::VerifyFailed)?;

        let resp: FacilitatorVerifyResponse = serde_json::from_slice(&resp_bytes)
            .map_err(|e| X402Error::VerifyFailed(format!("parsing verify response: {e}")))?;

        if !resp.is_valid {
            let mut reason = resp.invalid_reason.unwrap_or_default();
            if let Some(message) = resp.invalid_message.filter(|m| !m.is_empty()) {
                reason = format!("{reason}: {message}");
            }
            return Err(X402Error::VerifyFailed(reason));
        }

        let payer = resp
            .payer
            .ok_or_else(|| X402Error::VerifyFailed("verify response missing payer".to_string()))?;
        Ok(VerifyOutcome { payer })
    }

    async fn settle(
        &self,
        payload_bytes: &[u8],
        requirements_bytes: &[u8],
    ) -> Result<(), X402Error> {
        let body = Self::build_body(payload_bytes, requirements_bytes)?;
        let resp_bytes = self
            .post("/settle", body)
            .await
            .map_err(X402Error::SettleFailed)?;

        let resp: FacilitatorSettleResponse = serde_json::from_slice(&resp_bytes)
            .map_err(|e| X402Error::SettleFailed(format!("parsing settle response: {e}")))?;

        if !resp.success {
            let mut reason = resp.error_reason.unwrap_or_default();
            if let Some(message) = resp.error_message.filter(|m| !m.is_empty()) {
                reason = format!("{reason}: {message}");
            }
            return Err(X402Error::SettleFailed(reason));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_body_embeds_raw_json_and_probed_version() {
        let payload = br#"{"x402Version":2,"payload":{"signature":"0x00"}}"#;
        let requirements = br#"{"scheme":"exact"}"#;

        let body = RemoteFacilitator::build_body(payload, requirements).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(value["x402Version"], 2);
        assert_eq!(value["paymentPayload"]["payload"]["signature"], "0x00");
        assert_eq!(value["paymentRequirements"]["scheme"], "exact");
    }

    #[test]
    fn build_body_defaults_missing_version() {
        let body = RemoteFacilitator::build_body(b"{}", b"{}").unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["x402Version"], u64::from(X402_VERSION));
    }

    #[test]
    fn build_body_rejects_malformed_payload() {
        assert!(matches!(
            RemoteFacilitator::build_body(b"not json", b"{}"),
            Err(X402Error::InvalidPayload(_))
        ));
    }

    #[test]
    fn verify_response_parses_reason_fields() {
        let raw = r#"{"isValid":false,"invalidReason":"expired","invalidMessage":"validBefore in the past"}"#;
        let resp: FacilitatorVerifyResponse = serde_json::from_str(raw).unwrap();
        assert!(!resp.is_valid);
        assert_eq!(resp.invalid_reason.as_deref(), Some("expired"));
        assert_eq!(
            resp.invalid_message.as_deref(),
            Some("validBefore in the past")
        );
    }

    #[test]
    fn settle_response_parses_success() {
        let raw = r#"{"success":true}"#;
        let resp: FacilitatorSettleResponse = serde_json::from_str(raw).unwrap();
        assert!(resp.success);
        assert!(resp.error_reason.is_none());
    }
}
