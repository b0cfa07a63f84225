//! Self-hosted x402 facilitator.
//!
//! Replaces the dependency on an external facilitator service by verifying the
//! ERC-3009 `TransferWithAuthorization` signature locally and submitting the
//! settlement transaction directly to the stablecoin contract, paying gas from
//! the relayer key.

use alloy::consensus::BlockHeader;
use alloy::eips::BlockNumberOrTag;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Signature, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolCall;

use crate::eip712;
use crate::facilitator::{Facilitator, VerifyOutcome};
use crate::payment::PaymentPayload;
use crate::{Erc3009, TransferWithAuthorization, X402Error};

/// Gas limit used when estimation fails.
const FALLBACK_GAS_LIMIT: u64 = 100_000;

/// Priority fee for settlement transactions: 1 gwei.
const PRIORITY_FEE_WEI: u128 = 1_000_000_000;

/// Facilitator that performs EIP-712 verification and on-chain settlement
/// itself, with no external payment service.
pub struct LocalFacilitator {
    rpc_url: url::Url,
    signer: PrivateKeySigner,
    relayer: Address,
    chain_id: u64,
}

impl LocalFacilitator {
    /// Create a local facilitator.
    ///
    /// - `rpc_url`: JSON-RPC endpoint of the settlement chain.
    /// - `private_key_hex`: hex-encoded relayer key; its address pays gas and
    ///   must hold native token.
    /// - `chain_id`: settlement chain id used for the submitted transaction.
    pub fn new(rpc_url: &str, private_key_hex: &str, chain_id: u64) -> Result<Self, X402Error> {
        let rpc_url: url::Url = rpc_url
            .parse()
            .map_err(|e| X402Error::Config(format!("invalid settlement RPC URL: {e}")))?;
        let signer: PrivateKeySigner = private_key_hex
            .parse()
            .map_err(|e| X402Error::Config(format!("invalid relayer private key: {e}")))?;
        let relayer = signer.address();
        Ok(Self {
            rpc_url,
            signer,
            relayer,
            chain_id,
        })
    }

    /// Address of the relayer key, logged at startup.
    pub fn relayer_address(&self) -> Address {
        self.relayer
    }
}

fn decode_payload(raw: &[u8]) -> Result<PaymentPayload, X402Error> {
    serde_json::from_slice(raw)
        .map_err(|e| X402Error::InvalidPayload(format!("parsing payment payload: {e}")))
}

fn parse_u256(field: &str, value: &str) -> Result<U256, X402Error> {
    value
        .parse::<U256>()
        .map_err(|e| X402Error::InvalidPayload(format!("invalid {field}: {e}")))
}

fn parse_u64(field: &str, value: &str) -> Result<u64, X402Error> {
    value
        .parse::<u64>()
        .map_err(|e| X402Error::InvalidPayload(format!("invalid {field}: {e}")))
}

fn decode_signature(signature: &str) -> Result<Vec<u8>, X402Error> {
    alloy::hex::decode(signature.strip_prefix("0x").unwrap_or(signature))
        .map_err(|e| X402Error::InvalidPayload(format!("invalid hex signature: {e}")))
}

fn unix_now() -> Result<u64, X402Error> {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| X402Error::Config(format!("system time error: {e}")))
}

/// Compute the EIP-712 signing digest for a payment payload. The chain id
/// comes from the payload's CAIP-2 network field; a malformed network fails
/// here, before any signature work.
fn signing_digest(p: &PaymentPayload) -> Result<B256, X402Error> {
    let chain_id = eip712::parse_caip2_chain_id(&p.accepted.network)?;
    let auth = &p.payload.authorization;

    let typed = TransferWithAuthorization {
        from: auth.from,
        to: auth.to,
        value: parse_u256("value", &auth.value)?,
        validAfter: U256::from(parse_u64("validAfter", &auth.valid_after)?),
        validBefore: U256::from(parse_u64("validBefore", &auth.valid_before)?),
        nonce: auth.nonce,
    };
    let domain = eip712::asset_domain(
        &p.accepted.extra.name,
        &p.accepted.extra.version,
        chain_id,
        p.accepted.asset,
    );
    Ok(eip712::signing_hash(&typed, &domain))
}

/// ABI-encode the `transferWithAuthorization` call: 4-byte selector followed
/// by nine 32-byte slots, with v denormalized back to Electrum notation.
fn settlement_calldata(p: &PaymentPayload) -> Result<Vec<u8>, X402Error> {
    let auth = &p.payload.authorization;

    let sig_bytes = decode_signature(&p.payload.signature)?;
    if sig_bytes.len() != 65 {
        return Err(X402Error::InvalidPayload(format!(
            "signature must be 65 bytes, got {}",
            sig_bytes.len()
        )));
    }
    let sig = Signature::from_raw(&sig_bytes)
        .map_err(|e| X402Error::InvalidPayload(format!("invalid signature: {e}")))?;

    // The contract expects v in {27, 28}.
    let v: u8 = if sig.v() { 28 } else { 27 };

    let call = Erc3009::transferWithAuthorizationCall {
        from: auth.from,
        to: auth.to,
        value: parse_u256("value", &auth.value)?,
        validAfter: U256::from(parse_u64("validAfter", &auth.valid_after)?),
        validBefore: U256::from(parse_u64("validBefore", &auth.valid_before)?),
        nonce: auth.nonce,
        v,
        r: B256::from(sig.r()),
        s: B256::from(sig.s()),
    };
    Ok(call.abi_encode())
}

impl Facilitator for LocalFacilitator {
    async fn verify(
        &self,
        payload_bytes: &[u8],
        _requirements_bytes: &[u8],
    ) -> Result<VerifyOutcome, X402Error> {
        let p = decode_payload(payload_bytes)?;
        let auth = &p.payload.authorization;

        let valid_before = parse_u64("validBefore", &auth.valid_before)?;
        if valid_before < unix_now()? {
            return Err(X402Error::VerifyFailed(format!(
                "authorization expired (validBefore={valid_before})"
            )));
        }

        let digest = signing_digest(&p)?;

        let sig_bytes = decode_signature(&p.payload.signature)?;
        let recovered = eip712::recover_signer(digest, &sig_bytes)?;
        if recovered != auth.from {
            return Err(X402Error::VerifyFailed(format!(
                "signature mismatch: signed by {recovered}, claimed {}",
                auth.from
            )));
        }

        if auth.to != p.accepted.pay_to {
            return Err(X402Error::VerifyFailed(format!(
                "payTo mismatch: auth={} req={}",
                auth.to, p.accepted.pay_to
            )));
        }

        let value = parse_u256("value", &auth.value)?;
        let required = parse_u256("amount", &p.accepted.amount)?;
        if value < required {
            return Err(X402Error::VerifyFailed(format!(
                "amount too low: authorized {value}, required {required}"
            )));
        }

        tracing::info!(payer = %recovered, amount = %value, "local verify ok");
        Ok(VerifyOutcome { payer: recovered })
    }

    async fn settle(
        &self,
        payload_bytes: &[u8],
        _requirements_bytes: &[u8],
    ) -> Result<(), X402Error> {
        // Settle re-derives everything from the payload; it must work even if
        // verify never ran in this process.
        let p = decode_payload(payload_bytes)?;
        let auth = &p.payload.authorization;
        let calldata = settlement_calldata(&p)?;
        let value = parse_u256("value", &auth.value)?;

        // A fresh connection per settlement; nothing is cached between calls.
        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(self.rpc_url.clone());

        let tx_nonce = provider
            .get_transaction_count(self.relayer)
            .pending()
            .await
            .map_err(|e| X402Error::SettleFailed(format!("pending nonce: {e}")))?;

        let call_request = TransactionRequest::default()
            .with_from(self.relayer)
            .with_to(p.accepted.asset)
            .with_value(U256::ZERO)
            .with_input(calldata);

        let gas_limit = match provider.estimate_gas(call_request.clone()).await {
            Ok(estimate) => estimate.saturating_mul(12) / 10,
            Err(e) => {
                tracing::warn!(error = %e, "gas estimation failed, using fallback limit");
                FALLBACK_GAS_LIMIT
            }
        };

        let block = provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .map_err(|e| X402Error::SettleFailed(format!("latest header: {e}")))?
            .ok_or_else(|| X402Error::SettleFailed("latest header unavailable".to_string()))?;
        let base_fee = u128::from(block.header.base_fee_per_gas().unwrap_or_default());
        let fee_cap = base_fee + PRIORITY_FEE_WEI;

        let tx = call_request
            .with_chain_id(self.chain_id)
            .with_nonce(tx_nonce)
            .with_gas_limit(gas_limit)
            .with_max_priority_fee_per_gas(PRIORITY_FEE_WEI)
            .with_max_fee_per_gas(fee_cap);

        // Submission is the commit point. Inclusion is not awaited and there
        // are no retries; the caller must assume a failed call may still land.
        let pending = provider
            .send_transaction(tx)
            .await
            .map_err(|e| X402Error::SettleFailed(format!("transaction submission: {e}")))?;

        tracing::info!(
            tx = %pending.tx_hash(),
            from = %auth.from,
            to = %auth.to,
            value = %value,
            "settlement tx submitted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::{
        ExactPayload, PaymentRequirements, PaymentResource, RequirementsExtra,
        TransferAuthorization, EXACT_SCHEME, X402_VERSION,
    };
    use alloy::primitives::FixedBytes;
    use alloy::signers::SignerSync;

    const RELAYER_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    fn requirements(pay_to: Address, asset: Address, amount: &str) -> PaymentRequirements {
        PaymentRequirements {
            scheme: EXACT_SCHEME.to_string(),
            network: "eip155:84532".to_string(),
            amount: amount.to_string(),
            asset,
            pay_to,
            max_timeout_seconds: 60,
            extra: RequirementsExtra {
                name: "USDC".to_string(),
                version: "2".to_string(),
            },
        }
    }

    /// Build a payment payload whose authorization is signed by `signer`.
    fn signed_payload(
        signer: &PrivateKeySigner,
        pay_to: Address,
        value: &str,
        valid_before: u64,
    ) -> PaymentPayload {
        let asset = Address::new([0x22; 20]);
        let accepted = requirements(pay_to, asset, "10000");

        let mut payload = PaymentPayload {
            x402_version: X402_VERSION,
            resource: Some(PaymentResource {
                url: "http://localhost:8080".to_string(),
                description: "RPC access".to_string(),
                mime_type: String::new(),
            }),
            accepted,
            payload: ExactPayload {
                signature: String::new(),
                authorization: TransferAuthorization {
                    from: signer.address(),
                    to: pay_to,
                    value: value.to_string(),
                    valid_after: "0".to_string(),
                    valid_before: valid_before.to_string(),
                    nonce: FixedBytes::new([0x42; 32]),
                },
            },
        };

        let digest = signing_digest(&payload).unwrap();
        let sig = signer.sign_hash_sync(&digest).unwrap();
        payload.payload.signature = format!("0x{}", alloy::hex::encode(sig.as_bytes()));
        payload
    }

    fn facilitator() -> LocalFacilitator {
        LocalFacilitator::new("http://localhost:1", RELAYER_KEY, 84532).unwrap()
    }

    fn far_future() -> u64 {
        unix_now().unwrap() + 3600
    }

    #[tokio::test]
    async fn verify_accepts_valid_payload() {
        let signer = PrivateKeySigner::random();
        let pay_to = Address::new([0x11; 20]);
        let payload = signed_payload(&signer, pay_to, "10000", far_future());
        let bytes = serde_json::to_vec(&payload).unwrap();

        let outcome = facilitator().verify(&bytes, b"{}").await.unwrap();
        assert_eq!(outcome.payer, signer.address());
    }

    #[tokio::test]
    async fn verify_rejects_wrong_signer_naming_both_addresses() {
        let signer = PrivateKeySigner::random();
        let claimed = PrivateKeySigner::random().address();
        let pay_to = Address::new([0x11; 20]);

        let mut payload = signed_payload(&signer, pay_to, "10000", far_future());
        payload.payload.authorization.from = claimed;
        let bytes = serde_json::to_vec(&payload).unwrap();

        let err = facilitator().verify(&bytes, b"{}").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("signature mismatch"), "got: {msg}");
        assert!(msg.contains(&claimed.to_string()), "got: {msg}");
        assert!(msg.contains("signed by 0x"), "got: {msg}");
    }

    #[tokio::test]
    async fn verify_rejects_expired_authorization() {
        let signer = PrivateKeySigner::random();
        let pay_to = Address::new([0x11; 20]);
        let expired = unix_now().unwrap() - 60;
        let payload = signed_payload(&signer, pay_to, "10000", expired);
        let bytes = serde_json::to_vec(&payload).unwrap();

        let err = facilitator().verify(&bytes, b"{}").await.unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[tokio::test]
    async fn verify_rejects_pay_to_mismatch() {
        let signer = PrivateKeySigner::random();
        let pay_to = Address::new([0x11; 20]);
        let mut payload = signed_payload(&signer, pay_to, "10000", far_future());
        payload.payload.authorization.to = Address::new([0x33; 20]);

        // Re-sign so only the payTo check fails, not the signature check.
        let digest = signing_digest(&payload).unwrap();
        let sig = signer.sign_hash_sync(&digest).unwrap();
        payload.payload.signature = format!("0x{}", alloy::hex::encode(sig.as_bytes()));

        let bytes = serde_json::to_vec(&payload).unwrap();
        let err = facilitator().verify(&bytes, b"{}").await.unwrap_err();
        assert!(err.to_string().contains("payTo mismatch"));
    }

    #[tokio::test]
    async fn verify_rejects_amount_below_required() {
        let signer = PrivateKeySigner::random();
        let pay_to = Address::new([0x11; 20]);
        let payload = signed_payload(&signer, pay_to, "9999", far_future());
        let bytes = serde_json::to_vec(&payload).unwrap();

        let err = facilitator().verify(&bytes, b"{}").await.unwrap_err();
        assert!(err.to_string().contains("amount too low"));
    }

    #[tokio::test]
    async fn verify_rejects_malformed_network_before_signature_checks() {
        let signer = PrivateKeySigner::random();
        let pay_to = Address::new([0x11; 20]);
        let mut payload = signed_payload(&signer, pay_to, "10000", far_future());
        payload.accepted.network = "solana:mainnet".to_string();
        // Deliberately garbage signature: the network check must fire first.
        payload.payload.signature = "0xzz".to_string();
        let bytes = serde_json::to_vec(&payload).unwrap();

        let err = facilitator().verify(&bytes, b"{}").await.unwrap_err();
        assert!(err.to_string().contains("network"));
    }

    #[test]
    fn settlement_calldata_layout_and_roundtrip() {
        let signer = PrivateKeySigner::random();
        let pay_to = Address::new([0x11; 20]);
        let payload = signed_payload(&signer, pay_to, "10000", 99_999_999_999);

        let data = settlement_calldata(&payload).unwrap();
        assert_eq!(data.len(), 4 + 9 * 32);
        assert_eq!(&data[..4], Erc3009::transferWithAuthorizationCall::SELECTOR);

        let decoded = Erc3009::transferWithAuthorizationCall::abi_decode(&data).unwrap();
        assert_eq!(decoded.from, signer.address());
        assert_eq!(decoded.to, pay_to);
        assert_eq!(decoded.value, U256::from(10_000u64));
        assert_eq!(decoded.validAfter, U256::ZERO);
        assert_eq!(decoded.validBefore, U256::from(99_999_999_999u64));
        assert_eq!(decoded.nonce, FixedBytes::new([0x42; 32]));
        assert!(decoded.v == 27 || decoded.v == 28);

        // r/s must round-trip the raw signature halves.
        let sig_bytes =
            alloy::hex::decode(payload.payload.signature.strip_prefix("0x").unwrap()).unwrap();
        assert_eq!(decoded.r.as_slice(), &sig_bytes[..32]);
        assert_eq!(decoded.s.as_slice(), &sig_bytes[32..64]);
    }

    #[test]
    fn settlement_calldata_rejects_truncated_signature() {
        let signer = PrivateKeySigner::random();
        let pay_to = Address::new([0x11; 20]);
        let mut payload = signed_payload(&signer, pay_to, "10000", 99_999_999_999);
        payload.payload.signature = "0xdeadbeef".to_string();

        assert!(matches!(
            settlement_calldata(&payload),
            Err(X402Error::InvalidPayload(_))
        ));
    }

    #[test]
    fn new_rejects_bad_key_and_url() {
        assert!(LocalFacilitator::new("not a url", RELAYER_KEY, 1).is_err());
        assert!(LocalFacilitator::new("http://localhost:1", "0xnothex", 1).is_err());
    }
}
