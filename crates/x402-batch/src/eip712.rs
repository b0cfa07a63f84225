//! EIP-712 typed-data hashing and signature recovery for ERC-3009
//! transfer authorizations, plus CAIP-2 network parsing and nonce generation.

use alloy::primitives::{Address, FixedBytes, Signature, B256, U256};
use alloy::sol_types::{Eip712Domain, SolStruct};

use crate::{TransferWithAuthorization, X402Error};

/// Build the EIP-712 domain for a stablecoin contract.
/// `name`/`version` come from the payment requirement's `extra` hint.
pub fn asset_domain(name: &str, version: &str, chain_id: u64, asset: Address) -> Eip712Domain {
    Eip712Domain {
        name: Some(std::borrow::Cow::Owned(name.to_string())),
        version: Some(std::borrow::Cow::Owned(version.to_string())),
        chain_id: Some(U256::from(chain_id)),
        verifying_contract: Some(asset),
        salt: None,
    }
}

/// Compute the EIP-712 signing hash `keccak256(0x1901 || domainSeparator || structHash)`.
pub fn signing_hash(auth: &TransferWithAuthorization, domain: &Eip712Domain) -> B256 {
    auth.eip712_signing_hash(domain)
}

/// secp256k1 curve order N / 2. Signatures with s above this are malleable
/// (EIP-2) and rejected.
const SECP256K1_N_DIV_2: U256 = U256::from_limbs([
    0xBFD25E8CD0364140,
    0xBAAEDCE6AF48A03B,
    0xFFFFFFFFFFFFFFFE,
    0x7FFFFFFFFFFFFFFF,
]);

/// Recover the signer address from a 65-byte `(r, s, v)` signature over the
/// given digest. Accepts v in {0, 1, 27, 28}; any other shape fails.
pub fn recover_signer(digest: B256, signature_bytes: &[u8]) -> Result<Address, X402Error> {
    if signature_bytes.len() != 65 {
        return Err(X402Error::VerifyFailed(format!(
            "signature must be 65 bytes, got {}",
            signature_bytes.len()
        )));
    }

    // from_raw normalizes the parity byte (27/28 -> 0/1) and rejects
    // anything outside the accepted shapes.
    let sig = Signature::from_raw(signature_bytes)
        .map_err(|e| X402Error::VerifyFailed(format!("invalid signature: {e}")))?;

    if sig.s() > SECP256K1_N_DIV_2 {
        return Err(X402Error::VerifyFailed(
            "high-s signature rejected (EIP-2 malleability)".to_string(),
        ));
    }

    sig.recover_address_from_prehash(&digest)
        .map_err(|e| X402Error::VerifyFailed(format!("recovery failed: {e}")))
}

/// Parse a CAIP-2 network identifier of the form `eip155:<decimal>`.
/// Any other namespace or a non-decimal reference is rejected.
pub fn parse_caip2_chain_id(network: &str) -> Result<u64, X402Error> {
    let reference = network.strip_prefix("eip155:").ok_or_else(|| {
        X402Error::InvalidPayload(format!("unsupported network identifier: {network}"))
    })?;
    if reference.is_empty() || !reference.bytes().all(|b| b.is_ascii_digit()) {
        return Err(X402Error::InvalidPayload(format!(
            "invalid chain id in network identifier: {network}"
        )));
    }
    reference.parse::<u64>().map_err(|e| {
        X402Error::InvalidPayload(format!("invalid chain id in network identifier: {e}"))
    })
}

/// Generate a random 32-byte nonce for a transfer authorization.
/// Uses the OS CSPRNG via `rand::fill`.
pub fn random_nonce() -> FixedBytes<32> {
    let mut bytes = [0u8; 32];
    rand::fill(&mut bytes);
    FixedBytes::new(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::local::PrivateKeySigner;
    use alloy::signers::SignerSync;

    fn sample_auth(from: Address) -> TransferWithAuthorization {
        TransferWithAuthorization {
            from,
            to: Address::new([0x11; 20]),
            value: U256::from(10_000u64),
            validAfter: U256::ZERO,
            validBefore: U256::from(u64::MAX),
            nonce: FixedBytes::new([0x42; 32]),
        }
    }

    fn sample_domain() -> Eip712Domain {
        asset_domain("USDC", "2", 84532, Address::new([0x22; 20]))
    }

    #[test]
    fn sign_and_recover_roundtrip() {
        let signer = PrivateKeySigner::random();
        let auth = sample_auth(signer.address());
        let domain = sample_domain();

        let hash = signing_hash(&auth, &domain);
        let sig = signer.sign_hash_sync(&hash).unwrap();

        let recovered = recover_signer(hash, &sig.as_bytes()).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn digest_is_deterministic() {
        let auth = sample_auth(Address::new([0x01; 20]));
        let domain = sample_domain();
        assert_eq!(signing_hash(&auth, &domain), signing_hash(&auth, &domain));
    }

    #[test]
    fn digest_changes_with_domain() {
        let auth = sample_auth(Address::new([0x01; 20]));
        let a = asset_domain("USDC", "2", 84532, Address::new([0x22; 20]));
        let b = asset_domain("USDC", "2", 1, Address::new([0x22; 20]));
        assert_ne!(signing_hash(&auth, &a), signing_hash(&auth, &b));
    }

    #[test]
    fn short_signature_is_rejected() {
        let err = recover_signer(B256::ZERO, &[0u8; 64]).unwrap_err();
        assert!(err.to_string().contains("65 bytes"));
    }

    #[test]
    fn caip2_parses_eip155() {
        assert_eq!(parse_caip2_chain_id("eip155:84532").unwrap(), 84532);
        assert_eq!(parse_caip2_chain_id("eip155:1").unwrap(), 1);
    }

    #[test]
    fn caip2_rejects_other_namespaces_and_garbage() {
        assert!(parse_caip2_chain_id("solana:mainnet").is_err());
        assert!(parse_caip2_chain_id("eip155:").is_err());
        assert!(parse_caip2_chain_id("eip155:12ab").is_err());
        assert!(parse_caip2_chain_id("eip155:-1").is_err());
        assert!(parse_caip2_chain_id("84532").is_err());
    }

    #[test]
    fn random_nonce_is_unique() {
        assert_ne!(random_nonce(), random_nonce());
    }
}
