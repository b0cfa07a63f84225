//! x402 payment protocol with batch credit tokens.
//!
//! Implements HTTP 402 pay-per-use for JSON-RPC gateways: a client pays once
//! with an EIP-712 signed ERC-3009 `TransferWithAuthorization` and receives a
//! MAC-signed batch token good for a fixed number of RPC calls. The server-side
//! counter store is authoritative for consumption; the token claims are not.
//!
//! # Components
//!
//! - [`TokenCounterStore`] / [`InMemoryTokenStore`]: per-token credit counters
//! - [`TokenManager`]: issues and validates batch JWTs
//! - [`Facilitator`]: payment verify/settle capability, with two forms:
//!   [`RemoteFacilitator`] (delegates to an x402 facilitator service) and
//!   [`LocalFacilitator`] (verifies EIP-712 locally and submits the
//!   settlement transaction itself)

pub mod eip712;
pub mod error;
pub mod facilitator;
pub mod local;
pub mod payment;
pub mod remote;
pub mod store;
pub mod token;

use alloy::sol;

// EIP-712 struct for ERC-3009 transfer authorizations. The sol! macro derives
// SolStruct, which provides eip712_signing_hash(); the generated type string
// matches the one hashed by the stablecoin contract.
sol! {
    #[derive(Debug)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}

// ERC-3009 settlement entrypoint on the stablecoin contract. Only the call
// encoding is used; any relayer may submit it and pay gas.
sol! {
    interface Erc3009 {
        function transferWithAuthorization(
            address from,
            address to,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;
    }
}

pub use error::X402Error;
pub use facilitator::{Facilitator, FacilitatorKind, VerifyOutcome};
pub use local::LocalFacilitator;
pub use payment::{
    ExactPayload, PaymentPayload, PaymentRequiredBody, PaymentRequirements, PaymentResource,
    RequirementsExtra, TransferAuthorization, EXACT_SCHEME, X402_VERSION,
};
pub use remote::RemoteFacilitator;
pub use store::{InMemoryTokenStore, TokenCounterStore};
pub use token::{Claims, TokenManager};

pub use eip712::parse_caip2_chain_id;
