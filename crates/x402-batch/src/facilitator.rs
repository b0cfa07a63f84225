//! The payment verify/settle capability consumed by the gateway middleware.

use std::future::Future;

use alloy::primitives::Address;

use crate::local::LocalFacilitator;
use crate::remote::RemoteFacilitator;
use crate::X402Error;

/// Outcome of a successful verify call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    /// The address that authorised the payment.
    pub payer: Address,
}

/// Verifies and settles x402 payments.
///
/// Payload and requirements are raw bytes: the caller stays agnostic to the
/// facilitator's parsing, and the replay fingerprint is computed over exactly
/// the bytes handed here. Both calls are cancelled by dropping their futures,
/// which is how a client disconnect propagates out of the request handler;
/// a dropped settle must be treated as possibly landed.
pub trait Facilitator: Send + Sync {
    /// Check that the payment payload is valid against the requirements and
    /// return the payer identity. Failures are fully recoverable.
    fn verify(
        &self,
        payload_bytes: &[u8],
        requirements_bytes: &[u8],
    ) -> impl Future<Output = Result<VerifyOutcome, X402Error>> + Send;

    /// Finalise the payment on-chain. A returned error does not guarantee the
    /// transaction failed: it may have been admitted to the mempool.
    fn settle(
        &self,
        payload_bytes: &[u8],
        requirements_bytes: &[u8],
    ) -> impl Future<Output = Result<(), X402Error>> + Send;
}

/// Runtime-selected facilitator backend.
pub enum FacilitatorKind {
    /// Delegates to an x402 facilitator REST service.
    Remote(RemoteFacilitator),
    /// Verifies and settles directly against the settlement chain.
    Local(LocalFacilitator),
}

impl Facilitator for FacilitatorKind {
    async fn verify(
        &self,
        payload_bytes: &[u8],
        requirements_bytes: &[u8],
    ) -> Result<VerifyOutcome, X402Error> {
        match self {
            FacilitatorKind::Remote(f) => f.verify(payload_bytes, requirements_bytes).await,
            FacilitatorKind::Local(f) => f.verify(payload_bytes, requirements_bytes).await,
        }
    }

    async fn settle(
        &self,
        payload_bytes: &[u8],
        requirements_bytes: &[u8],
    ) -> Result<(), X402Error> {
        match self {
            FacilitatorKind::Remote(f) => f.settle(payload_bytes, requirements_bytes).await,
            FacilitatorKind::Local(f) => f.settle(payload_bytes, requirements_bytes).await,
        }
    }
}
