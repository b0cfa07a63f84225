use dashmap::DashMap;
use sha2::{Digest, Sha256};

/// Replay suppression for payment payloads.
///
/// Keys are SHA-256 fingerprints of the exact bytes decoded from the client's
/// `Payment-Signature` header. A fingerprint is claimed before verification
/// starts; it is retracted only when verification fails, and never after a
/// settlement was attempted, since the on-chain transaction may have landed
/// even when the settle call errored.
pub struct SeenPayments {
    seen: DashMap<[u8; 32], ()>,
}

impl SeenPayments {
    pub fn new() -> Self {
        Self {
            seen: DashMap::new(),
        }
    }

    /// Fingerprint of a raw payment payload.
    pub fn fingerprint(payload: &[u8]) -> [u8; 32] {
        Sha256::digest(payload).into()
    }

    /// Atomically claim a fingerprint. Returns `false` if it was already
    /// claimed; two concurrent identical payments can never both get `true`.
    pub fn try_claim(&self, fingerprint: [u8; 32]) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.seen.entry(fingerprint) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(());
                true
            }
        }
    }

    /// Release a fingerprint so the payment may be retried with a corrected
    /// payload.
    pub fn retract(&self, fingerprint: [u8; 32]) {
        self.seen.remove(&fingerprint);
    }
}

impl Default for SeenPayments {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_exclusive_until_retracted() {
        let seen = SeenPayments::new();
        let fp = SeenPayments::fingerprint(b"payment payload");

        assert!(seen.try_claim(fp));
        assert!(!seen.try_claim(fp));

        seen.retract(fp);
        assert!(seen.try_claim(fp));
    }

    #[test]
    fn fingerprints_differ_for_different_bytes() {
        assert_ne!(
            SeenPayments::fingerprint(b"payment a"),
            SeenPayments::fingerprint(b"payment b")
        );
    }

    #[test]
    fn fingerprint_is_stable_for_identical_bytes() {
        assert_eq!(
            SeenPayments::fingerprint(b"same bytes"),
            SeenPayments::fingerprint(b"same bytes")
        );
    }
}
