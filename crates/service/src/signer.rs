use crate::SignatureProvider;

use codec::hmac_sha1;
use rand::Rng;

/// Shared-secret signer for location records: HMAC-SHA1 over the canonical
/// signable bytes, keyed with the deployment secret.
///
/// Every node and client of one deployment carries the same secret, so any
/// of them can verify any other's records. Deployments needing asymmetric
/// proofs plug their own [`SignatureProvider`] in instead.
pub struct HmacSigner {
    key: Vec<u8>,
}

impl HmacSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: secret.to_vec(),
        }
    }

    /// A throwaway key for deployments that never configured one. Records
    /// signed with it verify only within this process.
    pub fn random() -> Self {
        let mut key = [0u8; 32];
        rand::rng().fill(&mut key);

        Self { key: key.to_vec() }
    }
}

impl SignatureProvider for HmacSigner {
    /// # Test
    ///
    /// ```
    /// use dim_node_service::{SignatureProvider, signer::HmacSigner};
    ///
    /// let signer = HmacSigner::new(b"raspberry");
    /// let signature = signer.sign(b"alice");
    ///
    /// assert_eq!(signature.len(), 20);
    /// assert!(signer.verify(b"alice", &signature));
    /// assert!(!signer.verify(b"mallory", &signature));
    /// assert!(!HmacSigner::random().verify(b"alice", &signature));
    /// ```
    fn sign(&self, data: &[u8]) -> Vec<u8> {
        hmac_sha1(&self.key, &[data])
            .map(|it| it.into_bytes().to_vec())
            .unwrap_or_default()
    }

    fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        let expected = self.sign(data);
        !expected.is_empty() && expected.as_slice() == signature
    }
}
