use rand::{rngs::OsRng, RngCore};

use crate::error::CryptoError;

/// Source of cryptographically secure random bytes (salts, IVs).
///
/// Implementations must fail rather than fall back to a weaker generator;
/// a failure is what routes the storage into plaintext mode.
pub trait RandomSource: Send + Sync {
    fn fill(&self, dest: &mut [u8]) -> Result<(), CryptoError>;

    fn random_bytes(&self, len: usize) -> Result<Vec<u8>, CryptoError> {
        let mut out = vec![0u8; len];
        self.fill(&mut out)?;
        Ok(out)
    }
}

/// Operating system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&self, dest: &mut [u8]) -> Result<(), CryptoError> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| CryptoError::PrimitiveUnavailable(format!("os rng: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl RandomSource for Broken {
        fn fill(&self, _dest: &mut [u8]) -> Result<(), CryptoError> {
            Err(CryptoError::PrimitiveUnavailable("no entropy".into()))
        }
    }

    #[test]
    fn os_random_fills_requested_length() {
        let bytes = OsRandom.random_bytes(32).expect("os rng");
        assert_eq!(bytes.len(), 32);
        assert_ne!(bytes, vec![0u8; 32]);
    }

    #[test]
    fn failure_propagates_from_random_bytes() {
        let err = Broken.random_bytes(12).expect_err("should fail");
        assert!(matches!(err, CryptoError::PrimitiveUnavailable(_)));
    }
}
