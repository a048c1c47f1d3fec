//! Handshake configuration.

use std::time::Duration;

/// Handshake tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Time a minion has to answer a challenge; also the challenge TTL.
    pub handshake_timeout: Duration,
    /// Public keys with a smaller modulus are denied as malformed.
    pub min_rsa_bits: usize,
    /// Upper bound on challenges awaiting an answer.
    pub max_outstanding_challenges: usize,
}

impl AuthConfig {
    /// Default handshake timeout.
    pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
    /// Default modulus floor.
    pub const DEFAULT_MIN_RSA_BITS: usize = 2048;
    /// Default challenge bound.
    pub const DEFAULT_MAX_OUTSTANDING: usize = 10_000;
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Self::DEFAULT_HANDSHAKE_TIMEOUT,
            min_rsa_bits: Self::DEFAULT_MIN_RSA_BITS,
            max_outstanding_challenges: Self::DEFAULT_MAX_OUTSTANDING,
        }
    }
}
