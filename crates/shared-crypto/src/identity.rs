//! # RSA Identity Keys
//!
//! Minion identity keys: RSA-PSS (SHA-256) signatures prove possession of
//! the private key during the handshake, and RSA-OAEP (SHA-256) wraps the
//! per-session AES key for delivery.
//!
//! ## Security Properties
//!
//! - Signing uses blinding (`BlindedSigningKey`)
//! - Public keys below a caller-chosen modulus floor are refused before any
//!   other use via [`RsaPublicKey::ensure_min_bits`]

use crate::hashing::fingerprint;
use crate::CryptoError;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::pss::{BlindedSigningKey, Signature, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::Oaep;
use sha2::Sha256;
use zeroize::Zeroizing;

/// Default modulus size for newly generated identity keys.
pub const DEFAULT_RSA_BITS: usize = 2048;

/// RSA public key of a minion.
#[derive(Clone, PartialEq, Eq)]
pub struct RsaPublicKey(rsa::RsaPublicKey);

impl RsaPublicKey {
    /// Parse a SubjectPublicKeyInfo PEM document.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        rsa::RsaPublicKey::from_public_key_pem(pem.trim())
            .map(Self)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    /// Encode as SubjectPublicKeyInfo PEM with LF line endings.
    pub fn to_pem(&self) -> Result<String, CryptoError> {
        self.0
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    /// Modulus size in bits.
    #[must_use]
    pub fn bits(&self) -> usize {
        self.0.size() * 8
    }

    /// Refuse keys whose modulus is below `min_bits`.
    pub fn ensure_min_bits(&self, min_bits: usize) -> Result<(), CryptoError> {
        let bits = self.bits();
        if bits < min_bits {
            return Err(CryptoError::KeyTooSmall { bits, min_bits });
        }
        Ok(())
    }

    /// Verify an RSA-PSS (SHA-256) signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let signature =
            Signature::try_from(signature).map_err(|_| CryptoError::InvalidSignatureFormat)?;
        VerifyingKey::<Sha256>::new(self.0.clone())
            .verify(message, &signature)
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }

    /// Wrap a symmetric key with RSA-OAEP (SHA-256).
    pub fn wrap_key(&self, key: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.0
            .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), key)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
    }

    /// SHA-256 fingerprint of the DER encoding.
    pub fn fingerprint(&self) -> Result<String, CryptoError> {
        let der = self
            .0
            .to_public_key_der()
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        Ok(fingerprint(der.as_bytes()))
    }
}

impl std::fmt::Debug for RsaPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RsaPublicKey({} bits)", self.bits())
    }
}

/// RSA key pair held by a minion.
#[derive(Clone)]
pub struct RsaKeyPair {
    private: rsa::RsaPrivateKey,
    public: RsaPublicKey,
}

impl RsaKeyPair {
    /// Generate a fresh key pair.
    pub fn generate(bits: usize) -> Result<Self, CryptoError> {
        let private = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), bits)
            .map_err(|e| CryptoError::KeyGenerationFailed(e.to_string()))?;
        Ok(Self::from_private(private))
    }

    /// Load a PKCS#8 PEM private key.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self, CryptoError> {
        let private = rsa::RsaPrivateKey::from_pkcs8_pem(pem.trim())
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self::from_private(private))
    }

    /// Encode the private key as PKCS#8 PEM.
    pub fn to_pkcs8_pem(&self) -> Result<Zeroizing<String>, CryptoError> {
        self.private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))
    }

    fn from_private(private: rsa::RsaPrivateKey) -> Self {
        let public = RsaPublicKey(rsa::RsaPublicKey::from(&private));
        Self { private, public }
    }

    /// Public half.
    #[must_use]
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Sign `message` with RSA-PSS (SHA-256).
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        BlindedSigningKey::<Sha256>::new(self.private.clone())
            .sign_with_rng(&mut rand::thread_rng(), message)
            .to_vec()
    }

    /// Unwrap an RSA-OAEP (SHA-256) wrapped key.
    pub fn unwrap_key(&self, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.private
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

impl std::fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaKeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}
