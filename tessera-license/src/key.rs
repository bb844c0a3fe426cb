//! ECDSA P-256 keys for signing and verifying licenses.
//!
//! The issuer keeps a PKCS#8 private key; clients embed the matching SPKI
//! public key. Both travel as standard base64 of their DER encoding.
//! Signatures are the fixed 64-byte `r || s` form; DER signatures are also
//! accepted on verification.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use p256::ecdsa::{
    signature::{Signer as _, Verifier as _},
    Signature, SigningKey, VerifyingKey,
};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rand::rngs::OsRng;

use crate::error::{LicenseError, LicenseResult};

/// Issuer-side signing key. Never shipped to clients.
pub struct IssuerKeyPair {
    signing_key: SigningKey,
}

impl IssuerKeyPair {
    /// Generates a new random P-256 key pair.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Creates a key pair from a raw 32-byte secret scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> LicenseResult<Self> {
        let signing_key = SigningKey::from_slice(bytes)
            .map_err(|_| LicenseError::InvalidKey("invalid secret scalar".to_string()))?;
        Ok(Self { signing_key })
    }

    /// Imports a PKCS#8 DER private key.
    pub fn from_pkcs8_der(der: &[u8]) -> LicenseResult<Self> {
        let signing_key = SigningKey::from_pkcs8_der(der)
            .map_err(|e| LicenseError::InvalidKey(format!("invalid PKCS#8 private key: {e}")))?;
        Ok(Self { signing_key })
    }

    /// Imports a base64-encoded PKCS#8 DER private key.
    pub fn from_pkcs8_base64(encoded: &str) -> LicenseResult<Self> {
        let der = BASE64
            .decode(encoded.trim())
            .map_err(|e| LicenseError::InvalidKey(format!("invalid private key base64: {e}")))?;
        Self::from_pkcs8_der(&der)
    }

    /// Exports the private key as base64 PKCS#8 DER.
    pub fn to_pkcs8_base64(&self) -> LicenseResult<String> {
        let document = self
            .signing_key
            .to_pkcs8_der()
            .map_err(|e| LicenseError::InvalidKey(format!("PKCS#8 export failed: {e}")))?;
        Ok(BASE64.encode(document.as_bytes()))
    }

    /// Returns the matching public key.
    #[must_use]
    pub fn public_key(&self) -> LicensePublicKey {
        LicensePublicKey(*self.signing_key.verifying_key())
    }

    /// Exports the matching public key as base64 SPKI DER.
    pub fn public_key_spki_base64(&self) -> LicenseResult<String> {
        self.public_key().to_spki_base64()
    }

    /// Signs `message` (hashed with SHA-256) and returns `r || s`.
    #[must_use]
    pub fn sign_bytes(&self, message: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing_key.sign(message);
        signature.to_bytes().to_vec()
    }
}

impl std::fmt::Debug for IssuerKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuerKeyPair")
            .field("signing_key", &"[REDACTED]")
            .finish()
    }
}

/// Client-side verifying key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicensePublicKey(VerifyingKey);

impl LicensePublicKey {
    /// Imports an SPKI DER public key.
    pub fn from_spki_der(der: &[u8]) -> LicenseResult<Self> {
        VerifyingKey::from_public_key_der(der)
            .map(Self)
            .map_err(|e| LicenseError::InvalidKey(format!("invalid SPKI public key: {e}")))
    }

    /// Imports a base64-encoded SPKI DER public key.
    pub fn from_spki_base64(encoded: &str) -> LicenseResult<Self> {
        let der = BASE64
            .decode(encoded.trim())
            .map_err(|e| LicenseError::InvalidKey(format!("invalid public key base64: {e}")))?;
        Self::from_spki_der(&der)
    }

    /// Exports the key as SPKI DER.
    pub fn to_spki_der(&self) -> LicenseResult<Vec<u8>> {
        self.0
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| LicenseError::InvalidKey(format!("SPKI export failed: {e}")))
    }

    /// Exports the key as base64 SPKI DER.
    pub fn to_spki_base64(&self) -> LicenseResult<String> {
        Ok(BASE64.encode(self.to_spki_der()?))
    }

    /// Verifies `signature` over `message`. Undecodable signatures fail.
    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let parsed = Signature::from_slice(signature).or_else(|_| Signature::from_der(signature));
        match parsed {
            Ok(sig) => self.0.verify(message, &sig).is_ok(),
            Err(_) => false,
        }
    }
}
