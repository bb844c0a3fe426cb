//! The signed license envelope (the license file).
//!
//! ```json
//! { "payload": "<base64url>", "sig": "<base64url>", "formatVersion": 2 }
//! ```
//!
//! `payload` is the UTF-8 JSON payload exactly as it was signed; `sig` is the
//! raw signature. Both use the URL-safe alphabet without padding; padded input
//! is accepted on read.

use base64::{
    alphabet,
    engine::{general_purpose::NO_PAD, DecodePaddingMode, GeneralPurpose},
    Engine,
};
use serde::{Deserialize, Serialize};

use crate::error::{LicenseResult, ValidationError};

/// Format version written by this implementation.
pub const FORMAT_VERSION: u32 = 2;

/// Version assumed for envelopes that predate the `formatVersion` field.
pub const LEGACY_FORMAT_VERSION: u32 = 1;

/// URL-safe base64 that writes no padding and tolerates it on read.
pub(crate) const BASE64_URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    NO_PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

fn legacy_format_version() -> u32 {
    LEGACY_FORMAT_VERSION
}

/// Immutable signed container of an encoded payload and its signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseEnvelope {
    payload: String,
    #[serde(alias = "signature")]
    sig: String,
    #[serde(rename = "formatVersion", default = "legacy_format_version")]
    format_version: u32,
}

impl LicenseEnvelope {
    /// Wraps raw payload and signature bytes.
    pub(crate) fn from_parts(payload: &[u8], signature: &[u8]) -> Self {
        Self {
            payload: BASE64_URL.encode(payload),
            sig: BASE64_URL.encode(signature),
            format_version: FORMAT_VERSION,
        }
    }

    /// Parses a license file. Missing or blank fields are rejected.
    pub fn parse(json: &str) -> Result<Self, ValidationError> {
        let envelope: Self = serde_json::from_str(json)
            .map_err(|e| ValidationError::MalformedEnvelope(format!("invalid JSON: {e}")))?;

        if envelope.payload.trim().is_empty() || envelope.sig.trim().is_empty() {
            return Err(ValidationError::MalformedEnvelope(
                "missing payload or signature".to_string(),
            ));
        }
        Ok(envelope)
    }

    /// Decodes the payload and signature bytes.
    pub fn decode(&self) -> Result<(Vec<u8>, Vec<u8>), ValidationError> {
        let payload = BASE64_URL
            .decode(self.payload.trim())
            .map_err(|e| ValidationError::MalformedEncoding(format!("payload: {e}")))?;
        let signature = BASE64_URL
            .decode(self.sig.trim())
            .map_err(|e| ValidationError::MalformedEncoding(format!("signature: {e}")))?;
        Ok((payload, signature))
    }

    /// Serializes the envelope as pretty-printed JSON.
    pub fn to_json(&self) -> LicenseResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Returns the encoded payload.
    #[must_use]
    pub fn payload_b64(&self) -> &str {
        &self.payload
    }

    /// Returns the encoded signature.
    #[must_use]
    pub fn signature_b64(&self) -> &str {
        &self.sig
    }

    /// Returns the envelope format version.
    #[must_use]
    pub fn format_version(&self) -> u32 {
        self.format_version
    }
}
