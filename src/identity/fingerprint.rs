//! Certificate fingerprints
//!
//! Clients pin a repository by the SHA-256 of its signing certificate (DER).
//! Shown to humans as uppercase colon-separated hex, embedded in URLs as
//! lowercase plain hex.

use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

use super::IdentityError;

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// SHA-256 fingerprint of a certificate
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint of DER-encoded certificate bytes
    pub fn of_der(der: &[u8]) -> Self {
        let digest = Sha256::digest(der);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Fingerprint of the first certificate in a PEM document
    pub fn of_pem(pem: &str) -> Result<Self, IdentityError> {
        Ok(Self::of_der(&pem_to_der(pem)?))
    }

    /// `AB:CD:...` form
    pub fn to_colon_hex(&self) -> String {
        self.0
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Lowercase hex without separators
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse either form
    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        let cleaned: String = s.chars().filter(|c| *c != ':').collect();
        let bytes = hex::decode(cleaned.to_lowercase())
            .map_err(|e| IdentityError::Certificate(format!("invalid fingerprint: {}", e)))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            IdentityError::Certificate("fingerprint must be 32 bytes".to_string())
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_colon_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Fingerprint::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Decode the first certificate block of a PEM document
pub fn pem_to_der(pem: &str) -> Result<Vec<u8>, IdentityError> {
    let start = pem
        .find(PEM_BEGIN)
        .ok_or_else(|| IdentityError::Certificate("missing BEGIN CERTIFICATE".to_string()))?;
    let body_start = start + PEM_BEGIN.len();
    let end = pem[body_start..]
        .find(PEM_END)
        .ok_or_else(|| IdentityError::Certificate("missing END CERTIFICATE".to_string()))?;

    let body: String = pem[body_start..body_start + end]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    let der = base64::engine::general_purpose::STANDARD
        .decode(body)
        .map_err(|e| IdentityError::Certificate(format!("invalid base64: {}", e)))?;

    if der.is_empty() {
        return Err(IdentityError::Certificate("empty certificate".to_string()));
    }
    Ok(der)
}

/// Encode DER bytes as a PEM certificate block (64-column lines)
pub fn der_to_pem(der: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(der);
    let mut pem = String::from(PEM_BEGIN);
    pem.push('\n');
    for chunk in encoded.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(chunk));
        pem.push('\n');
    }
    pem.push_str(PEM_END);
    pem.push('\n');
    pem
}
