//! y64 encoding and RSA-SHA256 signature primitives.
//!
//! Every signature in the trust fabric — role tokens, policy documents and
//! the public keys in the key-store document — travels in the y64 alphabet:
//! standard base64 with `-` for `+`, `.` for `/`, and trailing `-` as
//! padding. Signatures are RSA PKCS#1 v1.5 over SHA-256.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid y64 encoding: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("unparseable key material: {0}")]
    Key(String),
    #[error("signature verification failed: {0}")]
    Verify(rsa::Error),
    #[error("signing failed: {0}")]
    Sign(rsa::Error),
}

/// Encode bytes into the y64 alphabet.
pub fn y64_encode(data: &[u8]) -> String {
    STANDARD
        .encode(data)
        .replace('+', "-")
        .replace('/', ".")
        .replace('=', "-")
}

/// Decode a y64 string. Trailing `-` is padding; interior `-` and `.` map
/// back to `+` and `/`.
pub fn y64_decode(input: &str) -> Result<Vec<u8>, CryptoError> {
    let stripped = input.trim_end_matches('-');
    let standard = stripped.replace('-', "+").replace('.', "/");
    Ok(STANDARD_NO_PAD.decode(standard)?)
}

/// Parse an RSA public key from PEM, accepting both SubjectPublicKeyInfo
/// (`BEGIN PUBLIC KEY`) and PKCS#1 (`BEGIN RSA PUBLIC KEY`) encodings.
pub fn parse_public_key_pem(pem: &str) -> Result<RsaPublicKey, CryptoError> {
    match RsaPublicKey::from_public_key_pem(pem) {
        Ok(key) => Ok(key),
        Err(_) => RsaPublicKey::from_pkcs1_pem(pem).map_err(|e| CryptoError::Key(e.to_string())),
    }
}

/// Parse an RSA private key from PEM (PKCS#8 or PKCS#1).
pub fn parse_private_key_pem(pem: &str) -> Result<RsaPrivateKey, CryptoError> {
    match RsaPrivateKey::from_pkcs8_pem(pem) {
        Ok(key) => Ok(key),
        Err(_) => RsaPrivateKey::from_pkcs1_pem(pem).map_err(|e| CryptoError::Key(e.to_string())),
    }
}

/// Verify a y64-encoded RSA-SHA256 signature over `message`.
pub fn verify(message: &str, signature: &str, key: &RsaPublicKey) -> Result<(), CryptoError> {
    let sig = y64_decode(signature)?;
    let digest = Sha256::digest(message.as_bytes());
    key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &sig)
        .map_err(CryptoError::Verify)
}

/// Sign `message` with RSA-SHA256, returning the y64-encoded signature.
///
/// The agent itself only verifies; signing is for the `policy-signer` tool
/// and test fixtures.
pub fn sign(message: &str, key: &RsaPrivateKey) -> Result<String, CryptoError> {
    let digest = Sha256::digest(message.as_bytes());
    let sig = key
        .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .map_err(CryptoError::Sign)?;
    Ok(y64_encode(&sig))
}
