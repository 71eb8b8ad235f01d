//! ECDSA authentication.
//!
//! Clients hold a P-256 keypair and publish the verifying key through the
//! `register_key` RPC; every signed request is checked against the
//! registered key.  Signatures are DER-encoded, carried as base64, over
//! the sha256 digest of the auth message.

use std::collections::HashMap;
use std::sync::Mutex;

use base64::Engine as _;
use dork_core::error::{Error, Result};
use dork_core::verifier::VerifierT;
use openssl::bn::BigNumContext;
use openssl::ec::{EcGroup, EcKey, PointConversionForm};
use openssl::ecdsa::EcdsaSig;
use openssl::hash::{hash, MessageDigest};
use openssl::nid::Nid;
use openssl::pkey::{Private, Public};

fn base64_encode(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

fn base64_decode(data: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .or(Err(Error::InvalidSignature))
}

fn curve_group() -> Result<EcGroup> {
    EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)
        .map_err(|e| Error::InternalError(e.to_string()))
}

/// A signing keypair, held by clients and tests.
pub struct Keypair {
    key: EcKey<Private>,
}

impl Keypair {
    pub fn generate() -> Result<Self> {
        let group = curve_group()?;
        let key = EcKey::generate(&group)
            .map_err(|e| Error::InternalError(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn public_key_pem(&self) -> Result<String> {
        let pem = self
            .key
            .public_key_to_pem()
            .map_err(|e| Error::InternalError(e.to_string()))?;
        String::from_utf8(pem).map_err(|e| Error::InternalError(e.to_string()))
    }

    /// Derive an address from the public key: `0x` + first 20 bytes of the
    /// sha256 of the uncompressed point.
    pub fn address(&self) -> Result<String> {
        let group = curve_group()?;
        let mut ctx = BigNumContext::new().map_err(|e| Error::InternalError(e.to_string()))?;
        let point = self
            .key
            .public_key()
            .to_bytes(&group, PointConversionForm::UNCOMPRESSED, &mut ctx)
            .map_err(|e| Error::InternalError(e.to_string()))?;
        let digest =
            hash(MessageDigest::sha256(), &point).map_err(|e| Error::InternalError(e.to_string()))?;
        Ok(format!("0x{}", hex::encode(&digest[..20])))
    }

    pub fn sign(&self, message: &[u8]) -> Result<String> {
        let digest = hash(MessageDigest::sha256(), message)
            .map_err(|e| Error::InternalError(e.to_string()))?;
        let sig = EcdsaSig::sign(&digest, &self.key).or(Err(Error::InvalidSignature))?;
        let der = sig.to_der().or(Err(Error::InvalidSignature))?;
        Ok(base64_encode(&der))
    }
}

/// Verifier over per-player registered keys.
#[derive(Default)]
pub struct EcdsaVerifier {
    keys: Mutex<HashMap<String, EcKey<Public>>>,
}

impl EcdsaVerifier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VerifierT for EcdsaVerifier {
    fn register_key(&self, player: &str, public_key_pem: &str) -> Result<()> {
        let key = EcKey::public_key_from_pem(public_key_pem.as_bytes())
            .or(Err(Error::InvalidSignature))?;
        self.keys
            .lock()
            .map_err(|_| Error::InternalError("verifier lock poisoned".into()))?
            .insert(player.to_owned(), key);
        Ok(())
    }

    fn verify(&self, player: &str, message: &[u8], signature_b64: &str) -> Result<()> {
        let keys = self
            .keys
            .lock()
            .map_err(|_| Error::InternalError("verifier lock poisoned".into()))?;
        let key = keys
            .get(player)
            .ok_or_else(|| Error::UnknownPublicKey(player.to_owned()))?;

        let der = base64_decode(signature_b64)?;
        let sig = EcdsaSig::from_der(&der).or(Err(Error::InvalidSignature))?;
        let digest = hash(MessageDigest::sha256(), message)
            .map_err(|e| Error::InternalError(e.to_string()))?;
        match sig.verify(&digest, key) {
            Ok(true) => Ok(()),
            _ => Err(Error::InvalidSignature),
        }
    }
}
