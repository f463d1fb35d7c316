//! Software stand-in for the HDCP key schedule.
//!
//! Both ends of a simulated link share a derivation key. Certificates, km
//! encryption and every HMAC value are derived from it with HMAC-SHA256 so
//! that the transmitter gateway and a simulated receiver agree on H', L',
//! V' and M' without RSA or the licensed key set.

use crate::aes::BlockCipher;
use hdcp_core::context::ReceiverId;
use hdcp_core::error::CryptoError;
use hdcp_core::ids::len;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Domain separation labels.
pub mod labels {
    pub const CERT: &[u8] = b"hdcp2-sim-cert";
    pub const KPUB: &[u8] = b"hdcp2-sim-kpub";
    pub const KH: &[u8] = b"hdcp2-sim-kh";
    pub const KD: &[u8] = b"hdcp2-sim-kd";
    pub const LC: &[u8] = b"hdcp2-sim-lc";
    pub const DKEY2: &[u8] = b"hdcp2-sim-dkey2";
    pub const WRAP: &[u8] = b"hdcp2-sim-wrap";
    pub const WRAP_TAG: &[u8] = b"hdcp2-sim-wrap-tag";
}

/// Certificate layout: receiver id, public key, reserved, signature.
pub mod cert {
    pub const RECEIVER_ID: std::ops::Range<usize> = 0..5;
    pub const PUBLIC_KEY: std::ops::Range<usize> = 5..136;
    pub const SIGNED: std::ops::Range<usize> = 0..138;
    pub const SIGNATURE: std::ops::Range<usize> = 138..522;
}

/// HMAC-SHA256 over the concatenation of `parts`.
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32], CryptoError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|e| CryptoError::Gateway {
        op: "hmac",
        reason: e.to_string(),
    })?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Constant-time equality.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

fn first_16(bytes: &[u8; 32]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&bytes[..16]);
    out
}

fn xor_16(a: &[u8; 16], b: &[u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
        *o = x ^ y;
    }
    out
}

/// Build a signed receiver certificate.
pub fn build_certificate(
    derivation_key: &[u8],
    receiver_id: &ReceiverId,
) -> Result<Vec<u8>, CryptoError> {
    let mut out = vec![0u8; len::CERT_RX];
    out[cert::RECEIVER_ID].copy_from_slice(receiver_id);
    let public = hmac_sha256(derivation_key, &[labels::KPUB, b"public", receiver_id])?;
    for (i, b) in out[cert::PUBLIC_KEY].iter_mut().enumerate() {
        *b = public[i % public.len()];
    }
    let sig = hmac_sha256(derivation_key, &[labels::CERT, &out[cert::SIGNED]])?;
    out[cert::SIGNATURE.start..cert::SIGNATURE.start + sig.len()].copy_from_slice(&sig);
    Ok(out)
}

/// Check a certificate's signature. Returns the receiver id on success.
pub fn verify_certificate(
    derivation_key: &[u8],
    certificate: &[u8],
) -> Result<ReceiverId, CryptoError> {
    if certificate.len() != len::CERT_RX {
        return Err(CryptoError::CertificateRejected(format!(
            "length {}",
            certificate.len()
        )));
    }
    let expected = hmac_sha256(derivation_key, &[labels::CERT, &certificate[cert::SIGNED]])?;
    let signature = &certificate[cert::SIGNATURE];
    let (sig, padding) = signature.split_at(expected.len());
    if !ct_eq(sig, &expected) || padding.iter().any(|&b| b != 0) {
        return Err(CryptoError::CertificateRejected("bad signature".to_string()));
    }
    let mut id = [0u8; len::RECEIVER_ID];
    id.copy_from_slice(&certificate[cert::RECEIVER_ID]);
    Ok(id)
}

fn kpub_cipher(derivation_key: &[u8], receiver_id: &ReceiverId) -> Result<BlockCipher, CryptoError> {
    let key = hmac_sha256(derivation_key, &[labels::KPUB, receiver_id])?;
    Ok(BlockCipher::new(first_16(&key)))
}

fn kh_cipher(derivation_key: &[u8], receiver_id: &ReceiverId) -> Result<BlockCipher, CryptoError> {
    let key = hmac_sha256(derivation_key, &[labels::KH, receiver_id])?;
    Ok(BlockCipher::new(first_16(&key)))
}

/// Ekpub(km): km under the receiver's public key, padded to 128 bytes.
pub fn encrypt_km_kpub(
    derivation_key: &[u8],
    receiver_id: &ReceiverId,
    km: &[u8; 16],
) -> Result<Vec<u8>, CryptoError> {
    let block = kpub_cipher(derivation_key, receiver_id)?.encrypt_block(*km)?;
    let mut out = vec![0u8; len::EKPUB_KM];
    out[..16].copy_from_slice(&block);
    Ok(out)
}

pub fn decrypt_km_kpub(
    derivation_key: &[u8],
    receiver_id: &ReceiverId,
    ekpub_km: &[u8],
) -> Result<[u8; 16], CryptoError> {
    if ekpub_km.len() != len::EKPUB_KM {
        return Err(CryptoError::InvalidKeyLength {
            expected: len::EKPUB_KM,
            actual: ekpub_km.len(),
        });
    }
    let mut block = [0u8; 16];
    block.copy_from_slice(&ekpub_km[..16]);
    kpub_cipher(derivation_key, receiver_id)?.decrypt_block(block)
}

/// Ekh(km): km under the receiver's private pairing key.
pub fn encrypt_km_kh(
    derivation_key: &[u8],
    receiver_id: &ReceiverId,
    km: &[u8; 16],
) -> Result<[u8; 16], CryptoError> {
    kh_cipher(derivation_key, receiver_id)?.encrypt_block(*km)
}

pub fn decrypt_km_kh(
    derivation_key: &[u8],
    receiver_id: &ReceiverId,
    ekh_km: &[u8; 16],
) -> Result<[u8; 16], CryptoError> {
    kh_cipher(derivation_key, receiver_id)?.decrypt_block(*ekh_km)
}

/// m = rtx || rrx.
pub fn pairing_m(rtx: &[u8; len::RTX], rrx: &[u8; len::RRX]) -> [u8; len::M] {
    let mut m = [0u8; len::M];
    m[..len::RTX].copy_from_slice(rtx);
    m[len::RTX..].copy_from_slice(rrx);
    m
}

/// kd from km and both randoms.
pub fn derive_kd(km: &[u8; 16], rtx: &[u8], rrx: &[u8]) -> Result<[u8; 32], CryptoError> {
    hmac_sha256(km, &[labels::KD, rtx, rrx])
}

/// H' = HMAC(kd, rtx || RxCaps || TxCaps).
pub fn compute_h(
    kd: &[u8; 32],
    rtx: &[u8],
    rx_caps: &[u8],
    tx_caps: &[u8],
) -> Result<[u8; 32], CryptoError> {
    hmac_sha256(kd, &[rtx, rx_caps, tx_caps])
}

/// L' = HMAC(kd, rn || rrx).
pub fn compute_l(kd: &[u8; 32], rn: &[u8], rrx: &[u8]) -> Result<[u8; 32], CryptoError> {
    hmac_sha256(kd, &[labels::LC, rn, rrx])
}

/// Key that masks ks inside Edkey(ks).
pub fn dkey2(km: &[u8; 16], rtx: &[u8], rrx: &[u8], rn: &[u8]) -> Result<[u8; 16], CryptoError> {
    let out = hmac_sha256(km, &[labels::DKEY2, rtx, rrx, rn])?;
    Ok(first_16(&out))
}

pub fn mask_ks(ks: &[u8; 16], dkey2: &[u8; 16]) -> [u8; 16] {
    xor_16(ks, dkey2)
}

/// V = HMAC(kd, list message). V' is the upper half, the ack the lower.
pub fn compute_v(kd: &[u8; 32], list_message: &[u8]) -> Result<[u8; 32], CryptoError> {
    hmac_sha256(kd, &[list_message])
}

/// M = HMAC(SHA256(kd), StreamID_Type || seq_num_M).
pub fn compute_m(kd: &[u8; 32], stream_message: &[u8]) -> Result<[u8; 32], CryptoError> {
    let key: [u8; 32] = Sha256::digest(kd).into();
    hmac_sha256(&key, &[stream_message])
}

/// Storage key for wrap/unwrap.
pub fn wrap_keys(derivation_key: &[u8]) -> Result<([u8; 16], [u8; 32]), CryptoError> {
    let enc = hmac_sha256(derivation_key, &[labels::WRAP])?;
    let tag = hmac_sha256(derivation_key, &[labels::WRAP_TAG])?;
    Ok((first_16(&enc), tag))
}
