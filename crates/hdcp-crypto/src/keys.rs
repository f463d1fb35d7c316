//! Key material handled inside the gateway.
//!
//! Plain keys never leave the gateway; the engine only sees encrypted or
//! wrapped forms.

use hdcp_core::ids::len;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// 128-bit master key km.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey(pub [u8; 16]);

/// 128-bit session key ks.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey(pub [u8; 16]);

/// 256-bit derived key kd.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey(pub [u8; 32]);

/// Opaque key blob produced by `wrap_key`.
#[derive(Debug, Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct WrappedKey(pub Vec<u8>);

impl MasterKey {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl SessionKey {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl WrappedKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Pairing material stored per receiver.
#[derive(Clone, ZeroizeOnDrop)]
pub struct StoredPairing {
    pub km: MasterKey,
    #[zeroize(skip)]
    pub ekh_km: [u8; len::EKH_KM],
    #[zeroize(skip)]
    pub m: [u8; len::M],
}
