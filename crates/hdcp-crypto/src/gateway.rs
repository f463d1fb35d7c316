//! Secure crypto gateway interface.
//!
//! The engine never touches key material directly. Every cryptographic step
//! of the protocol is a request to the gateway, which keeps km, kd and ks on
//! its side of the boundary and hands back only encrypted or wrapped bytes.

use crate::keys::WrappedKey;
use async_trait::async_trait;
use hdcp_core::caps::Caps;
use hdcp_core::context::{ReceiverId, StreamEntry};
use hdcp_core::error::CryptoError;
use hdcp_core::ids::{len, LinkType};

/// Which protocol random a `generate_random` call produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RandomKind {
    Rtx,
    Rn,
    Riv,
}

/// HDCP version and locality precompute support of one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VersionInfo {
    pub version: u8,
    pub lc_precompute: bool,
}

/// Stored pairing returned by `find_pairing`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingInfo {
    pub ekh_km: [u8; len::EKH_KM],
    pub m: [u8; len::M],
}

/// Output of `generate_stream_management`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamManagement {
    pub k: u16,
    /// Per-stream entries in the link's wire layout.
    pub streamid_type: Vec<u8>,
}

/// Operations delegated to the secure co-processor.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait CryptoGateway: Send + Sync {
    /// This transmitter's version and precompute support.
    async fn transmitter_info(&self) -> Result<VersionInfo, CryptoError>;

    /// Record the receiver's AKE_Receiver_Info.
    async fn set_receiver_info(&self, info: VersionInfo) -> Result<(), CryptoError>;

    /// Fresh random of the requested kind. rtx and rn are retained.
    async fn generate_random(&self, kind: RandomKind, len: usize) -> Result<Vec<u8>, CryptoError>;

    /// Record rrx received in AKE_Send_rrx.
    async fn set_rrx(&self, rrx: [u8; len::RRX]) -> Result<(), CryptoError>;

    /// Verify the receiver certificate and retain its id, rrx and RxCaps.
    async fn verify_certificate(
        &self,
        cert: &[u8],
        rrx: [u8; len::RRX],
        rx_caps: Caps,
    ) -> Result<ReceiverId, CryptoError>;

    /// Generate km and return Ekpub(km).
    async fn generate_master_key(&self, link_type: LinkType) -> Result<Vec<u8>, CryptoError>;

    /// Look up stored pairing for a receiver; loads km on a hit.
    async fn find_pairing(&self, receiver_id: ReceiverId)
        -> Result<Option<PairingInfo>, CryptoError>;

    /// Persist Ekh(km) from AKE_Send_Pairing_Info for the current km.
    async fn store_pairing(
        &self,
        receiver_id: ReceiverId,
        ekh_km: [u8; len::EKH_KM],
    ) -> Result<(), CryptoError>;

    /// Compare the receiver's H'.
    async fn compare_ake_hmac(&self, h_prime: &[u8]) -> Result<(), CryptoError>;

    /// Least significant 128 bits of L for RTT_Challenge.
    async fn precompute_lc_hmac(&self) -> Result<[u8; 16], CryptoError>;

    /// Compare the receiver's L' (full or precomputed half).
    async fn compare_lc_hmac(&self, l_prime: &[u8]) -> Result<(), CryptoError>;

    /// Generate ks (or reuse the session's with `share`) and return Edkey(ks).
    async fn generate_session_key(
        &self,
        link_type: LinkType,
        share: bool,
    ) -> Result<[u8; len::EDKEY_KS], CryptoError>;

    /// Verify V' over the list message and return the ack value V.
    async fn verify_receiver_id_list(
        &self,
        list_message: &[u8],
        v_prime: &[u8],
    ) -> Result<[u8; len::V], CryptoError>;

    /// Prepare stream management for `streams`.
    async fn generate_stream_management(
        &self,
        link_type: LinkType,
        seq_num_m: u32,
        streams: Vec<StreamEntry>,
    ) -> Result<StreamManagement, CryptoError>;

    /// Compare the receiver's M' over StreamID_Type || seq_num_M.
    async fn verify_stream_ready(
        &self,
        m_prime: &[u8],
        stream_message: &[u8],
    ) -> Result<(), CryptoError>;

    /// Wrap a key for storage outside the gateway.
    async fn wrap_key(&self, key: &[u8]) -> Result<WrappedKey, CryptoError>;

    /// Recover a key produced by `wrap_key`.
    async fn unwrap_key(&self, wrapped: &WrappedKey) -> Result<Vec<u8>, CryptoError>;
}
