//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use hdcp_auth::{Engine, NoDelay};
use hdcp_core::caps::Caps;
use hdcp_core::context::{ReceiverId, StreamEntry};
use hdcp_core::error::CryptoError;
use hdcp_core::ids::{len, LinkType};
use hdcp_core::policy::AuthPolicy;
use hdcp_crypto::{
    CryptoGateway, PairingInfo, RandomKind, SoftwareGateway, StreamManagement, VersionInfo,
    WrappedKey,
};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const DERIVATION_KEY: &[u8] = b"hdcp2-rs integration key";
pub const RECEIVER_ID: ReceiverId = [0x8B, 0xA4, 0x47, 0x42, 0xFB];

pub fn downstream(count: u8) -> Vec<ReceiverId> {
    (0..count).map(|i| [0x10 + i, 0x20, 0x30, 0x40, 0x50]).collect()
}

pub fn build_engine(gateway: Arc<dyn CryptoGateway>) -> Engine {
    Engine::builder()
        .gateway(gateway)
        .delay(NoDelay)
        .policy(AuthPolicy::default().without_delays())
        .build()
        .expect("engine")
}

pub fn software_gateway() -> Arc<SoftwareGateway> {
    Arc::new(SoftwareGateway::new(DERIVATION_KEY.to_vec()))
}

/// One `generate_stream_management` call as seen by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCall {
    pub seq_num_m: u32,
    pub streams: Vec<StreamEntry>,
}

/// Software gateway that records stream management requests.
pub struct RecordingGateway {
    inner: SoftwareGateway,
    calls: Mutex<Vec<StreamCall>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self {
            inner: SoftwareGateway::new(DERIVATION_KEY.to_vec()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub async fn stream_calls(&self) -> Vec<StreamCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl CryptoGateway for RecordingGateway {
    async fn transmitter_info(&self) -> Result<VersionInfo, CryptoError> {
        self.inner.transmitter_info().await
    }

    async fn set_receiver_info(&self, info: VersionInfo) -> Result<(), CryptoError> {
        self.inner.set_receiver_info(info).await
    }

    async fn generate_random(&self, kind: RandomKind, len: usize) -> Result<Vec<u8>, CryptoError> {
        self.inner.generate_random(kind, len).await
    }

    async fn set_rrx(&self, rrx: [u8; len::RRX]) -> Result<(), CryptoError> {
        self.inner.set_rrx(rrx).await
    }

    async fn verify_certificate(
        &self,
        cert: &[u8],
        rrx: [u8; len::RRX],
        rx_caps: Caps,
    ) -> Result<ReceiverId, CryptoError> {
        self.inner.verify_certificate(cert, rrx, rx_caps).await
    }

    async fn generate_master_key(&self, link_type: LinkType) -> Result<Vec<u8>, CryptoError> {
        self.inner.generate_master_key(link_type).await
    }

    async fn find_pairing(
        &self,
        receiver_id: ReceiverId,
    ) -> Result<Option<PairingInfo>, CryptoError> {
        self.inner.find_pairing(receiver_id).await
    }

    async fn store_pairing(
        &self,
        receiver_id: ReceiverId,
        ekh_km: [u8; len::EKH_KM],
    ) -> Result<(), CryptoError> {
        self.inner.store_pairing(receiver_id, ekh_km).await
    }

    async fn compare_ake_hmac(&self, h_prime: &[u8]) -> Result<(), CryptoError> {
        self.inner.compare_ake_hmac(h_prime).await
    }

    async fn precompute_lc_hmac(&self) -> Result<[u8; 16], CryptoError> {
        self.inner.precompute_lc_hmac().await
    }

    async fn compare_lc_hmac(&self, l_prime: &[u8]) -> Result<(), CryptoError> {
        self.inner.compare_lc_hmac(l_prime).await
    }

    async fn generate_session_key(
        &self,
        link_type: LinkType,
        share: bool,
    ) -> Result<[u8; len::EDKEY_KS], CryptoError> {
        self.inner.generate_session_key(link_type, share).await
    }

    async fn verify_receiver_id_list(
        &self,
        list_message: &[u8],
        v_prime: &[u8],
    ) -> Result<[u8; len::V], CryptoError> {
        self.inner.verify_receiver_id_list(list_message, v_prime).await
    }

    async fn generate_stream_management(
        &self,
        link_type: LinkType,
        seq_num_m: u32,
        streams: Vec<StreamEntry>,
    ) -> Result<StreamManagement, CryptoError> {
        self.calls.lock().await.push(StreamCall {
            seq_num_m,
            streams: streams.clone(),
        });
        self.inner
            .generate_stream_management(link_type, seq_num_m, streams)
            .await
    }

    async fn verify_stream_ready(
        &self,
        m_prime: &[u8],
        stream_message: &[u8],
    ) -> Result<(), CryptoError> {
        self.inner.verify_stream_ready(m_prime, stream_message).await
    }

    async fn wrap_key(&self, key: &[u8]) -> Result<WrappedKey, CryptoError> {
        self.inner.wrap_key(key).await
    }

    async fn unwrap_key(&self, wrapped: &WrappedKey) -> Result<Vec<u8>, CryptoError> {
        self.inner.unwrap_key(wrapped).await
    }
}
