//! In-process gateway built on the software key schedule.

use crate::aes::{pad, unpad, BlockCipher};
use crate::derive;
use crate::gateway::{CryptoGateway, PairingInfo, RandomKind, StreamManagement, VersionInfo};
use crate::keys::{DerivedKey, MasterKey, SessionKey, StoredPairing, WrappedKey};
use async_trait::async_trait;
use hdcp_core::caps::{Caps, HDCP_VERSION_2};
use hdcp_core::context::{ReceiverId, StreamEntry};
use hdcp_core::error::CryptoError;
use hdcp_core::ids::{len, LinkType};
use rand::{rngs::OsRng, RngCore};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Gateway operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    TransmitterInfo,
    SetReceiverInfo,
    GenerateRandom,
    SetRrx,
    VerifyCertificate,
    GenerateMasterKey,
    FindPairing,
    StorePairing,
    CompareAkeHmac,
    PrecomputeLcHmac,
    CompareLcHmac,
    GenerateSessionKey,
    VerifyReceiverIdList,
    GenerateStreamManagement,
    VerifyStreamReady,
    WrapKey,
    UnwrapKey,
}

impl GatewayOp {
    pub fn name(self) -> &'static str {
        match self {
            GatewayOp::TransmitterInfo => "transmitter_info",
            GatewayOp::SetReceiverInfo => "set_receiver_info",
            GatewayOp::GenerateRandom => "generate_random",
            GatewayOp::SetRrx => "set_rrx",
            GatewayOp::VerifyCertificate => "verify_certificate",
            GatewayOp::GenerateMasterKey => "generate_master_key",
            GatewayOp::FindPairing => "find_pairing",
            GatewayOp::StorePairing => "store_pairing",
            GatewayOp::CompareAkeHmac => "compare_ake_hmac",
            GatewayOp::PrecomputeLcHmac => "precompute_lc_hmac",
            GatewayOp::CompareLcHmac => "compare_lc_hmac",
            GatewayOp::GenerateSessionKey => "generate_session_key",
            GatewayOp::VerifyReceiverIdList => "verify_receiver_id_list",
            GatewayOp::GenerateStreamManagement => "generate_stream_management",
            GatewayOp::VerifyStreamReady => "verify_stream_ready",
            GatewayOp::WrapKey => "wrap_key",
            GatewayOp::UnwrapKey => "unwrap_key",
        }
    }
}

#[derive(Default)]
struct State {
    rx_info: Option<VersionInfo>,
    rtx: Option<[u8; len::RTX]>,
    rrx: Option<[u8; len::RRX]>,
    rn: Option<[u8; len::RN]>,
    /// L's low half went out in RTT_Challenge for the current rn.
    lc_precomputed: bool,
    rx_caps: Caps,
    receiver_id: Option<ReceiverId>,
    km: Option<MasterKey>,
    ks: Option<SessionKey>,
    pairings: HashMap<ReceiverId, StoredPairing>,
    failures: HashMap<GatewayOp, u32>,
}

impl State {
    fn check(&mut self, op: GatewayOp) -> Result<(), CryptoError> {
        if let Some(remaining) = self.failures.get_mut(&op) {
            if *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return Err(CryptoError::Gateway {
                    op: op.name(),
                    reason: "injected failure".to_string(),
                });
            }
        }
        Ok(())
    }

    fn require<T: Copy>(value: Option<T>, op: GatewayOp, what: &str) -> Result<T, CryptoError> {
        value.ok_or_else(|| CryptoError::Gateway {
            op: op.name(),
            reason: format!("{} not available", what),
        })
    }

    fn km(&self, op: GatewayOp) -> Result<[u8; 16], CryptoError> {
        self.km
            .as_ref()
            .map(|km| *km.as_bytes())
            .ok_or_else(|| CryptoError::Gateway {
                op: op.name(),
                reason: "km not available".to_string(),
            })
    }

    fn kd(&self, op: GatewayOp) -> Result<DerivedKey, CryptoError> {
        let km = self.km(op)?;
        let rtx = Self::require(self.rtx, op, "rtx")?;
        let rrx = Self::require(self.rrx, op, "rrx")?;
        Ok(DerivedKey(derive::derive_kd(&km, &rtx, &rrx)?))
    }
}

/// Software gateway keyed by a shared derivation key.
///
/// Holds the transmitter's secret state for the attempt in progress plus a
/// pairing store that survives across attempts.
pub struct SoftwareGateway {
    derivation_key: Vec<u8>,
    tx_info: VersionInfo,
    revoked: HashSet<ReceiverId>,
    state: Mutex<State>,
}

impl SoftwareGateway {
    pub fn new(derivation_key: impl Into<Vec<u8>>) -> Self {
        Self {
            derivation_key: derivation_key.into(),
            tx_info: VersionInfo {
                version: HDCP_VERSION_2,
                lc_precompute: true,
            },
            revoked: HashSet::new(),
            state: Mutex::new(State::default()),
        }
    }

    /// Advertise locality precompute support or not.
    pub fn with_lc_precompute(mut self, enabled: bool) -> Self {
        self.tx_info.lc_precompute = enabled;
        self
    }

    /// Reject certificates for these receiver ids.
    pub fn with_revoked(mut self, ids: impl IntoIterator<Item = ReceiverId>) -> Self {
        self.revoked.extend(ids);
        self
    }

    /// Fail the next `count` calls of `op`.
    pub async fn fail_next(&self, op: GatewayOp, count: u32) {
        self.state.lock().await.failures.insert(op, count);
    }

    /// Fail every call of `op` until cleared.
    pub async fn fail_always(&self, op: GatewayOp) {
        self.state.lock().await.failures.insert(op, u32::MAX);
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failures.clear();
    }

    /// Whether pairing material is stored for a receiver.
    pub async fn has_pairing(&self, receiver_id: &ReceiverId) -> bool {
        self.state.lock().await.pairings.contains_key(receiver_id)
    }

    fn random<const N: usize>() -> [u8; N] {
        let mut out = [0u8; N];
        OsRng.fill_bytes(&mut out);
        out
    }
}

fn to_array<const N: usize>(bytes: &[u8]) -> Option<[u8; N]> {
    bytes.try_into().ok()
}

#[async_trait]
impl CryptoGateway for SoftwareGateway {
    async fn transmitter_info(&self) -> Result<VersionInfo, CryptoError> {
        self.state.lock().await.check(GatewayOp::TransmitterInfo)?;
        Ok(self.tx_info)
    }

    async fn set_receiver_info(&self, info: VersionInfo) -> Result<(), CryptoError> {
        let mut state = self.state.lock().await;
        state.check(GatewayOp::SetReceiverInfo)?;
        state.rx_info = Some(info);
        Ok(())
    }

    async fn generate_random(&self, kind: RandomKind, len: usize) -> Result<Vec<u8>, CryptoError> {
        let mut state = self.state.lock().await;
        state.check(GatewayOp::GenerateRandom)?;
        let mut out = vec![0u8; len];
        OsRng.fill_bytes(&mut out);
        match kind {
            RandomKind::Rtx => {
                // New AKE: forget everything tied to the previous exchange.
                state.rtx = to_array(&out);
                state.rrx = None;
                state.rn = None;
                state.lc_precomputed = false;
                state.km = None;
                state.receiver_id = None;
            }
            RandomKind::Rn => {
                state.rn = to_array(&out);
                state.lc_precomputed = false;
            }
            RandomKind::Riv => {}
        }
        Ok(out)
    }

    async fn set_rrx(&self, rrx: [u8; len::RRX]) -> Result<(), CryptoError> {
        let mut state = self.state.lock().await;
        state.check(GatewayOp::SetRrx)?;
        state.rrx = Some(rrx);
        Ok(())
    }

    async fn verify_certificate(
        &self,
        cert: &[u8],
        rrx: [u8; len::RRX],
        rx_caps: Caps,
    ) -> Result<ReceiverId, CryptoError> {
        let mut state = self.state.lock().await;
        state.check(GatewayOp::VerifyCertificate)?;
        let receiver_id = derive::verify_certificate(&self.derivation_key, cert)?;
        if self.revoked.contains(&receiver_id) {
            warn!("Receiver {} is revoked", hex::encode(receiver_id));
            return Err(CryptoError::CertificateRejected(format!(
                "receiver {} revoked",
                hex::encode(receiver_id)
            )));
        }
        state.receiver_id = Some(receiver_id);
        state.rrx = Some(rrx);
        state.rx_caps = rx_caps;
        Ok(receiver_id)
    }

    async fn generate_master_key(&self, link_type: LinkType) -> Result<Vec<u8>, CryptoError> {
        let mut state = self.state.lock().await;
        state.check(GatewayOp::GenerateMasterKey)?;
        let receiver_id = State::require(state.receiver_id, GatewayOp::GenerateMasterKey, "receiver id")?;
        let km = Self::random::<16>();
        let ekpub = derive::encrypt_km_kpub(&self.derivation_key, &receiver_id, &km)?;
        state.km = Some(MasterKey(km));
        debug!(?link_type, "Generated km for {}", hex::encode(receiver_id));
        Ok(ekpub)
    }

    async fn find_pairing(
        &self,
        receiver_id: ReceiverId,
    ) -> Result<Option<PairingInfo>, CryptoError> {
        let mut state = self.state.lock().await;
        state.check(GatewayOp::FindPairing)?;
        let found = state.pairings.get(&receiver_id).cloned();
        match found {
            Some(pairing) => {
                state.km = Some(pairing.km.clone());
                Ok(Some(PairingInfo {
                    ekh_km: pairing.ekh_km,
                    m: pairing.m,
                }))
            }
            None => Ok(None),
        }
    }

    async fn store_pairing(
        &self,
        receiver_id: ReceiverId,
        ekh_km: [u8; len::EKH_KM],
    ) -> Result<(), CryptoError> {
        let mut state = self.state.lock().await;
        state.check(GatewayOp::StorePairing)?;
        let km = MasterKey(state.km(GatewayOp::StorePairing)?);
        let rtx = State::require(state.rtx, GatewayOp::StorePairing, "rtx")?;
        let rrx = State::require(state.rrx, GatewayOp::StorePairing, "rrx")?;
        state.pairings.insert(
            receiver_id,
            StoredPairing {
                km,
                ekh_km,
                m: derive::pairing_m(&rtx, &rrx),
            },
        );
        Ok(())
    }

    async fn compare_ake_hmac(&self, h_prime: &[u8]) -> Result<(), CryptoError> {
        let mut state = self.state.lock().await;
        state.check(GatewayOp::CompareAkeHmac)?;
        let kd = state.kd(GatewayOp::CompareAkeHmac)?;
        let rtx = State::require(state.rtx, GatewayOp::CompareAkeHmac, "rtx")?;
        let tx_caps = Caps::transmitter();
        let h = derive::compute_h(kd.as_bytes(), &rtx, state.rx_caps.as_bytes(), tx_caps.as_bytes())?;
        if !derive::ct_eq(&h, h_prime) {
            return Err(CryptoError::HmacMismatch("H'"));
        }
        Ok(())
    }

    async fn precompute_lc_hmac(&self) -> Result<[u8; 16], CryptoError> {
        let mut state = self.state.lock().await;
        state.check(GatewayOp::PrecomputeLcHmac)?;
        let kd = state.kd(GatewayOp::PrecomputeLcHmac)?;
        let rn = State::require(state.rn, GatewayOp::PrecomputeLcHmac, "rn")?;
        let rrx = State::require(state.rrx, GatewayOp::PrecomputeLcHmac, "rrx")?;
        let l = derive::compute_l(kd.as_bytes(), &rn, &rrx)?;
        let mut low = [0u8; 16];
        low.copy_from_slice(&l[16..]);
        state.lc_precomputed = true;
        Ok(low)
    }

    async fn compare_lc_hmac(&self, l_prime: &[u8]) -> Result<(), CryptoError> {
        let mut state = self.state.lock().await;
        state.check(GatewayOp::CompareLcHmac)?;
        let kd = state.kd(GatewayOp::CompareLcHmac)?;
        let rn = State::require(state.rn, GatewayOp::CompareLcHmac, "rn")?;
        let rrx = State::require(state.rrx, GatewayOp::CompareLcHmac, "rrx")?;
        let l = derive::compute_l(kd.as_bytes(), &rn, &rrx)?;
        let expected: &[u8] = match l_prime.len() {
            len::L_PRIME => &l,
            len::L_PRIME_PRECOMPUTED if state.lc_precomputed => &l[..16],
            other => {
                return Err(CryptoError::InvalidKeyLength {
                    expected: len::L_PRIME,
                    actual: other,
                })
            }
        };
        if !derive::ct_eq(expected, l_prime) {
            return Err(CryptoError::HmacMismatch("L'"));
        }
        Ok(())
    }

    async fn generate_session_key(
        &self,
        link_type: LinkType,
        share: bool,
    ) -> Result<[u8; len::EDKEY_KS], CryptoError> {
        let mut state = self.state.lock().await;
        state.check(GatewayOp::GenerateSessionKey)?;
        let op = GatewayOp::GenerateSessionKey;
        let km = state.km(op)?;
        let rtx = State::require(state.rtx, op, "rtx")?;
        let rrx = State::require(state.rrx, op, "rrx")?;
        let rn = State::require(state.rn, op, "rn")?;

        let existing = if share {
            state.ks.as_ref().map(|ks| *ks.as_bytes())
        } else {
            None
        };
        let ks = match existing {
            Some(ks) => ks,
            None => {
                let fresh = Self::random::<16>();
                state.ks = Some(SessionKey(fresh));
                fresh
            }
        };
        debug!(?link_type, share, "Generated Edkey(ks)");
        let dkey2 = derive::dkey2(&km, &rtx, &rrx, &rn)?;
        Ok(derive::mask_ks(&ks, &dkey2))
    }

    async fn verify_receiver_id_list(
        &self,
        list_message: &[u8],
        v_prime: &[u8],
    ) -> Result<[u8; len::V], CryptoError> {
        let mut state = self.state.lock().await;
        state.check(GatewayOp::VerifyReceiverIdList)?;
        let kd = state.kd(GatewayOp::VerifyReceiverIdList)?;
        let v = derive::compute_v(kd.as_bytes(), list_message)?;
        if !derive::ct_eq(&v[..len::V_PRIME], v_prime) {
            return Err(CryptoError::HmacMismatch("V'"));
        }
        let mut ack = [0u8; len::V];
        ack.copy_from_slice(&v[len::V_PRIME..]);
        Ok(ack)
    }

    async fn generate_stream_management(
        &self,
        link_type: LinkType,
        seq_num_m: u32,
        streams: Vec<StreamEntry>,
    ) -> Result<StreamManagement, CryptoError> {
        self.state.lock().await.check(GatewayOp::GenerateStreamManagement)?;
        let k = u16::try_from(streams.len()).map_err(|_| CryptoError::Gateway {
            op: GatewayOp::GenerateStreamManagement.name(),
            reason: format!("{} streams", streams.len()),
        })?;
        let mut streamid_type = Vec::new();
        for stream in &streams {
            match link_type {
                LinkType::DisplayPort => {
                    let id = u8::try_from(stream.stream_id).map_err(|_| CryptoError::Gateway {
                        op: GatewayOp::GenerateStreamManagement.name(),
                        reason: format!("stream id {:#x} exceeds one byte", stream.stream_id),
                    })?;
                    streamid_type.push(id);
                    streamid_type.push(stream.content_type);
                }
                LinkType::Iia => {
                    streamid_type.extend_from_slice(&stream.stream_ctr.to_be_bytes());
                    streamid_type.extend_from_slice(&stream.stream_id.to_be_bytes());
                    streamid_type.push(stream.content_type);
                }
            }
        }
        debug!(seq_num_m, k, "Prepared stream management");
        Ok(StreamManagement { k, streamid_type })
    }

    async fn verify_stream_ready(
        &self,
        m_prime: &[u8],
        stream_message: &[u8],
    ) -> Result<(), CryptoError> {
        let mut state = self.state.lock().await;
        state.check(GatewayOp::VerifyStreamReady)?;
        let kd = state.kd(GatewayOp::VerifyStreamReady)?;
        let m = derive::compute_m(kd.as_bytes(), stream_message)?;
        if !derive::ct_eq(&m, m_prime) {
            return Err(CryptoError::HmacMismatch("M'"));
        }
        Ok(())
    }

    async fn wrap_key(&self, key: &[u8]) -> Result<WrappedKey, CryptoError> {
        self.state.lock().await.check(GatewayOp::WrapKey)?;
        let (enc, tag_key) = derive::wrap_keys(&self.derivation_key)?;
        let mut blob = BlockCipher::new(enc).encrypt(&pad(key))?;
        let tag = derive::hmac_sha256(&tag_key, &[&blob])?;
        blob.extend_from_slice(&tag[..16]);
        Ok(WrappedKey::new(blob))
    }

    async fn unwrap_key(&self, wrapped: &WrappedKey) -> Result<Vec<u8>, CryptoError> {
        self.state.lock().await.check(GatewayOp::UnwrapKey)?;
        let bytes = wrapped.as_bytes();
        if bytes.len() < 32 || bytes.len() % 16 != 0 {
            return Err(CryptoError::Wrap(format!("blob length {}", bytes.len())));
        }
        let (body, tag) = bytes.split_at(bytes.len() - 16);
        let (enc, tag_key) = derive::wrap_keys(&self.derivation_key)?;
        let expected = derive::hmac_sha256(&tag_key, &[body])?;
        if !derive::ct_eq(&expected[..16], tag) {
            return Err(CryptoError::Wrap("integrity check failed".to_string()));
        }
        unpad(&BlockCipher::new(enc).decrypt(body)?)
    }
}
